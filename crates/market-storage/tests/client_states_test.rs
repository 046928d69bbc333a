//! Client deal state functions exercised one state at a time against a
//! scripted environment, asserting the exact states and messages a
//! counterparty-facing client reports.

use async_trait::async_trait;
use market_fsm::{Context, DealSpec};
use market_storage::client::events;
use market_storage::testnodes::FakeClientNode;
use market_storage::testutil::TestDealStream;
use market_storage::{
    ClientDeal, ClientDealEnvironment, ClientDealFsm, DataRef, DealProposal, Proposal, Response,
    Result, SignedProposal, SignedResponse, StorageClientNode, StorageDealStatus,
    StorageDealStream, StorageMarketError, TransferType, TransferVoucher,
};
use market_types::{Address, Cid, ExitCode, PeerId, Selector, Signature, TokenAmount};
use std::sync::Arc;
use tokio::sync::Mutex;

fn client_deal_proposal() -> SignedProposal {
    SignedProposal {
        proposal: DealProposal {
            piece_cid: Cid::dummy(11),
            piece_size: 2048,
            client: Address::dummy(1),
            provider: Address::dummy(2),
            start_epoch: 100,
            end_epoch: 200,
            storage_price_per_epoch: TokenAmount::from_base_units(10),
            provider_collateral: TokenAmount::from_base_units(100),
            client_collateral: TokenAmount::ZERO,
        },
        client_signature: Signature::dummy(1),
    }
}

fn test_deal(initial: StorageDealStatus, manual: bool) -> ClientDeal {
    let mut deal = ClientDeal::new(
        client_deal_proposal(),
        PeerId::dummy(7),
        Address::dummy(2),
        DataRef {
            transfer_type: if manual {
                TransferType::Manual
            } else {
                TransferType::Graphsync
            },
            root: Cid::dummy(21),
        },
    );
    deal.state = initial;
    deal.add_funds_cid = Some(Cid::dummy(99));
    deal
}

struct FakeEnvironment {
    node: FakeClientNode,
    stream: Option<Arc<TestDealStream>>,
    close_stream_error: Option<String>,
    start_data_transfer_error: Option<String>,
    close_stream_calls: Mutex<Vec<Cid>>,
    transfer_calls: Mutex<Vec<(PeerId, TransferVoucher, Cid)>>,
}

impl FakeEnvironment {
    fn new(node: FakeClientNode) -> Self {
        Self {
            node,
            stream: None,
            close_stream_error: None,
            start_data_transfer_error: None,
            close_stream_calls: Mutex::new(Vec::new()),
            transfer_calls: Mutex::new(Vec::new()),
        }
    }

    fn with_stream(mut self, stream: TestDealStream) -> Self {
        self.stream = Some(Arc::new(stream));
        self
    }

    fn with_close_stream_error(mut self, message: &str) -> Self {
        self.close_stream_error = Some(message.to_string());
        self
    }

    fn with_start_data_transfer_error(mut self, message: &str) -> Self {
        self.start_data_transfer_error = Some(message.to_string());
        self
    }

    fn stream(&self) -> &TestDealStream {
        self.stream.as_ref().expect("test configured no stream")
    }
}

#[async_trait]
impl ClientDealEnvironment for FakeEnvironment {
    fn node(&self) -> &dyn StorageClientNode {
        &self.node
    }

    async fn write_deal_proposal(
        &self,
        _peer: PeerId,
        _proposal_cid: Cid,
        proposal: Proposal,
    ) -> Result<()> {
        self.stream().write_deal_proposal(proposal).await
    }

    async fn read_deal_response(&self, _proposal_cid: &Cid) -> Result<SignedResponse> {
        self.stream().read_deal_response().await
    }

    async fn tag_connection(&self, proposal_cid: &Cid) -> Result<()> {
        self.stream()
            .tag_protected_connection(&proposal_cid.to_string())
            .await;
        Ok(())
    }

    async fn start_data_transfer(
        &self,
        to: PeerId,
        voucher: TransferVoucher,
        base_cid: Cid,
        _selector: Selector,
    ) -> Result<()> {
        self.transfer_calls
            .lock()
            .await
            .push((to, voucher, base_cid));
        match &self.start_data_transfer_error {
            Some(message) => Err(StorageMarketError::Stream(message.clone())),
            None => Ok(()),
        }
    }

    async fn close_stream(&self, proposal_cid: &Cid) -> Result<()> {
        self.close_stream_calls.lock().await.push(*proposal_cid);
        match &self.close_stream_error {
            Some(message) => Err(StorageMarketError::Stream(message.clone())),
            None => Ok(()),
        }
    }
}

async fn run_state(mut deal: ClientDeal, env: &Arc<FakeEnvironment>) -> ClientDeal {
    let (ctx, mut collected) = Context::<ClientDealFsm>::detached(deal.proposal_cid);
    let dyn_env: Arc<dyn ClientDealEnvironment> = env.clone();
    ClientDealFsm::enter(dyn_env, ctx, deal.clone()).await;
    while let Ok(event) = collected.try_recv() {
        events::apply(&mut deal, &event).expect("entry function produced inapplicable event");
    }
    deal
}

fn response_stream(
    state: StorageDealStatus,
    message: &str,
    publish_message: Option<Cid>,
    proposal_override: Option<Cid>,
) -> TestDealStream {
    let proposal =
        proposal_override.unwrap_or_else(|| client_deal_proposal().proposal_cid());
    let response = Response {
        state,
        proposal,
        message: message.to_string(),
        publish_message,
    };
    TestDealStream::new(PeerId::dummy(7)).with_response(SignedResponse {
        response,
        signature: Signature::dummy(2),
    })
}

#[tokio::test]
async fn test_ensure_funds_immediately_succeeds() {
    let env = Arc::new(FakeEnvironment::new(FakeClientNode::default()));
    let deal = run_state(test_deal(StorageDealStatus::EnsureClientFunds, false), &env).await;
    assert_eq!(deal.state, StorageDealStatus::FundsEnsured);
    assert_eq!(deal.message, "");
}

#[tokio::test]
async fn test_ensure_funds_sends_add_funds_message() {
    let funds_cid = Cid::dummy(123);
    let env = Arc::new(FakeEnvironment::new(FakeClientNode {
        add_funds_cid: Some(funds_cid),
        ..Default::default()
    }));
    let deal = run_state(test_deal(StorageDealStatus::EnsureClientFunds, false), &env).await;
    assert_eq!(deal.state, StorageDealStatus::ClientFunding);
    assert_eq!(deal.add_funds_cid, Some(funds_cid));
}

#[tokio::test]
async fn test_ensure_funds_fails() {
    let env = Arc::new(FakeEnvironment::new(FakeClientNode {
        ensure_funds_error: Some("Something went wrong".to_string()),
        ..Default::default()
    }));
    let deal = run_state(test_deal(StorageDealStatus::EnsureClientFunds, false), &env).await;
    assert_eq!(deal.state, StorageDealStatus::Failing);
    assert_eq!(
        deal.message,
        "adding market funds failed: Something went wrong"
    );
}

#[tokio::test]
async fn test_wait_for_funding_succeeds() {
    let env = Arc::new(FakeEnvironment::new(FakeClientNode::default()));
    let deal = run_state(test_deal(StorageDealStatus::ClientFunding, false), &env).await;
    assert_eq!(deal.state, StorageDealStatus::FundsEnsured);
}

#[tokio::test]
async fn test_wait_for_funding_nonzero_exit_code() {
    let env = Arc::new(FakeEnvironment::new(FakeClientNode {
        wait_for_message_exit_code: ExitCode(19),
        ..Default::default()
    }));
    let deal = run_state(test_deal(StorageDealStatus::ClientFunding, false), &env).await;
    assert_eq!(deal.state, StorageDealStatus::Failing);
    assert_eq!(
        deal.message,
        "adding market funds failed: AddFunds exit code: 19"
    );
}

#[tokio::test]
async fn test_propose_deal_succeeds_and_tags_connection() {
    let env = Arc::new(
        FakeEnvironment::new(FakeClientNode::default())
            .with_stream(TestDealStream::new(PeerId::dummy(7))),
    );
    let deal = run_state(test_deal(StorageDealStatus::FundsEnsured, false), &env).await;
    assert_eq!(deal.state, StorageDealStatus::WaitingForDataRequest);
    assert_eq!(env.stream().written_proposals().await.len(), 1);
    assert_eq!(
        env.stream().tagged().await,
        vec![deal.proposal_cid.to_string()]
    );
}

#[tokio::test]
async fn test_propose_deal_write_fails() {
    let env = Arc::new(
        FakeEnvironment::new(FakeClientNode::default()).with_stream(
            TestDealStream::new(PeerId::dummy(7))
                .with_write_proposal_error("write proposal failed"),
        ),
    );
    let deal = run_state(test_deal(StorageDealStatus::FundsEnsured, false), &env).await;
    assert_eq!(deal.state, StorageDealStatus::Error);
    assert_eq!(
        deal.message,
        "sending proposal to storage provider failed: write proposal failed"
    );
}

#[tokio::test]
async fn test_waiting_for_data_request_starts_transfer() {
    let env = Arc::new(
        FakeEnvironment::new(FakeClientNode::default()).with_stream(response_stream(
            StorageDealStatus::WaitingForData,
            "",
            None,
            None,
        )),
    );
    let deal = run_state(
        test_deal(StorageDealStatus::WaitingForDataRequest, false),
        &env,
    )
    .await;
    assert_eq!(deal.state, StorageDealStatus::Transferring);

    let calls = env.transfer_calls.lock().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, deal.miner);
    assert_eq!(calls[0].2, deal.data_ref.root);
}

#[tokio::test]
async fn test_waiting_for_data_request_unexpected_state() {
    let env = Arc::new(
        FakeEnvironment::new(FakeClientNode::default()).with_stream(response_stream(
            StorageDealStatus::ProposalNotFound,
            "",
            None,
            None,
        )),
    );
    let deal = run_state(
        test_deal(StorageDealStatus::WaitingForDataRequest, false),
        &env,
    )
    .await;
    assert_eq!(deal.state, StorageDealStatus::Failing);
    assert_eq!(
        deal.message,
        "unexpected deal status while waiting for data request: 1"
    );
}

#[tokio::test]
async fn test_waiting_for_data_request_transfer_fails() {
    let env = Arc::new(
        FakeEnvironment::new(FakeClientNode::default())
            .with_stream(response_stream(
                StorageDealStatus::WaitingForData,
                "",
                None,
                None,
            ))
            .with_start_data_transfer_error("failed"),
    );
    let deal = run_state(
        test_deal(StorageDealStatus::WaitingForDataRequest, false),
        &env,
    )
    .await;
    assert_eq!(deal.state, StorageDealStatus::Failing);
    assert_eq!(
        deal.message,
        "failed to initiate data transfer: failed to open push data channel: failed"
    );
}

#[tokio::test]
async fn test_waiting_for_data_request_manual_transfer() {
    let env = Arc::new(
        FakeEnvironment::new(FakeClientNode::default()).with_stream(response_stream(
            StorageDealStatus::WaitingForData,
            "",
            None,
            None,
        )),
    );
    let deal = run_state(
        test_deal(StorageDealStatus::WaitingForDataRequest, true),
        &env,
    )
    .await;
    assert_eq!(deal.state, StorageDealStatus::Validating);
    assert!(env.transfer_calls.lock().await.is_empty());
}

#[tokio::test]
async fn test_verify_deal_response_accepts() {
    let publish_message = Cid::dummy(55);
    let env = Arc::new(
        FakeEnvironment::new(FakeClientNode::default()).with_stream(response_stream(
            StorageDealStatus::ProposalAccepted,
            "",
            Some(publish_message),
            None,
        )),
    );
    let deal = run_state(test_deal(StorageDealStatus::Validating, false), &env).await;
    assert_eq!(deal.state, StorageDealStatus::ProposalAccepted);
    assert_eq!(deal.publish_message, Some(publish_message));
    assert!(deal.connection_closed);
}

#[tokio::test]
async fn test_verify_deal_response_read_fails() {
    let env = Arc::new(
        FakeEnvironment::new(FakeClientNode::default()).with_stream(
            TestDealStream::new(PeerId::dummy(7))
                .with_read_response_error("read response failed"),
        ),
    );
    let deal = run_state(test_deal(StorageDealStatus::Validating, false), &env).await;
    assert_eq!(deal.state, StorageDealStatus::Error);
    assert_eq!(
        deal.message,
        "error reading Response message: read response failed"
    );
}

#[tokio::test]
async fn test_verify_deal_response_bad_signature() {
    let env = Arc::new(
        FakeEnvironment::new(FakeClientNode {
            verify_signature_fails: true,
            ..Default::default()
        })
        .with_stream(response_stream(
            StorageDealStatus::ProposalAccepted,
            "",
            None,
            None,
        )),
    );
    let deal = run_state(test_deal(StorageDealStatus::Validating, false), &env).await;
    assert_eq!(deal.state, StorageDealStatus::Failing);
    assert_eq!(deal.message, "unable to verify signature on deal response");
}

#[tokio::test]
async fn test_verify_deal_response_wrong_proposal() {
    let env = Arc::new(
        FakeEnvironment::new(FakeClientNode::default()).with_stream(response_stream(
            StorageDealStatus::ProposalAccepted,
            "",
            None,
            Some(Cid::dummy(444)),
        )),
    );
    let deal = run_state(test_deal(StorageDealStatus::Validating, false), &env).await;
    assert_eq!(deal.state, StorageDealStatus::Failing);
    assert!(
        deal.message
            .starts_with("miner responded to a wrong proposal:"),
        "unexpected message: {}",
        deal.message
    );
}

#[tokio::test]
async fn test_verify_deal_response_rejected() {
    let env = Arc::new(
        FakeEnvironment::new(FakeClientNode::default()).with_stream(response_stream(
            StorageDealStatus::ProposalRejected,
            "because reasons",
            None,
            None,
        )),
    );
    let deal = run_state(test_deal(StorageDealStatus::Validating, false), &env).await;
    assert_eq!(deal.state, StorageDealStatus::Failing);
    assert_eq!(deal.message, "deal failed: (State=2) because reasons");
}

#[tokio::test]
async fn test_verify_deal_response_stream_close_fails() {
    let env = Arc::new(
        FakeEnvironment::new(FakeClientNode::default())
            .with_stream(response_stream(
                StorageDealStatus::ProposalAccepted,
                "",
                None,
                None,
            ))
            .with_close_stream_error("something went wrong"),
    );
    let deal = run_state(test_deal(StorageDealStatus::Validating, false), &env).await;
    assert_eq!(deal.state, StorageDealStatus::Error);
    assert_eq!(
        deal.message,
        "error attempting to close stream: something went wrong"
    );
}

#[tokio::test]
async fn test_validate_deal_published_succeeds() {
    let env = Arc::new(FakeEnvironment::new(FakeClientNode {
        validate_published_deal_id: 5,
        ..Default::default()
    }));
    let deal = run_state(test_deal(StorageDealStatus::ProposalAccepted, false), &env).await;
    assert_eq!(deal.state, StorageDealStatus::Sealing);
    assert_eq!(deal.deal_id, Some(5));
}

#[tokio::test]
async fn test_validate_deal_published_fails() {
    let env = Arc::new(FakeEnvironment::new(FakeClientNode {
        validate_published_deal_id: 5,
        validate_published_error: Some("Something went wrong".to_string()),
        ..Default::default()
    }));
    let deal = run_state(test_deal(StorageDealStatus::ProposalAccepted, false), &env).await;
    assert_eq!(deal.state, StorageDealStatus::Error);
    assert_eq!(
        deal.message,
        "error validating deal published: Something went wrong"
    );
}

#[tokio::test]
async fn test_verify_deal_activated_succeeds() {
    let env = Arc::new(FakeEnvironment::new(FakeClientNode::default()));
    let mut deal = test_deal(StorageDealStatus::Sealing, false);
    deal.deal_id = Some(5);
    let deal = run_state(deal, &env).await;
    assert_eq!(deal.state, StorageDealStatus::Active);
}

#[tokio::test]
async fn test_verify_deal_activated_fails_synchronously() {
    let env = Arc::new(FakeEnvironment::new(FakeClientNode {
        deal_committed_error: Some("Something went wrong".to_string()),
        ..Default::default()
    }));
    let mut deal = test_deal(StorageDealStatus::Sealing, false);
    deal.deal_id = Some(5);
    let deal = run_state(deal, &env).await;
    assert_eq!(deal.state, StorageDealStatus::Error);
    assert_eq!(
        deal.message,
        "error in deal activation: Something went wrong"
    );
}

#[tokio::test]
async fn test_verify_deal_activated_fails_asynchronously() {
    let env = Arc::new(FakeEnvironment::new(FakeClientNode {
        deal_committed_async_error: Some("Something went wrong later".to_string()),
        ..Default::default()
    }));
    let mut deal = test_deal(StorageDealStatus::Sealing, false);
    deal.deal_id = Some(5);
    let deal = run_state(deal, &env).await;
    assert_eq!(deal.state, StorageDealStatus::Error);
    assert_eq!(
        deal.message,
        "error in deal activation: Something went wrong later"
    );
}

#[tokio::test]
async fn test_fail_deal_closes_open_stream() {
    let env = Arc::new(FakeEnvironment::new(FakeClientNode::default()));
    let deal = run_state(test_deal(StorageDealStatus::Failing, false), &env).await;
    assert_eq!(deal.state, StorageDealStatus::Error);
    assert_eq!(env.close_stream_calls.lock().await.len(), 1);
}

#[tokio::test]
async fn test_fail_deal_close_fails() {
    let env = Arc::new(
        FakeEnvironment::new(FakeClientNode::default())
            .with_close_stream_error("unable to close"),
    );
    let deal = run_state(test_deal(StorageDealStatus::Failing, false), &env).await;
    assert_eq!(deal.state, StorageDealStatus::Error);
    assert_eq!(
        deal.message,
        "error attempting to close stream: unable to close"
    );
}

#[tokio::test]
async fn test_fail_deal_skips_closed_stream() {
    let env = Arc::new(FakeEnvironment::new(FakeClientNode::default()));
    let mut deal = test_deal(StorageDealStatus::Failing, false);
    deal.connection_closed = true;
    let deal = run_state(deal, &env).await;
    assert_eq!(deal.state, StorageDealStatus::Error);
    assert!(env.close_stream_calls.lock().await.is_empty());
}

#[tokio::test]
async fn test_finality_states() {
    for status in [StorageDealStatus::Active, StorageDealStatus::Error] {
        let deal = test_deal(status, false);
        assert!(ClientDealFsm::is_terminal(&deal));
    }
    for status in [
        StorageDealStatus::EnsureClientFunds,
        StorageDealStatus::Validating,
        StorageDealStatus::Failing,
    ] {
        let deal = test_deal(status, false);
        assert!(!ClientDealFsm::is_terminal(&deal));
    }
}
