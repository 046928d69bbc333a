//! Provider deal state functions exercised against a scripted environment.

use async_trait::async_trait;
use market_fsm::{Context, DealSpec};
use market_storage::provider::{events, ProviderDealEnvironment, ProviderDealFsm};
use market_storage::testnodes::FakeProviderNode;
use market_storage::{
    DataRef, DealProposal, ProviderDeal, Response, Result, SignedProposal, StorageDealStatus,
    StorageMarketError, StorageProviderConfig, StorageProviderNode, TransferType,
};
use market_types::{Address, Cid, ExitCode, PeerId, Signature, TokenAmount};
use std::sync::Arc;
use tokio::sync::Mutex;

fn provider_address() -> Address {
    Address::dummy(2)
}

fn signed_proposal() -> SignedProposal {
    SignedProposal {
        proposal: DealProposal {
            piece_cid: Cid::dummy(11),
            piece_size: 2048,
            client: Address::dummy(1),
            provider: provider_address(),
            start_epoch: 100,
            end_epoch: 200,
            storage_price_per_epoch: TokenAmount::from_base_units(10),
            provider_collateral: TokenAmount::from_base_units(100),
            client_collateral: TokenAmount::ZERO,
        },
        client_signature: Signature::dummy(1),
    }
}

fn test_deal(initial: StorageDealStatus) -> ProviderDeal {
    let mut deal = ProviderDeal::new(
        signed_proposal(),
        DataRef {
            transfer_type: TransferType::Manual,
            root: Cid::dummy(21),
        },
        PeerId::dummy(9),
    );
    deal.state = initial;
    deal.add_funds_cid = Some(Cid::dummy(99));
    deal
}

struct FakeEnvironment {
    node: FakeProviderNode,
    config: StorageProviderConfig,
    verify_data_result: Option<Cid>,
    verify_data_error: Option<String>,
    send_response_error: Option<String>,
    close_stream_error: Option<String>,
    sent_responses: Mutex<Vec<Response>>,
    close_stream_calls: Mutex<Vec<Cid>>,
}

impl FakeEnvironment {
    fn new(node: FakeProviderNode) -> Self {
        Self {
            node,
            config: StorageProviderConfig::default(),
            verify_data_result: None,
            verify_data_error: None,
            send_response_error: None,
            close_stream_error: None,
            sent_responses: Mutex::new(Vec::new()),
            close_stream_calls: Mutex::new(Vec::new()),
        }
    }

    fn with_config(mut self, config: StorageProviderConfig) -> Self {
        self.config = config;
        self
    }

    fn with_verify_data_result(mut self, commitment: Cid) -> Self {
        self.verify_data_result = Some(commitment);
        self
    }

    fn with_verify_data_error(mut self, message: &str) -> Self {
        self.verify_data_error = Some(message.to_string());
        self
    }

    fn with_send_response_error(mut self, message: &str) -> Self {
        self.send_response_error = Some(message.to_string());
        self
    }
}

#[async_trait]
impl ProviderDealEnvironment for FakeEnvironment {
    fn node(&self) -> &dyn StorageProviderNode {
        &self.node
    }

    fn provider_address(&self) -> Address {
        provider_address()
    }

    fn config(&self) -> &StorageProviderConfig {
        &self.config
    }

    async fn send_deal_response(&self, _proposal_cid: &Cid, response: Response) -> Result<()> {
        if let Some(message) = &self.send_response_error {
            return Err(StorageMarketError::Stream(message.clone()));
        }
        self.sent_responses.lock().await.push(response);
        Ok(())
    }

    async fn verify_data(&self, _proposal_cid: &Cid, _payload_root: &Cid) -> Result<Cid> {
        if let Some(message) = &self.verify_data_error {
            return Err(StorageMarketError::Data(message.clone()));
        }
        Ok(self.verify_data_result.unwrap_or_else(|| Cid::dummy(1)))
    }

    async fn close_stream(&self, proposal_cid: &Cid) -> Result<()> {
        self.close_stream_calls.lock().await.push(*proposal_cid);
        match &self.close_stream_error {
            Some(message) => Err(StorageMarketError::Stream(message.clone())),
            None => Ok(()),
        }
    }
}

async fn run_state(mut deal: ProviderDeal, env: &Arc<FakeEnvironment>) -> ProviderDeal {
    let (ctx, mut collected) = Context::<ProviderDealFsm>::detached(deal.proposal_cid);
    let dyn_env: Arc<dyn ProviderDealEnvironment> = env.clone();
    ProviderDealFsm::enter(dyn_env, ctx, deal.clone()).await;
    while let Ok(event) = collected.try_recv() {
        events::apply(&mut deal, &event).expect("entry function produced inapplicable event");
    }
    deal
}

#[tokio::test]
async fn test_validate_proposal_accepts() {
    let env = Arc::new(FakeEnvironment::new(FakeProviderNode::default()));
    let deal = run_state(test_deal(StorageDealStatus::Validating), &env).await;
    assert_eq!(deal.state, StorageDealStatus::EnsureProviderFunds);
}

#[tokio::test]
async fn test_validate_proposal_rejects_low_price() {
    let env = Arc::new(
        FakeEnvironment::new(FakeProviderNode::default()).with_config(StorageProviderConfig {
            min_storage_price_per_epoch: TokenAmount::from_base_units(1_000),
            ..Default::default()
        }),
    );
    let deal = run_state(test_deal(StorageDealStatus::Validating), &env).await;
    assert_eq!(deal.state, StorageDealStatus::Failing);
    assert_eq!(deal.message, "deal rejected: storage price per epoch too low");
}

#[tokio::test]
async fn test_validate_proposal_rejects_bad_signature() {
    let env = Arc::new(FakeEnvironment::new(FakeProviderNode {
        verify_signature_fails: true,
        ..Default::default()
    }));
    let deal = run_state(test_deal(StorageDealStatus::Validating), &env).await;
    assert_eq!(deal.state, StorageDealStatus::Failing);
    assert_eq!(deal.message, "deal rejected: could not verify client signature");
}

#[tokio::test]
async fn test_validate_proposal_rejects_wrong_provider() {
    let mut deal = test_deal(StorageDealStatus::Validating);
    deal.proposal.proposal.provider = Address::dummy(77);
    let env = Arc::new(FakeEnvironment::new(FakeProviderNode::default()));
    let deal = run_state(deal, &env).await;
    assert_eq!(deal.state, StorageDealStatus::Failing);
    assert_eq!(deal.message, "deal rejected: incorrect provider for deal");
}

#[tokio::test]
async fn test_ensure_funds_immediate_and_async() {
    let env = Arc::new(FakeEnvironment::new(FakeProviderNode::default()));
    let deal = run_state(test_deal(StorageDealStatus::EnsureProviderFunds), &env).await;
    assert_eq!(deal.state, StorageDealStatus::FundsEnsured);

    let funding_cid = Cid::dummy(300);
    let env = Arc::new(FakeEnvironment::new(FakeProviderNode {
        add_funds_cid: Some(funding_cid),
        ..Default::default()
    }));
    let deal = run_state(test_deal(StorageDealStatus::EnsureProviderFunds), &env).await;
    assert_eq!(deal.state, StorageDealStatus::ProviderFunding);
    assert_eq!(deal.add_funds_cid, Some(funding_cid));
}

#[tokio::test]
async fn test_provider_funding_bad_exit_code() {
    let env = Arc::new(FakeEnvironment::new(FakeProviderNode {
        wait_for_message_exit_code: ExitCode(19),
        ..Default::default()
    }));
    let deal = run_state(test_deal(StorageDealStatus::ProviderFunding), &env).await;
    assert_eq!(deal.state, StorageDealStatus::Failing);
    assert_eq!(
        deal.message,
        "error ensuring provider collateral: AddFunds exit code: 19"
    );
}

#[tokio::test]
async fn test_send_data_request() {
    let env = Arc::new(FakeEnvironment::new(FakeProviderNode::default()));
    let deal = run_state(test_deal(StorageDealStatus::FundsEnsured), &env).await;
    assert_eq!(deal.state, StorageDealStatus::WaitingForData);

    let responses = env.sent_responses.lock().await;
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].state, StorageDealStatus::WaitingForData);
    assert_eq!(responses[0].proposal, deal.proposal_cid);
}

#[tokio::test]
async fn test_send_data_request_write_fails() {
    let env = Arc::new(
        FakeEnvironment::new(FakeProviderNode::default())
            .with_send_response_error("pipe broken"),
    );
    let deal = run_state(test_deal(StorageDealStatus::FundsEnsured), &env).await;
    assert_eq!(deal.state, StorageDealStatus::Error);
    assert_eq!(deal.message, "error sending deal response: pipe broken");
}

#[tokio::test]
async fn test_verify_data_matches_proposal() {
    let env = Arc::new(
        FakeEnvironment::new(FakeProviderNode::default())
            .with_verify_data_result(Cid::dummy(11)),
    );
    let deal = run_state(test_deal(StorageDealStatus::VerifyData), &env).await;
    assert_eq!(deal.state, StorageDealStatus::Publish);
}

#[tokio::test]
async fn test_verify_data_mismatch() {
    let env = Arc::new(
        FakeEnvironment::new(FakeProviderNode::default())
            .with_verify_data_result(Cid::dummy(500)),
    );
    let deal = run_state(test_deal(StorageDealStatus::VerifyData), &env).await;
    assert_eq!(deal.state, StorageDealStatus::Failing);
    assert!(deal
        .message
        .starts_with("deal data verification failed: proposed piece"));
}

#[tokio::test]
async fn test_verify_data_error() {
    let env = Arc::new(
        FakeEnvironment::new(FakeProviderNode::default())
            .with_verify_data_error("unseal exploded"),
    );
    let deal = run_state(test_deal(StorageDealStatus::VerifyData), &env).await;
    assert_eq!(deal.state, StorageDealStatus::Failing);
    assert_eq!(
        deal.message,
        "deal data verification failed: data verification error: unseal exploded"
    );
}

#[tokio::test]
async fn test_publish_and_wait_for_publish() {
    let publish_cid = Cid::dummy(1000);
    let env = Arc::new(FakeEnvironment::new(FakeProviderNode {
        publish_deal_id: 42,
        ..Default::default()
    }));

    let deal = run_state(test_deal(StorageDealStatus::Publish), &env).await;
    assert_eq!(deal.state, StorageDealStatus::Publishing);
    assert_eq!(deal.publish_cid, Some(publish_cid));

    let deal = run_state(deal, &env).await;
    assert_eq!(deal.state, StorageDealStatus::Staged);
    assert_eq!(deal.deal_id, Some(42));
    assert!(deal.connection_closed);

    let responses = env.sent_responses.lock().await;
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].state, StorageDealStatus::ProposalAccepted);
    assert_eq!(responses[0].publish_message, Some(publish_cid));
    assert_eq!(env.close_stream_calls.lock().await.len(), 1);
}

#[tokio::test]
async fn test_publish_fails() {
    let env = Arc::new(FakeEnvironment::new(FakeProviderNode {
        publish_error: Some("chain unavailable".to_string()),
        ..Default::default()
    }));
    let deal = run_state(test_deal(StorageDealStatus::Publish), &env).await;
    assert_eq!(deal.state, StorageDealStatus::Error);
    assert_eq!(deal.message, "error publishing deal: chain unavailable");
}

#[tokio::test]
async fn test_hand_off_and_activation() {
    let env = Arc::new(FakeEnvironment::new(FakeProviderNode::default()));

    let mut deal = test_deal(StorageDealStatus::Staged);
    deal.deal_id = Some(42);
    deal.connection_closed = true;

    let deal = run_state(deal, &env).await;
    assert_eq!(deal.state, StorageDealStatus::Sealing);

    let deal = run_state(deal, &env).await;
    assert_eq!(deal.state, StorageDealStatus::Active);
}

#[tokio::test]
async fn test_activation_failure() {
    let env = Arc::new(FakeEnvironment::new(FakeProviderNode {
        sector_committed_error: Some("sector fault".to_string()),
        ..Default::default()
    }));
    let mut deal = test_deal(StorageDealStatus::Sealing);
    deal.deal_id = Some(42);
    let deal = run_state(deal, &env).await;
    assert_eq!(deal.state, StorageDealStatus::Error);
    assert_eq!(deal.message, "error in deal activation: sector fault");
}

#[tokio::test]
async fn test_fail_deal_reports_rejection() {
    let env = Arc::new(FakeEnvironment::new(FakeProviderNode::default()));
    let mut deal = test_deal(StorageDealStatus::Failing);
    deal.message = "deal rejected: piece size too small".to_string();

    let deal = run_state(deal, &env).await;
    assert_eq!(deal.state, StorageDealStatus::Error);
    assert_eq!(deal.message, "deal rejected: piece size too small");

    let responses = env.sent_responses.lock().await;
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].state, StorageDealStatus::ProposalRejected);
    assert_eq!(responses[0].message, "deal rejected: piece size too small");
    assert_eq!(env.close_stream_calls.lock().await.len(), 1);
}
