//! Client side of the storage deal protocol.

pub mod events;
pub mod states;

pub use events::ClientEvent;

use crate::datatransfer::{DataTransfer, TransferVoucher};
use crate::error::{Result, StorageMarketError};
use crate::network::{StorageDealStream, StorageMarketNetwork};
use crate::nodes::StorageClientNode;
use crate::types::{ClientDeal, DataRef, Proposal, SignedProposal, SignedResponse, StorageDealStatus};
use async_trait::async_trait;
use market_fsm::{Context, DealSpec, RecordStore, StateGroup, SubscriptionId};
use market_types::{Address, Cid, PeerId, Selector};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::info;

/// Capabilities the client deal machine consumes.
#[async_trait]
pub trait ClientDealEnvironment: Send + Sync {
    fn node(&self) -> &dyn StorageClientNode;

    async fn write_deal_proposal(
        &self,
        peer: PeerId,
        proposal_cid: Cid,
        proposal: Proposal,
    ) -> Result<()>;

    async fn read_deal_response(&self, proposal_cid: &Cid) -> Result<SignedResponse>;

    async fn tag_connection(&self, proposal_cid: &Cid) -> Result<()>;

    async fn start_data_transfer(
        &self,
        to: PeerId,
        voucher: TransferVoucher,
        base_cid: Cid,
        selector: Selector,
    ) -> Result<()>;

    async fn close_stream(&self, proposal_cid: &Cid) -> Result<()>;
}

/// Machine description for client-side deals.
pub struct ClientDealFsm;

#[async_trait]
impl DealSpec for ClientDealFsm {
    type Id = Cid;
    type Record = ClientDeal;
    type Event = ClientEvent;
    type Environment = dyn ClientDealEnvironment;

    const VERSION: u32 = 1;

    fn id(record: &ClientDeal) -> Cid {
        record.proposal_cid
    }

    fn status_code(record: &ClientDeal) -> u64 {
        record.state.code()
    }

    fn is_terminal(record: &ClientDeal) -> bool {
        matches!(
            record.state,
            StorageDealStatus::Active | StorageDealStatus::Error
        )
    }

    fn apply(record: &mut ClientDeal, event: &ClientEvent) -> market_fsm::Result<()> {
        events::apply(record, event)
    }

    async fn enter(env: Arc<Self::Environment>, ctx: Context<Self>, deal: ClientDeal) {
        use StorageDealStatus as S;
        match deal.state {
            S::EnsureClientFunds => states::ensure_client_funds(env.as_ref(), &ctx, &deal).await,
            S::ClientFunding => states::wait_for_funding(env.as_ref(), &ctx, &deal).await,
            S::FundsEnsured => states::propose_deal(env.as_ref(), &ctx, &deal).await,
            S::WaitingForDataRequest => {
                states::waiting_for_data_request(env.as_ref(), &ctx, &deal).await
            }
            S::Validating => states::verify_deal_response(env.as_ref(), &ctx, &deal).await,
            S::ProposalAccepted => {
                states::validate_deal_published(env.as_ref(), &ctx, &deal).await
            }
            S::Sealing => states::verify_deal_activated(env.as_ref(), &ctx, &deal).await,
            S::Failing => states::fail_deal(env.as_ref(), &ctx, &deal).await,
            // Transferring parks until the data-transfer subsystem reports
            // completion; terminal states have nothing left to do.
            _ => {}
        }
    }
}

struct ClientEnvironment {
    node: Arc<dyn StorageClientNode>,
    network: Arc<dyn StorageMarketNetwork>,
    transfer: Arc<dyn DataTransfer>,
    streams: RwLock<HashMap<Cid, Arc<dyn StorageDealStream>>>,
}

#[async_trait]
impl ClientDealEnvironment for ClientEnvironment {
    fn node(&self) -> &dyn StorageClientNode {
        self.node.as_ref()
    }

    async fn write_deal_proposal(
        &self,
        peer: PeerId,
        proposal_cid: Cid,
        proposal: Proposal,
    ) -> Result<()> {
        let stream = self.network.new_deal_stream(peer).await?;
        self.streams.write().await.insert(proposal_cid, stream.clone());
        stream.write_deal_proposal(proposal).await
    }

    async fn read_deal_response(&self, proposal_cid: &Cid) -> Result<SignedResponse> {
        let stream = self.stream(proposal_cid).await?;
        stream.read_deal_response().await
    }

    async fn tag_connection(&self, proposal_cid: &Cid) -> Result<()> {
        let stream = self.stream(proposal_cid).await?;
        stream
            .tag_protected_connection(&proposal_cid.to_string())
            .await;
        Ok(())
    }

    async fn start_data_transfer(
        &self,
        to: PeerId,
        voucher: TransferVoucher,
        base_cid: Cid,
        selector: Selector,
    ) -> Result<()> {
        self.transfer
            .open_push_channel(to, voucher, base_cid, selector)
            .await
    }

    async fn close_stream(&self, proposal_cid: &Cid) -> Result<()> {
        let stream = { self.streams.write().await.remove(proposal_cid) };
        match stream {
            Some(stream) => stream.close().await,
            None => Ok(()),
        }
    }
}

impl ClientEnvironment {
    async fn stream(&self, proposal_cid: &Cid) -> Result<Arc<dyn StorageDealStream>> {
        self.streams
            .read()
            .await
            .get(proposal_cid)
            .cloned()
            .ok_or_else(|| StorageMarketError::UnknownDeal(proposal_cid.to_string()))
    }
}

/// The storage client: one state machine per outgoing deal.
pub struct StorageClient {
    group: StateGroup<ClientDealFsm>,
}

impl StorageClient {
    pub fn new(
        network: Arc<dyn StorageMarketNetwork>,
        node: Arc<dyn StorageClientNode>,
        transfer: Arc<dyn DataTransfer>,
        store: Arc<dyn RecordStore>,
    ) -> Self {
        let env: Arc<dyn ClientDealEnvironment> = Arc::new(ClientEnvironment {
            node,
            network,
            transfer,
            streams: RwLock::new(HashMap::new()),
        });
        Self {
            group: StateGroup::new(env, store),
        }
    }

    /// Open a new deal with a provider. Fund escrow runs first; the
    /// proposal goes out once funds are ensured.
    pub async fn propose_storage_deal(
        &self,
        miner: PeerId,
        miner_worker: Address,
        proposal: SignedProposal,
        data_ref: DataRef,
    ) -> Result<Cid> {
        let deal = ClientDeal::new(proposal, miner, miner_worker, data_ref);
        let proposal_cid = deal.proposal_cid;
        info!(proposal = %proposal_cid, miner = %miner, "proposing storage deal");
        self.group.begin(deal).await?;
        Ok(proposal_cid)
    }

    /// Report that the push data transfer for a deal finished.
    pub async fn on_data_transfer_complete(&self, proposal_cid: Cid) -> Result<()> {
        self.group
            .send(&proposal_cid, ClientEvent::DataTransferComplete)
            .await
            .map_err(Into::into)
    }

    pub async fn get_deal(&self, proposal_cid: &Cid) -> Result<Option<ClientDeal>> {
        self.group.get(proposal_cid).await.map_err(Into::into)
    }

    pub async fn list_deals(&self) -> Result<Vec<ClientDeal>> {
        self.group.list().await.map_err(Into::into)
    }

    pub fn is_terminated(&self, deal: &ClientDeal) -> bool {
        self.group.is_terminated(deal)
    }

    pub async fn subscribe_to_events<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&ClientEvent, &ClientDeal) + Send + Sync + 'static,
    {
        self.group.subscribe(callback).await
    }

    pub async fn unsubscribe(&self, subscription: SubscriptionId) {
        self.group.unsubscribe(subscription).await;
    }

    /// Rehydrate persisted deals after a process restart.
    pub async fn restart(&self) -> Result<()> {
        self.group.restart().await.map_err(Into::into)
    }

    pub async fn stop(&self, timeout: Duration) -> Result<()> {
        self.group.stop(timeout).await.map_err(Into::into)
    }
}
