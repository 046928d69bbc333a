//! Provider side of the storage deal protocol.

pub mod events;
pub mod states;

pub use events::ProviderEvent;

use crate::error::{Result, StorageMarketError};
use crate::network::{StorageDealStream, StorageMarketNetwork, StorageReceiver};
use crate::nodes::StorageProviderNode;
use crate::types::{ProviderDeal, Response, SignedResponse, StorageDealStatus};
use async_trait::async_trait;
use market_fsm::{Context, DealSpec, RecordStore, StateGroup, SubscriptionId};
use market_piecestore::{piece_commitment, Blockstore};
use market_types::{Address, Cid, TokenAmount};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Provider acceptance thresholds, injected at construction.
#[derive(Debug, Clone)]
pub struct StorageProviderConfig {
    pub min_piece_size: u64,
    pub min_storage_price_per_epoch: TokenAmount,
}

impl Default for StorageProviderConfig {
    fn default() -> Self {
        Self {
            min_piece_size: 1,
            min_storage_price_per_epoch: TokenAmount::ZERO,
        }
    }
}

/// Capabilities the provider deal machine consumes.
#[async_trait]
pub trait ProviderDealEnvironment: Send + Sync {
    fn node(&self) -> &dyn StorageProviderNode;

    fn provider_address(&self) -> Address;

    fn config(&self) -> &StorageProviderConfig;

    /// Sign and write a response on the deal's stream.
    async fn send_deal_response(&self, proposal_cid: &Cid, response: Response) -> Result<()>;

    /// Recompute the piece commitment of the received payload.
    async fn verify_data(&self, proposal_cid: &Cid, payload_root: &Cid) -> Result<Cid>;

    async fn close_stream(&self, proposal_cid: &Cid) -> Result<()>;
}

/// Machine description for provider-side deals.
pub struct ProviderDealFsm;

#[async_trait]
impl DealSpec for ProviderDealFsm {
    type Id = Cid;
    type Record = ProviderDeal;
    type Event = ProviderEvent;
    type Environment = dyn ProviderDealEnvironment;

    const VERSION: u32 = 1;

    fn id(record: &ProviderDeal) -> Cid {
        record.proposal_cid
    }

    fn status_code(record: &ProviderDeal) -> u64 {
        record.state.code()
    }

    fn is_terminal(record: &ProviderDeal) -> bool {
        matches!(
            record.state,
            StorageDealStatus::Active | StorageDealStatus::Error
        )
    }

    fn apply(record: &mut ProviderDeal, event: &ProviderEvent) -> market_fsm::Result<()> {
        events::apply(record, event)
    }

    async fn enter(env: Arc<Self::Environment>, ctx: Context<Self>, deal: ProviderDeal) {
        use StorageDealStatus as S;
        match deal.state {
            S::Validating => states::validate_proposal(env.as_ref(), &ctx, &deal).await,
            S::EnsureProviderFunds => {
                states::ensure_provider_funds(env.as_ref(), &ctx, &deal).await
            }
            S::ProviderFunding => states::wait_for_funding(env.as_ref(), &ctx, &deal).await,
            S::FundsEnsured => states::send_data_request(env.as_ref(), &ctx, &deal).await,
            S::VerifyData => states::verify_data(env.as_ref(), &ctx, &deal).await,
            S::Publish => states::publish_deal(env.as_ref(), &ctx, &deal).await,
            S::Publishing => states::wait_for_publish(env.as_ref(), &ctx, &deal).await,
            S::Staged => states::hand_off_deal(env.as_ref(), &ctx, &deal).await,
            S::Sealing => states::verify_deal_activated(env.as_ref(), &ctx, &deal).await,
            S::Failing => states::fail_deal(env.as_ref(), &ctx, &deal).await,
            // WaitingForData parks until the transfer subsystem reports
            // completion; terminal states have nothing left to do.
            _ => {}
        }
    }
}

struct ProviderEnvironment {
    address: Address,
    node: Arc<dyn StorageProviderNode>,
    config: StorageProviderConfig,
    blockstore: Arc<dyn Blockstore>,
    streams: RwLock<HashMap<Cid, Arc<dyn StorageDealStream>>>,
}

impl ProviderEnvironment {
    async fn stream(&self, proposal_cid: &Cid) -> Result<Arc<dyn StorageDealStream>> {
        self.streams
            .read()
            .await
            .get(proposal_cid)
            .cloned()
            .ok_or_else(|| StorageMarketError::UnknownDeal(proposal_cid.to_string()))
    }
}

#[async_trait]
impl ProviderDealEnvironment for ProviderEnvironment {
    fn node(&self) -> &dyn StorageProviderNode {
        self.node.as_ref()
    }

    fn provider_address(&self) -> Address {
        self.address
    }

    fn config(&self) -> &StorageProviderConfig {
        &self.config
    }

    async fn send_deal_response(&self, proposal_cid: &Cid, response: Response) -> Result<()> {
        let stream = self.stream(proposal_cid).await?;
        let signature = self
            .node
            .sign_bytes(&self.address, &response.signing_bytes())
            .await?;
        stream
            .write_deal_response(SignedResponse {
                response,
                signature,
            })
            .await
    }

    async fn verify_data(&self, _proposal_cid: &Cid, payload_root: &Cid) -> Result<Cid> {
        piece_commitment(self.blockstore.as_ref(), payload_root)
            .await
            .map_err(|e| StorageMarketError::Data(e.to_string()))
    }

    async fn close_stream(&self, proposal_cid: &Cid) -> Result<()> {
        let stream = { self.streams.write().await.remove(proposal_cid) };
        match stream {
            Some(stream) => stream.close().await,
            None => Ok(()),
        }
    }
}

/// The storage provider: one state machine per inbound deal.
pub struct StorageProvider {
    env: Arc<ProviderEnvironment>,
    group: StateGroup<ProviderDealFsm>,
    network: Arc<dyn StorageMarketNetwork>,
}

impl StorageProvider {
    pub fn new(
        address: Address,
        node: Arc<dyn StorageProviderNode>,
        network: Arc<dyn StorageMarketNetwork>,
        blockstore: Arc<dyn Blockstore>,
        config: StorageProviderConfig,
        store: Arc<dyn RecordStore>,
    ) -> Self {
        let env = Arc::new(ProviderEnvironment {
            address,
            node,
            config,
            blockstore,
            streams: RwLock::new(HashMap::new()),
        });
        let group = StateGroup::new(
            env.clone() as Arc<dyn ProviderDealEnvironment>,
            store,
        );
        Self {
            env,
            group,
            network,
        }
    }

    /// Begin accepting inbound deal streams.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        self.network
            .set_delegate(self.clone() as Arc<dyn StorageReceiver>)
            .await
    }

    /// Report that the push transfer for a deal delivered its payload.
    pub async fn transfer_completed(&self, proposal_cid: Cid) -> Result<()> {
        self.group
            .send(&proposal_cid, ProviderEvent::DataTransferCompleted)
            .await
            .map_err(Into::into)
    }

    pub async fn get_deal(&self, proposal_cid: &Cid) -> Result<Option<ProviderDeal>> {
        self.group.get(proposal_cid).await.map_err(Into::into)
    }

    pub async fn list_deals(&self) -> Result<Vec<ProviderDeal>> {
        self.group.list().await.map_err(Into::into)
    }

    pub async fn subscribe_to_events<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&ProviderEvent, &ProviderDeal) + Send + Sync + 'static,
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

    /// Stop handling requests: release streams, stop the engine, unbind
    /// from the network.
    pub async fn stop(&self, timeout: Duration) -> Result<()> {
        let streams: Vec<Arc<dyn StorageDealStream>> = {
            let mut streams = self.env.streams.write().await;
            streams.drain().map(|(_, stream)| stream).collect()
        };
        for stream in streams {
            if let Err(e) = stream.close().await {
                warn!(error = %e, "failed to close deal stream during stop");
            }
        }
        self.group.stop(timeout).await?;
        self.network.stop_handling_requests().await
    }
}

#[async_trait]
impl StorageReceiver for StorageProvider {
    async fn handle_deal_stream(&self, stream: Arc<dyn StorageDealStream>) {
        let proposal = match stream.read_deal_proposal().await {
            Ok(proposal) => proposal,
            Err(e) => {
                warn!(error = %e, "failed to read deal proposal");
                let _ = stream.close().await;
                return;
            }
        };
        let deal = ProviderDeal::new(proposal.deal_proposal, proposal.piece, stream.remote_peer());
        let proposal_cid = deal.proposal_cid;
        info!(proposal = %proposal_cid, client = %deal.client, "received storage deal proposal");

        self.env
            .streams
            .write()
            .await
            .insert(proposal_cid, stream.clone());
        if let Err(e) = self.group.begin(deal).await {
            warn!(proposal = %proposal_cid, error = %e, "failed to begin provider deal");
            self.env.streams.write().await.remove(&proposal_cid);
            let _ = stream.close().await;
        }
    }
}
