//! Provider side of the retrieval deal protocol.

pub mod events;
pub mod states;

pub use events::ProviderEvent;

use crate::blockio::SelectorBlockReader;
use crate::error::{Result, RetrievalError};
use crate::network::{
    RetrievalDealStream, RetrievalNetwork, RetrievalQueryStream, RetrievalReceiver,
};
use crate::nodes::RetrievalProviderNode;
use crate::types::{
    Block, DealPayment, DealResponse, DealStatus, Params, ProviderDealIdentifier,
    ProviderDealState, QueryItemStatus, QueryResponse, QueryResponseStatus,
};
use crate::unsealing::UnsealingLoader;
use async_trait::async_trait;
use market_fsm::{Context, DealSpec, RecordStore, StateGroup, SubscriptionId};
use market_piecestore::{find_piece, Blockstore, PieceStore, StoreError};
use market_types::{
    Address, Cid, TokenAmount, DEFAULT_PAYMENT_INTERVAL, DEFAULT_PAYMENT_INTERVAL_INCREASE,
    DEFAULT_PRICE_PER_BYTE,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};

/// Provider economics, injected at construction and adjustable at runtime.
#[derive(Debug, Clone)]
pub struct RetrievalProviderConfig {
    pub price_per_byte: TokenAmount,
    pub payment_interval: u64,
    pub payment_interval_increase: u64,
}

impl Default for RetrievalProviderConfig {
    fn default() -> Self {
        Self {
            price_per_byte: DEFAULT_PRICE_PER_BYTE,
            payment_interval: DEFAULT_PAYMENT_INTERVAL,
            payment_interval_increase: DEFAULT_PAYMENT_INTERVAL_INCREASE,
        }
    }
}

/// Capabilities the provider deal machine consumes.
#[async_trait]
pub trait RetrievalProviderEnvironment: Send + Sync {
    fn node(&self) -> &dyn RetrievalProviderNode;

    /// Validate proposed terms against the provider's limits.
    async fn check_deal_params(&self, params: &Params) -> Result<()>;

    /// Size of the first piece serving the payload.
    async fn get_piece_size(&self, payload_cid: &Cid, piece_cid: Option<Cid>) -> Result<u64>;

    async fn write_deal_response(
        &self,
        id: ProviderDealIdentifier,
        response: DealResponse,
    ) -> Result<()>;

    async fn read_deal_payment(&self, id: ProviderDealIdentifier) -> Result<DealPayment>;

    /// Next block of the deal's traversal, unsealing on demand; None once
    /// the traversal is exhausted.
    async fn next_block(&self, id: ProviderDealIdentifier) -> Result<Option<Block>>;

    async fn close_stream(&self, id: ProviderDealIdentifier) -> Result<()>;
}

/// Machine description for provider-side retrieval deals.
pub struct ProviderDealFsm;

#[async_trait]
impl DealSpec for ProviderDealFsm {
    type Id = ProviderDealIdentifier;
    type Record = ProviderDealState;
    type Event = ProviderEvent;
    type Environment = dyn RetrievalProviderEnvironment;

    const VERSION: u32 = 1;

    fn id(record: &ProviderDealState) -> ProviderDealIdentifier {
        record.identifier()
    }

    fn status_code(record: &ProviderDealState) -> u64 {
        record.status.code()
    }

    fn is_terminal(record: &ProviderDealState) -> bool {
        matches!(record.status, DealStatus::Completed | DealStatus::Errored)
    }

    fn apply(record: &mut ProviderDealState, event: &ProviderEvent) -> market_fsm::Result<()> {
        events::apply(record, event)
    }

    async fn enter(env: Arc<Self::Environment>, ctx: Context<Self>, deal: ProviderDealState) {
        use DealStatus as S;
        match deal.status {
            S::New => states::decide_on_deal(env.as_ref(), &ctx, &deal).await,
            S::Accepted => states::send_acceptance(env.as_ref(), &ctx, &deal).await,
            S::Ongoing => states::send_blocks(env.as_ref(), &ctx, &deal).await,
            S::FundsNeeded | S::FundsNeededLastPayment => {
                states::await_payment(env.as_ref(), &ctx, &deal).await
            }
            S::Finalizing => states::finalize_deal(env.as_ref(), &ctx, &deal).await,
            S::Completed => states::complete_deal(env.as_ref(), &ctx, &deal).await,
            S::Failing => states::fail_deal(env.as_ref(), &ctx, &deal).await,
            // Suspended parks until resume; terminal states are done.
            _ => {}
        }
    }
}

struct ProviderEnvironment {
    miner_address: Address,
    node: Arc<dyn RetrievalProviderNode>,
    piece_store: Arc<dyn PieceStore>,
    blockstore: Arc<dyn Blockstore>,
    config: RwLock<RetrievalProviderConfig>,
    streams: RwLock<HashMap<ProviderDealIdentifier, Arc<dyn RetrievalDealStream>>>,
    readers: Mutex<HashMap<ProviderDealIdentifier, (SelectorBlockReader, Arc<UnsealingLoader>)>>,
}

impl ProviderEnvironment {
    async fn stream(
        &self,
        id: ProviderDealIdentifier,
    ) -> Result<Arc<dyn RetrievalDealStream>> {
        self.streams
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| RetrievalError::UnknownDeal(id.to_string()))
    }
}

#[async_trait]
impl RetrievalProviderEnvironment for ProviderEnvironment {
    fn node(&self) -> &dyn RetrievalProviderNode {
        self.node.as_ref()
    }

    async fn check_deal_params(&self, params: &Params) -> Result<()> {
        let config = self.config.read().await;
        if params.price_per_byte < config.price_per_byte {
            return Err(RetrievalError::Params("Price per byte too low".to_string()));
        }
        if params.payment_interval > config.payment_interval {
            return Err(RetrievalError::Params(
                "Payment interval too large".to_string(),
            ));
        }
        if params.payment_interval_increase > config.payment_interval_increase {
            return Err(RetrievalError::Params(
                "Payment interval increase too large".to_string(),
            ));
        }
        Ok(())
    }

    async fn get_piece_size(&self, payload_cid: &Cid, piece_cid: Option<Cid>) -> Result<u64> {
        let piece = find_piece(self.piece_store.as_ref(), payload_cid, piece_cid)
            .await
            .map_err(|e| match e {
                StoreError::NotFound => RetrievalError::NotFound,
                other => RetrievalError::Piece(other.to_string()),
            })?;
        piece
            .deals
            .first()
            .map(|deal| deal.length)
            .ok_or(RetrievalError::NotFound)
    }

    async fn write_deal_response(
        &self,
        id: ProviderDealIdentifier,
        response: DealResponse,
    ) -> Result<()> {
        let stream = self.stream(id).await?;
        stream.write_deal_response(response).await
    }

    async fn read_deal_payment(&self, id: ProviderDealIdentifier) -> Result<DealPayment> {
        let stream = self.stream(id).await?;
        stream.read_deal_payment().await
    }

    async fn next_block(&self, id: ProviderDealIdentifier) -> Result<Option<Block>> {
        let mut readers = self.readers.lock().await;
        let (reader, loader) = readers
            .get_mut(&id)
            .ok_or_else(|| RetrievalError::UnknownDeal(id.to_string()))?;
        let loader = loader.clone();
        reader.next_block(loader.as_ref()).await
    }

    async fn close_stream(&self, id: ProviderDealIdentifier) -> Result<()> {
        self.readers.lock().await.remove(&id);
        let stream = { self.streams.write().await.remove(&id) };
        match stream {
            Some(stream) => stream.close().await,
            None => Ok(()),
        }
    }
}

/// The retrieval provider: answers queries and runs one state machine per
/// inbound deal.
pub struct RetrievalProvider {
    env: Arc<ProviderEnvironment>,
    group: StateGroup<ProviderDealFsm>,
    network: Arc<dyn RetrievalNetwork>,
}

impl RetrievalProvider {
    pub fn new(
        miner_address: Address,
        node: Arc<dyn RetrievalProviderNode>,
        network: Arc<dyn RetrievalNetwork>,
        piece_store: Arc<dyn PieceStore>,
        blockstore: Arc<dyn Blockstore>,
        config: RetrievalProviderConfig,
        store: Arc<dyn RecordStore>,
    ) -> Self {
        let env = Arc::new(ProviderEnvironment {
            miner_address,
            node,
            piece_store,
            blockstore,
            config: RwLock::new(config),
            streams: RwLock::new(HashMap::new()),
            readers: Mutex::new(HashMap::new()),
        });
        let group = StateGroup::new(
            env.clone() as Arc<dyn RetrievalProviderEnvironment>,
            store,
        );
        Self {
            env,
            group,
            network,
        }
    }

    /// Resume persisted deals and begin accepting streams.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        for deal in self.group.list().await? {
            let id = deal.identifier();
            if deal.status == DealStatus::Suspended {
                if let Err(e) = self.group.send(&id, ProviderEvent::DealResumed).await {
                    warn!(deal = %id, error = %e, "failed to resume deal");
                }
            }
        }
        self.network
            .set_delegate(self.clone() as Arc<dyn RetrievalReceiver>)
            .await
    }

    /// Suspend every active deal, stop the engine, unbind the network.
    pub async fn stop(&self, timeout: Duration) -> Result<()> {
        let streams: Vec<Arc<dyn RetrievalDealStream>> = {
            let mut streams = self.env.streams.write().await;
            streams.drain().map(|(_, stream)| stream).collect()
        };
        for stream in streams {
            if let Err(e) = stream.close().await {
                warn!(error = %e, "failed to close deal stream during stop");
            }
        }
        for deal in self.group.list().await? {
            let id = deal.identifier();
            if let Err(e) = self.group.send(&id, ProviderEvent::DealSuspended).await {
                warn!(deal = %id, error = %e, "failed to suspend deal");
            }
        }
        self.group.stop(timeout).await?;
        self.network.stop_handling_requests().await
    }

    /// Validate proposed deal terms against this provider's limits.
    pub async fn check_deal_params(&self, params: &Params) -> Result<()> {
        self.env.check_deal_params(params).await
    }

    pub async fn set_price_per_byte(&self, price: TokenAmount) {
        self.env.config.write().await.price_per_byte = price;
    }

    pub async fn set_payment_interval(&self, payment_interval: u64, increase: u64) {
        let mut config = self.env.config.write().await;
        config.payment_interval = payment_interval;
        config.payment_interval_increase = increase;
    }

    pub async fn get_deal(
        &self,
        id: ProviderDealIdentifier,
    ) -> Result<Option<ProviderDealState>> {
        self.group.get(&id).await.map_err(Into::into)
    }

    pub async fn list_deals(&self) -> Result<Vec<ProviderDealState>> {
        self.group.list().await.map_err(Into::into)
    }

    pub async fn subscribe_to_events<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&ProviderEvent, &ProviderDealState) + Send + Sync + 'static,
    {
        self.group.subscribe(callback).await
    }

    pub async fn unsubscribe(&self, subscription: SubscriptionId) {
        self.group.unsubscribe(subscription).await;
    }
}

#[async_trait]
impl RetrievalReceiver for RetrievalProvider {
    /// Answer a retrieval query: availability, size and current terms.
    async fn handle_query_stream(&self, stream: Arc<dyn RetrievalQueryStream>) {
        let query = match stream.read_query().await {
            Ok(query) => query,
            Err(e) => {
                error!(error = %e, "retrieval query: read failed");
                return;
            }
        };

        let config = self.env.config.read().await.clone();
        let mut answer = QueryResponse {
            status: QueryResponseStatus::Unavailable,
            piece_cid_found: QueryItemStatus::Unavailable,
            size: 0,
            payment_address: Address::from_bytes([0u8; 32]),
            min_price_per_byte: config.price_per_byte,
            max_payment_interval: config.payment_interval,
            max_payment_interval_increase: config.payment_interval_increase,
            message: String::new(),
        };

        let token = match self.env.node.get_chain_head().await {
            Ok(token) => token,
            Err(e) => {
                error!(error = %e, "retrieval query: get chain head failed");
                return;
            }
        };
        match self
            .env
            .node
            .get_miner_worker_address(self.env.miner_address, &token)
            .await
        {
            Err(e) => {
                error!(error = %e, "retrieval query: worker address lookup failed");
                answer.status = QueryResponseStatus::Error;
                answer.message = e.to_string();
            }
            Ok(payment_address) => {
                answer.payment_address = payment_address;
                match find_piece(
                    self.env.piece_store.as_ref(),
                    &query.payload_cid,
                    query.piece_cid,
                )
                .await
                {
                    Ok(piece) if !piece.deals.is_empty() => {
                        answer.status = QueryResponseStatus::Available;
                        answer.piece_cid_found = QueryItemStatus::Available;
                        answer.size = piece.deals[0].length;
                    }
                    Ok(_) | Err(StoreError::NotFound) => {}
                    Err(e) => {
                        error!(error = %e, "retrieval query: piece lookup failed");
                        answer.status = QueryResponseStatus::Error;
                        answer.message = e.to_string();
                    }
                }
            }
        }

        if let Err(e) = stream.write_query_response(answer).await {
            error!(error = %e, "retrieval query: write response failed");
        }
        let _ = stream.close().await;
    }

    /// Start a new inbound deal from its proposal.
    async fn handle_deal_stream(&self, stream: Arc<dyn RetrievalDealStream>) {
        let proposal = match stream.read_deal_proposal().await {
            Ok(proposal) => proposal,
            Err(e) => {
                warn!(error = %e, "failed to read retrieval deal proposal");
                let _ = stream.close().await;
                return;
            }
        };
        let deal = ProviderDealState::new(proposal, stream.receiver());
        let id = deal.identifier();
        info!(deal = %id, payload = %deal.proposal.payload_cid, "received retrieval deal proposal");

        let loader = Arc::new(UnsealingLoader::new(
            self.env.blockstore.clone(),
            self.env.piece_store.clone(),
            self.env.node.clone(),
            deal.proposal.payload_cid,
            deal.proposal.params.piece_cid,
        ));
        let reader = SelectorBlockReader::new(
            deal.proposal.payload_cid,
            deal.proposal.params.selector(),
        );

        self.env.streams.write().await.insert(id, stream.clone());
        self.env
            .readers
            .lock()
            .await
            .insert(id, (reader, loader));

        if let Err(e) = self.group.begin(deal).await {
            warn!(deal = %id, error = %e, "failed to begin retrieval deal");
            self.env.streams.write().await.remove(&id);
            self.env.readers.lock().await.remove(&id);
            let _ = stream.close().await;
        }
    }
}
