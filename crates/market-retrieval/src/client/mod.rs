//! Client side of the retrieval deal protocol.

pub mod events;
pub mod states;

pub use events::ClientEvent;

use crate::blockio::TraversalVerifier;
use crate::error::{Result, RetrievalError};
use crate::network::{RetrievalDealStream, RetrievalNetwork};
use crate::nodes::RetrievalClientNode;
use crate::types::{
    Block, ClientDealState, DealId, DealPayment, DealProposal, DealResponse, DealStatus, Params,
    Query, QueryParams, QueryResponse, RetrievalPeer,
};
use async_trait::async_trait;
use market_fsm::{Context, DealSpec, RecordStore, StateGroup, SubscriptionId};
use market_piecestore::Blockstore;
use market_types::{Address, Cid, PeerId, TokenAmount};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::info;

/// Capabilities the client deal machine consumes.
#[async_trait]
pub trait RetrievalClientEnvironment: Send + Sync {
    fn node(&self) -> &dyn RetrievalClientNode;

    async fn write_deal_proposal(&self, deal_id: DealId, proposal: DealProposal) -> Result<()>;

    async fn read_deal_response(&self, deal_id: DealId) -> Result<DealResponse>;

    async fn write_deal_payment(&self, deal_id: DealId, payment: DealPayment) -> Result<()>;

    /// Verify a block batch against the deal's traversal and store it.
    /// Returns the on-wire payload bytes accepted.
    async fn ingest_blocks(&self, deal_id: DealId, blocks: &[Block]) -> Result<u64>;

    async fn close_stream(&self, deal_id: DealId) -> Result<()>;
}

/// Machine description for client-side retrieval deals.
pub struct ClientDealFsm;

#[async_trait]
impl DealSpec for ClientDealFsm {
    type Id = DealId;
    type Record = ClientDealState;
    type Event = ClientEvent;
    type Environment = dyn RetrievalClientEnvironment;

    const VERSION: u32 = 1;

    fn id(record: &ClientDealState) -> DealId {
        record.id()
    }

    fn status_code(record: &ClientDealState) -> u64 {
        record.status.code()
    }

    fn is_terminal(record: &ClientDealState) -> bool {
        matches!(record.status, DealStatus::Completed | DealStatus::Errored)
    }

    fn apply(record: &mut ClientDealState, event: &ClientEvent) -> market_fsm::Result<()> {
        events::apply(record, event)
    }

    async fn enter(env: Arc<Self::Environment>, ctx: Context<Self>, deal: ClientDealState) {
        use DealStatus as S;
        match deal.status {
            S::New => states::propose_deal(env.as_ref(), &ctx, &deal).await,
            S::AwaitingAcceptance => states::await_acceptance(env.as_ref(), &ctx, &deal).await,
            S::Accepted => states::setup_payment_channel(env.as_ref(), &ctx, &deal).await,
            S::Ongoing => states::receive_blocks(env.as_ref(), &ctx, &deal).await,
            S::FundsNeeded | S::FundsNeededLastPayment => {
                states::send_funds(env.as_ref(), &ctx, &deal).await
            }
            S::Finalizing => states::finalize_deal(env.as_ref(), &ctx, &deal).await,
            S::Completed => states::complete_deal(env.as_ref(), &ctx, &deal).await,
            S::Failing => states::fail_deal(env.as_ref(), &ctx, &deal).await,
            _ => {}
        }
    }
}

struct ClientEnvironment {
    node: Arc<dyn RetrievalClientNode>,
    blockstore: Arc<dyn Blockstore>,
    streams: RwLock<HashMap<DealId, Arc<dyn RetrievalDealStream>>>,
    verifiers: Mutex<HashMap<DealId, TraversalVerifier>>,
}

impl ClientEnvironment {
    async fn stream(&self, deal_id: DealId) -> Result<Arc<dyn RetrievalDealStream>> {
        self.streams
            .read()
            .await
            .get(&deal_id)
            .cloned()
            .ok_or_else(|| RetrievalError::UnknownDeal(deal_id.to_string()))
    }
}

#[async_trait]
impl RetrievalClientEnvironment for ClientEnvironment {
    fn node(&self) -> &dyn RetrievalClientNode {
        self.node.as_ref()
    }

    async fn write_deal_proposal(&self, deal_id: DealId, proposal: DealProposal) -> Result<()> {
        let stream = self.stream(deal_id).await?;
        stream.write_deal_proposal(proposal).await
    }

    async fn read_deal_response(&self, deal_id: DealId) -> Result<DealResponse> {
        let stream = self.stream(deal_id).await?;
        stream.read_deal_response().await
    }

    async fn write_deal_payment(&self, deal_id: DealId, payment: DealPayment) -> Result<()> {
        let stream = self.stream(deal_id).await?;
        stream.write_deal_payment(payment).await
    }

    async fn ingest_blocks(&self, deal_id: DealId, blocks: &[Block]) -> Result<u64> {
        let mut verifiers = self.verifiers.lock().await;
        let verifier = verifiers
            .get_mut(&deal_id)
            .ok_or_else(|| RetrievalError::UnknownDeal(deal_id.to_string()))?;
        let mut bytes_added = 0u64;
        for block in blocks {
            bytes_added += verifier.ingest(self.blockstore.as_ref(), block).await?;
        }
        Ok(bytes_added)
    }

    async fn close_stream(&self, deal_id: DealId) -> Result<()> {
        self.verifiers.lock().await.remove(&deal_id);
        let stream = { self.streams.write().await.remove(&deal_id) };
        match stream {
            Some(stream) => stream.close().await,
            None => Ok(()),
        }
    }
}

/// The retrieval client: queries providers and runs one state machine per
/// paid retrieval.
pub struct RetrievalClient {
    env: Arc<ClientEnvironment>,
    group: StateGroup<ClientDealFsm>,
    network: Arc<dyn RetrievalNetwork>,
    next_deal_id: AtomicU64,
}

impl RetrievalClient {
    /// Build a client over its collaborators. Reads the record store to
    /// seed the deal-id counter past every persisted deal.
    pub async fn new(
        network: Arc<dyn RetrievalNetwork>,
        blockstore: Arc<dyn Blockstore>,
        node: Arc<dyn RetrievalClientNode>,
        store: Arc<dyn RecordStore>,
    ) -> Result<Self> {
        let env = Arc::new(ClientEnvironment {
            node,
            blockstore,
            streams: RwLock::new(HashMap::new()),
            verifiers: Mutex::new(HashMap::new()),
        });
        let group = StateGroup::new(
            env.clone() as Arc<dyn RetrievalClientEnvironment>,
            store,
        );
        let next = group
            .list()
            .await?
            .iter()
            .map(|deal| ClientDealFsm::id(deal).0 + 1)
            .max()
            .unwrap_or(0);
        Ok(Self {
            env,
            group,
            network,
            next_deal_id: AtomicU64::new(next),
        })
    }

    /// Ask a provider whether it can serve a payload and at what price.
    pub async fn query(
        &self,
        peer: RetrievalPeer,
        payload_cid: Cid,
        params: QueryParams,
    ) -> Result<QueryResponse> {
        let stream = self.network.new_query_stream(peer.id).await?;
        stream
            .write_query(Query {
                payload_cid,
                piece_cid: params.piece_cid,
            })
            .await?;
        let response = stream.read_query_response().await?;
        let _ = stream.close().await;
        Ok(response)
    }

    /// Start a paid retrieval; returns the local deal id.
    pub async fn retrieve(
        &self,
        payload_cid: Cid,
        params: Params,
        total_funds: TokenAmount,
        miner_peer: PeerId,
        client_wallet: Address,
        miner_wallet: Address,
    ) -> Result<DealId> {
        let deal_id = DealId(self.next_deal_id.fetch_add(1, Ordering::SeqCst));
        info!(deal = %deal_id, payload = %payload_cid, miner = %miner_peer, "starting retrieval deal");

        let stream = self.network.new_deal_stream(miner_peer).await?;
        let proposal = DealProposal {
            payload_cid,
            id: deal_id,
            params,
        };
        self.env.streams.write().await.insert(deal_id, stream);
        self.env
            .verifiers
            .lock()
            .await
            .insert(deal_id, TraversalVerifier::new(payload_cid, params.selector()));

        let deal = ClientDealState::new(
            proposal,
            total_funds,
            miner_peer,
            client_wallet,
            miner_wallet,
        );
        self.group.begin(deal).await?;
        Ok(deal_id)
    }

    pub async fn get_deal(&self, deal_id: DealId) -> Result<Option<ClientDealState>> {
        self.group.get(&deal_id).await.map_err(Into::into)
    }

    pub async fn list_deals(&self) -> Result<Vec<ClientDealState>> {
        self.group.list().await.map_err(Into::into)
    }

    pub fn is_terminated(&self, deal: &ClientDealState) -> bool {
        self.group.is_terminated(deal)
    }

    pub async fn subscribe_to_events<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&ClientEvent, &ClientDealState) + Send + Sync + 'static,
    {
        self.group.subscribe(callback).await
    }

    pub async fn unsubscribe(&self, subscription: SubscriptionId) {
        self.group.unsubscribe(subscription).await;
    }

    /// Rehydrate persisted deals; entry functions are idempotent, so each
    /// non-terminal deal re-enters its current state once.
    pub async fn restart(&self) -> Result<()> {
        self.group.restart().await.map_err(Into::into)
    }

    pub async fn stop(&self, timeout: Duration) -> Result<()> {
        self.group.stop(timeout).await.map_err(Into::into)
    }
}
