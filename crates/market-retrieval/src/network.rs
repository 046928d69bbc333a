use crate::error::Result;
use crate::types::{DealPayment, DealProposal, DealResponse, Query, QueryResponse};
use async_trait::async_trait;
use market_types::PeerId;
use std::sync::Arc;

/// Short-lived stream carrying one query/response exchange.
#[async_trait]
pub trait RetrievalQueryStream: Send + Sync {
    async fn read_query(&self) -> Result<Query>;

    async fn write_query(&self, query: Query) -> Result<()>;

    async fn read_query_response(&self) -> Result<QueryResponse>;

    async fn write_query_response(&self, response: QueryResponse) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Duplex stream carrying one retrieval deal: proposal and payments one
/// way, responses with block batches the other.
#[async_trait]
pub trait RetrievalDealStream: Send + Sync {
    async fn read_deal_proposal(&self) -> Result<DealProposal>;

    async fn write_deal_proposal(&self, proposal: DealProposal) -> Result<()>;

    async fn read_deal_response(&self) -> Result<DealResponse>;

    async fn write_deal_response(&self, response: DealResponse) -> Result<()>;

    async fn read_deal_payment(&self) -> Result<DealPayment>;

    async fn write_deal_payment(&self, payment: DealPayment) -> Result<()>;

    fn receiver(&self) -> PeerId;

    async fn close(&self) -> Result<()>;
}

/// Inbound stream handlers bound by a provider.
#[async_trait]
pub trait RetrievalReceiver: Send + Sync {
    async fn handle_query_stream(&self, stream: Arc<dyn RetrievalQueryStream>);

    async fn handle_deal_stream(&self, stream: Arc<dyn RetrievalDealStream>);
}

/// Network seam for the retrieval market.
#[async_trait]
pub trait RetrievalNetwork: Send + Sync {
    async fn new_query_stream(&self, peer: PeerId) -> Result<Arc<dyn RetrievalQueryStream>>;

    async fn new_deal_stream(&self, peer: PeerId) -> Result<Arc<dyn RetrievalDealStream>>;

    async fn set_delegate(&self, receiver: Arc<dyn RetrievalReceiver>) -> Result<()>;

    async fn stop_handling_requests(&self) -> Result<()>;
}
