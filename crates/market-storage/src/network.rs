use crate::error::Result;
use crate::types::{Proposal, SignedResponse};
use async_trait::async_trait;
use market_types::PeerId;
use std::sync::Arc;

/// Duplex deal stream between a client and a storage provider.
///
/// A deal owns its stream until its terminal transition; reads park the
/// owning state machine until the counterparty writes.
#[async_trait]
pub trait StorageDealStream: Send + Sync {
    async fn read_deal_proposal(&self) -> Result<Proposal>;

    async fn write_deal_proposal(&self, proposal: Proposal) -> Result<()>;

    async fn read_deal_response(&self) -> Result<SignedResponse>;

    async fn write_deal_response(&self, response: SignedResponse) -> Result<()>;

    fn remote_peer(&self) -> PeerId;

    /// Mark the underlying connection as protected so the network layer
    /// does not garbage-collect it mid-deal.
    async fn tag_protected_connection(&self, tag: &str);

    async fn close(&self) -> Result<()>;
}

/// Inbound deal handler bound by a provider.
#[async_trait]
pub trait StorageReceiver: Send + Sync {
    async fn handle_deal_stream(&self, stream: Arc<dyn StorageDealStream>);
}

/// Network seam for the storage market.
#[async_trait]
pub trait StorageMarketNetwork: Send + Sync {
    async fn new_deal_stream(&self, peer: PeerId) -> Result<Arc<dyn StorageDealStream>>;

    async fn set_delegate(&self, receiver: Arc<dyn StorageReceiver>) -> Result<()>;

    async fn stop_handling_requests(&self) -> Result<()>;
}
