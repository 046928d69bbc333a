use crate::error::Result;
use crate::types::{ClientDeal, ProviderDeal};
use async_trait::async_trait;
use market_types::{Address, ChainToken, Cid, ExitCode, Signature, TokenAmount};

/// Chain-side capabilities the storage client consumes.
#[async_trait]
pub trait StorageClientNode: Send + Sync {
    async fn get_chain_head(&self) -> Result<ChainToken>;

    /// Escrow market funds for `addr`. Returns the cid of the funding
    /// message if one had to be sent, None when the balance already
    /// suffices.
    async fn ensure_funds(
        &self,
        addr: Address,
        amount: TokenAmount,
        token: &ChainToken,
    ) -> Result<Option<Cid>>;

    /// Wait for a message to land on chain and return its exit code.
    async fn wait_for_message(&self, message_cid: &Cid) -> Result<ExitCode>;

    async fn verify_signature(&self, signature: &Signature, signer: &Address, data: &[u8])
        -> bool;

    /// Check the provider's publish message and return the on-chain deal id
    /// it assigned.
    async fn validate_published_deal(&self, deal: &ClientDeal) -> Result<u64>;

    /// Resolve once the deal's sector is proven committed, or fail with the
    /// activation error.
    async fn on_deal_sector_committed(&self, provider: &Address, deal_id: u64) -> Result<()>;
}

/// Chain-side capabilities the storage provider consumes.
#[async_trait]
pub trait StorageProviderNode: Send + Sync {
    async fn get_chain_head(&self) -> Result<ChainToken>;

    async fn ensure_funds(
        &self,
        addr: Address,
        amount: TokenAmount,
        token: &ChainToken,
    ) -> Result<Option<Cid>>;

    async fn wait_for_message(&self, message_cid: &Cid) -> Result<ExitCode>;

    async fn verify_signature(&self, signature: &Signature, signer: &Address, data: &[u8])
        -> bool;

    async fn sign_bytes(&self, signer: &Address, data: &[u8]) -> Result<Signature>;

    /// Submit the deal for on-chain publication; returns the publish
    /// message cid.
    async fn publish_deal(&self, deal: &ProviderDeal) -> Result<Cid>;

    /// Wait for the publish message to land and return the deal id the
    /// chain assigned.
    async fn wait_for_publish(&self, publish_cid: &Cid) -> Result<u64>;

    /// Hand the verified piece off to the sealing subsystem.
    async fn on_deal_complete(&self, deal: &ProviderDeal) -> Result<()>;

    async fn on_deal_sector_committed(&self, provider: &Address, deal_id: u64) -> Result<()>;
}
