use crate::error::Result;
use crate::types::SignedVoucher;
use async_trait::async_trait;
use market_types::{Address, ChainToken, TokenAmount};

/// Payment-channel capabilities the retrieval client consumes.
#[async_trait]
pub trait RetrievalClientNode: Send + Sync {
    /// Create the payment channel funding this retrieval, or add funds to
    /// an existing one. Resolves once the channel is usable.
    async fn get_or_create_payment_channel(
        &self,
        client_wallet: Address,
        miner_wallet: Address,
        funds_available: TokenAmount,
    ) -> Result<Address>;

    /// Allocate a fresh lane within the channel.
    async fn allocate_lane(&self, payment_channel: Address) -> Result<u64>;

    /// Create and sign a voucher for `amount` on the lane.
    async fn create_payment_voucher(
        &self,
        payment_channel: Address,
        amount: TokenAmount,
        lane: u64,
    ) -> Result<SignedVoucher>;
}

/// Chain-side capabilities the retrieval provider consumes.
#[async_trait]
pub trait RetrievalProviderNode: Send + Sync {
    async fn get_chain_head(&self) -> Result<ChainToken>;

    async fn get_miner_worker_address(
        &self,
        miner: Address,
        token: &ChainToken,
    ) -> Result<Address>;

    /// Unseal `length` bytes at `offset` of a sector, returning the raw
    /// archive bytes of the piece.
    async fn unseal_sector(&self, sector_id: u64, offset: u64, length: u64) -> Result<Vec<u8>>;

    /// Save a received voucher. The channel registry enforces at-most-once
    /// redemption per voucher; returns the amount actually added.
    async fn save_payment_voucher(
        &self,
        payment_channel: Address,
        voucher: &SignedVoucher,
        proof: &[u8],
        expected_amount: TokenAmount,
    ) -> Result<TokenAmount>;
}
