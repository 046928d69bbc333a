//! Scripted chain nodes for exercising deal machines without a chain.

use crate::error::{Result, StorageMarketError};
use crate::nodes::{StorageClientNode, StorageProviderNode};
use crate::types::{ClientDeal, ProviderDeal};
use async_trait::async_trait;
use market_types::{Address, ChainToken, Cid, ExitCode, Signature, TokenAmount};

/// Client node whose every answer is configured up front.
#[derive(Debug, Clone)]
pub struct FakeClientNode {
    pub add_funds_cid: Option<Cid>,
    pub ensure_funds_error: Option<String>,
    pub wait_for_message_exit_code: ExitCode,
    pub wait_for_message_error: Option<String>,
    pub verify_signature_fails: bool,
    pub validate_published_deal_id: u64,
    pub validate_published_error: Option<String>,
    pub deal_committed_error: Option<String>,
    pub deal_committed_async_error: Option<String>,
}

impl Default for FakeClientNode {
    fn default() -> Self {
        Self {
            add_funds_cid: None,
            ensure_funds_error: None,
            wait_for_message_exit_code: ExitCode::OK,
            wait_for_message_error: None,
            verify_signature_fails: false,
            validate_published_deal_id: 0,
            validate_published_error: None,
            deal_committed_error: None,
            deal_committed_async_error: None,
        }
    }
}

#[async_trait]
impl StorageClientNode for FakeClientNode {
    async fn get_chain_head(&self) -> Result<ChainToken> {
        Ok(ChainToken::genesis())
    }

    async fn ensure_funds(
        &self,
        _addr: Address,
        _amount: TokenAmount,
        _token: &ChainToken,
    ) -> Result<Option<Cid>> {
        if let Some(message) = &self.ensure_funds_error {
            return Err(StorageMarketError::Node(message.clone()));
        }
        Ok(self.add_funds_cid)
    }

    async fn wait_for_message(&self, _message_cid: &Cid) -> Result<ExitCode> {
        if let Some(message) = &self.wait_for_message_error {
            return Err(StorageMarketError::Node(message.clone()));
        }
        Ok(self.wait_for_message_exit_code)
    }

    async fn verify_signature(
        &self,
        _signature: &Signature,
        _signer: &Address,
        _data: &[u8],
    ) -> bool {
        !self.verify_signature_fails
    }

    async fn validate_published_deal(&self, _deal: &ClientDeal) -> Result<u64> {
        if let Some(message) = &self.validate_published_error {
            return Err(StorageMarketError::Node(message.clone()));
        }
        Ok(self.validate_published_deal_id)
    }

    async fn on_deal_sector_committed(&self, _provider: &Address, _deal_id: u64) -> Result<()> {
        if let Some(message) = &self.deal_committed_error {
            return Err(StorageMarketError::Node(message.clone()));
        }
        if let Some(message) = &self.deal_committed_async_error {
            // Fails only after the commitment watch has parked once.
            tokio::task::yield_now().await;
            return Err(StorageMarketError::Node(message.clone()));
        }
        Ok(())
    }
}

/// Provider node whose every answer is configured up front.
#[derive(Debug, Clone)]
pub struct FakeProviderNode {
    pub add_funds_cid: Option<Cid>,
    pub ensure_funds_error: Option<String>,
    pub wait_for_message_exit_code: ExitCode,
    pub verify_signature_fails: bool,
    pub publish_cid: Cid,
    pub publish_error: Option<String>,
    pub publish_deal_id: u64,
    pub wait_for_publish_error: Option<String>,
    pub on_deal_complete_error: Option<String>,
    pub sector_committed_error: Option<String>,
}

impl Default for FakeProviderNode {
    fn default() -> Self {
        Self {
            add_funds_cid: None,
            ensure_funds_error: None,
            wait_for_message_exit_code: ExitCode::OK,
            verify_signature_fails: false,
            publish_cid: Cid::dummy(1000),
            publish_error: None,
            publish_deal_id: 0,
            wait_for_publish_error: None,
            on_deal_complete_error: None,
            sector_committed_error: None,
        }
    }
}

#[async_trait]
impl StorageProviderNode for FakeProviderNode {
    async fn get_chain_head(&self) -> Result<ChainToken> {
        Ok(ChainToken::genesis())
    }

    async fn ensure_funds(
        &self,
        _addr: Address,
        _amount: TokenAmount,
        _token: &ChainToken,
    ) -> Result<Option<Cid>> {
        if let Some(message) = &self.ensure_funds_error {
            return Err(StorageMarketError::Node(message.clone()));
        }
        Ok(self.add_funds_cid)
    }

    async fn wait_for_message(&self, _message_cid: &Cid) -> Result<ExitCode> {
        Ok(self.wait_for_message_exit_code)
    }

    async fn verify_signature(
        &self,
        _signature: &Signature,
        _signer: &Address,
        _data: &[u8],
    ) -> bool {
        !self.verify_signature_fails
    }

    async fn sign_bytes(&self, _signer: &Address, data: &[u8]) -> Result<Signature> {
        Ok(Signature(blake3::hash(data).as_bytes().to_vec()))
    }

    async fn publish_deal(&self, _deal: &ProviderDeal) -> Result<Cid> {
        if let Some(message) = &self.publish_error {
            return Err(StorageMarketError::Node(message.clone()));
        }
        Ok(self.publish_cid)
    }

    async fn wait_for_publish(&self, _publish_cid: &Cid) -> Result<u64> {
        if let Some(message) = &self.wait_for_publish_error {
            return Err(StorageMarketError::Node(message.clone()));
        }
        Ok(self.publish_deal_id)
    }

    async fn on_deal_complete(&self, _deal: &ProviderDeal) -> Result<()> {
        if let Some(message) = &self.on_deal_complete_error {
            return Err(StorageMarketError::Node(message.clone()));
        }
        Ok(())
    }

    async fn on_deal_sector_committed(&self, _provider: &Address, _deal_id: u64) -> Result<()> {
        if let Some(message) = &self.sector_committed_error {
            return Err(StorageMarketError::Node(message.clone()));
        }
        Ok(())
    }
}
