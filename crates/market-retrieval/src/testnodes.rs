//! Scripted payment-channel and chain nodes for retrieval tests.

use crate::error::{Result, RetrievalError};
use crate::nodes::{RetrievalClientNode, RetrievalProviderNode};
use crate::types::SignedVoucher;
use async_trait::async_trait;
use market_types::{Address, ChainToken, Signature, TokenAmount};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

/// Client node that hands out one configured channel and lane, and records
/// every channel, lane and voucher it creates.
pub struct TestRetrievalClientNode {
    payment_channel: Address,
    lane: u64,
    next_nonce: AtomicU64,
    created_channels: Mutex<Vec<(Address, Address, TokenAmount)>>,
    allocated_lanes: Mutex<Vec<Address>>,
    created_vouchers: Mutex<Vec<SignedVoucher>>,
}

impl TestRetrievalClientNode {
    pub fn new(payment_channel: Address, lane: u64) -> Self {
        Self {
            payment_channel,
            lane,
            next_nonce: AtomicU64::new(1),
            created_channels: Mutex::new(Vec::new()),
            allocated_lanes: Mutex::new(Vec::new()),
            created_vouchers: Mutex::new(Vec::new()),
        }
    }

    pub async fn created_channels(&self) -> Vec<(Address, Address, TokenAmount)> {
        self.created_channels.lock().await.clone()
    }

    pub async fn allocated_lanes(&self) -> Vec<Address> {
        self.allocated_lanes.lock().await.clone()
    }

    pub async fn created_vouchers(&self) -> Vec<SignedVoucher> {
        self.created_vouchers.lock().await.clone()
    }
}

#[async_trait]
impl RetrievalClientNode for TestRetrievalClientNode {
    async fn get_or_create_payment_channel(
        &self,
        client_wallet: Address,
        miner_wallet: Address,
        funds_available: TokenAmount,
    ) -> Result<Address> {
        self.created_channels
            .lock()
            .await
            .push((client_wallet, miner_wallet, funds_available));
        Ok(self.payment_channel)
    }

    async fn allocate_lane(&self, payment_channel: Address) -> Result<u64> {
        self.allocated_lanes.lock().await.push(payment_channel);
        Ok(self.lane)
    }

    async fn create_payment_voucher(
        &self,
        payment_channel: Address,
        amount: TokenAmount,
        lane: u64,
    ) -> Result<SignedVoucher> {
        let nonce = self.next_nonce.fetch_add(1, Ordering::SeqCst);
        let voucher = SignedVoucher {
            channel: payment_channel,
            lane,
            nonce,
            amount,
            signature: Signature::dummy(nonce),
        };
        self.created_vouchers.lock().await.push(voucher.clone());
        Ok(voucher)
    }
}

struct ExpectedVoucher {
    redeemed: bool,
}

/// Provider node with expectation registries for vouchers and unseals.
/// Voucher redemption is at-most-once per (channel, amount), mirroring the
/// payment-channel registry.
pub struct TestRetrievalProviderNode {
    worker_address: Address,
    expected_vouchers: Mutex<HashMap<(Address, u128), ExpectedVoucher>>,
    received_vouchers: Mutex<Vec<SignedVoucher>>,
    expected_unseals: Mutex<HashMap<(u64, u64, u64), Vec<u8>>>,
    unseal_calls: Mutex<Vec<(u64, u64, u64)>>,
}

impl TestRetrievalProviderNode {
    pub fn new(worker_address: Address) -> Self {
        Self {
            worker_address,
            expected_vouchers: Mutex::new(HashMap::new()),
            received_vouchers: Mutex::new(Vec::new()),
            expected_unseals: Mutex::new(HashMap::new()),
            unseal_calls: Mutex::new(Vec::new()),
        }
    }

    /// Expect a voucher of exactly `amount` on `channel`.
    pub async fn expect_voucher(&self, channel: Address, amount: TokenAmount) {
        self.expected_vouchers
            .lock()
            .await
            .insert((channel, amount.base_units()), ExpectedVoucher {
                redeemed: false,
            });
    }

    /// Stage unseal output for a sector range.
    pub async fn expect_unseal(&self, sector_id: u64, offset: u64, length: u64, data: Vec<u8>) {
        self.expected_unseals
            .lock()
            .await
            .insert((sector_id, offset, length), data);
    }

    pub async fn received_vouchers(&self) -> Vec<SignedVoucher> {
        self.received_vouchers.lock().await.clone()
    }

    pub async fn unseal_calls(&self) -> Vec<(u64, u64, u64)> {
        self.unseal_calls.lock().await.clone()
    }

    /// Count of expected vouchers that never arrived.
    pub async fn unredeemed_vouchers(&self) -> usize {
        self.expected_vouchers
            .lock()
            .await
            .values()
            .filter(|expected| !expected.redeemed)
            .count()
    }
}

#[async_trait]
impl RetrievalProviderNode for TestRetrievalProviderNode {
    async fn get_chain_head(&self) -> Result<ChainToken> {
        Ok(ChainToken::genesis())
    }

    async fn get_miner_worker_address(
        &self,
        _miner: Address,
        _token: &ChainToken,
    ) -> Result<Address> {
        Ok(self.worker_address)
    }

    async fn unseal_sector(&self, sector_id: u64, offset: u64, length: u64) -> Result<Vec<u8>> {
        self.unseal_calls
            .lock()
            .await
            .push((sector_id, offset, length));
        self.expected_unseals
            .lock()
            .await
            .get(&(sector_id, offset, length))
            .cloned()
            .ok_or_else(|| {
                RetrievalError::Node(format!(
                    "no unseal data staged for sector {} offset {} length {}",
                    sector_id, offset, length
                ))
            })
    }

    async fn save_payment_voucher(
        &self,
        payment_channel: Address,
        voucher: &SignedVoucher,
        _proof: &[u8],
        _expected_amount: TokenAmount,
    ) -> Result<TokenAmount> {
        let mut expected = self.expected_vouchers.lock().await;
        let entry = expected
            .get_mut(&(payment_channel, voucher.amount.base_units()))
            .ok_or_else(|| {
                RetrievalError::Node(format!(
                    "unexpected voucher for {} on channel {}",
                    voucher.amount, payment_channel
                ))
            })?;
        if entry.redeemed {
            return Err(RetrievalError::Node(format!(
                "voucher for {} already redeemed",
                voucher.amount
            )));
        }
        entry.redeemed = true;
        self.received_vouchers.lock().await.push(voucher.clone());
        Ok(voucher.amount)
    }
}
