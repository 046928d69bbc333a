use chrono::Utc;
use market_types::{Address, Cid, PeerId, Selector, Signature, TokenAmount};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Retrieval deal identifier, allocated locally by the client.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct DealId(pub u64);

impl fmt::Display for DealId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A provider keys deals by (client peer, deal id): two clients may pick
/// the same id independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderDealIdentifier {
    pub receiver: PeerId,
    pub deal_id: DealId,
}

impl fmt::Display for ProviderDealIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.receiver, self.deal_id)
    }
}

/// Economic and traversal terms of a retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Params {
    pub selector: Option<Selector>,
    pub piece_cid: Option<Cid>,
    pub price_per_byte: TokenAmount,
    pub payment_interval: u64,
    pub payment_interval_increase: u64,
}

impl Params {
    pub fn new_v0(
        price_per_byte: TokenAmount,
        payment_interval: u64,
        payment_interval_increase: u64,
    ) -> Self {
        Self {
            selector: None,
            piece_cid: None,
            price_per_byte,
            payment_interval,
            payment_interval_increase,
        }
    }

    pub fn new_v1(
        price_per_byte: TokenAmount,
        payment_interval: u64,
        payment_interval_increase: u64,
        selector: Selector,
        piece_cid: Option<Cid>,
    ) -> Self {
        Self {
            selector: Some(selector),
            piece_cid,
            price_per_byte,
            payment_interval,
            payment_interval_increase,
        }
    }

    /// Absent selector means "everything".
    pub fn selector(&self) -> Selector {
        self.selector.unwrap_or_default()
    }
}

/// Deal status vocabulary shared by client and provider machines and the
/// wire. Codes are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DealStatus {
    New = 0,
    AwaitingAcceptance = 1,
    Accepted = 2,
    Rejected = 3,
    DealNotFound = 4,
    Ongoing = 5,
    FundsNeeded = 6,
    FundsNeededLastPayment = 7,
    Finalizing = 8,
    Completed = 9,
    Failing = 10,
    Errored = 11,
    Suspended = 12,
    Unsealing = 13,
    BlocksComplete = 14,
}

impl DealStatus {
    pub fn code(&self) -> u64 {
        *self as u64
    }
}

/// Whether a queried item is retrievable from this provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryResponseStatus {
    Available,
    Unavailable,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryItemStatus {
    Available,
    Unavailable,
}

/// Ask a provider whether it can serve a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub payload_cid: Cid,
    pub piece_cid: Option<Cid>,
}

/// Optional constraints on a query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryParams {
    pub piece_cid: Option<Cid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub status: QueryResponseStatus,
    pub piece_cid_found: QueryItemStatus,
    pub size: u64,
    pub payment_address: Address,
    pub min_price_per_byte: TokenAmount,
    pub max_payment_interval: u64,
    pub max_payment_interval_increase: u64,
    pub message: String,
}

/// A provider a client can retrieve from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalPeer {
    pub address: Address,
    pub id: PeerId,
}

/// One content-addressed block on the wire: the cid prefix plus the raw
/// block bytes. The receiver recomputes and checks the hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub prefix: Vec<u8>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealProposal {
    pub payload_cid: Cid,
    pub id: DealId,
    pub params: Params,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealResponse {
    pub status: DealStatus,
    pub id: DealId,
    pub payment_owed: TokenAmount,
    pub message: String,
    pub blocks: Vec<Block>,
}

/// Signed payment-channel increment. Amounts are per-checkpoint deltas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedVoucher {
    pub channel: Address,
    pub lane: u64,
    pub nonce: u64,
    pub amount: TokenAmount,
    pub signature: Signature,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealPayment {
    pub id: DealId,
    pub payment_channel: Address,
    pub voucher: SignedVoucher,
}

/// Payment channel and lane funding a retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentInfo {
    pub payment_channel: Address,
    pub lane: u64,
}

/// Client-side retrieval deal record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientDealState {
    pub proposal: DealProposal,
    pub total_funds: TokenAmount,
    pub client_wallet: Address,
    pub miner_wallet: Address,
    pub sender: PeerId,
    pub payment_info: Option<PaymentInfo>,
    pub status: DealStatus,
    pub total_received: u64,
    pub bytes_paid_for: u64,
    pub current_interval: u64,
    pub paid_so_far: TokenAmount,
    pub message: String,
    pub created_at: i64,
}

impl ClientDealState {
    pub fn new(
        proposal: DealProposal,
        total_funds: TokenAmount,
        sender: PeerId,
        client_wallet: Address,
        miner_wallet: Address,
    ) -> Self {
        let current_interval = proposal.params.payment_interval;
        Self {
            proposal,
            total_funds,
            client_wallet,
            miner_wallet,
            sender,
            payment_info: None,
            status: DealStatus::New,
            total_received: 0,
            bytes_paid_for: 0,
            current_interval,
            paid_so_far: TokenAmount::ZERO,
            message: String::new(),
            created_at: Utc::now().timestamp(),
        }
    }

    pub fn id(&self) -> DealId {
        self.proposal.id
    }
}

/// Provider-side retrieval deal record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderDealState {
    pub proposal: DealProposal,
    pub receiver: PeerId,
    pub status: DealStatus,
    pub total_sent: u64,
    pub bytes_paid_for: u64,
    pub funds_received: TokenAmount,
    pub current_interval: u64,
    /// Amount requested at the live payment checkpoint.
    pub payment_owed: TokenAmount,
    /// Wire status reported if the deal fails.
    pub failure_status: DealStatus,
    /// Where to resume after a suspension.
    pub resume_status: Option<DealStatus>,
    pub message: String,
    pub created_at: i64,
}

impl ProviderDealState {
    pub fn new(proposal: DealProposal, receiver: PeerId) -> Self {
        let current_interval = proposal.params.payment_interval;
        Self {
            proposal,
            receiver,
            status: DealStatus::New,
            total_sent: 0,
            bytes_paid_for: 0,
            funds_received: TokenAmount::ZERO,
            current_interval,
            payment_owed: TokenAmount::ZERO,
            failure_status: DealStatus::Errored,
            resume_status: None,
            message: String::new(),
            created_at: Utc::now().timestamp(),
        }
    }

    pub fn identifier(&self) -> ProviderDealIdentifier {
        ProviderDealIdentifier {
            receiver: self.receiver,
            deal_id: self.proposal.id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_selector_defaults_to_everything() {
        let v0 = Params::new_v0(TokenAmount::from_base_units(2), 1 << 20, 1 << 20);
        assert_eq!(v0.selector(), Selector::All);

        let v1 = Params::new_v1(
            TokenAmount::from_base_units(2),
            1 << 20,
            1 << 20,
            Selector::First(1),
            None,
        );
        assert_eq!(v1.selector(), Selector::First(1));
    }

    #[test]
    fn test_new_deal_states_start_at_params_interval() {
        let proposal = DealProposal {
            payload_cid: Cid::dummy(1),
            id: DealId(0),
            params: Params::new_v0(TokenAmount::from_base_units(1000), 10_000, 1_000),
        };
        let client = ClientDealState::new(
            proposal.clone(),
            TokenAmount::from_base_units(1_000_000),
            PeerId::dummy(1),
            Address::dummy(1),
            Address::dummy(2),
        );
        assert_eq!(client.current_interval, 10_000);
        assert_eq!(client.status, DealStatus::New);

        let provider = ProviderDealState::new(proposal, PeerId::dummy(3));
        assert_eq!(provider.current_interval, 10_000);
        assert_eq!(
            provider.identifier().to_string(),
            format!("{}-0", PeerId::dummy(3))
        );
    }
}
