use chrono::Utc;
use market_types::{Address, Cid, Codec, PeerId, Signature, TokenAmount};
use serde::{Deserialize, Serialize};

/// Status vocabulary shared by both sides of a storage deal. The numeric
/// codes are wire- and persistence-stable; responses quote them in error
/// messages, so they never change meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageDealStatus {
    Unknown = 0,
    ProposalNotFound = 1,
    ProposalRejected = 2,
    ProposalAccepted = 3,
    Staged = 4,
    Sealing = 5,
    Active = 6,
    Failing = 7,
    NotFound = 8,
    FundsEnsured = 9,
    WaitingForDataRequest = 10,
    Validating = 11,
    Transferring = 12,
    WaitingForData = 13,
    VerifyData = 14,
    EnsureProviderFunds = 15,
    EnsureClientFunds = 16,
    ProviderFunding = 17,
    ClientFunding = 18,
    Publish = 19,
    Publishing = 20,
    Error = 21,
}

impl StorageDealStatus {
    pub fn code(&self) -> u64 {
        *self as u64
    }
}

/// How the payload moves from client to provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferType {
    /// Client pushes over a data-transfer channel.
    Graphsync,
    /// Out-of-band transfer; the client waits for the provider to confirm
    /// receipt on its own.
    Manual,
}

/// Reference to the raw payload a deal stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRef {
    pub transfer_type: TransferType,
    pub root: Cid,
}

/// Terms of a storage deal, agreed by client and provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealProposal {
    pub piece_cid: Cid,
    pub piece_size: u64,
    pub client: Address,
    pub provider: Address,
    pub start_epoch: u64,
    pub end_epoch: u64,
    pub storage_price_per_epoch: TokenAmount,
    pub provider_collateral: TokenAmount,
    pub client_collateral: TokenAmount,
}

impl DealProposal {
    pub fn duration_epochs(&self) -> u64 {
        self.end_epoch.saturating_sub(self.start_epoch)
    }

    /// Funds the client must escrow: storage price over the full duration
    /// plus its collateral. None on arithmetic overflow.
    pub fn client_funds_required(&self) -> Option<TokenAmount> {
        self.storage_price_per_epoch
            .checked_mul_u64(self.duration_epochs())?
            .checked_add(self.client_collateral)
    }

    /// Bytes signed by the client when proposing.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(self.piece_cid.as_bytes());
        bytes.extend_from_slice(&self.piece_size.to_le_bytes());
        bytes.extend_from_slice(self.client.as_bytes());
        bytes.extend_from_slice(self.provider.as_bytes());
        bytes.extend_from_slice(&self.start_epoch.to_le_bytes());
        bytes.extend_from_slice(&self.end_epoch.to_le_bytes());
        bytes.extend_from_slice(&self.storage_price_per_epoch.base_units().to_le_bytes());
        bytes.extend_from_slice(&self.provider_collateral.base_units().to_le_bytes());
        bytes.extend_from_slice(&self.client_collateral.base_units().to_le_bytes());
        bytes
    }
}

/// Proposal plus the client's signature over it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedProposal {
    pub proposal: DealProposal,
    pub client_signature: Signature,
}

impl SignedProposal {
    /// Content address of the signed proposal; the deal identifier on both
    /// sides of the protocol.
    pub fn proposal_cid(&self) -> Cid {
        let mut bytes = self.proposal.signing_bytes();
        bytes.extend_from_slice(&self.client_signature.0);
        Cid {
            codec: Codec::Raw,
            hash: *blake3::hash(&bytes).as_bytes(),
        }
    }
}

/// Wire message opening a deal: the signed proposal plus the payload
/// reference the provider should expect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub deal_proposal: SignedProposal,
    pub piece: DataRef,
}

/// Provider's answer on the deal stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub state: StorageDealStatus,
    /// Proposal the provider is responding to.
    pub proposal: Cid,
    pub message: String,
    pub publish_message: Option<Cid>,
}

impl Response {
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&self.state.code().to_le_bytes());
        bytes.extend_from_slice(self.proposal.as_bytes());
        bytes.extend_from_slice(self.message.as_bytes());
        if let Some(publish_message) = &self.publish_message {
            bytes.extend_from_slice(publish_message.as_bytes());
        }
        bytes
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedResponse {
    pub response: Response,
    pub signature: Signature,
}

/// Client-side deal record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientDeal {
    pub proposal_cid: Cid,
    pub proposal: SignedProposal,
    pub miner: PeerId,
    pub miner_worker: Address,
    pub data_ref: DataRef,
    pub state: StorageDealStatus,
    pub add_funds_cid: Option<Cid>,
    pub publish_message: Option<Cid>,
    pub deal_id: Option<u64>,
    pub message: String,
    /// Earlier failure causes displaced from `message` by later cleanup
    /// errors, oldest first.
    pub cause_chain: Vec<String>,
    pub connection_closed: bool,
    pub created_at: i64,
}

impl ClientDeal {
    pub fn new(
        proposal: SignedProposal,
        miner: PeerId,
        miner_worker: Address,
        data_ref: DataRef,
    ) -> Self {
        Self {
            proposal_cid: proposal.proposal_cid(),
            proposal,
            miner,
            miner_worker,
            data_ref,
            state: StorageDealStatus::EnsureClientFunds,
            add_funds_cid: None,
            publish_message: None,
            deal_id: None,
            message: String::new(),
            cause_chain: Vec::new(),
            connection_closed: false,
            created_at: Utc::now().timestamp(),
        }
    }
}

/// Provider-side deal record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderDeal {
    pub proposal_cid: Cid,
    pub proposal: SignedProposal,
    pub data_ref: DataRef,
    pub client: PeerId,
    pub state: StorageDealStatus,
    pub add_funds_cid: Option<Cid>,
    pub publish_cid: Option<Cid>,
    pub deal_id: Option<u64>,
    pub message: String,
    pub cause_chain: Vec<String>,
    pub connection_closed: bool,
    pub created_at: i64,
}

impl ProviderDeal {
    pub fn new(proposal: SignedProposal, data_ref: DataRef, client: PeerId) -> Self {
        Self {
            proposal_cid: proposal.proposal_cid(),
            proposal,
            data_ref,
            client,
            state: StorageDealStatus::Validating,
            add_funds_cid: None,
            publish_cid: None,
            deal_id: None,
            message: String::new(),
            cause_chain: Vec::new(),
            connection_closed: false,
            created_at: Utc::now().timestamp(),
        }
    }
}
