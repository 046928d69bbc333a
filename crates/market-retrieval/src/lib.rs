//! Retrieval deal protocol.
//!
//! A client queries a provider for a payload, negotiates terms, and pays
//! for block delivery incrementally with off-chain payment-channel
//! vouchers. The provider streams blocks from its store (unsealing sectors
//! on demand) and pauses at payment checkpoints until a voucher covers the
//! bytes sent. Both sides are per-deal state machines driven by the
//! `market-fsm` engine.

pub mod blockio;
pub mod client;
pub mod error;
pub mod network;
pub mod nodes;
pub mod provider;
pub mod testnodes;
pub mod testutil;
pub mod types;
pub mod unsealing;

pub use blockio::{BlockLoader, SelectorBlockReader, TraversalVerifier};
pub use client::{ClientDealFsm, ClientEvent, RetrievalClient, RetrievalClientEnvironment};
pub use error::{Result, RetrievalError};
pub use network::{
    RetrievalDealStream, RetrievalNetwork, RetrievalQueryStream, RetrievalReceiver,
};
pub use nodes::{RetrievalClientNode, RetrievalProviderNode};
pub use provider::{
    ProviderDealFsm, ProviderEvent, RetrievalProvider, RetrievalProviderConfig,
    RetrievalProviderEnvironment,
};
pub use types::{
    Block, ClientDealState, DealId, DealPayment, DealProposal, DealResponse, DealStatus, Params,
    PaymentInfo, ProviderDealIdentifier, ProviderDealState, Query, QueryItemStatus, QueryParams,
    QueryResponse, QueryResponseStatus, RetrievalPeer, SignedVoucher,
};
pub use unsealing::UnsealingLoader;
