//! Storage deal protocol.
//!
//! A client escrows market funds, proposes a deal to a storage provider
//! over a deal stream, pushes the payload, and tracks the deal through
//! publish and sector commitment. The provider mirrors the flow: validate,
//! escrow collateral, receive data, verify, publish, hand off to sealing.
//! Both sides are per-deal state machines driven by the `market-fsm`
//! engine; everything external (chain node, network, data transfer) is a
//! trait seam.

pub mod client;
pub mod datatransfer;
pub mod error;
pub mod network;
pub mod nodes;
pub mod provider;
pub mod testnodes;
pub mod testutil;
pub mod types;

pub use client::{ClientDealEnvironment, ClientDealFsm, ClientEvent, StorageClient};
pub use datatransfer::{DataTransfer, TransferVoucher};
pub use error::{Result, StorageMarketError};
pub use network::{StorageDealStream, StorageMarketNetwork, StorageReceiver};
pub use nodes::{StorageClientNode, StorageProviderNode};
pub use provider::{
    ProviderDealEnvironment, ProviderDealFsm, ProviderEvent, StorageProvider,
    StorageProviderConfig,
};
pub use types::{
    ClientDeal, DataRef, DealProposal, Proposal, ProviderDeal, Response, SignedProposal,
    SignedResponse, StorageDealStatus, TransferType,
};
