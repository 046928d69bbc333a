//! Shared primitives for the file-market protocol stack.
//!
//! Every other crate in the workspace builds on these types: content
//! identifiers, peer and account addresses, token amounts, traversal
//! selectors, and the length-prefixed wire framing used by both deal
//! protocols.

pub mod amount;
pub mod cid;
pub mod error;
pub mod frame;
pub mod ident;
pub mod selector;

pub use amount::TokenAmount;
pub use cid::{Cid, Codec};
pub use error::{MarketError, Result};
pub use frame::{decode_frame, encode_frame};
pub use ident::{Address, ChainToken, ExitCode, PeerId, Signature};
pub use selector::Selector;

/// Charge per byte retrieved if the provider does not set one explicitly.
pub const DEFAULT_PRICE_PER_BYTE: TokenAmount = TokenAmount::from_base_units(2);

/// Baseline payment interval (1 MiB) if the provider does not set one.
pub const DEFAULT_PAYMENT_INTERVAL: u64 = 1 << 20;

/// Amount the interval grows on each payment (1 MiB) by default.
pub const DEFAULT_PAYMENT_INTERVAL_INCREASE: u64 = 1 << 20;
