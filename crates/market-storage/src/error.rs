use market_fsm::FsmError;
use thiserror::Error;

/// Storage market error types
#[derive(Error, Debug, Clone)]
pub enum StorageMarketError {
    /// Deal stream or network failure
    #[error("{0}")]
    Stream(String),

    /// Network layer refused the operation
    #[error("network error: {0}")]
    Network(String),

    /// Chain node call failed; the underlying message is preserved
    /// verbatim because deal records surface it to users
    #[error("{0}")]
    Node(String),

    /// Deal not known to this market
    #[error("unknown deal: {0}")]
    UnknownDeal(String),

    /// Message (de)serialization failure
    #[error("codec error: {0}")]
    Codec(String),

    /// Received payload failed verification
    #[error("data verification error: {0}")]
    Data(String),

    /// State machine engine failure
    #[error(transparent)]
    Fsm(#[from] FsmError),
}

/// Result type for storage market operations
pub type Result<T> = std::result::Result<T, StorageMarketError>;
