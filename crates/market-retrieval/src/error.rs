use market_fsm::FsmError;
use thiserror::Error;

/// Retrieval market error types
#[derive(Error, Debug, Clone)]
pub enum RetrievalError {
    /// Deal or query stream failure
    #[error("{0}")]
    Stream(String),

    /// Network layer refused the operation
    #[error("network error: {0}")]
    Network(String),

    /// Chain or payment node call failed; message preserved verbatim
    #[error("{0}")]
    Node(String),

    /// Deal parameters outside the provider's accepted range; the message
    /// is the user-visible rejection reason
    #[error("{0}")]
    Params(String),

    /// The requested payload or piece is not stored here
    #[error("not found")]
    NotFound,

    /// Piece store lookup failed
    #[error("{0}")]
    Piece(String),

    /// A delivered block failed traversal verification
    #[error("block verification failed: {0}")]
    BlockVerification(String),

    /// Deal not known to this market
    #[error("unknown deal: {0}")]
    UnknownDeal(String),

    /// Message (de)serialization failure
    #[error("codec error: {0}")]
    Codec(String),

    /// State machine engine failure
    #[error(transparent)]
    Fsm(#[from] FsmError),
}

/// Result type for retrieval market operations
pub type Result<T> = std::result::Result<T, RetrievalError>;
