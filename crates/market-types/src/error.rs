use thiserror::Error;

/// Errors raised by the shared primitive types
#[derive(Error, Debug, Clone)]
pub enum MarketError {
    /// Wire frame malformed or truncated
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// Serialization failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Content-addressed block failed to parse
    #[error("invalid block: {0}")]
    InvalidBlock(String),

    /// Token arithmetic overflowed
    #[error("arithmetic overflow in payment accounting")]
    ArithmeticOverflow,
}

/// Result type for shared primitive operations
pub type Result<T> = std::result::Result<T, MarketError>;
