use thiserror::Error;

/// Piece and block storage errors
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// The requested piece, payload or block is not known
    #[error("not found")]
    NotFound,

    /// A lookup failed for a reason other than absence
    #[error("{0}")]
    Lookup(String),

    /// A block's bytes do not match its content identifier
    #[error("block integrity violation: {0}")]
    InvalidBlock(String),

    /// DAG node or CAR bytes failed to parse
    #[error("codec error: {0}")]
    Codec(String),
}

/// Result type for piece and block storage operations
pub type Result<T> = std::result::Result<T, StoreError>;
