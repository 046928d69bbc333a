use thiserror::Error;

/// State machine engine errors
#[derive(Error, Debug, Clone)]
pub enum FsmError {
    /// No deal with the given identifier
    #[error("deal not found: {0}")]
    UnknownDeal(String),

    /// A deal with this identifier has already begun
    #[error("deal already exists: {0}")]
    DealExists(String),

    /// Event guard rejected the transition
    #[error("invalid transition: event {event} not applicable in state {state}")]
    InvalidTransition { event: String, state: String },

    /// The group is shutting down and refuses further work
    #[error("state group is shutting down")]
    ShuttingDown,

    /// Record store failure
    #[error("record store error: {0}")]
    Store(String),

    /// Record (de)serialization failure
    #[error("record codec error: {0}")]
    Codec(String),

    /// Persisted record written by an incompatible version
    #[error("unsupported record version {found}, expected {expected}")]
    UnsupportedVersion { found: u32, expected: u32 },
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, FsmError>;
