//! Error types for medfed

use thiserror::Error;

/// Result type for medfed operations
pub type Result<T> = std::result::Result<T, FedError>;

/// medfed error types
///
/// Per-participant failures (`BudgetExceeded`, `DispatchTimeout`,
/// `DispatchError`) are absorbed inside a round and only surface in the
/// round's bookkeeping. Round-level failures (`NoValidUpdates`,
/// `AggregationFailed`) are returned to the caller of a round without
/// touching the committed model.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FedError {
    #[error("Participant already registered: {0}")]
    DuplicateParticipant(String),

    #[error("Participant not found: {0}")]
    ParticipantNotFound(String),

    #[error("Model already exists: {0}")]
    DuplicateModel(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Privacy budget exceeded for {participant}: spent {spent} + cost {cost} > total {total}")]
    BudgetExceeded {
        participant: String,
        spent: f64,
        cost: f64,
        total: f64,
    },

    #[error("Shape mismatch in layer '{layer}': expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        layer: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("No valid updates to aggregate")]
    NoValidUpdates,

    #[error("Aggregation failed: {0}")]
    AggregationFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionError(String),

    #[error("Dispatch to participant {0} timed out")]
    DispatchTimeout(String),

    #[error("Dispatch to participant {participant} failed: {reason}")]
    DispatchError { participant: String, reason: String },

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
}

impl<T> From<std::sync::PoisonError<T>> for FedError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        FedError::LockPoisoned(err.to_string())
    }
}

impl From<serde_json::Error> for FedError {
    fn from(err: serde_json::Error) -> Self {
        FedError::SerializationError(err.to_string())
    }
}
