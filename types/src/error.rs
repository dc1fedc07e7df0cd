//! Top-level error type shared across crates.

use thiserror::Error;

/// Common error taxonomy for the veil wallet.
///
/// `Network` and bounded `ProtocolViolation` failures are retryable;
/// `Internal` failures are invariant violations and abandon the operation.
#[derive(Debug, Clone, Error)]
pub enum VeilError {
    #[error("network error: {0}")]
    Network(String),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("insufficient balance: need {needed}, have {available}")]
    InsufficientBalance { needed: String, available: String },

    #[error("invalid signature")]
    InvalidSignature,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal invariant violated: {0}")]
    Internal(String),
}

impl VeilError {
    /// Whether the retry scheduler should reschedule after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::ProtocolViolation(_) | Self::Storage(_)
        )
    }
}
