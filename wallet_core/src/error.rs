use thiserror::Error;

/// Wallet error taxonomy. Clonable so concurrent triggers sharing one
/// in-flight operation all observe the same failure.
#[derive(Clone, Debug, Error)]
pub enum WalletError {
    /// Transport or HTTP failure. Always retryable.
    #[error("network error: {0}")]
    Network(String),

    /// The exchange answered, but the response fails schema or semantic
    /// checks. Retryable a bounded number of times.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Not enough spendable coins. A first-class result of coin
    /// selection, not a fault.
    #[error("insufficient balance: need {needed}, have {available}")]
    InsufficientBalance { needed: String, available: String },

    /// A signature that must verify did not.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    /// Invariant violation. Never retried; the operation is abandoned.
    #[error("internal error: {0}")]
    Internal(String),
}

impl WalletError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WalletError::Network(_) | WalletError::ProtocolViolation(_) | WalletError::Storage(_)
        )
    }
}

impl From<veil_store::StoreError> for WalletError {
    fn from(e: veil_store::StoreError) -> Self {
        WalletError::Storage(e.to_string())
    }
}

impl From<veil_crypto::CryptoError> for WalletError {
    fn from(e: veil_crypto::CryptoError) -> Self {
        WalletError::Crypto(e.to_string())
    }
}
