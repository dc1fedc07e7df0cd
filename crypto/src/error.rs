use thiserror::Error;

/// Failures of the cryptographic facade.
///
/// `InvalidDenominationKey` maps to a protocol violation at the wallet
/// layer: the exchange handed us a key we cannot decode.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("denomination public key cannot be decoded")]
    InvalidDenominationKey,

    #[error("blinded envelope cannot be decoded")]
    InvalidEnvelope,

    #[error("blind signature cannot be decoded")]
    InvalidBlindSignature,

    #[error("blinding seed produces an invalid scalar")]
    InvalidBlindingSeed,

    #[error("public key cannot be decoded")]
    InvalidPublicKey,

    #[error("refresh session inputs are inconsistent: {0}")]
    InconsistentRefresh(String),
}
