//! Ed25519 signing and verification over purpose frames.
//!
//! The wallet never signs raw messages: every signature covers a framed
//! statement built by `veil_types::purpose::PurposeBuilder`.

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use veil_types::{PrivateKey, PublicKey, Signature};

/// Sign a purpose frame with a private key.
pub fn sign_frame(frame: &[u8], private_key: &PrivateKey) -> Signature {
    let signing_key = SigningKey::from_bytes(&private_key.0);
    let sig = signing_key.sign(frame);
    Signature(sig.to_bytes())
}

/// Verify a signature over a purpose frame.
///
/// Returns `true` if the signature is valid, `false` otherwise,
/// including for undecodable public keys.
pub fn verify_frame(frame: &[u8], signature: &Signature, public_key: &PublicKey) -> bool {
    let Ok(verifying_key) = VerifyingKey::from_bytes(&public_key.0) else {
        return false;
    };
    let dalek_sig = ed25519_dalek::Signature::from_bytes(&signature.0);
    verifying_key.verify(frame, &dalek_sig).is_ok()
}
