//! X25519 transfer-secret derivation for the refresh protocol.
//!
//! A transfer key pair is an X25519 pair; the shared secret against the
//! melt coin's (converted) public key seeds the refresh planchets, which
//! is what lets the exchange re-derive the hidden sessions at reveal.

use x25519_dalek::{PublicKey as XPublicKey, StaticSecret};

use crate::error::CryptoError;
use crate::hash::blake2b_256;
use crate::keys::ed25519_public_to_x25519;
use veil_types::{PublicKey, SecretSeed};

/// Derive an X25519 key pair from a 32-byte seed (deterministic).
///
/// The returned public key is a Montgomery point wrapped in the common
/// 32-byte `PublicKey` type.
pub fn transfer_keypair_from_seed(seed: &SecretSeed) -> (SecretSeed, PublicKey) {
    let secret = StaticSecret::from(*seed.as_bytes());
    let public = XPublicKey::from(&secret);
    (seed.clone(), PublicKey(*public.as_bytes()))
}

/// Compute the transfer secret between a transfer private key and a coin
/// public key: `H(X25519(transfer_priv, montgomery(coin_pub)))`.
pub fn transfer_secret(
    transfer_priv: &SecretSeed,
    coin_pub: &PublicKey,
) -> Result<[u8; 32], CryptoError> {
    let mont = ed25519_public_to_x25519(coin_pub.as_bytes()).ok_or(CryptoError::InvalidPublicKey)?;
    let secret = StaticSecret::from(*transfer_priv.as_bytes());
    let shared = secret.diffie_hellman(&XPublicKey::from(mont));
    Ok(blake2b_256(shared.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::keypair_from_seed;

    #[test]
    fn transfer_secret_is_deterministic() {
        let coin = keypair_from_seed(&[9u8; 32]);
        let tseed = SecretSeed([5u8; 32]);
        let s1 = transfer_secret(&tseed, &coin.public).unwrap();
        let s2 = transfer_secret(&tseed, &coin.public).unwrap();
        assert_eq!(s1, s2);
        assert_ne!(s1, [0u8; 32]);
    }

    #[test]
    fn different_transfer_keys_different_secrets() {
        let coin = keypair_from_seed(&[9u8; 32]);
        let s1 = transfer_secret(&SecretSeed([1u8; 32]), &coin.public).unwrap();
        let s2 = transfer_secret(&SecretSeed([2u8; 32]), &coin.public).unwrap();
        assert_ne!(s1, s2);
    }

    #[test]
    fn invalid_coin_pub_rejected() {
        let r = transfer_secret(&SecretSeed([1u8; 32]), &PublicKey([0xFF; 32]));
        assert_eq!(r, Err(CryptoError::InvalidPublicKey));
    }

    #[test]
    fn keypair_from_seed_is_stable() {
        let (_, p1) = transfer_keypair_from_seed(&SecretSeed([3u8; 32]));
        let (_, p2) = transfer_keypair_from_seed(&SecretSeed([3u8; 32]));
        assert_eq!(p1, p2);
    }
}
