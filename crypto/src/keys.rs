//! Ed25519 key generation and Edwards-to-Montgomery conversion.

use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use rand::RngCore;
use veil_types::{KeyPair, PrivateKey, PublicKey, SecretSeed};

/// Generate a new Ed25519 key pair from a secure random source.
pub fn generate_keypair() -> KeyPair {
    let signing_key = SigningKey::generate(&mut OsRng);
    let verifying_key = signing_key.verifying_key();
    KeyPair {
        public: PublicKey(verifying_key.to_bytes()),
        private: PrivateKey(signing_key.to_bytes()),
    }
}

/// Generate 32 bytes of fresh secret seed material.
pub fn generate_seed() -> SecretSeed {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    SecretSeed(bytes)
}

/// Derive the public key from a private key.
pub fn public_from_private(private: &PrivateKey) -> PublicKey {
    let signing_key = SigningKey::from_bytes(&private.0);
    PublicKey(signing_key.verifying_key().to_bytes())
}

/// Derive a key pair from a 32-byte seed (deterministic).
///
/// Coin and planchet keys are derived this way so that a withdrawal or
/// refresh can be replayed from its stored seeds.
pub fn keypair_from_seed(seed: &[u8; 32]) -> KeyPair {
    let signing_key = SigningKey::from_bytes(seed);
    KeyPair {
        public: PublicKey(signing_key.verifying_key().to_bytes()),
        private: PrivateKey(signing_key.to_bytes()),
    }
}

/// Convert an Ed25519 public key to its X25519 (Montgomery) equivalent.
///
/// Uses the birational map from Edwards to Montgomery form. This is how
/// the refresh protocol computes an ECDH secret against a coin key.
/// Returns `None` if the public key bytes are invalid.
pub fn ed25519_public_to_x25519(ed25519_public: &[u8; 32]) -> Option<[u8; 32]> {
    let verifying_key = ed25519_dalek::VerifyingKey::from_bytes(ed25519_public).ok()?;
    Some(verifying_key.to_montgomery().to_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_produces_valid_keypair() {
        let kp = generate_keypair();
        assert_ne!(kp.public.0, [0u8; 32]);
        assert_ne!(kp.private.0, [0u8; 32]);
    }

    #[test]
    fn keypair_from_seed_deterministic() {
        let seed = [42u8; 32];
        let kp1 = keypair_from_seed(&seed);
        let kp2 = keypair_from_seed(&seed);
        assert_eq!(kp1.public.0, kp2.public.0);
        assert_eq!(kp1.private.0, kp2.private.0);
    }

    #[test]
    fn different_seeds_produce_different_keys() {
        let kp1 = keypair_from_seed(&[1u8; 32]);
        let kp2 = keypair_from_seed(&[2u8; 32]);
        assert_ne!(kp1.public.0, kp2.public.0);
    }

    #[test]
    fn ed25519_to_x25519_matches_scalar_mult() {
        let kp = generate_keypair();
        let mont = ed25519_public_to_x25519(&kp.public.0).unwrap();
        assert_ne!(mont, [0u8; 32]);
        // Deterministic
        assert_eq!(mont, ed25519_public_to_x25519(&kp.public.0).unwrap());
    }

    #[test]
    fn invalid_public_key_conversion_fails() {
        assert!(ed25519_public_to_x25519(&[0xFF; 32]).is_none());
    }
}
