//! Blake2b hashing for coin keys, envelopes and session commitments.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use veil_types::{HashCode, PublicKey};

type Blake2b256 = Blake2b<U32>;

/// Compute a 256-bit Blake2b hash of arbitrary data.
pub fn blake2b_256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Blake2b256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

/// Hash multiple byte slices in sequence (avoids concatenation allocation).
///
/// The refresh session commitment feeds dozens of parts through this in a
/// strict protocol-defined order.
pub fn blake2b_256_multi(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Blake2b256::new();
    for part in parts {
        hasher.update(part);
    }
    let result = hasher.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

/// Hash a coin public key; this is the value that gets blinded.
pub fn hash_coin_pub(coin_pub: &PublicKey) -> HashCode {
    HashCode::new(blake2b_256(coin_pub.as_bytes()))
}

/// Hash a denomination public key to its stored identifier.
pub fn hash_denom_pub(denom_pub: &[u8]) -> HashCode {
    HashCode::new(blake2b_256(denom_pub))
}

/// Hash a blinded coin envelope.
pub fn hash_coin_ev(coin_ev: &[u8]) -> HashCode {
    HashCode::new(blake2b_256(coin_ev))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blake2b_deterministic() {
        let h1 = blake2b_256(b"veil");
        let h2 = blake2b_256(b"veil");
        assert_eq!(h1, h2);
    }

    #[test]
    fn blake2b_different_inputs() {
        assert_ne!(blake2b_256(b"hello"), blake2b_256(b"world"));
    }

    #[test]
    fn blake2b_multi_equivalent() {
        let single = blake2b_256(b"helloworld");
        let multi = blake2b_256_multi(&[b"hello", b"world"]);
        assert_eq!(single, multi);
    }

    #[test]
    fn coin_pub_hash_nonzero() {
        let h = hash_coin_pub(&PublicKey([7u8; 32]));
        assert!(!h.is_zero());
    }
}
