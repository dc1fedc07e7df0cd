//! Blinded BLS signatures over BLS12-381.
//!
//! Denomination keys are G1 points (48 bytes compressed), signatures live
//! in G2 (96 bytes compressed). Blinding multiplies the hashed-to-G2
//! message by a blinding scalar; the issuer signs the blinded point
//! without seeing the message; unblinding multiplies the issued point by
//! the scalar's inverse, yielding an ordinary BLS signature over the
//! message.
//!
//! Blinding scalars derive from 32-byte seeds so planchets are
//! reproducible from stored seed material.

use blst::min_pk::{PublicKey as BlsPublicKey, SecretKey as BlsSecretKey, Signature as BlsSignature};
use blst::{blst_p2, blst_p2_affine, blst_scalar, BLST_ERROR};

use crate::error::CryptoError;
use veil_types::SecretSeed;

/// Domain separation tag for denomination signatures.
const DENOM_SIG_DST: &[u8] = b"VEIL-V1-DENOMINATION-SIG";

/// Compressed G2 point length (envelopes and signatures).
pub const ENVELOPE_LEN: usize = 96;

/// Compressed G1 point length (denomination public keys).
pub const DENOM_PUB_LEN: usize = 48;

/// Derive a valid field scalar from a 32-byte seed.
fn blinding_scalar(seed: &SecretSeed) -> Result<blst_scalar, CryptoError> {
    // key_gen runs the standard keygen KDF, guaranteeing a nonzero scalar
    // below the group order.
    let sk = BlsSecretKey::key_gen(seed.as_bytes(), &[])
        .map_err(|_| CryptoError::InvalidBlindingSeed)?;
    let be = sk.to_bytes();
    let mut scalar = blst_scalar::default();
    unsafe { blst::blst_scalar_from_bendian(&mut scalar, be.as_ptr()) };
    Ok(scalar)
}

fn p2_from_compressed(bytes: &[u8], on_err: CryptoError) -> Result<blst_p2, CryptoError> {
    if bytes.len() != ENVELOPE_LEN {
        return Err(on_err);
    }
    let mut affine = blst_p2_affine::default();
    let rc = unsafe { blst::blst_p2_uncompress(&mut affine, bytes.as_ptr()) };
    if rc != BLST_ERROR::BLST_SUCCESS {
        return Err(on_err);
    }
    let mut point = blst_p2::default();
    unsafe { blst::blst_p2_from_affine(&mut point, &affine) };
    Ok(point)
}

fn compress_p2(point: &blst_p2) -> Vec<u8> {
    let mut out = vec![0u8; ENVELOPE_LEN];
    unsafe { blst::blst_p2_compress(out.as_mut_ptr(), point) };
    out
}

fn mult_p2(point: &blst_p2, scalar: &blst_scalar) -> blst_p2 {
    let mut out = blst_p2::default();
    unsafe { blst::blst_sign_pk_in_g1(&mut out, point, scalar) };
    out
}

/// Check that a denomination public key decodes to a valid G1 point.
pub fn validate_denom_pub(denom_pub: &[u8]) -> Result<(), CryptoError> {
    BlsPublicKey::key_validate(denom_pub)
        .map(|_| ())
        .map_err(|_| CryptoError::InvalidDenominationKey)
}

/// Blind a message under a seed-derived blinding scalar, producing the
/// envelope submitted to the issuer.
pub fn blind(msg: &[u8], blinding_seed: &SecretSeed) -> Result<Vec<u8>, CryptoError> {
    let scalar = blinding_scalar(blinding_seed)?;
    let mut hash = blst_p2::default();
    unsafe {
        blst::blst_hash_to_g2(
            &mut hash,
            msg.as_ptr(),
            msg.len(),
            DENOM_SIG_DST.as_ptr(),
            DENOM_SIG_DST.len(),
            std::ptr::null(),
            0,
        )
    };
    Ok(compress_p2(&mult_p2(&hash, &scalar)))
}

/// Strip the blinding from an issued signature, recovering the plain BLS
/// signature over the original message.
pub fn unblind(blinded_sig: &[u8], blinding_seed: &SecretSeed) -> Result<Vec<u8>, CryptoError> {
    let point = p2_from_compressed(blinded_sig, CryptoError::InvalidBlindSignature)?;
    let scalar = blinding_scalar(blinding_seed)?;

    let mut fr = blst::blst_fr::default();
    let mut fr_inv = blst::blst_fr::default();
    let mut inv = blst_scalar::default();
    unsafe {
        blst::blst_fr_from_scalar(&mut fr, &scalar);
        blst::blst_fr_inverse(&mut fr_inv, &fr);
        blst::blst_scalar_from_fr(&mut inv, &fr_inv);
    }

    Ok(compress_p2(&mult_p2(&point, &inv)))
}

/// Verify an unblinded signature against a message and denomination key.
pub fn verify_unblinded(msg: &[u8], sig: &[u8], denom_pub: &[u8]) -> bool {
    let Ok(sig) = BlsSignature::from_bytes(sig) else {
        return false;
    };
    let Ok(pk) = BlsPublicKey::from_bytes(denom_pub) else {
        return false;
    };
    sig.verify(true, msg, DENOM_SIG_DST, &[], &pk, true) == BLST_ERROR::BLST_SUCCESS
}

/// Issuer side of the scheme: signs envelopes without seeing their
/// contents. Used by tests and local simulation; a real exchange holds
/// the denomination secret keys.
pub struct DenominationSigner {
    sk: BlsSecretKey,
}

impl DenominationSigner {
    pub fn from_seed(seed: &[u8; 32]) -> Result<Self, CryptoError> {
        let sk = BlsSecretKey::key_gen(seed, &[]).map_err(|_| CryptoError::InvalidBlindingSeed)?;
        Ok(Self { sk })
    }

    /// Compressed denomination public key.
    pub fn public_key(&self) -> Vec<u8> {
        self.sk.sk_to_pk().compress().to_vec()
    }

    /// Sign a blinded envelope.
    pub fn sign_envelope(&self, envelope: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let point = p2_from_compressed(envelope, CryptoError::InvalidEnvelope)?;
        let be = self.sk.to_bytes();
        let mut scalar = blst_scalar::default();
        unsafe { blst::blst_scalar_from_bendian(&mut scalar, be.as_ptr()) };
        Ok(compress_p2(&mult_p2(&point, &scalar)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> DenominationSigner {
        DenominationSigner::from_seed(&[11u8; 32]).unwrap()
    }

    #[test]
    fn blind_sign_unblind_verify_cycle() {
        let s = signer();
        let msg = b"coin public key hash";
        let seed = SecretSeed([1u8; 32]);

        let envelope = blind(msg, &seed).unwrap();
        let blinded_sig = s.sign_envelope(&envelope).unwrap();
        let sig = unblind(&blinded_sig, &seed).unwrap();

        assert!(verify_unblinded(msg, &sig, &s.public_key()));
    }

    #[test]
    fn envelope_hides_message() {
        let s = signer();
        let msg = b"coin public key hash";
        let seed = SecretSeed([1u8; 32]);
        let envelope = blind(msg, &seed).unwrap();
        let blinded_sig = s.sign_envelope(&envelope).unwrap();
        let sig = unblind(&blinded_sig, &seed).unwrap();
        // The issued (blinded) signature is not the final signature.
        assert_ne!(blinded_sig, sig);
        // And does not verify as one.
        assert!(!verify_unblinded(msg, &blinded_sig, &s.public_key()));
    }

    #[test]
    fn blinding_is_deterministic_per_seed() {
        let msg = b"m";
        let e1 = blind(msg, &SecretSeed([2u8; 32])).unwrap();
        let e2 = blind(msg, &SecretSeed([2u8; 32])).unwrap();
        let e3 = blind(msg, &SecretSeed([3u8; 32])).unwrap();
        assert_eq!(e1, e2);
        assert_ne!(e1, e3);
    }

    #[test]
    fn wrong_seed_fails_unblinding_to_valid_sig() {
        let s = signer();
        let msg = b"coin public key hash";
        let envelope = blind(msg, &SecretSeed([1u8; 32])).unwrap();
        let blinded_sig = s.sign_envelope(&envelope).unwrap();
        let sig = unblind(&blinded_sig, &SecretSeed([9u8; 32])).unwrap();
        assert!(!verify_unblinded(msg, &sig, &s.public_key()));
    }

    #[test]
    fn garbage_inputs_rejected() {
        assert!(validate_denom_pub(&[0u8; 48]).is_err());
        assert!(validate_denom_pub(b"short").is_err());
        assert!(unblind(&[0u8; 96], &SecretSeed([1u8; 32])).is_err());
        assert!(signer().sign_envelope(&[1u8; 10]).is_err());
        assert!(!verify_unblinded(b"m", &[0u8; 96], &[0u8; 48]));
    }

    #[test]
    fn valid_denom_pub_accepted() {
        assert!(validate_denom_pub(&signer().public_key()).is_ok());
    }
}
