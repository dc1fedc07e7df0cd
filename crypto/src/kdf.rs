//! HKDF key derivation (SHA-512 extract, SHA-256 expand).
//!
//! Planchet derivation needs more than one hash-length of output, so the
//! expand phase iterates the usual `T(i) = HMAC(prk, T(i-1) || info || i)`
//! construction.

use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha512};

type HmacSha512 = Hmac<Sha512>;
type HmacSha256 = Hmac<Sha256>;

/// Derive `output_len` bytes from `ikm` under `salt` and `info`.
pub fn kdf(output_len: usize, ikm: &[u8], salt: &[u8], info: &[u8]) -> Vec<u8> {
    // Extract
    let mut extractor = HmacSha512::new_from_slice(salt).expect("hmac accepts any key length");
    extractor.update(ikm);
    let prk = extractor.finalize().into_bytes();

    // Expand
    let mut output = Vec::with_capacity(output_len);
    let mut block: Vec<u8> = Vec::new();
    let mut counter: u8 = 1;
    while output.len() < output_len {
        let mut mac = HmacSha256::new_from_slice(&prk).expect("hmac accepts any key length");
        mac.update(&block);
        mac.update(info);
        mac.update(&[counter]);
        block = mac.finalize().into_bytes().to_vec();
        let take = (output_len - output.len()).min(block.len());
        output.extend_from_slice(&block[..take]);
        counter = counter.wrapping_add(1);
    }
    output
}
