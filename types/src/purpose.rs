//! Signature purpose framing.
//!
//! Every statement the wallet signs (or verifies a signature over) is
//! framed as `u32 total_length_be | u32 purpose_code_be | payload`, where
//! `total_length = 8 + payload length`. Field order inside a payload is
//! part of the protocol contract: the exchange rebuilds the identical
//! byte sequence, so reordering fields breaks verification.

use crate::amount::Amount;
use crate::time::Timestamp;
use thiserror::Error;

/// Statement kinds with their protocol-assigned purpose codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum SignaturePurpose {
    MasterDenominationKeyValidity = 1025,
    MasterWireFees = 1028,
    MasterWireDetails = 1030,
    MerchantPaymentOk = 1104,
    ReserveWithdraw = 1200,
    WalletCoinDeposit = 1201,
    WalletCoinMelt = 1202,
    WalletCoinRecoup = 1203,
    WalletCoinLink = 1204,
    SyncBackupUpload = 1450,
    Test = 4242,
}

impl SignaturePurpose {
    pub fn code(self) -> u32 {
        self as u32
    }
}

/// Size of the amount wire encoding: u64 value, u32 fraction, 12-byte
/// null-padded currency.
pub const AMOUNT_WIRE_LEN: usize = 24;

/// Frame an amount for signing.
pub fn amount_to_bytes(a: &Amount) -> [u8; AMOUNT_WIRE_LEN] {
    let mut out = [0u8; AMOUNT_WIRE_LEN];
    out[0..8].copy_from_slice(&a.value.to_be_bytes());
    out[8..12].copy_from_slice(&a.fraction.to_be_bytes());
    let cur = a.currency.as_bytes();
    // MAX_CURRENCY_LEN keeps this within the 12-byte field.
    out[12..12 + cur.len()].copy_from_slice(cur);
    out
}

/// Frame a timestamp for signing: big-endian microseconds of the whole
/// second.
pub fn timestamp_to_bytes(t: Timestamp) -> [u8; 8] {
    t.as_micros().to_be_bytes()
}

/// Builder for a purpose frame: ordered `put` calls, then `build`.
pub struct PurposeBuilder {
    purpose: SignaturePurpose,
    chunks: Vec<Vec<u8>>,
}

impl PurposeBuilder {
    pub fn new(purpose: SignaturePurpose) -> Self {
        Self {
            purpose,
            chunks: Vec::new(),
        }
    }

    pub fn put(mut self, bytes: &[u8]) -> Self {
        self.chunks.push(bytes.to_vec());
        self
    }

    pub fn put_amount(self, a: &Amount) -> Self {
        let framed = amount_to_bytes(a);
        self.put(&framed)
    }

    pub fn put_timestamp(self, t: Timestamp) -> Self {
        let framed = timestamp_to_bytes(t);
        self.put(&framed)
    }

    /// Assemble the final frame.
    pub fn build(self) -> Vec<u8> {
        let payload_len: usize = self.chunks.iter().map(|c| c.len()).sum();
        let total = 8 + payload_len;
        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(&(total as u32).to_be_bytes());
        out.extend_from_slice(&self.purpose.code().to_be_bytes());
        for chunk in &self.chunks {
            out.extend_from_slice(chunk);
        }
        out
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame shorter than the 8-byte header")]
    TooShort,
    #[error("declared length {declared} does not match actual length {actual}")]
    LengthMismatch { declared: u32, actual: usize },
}

/// Split a purpose frame back into `(purpose_code, payload)`.
///
/// Only used for diagnostics and tests; the exchange never sends us raw
/// frames, it recomputes them.
pub fn parse_frame(bytes: &[u8]) -> Result<(u32, &[u8]), FrameError> {
    if bytes.len() < 8 {
        return Err(FrameError::TooShort);
    }
    let declared = u32::from_be_bytes(bytes[0..4].try_into().expect("4 bytes"));
    if declared as usize != bytes.len() {
        return Err(FrameError::LengthMismatch {
            declared,
            actual: bytes.len(),
        });
    }
    let code = u32::from_be_bytes(bytes[4..8].try_into().expect("4 bytes"));
    Ok((code, &bytes[8..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn empty_payload_frame() {
        let frame = PurposeBuilder::new(SignaturePurpose::Test).build();
        assert_eq!(frame.len(), 8);
        assert_eq!(&frame[0..4], &8u32.to_be_bytes());
        assert_eq!(&frame[4..8], &4242u32.to_be_bytes());
    }

    #[test]
    fn frame_roundtrip() {
        let frame = PurposeBuilder::new(SignaturePurpose::ReserveWithdraw)
            .put(b"abc")
            .put(b"defg")
            .build();
        let (code, payload) = parse_frame(&frame).unwrap();
        assert_eq!(code, 1200);
        assert_eq!(payload, b"abcdefg");
        assert_eq!(frame.len(), 8 + payload.len());
    }

    #[test]
    fn amount_framing() {
        let a: Amount = "EUR:1.5".parse().unwrap();
        let b = amount_to_bytes(&a);
        assert_eq!(&b[0..8], &1u64.to_be_bytes());
        assert_eq!(&b[8..12], &50_000_000u32.to_be_bytes());
        assert_eq!(&b[12..15], b"EUR");
        assert_eq!(&b[15..24], &[0u8; 9]);
    }

    #[test]
    fn timestamp_framing() {
        assert_eq!(timestamp_to_bytes(Timestamp::new(3)), 3_000_000u64.to_be_bytes());
        assert_eq!(timestamp_to_bytes(Timestamp::never()), u64::MAX.to_be_bytes());
    }

    #[test]
    fn parse_rejects_bad_length() {
        assert_eq!(parse_frame(b"abc"), Err(FrameError::TooShort));
        let mut frame = PurposeBuilder::new(SignaturePurpose::Test).put(b"xy").build();
        frame.push(0);
        assert!(matches!(
            parse_frame(&frame),
            Err(FrameError::LengthMismatch { .. })
        ));
    }

    proptest! {
        #[test]
        fn length_field_invariant(payload in proptest::collection::vec(any::<u8>(), 0..256)) {
            let frame = PurposeBuilder::new(SignaturePurpose::WalletCoinMelt)
                .put(&payload)
                .build();
            let (code, parsed) = parse_frame(&frame).unwrap();
            prop_assert_eq!(code, 1202);
            prop_assert_eq!(parsed, payload.as_slice());
            prop_assert_eq!(frame.len(), 8 + parsed.len());
        }
    }
}
