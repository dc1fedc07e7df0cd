//! Denomination validity checking.
//!
//! Rebuilds the master validity statement from a denomination's stored
//! fields and verifies the exchange master signature over it.

use crate::sign::verify_frame;
use veil_types::records::DenominationRecord;
use veil_types::{PublicKey, PurposeBuilder, SignaturePurpose};

/// Build the exact statement the exchange master key signed.
pub fn denomination_validity_frame(denom: &DenominationRecord, master_pub: &PublicKey) -> Vec<u8> {
    PurposeBuilder::new(SignaturePurpose::MasterDenominationKeyValidity)
        .put(master_pub.as_bytes())
        .put_timestamp(denom.stamp_start)
        .put_timestamp(denom.stamp_expire_withdraw)
        .put_timestamp(denom.stamp_expire_deposit)
        .put_timestamp(denom.stamp_expire_legal)
        .put_amount(&denom.value)
        .put_amount(&denom.fee_withdraw)
        .put_amount(&denom.fee_deposit)
        .put_amount(&denom.fee_refresh)
        .put_amount(&denom.fee_refund)
        .put(denom.denom_pub_hash.as_bytes())
        .build()
}

/// Verify the master signature over a denomination's metadata.
pub fn is_valid_denom(denom: &DenominationRecord, master_pub: &PublicKey) -> bool {
    let frame = denomination_validity_frame(denom, master_pub);
    verify_frame(&frame, &denom.master_sig, master_pub)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_denom_pub;
    use crate::keys::keypair_from_seed;
    use crate::sign::sign_frame;
    use veil_types::{Amount, DenominationStatus, Signature, Timestamp};

    fn amt(s: &str) -> Amount {
        s.parse().unwrap()
    }

    fn fixture(master: &veil_types::KeyPair) -> DenominationRecord {
        let denom_pub = vec![1u8; 48];
        let mut d = DenominationRecord {
            exchange_base_url: "https://exchange.test/".into(),
            denom_pub_hash: hash_denom_pub(&denom_pub),
            denom_pub,
            value: amt("EUR:5"),
            fee_withdraw: amt("EUR:0.1"),
            fee_deposit: amt("EUR:0.05"),
            fee_refresh: amt("EUR:0.02"),
            fee_refund: amt("EUR:0.01"),
            stamp_start: Timestamp::new(1_000),
            stamp_expire_withdraw: Timestamp::new(2_000),
            stamp_expire_deposit: Timestamp::new(3_000),
            stamp_expire_legal: Timestamp::new(4_000),
            master_sig: Signature([0u8; 64]),
            status: DenominationStatus::Unverified,
            is_offered: true,
            is_revoked: false,
        };
        let frame = denomination_validity_frame(&d, &master.public);
        d.master_sig = sign_frame(&frame, &master.private);
        d
    }

    #[test]
    fn valid_signature_accepted() {
        let master = keypair_from_seed(&[1u8; 32]);
        let d = fixture(&master);
        assert!(is_valid_denom(&d, &master.public));
    }

    #[test]
    fn tampered_fee_rejected() {
        let master = keypair_from_seed(&[1u8; 32]);
        let mut d = fixture(&master);
        d.fee_withdraw = amt("EUR:0");
        assert!(!is_valid_denom(&d, &master.public));
    }

    #[test]
    fn tampered_timestamp_rejected() {
        let master = keypair_from_seed(&[1u8; 32]);
        let mut d = fixture(&master);
        d.stamp_expire_withdraw = Timestamp::new(9_999);
        assert!(!is_valid_denom(&d, &master.public));
    }

    #[test]
    fn wrong_master_key_rejected() {
        let master = keypair_from_seed(&[1u8; 32]);
        let other = keypair_from_seed(&[2u8; 32]);
        let d = fixture(&master);
        assert!(!is_valid_denom(&d, &other.public));
    }
}
