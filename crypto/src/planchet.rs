//! Planchet derivation for withdrawals and tips.
//!
//! A planchet is a not-yet-signed coin: key pair, blinding seed and the
//! blinded envelope awaiting the issuer's blind signature. Withdrawal
//! planchets are derived deterministically from the withdrawal group's
//! secret seed and the coin slot index, so re-running a half-finished
//! withdrawal reproduces identical planchets.

use crate::blind;
use crate::error::CryptoError;
use crate::hash::{hash_coin_ev, hash_coin_pub};
use crate::kdf::kdf;
use crate::keys::keypair_from_seed;
use crate::sign::sign_frame;
use veil_types::{
    Amount, HashCode, KeyPair, PrivateKey, PublicKey, PurposeBuilder, SecretSeed, Signature,
    SignaturePurpose,
};

const WITHDRAWAL_INFO: &[u8] = b"veil-withdrawal-coin-derivation";
const TIP_INFO: &[u8] = b"veil-tip-coin-derivation";

/// A fully prepared withdrawal planchet.
pub struct Planchet {
    pub coin_pub: PublicKey,
    pub coin_priv: SecretSeed,
    pub blinding_seed: SecretSeed,
    pub denom_pub_hash: HashCode,
    pub coin_ev: Vec<u8>,
    pub coin_ev_hash: HashCode,
    pub withdraw_sig: Signature,
    pub coin_value: Amount,
    pub amount_with_fee: Amount,
}

/// A tip planchet: no reserve, hence no withdraw authorization.
pub struct TipPlanchet {
    pub coin_pub: PublicKey,
    pub coin_priv: SecretSeed,
    pub blinding_seed: SecretSeed,
    pub coin_ev: Vec<u8>,
    pub coin_ev_hash: HashCode,
}

/// Derive the coin key pair and blinding seed for one coin slot.
pub fn setup_planchet(secret_seed: &SecretSeed, coin_index: u32, info: &[u8]) -> (KeyPair, SecretSeed) {
    let out = kdf(
        64,
        secret_seed.as_bytes(),
        &coin_index.to_be_bytes(),
        info,
    );
    let mut coin_seed = [0u8; 32];
    coin_seed.copy_from_slice(&out[0..32]);
    let mut blinding = [0u8; 32];
    blinding.copy_from_slice(&out[32..64]);
    (keypair_from_seed(&coin_seed), SecretSeed(blinding))
}

/// Create a withdrawal planchet and its reserve authorization.
///
/// The signed statement covers, in order: reserve pub, amount with fee,
/// withdraw fee, denomination pub hash, envelope hash. `value + fee`
/// saturates rather than wrapping.
#[allow(clippy::too_many_arguments)]
pub fn create_withdraw_planchet(
    secret_seed: &SecretSeed,
    coin_index: u32,
    denom_pub: &[u8],
    denom_value: &Amount,
    fee_withdraw: &Amount,
    reserve_pub: &PublicKey,
    reserve_priv: &PrivateKey,
) -> Result<Planchet, CryptoError> {
    blind::validate_denom_pub(denom_pub)?;

    let (coin_keys, blinding_seed) = setup_planchet(secret_seed, coin_index, WITHDRAWAL_INFO);
    let coin_pub_hash = hash_coin_pub(&coin_keys.public);
    let coin_ev = blind::blind(coin_pub_hash.as_bytes(), &blinding_seed)?;
    let coin_ev_hash = hash_coin_ev(&coin_ev);
    let denom_pub_hash = crate::hash::hash_denom_pub(denom_pub);

    let amount_with_fee = denom_value.add(fee_withdraw).amount;

    let frame = PurposeBuilder::new(SignaturePurpose::ReserveWithdraw)
        .put(reserve_pub.as_bytes())
        .put_amount(&amount_with_fee)
        .put_amount(fee_withdraw)
        .put(denom_pub_hash.as_bytes())
        .put(coin_ev_hash.as_bytes())
        .build();
    let withdraw_sig = sign_frame(&frame, reserve_priv);

    Ok(Planchet {
        coin_pub: coin_keys.public,
        coin_priv: SecretSeed(coin_keys.private.0),
        blinding_seed,
        denom_pub_hash,
        coin_ev,
        coin_ev_hash,
        withdraw_sig,
        coin_value: denom_value.clone(),
        amount_with_fee,
    })
}

/// Create a tip planchet from a per-tip seed.
pub fn create_tip_planchet(
    tip_seed: &SecretSeed,
    coin_index: u32,
    denom_pub: &[u8],
) -> Result<TipPlanchet, CryptoError> {
    blind::validate_denom_pub(denom_pub)?;

    let (coin_keys, blinding_seed) = setup_planchet(tip_seed, coin_index, TIP_INFO);
    let coin_pub_hash = hash_coin_pub(&coin_keys.public);
    let coin_ev = blind::blind(coin_pub_hash.as_bytes(), &blinding_seed)?;
    let coin_ev_hash = hash_coin_ev(&coin_ev);

    Ok(TipPlanchet {
        coin_pub: coin_keys.public,
        coin_priv: SecretSeed(coin_keys.private.0),
        blinding_seed,
        coin_ev,
        coin_ev_hash,
    })
}

/// Sign a recoup request for a withdrawn coin: discloses the blinding
/// seed so the exchange can link the envelope back to the reserve.
pub fn sign_recoup_request(
    coin_priv: &SecretSeed,
    denom_pub_hash: &HashCode,
    blinding_seed: &SecretSeed,
) -> Signature {
    let frame = PurposeBuilder::new(SignaturePurpose::WalletCoinRecoup)
        .put(denom_pub_hash.as_bytes())
        .put(blinding_seed.as_bytes())
        .build();
    sign_frame(&frame, &coin_priv.to_private())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blind::DenominationSigner;
    use crate::sign::verify_frame;

    fn denom() -> DenominationSigner {
        DenominationSigner::from_seed(&[7u8; 32]).unwrap()
    }

    fn amt(s: &str) -> Amount {
        s.parse().unwrap()
    }

    #[test]
    fn planchet_is_deterministic() {
        let d = denom();
        let reserve = keypair_from_seed(&[1u8; 32]);
        let seed = SecretSeed([4u8; 32]);
        let p1 = create_withdraw_planchet(
            &seed, 0, &d.public_key(), &amt("EUR:5"), &amt("EUR:0.1"),
            &reserve.public, &reserve.private,
        )
        .unwrap();
        let p2 = create_withdraw_planchet(
            &seed, 0, &d.public_key(), &amt("EUR:5"), &amt("EUR:0.1"),
            &reserve.public, &reserve.private,
        )
        .unwrap();
        assert_eq!(p1.coin_pub, p2.coin_pub);
        assert_eq!(p1.coin_ev, p2.coin_ev);
        assert_eq!(p1.withdraw_sig.0, p2.withdraw_sig.0);
    }

    #[test]
    fn slots_are_independent() {
        let d = denom();
        let reserve = keypair_from_seed(&[1u8; 32]);
        let seed = SecretSeed([4u8; 32]);
        let p0 = create_withdraw_planchet(
            &seed, 0, &d.public_key(), &amt("EUR:5"), &amt("EUR:0.1"),
            &reserve.public, &reserve.private,
        )
        .unwrap();
        let p1 = create_withdraw_planchet(
            &seed, 1, &d.public_key(), &amt("EUR:5"), &amt("EUR:0.1"),
            &reserve.public, &reserve.private,
        )
        .unwrap();
        assert_ne!(p0.coin_pub, p1.coin_pub);
        assert_ne!(p0.coin_ev, p1.coin_ev);
    }

    #[test]
    fn withdraw_sig_verifies_and_covers_amount() {
        let d = denom();
        let reserve = keypair_from_seed(&[2u8; 32]);
        let p = create_withdraw_planchet(
            &SecretSeed([8u8; 32]), 3, &d.public_key(), &amt("EUR:5"), &amt("EUR:0.1"),
            &reserve.public, &reserve.private,
        )
        .unwrap();
        assert_eq!(p.amount_with_fee, amt("EUR:5.1"));

        let frame = PurposeBuilder::new(SignaturePurpose::ReserveWithdraw)
            .put(reserve.public.as_bytes())
            .put_amount(&p.amount_with_fee)
            .put_amount(&amt("EUR:0.1"))
            .put(p.denom_pub_hash.as_bytes())
            .put(p.coin_ev_hash.as_bytes())
            .build();
        assert!(verify_frame(&frame, &p.withdraw_sig, &reserve.public));
    }

    #[test]
    fn bad_denom_pub_is_a_protocol_violation() {
        let reserve = keypair_from_seed(&[2u8; 32]);
        let r = create_withdraw_planchet(
            &SecretSeed([8u8; 32]), 0, b"not a key", &amt("EUR:5"), &amt("EUR:0.1"),
            &reserve.public, &reserve.private,
        );
        assert!(matches!(r, Err(CryptoError::InvalidDenominationKey)));
    }

    #[test]
    fn withdrawn_coin_unblinds_to_valid_signature() {
        let d = denom();
        let reserve = keypair_from_seed(&[3u8; 32]);
        let p = create_withdraw_planchet(
            &SecretSeed([9u8; 32]), 0, &d.public_key(), &amt("EUR:1"), &amt("EUR:0.01"),
            &reserve.public, &reserve.private,
        )
        .unwrap();
        let blinded_sig = d.sign_envelope(&p.coin_ev).unwrap();
        let sig = crate::blind::unblind(&blinded_sig, &p.blinding_seed).unwrap();
        assert!(crate::blind::verify_unblinded(
            hash_coin_pub(&p.coin_pub).as_bytes(),
            &sig,
            &d.public_key()
        ));
    }

    #[test]
    fn tip_planchet_has_no_reserve_signature() {
        let d = denom();
        let t = create_tip_planchet(&SecretSeed([5u8; 32]), 0, &d.public_key()).unwrap();
        assert_eq!(t.coin_ev_hash, hash_coin_ev(&t.coin_ev));
        // Distinct derivation domain from withdrawals.
        let p = create_withdraw_planchet(
            &SecretSeed([5u8; 32]), 0, &d.public_key(), &amt("EUR:1"), &amt("EUR:0"),
            &keypair_from_seed(&[1u8; 32]).public, &keypair_from_seed(&[1u8; 32]).private,
        )
        .unwrap();
        assert_ne!(t.coin_pub, p.coin_pub);
    }
}
