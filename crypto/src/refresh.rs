//! Cut-and-choose refresh session derivation.
//!
//! The wallet commits to `kappa` candidate sessions; after the melt the
//! exchange picks the one session that stays hidden (`noreveal_index`),
//! and the wallet discloses the transfer secrets of every other session.
//! All session material derives deterministically from the transfer
//! seeds, so a stored session can be re-derived and resumed at any step.

use crate::blind;
use crate::ecdh::{transfer_keypair_from_seed, transfer_secret};
use crate::error::CryptoError;
use crate::hash::{blake2b_256_multi, hash_coin_ev, hash_coin_pub};
use crate::kdf::kdf;
use crate::keys::keypair_from_seed;
use crate::sign::sign_frame;
use veil_types::purpose::amount_to_bytes;
use veil_types::records::{DenominationRecord, RefreshPlanchet, RefreshSessionRecord};
use veil_types::{
    Amount, HashCode, PublicKey, PurposeBuilder, RefreshSessionStatus, SecretSeed, Signature,
    SignaturePurpose,
};

const REFRESH_INFO: &[u8] = b"veil-refresh-coin-derivation";

/// Inputs for deriving one refresh session.
pub struct RefreshSessionInput<'a> {
    pub kappa: u32,
    pub melt_coin_pub: PublicKey,
    pub melt_coin_priv: &'a SecretSeed,
    pub melt_denom_pub_hash: HashCode,
    pub melt_fee: Amount,
    /// Target denominations, one entry per new coin.
    pub new_denoms: &'a [DenominationRecord],
    /// One fresh 32-byte seed per candidate session.
    pub transfer_seeds: &'a [SecretSeed],
}

fn derive_session_planchets(
    ts: &[u8; 32],
    new_denoms: &[DenominationRecord],
) -> Result<Vec<RefreshPlanchet>, CryptoError> {
    let mut planchets = Vec::with_capacity(new_denoms.len());
    for (j, _denom) in new_denoms.iter().enumerate() {
        let out = kdf(64, ts, &(j as u32).to_be_bytes(), REFRESH_INFO);
        let mut coin_seed = [0u8; 32];
        coin_seed.copy_from_slice(&out[0..32]);
        let mut blinding = [0u8; 32];
        blinding.copy_from_slice(&out[32..64]);
        let coin_keys = keypair_from_seed(&coin_seed);
        let blinding_seed = SecretSeed(blinding);
        let coin_ev = blind::blind(hash_coin_pub(&coin_keys.public).as_bytes(), &blinding_seed)?;
        planchets.push(RefreshPlanchet {
            coin_pub: coin_keys.public,
            coin_priv: SecretSeed(coin_keys.private.0),
            blinding_seed,
            coin_ev,
        });
    }
    Ok(planchets)
}

/// Derive the complete session: transfer keys, kappa planchet sets, the
/// session commitment hash and the melt authorization.
pub fn derive_refresh_session(
    input: &RefreshSessionInput<'_>,
) -> Result<RefreshSessionRecord, CryptoError> {
    if input.transfer_seeds.len() != input.kappa as usize {
        return Err(CryptoError::InconsistentRefresh(format!(
            "expected {} transfer seeds, got {}",
            input.kappa,
            input.transfer_seeds.len()
        )));
    }
    if input.new_denoms.is_empty() {
        return Err(CryptoError::InconsistentRefresh(
            "refresh into zero coins".into(),
        ));
    }
    for denom in input.new_denoms {
        blind::validate_denom_pub(&denom.denom_pub)?;
    }

    // value_with_fee = sum over new coins of (value + withdraw fee), plus
    // the melt fee.
    let mut value_with_fee = input.melt_fee.clone();
    let mut amount_output = Amount::zero(input.melt_fee.currency.clone());
    for denom in input.new_denoms {
        value_with_fee = value_with_fee
            .add(&denom.value)
            .amount
            .add(&denom.fee_withdraw)
            .amount;
        amount_output = amount_output.add(&denom.value).amount;
    }

    let mut transfer_privs = Vec::with_capacity(input.kappa as usize);
    let mut transfer_pubs = Vec::with_capacity(input.kappa as usize);
    let mut planchets = Vec::with_capacity(input.kappa as usize);
    for seed in input.transfer_seeds {
        let (priv_seed, pub_key) = transfer_keypair_from_seed(seed);
        let ts = transfer_secret(&priv_seed, &input.melt_coin_pub)?;
        planchets.push(derive_session_planchets(&ts, input.new_denoms)?);
        transfer_privs.push(priv_seed);
        transfer_pubs.push(pub_key);
    }

    // Commitment hash. Input order is the protocol contract: transfer
    // pubs, new denomination pubs, melt coin pub, value with fee, then
    // every envelope session-major.
    let amount_bytes = amount_to_bytes(&value_with_fee);
    let mut parts: Vec<&[u8]> = Vec::new();
    for pk in &transfer_pubs {
        parts.push(pk.as_bytes());
    }
    for denom in input.new_denoms {
        parts.push(&denom.denom_pub);
    }
    parts.push(input.melt_coin_pub.as_bytes());
    parts.push(&amount_bytes);
    for session in &planchets {
        for planchet in session {
            parts.push(&planchet.coin_ev);
        }
    }
    let session_hash = HashCode::new(blake2b_256_multi(&parts));

    let melt_frame = PurposeBuilder::new(SignaturePurpose::WalletCoinMelt)
        .put(session_hash.as_bytes())
        .put(input.melt_denom_pub_hash.as_bytes())
        .put_amount(&value_with_fee)
        .put_amount(&input.melt_fee)
        .put(input.melt_coin_pub.as_bytes())
        .build();
    let confirm_sig = sign_frame(&melt_frame, &input.melt_coin_priv.to_private());

    Ok(RefreshSessionRecord {
        old_coin_pub: input.melt_coin_pub,
        melt_denom_pub_hash: input.melt_denom_pub_hash,
        amount_refresh_input: value_with_fee,
        amount_refresh_output: amount_output,
        melt_fee: input.melt_fee.clone(),
        new_denom_hashes: input.new_denoms.iter().map(|d| d.denom_pub_hash).collect(),
        transfer_privs,
        transfer_pubs,
        planchets,
        session_hash,
        confirm_sig,
        noreveal_index: None,
        status: RefreshSessionStatus::Created,
    })
}

/// Everything the reveal request discloses.
pub struct RevealData {
    /// Transfer private keys of every session except `noreveal_index`,
    /// in session order.
    pub transfer_privs: Vec<SecretSeed>,
    /// Envelopes of the one session that stays hidden.
    pub reveal_planchets: Vec<RefreshPlanchet>,
    /// One ownership-continuity signature per new coin.
    pub link_sigs: Vec<Signature>,
}

/// Assemble the reveal payload for the exchange-chosen index.
///
/// Exactly one session's envelopes are ever disclosed; the other
/// sessions expose only their transfer secrets.
pub fn prepare_reveal(
    session: &RefreshSessionRecord,
    noreveal_index: u32,
    melt_coin_priv: &SecretSeed,
) -> Result<RevealData, CryptoError> {
    let kappa = session.transfer_pubs.len();
    let idx = noreveal_index as usize;
    if idx >= kappa {
        return Err(CryptoError::InconsistentRefresh(format!(
            "noreveal index {} out of range [0, {})",
            noreveal_index, kappa
        )));
    }

    let transfer_privs = session
        .transfer_privs
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != idx)
        .map(|(_, p)| p.clone())
        .collect();

    let reveal_planchets: Vec<RefreshPlanchet> = session.planchets[idx].clone();

    let mut link_sigs = Vec::with_capacity(reveal_planchets.len());
    for (j, planchet) in reveal_planchets.iter().enumerate() {
        let frame = PurposeBuilder::new(SignaturePurpose::WalletCoinLink)
            .put(session.new_denom_hashes[j].as_bytes())
            .put(session.old_coin_pub.as_bytes())
            .put(session.transfer_pubs[idx].as_bytes())
            .put(hash_coin_ev(&planchet.coin_ev).as_bytes())
            .build();
        link_sigs.push(sign_frame(&frame, &melt_coin_priv.to_private()));
    }

    Ok(RevealData {
        transfer_privs,
        reveal_planchets,
        link_sigs,
    })
}

/// A freshly unblinded coin ready to be persisted.
pub struct NewCoin {
    pub coin_pub: PublicKey,
    pub coin_priv: SecretSeed,
    pub blinding_seed: SecretSeed,
    pub denom_pub_hash: HashCode,
    pub denom_sig: Vec<u8>,
}

/// Unblind the exchange's blinded signatures for the hidden session and
/// verify each against its denomination key.
pub fn unblind_new_coins(
    session: &RefreshSessionRecord,
    noreveal_index: u32,
    blinded_sigs: &[Vec<u8>],
    new_denom_pubs: &[Vec<u8>],
) -> Result<Vec<NewCoin>, CryptoError> {
    let idx = noreveal_index as usize;
    let planchets = session
        .planchets
        .get(idx)
        .ok_or_else(|| CryptoError::InconsistentRefresh("noreveal index out of range".into()))?;
    if blinded_sigs.len() != planchets.len() || new_denom_pubs.len() != planchets.len() {
        return Err(CryptoError::InconsistentRefresh(format!(
            "expected {} signatures, got {}",
            planchets.len(),
            blinded_sigs.len()
        )));
    }

    let mut coins = Vec::with_capacity(planchets.len());
    for (j, planchet) in planchets.iter().enumerate() {
        let denom_sig = blind::unblind(&blinded_sigs[j], &planchet.blinding_seed)?;
        if !blind::verify_unblinded(
            hash_coin_pub(&planchet.coin_pub).as_bytes(),
            &denom_sig,
            &new_denom_pubs[j],
        ) {
            return Err(CryptoError::InvalidBlindSignature);
        }
        coins.push(NewCoin {
            coin_pub: planchet.coin_pub,
            coin_priv: planchet.coin_priv.clone(),
            blinding_seed: planchet.blinding_seed.clone(),
            denom_pub_hash: session.new_denom_hashes[j],
            denom_sig,
        });
    }
    Ok(coins)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blind::DenominationSigner;
    use crate::hash::hash_denom_pub;
    use crate::sign::verify_frame;
    use veil_types::{DenominationStatus, Timestamp};

    fn amt(s: &str) -> Amount {
        s.parse().unwrap()
    }

    fn denom_record(signer: &DenominationSigner, value: &str, fee_withdraw: &str) -> DenominationRecord {
        let denom_pub = signer.public_key();
        DenominationRecord {
            exchange_base_url: "https://exchange.test/".into(),
            denom_pub_hash: hash_denom_pub(&denom_pub),
            denom_pub,
            value: amt(value),
            fee_withdraw: amt(fee_withdraw),
            fee_deposit: amt("EUR:0.01"),
            fee_refresh: amt("EUR:0.01"),
            fee_refund: amt("EUR:0.01"),
            stamp_start: Timestamp::new(0),
            stamp_expire_withdraw: Timestamp::new(u64::MAX / 2),
            stamp_expire_deposit: Timestamp::new(u64::MAX / 2),
            stamp_expire_legal: Timestamp::new(u64::MAX / 2),
            master_sig: Signature([0u8; 64]),
            status: DenominationStatus::VerifiedGood,
            is_offered: true,
            is_revoked: false,
        }
    }

    fn session_fixture() -> (RefreshSessionRecord, DenominationSigner, SecretSeed) {
        let signer = DenominationSigner::from_seed(&[20u8; 32]).unwrap();
        let melt_coin = keypair_from_seed(&[21u8; 32]);
        let melt_priv = SecretSeed(melt_coin.private.0);
        let denoms = vec![
            denom_record(&signer, "EUR:0.49", "EUR:0.01"),
            denom_record(&signer, "EUR:0.49", "EUR:0.01"),
        ];
        let seeds = vec![
            SecretSeed([1u8; 32]),
            SecretSeed([2u8; 32]),
            SecretSeed([3u8; 32]),
        ];
        let input = RefreshSessionInput {
            kappa: 3,
            melt_coin_pub: melt_coin.public,
            melt_coin_priv: &melt_priv,
            melt_denom_pub_hash: HashCode::new([9u8; 32]),
            melt_fee: amt("EUR:0.02"),
            new_denoms: &denoms,
            transfer_seeds: &seeds,
        };
        (derive_refresh_session(&input).unwrap(), signer, melt_priv)
    }

    #[test]
    fn value_conservation() {
        let (session, _, _) = session_fixture();
        // 2 * (0.49 + 0.01) + 0.02 melt fee
        assert_eq!(session.amount_refresh_input, amt("EUR:1.02"));
        assert_eq!(session.amount_refresh_output, amt("EUR:0.98"));
        let fees_and_output = session
            .amount_refresh_output
            .add(&amt("EUR:0.02"))
            .amount
            .add(&amt("EUR:0.02"))
            .amount;
        assert_eq!(fees_and_output, session.amount_refresh_input);
    }

    #[test]
    fn kappa_sessions_with_independent_planchets() {
        let (session, _, _) = session_fixture();
        assert_eq!(session.planchets.len(), 3);
        for p in &session.planchets {
            assert_eq!(p.len(), 2);
        }
        assert_ne!(session.planchets[0][0].coin_pub, session.planchets[1][0].coin_pub);
        assert_ne!(session.planchets[0][0].coin_ev, session.planchets[0][1].coin_ev);
    }

    #[test]
    fn derivation_is_deterministic() {
        let (s1, _, _) = session_fixture();
        let (s2, _, _) = session_fixture();
        assert_eq!(s1.session_hash, s2.session_hash);
        assert_eq!(s1.confirm_sig.0, s2.confirm_sig.0);
        assert_eq!(s1.planchets[2][1].coin_ev, s2.planchets[2][1].coin_ev);
    }

    #[test]
    fn melt_signature_verifies() {
        let (session, _, _) = session_fixture();
        let melt_coin = keypair_from_seed(&[21u8; 32]);
        let frame = PurposeBuilder::new(SignaturePurpose::WalletCoinMelt)
            .put(session.session_hash.as_bytes())
            .put(session.melt_denom_pub_hash.as_bytes())
            .put_amount(&session.amount_refresh_input)
            .put_amount(&session.melt_fee)
            .put(session.old_coin_pub.as_bytes())
            .build();
        assert!(verify_frame(&frame, &session.confirm_sig, &melt_coin.public));
    }

    #[test]
    fn reveal_discloses_exactly_one_envelope_set() {
        let (session, _, melt_priv) = session_fixture();
        let reveal = prepare_reveal(&session, 1, &melt_priv).unwrap();
        assert_eq!(reveal.transfer_privs.len(), 2);
        assert_eq!(reveal.reveal_planchets.len(), 2);
        assert_eq!(reveal.link_sigs.len(), 2);
        // The disclosed envelopes are the hidden session's.
        assert_eq!(reveal.reveal_planchets[0].coin_ev, session.planchets[1][0].coin_ev);
        // The hidden session's transfer key stays secret.
        for p in &reveal.transfer_privs {
            assert_ne!(p, &session.transfer_privs[1]);
        }
    }

    #[test]
    fn reveal_rejects_out_of_range_index() {
        let (session, _, melt_priv) = session_fixture();
        assert!(prepare_reveal(&session, 3, &melt_priv).is_err());
    }

    #[test]
    fn link_signatures_verify() {
        let (session, _, melt_priv) = session_fixture();
        let melt_coin = keypair_from_seed(&[21u8; 32]);
        let idx = 2u32;
        let reveal = prepare_reveal(&session, idx, &melt_priv).unwrap();
        for (j, sig) in reveal.link_sigs.iter().enumerate() {
            let frame = PurposeBuilder::new(SignaturePurpose::WalletCoinLink)
                .put(session.new_denom_hashes[j].as_bytes())
                .put(session.old_coin_pub.as_bytes())
                .put(session.transfer_pubs[idx as usize].as_bytes())
                .put(hash_coin_ev(&session.planchets[idx as usize][j].coin_ev).as_bytes())
                .build();
            assert!(verify_frame(&frame, sig, &melt_coin.public));
        }
    }

    #[test]
    fn full_cycle_produces_spendable_coins() {
        let (session, signer, _) = session_fixture();
        let idx = 0u32;
        let blinded: Vec<Vec<u8>> = session.planchets[idx as usize]
            .iter()
            .map(|p| signer.sign_envelope(&p.coin_ev).unwrap())
            .collect();
        let pubs = vec![signer.public_key(), signer.public_key()];
        let coins = unblind_new_coins(&session, idx, &blinded, &pubs).unwrap();
        assert_eq!(coins.len(), 2);
        for c in &coins {
            assert!(blind::verify_unblinded(
                hash_coin_pub(&c.coin_pub).as_bytes(),
                &c.denom_sig,
                &signer.public_key()
            ));
        }
    }

    #[test]
    fn mismatched_signature_count_rejected() {
        let (session, signer, _) = session_fixture();
        let blinded = vec![signer.sign_envelope(&session.planchets[0][0].coin_ev).unwrap()];
        let pubs = vec![signer.public_key(), signer.public_key()];
        assert!(unblind_new_coins(&session, 0, &blinded, &pubs).is_err());
    }

    #[test]
    fn wrong_seed_count_rejected() {
        let melt_coin = keypair_from_seed(&[21u8; 32]);
        let melt_priv = SecretSeed(melt_coin.private.0);
        let signer = DenominationSigner::from_seed(&[20u8; 32]).unwrap();
        let denoms = vec![denom_record(&signer, "EUR:1", "EUR:0.01")];
        let seeds = vec![SecretSeed([1u8; 32])];
        let input = RefreshSessionInput {
            kappa: 3,
            melt_coin_pub: melt_coin.public,
            melt_coin_priv: &melt_priv,
            melt_denom_pub_hash: HashCode::new([9u8; 32]),
            melt_fee: amt("EUR:0.02"),
            new_denoms: &denoms,
            transfer_seeds: &seeds,
        };
        assert!(derive_refresh_session(&input).is_err());
    }
}
