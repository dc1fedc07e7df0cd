//! Exchange key ingestion and denomination validation.
//!
//! `/keys` is the exchange's self-description: master key, currency and
//! the denomination list. Every listed denomination carries a master
//! signature over its value, fees and validity window; we verify it once
//! and record the verdict. A bad signature is remembered forever, even
//! if a later `/keys` response serves a correct one.

use tracing::{debug, info, warn};

use veil_crypto::{hash_denom_pub, is_valid_denom, validate_denom_pub};
use veil_store::entities::denomination_key;
use veil_store::{Db, TxAction};
use veil_types::records::{DenominationRecord, ExchangeRecord};
use veil_types::{DenominationStatus, PublicKey, Signature, Timestamp};

use crate::client::{DenomInfo, ExchangeApi};
use crate::error::WalletError;

fn decode_pub(hex_str: &str) -> Result<PublicKey, WalletError> {
    let bytes = hex::decode(hex_str)
        .map_err(|e| WalletError::ProtocolViolation(format!("bad public key hex: {e}")))?;
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| WalletError::ProtocolViolation("public key is not 32 bytes".into()))?;
    Ok(PublicKey(arr))
}

fn decode_sig(hex_str: &str) -> Result<Signature, WalletError> {
    let bytes = hex::decode(hex_str)
        .map_err(|e| WalletError::ProtocolViolation(format!("bad signature hex: {e}")))?;
    let arr: [u8; 64] = bytes
        .try_into()
        .map_err(|_| WalletError::ProtocolViolation("signature is not 64 bytes".into()))?;
    Ok(Signature(arr))
}

fn record_from_info(base_url: &str, info: &DenomInfo) -> Result<DenominationRecord, WalletError> {
    let denom_pub = hex::decode(&info.denom_pub)
        .map_err(|e| WalletError::ProtocolViolation(format!("bad denomination key hex: {e}")))?;
    validate_denom_pub(&denom_pub)?;
    Ok(DenominationRecord {
        exchange_base_url: base_url.to_string(),
        denom_pub_hash: hash_denom_pub(&denom_pub),
        denom_pub,
        value: info.value.clone(),
        fee_withdraw: info.fee_withdraw.clone(),
        fee_deposit: info.fee_deposit.clone(),
        fee_refresh: info.fee_refresh.clone(),
        fee_refund: info.fee_refund.clone(),
        stamp_start: info.stamp_start,
        stamp_expire_withdraw: info.stamp_expire_withdraw,
        stamp_expire_deposit: info.stamp_expire_deposit,
        stamp_expire_legal: info.stamp_expire_legal,
        master_sig: decode_sig(&info.master_sig)?,
        status: DenominationStatus::Unverified,
        is_offered: true,
        is_revoked: false,
    })
}

/// Check the master signature over a denomination and settle its status.
/// A `VerifiedBad` verdict is final.
pub fn validate_denomination(
    denom: &mut DenominationRecord,
    master_pub: &PublicKey,
) -> DenominationStatus {
    if denom.status == DenominationStatus::Unverified {
        denom.status = if is_valid_denom(denom, master_pub) {
            DenominationStatus::VerifiedGood
        } else {
            warn!(
                denom = %denom.denom_pub_hash,
                value = %denom.value,
                "denomination carries an invalid master signature"
            );
            DenominationStatus::VerifiedBad
        };
    }
    denom.status
}

/// Fetch `/keys` and fold it into the local denomination set.
///
/// Denominations missing from the response stop being offered; those on
/// the recoup list are marked revoked. Stored verdicts survive: a
/// denomination once proven bad stays excluded.
pub async fn update_exchange_keys<C: ExchangeApi + Sync>(
    db: &Db,
    client: &C,
    base_url: &str,
) -> Result<(), WalletError> {
    let keys = client.get_keys().await?;
    let master_pub = decode_pub(&keys.master_public_key)?;

    if let Some(existing) = db.read()?.get::<ExchangeRecord>(base_url.as_bytes())? {
        if existing.master_pub != master_pub {
            return Err(WalletError::ProtocolViolation(
                "exchange master key changed".into(),
            ));
        }
        if existing.currency != keys.currency {
            return Err(WalletError::ProtocolViolation(format!(
                "exchange switched currency from {} to {}",
                existing.currency, keys.currency
            )));
        }
    }

    let mut incoming = Vec::with_capacity(keys.denoms.len());
    for info in &keys.denoms {
        incoming.push(record_from_info(base_url, info)?);
    }
    let mut revoked_hashes = Vec::new();
    for r in &keys.recoup {
        let bytes = hex::decode(&r.denom_pub_hash)
            .map_err(|e| WalletError::ProtocolViolation(format!("bad recoup hash hex: {e}")))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| WalletError::ProtocolViolation("recoup hash is not 32 bytes".into()))?;
        revoked_hashes.push(veil_types::HashCode::new(arr));
    }

    let mut good = 0usize;
    let mut bad = 0usize;
    db.with_write(|tx| {
        tx.put(&ExchangeRecord {
            base_url: base_url.to_string(),
            master_pub,
            currency: keys.currency.clone(),
            last_keys_update: Timestamp::now(),
        })?;

        let stored: Vec<DenominationRecord> =
            tx.get_by_index("by_exchange", base_url.as_bytes())?;

        // Anything not listed anymore is no longer offered.
        for mut old in stored {
            if !incoming
                .iter()
                .any(|d| d.denom_pub_hash == old.denom_pub_hash)
                && old.is_offered
            {
                old.is_offered = false;
                tx.put(&old)?;
            }
        }

        for mut denom in incoming.clone() {
            if let Some(existing) = tx.get::<DenominationRecord>(&denomination_key(
                base_url,
                denom.denom_pub_hash.as_bytes(),
            ))? {
                // Keep the settled verdict and any revocation.
                denom.status = existing.status;
                denom.is_revoked = existing.is_revoked;
            }
            if revoked_hashes.contains(&denom.denom_pub_hash) {
                denom.is_revoked = true;
            }
            match validate_denomination(&mut denom, &master_pub) {
                DenominationStatus::VerifiedGood => good += 1,
                DenominationStatus::VerifiedBad => bad += 1,
                DenominationStatus::Unverified => {}
            }
            tx.put(&denom)?;
        }
        Ok(TxAction::Commit(()))
    })?;

    if bad > 0 {
        warn!(exchange = base_url, bad, "exchange served denominations with bad signatures");
    }
    debug!(exchange = base_url, denoms = keys.denoms.len(), good, "exchange keys updated");
    info!(exchange = base_url, currency = %keys.currency, "exchange keys ingested");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use veil_crypto::denom::denomination_validity_frame;
    use veil_crypto::{keypair_from_seed, sign_frame, DenominationSigner};
    use veil_store::memory::MemoryBackend;
    use veil_store::schema;
    use veil_types::{Amount, KeyPair};

    use crate::client::{
        ExchangeKeysResponse, MeltRequest, MeltResponse, ReserveStatusResponse, RevealRequest,
        RevealResponse, RevokedDenom, WireResponse, WithdrawRequest, WithdrawResponse,
    };

    fn amt(s: &str) -> Amount {
        s.parse().unwrap()
    }

    fn master() -> KeyPair {
        keypair_from_seed(&[50u8; 32])
    }

    /// A correctly signed DenomInfo for a real BLS key.
    fn signed_info(master: &KeyPair, bls_seed: u8, value: &str) -> DenomInfo {
        let signer = DenominationSigner::from_seed(&[bls_seed; 32]).unwrap();
        let denom_pub = signer.public_key();
        let mut record = DenominationRecord {
            exchange_base_url: "https://exchange.test/".into(),
            denom_pub_hash: hash_denom_pub(&denom_pub),
            denom_pub: denom_pub.clone(),
            value: amt(value),
            fee_withdraw: amt("EUR:0.01"),
            fee_deposit: amt("EUR:0.01"),
            fee_refresh: amt("EUR:0.01"),
            fee_refund: amt("EUR:0.01"),
            stamp_start: Timestamp::new(0),
            stamp_expire_withdraw: Timestamp::new(u64::MAX / 2),
            stamp_expire_deposit: Timestamp::new(u64::MAX / 2),
            stamp_expire_legal: Timestamp::new(u64::MAX / 2),
            master_sig: Signature([0u8; 64]),
            status: DenominationStatus::Unverified,
            is_offered: true,
            is_revoked: false,
        };
        let frame = denomination_validity_frame(&record, &master.public);
        record.master_sig = sign_frame(&frame, &master.private);
        DenomInfo {
            denom_pub: hex::encode(&record.denom_pub),
            value: record.value.clone(),
            fee_withdraw: record.fee_withdraw.clone(),
            fee_deposit: record.fee_deposit.clone(),
            fee_refresh: record.fee_refresh.clone(),
            fee_refund: record.fee_refund.clone(),
            stamp_start: record.stamp_start,
            stamp_expire_withdraw: record.stamp_expire_withdraw,
            stamp_expire_deposit: record.stamp_expire_deposit,
            stamp_expire_legal: record.stamp_expire_legal,
            master_sig: hex::encode(record.master_sig.0),
        }
    }

    struct StubExchange {
        response: Mutex<ExchangeKeysResponse>,
    }

    impl ExchangeApi for StubExchange {
        async fn get_keys(&self) -> Result<ExchangeKeysResponse, WalletError> {
            Ok(self.response.lock().unwrap().clone())
        }

        async fn get_wire(&self) -> Result<WireResponse, WalletError> {
            unimplemented!("not used in keys tests")
        }

        async fn reserve_status(&self, _: &str) -> Result<ReserveStatusResponse, WalletError> {
            unimplemented!("not used in keys tests")
        }

        async fn withdraw(
            &self,
            _: &str,
            _: &WithdrawRequest,
        ) -> Result<WithdrawResponse, WalletError> {
            unimplemented!("not used in keys tests")
        }

        async fn melt(&self, _: &str, _: &MeltRequest) -> Result<MeltResponse, WalletError> {
            unimplemented!("not used in keys tests")
        }

        async fn reveal(&self, _: &str, _: &RevealRequest) -> Result<RevealResponse, WalletError> {
            unimplemented!("not used in keys tests")
        }
    }

    fn keys_response(master: &KeyPair, denoms: Vec<DenomInfo>) -> ExchangeKeysResponse {
        ExchangeKeysResponse {
            master_public_key: hex::encode(master.public.0),
            currency: "EUR".into(),
            denoms,
            recoup: Vec::new(),
        }
    }

    fn test_db() -> Db {
        Db::new(Box::new(MemoryBackend::new(&schema())))
    }

    const BASE: &str = "https://exchange.test/";

    #[tokio::test]
    async fn valid_denominations_are_ingested_and_verified() {
        let db = test_db();
        let master = master();
        let exchange = StubExchange {
            response: Mutex::new(keys_response(
                &master,
                vec![signed_info(&master, 1, "EUR:5"), signed_info(&master, 2, "EUR:1")],
            )),
        };
        update_exchange_keys(&db, &exchange, BASE).await.unwrap();

        let denoms: Vec<DenominationRecord> = db
            .read()
            .unwrap()
            .get_by_index("by_exchange", BASE.as_bytes())
            .unwrap();
        assert_eq!(denoms.len(), 2);
        assert!(denoms
            .iter()
            .all(|d| d.status == DenominationStatus::VerifiedGood && d.is_offered));

        let ex: ExchangeRecord = db.read().unwrap().get(BASE.as_bytes()).unwrap().unwrap();
        assert_eq!(ex.currency, "EUR");
        assert_eq!(ex.master_pub, master.public);
    }

    #[tokio::test]
    async fn tampered_signature_is_verified_bad_forever() {
        let db = test_db();
        let master = master();
        let mut info = signed_info(&master, 1, "EUR:5");
        let good_sig = info.master_sig.clone();
        // Fee tampered after signing: the statement no longer matches.
        info.fee_withdraw = amt("EUR:0");
        let exchange = StubExchange {
            response: Mutex::new(keys_response(&master, vec![info.clone()])),
        };
        update_exchange_keys(&db, &exchange, BASE).await.unwrap();

        let denoms: Vec<DenominationRecord> = db
            .read()
            .unwrap()
            .get_by_index("by_exchange", BASE.as_bytes())
            .unwrap();
        assert_eq!(denoms[0].status, DenominationStatus::VerifiedBad);

        // The exchange later serves the untampered version; the verdict
        // is already settled and the denomination stays excluded.
        let mut fixed = signed_info(&master, 1, "EUR:5");
        fixed.master_sig = good_sig;
        *exchange.response.lock().unwrap() = keys_response(&master, vec![fixed]);
        update_exchange_keys(&db, &exchange, BASE).await.unwrap();
        let denoms: Vec<DenominationRecord> = db
            .read()
            .unwrap()
            .get_by_index("by_exchange", BASE.as_bytes())
            .unwrap();
        assert_eq!(denoms[0].status, DenominationStatus::VerifiedBad);
    }

    #[tokio::test]
    async fn delisted_denomination_stops_being_offered() {
        let db = test_db();
        let master = master();
        let exchange = StubExchange {
            response: Mutex::new(keys_response(
                &master,
                vec![signed_info(&master, 1, "EUR:5"), signed_info(&master, 2, "EUR:1")],
            )),
        };
        update_exchange_keys(&db, &exchange, BASE).await.unwrap();

        *exchange.response.lock().unwrap() =
            keys_response(&master, vec![signed_info(&master, 2, "EUR:1")]);
        update_exchange_keys(&db, &exchange, BASE).await.unwrap();

        let denoms: Vec<DenominationRecord> = db
            .read()
            .unwrap()
            .get_by_index("by_exchange", BASE.as_bytes())
            .unwrap();
        assert_eq!(denoms.len(), 2);
        let five = denoms.iter().find(|d| d.value == amt("EUR:5")).unwrap();
        let one = denoms.iter().find(|d| d.value == amt("EUR:1")).unwrap();
        assert!(!five.is_offered);
        assert!(one.is_offered);
    }

    #[tokio::test]
    async fn recoup_list_marks_denominations_revoked() {
        let db = test_db();
        let master = master();
        let info = signed_info(&master, 1, "EUR:5");
        let hash = hash_denom_pub(&hex::decode(&info.denom_pub).unwrap());
        let mut response = keys_response(&master, vec![info]);
        response.recoup = vec![RevokedDenom {
            denom_pub_hash: hex::encode(hash.as_bytes()),
        }];
        let exchange = StubExchange {
            response: Mutex::new(response),
        };
        update_exchange_keys(&db, &exchange, BASE).await.unwrap();

        let denoms: Vec<DenominationRecord> = db
            .read()
            .unwrap()
            .get_by_index("by_exchange", BASE.as_bytes())
            .unwrap();
        assert!(denoms[0].is_revoked);
        // Revoked but still verified: the key itself is authentic.
        assert_eq!(denoms[0].status, DenominationStatus::VerifiedGood);
    }

    #[tokio::test]
    async fn changed_master_key_is_rejected() {
        let db = test_db();
        let master = master();
        let exchange = StubExchange {
            response: Mutex::new(keys_response(&master, vec![])),
        };
        update_exchange_keys(&db, &exchange, BASE).await.unwrap();

        let other = keypair_from_seed(&[51u8; 32]);
        *exchange.response.lock().unwrap() = keys_response(&other, vec![]);
        let err = update_exchange_keys(&db, &exchange, BASE).await.unwrap_err();
        assert!(matches!(err, WalletError::ProtocolViolation(_)));
    }
}
