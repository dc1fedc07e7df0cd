//! Withdrawal: denomination selection and the per-group driver.
//!
//! A withdrawal group covers one reserve-draining episode. The driver
//! fans out over the group's coin slots; every slot is independently
//! retryable and re-running a half-finished group only does the
//! remaining work. Planchets derive deterministically from the group
//! seed, so a re-derived slot always produces the same envelope.

use std::cmp::Ordering;

use tracing::{debug, info, warn};

use veil_crypto::blind::{unblind, verify_unblinded};
use veil_crypto::planchet::create_withdraw_planchet;
use veil_store::entities::{denomination_key, planchet_key};
use veil_store::{Db, TxAction};
use veil_types::records::{
    CoinRecord, DenomSelItem, DenomSelection, DenominationRecord, PlanchetRecord,
    ReserveHistoryItem, ReserveRecord, WithdrawalGroupRecord,
};
use veil_types::{Amount, CoinSource, CoinStatus, Timestamp, WalletParams};

use crate::client::{ExchangeApi, WithdrawRequest};
use crate::error::WalletError;

/// Whether a denomination can be used for withdrawal right now. A
/// safety margin keeps us from selecting keys about to expire.
pub fn is_withdrawable_denom(denom: &DenominationRecord, now: Timestamp, margin_secs: u64) -> bool {
    if !denom.status.is_usable() || !denom.is_offered || denom.is_revoked {
        return false;
    }
    let latest_start = now.saturating_add_secs(margin_secs);
    denom.stamp_start <= now && latest_start < denom.stamp_expire_withdraw
}

/// Denominations picked for one withdrawal, with repetition.
#[derive(Clone, Debug)]
pub struct WithdrawDenomList {
    pub selected: Vec<DenominationRecord>,
    pub total_coin_value: Amount,
    pub total_withdraw_cost: Amount,
}

/// Greedily pack the largest withdrawable denominations whose value
/// plus withdraw fee fits into `amount_available`.
///
/// The iteration cap bounds pathological denomination sets; it is an
/// arbitrary per-withdrawal coin limit.
pub fn get_withdraw_denom_list(
    amount_available: &Amount,
    denoms: &[DenominationRecord],
) -> WithdrawDenomList {
    let params = WalletParams::default();
    let now = Timestamp::now();
    let mut usable: Vec<&DenominationRecord> = denoms
        .iter()
        .filter(|d| is_withdrawable_denom(d, now, params.withdraw_safety_margin_secs))
        .collect();
    usable.sort_by(|a, b| b.value.cmp_value(&a.value));

    let mut remaining = amount_available.clone();
    let mut selected = Vec::new();
    let mut total_coin_value = Amount::zero(amount_available.currency.clone());
    let mut total_withdraw_cost = Amount::zero(amount_available.currency.clone());

    for _ in 0..params.denom_selection_iteration_cap {
        let mut found = false;
        for d in &usable {
            let cost = d.value.add(&d.fee_withdraw).amount;
            if remaining.cmp_value(&cost) == Ordering::Less {
                continue;
            }
            remaining = remaining.sub(&cost).amount;
            total_coin_value = total_coin_value.add(&d.value).amount;
            total_withdraw_cost = total_withdraw_cost.add(&cost).amount;
            selected.push((*d).clone());
            found = true;
            break;
        }
        if !found {
            break;
        }
    }

    WithdrawDenomList {
        selected,
        total_coin_value,
        total_withdraw_cost,
    }
}

/// Collapse a selection into the stored `(denom hash, count)` form.
pub fn to_denom_selection(list: &WithdrawDenomList) -> DenomSelection {
    let mut items: Vec<DenomSelItem> = Vec::new();
    for d in &list.selected {
        match items.iter_mut().find(|i| i.denom_pub_hash == d.denom_pub_hash) {
            Some(item) => item.count += 1,
            None => items.push(DenomSelItem {
                denom_pub_hash: d.denom_pub_hash,
                count: 1,
            }),
        }
    }
    DenomSelection {
        selected: items,
        total_coin_value: list.total_coin_value.clone(),
        total_withdraw_cost: list.total_withdraw_cost.clone(),
    }
}

/// Flat (slot index, denom hash) view of a stored selection.
fn slots_of(sel: &DenomSelection) -> Vec<(u32, veil_types::HashCode)> {
    let mut slots = Vec::new();
    let mut idx = 0u32;
    for item in &sel.selected {
        for _ in 0..item.count {
            slots.push((idx, item.denom_pub_hash));
            idx += 1;
        }
    }
    slots
}

/// Ensure the slot's planchet exists, deriving and persisting it if
/// needed, and registering the expected withdraw in the reserve history.
fn ensure_planchet(
    db: &Db,
    group: &WithdrawalGroupRecord,
    coin_idx: u32,
    denom_pub_hash: &veil_types::HashCode,
) -> Result<PlanchetRecord, WalletError> {
    db.with_write(|tx| {
        if let Some(existing) =
            tx.get::<PlanchetRecord>(&planchet_key(&group.withdrawal_group_id, coin_idx))?
        {
            return Ok(TxAction::Abort(Ok(existing)));
        }
        let Some(denom) = tx.get::<DenominationRecord>(&denomination_key(
            &group.exchange_base_url,
            denom_pub_hash.as_bytes(),
        ))?
        else {
            return Ok(TxAction::Abort(Err(WalletError::Internal(format!(
                "withdrawal group {} references unknown denomination",
                group.withdrawal_group_id
            )))));
        };
        let Some(mut reserve) = tx.get::<ReserveRecord>(&group.reserve_pub.0)? else {
            return Ok(TxAction::Abort(Err(WalletError::Internal(format!(
                "withdrawal group {} references unknown reserve",
                group.withdrawal_group_id
            )))));
        };

        let planchet = match create_withdraw_planchet(
            &group.secret_seed,
            coin_idx,
            &denom.denom_pub,
            &denom.value,
            &denom.fee_withdraw,
            &group.reserve_pub,
            &reserve.reserve_priv.to_private(),
        ) {
            Ok(p) => p,
            Err(e) => return Ok(TxAction::Abort(Err(e.into()))),
        };
        let record = PlanchetRecord {
            withdrawal_group_id: group.withdrawal_group_id.clone(),
            coin_idx,
            coin_pub: planchet.coin_pub,
            coin_priv: planchet.coin_priv.clone(),
            blinding_seed: planchet.blinding_seed.clone(),
            denom_pub_hash: denom.denom_pub_hash,
            coin_ev: planchet.coin_ev.clone(),
            coin_ev_hash: planchet.coin_ev_hash,
            withdraw_sig: planchet.withdraw_sig,
            withdrawal_done: false,
        };
        tx.put(&record)?;

        // The reserve history expects this withdrawal; reconciliation
        // matches it by envelope hash.
        reserve.history.push(ReserveHistoryItem::Withdraw {
            expected_amount: Some(planchet.amount_with_fee.clone()),
            expected_coin_ev_hash: Some(hex::encode(planchet.coin_ev_hash.as_bytes())),
            matched: None,
        });
        tx.put(&reserve)?;

        Ok(TxAction::Commit(Ok(record)))
    })?
}

/// Withdraw one slot: submit the envelope, unblind, persist the coin.
/// No-op when the slot is already done.
async fn process_planchet<C: ExchangeApi + Sync>(
    db: &Db,
    client: &C,
    group: &WithdrawalGroupRecord,
    coin_idx: u32,
    denom_pub_hash: &veil_types::HashCode,
) -> Result<(), WalletError> {
    let planchet = ensure_planchet(db, group, coin_idx, denom_pub_hash)?;
    if planchet.withdrawal_done {
        return Ok(());
    }

    let denom = db
        .read()?
        .get::<DenominationRecord>(&denomination_key(
            &group.exchange_base_url,
            denom_pub_hash.as_bytes(),
        ))?
        .ok_or_else(|| WalletError::Internal("denomination vanished".into()))?;

    let req = WithdrawRequest {
        denom_pub_hash: hex::encode(planchet.denom_pub_hash.as_bytes()),
        coin_ev: hex::encode(&planchet.coin_ev),
        reserve_sig: hex::encode(planchet.withdraw_sig.0),
    };
    let reserve_pub_hex = hex::encode(group.reserve_pub.0);
    let response = client.withdraw(&reserve_pub_hex, &req).await?;

    let blinded_sig = hex::decode(&response.ev_sig)
        .map_err(|e| WalletError::ProtocolViolation(format!("ev_sig not hex: {e}")))?;
    let denom_sig = unblind(&blinded_sig, &planchet.blinding_seed)?;
    if !verify_unblinded(
        veil_crypto::hash_coin_pub(&planchet.coin_pub).as_bytes(),
        &denom_sig,
        &denom.denom_pub,
    ) {
        return Err(WalletError::InvalidSignature(format!(
            "exchange returned bad signature for slot {coin_idx} of group {}",
            group.withdrawal_group_id
        )));
    }

    // Coin insertion and slot completion must be one transaction.
    db.with_write(|tx| {
        let Some(mut stored) =
            tx.get::<PlanchetRecord>(&planchet_key(&group.withdrawal_group_id, coin_idx))?
        else {
            return Ok(TxAction::Abort(()));
        };
        if stored.withdrawal_done {
            // Another driver finished this slot concurrently.
            return Ok(TxAction::Abort(()));
        }
        stored.withdrawal_done = true;
        tx.put(&stored)?;
        tx.put(&CoinRecord {
            coin_pub: stored.coin_pub,
            coin_priv: stored.coin_priv.clone(),
            exchange_base_url: group.exchange_base_url.clone(),
            denom_pub_hash: stored.denom_pub_hash,
            denom_sig: denom_sig.clone(),
            blinding_seed: stored.blinding_seed.clone(),
            current_amount: denom.value.clone(),
            status: CoinStatus::Fresh,
            coin_source: CoinSource::Withdraw {
                reserve_pub: group.reserve_pub,
                coin_index: coin_idx,
            },
        })?;
        Ok(TxAction::Commit(()))
    })?;
    debug!(group = %group.withdrawal_group_id, slot = coin_idx, "coin withdrawn");
    Ok(())
}

/// Drive a withdrawal group until every slot's coin is persisted.
pub async fn process_withdrawal_group<C: ExchangeApi + Sync>(
    db: &Db,
    client: &C,
    withdrawal_group_id: &str,
) -> Result<(), WalletError> {
    let Some(group) = db
        .read()?
        .get::<WithdrawalGroupRecord>(withdrawal_group_id.as_bytes())?
    else {
        warn!(group = withdrawal_group_id, "withdrawal group not found");
        return Ok(());
    };
    if group.timestamp_finish.is_some() {
        return Ok(());
    }

    let slots = slots_of(&group.denoms_sel);
    let mut first_error: Option<WalletError> = None;
    for (coin_idx, denom_pub_hash) in &slots {
        // One failing slot must not block the others.
        if let Err(e) = process_planchet(db, client, &group, *coin_idx, denom_pub_hash).await {
            if first_error.is_none() {
                first_error = Some(e);
            }
        }
    }
    if let Some(e) = first_error {
        return Err(e);
    }

    // All slots reported success; mark the group finished.
    db.with_write(|tx| {
        let Some(mut group) = tx.get::<WithdrawalGroupRecord>(withdrawal_group_id.as_bytes())?
        else {
            return Ok(TxAction::Abort(()));
        };
        let all_done = (0..slots.len() as u32).try_fold(true, |acc, idx| {
            Ok::<_, veil_store::StoreError>(
                acc && tx
                    .get::<PlanchetRecord>(&planchet_key(withdrawal_group_id, idx))?
                    .map(|p| p.withdrawal_done)
                    .unwrap_or(false),
            )
        })?;
        if !all_done {
            return Ok(TxAction::Abort(()));
        }
        group.timestamp_finish = Some(Timestamp::now());
        tx.put(&group)?;
        Ok(TxAction::Commit(()))
    })?;
    info!(group = withdrawal_group_id, coins = slots.len(), "withdrawal group finished");
    Ok(())
}
