//! Reserve lifecycle: creation, bank registration, status polling and
//! the transition into withdrawal.
//!
//! A reserve moves strictly forward through its states; the driver takes
//! as many steps as it can in one call and returns once it has to wait
//! for an external party (bank transfer, exchange credit, withdrawal
//! group completion).

use tracing::{debug, info, warn};

use veil_crypto::{generate_keypair, generate_seed};
use veil_store::{Db, TxAction};
use veil_types::records::{
    DenominationRecord, ReserveRecord, WithdrawalGroupRecord,
};
use veil_types::{Amount, PublicKey, ReserveStatus, RetryInfo, SecretSeed, Timestamp, WalletParams};

use crate::client::{BankApi, ExchangeApi};
use crate::error::WalletError;
use crate::history::{reconcile_reserve_history, summarize_reserve_history};
use crate::withdraw::{get_withdraw_denom_list, to_denom_selection};

/// Create a reserve record for `instructed_amount`. With a bank status
/// URL the reserve starts in the bank-integrated flow; without one the
/// user wires funds manually and we go straight to polling.
pub fn create_reserve(
    db: &Db,
    exchange_base_url: &str,
    currency: &str,
    instructed_amount: Amount,
    bank_withdraw_status_url: Option<String>,
    params: &WalletParams,
) -> Result<PublicKey, WalletError> {
    let keys = generate_keypair();
    let status = if bank_withdraw_status_url.is_some() {
        ReserveStatus::Unconfirmed
    } else {
        ReserveStatus::QueryingStatus
    };
    let record = ReserveRecord {
        reserve_pub: keys.public,
        reserve_priv: SecretSeed(keys.private.0),
        exchange_base_url: exchange_base_url.to_string(),
        currency: currency.to_string(),
        created: Timestamp::now(),
        instructed_amount,
        status,
        bank_withdraw_status_url,
        timestamp_bank_confirmed: None,
        timestamp_reserve_info_posted: None,
        history: Vec::new(),
        retry_info: RetryInfo::new(veil_utils::time::now_millis(), true, params),
        last_error: None,
    };
    db.with_write(|tx| {
        tx.put(&record)?;
        Ok(TxAction::Commit(()))
    })?;
    info!(reserve = %hex::encode(keys.public.0), ?status, "reserve created");
    Ok(keys.public)
}

fn load_reserve(db: &Db, reserve_pub: &PublicKey) -> Result<Option<ReserveRecord>, WalletError> {
    Ok(db.read()?.get(&reserve_pub.0)?)
}

fn store_reserve(db: &Db, reserve: &ReserveRecord) -> Result<(), WalletError> {
    db.with_write(|tx| {
        tx.put(reserve)?;
        Ok(TxAction::Commit(()))
    })?;
    Ok(())
}

/// Register the reserve key with the bank's withdrawal operation.
async fn register_with_bank<B: BankApi + Sync>(
    db: &Db,
    bank: &B,
    mut reserve: ReserveRecord,
) -> Result<(), WalletError> {
    let Some(status_url) = reserve.bank_withdraw_status_url.clone() else {
        return Err(WalletError::Internal(
            "reserve in bank registration without a bank status URL".into(),
        ));
    };
    let reserve_pub_hex = hex::encode(reserve.reserve_pub.0);
    bank.register_reserve(&status_url, &reserve_pub_hex, &reserve.exchange_base_url)
        .await?;
    reserve.timestamp_reserve_info_posted = Some(Timestamp::now());
    reserve.status = ReserveStatus::WaitConfirmBank;
    store_reserve(db, &reserve)
}

/// Poll the bank until the wire transfer is confirmed.
async fn wait_for_bank<B: BankApi + Sync>(
    db: &Db,
    bank: &B,
    mut reserve: ReserveRecord,
) -> Result<bool, WalletError> {
    let Some(status_url) = reserve.bank_withdraw_status_url.clone() else {
        return Err(WalletError::Internal(
            "reserve waiting for bank without a bank status URL".into(),
        ));
    };
    let status = bank.withdrawal_status(&status_url).await?;
    if !status.transfer_done {
        debug!(reserve = %hex::encode(reserve.reserve_pub.0), "bank transfer still pending");
        return Ok(false);
    }
    reserve.timestamp_bank_confirmed = Some(Timestamp::now());
    reserve.status = ReserveStatus::QueryingStatus;
    store_reserve(db, &reserve)?;
    Ok(true)
}

/// Ask the exchange for the reserve status, reconcile histories and, if
/// there is an unclaimed balance, start a withdrawal group for it.
async fn query_reserve<C: ExchangeApi + Sync>(
    db: &Db,
    exchange: &C,
    reserve: ReserveRecord,
    params: &WalletParams,
) -> Result<bool, WalletError> {
    let reserve_pub_hex = hex::encode(reserve.reserve_pub.0);
    let remote = exchange.reserve_status(&reserve_pub_hex).await?;
    let reconciled = reconcile_reserve_history(&reserve.history, &remote.history)?;
    let summary = summarize_reserve_history(&reconciled.updated_history, &reserve.currency)?;
    debug!(
        reserve = %reserve_pub_hex,
        new_matched = reconciled.new_matched,
        new_added = reconciled.new_added,
        balance = %summary.computed_balance,
        unclaimed = %summary.unclaimed_amount,
        "reserve status reconciled"
    );

    if summary.computed_balance != remote.balance {
        // Not actionable by the wallet; keep going with our own numbers
        // but make the discrepancy visible.
        warn!(
            reserve = %reserve_pub_hex,
            computed = %summary.computed_balance,
            reported = %remote.balance,
            "exchange reports a different reserve balance than computed"
        );
    }

    if !summary.unclaimed_amount.is_zero() {
        return start_withdrawal(db, reserve, reconciled.updated_history, &summary.unclaimed_amount, params);
    }

    // Nothing to claim. The reserve is done once nothing is awaited and
    // something has actually happened to it.
    let depleted = summary.awaited_amount.is_zero()
        && summary.computed_balance.is_zero()
        && !reconciled.updated_history.is_empty();
    db.with_write(|tx| {
        let Some(mut stored) = tx.get::<ReserveRecord>(&reserve.reserve_pub.0)? else {
            return Ok(TxAction::Abort(()));
        };
        stored.history = reconciled.updated_history.clone();
        if depleted {
            stored.status = ReserveStatus::Dormant;
            stored.retry_info.active = false;
        }
        tx.put(&stored)?;
        Ok(TxAction::Commit(()))
    })?;
    if depleted {
        info!(reserve = %reserve_pub_hex, "reserve depleted, now dormant");
    }
    Ok(false)
}

/// Create a withdrawal group covering `unclaimed` and move the reserve
/// to `Withdrawing`, all in one transaction.
fn start_withdrawal(
    db: &Db,
    reserve: ReserveRecord,
    updated_history: Vec<veil_types::records::ReserveHistoryItem>,
    unclaimed: &Amount,
    params: &WalletParams,
) -> Result<bool, WalletError> {
    let denoms: Vec<DenominationRecord> = db
        .read()?
        .get_by_index("by_exchange", reserve.exchange_base_url.as_bytes())?;
    let list = get_withdraw_denom_list(unclaimed, &denoms);
    if list.selected.is_empty() {
        warn!(
            reserve = %hex::encode(reserve.reserve_pub.0),
            unclaimed = %unclaimed,
            "no withdrawable denominations fit the unclaimed balance"
        );
        // Persist the reconciled history anyway; retry later in case the
        // exchange offers new denominations.
        let mut stored = reserve;
        stored.history = updated_history;
        store_reserve(db, &stored)?;
        return Ok(false);
    }

    let group = WithdrawalGroupRecord {
        withdrawal_group_id: veil_utils::ids::random_id(),
        reserve_pub: reserve.reserve_pub,
        exchange_base_url: reserve.exchange_base_url.clone(),
        secret_seed: generate_seed(),
        raw_withdrawal_amount: unclaimed.clone(),
        denoms_sel: to_denom_selection(&list),
        timestamp_start: Timestamp::now(),
        timestamp_finish: None,
        retry_info: RetryInfo::new(veil_utils::time::now_millis(), true, params),
        last_error: None,
    };
    let group_id = group.withdrawal_group_id.clone();

    db.with_write(|tx| {
        let Some(mut stored) = tx.get::<ReserveRecord>(&reserve.reserve_pub.0)? else {
            return Ok(TxAction::Abort(()));
        };
        stored.history = updated_history.clone();
        stored.status = ReserveStatus::Withdrawing;
        tx.put(&stored)?;
        tx.put(&group)?;
        Ok(TxAction::Commit(()))
    })?;
    info!(
        reserve = %hex::encode(reserve.reserve_pub.0),
        group = %group_id,
        amount = %unclaimed,
        coins = list.selected.len(),
        "withdrawal group created"
    );
    Ok(true)
}

/// Whether every withdrawal group of this reserve has finished.
fn withdrawal_groups_done(db: &Db, reserve_pub: &PublicKey) -> Result<bool, WalletError> {
    let groups: Vec<WithdrawalGroupRecord> =
        db.read()?.get_by_index("by_reserve", &reserve_pub.0)?;
    Ok(groups.iter().all(|g| g.timestamp_finish.is_some()))
}

/// Advance a reserve as far as possible. Safe to call on any state; a
/// dormant or unknown reserve is a no-op.
pub async fn process_reserve<C, B>(
    db: &Db,
    exchange: &C,
    bank: &B,
    reserve_pub: &PublicKey,
    params: &WalletParams,
) -> Result<(), WalletError>
where
    C: ExchangeApi + Sync,
    B: BankApi + Sync,
{
    loop {
        let Some(reserve) = load_reserve(db, reserve_pub)? else {
            warn!(reserve = %hex::encode(reserve_pub.0), "reserve not found");
            return Ok(());
        };
        match reserve.status {
            ReserveStatus::Unconfirmed => {
                let mut reserve = reserve;
                reserve.status = if reserve.bank_withdraw_status_url.is_some() {
                    ReserveStatus::RegisteringBank
                } else {
                    ReserveStatus::QueryingStatus
                };
                store_reserve(db, &reserve)?;
            }
            ReserveStatus::RegisteringBank => {
                register_with_bank(db, bank, reserve).await?;
            }
            ReserveStatus::WaitConfirmBank => {
                if !wait_for_bank(db, bank, reserve).await? {
                    return Ok(());
                }
            }
            ReserveStatus::QueryingStatus => {
                if !query_reserve(db, exchange, reserve, params).await? {
                    return Ok(());
                }
            }
            ReserveStatus::Withdrawing => {
                if !withdrawal_groups_done(db, reserve_pub)? {
                    return Ok(());
                }
                // All groups drained; poll once more to confirm the
                // reserve is empty and retire it.
                let mut reserve = reserve;
                reserve.status = ReserveStatus::QueryingStatus;
                store_reserve(db, &reserve)?;
            }
            ReserveStatus::Dormant => return Ok(()),
        }
    }
}
