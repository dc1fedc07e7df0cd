//! The wallet facade: owns the store, the HTTP clients and the pending
//! operation scheduler.
//!
//! All long-running work is retry-driven: reserves, withdrawal groups
//! and refresh groups each carry a `RetryInfo`, and `process_pending`
//! runs whatever is due. Failures are recorded on the entity and pushed
//! out with exponential backoff; they never abort the loop. Concurrent
//! triggers for the same entity share one in-flight operation.

use std::sync::Arc;

use tracing::{debug, warn};

use veil_store::Db;
use veil_store::TxAction;
use veil_types::records::{
    CoinRecord, DenominationRecord, RefreshGroupRecord, ReserveRecord, WithdrawalGroupRecord,
};
use veil_types::{Amount, PublicKey, WalletParams};

use crate::client::{BankApi, ExchangeApi};
use crate::denominations::update_exchange_keys;
use crate::error::WalletError;
use crate::history::summarize_reserve_history;
use crate::memo::OpMemo;
use crate::pay::{select_pay_coins, CoinWithDenom, PaySelection};
use crate::refresh::process_refresh_group;
use crate::reserves::{create_reserve, process_reserve};
use crate::withdraw::process_withdrawal_group;

/// Key identifying one pending operation for deduplication.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum PendingKey {
    Reserve(PublicKey),
    WithdrawalGroup(String),
    RefreshGroup(String),
}

/// What one `process_pending` pass did.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PendingReport {
    pub processed: usize,
    pub failed: usize,
}

/// Spendable and expected funds, in the wallet's currency.
#[derive(Clone, Debug, PartialEq)]
pub struct Balance {
    /// Sum of all fresh coins.
    pub available: Amount,
    /// Funds sitting in reserves that withdrawal has not turned into
    /// coins yet.
    pub pending_incoming: Amount,
}

struct WalletInner<C, B> {
    db: Arc<Db>,
    exchange: C,
    bank: B,
    exchange_base_url: String,
    currency: String,
    params: WalletParams,
    memo: OpMemo<PendingKey>,
}

pub struct Wallet<C, B> {
    inner: Arc<WalletInner<C, B>>,
}

impl<C, B> Clone for Wallet<C, B> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C, B> Wallet<C, B>
where
    C: ExchangeApi + Send + Sync + 'static,
    B: BankApi + Send + Sync + 'static,
{
    pub fn new(
        db: Arc<Db>,
        exchange: C,
        bank: B,
        exchange_base_url: impl Into<String>,
        currency: impl Into<String>,
        params: WalletParams,
    ) -> Self {
        Self {
            inner: Arc::new(WalletInner {
                db,
                exchange,
                bank,
                exchange_base_url: exchange_base_url.into(),
                currency: currency.into(),
                params,
                memo: OpMemo::new(),
            }),
        }
    }

    pub fn db(&self) -> &Db {
        &self.inner.db
    }

    pub fn params(&self) -> &WalletParams {
        &self.inner.params
    }

    /// Refresh the local view of the exchange's keys and denominations.
    pub async fn update_keys(&self) -> Result<(), WalletError> {
        update_exchange_keys(
            &self.inner.db,
            &self.inner.exchange,
            &self.inner.exchange_base_url,
        )
        .await
    }

    /// Start a withdrawal of `instructed_amount`. With a bank status URL
    /// the bank-integrated flow runs; otherwise the caller wires funds
    /// to the exchange manually.
    pub fn create_reserve(
        &self,
        instructed_amount: Amount,
        bank_withdraw_status_url: Option<String>,
    ) -> Result<PublicKey, WalletError> {
        create_reserve(
            &self.inner.db,
            &self.inner.exchange_base_url,
            &self.inner.currency,
            instructed_amount,
            bank_withdraw_status_url,
            &self.inner.params,
        )
    }

    /// Select coins for a payment of `amount` under the merchant's
    /// deposit fee limit.
    pub fn select_coins(
        &self,
        amount: &Amount,
        deposit_fee_limit: &Amount,
    ) -> Result<PaySelection, WalletError> {
        let read = self.inner.db.read()?;
        let denoms: Vec<DenominationRecord> =
            read.get_by_index("by_exchange", self.inner.exchange_base_url.as_bytes())?;
        let coins: Vec<CoinRecord> =
            read.get_by_index("by_exchange", self.inner.exchange_base_url.as_bytes())?;
        let mut candidates = Vec::new();
        let mut available = Amount::zero(amount.currency.clone());
        for coin in coins {
            if !coin.status.is_spendable() {
                continue;
            }
            available = available.add(&coin.current_amount).amount;
            let Some(denom) = denoms
                .iter()
                .find(|d| d.denom_pub_hash == coin.denom_pub_hash)
            else {
                continue;
            };
            candidates.push(CoinWithDenom {
                coin,
                denom: denom.clone(),
            });
        }
        select_pay_coins(&denoms, &candidates, amount, deposit_fee_limit).ok_or(
            WalletError::InsufficientBalance {
                needed: amount.to_string(),
                available: available.to_string(),
            },
        )
    }

    /// Current balance: fresh coins plus funds still inside reserves.
    pub fn get_balance(&self) -> Result<Balance, WalletError> {
        let read = self.inner.db.read()?;
        let mut available = Amount::zero(self.inner.currency.clone());
        for coin in read.iter::<CoinRecord>()? {
            if coin.status.is_spendable() {
                available = available.add(&coin.current_amount).amount;
            }
        }
        let mut pending = Amount::zero(self.inner.currency.clone());
        for reserve in read.iter::<ReserveRecord>()? {
            if !reserve.status.is_pending() {
                continue;
            }
            let summary = summarize_reserve_history(&reserve.history, &reserve.currency)?;
            pending = pending
                .add(&summary.unclaimed_amount)
                .amount
                .add(&summary.awaited_amount)
                .amount;
        }
        Ok(Balance {
            available,
            pending_incoming: pending,
        })
    }

    /// Everything with a due retry schedule, most overdue first.
    fn due_work(&self, now_ms: u64) -> Result<Vec<(PendingKey, u64)>, WalletError> {
        let read = self.inner.db.read()?;
        let mut work = Vec::new();
        for r in read.iter::<ReserveRecord>()? {
            if r.status.is_pending() && r.retry_info.is_due(now_ms) {
                work.push((PendingKey::Reserve(r.reserve_pub), r.retry_info.next_retry_ms));
            }
        }
        for g in read.iter::<WithdrawalGroupRecord>()? {
            if g.timestamp_finish.is_none() && g.retry_info.is_due(now_ms) {
                work.push((
                    PendingKey::WithdrawalGroup(g.withdrawal_group_id),
                    g.retry_info.next_retry_ms,
                ));
            }
        }
        for g in read.iter::<RefreshGroupRecord>()? {
            if g.timestamp_finished.is_none() && g.retry_info.is_due(now_ms) {
                work.push((
                    PendingKey::RefreshGroup(g.refresh_group_id),
                    g.retry_info.next_retry_ms,
                ));
            }
        }
        work.sort_by_key(|(_, due)| *due);
        Ok(work)
    }

    /// Run every due pending operation once. Failures are recorded on
    /// the entity and rescheduled; this method only errors on storage
    /// problems in the loop itself.
    pub async fn process_pending(&self) -> Result<PendingReport, WalletError> {
        let now_ms = veil_utils::time::now_millis();
        let work = self.due_work(now_ms)?;
        let mut report = PendingReport::default();
        for (key, _) in work {
            let inner = self.inner.clone();
            let op_key = key.clone();
            let result = self
                .inner
                .memo
                .run(key.clone(), move || async move {
                    match &op_key {
                        PendingKey::Reserve(reserve_pub) => {
                            process_reserve(
                                &inner.db,
                                &inner.exchange,
                                &inner.bank,
                                reserve_pub,
                                &inner.params,
                            )
                            .await
                        }
                        PendingKey::WithdrawalGroup(id) => {
                            process_withdrawal_group(&inner.db, &inner.exchange, id).await
                        }
                        PendingKey::RefreshGroup(id) => {
                            process_refresh_group(&inner.db, &inner.exchange, id, &inner.params)
                                .await
                        }
                    }
                })
                .await;
            report.processed += 1;
            match result {
                Ok(()) => self.note_success(&key)?,
                Err(e) => {
                    report.failed += 1;
                    self.note_failure(&key, &e)?;
                }
            }
        }
        debug!(processed = report.processed, failed = report.failed, "pending pass done");
        Ok(report)
    }

    fn note_success(&self, key: &PendingKey) -> Result<(), WalletError> {
        let now_ms = veil_utils::time::now_millis();
        let params = self.inner.params.clone();
        self.inner.db.with_write(|tx| {
            match key {
                PendingKey::Reserve(reserve_pub) => {
                    if let Some(mut r) = tx.get::<ReserveRecord>(&reserve_pub.0)? {
                        r.last_error = None;
                        if r.status.is_pending() {
                            r.retry_info.reset(now_ms, &params);
                        } else {
                            r.retry_info.active = false;
                            r.retry_info.update_timeout(now_ms, &params);
                        }
                        tx.put(&r)?;
                    }
                }
                PendingKey::WithdrawalGroup(id) => {
                    if let Some(mut g) = tx.get::<WithdrawalGroupRecord>(id.as_bytes())? {
                        g.last_error = None;
                        if g.timestamp_finish.is_some() {
                            g.retry_info.active = false;
                            g.retry_info.update_timeout(now_ms, &params);
                        } else {
                            g.retry_info.reset(now_ms, &params);
                        }
                        tx.put(&g)?;
                    }
                }
                PendingKey::RefreshGroup(id) => {
                    if let Some(mut g) = tx.get::<RefreshGroupRecord>(id.as_bytes())? {
                        g.last_error = None;
                        if g.timestamp_finished.is_some() {
                            g.retry_info.active = false;
                            g.retry_info.update_timeout(now_ms, &params);
                        } else {
                            g.retry_info.reset(now_ms, &params);
                        }
                        tx.put(&g)?;
                    }
                }
            }
            Ok(TxAction::Commit(()))
        })?;
        Ok(())
    }

    /// Record a failure on the entity: retryable errors back off, fatal
    /// ones deactivate the schedule so the operation is abandoned.
    fn note_failure(&self, key: &PendingKey, error: &WalletError) -> Result<(), WalletError> {
        warn!(?key, %error, retryable = error.is_retryable(), "pending operation failed");
        let now_ms = veil_utils::time::now_millis();
        let params = self.inner.params.clone();
        let retryable = error.is_retryable();
        let message = error.to_string();
        self.inner.db.with_write(|tx| {
            match key {
                PendingKey::Reserve(reserve_pub) => {
                    if let Some(mut r) = tx.get::<ReserveRecord>(&reserve_pub.0)? {
                        r.last_error = Some(message.clone());
                        if retryable {
                            r.retry_info.increment(now_ms, &params);
                        } else {
                            r.retry_info.active = false;
                        }
                        tx.put(&r)?;
                    }
                }
                PendingKey::WithdrawalGroup(id) => {
                    if let Some(mut g) = tx.get::<WithdrawalGroupRecord>(id.as_bytes())? {
                        g.last_error = Some(message.clone());
                        if retryable {
                            g.retry_info.increment(now_ms, &params);
                        } else {
                            g.retry_info.active = false;
                        }
                        tx.put(&g)?;
                    }
                }
                PendingKey::RefreshGroup(id) => {
                    if let Some(mut g) = tx.get::<RefreshGroupRecord>(id.as_bytes())? {
                        g.last_error = Some(message.clone());
                        if retryable {
                            g.retry_info.increment(now_ms, &params);
                        } else {
                            g.retry_info.active = false;
                        }
                        tx.put(&g)?;
                    }
                }
            }
            Ok(TxAction::Commit(()))
        })?;
        Ok(())
    }
}
