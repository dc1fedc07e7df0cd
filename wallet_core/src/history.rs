//! Reserve history reconciliation.
//!
//! The wallet keeps a local model of the reserve history (expected
//! credits and withdrawals, plus entries already confirmed by the
//! exchange) and reconciles it against the remote history on every
//! status poll. Matching is three-phase: re-match entries that were
//! already confirmed, pair unmatched local expectations with unmatched
//! remote transactions, then adopt remaining remote transactions as new
//! local entries. A previously confirmed entry that the exchange no
//! longer reports is a fatal inconsistency.

use veil_types::records::{ReserveHistoryItem, ReserveTransaction};
use veil_types::Amount;

use crate::error::WalletError;

/// Result of reconciling local and remote reserve history.
#[derive(Debug)]
pub struct ReconcileResult {
    pub updated_history: Vec<ReserveHistoryItem>,
    pub new_added: usize,
    pub new_matched: usize,
}

/// Totals computed from the wallet's view of the reserve history.
#[derive(Clone, Debug, PartialEq)]
pub struct ReserveHistorySummary {
    /// Balance the exchange should report.
    pub computed_balance: Amount,
    /// Balance still available for withdrawal after subtracting
    /// withdrawals we expect but the exchange has not confirmed yet.
    pub unclaimed_amount: Amount,
    /// Credits we still expect to arrive.
    pub awaited_amount: Amount,
    /// Total of confirmed withdrawals.
    pub withdrawn_amount: Amount,
}

/// Equality of two remote transactions by their type-specific key.
fn is_remote_match(a: &ReserveTransaction, b: &ReserveTransaction) -> bool {
    match (a, b) {
        (
            ReserveTransaction::Credit {
                wire_reference: w1, ..
            },
            ReserveTransaction::Credit {
                wire_reference: w2, ..
            },
        ) => w1 == w2,
        (
            ReserveTransaction::Withdraw {
                h_coin_envelope: h1,
                ..
            },
            ReserveTransaction::Withdraw {
                h_coin_envelope: h2,
                ..
            },
        ) => h1 == h2,
        (
            ReserveTransaction::Recoup {
                coin_pub: c1,
                timestamp: t1,
                ..
            },
            ReserveTransaction::Recoup {
                coin_pub: c2,
                timestamp: t2,
                ..
            },
        ) => c1 == c2 && t1 == t2,
        (
            ReserveTransaction::Closing { wtid: w1, .. },
            ReserveTransaction::Closing { wtid: w2, .. },
        ) => w1 == w2,
        _ => false,
    }
}

/// Whether an unmatched local expectation is satisfied by a remote
/// transaction. Withdrawals match on the envelope hash; credits and
/// recoups on the expected amount.
fn is_local_remote_match(local: &ReserveHistoryItem, remote: &ReserveTransaction) -> bool {
    match (local, remote) {
        (
            ReserveHistoryItem::Credit {
                expected_amount: Some(expected),
                ..
            },
            ReserveTransaction::Credit { amount, .. },
        ) => expected == amount,
        (
            ReserveHistoryItem::Withdraw {
                expected_coin_ev_hash: Some(ev_hash),
                ..
            },
            ReserveTransaction::Withdraw {
                h_coin_envelope, ..
            },
        ) => ev_hash == h_coin_envelope,
        (
            ReserveHistoryItem::Withdraw {
                expected_coin_ev_hash: None,
                expected_amount: Some(expected),
                ..
            },
            ReserveTransaction::Withdraw { amount, .. },
        ) => expected == amount,
        (
            ReserveHistoryItem::Recoup {
                expected_amount: Some(expected),
                ..
            },
            ReserveTransaction::Recoup { amount, .. },
        ) => expected == amount,
        _ => false,
    }
}

fn matched_transaction(item: &ReserveHistoryItem) -> Option<&ReserveTransaction> {
    match item {
        ReserveHistoryItem::Credit { matched, .. }
        | ReserveHistoryItem::Withdraw { matched, .. }
        | ReserveHistoryItem::Recoup { matched, .. }
        | ReserveHistoryItem::Closing { matched } => matched.as_ref(),
    }
}

fn set_matched(item: &mut ReserveHistoryItem, tx: ReserveTransaction) {
    match item {
        ReserveHistoryItem::Credit { matched, .. }
        | ReserveHistoryItem::Withdraw { matched, .. }
        | ReserveHistoryItem::Recoup { matched, .. }
        | ReserveHistoryItem::Closing { matched } => *matched = Some(tx),
    }
}

fn adopt_remote(tx: &ReserveTransaction) -> ReserveHistoryItem {
    match tx {
        ReserveTransaction::Credit { .. } => ReserveHistoryItem::Credit {
            expected_amount: None,
            matched: Some(tx.clone()),
        },
        ReserveTransaction::Withdraw { .. } => ReserveHistoryItem::Withdraw {
            expected_amount: None,
            expected_coin_ev_hash: None,
            matched: Some(tx.clone()),
        },
        ReserveTransaction::Recoup { .. } => ReserveHistoryItem::Recoup {
            expected_amount: None,
            matched: Some(tx.clone()),
        },
        ReserveTransaction::Closing { .. } => ReserveHistoryItem::Closing {
            matched: Some(tx.clone()),
        },
    }
}

/// Reconcile the wallet's local reserve history with the exchange's.
pub fn reconcile_reserve_history(
    local_history: &[ReserveHistoryItem],
    remote_history: &[ReserveTransaction],
) -> Result<ReconcileResult, WalletError> {
    let mut updated: Vec<ReserveHistoryItem> = local_history.to_vec();
    let mut remote_used = vec![false; remote_history.len()];
    let mut local_used = vec![false; local_history.len()];
    let mut new_matched = 0;
    let mut new_added = 0;

    // Phase 1: entries already confirmed must still be present remotely.
    for (ri, remote) in remote_history.iter().enumerate() {
        for (li, local) in updated.iter().enumerate() {
            if local_used[li] {
                continue;
            }
            let Some(confirmed) = matched_transaction(local) else {
                continue;
            };
            if is_remote_match(remote, confirmed) {
                local_used[li] = true;
                remote_used[ri] = true;
                break;
            }
        }
    }
    for (li, local) in updated.iter().enumerate() {
        if !local_used[li] && matched_transaction(local).is_some() {
            return Err(WalletError::Internal(
                "previously matched reserve history item now unmatched".into(),
            ));
        }
    }

    // Phase 2: pair local expectations with unmatched remote entries.
    for (li, local) in updated.iter_mut().enumerate() {
        if local_used[li] {
            continue;
        }
        for (ri, remote) in remote_history.iter().enumerate() {
            if remote_used[ri] {
                continue;
            }
            if is_local_remote_match(local, remote) {
                local_used[li] = true;
                remote_used[ri] = true;
                set_matched(local, remote.clone());
                new_matched += 1;
                break;
            }
        }
    }

    // Phase 3: remaining remote entries become new local items.
    for (ri, remote) in remote_history.iter().enumerate() {
        if !remote_used[ri] {
            updated.push(adopt_remote(remote));
            new_added += 1;
        }
    }

    Ok(ReconcileResult {
        updated_history: updated,
        new_added,
        new_matched,
    })
}

fn tx_amount(tx: &ReserveTransaction) -> &Amount {
    match tx {
        ReserveTransaction::Credit { amount, .. }
        | ReserveTransaction::Withdraw { amount, .. }
        | ReserveTransaction::Recoup { amount, .. }
        | ReserveTransaction::Closing { amount, .. } => amount,
    }
}

/// Compute totals for the wallet's view of the reserve history.
pub fn summarize_reserve_history(
    local_history: &[ReserveHistoryItem],
    currency: &str,
) -> Result<ReserveHistorySummary, WalletError> {
    let zero = Amount::zero(currency.to_string());
    let mut pos = zero.clone();
    let mut neg = zero.clone();
    let mut expected_pos = zero.clone();
    let mut expected_neg = zero.clone();
    let mut withdrawn = zero.clone();

    for item in local_history {
        match item {
            ReserveHistoryItem::Credit {
                expected_amount,
                matched,
            } => {
                if let Some(tx) = matched {
                    pos = pos.add(tx_amount(tx)).amount;
                } else if let Some(expected) = expected_amount {
                    expected_pos = expected_pos.add(expected).amount;
                }
            }
            ReserveHistoryItem::Recoup {
                expected_amount,
                matched,
            } => {
                if let Some(tx) = matched {
                    pos = pos.add(tx_amount(tx)).amount;
                } else if let Some(expected) = expected_amount {
                    expected_pos = expected_pos.add(expected).amount;
                }
            }
            ReserveHistoryItem::Withdraw {
                expected_amount,
                matched,
                ..
            } => {
                if let Some(tx) = matched {
                    neg = neg.add(tx_amount(tx)).amount;
                    withdrawn = withdrawn.add(tx_amount(tx)).amount;
                } else if let Some(expected) = expected_amount {
                    expected_neg = expected_neg.add(expected).amount;
                } else {
                    return Err(WalletError::Internal(
                        "withdraw history item carries neither match nor expectation".into(),
                    ));
                }
            }
            ReserveHistoryItem::Closing { matched } => {
                let Some(tx) = matched else {
                    return Err(WalletError::Internal(
                        "closing history item without matched transaction".into(),
                    ));
                };
                neg = neg.add(tx_amount(tx)).amount;
            }
        }
    }

    Ok(ReserveHistorySummary {
        computed_balance: pos.sub(&neg).amount,
        unclaimed_amount: pos.sub(&neg).amount.sub(&expected_neg).amount,
        awaited_amount: expected_pos.sub(&expected_neg).amount,
        withdrawn_amount: withdrawn,
    })
}
