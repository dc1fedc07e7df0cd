//! Coin selection for payments.
//!
//! Greedy selection over the wallet's spendable coins, cheapest deposit
//! fee first, with the merchant's deposit-fee limit as the constraint.
//! The refresh cost of the change left on the last selected coin is
//! added to the reported fees; it is an estimate of a refresh that may
//! never happen with those exact parameters, not a guaranteed cost.

use veil_types::records::{CoinRecord, DenominationRecord};
use veil_types::Amount;

use crate::withdraw::get_withdraw_denom_list;

/// A spendable coin paired with its denomination metadata.
#[derive(Clone, Debug)]
pub struct CoinWithDenom {
    pub coin: CoinRecord,
    pub denom: DenominationRecord,
}

/// Result of coin selection for one payment.
#[derive(Clone, Debug)]
pub struct PaySelection {
    pub coins: Vec<CoinWithDenom>,
    /// Fees the wallet itself bears: deposit fees above the merchant's
    /// limit plus the estimated refresh cost of leftover change.
    pub total_fees: Amount,
}

/// Estimate the amount lost when refreshing `amount_left` remaining on a
/// coin of `refreshed_denom`.
///
/// Zero change refreshes for free; change too small to withdraw any
/// denomination is lost entirely.
pub fn get_total_refresh_cost(
    denoms: &[DenominationRecord],
    refreshed_denom: &DenominationRecord,
    amount_left: &Amount,
) -> Amount {
    let withdraw_amount = amount_left.sub(&refreshed_denom.fee_refresh).amount;
    let withdraw_denoms = get_withdraw_denom_list(&withdraw_amount, denoms);
    let mut resulting = Amount::zero(amount_left.currency.clone());
    for d in &withdraw_denoms.selected {
        resulting = resulting.add(&d.value).amount;
    }
    amount_left.sub(&resulting).amount
}

/// Select coins covering `payment_amount` under `deposit_fee_limit`.
///
/// Candidates are filtered to Fresh coins whose remaining value exceeds
/// their own deposit fee, then sorted by `(deposit fee, denom hash)` so
/// results are deterministic. Selection succeeds once the accumulated
/// value covers the amount within the fee limit, or covers the amount
/// plus the fees the merchant will not pay.
///
/// Returns `None` when no prefix of the sorted candidate list satisfies
/// the constraints.
pub fn select_pay_coins(
    denoms: &[DenominationRecord],
    candidates: &[CoinWithDenom],
    payment_amount: &Amount,
    deposit_fee_limit: &Amount,
) -> Option<PaySelection> {
    if candidates.is_empty() {
        return None;
    }
    let mut sorted: Vec<&CoinWithDenom> = candidates.iter().collect();
    sorted.sort_by(|a, b| {
        a.denom
            .fee_deposit
            .cmp_value(&b.denom.fee_deposit)
            .then_with(|| a.denom.denom_pub_hash.as_bytes().cmp(b.denom.denom_pub_hash.as_bytes()))
    });

    let currency = payment_amount.currency.clone();
    let mut selected: Vec<CoinWithDenom> = Vec::new();
    let mut acc_deposit_fee = Amount::zero(currency.clone());
    let mut acc_amount = Amount::zero(currency.clone());

    for cd in sorted {
        if !cd.coin.status.is_spendable() {
            continue;
        }
        // A coin that cannot cover its own deposit fee never helps.
        if cd.denom.fee_deposit.cmp_value(&cd.coin.current_amount) != std::cmp::Ordering::Less {
            continue;
        }
        selected.push(cd.clone());
        acc_deposit_fee = acc_deposit_fee.add(&cd.denom.fee_deposit).amount;
        // Change that stays on this coin if the payment stops here.
        let still_needed = payment_amount.sub(&acc_amount).amount;
        let mut left_amount = cd.coin.current_amount.sub(&still_needed).amount;
        acc_amount = acc_amount.add(&cd.coin.current_amount).amount;

        let covers_amount = acc_amount.cmp_value(payment_amount) != std::cmp::Ordering::Less;
        let covers_amount_with_fee = acc_amount
            .cmp_value(&payment_amount.add(&cd.denom.fee_deposit).amount)
            != std::cmp::Ordering::Less;
        let is_below_fee =
            acc_deposit_fee.cmp_value(deposit_fee_limit) != std::cmp::Ordering::Greater;

        if (covers_amount && is_below_fee) || covers_amount_with_fee {
            // Fees above the merchant's limit come out of the change.
            let fee_to_cover = acc_deposit_fee.sub(deposit_fee_limit).amount;
            left_amount = left_amount.sub(&fee_to_cover).amount;
            let mut total_fees = fee_to_cover;
            total_fees = total_fees
                .add(&get_total_refresh_cost(denoms, &cd.denom, &left_amount))
                .amount;
            return Some(PaySelection {
                coins: selected,
                total_fees,
            });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use veil_types::{
        CoinSource, CoinStatus, DenominationStatus, HashCode, PublicKey, SecretSeed, Signature,
        Timestamp,
    };

    fn amt(s: &str) -> Amount {
        s.parse().unwrap()
    }

    fn denom(tag: u8, value: &str, fee_deposit: &str) -> DenominationRecord {
        DenominationRecord {
            exchange_base_url: "https://exchange.test/".into(),
            denom_pub: vec![tag; 48],
            denom_pub_hash: HashCode::new([tag; 32]),
            value: amt(value),
            fee_withdraw: amt("EUR:0.01"),
            fee_deposit: amt(fee_deposit),
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

    fn coin(tag: u8, current: &str, d: &DenominationRecord, status: CoinStatus) -> CoinWithDenom {
        CoinWithDenom {
            coin: CoinRecord {
                coin_pub: PublicKey([tag; 32]),
                coin_priv: SecretSeed([tag; 32]),
                exchange_base_url: d.exchange_base_url.clone(),
                denom_pub_hash: d.denom_pub_hash,
                denom_sig: vec![0u8; 96],
                blinding_seed: SecretSeed([tag; 32]),
                current_amount: amt(current),
                status,
                coin_source: CoinSource::Tip,
            },
            denom: d.clone(),
        }
    }

    #[test]
    fn two_coins_cover_target_within_fee_limit() {
        let d_free = denom(1, "EUR:1", "EUR:0");
        let d_fee = denom(2, "EUR:1", "EUR:0.05");
        let candidates = vec![
            coin(1, "EUR:1", &d_fee, CoinStatus::Fresh),
            coin(2, "EUR:1", &d_free, CoinStatus::Fresh),
        ];
        let sel = select_pay_coins(&[], &candidates, &amt("EUR:2"), &amt("EUR:0.05")).unwrap();
        assert_eq!(sel.coins.len(), 2);
        // Fee stays within the merchant's limit and there is no change,
        // so the wallet pays nothing.
        assert!(sel.total_fees.is_zero());
    }

    #[test]
    fn dormant_coins_are_skipped() {
        let d = denom(1, "EUR:2", "EUR:0");
        let candidates = vec![
            coin(1, "EUR:2", &d, CoinStatus::Dormant),
            coin(2, "EUR:2", &d, CoinStatus::Fresh),
        ];
        let sel = select_pay_coins(&[], &candidates, &amt("EUR:2"), &amt("EUR:1")).unwrap();
        assert_eq!(sel.coins.len(), 1);
        assert_eq!(sel.coins[0].coin.coin_pub, PublicKey([2u8; 32]));
    }

    #[test]
    fn coin_below_own_deposit_fee_is_useless() {
        let d = denom(1, "EUR:1", "EUR:0.5");
        let candidates = vec![coin(1, "EUR:0.4", &d, CoinStatus::Fresh)];
        assert!(select_pay_coins(&[], &candidates, &amt("EUR:0.3"), &amt("EUR:1")).is_none());
    }

    #[test]
    fn insufficient_balance_returns_none() {
        let d = denom(1, "EUR:1", "EUR:0");
        let candidates = vec![coin(1, "EUR:1", &d, CoinStatus::Fresh)];
        assert!(select_pay_coins(&[], &candidates, &amt("EUR:5"), &amt("EUR:1")).is_none());
    }

    #[test]
    fn fee_above_limit_is_absorbed_when_value_covers_it() {
        let d = denom(1, "EUR:1", "EUR:0.1");
        let candidates = vec![
            coin(1, "EUR:1", &d, CoinStatus::Fresh),
            coin(2, "EUR:1", &d, CoinStatus::Fresh),
            coin(3, "EUR:1", &d, CoinStatus::Fresh),
        ];
        // Target 1.5, limit 0: wallet must absorb all deposit fees.
        let sel = select_pay_coins(&[], &candidates, &amt("EUR:1.5"), &amt("EUR:0")).unwrap();
        assert_eq!(sel.coins.len(), 2);
        // 0.2 of fees come out of the 0.5 change; no refreshable
        // denominations are configured, so the rest of the change is
        // written off too.
        assert_eq!(sel.total_fees, amt("EUR:0.5"));
    }

    #[test]
    fn cheaper_fee_coins_are_preferred() {
        let d_cheap = denom(1, "EUR:1", "EUR:0.01");
        let d_dear = denom(2, "EUR:1", "EUR:0.2");
        let candidates = vec![
            coin(1, "EUR:1", &d_dear, CoinStatus::Fresh),
            coin(2, "EUR:1", &d_cheap, CoinStatus::Fresh),
        ];
        let sel = select_pay_coins(&[], &candidates, &amt("EUR:1"), &amt("EUR:0.05")).unwrap();
        assert_eq!(sel.coins.len(), 1);
        assert_eq!(sel.coins[0].denom.denom_pub_hash, d_cheap.denom_pub_hash);
    }

    #[test]
    fn refresh_cost_of_zero_change_is_zero() {
        let d = denom(1, "EUR:1", "EUR:0");
        let cost = get_total_refresh_cost(&[d.clone()], &d, &amt("EUR:0"));
        assert!(cost.is_zero());
    }

    #[test]
    fn refresh_cost_counts_unwithdrawable_residue() {
        let d_small = denom(1, "EUR:0.5", "EUR:0");
        let refreshed = denom(2, "EUR:1", "EUR:0");
        // Change 0.7: refresh fee 0.01 leaves 0.69; one 0.5 coin (cost
        // 0.51) fits; 0.18 residue plus fees is lost.
        let cost = get_total_refresh_cost(&[d_small], &refreshed, &amt("EUR:0.7"));
        assert_eq!(cost, amt("EUR:0.2"));
    }

    #[test]
    fn selection_is_deterministic_across_orderings() {
        let d_a = denom(1, "EUR:1", "EUR:0.02");
        let d_b = denom(2, "EUR:1", "EUR:0.02");
        let forward = vec![
            coin(1, "EUR:1", &d_a, CoinStatus::Fresh),
            coin(2, "EUR:1", &d_b, CoinStatus::Fresh),
        ];
        let backward: Vec<_> = forward.iter().rev().cloned().collect();
        let s1 = select_pay_coins(&[], &forward, &amt("EUR:1"), &amt("EUR:0.1")).unwrap();
        let s2 = select_pay_coins(&[], &backward, &amt("EUR:1"), &amt("EUR:0.1")).unwrap();
        assert_eq!(s1.coins[0].coin.coin_pub, s2.coins[0].coin.coin_pub);
    }
}
