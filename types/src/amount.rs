//! Fixed-point currency amounts.
//!
//! Amounts are a `(value, fraction, currency)` triple: whole units plus
//! fractional units of 1e-8. Arithmetic never wraps: overflow and
//! underflow saturate and are reported through a `saturated` flag.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of fractional units per whole unit.
pub const FRACTIONAL_BASE: u32 = 100_000_000;

/// Number of decimal digits needed for the fractional part.
pub const FRACTIONAL_LENGTH: usize = 8;

/// Maximum allowed value field of an amount.
pub const MAX_AMOUNT_VALUE: u64 = 1 << 52;

/// Maximum byte length of a currency code (must fit the 12-byte
/// null-padded wire field).
pub const MAX_CURRENCY_LEN: usize = 11;

/// A non-negative fixed-point amount of one currency.
///
/// Serializes as its canonical string form (`"EUR:1.5"`), which is both
/// the JSON wire representation and the stored representation.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Amount {
    pub currency: String,
    /// Whole units. At most `MAX_AMOUNT_VALUE`.
    pub value: u64,
    /// Fractional units of 1e-8. Normalized amounts keep this below
    /// `FRACTIONAL_BASE`.
    pub fraction: u32,
}

/// Result of a possibly saturating operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AmountResult {
    pub amount: Amount,
    /// Whether the operation over- or underflowed and was clamped.
    pub saturated: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AmountParseError {
    #[error("amount must have the form CURRENCY:VALUE")]
    Malformed,
    #[error("invalid currency code: {0}")]
    InvalidCurrency(String),
    #[error("value exceeds the maximum representable amount")]
    TooLarge,
    #[error("more than {FRACTIONAL_LENGTH} fractional digits")]
    FractionTooPrecise,
}

impl Amount {
    pub fn new(currency: impl Into<String>, value: u64, fraction: u32) -> Self {
        Self {
            currency: currency.into(),
            value,
            fraction,
        }
    }

    /// Zero units of the given currency.
    pub fn zero(currency: impl Into<String>) -> Self {
        Self::new(currency, 0, 0)
    }

    /// The largest representable amount of the given currency.
    pub fn max(currency: impl Into<String>) -> Self {
        Self::new(currency, MAX_AMOUNT_VALUE, FRACTIONAL_BASE - 1)
    }

    pub fn is_zero(&self) -> bool {
        self.value == 0 && self.fraction == 0
    }

    fn assert_same_currency(&self, other: &Amount) {
        // Mixing currencies is a programmer error, not a runtime condition.
        if self.currency != other.currency {
            panic!(
                "mismatched currency: {} and {}",
                self.currency, other.currency
            );
        }
    }

    /// Add `other`, saturating at the maximum amount.
    ///
    /// Panics if the currencies differ.
    pub fn add(&self, other: &Amount) -> AmountResult {
        self.assert_same_currency(other);
        let mut value = self.value.saturating_add(u64::from(self.fraction) / u64::from(FRACTIONAL_BASE));
        let mut fraction = self.fraction % FRACTIONAL_BASE;
        if value > MAX_AMOUNT_VALUE {
            return AmountResult {
                amount: Amount::max(self.currency.clone()),
                saturated: true,
            };
        }
        let f = u64::from(fraction) + u64::from(other.fraction);
        value = value
            .saturating_add(other.value)
            .saturating_add(f / u64::from(FRACTIONAL_BASE));
        fraction = (f % u64::from(FRACTIONAL_BASE)) as u32;
        if value > MAX_AMOUNT_VALUE {
            return AmountResult {
                amount: Amount::max(self.currency.clone()),
                saturated: true,
            };
        }
        AmountResult {
            amount: Amount::new(self.currency.clone(), value, fraction),
            saturated: false,
        }
    }

    /// Sum a non-empty slice of amounts.
    ///
    /// Panics if `amounts` is empty or currencies differ.
    pub fn sum(amounts: &[Amount]) -> AmountResult {
        let (first, rest) = amounts
            .split_first()
            .expect("can't sum zero amounts");
        let mut acc = AmountResult {
            amount: first.clone(),
            saturated: false,
        };
        for a in rest {
            let r = acc.amount.add(a);
            acc = AmountResult {
                amount: r.amount,
                saturated: acc.saturated || r.saturated,
            };
        }
        acc
    }

    /// Subtract `other`, flooring at zero.
    ///
    /// Borrows one whole unit into the fraction when `other.fraction`
    /// exceeds ours. Panics if the currencies differ.
    pub fn sub(&self, other: &Amount) -> AmountResult {
        self.assert_same_currency(other);
        let mut value = self.value;
        let mut fraction = u64::from(self.fraction);

        if fraction < u64::from(other.fraction) {
            if value < 1 {
                return AmountResult {
                    amount: Amount::zero(self.currency.clone()),
                    saturated: true,
                };
            }
            value -= 1;
            fraction += u64::from(FRACTIONAL_BASE);
        }
        fraction -= u64::from(other.fraction);
        if value < other.value {
            return AmountResult {
                amount: Amount::zero(self.currency.clone()),
                saturated: true,
            };
        }
        value -= other.value;

        AmountResult {
            amount: Amount::new(self.currency.clone(), value, fraction as u32),
            saturated: false,
        }
    }

    /// Total-order comparison over normalized amounts.
    ///
    /// Panics if the currencies differ.
    pub fn cmp_value(&self, other: &Amount) -> Ordering {
        self.assert_same_currency(other);
        let av = self.value + u64::from(self.fraction) / u64::from(FRACTIONAL_BASE);
        let af = self.fraction % FRACTIONAL_BASE;
        let bv = other.value + u64::from(other.fraction) / u64::from(FRACTIONAL_BASE);
        let bf = other.fraction % FRACTIONAL_BASE;
        av.cmp(&bv).then(af.cmp(&bf))
    }

    /// Integer division with fractional carry.
    ///
    /// Panics on division by zero.
    pub fn divide(&self, n: u64) -> Amount {
        if n == 0 {
            panic!("division by zero");
        }
        if n == 1 {
            return self.clone();
        }
        let r = self.value % n;
        let fraction =
            ((u128::from(r) * u128::from(FRACTIONAL_BASE) + u128::from(self.fraction)) / u128::from(n)) as u32;
        Amount::new(self.currency.clone(), self.value / n, fraction)
    }

    /// Multiply by a non-negative integer, saturating at the maximum.
    pub fn mult(&self, n: u64) -> AmountResult {
        if n == 0 {
            return AmountResult {
                amount: Amount::zero(self.currency.clone()),
                saturated: false,
            };
        }
        let total_fraction = u128::from(self.fraction) * u128::from(n);
        let carry = total_fraction / u128::from(FRACTIONAL_BASE);
        let fraction = (total_fraction % u128::from(FRACTIONAL_BASE)) as u32;
        let value = u128::from(self.value) * u128::from(n) + carry;
        if value > u128::from(MAX_AMOUNT_VALUE) {
            return AmountResult {
                amount: Amount::max(self.currency.clone()),
                saturated: true,
            };
        }
        AmountResult {
            amount: Amount::new(self.currency.clone(), value as u64, fraction),
            saturated: false,
        }
    }
}

fn valid_currency(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= MAX_CURRENCY_LEN
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'*' || b == b'-')
}

impl FromStr for Amount {
    type Err = AmountParseError;

    /// Parse an amount like `EUR:20.5` (20 euros and 50 cents).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (currency, rest) = s.split_once(':').ok_or(AmountParseError::Malformed)?;
        if !valid_currency(currency) {
            return Err(AmountParseError::InvalidCurrency(currency.to_string()));
        }
        let (value_str, frac_str) = match rest.split_once('.') {
            Some((v, f)) => (v, f),
            None => (rest, ""),
        };
        if value_str.is_empty() || !value_str.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AmountParseError::Malformed);
        }
        let value: u64 = value_str.parse().map_err(|_| AmountParseError::TooLarge)?;
        if value > MAX_AMOUNT_VALUE {
            return Err(AmountParseError::TooLarge);
        }
        let fraction = if frac_str.is_empty() {
            if rest.contains('.') {
                return Err(AmountParseError::Malformed);
            }
            0
        } else {
            if frac_str.len() > FRACTIONAL_LENGTH || !frac_str.bytes().all(|b| b.is_ascii_digit()) {
                return Err(AmountParseError::FractionTooPrecise);
            }
            let digits: u32 = frac_str.parse().map_err(|_| AmountParseError::Malformed)?;
            digits * 10u32.pow((FRACTIONAL_LENGTH - frac_str.len()) as u32)
        };
        Ok(Amount::new(currency, value, fraction))
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let av = self.value + u64::from(self.fraction) / u64::from(FRACTIONAL_BASE);
        let af = self.fraction % FRACTIONAL_BASE;
        write!(f, "{}:{}", self.currency, av)?;
        if af != 0 {
            let mut digits = format!("{:08}", af);
            while digits.ends_with('0') {
                digits.pop();
            }
            write!(f, ".{}", digits)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn amt(s: &str) -> Amount {
        s.parse().unwrap()
    }

    #[test]
    fn parse_and_display_roundtrip() {
        for s in ["EUR:0", "EUR:10", "EUR:0.5", "KUDOS:42.00000001", "USD:1.25"] {
            let a = amt(s);
            let b: Amount = a.to_string().parse().unwrap();
            assert_eq!(a.cmp_value(&b), Ordering::Equal, "{s}");
        }
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!("EUR".parse::<Amount>().is_err());
        assert!("EUR:".parse::<Amount>().is_err());
        assert!("EUR:1.".parse::<Amount>().is_err());
        assert!("EUR:1.123456789".parse::<Amount>().is_err());
        assert!("a currency with spaces:1".parse::<Amount>().is_err());
        assert!("EUR:9007199254740993".parse::<Amount>().is_err());
    }

    #[test]
    fn add_carries_fraction() {
        let r = amt("EUR:0.5").add(&amt("EUR:0.5"));
        assert!(!r.saturated);
        assert_eq!(r.amount, amt("EUR:1"));
    }

    #[test]
    fn add_saturates_at_max() {
        let r = Amount::max("EUR").add(&amt("EUR:1"));
        assert!(r.saturated);
        assert_eq!(r.amount, Amount::max("EUR"));
    }

    #[test]
    fn sub_borrows_whole_unit() {
        let r = amt("EUR:2.1").sub(&amt("EUR:0.5"));
        assert!(!r.saturated);
        assert_eq!(r.amount, amt("EUR:1.6"));
    }

    #[test]
    fn sub_floors_at_zero() {
        let r = amt("EUR:1").sub(&amt("EUR:2"));
        assert!(r.saturated);
        assert!(r.amount.is_zero());

        let r = amt("EUR:0.3").sub(&amt("EUR:0.5"));
        assert!(r.saturated);
        assert!(r.amount.is_zero());
    }

    #[test]
    fn cmp_is_total_order() {
        assert_eq!(amt("EUR:1").cmp_value(&amt("EUR:1")), Ordering::Equal);
        assert_eq!(amt("EUR:1").cmp_value(&amt("EUR:1.5")), Ordering::Less);
        assert_eq!(amt("EUR:2").cmp_value(&amt("EUR:1.99999999")), Ordering::Greater);
        // Denormalized fractions compare by normalized magnitude.
        let denorm = Amount::new("EUR", 0, FRACTIONAL_BASE + 1);
        assert_eq!(denorm.cmp_value(&amt("EUR:1.00000001")), Ordering::Equal);
    }

    #[test]
    #[should_panic(expected = "mismatched currency")]
    fn currency_mismatch_panics() {
        let _ = amt("EUR:1").add(&amt("USD:1"));
    }

    #[test]
    fn divide_carries_remainder() {
        let a = amt("EUR:1").divide(2);
        assert_eq!(a, amt("EUR:0.5"));
        let a = amt("EUR:1").divide(3);
        assert_eq!(a, Amount::new("EUR", 0, 33_333_333));
    }

    #[test]
    fn mult_scales_fraction() {
        let r = amt("EUR:0.5").mult(3);
        assert!(!r.saturated);
        assert_eq!(r.amount, amt("EUR:1.5"));
        assert_eq!(amt("EUR:7").mult(0).amount, amt("EUR:0"));
    }

    #[test]
    fn sum_accumulates() {
        let r = Amount::sum(&[amt("EUR:1"), amt("EUR:2.5"), amt("EUR:0.5")]);
        assert!(!r.saturated);
        assert_eq!(r.amount, amt("EUR:4"));
    }

    proptest! {
        #[test]
        fn add_then_sub_is_identity(
            v1 in 0u64..1_000_000, f1 in 0u32..FRACTIONAL_BASE,
            v2 in 0u64..1_000_000, f2 in 0u32..FRACTIONAL_BASE,
        ) {
            let a = Amount::new("EUR", v1, f1);
            let b = Amount::new("EUR", v2, f2);
            let sum = a.add(&b);
            prop_assert!(!sum.saturated);
            let back = sum.amount.sub(&b);
            prop_assert!(!back.saturated);
            prop_assert_eq!(back.amount.cmp_value(&a), Ordering::Equal);
        }

        #[test]
        fn results_stay_normalized(
            v1 in 0u64..1_000_000, f1 in 0u32..FRACTIONAL_BASE,
            v2 in 0u64..1_000_000, f2 in 0u32..FRACTIONAL_BASE,
        ) {
            let a = Amount::new("EUR", v1, f1);
            let b = Amount::new("EUR", v2, f2);
            prop_assert!(a.add(&b).amount.fraction < FRACTIONAL_BASE);
            prop_assert!(a.sub(&b).amount.fraction < FRACTIONAL_BASE);
        }
    }
}
