use regex::Regex;
use rust_decimal::Decimal;
use std::fmt;
use std::fmt::Display;
use std::str::FromStr;

/// Represents a price-like numeric value in human-readable currency format.
/// Accepts strings like "$0.01", "1,000", or raw numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd)]
pub struct MoneyAmount(pub Decimal);

#[derive(Debug, thiserror::Error)]
pub enum MoneyAmountParseError {
    #[error("Invalid number format")]
    InvalidFormat,
    #[error(
        "Amount must be between {} and {}",
        money_amount::MIN_STR,
        money_amount::MAX_STR
    )]
    OutOfRange,
    #[error("Negative value is not allowed")]
    Negative,
}

mod money_amount {
    use super::*;
    use once_cell::sync::Lazy;

    pub const MIN_STR: &str = "0.000000001";
    pub const MAX_STR: &str = "999999999";

    pub static MIN: Lazy<Decimal> =
        Lazy::new(|| Decimal::from_str(MIN_STR).expect("valid decimal"));
    pub static MAX: Lazy<Decimal> =
        Lazy::new(|| Decimal::from_str(MAX_STR).expect("valid decimal"));
}

impl MoneyAmount {
    pub fn parse(input: &str) -> Result<Self, MoneyAmountParseError> {
        // Remove anything that isn't digit, dot, minus
        let cleaned = Regex::new(r"[^\d\.\-]+")
            .unwrap()
            .replace_all(input, "")
            .to_string();

        let parsed =
            Decimal::from_str(&cleaned).map_err(|_| MoneyAmountParseError::InvalidFormat)?;

        if parsed.is_sign_negative() {
            return Err(MoneyAmountParseError::Negative);
        }

        if parsed < *money_amount::MIN || parsed > *money_amount::MAX {
            return Err(MoneyAmountParseError::OutOfRange);
        }

        Ok(MoneyAmount(parsed))
    }

    pub fn inner(&self) -> Decimal {
        self.0
    }
}

/// Converts a decimal currency amount to atomic token units for a mint with
/// the given decimal count, rounding up so a fractional remainder can never
/// under-charge. Returns `None` on overflow.
pub fn to_atomic(amount: Decimal, decimals: u8) -> Option<u64> {
    let scale = Decimal::from(10u64.checked_pow(decimals as u32)?);
    let scaled = amount.checked_mul(scale)?;
    let ceiled = scaled.ceil();
    u64::try_from(ceiled.mantissa() / 10i128.pow(ceiled.scale())).ok()
}

impl FromStr for MoneyAmount {
    type Err = MoneyAmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MoneyAmount::parse(s)
    }
}

impl TryFrom<&str> for MoneyAmount {
    type Error = MoneyAmountParseError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        MoneyAmount::from_str(value)
    }
}

impl<'de> serde::Deserialize<'de> for MoneyAmount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        MoneyAmount::parse(&s).map_err(serde::de::Error::custom)
    }
}

impl Display for MoneyAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dollar_prefixed() {
        let amount = MoneyAmount::parse("$0.01").unwrap();
        assert_eq!(amount.inner(), Decimal::from_str("0.01").unwrap());
    }

    #[test]
    fn test_parse_rejects_negative() {
        assert!(matches!(
            MoneyAmount::parse("-5"),
            Err(MoneyAmountParseError::Negative)
        ));
    }

    #[test]
    fn test_to_atomic_exact() {
        let amount = Decimal::from_str("0.0101").unwrap();
        assert_eq!(to_atomic(amount, 6), Some(10_100));
    }

    #[test]
    fn test_to_atomic_rounds_up() {
        let amount = Decimal::from_str("0.0000015").unwrap();
        assert_eq!(to_atomic(amount, 6), Some(2));
    }

    #[test]
    fn test_to_atomic_varying_decimals() {
        let amount = Decimal::from_str("1.5").unwrap();
        assert_eq!(to_atomic(amount, 6), Some(1_500_000));
        assert_eq!(to_atomic(amount, 9), Some(1_500_000_000));
        assert_eq!(to_atomic(amount, 0), Some(2)); // rounds up
    }
}
