//! Human-readable native-currency amount parsing.
//!
//! This module provides [`MoneyAmount`], a type for parsing human-readable
//! price strings (as typed by a seller) into precise decimal values, and for
//! converting them into the chain's smallest unit (wei).
//!
//! # Supported Formats
//!
//! - Plain numbers: `"1"`, `"0.01"`, `"0"`
//! - With a currency suffix or symbol: `"0.01 ETH"`, `"Ξ0.5"`
//! - With thousand separators: `"1,000"`
//!
//! # Example
//!
//! ```rust
//! use paydrop::util::money_amount::MoneyAmount;
//!
//! let amount = MoneyAmount::parse("0.01 ETH").unwrap();
//! assert_eq!(amount.scale(), 2);
//! assert_eq!(amount.to_wei().unwrap().to_string(), "10000000000000000");
//! ```

use alloy_primitives::U256;
use regex::Regex;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fmt::Display;
use std::str::FromStr;

/// Decimal places of the native currency (ETH and every EVM L2 that settles in it).
pub const NATIVE_DECIMALS: u32 = 18;

/// A parsed, non-negative amount of the native currency.
///
/// Zero is a valid amount and means "free". The original precision is
/// preserved, which matters when converting into wei.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MoneyAmount(pub Decimal);

impl MoneyAmount {
    pub const ZERO: MoneyAmount = MoneyAmount(Decimal::ZERO);

    /// Returns the number of decimal places in the original input.
    pub fn scale(&self) -> u32 {
        self.0.scale()
    }

    /// Returns the value as an unsigned integer (without decimal point).
    ///
    /// For example, `"12.34"` returns `1234`.
    pub fn mantissa(&self) -> u128 {
        self.0.mantissa().unsigned_abs()
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Converts the amount into wei: `round(amount * 10^18)`, midpoints away from zero.
    ///
    /// Amounts are already validated to be non-negative and bounded, so the
    /// only failure is a precision overflow of the intermediate decimal.
    pub fn to_wei(&self) -> Result<U256, MoneyAmountParseError> {
        let multiplier = Decimal::from_i128_with_scale(10i128.pow(NATIVE_DECIMALS), 0);
        let scaled = self
            .0
            .checked_mul(multiplier)
            .ok_or(MoneyAmountParseError::OutOfRange)?;
        let mut rounded = scaled.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
        rounded.rescale(0);
        let wei = rounded.mantissa().unsigned_abs();
        Ok(U256::from(wei))
    }

    /// Lossy conversion for JSON presentation (`price_eth`).
    pub fn as_f64(&self) -> f64 {
        self.0.to_f64().unwrap_or_default()
    }
}

/// Errors that can occur when parsing a monetary amount.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MoneyAmountParseError {
    /// The input string could not be parsed as a number.
    #[error("Invalid number format")]
    InvalidFormat,
    /// The value is outside the allowed range.
    #[error("Amount must be between 0 and {}", constants::MAX_STR)]
    OutOfRange,
    /// Negative values are not allowed.
    #[error("Negative value is not allowed")]
    Negative,
    /// The input has more decimal places than the native currency supports.
    #[error("Too big of a precision: {money} vs {native} on the native currency")]
    WrongPrecision {
        /// Decimal places in the input.
        money: u32,
        /// Decimal places supported by the currency.
        native: u32,
    },
}

mod constants {
    use super::*;
    use std::sync::LazyLock;

    pub const MAX_STR: &str = "999999999";

    pub static MAX: LazyLock<Decimal> =
        LazyLock::new(|| Decimal::from_str(MAX_STR).expect("valid decimal"));
    /// Optional `Ξ` prefix and `ETH` suffix around the number.
    pub static DECORATED: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?i)^\s*Ξ?\s*(.*?)\s*(?:ETH)?\s*$").expect("valid regex"));
    /// Plain decimal, optionally with comma thousand separators in groups of three.
    pub static NUMBER: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^-?(?:\d{1,3}(?:,\d{3})+|\d*)(?:\.\d+)?$").expect("valid regex")
    });
}

impl MoneyAmount {
    /// Parses a human-readable price string into a [`MoneyAmount`].
    ///
    /// A leading `Ξ`, a trailing `ETH`, surrounding whitespace and comma thousand
    /// separators are accepted. Anything else that is not a plain decimal, such as
    /// exponents or decimal commas, is rejected rather than reinterpreted.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The string cannot be parsed as a number
    /// - The value is negative
    /// - The value is above the allowed range
    /// - The value has more than 18 decimal places
    pub fn parse(input: &str) -> Result<Self, MoneyAmountParseError> {
        let number = constants::DECORATED
            .captures(input)
            .and_then(|captures| captures.get(1))
            .map(|number| number.as_str())
            .filter(|number| constants::NUMBER.is_match(number))
            .ok_or(MoneyAmountParseError::InvalidFormat)?;
        let cleaned = number.replace(',', "");

        let parsed =
            Decimal::from_str(&cleaned).map_err(|_| MoneyAmountParseError::InvalidFormat)?;
        Self::try_from(parsed)
    }
}

impl TryFrom<Decimal> for MoneyAmount {
    type Error = MoneyAmountParseError;

    fn try_from(parsed: Decimal) -> Result<Self, Self::Error> {
        if parsed.is_sign_negative() && !parsed.is_zero() {
            return Err(MoneyAmountParseError::Negative);
        }
        if parsed > *constants::MAX {
            return Err(MoneyAmountParseError::OutOfRange);
        }
        let parsed = parsed.normalize();
        if parsed.scale() > NATIVE_DECIMALS {
            return Err(MoneyAmountParseError::WrongPrecision {
                money: parsed.scale(),
                native: NATIVE_DECIMALS,
            });
        }
        Ok(MoneyAmount(parsed.abs()))
    }
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

impl TryFrom<f64> for MoneyAmount {
    type Error = MoneyAmountParseError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        let decimal = Decimal::from_f64(value).ok_or(MoneyAmountParseError::OutOfRange)?;
        Self::try_from(decimal)
    }
}

impl Display for MoneyAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

/// Stored as a decimal string so metadata files never lose precision.
impl Serialize for MoneyAmount {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for MoneyAmount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        MoneyAmount::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_decorated_amounts() {
        assert_eq!(MoneyAmount::parse("0.01").unwrap().to_string(), "0.01");
        assert_eq!(MoneyAmount::parse("0.01 ETH").unwrap().to_string(), "0.01");
        assert_eq!(MoneyAmount::parse("1,000").unwrap().to_string(), "1000");
        assert!(MoneyAmount::parse("0").unwrap().is_zero());
        assert!(MoneyAmount::parse("0.00").unwrap().is_zero());
    }

    #[test]
    fn rejects_invalid_amounts() {
        assert_eq!(
            MoneyAmount::parse("abc"),
            Err(MoneyAmountParseError::InvalidFormat)
        );
        assert_eq!(
            MoneyAmount::parse("-1"),
            Err(MoneyAmountParseError::Negative)
        );
        assert_eq!(
            MoneyAmount::parse("1000000000"),
            Err(MoneyAmountParseError::OutOfRange)
        );
        assert!(matches!(
            MoneyAmount::parse("0.0000000000000000001"),
            Err(MoneyAmountParseError::WrongPrecision { money: 19, .. })
        ));
    }

    #[test]
    fn rejects_notations_it_would_misread() {
        for input in ["1e5", "0,5", "1,00", "1.2.3", "0.01 USD", "", "ETH"] {
            assert_eq!(
                MoneyAmount::parse(input),
                Err(MoneyAmountParseError::InvalidFormat),
                "input {input:?}"
            );
        }
        assert_eq!(MoneyAmount::parse("Ξ0.5").unwrap().to_string(), "0.5");
        assert_eq!(MoneyAmount::parse(" 2 eth ").unwrap().to_string(), "2");
        assert_eq!(MoneyAmount::parse("1,234.5").unwrap().to_string(), "1234.5");
    }

    #[test]
    fn converts_to_wei() {
        let cases = [
            ("0", "0"),
            ("0.01", "10000000000000000"),
            ("0.005", "5000000000000000"),
            ("1", "1000000000000000000"),
            ("0.000000000000000001", "1"),
            ("250.5", "250500000000000000000"),
        ];
        for (input, wei) in cases {
            let amount = MoneyAmount::parse(input).unwrap();
            assert_eq!(amount.to_wei().unwrap().to_string(), wei, "input {input}");
        }
    }

    #[test]
    fn from_f64_keeps_short_representation() {
        let amount = MoneyAmount::try_from(0.01f64).unwrap();
        assert_eq!(amount.to_wei().unwrap(), U256::from(10_000_000_000_000_000u128));
    }

    #[test]
    fn serializes_as_string() {
        let amount = MoneyAmount::parse("0.01").unwrap();
        let json = serde_json::to_string(&amount).unwrap();
        assert_eq!(json, "\"0.01\"");
        let back: MoneyAmount = serde_json::from_str(&json).unwrap();
        assert_eq!(back, amount);
    }
}
