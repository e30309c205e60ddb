//! Coins-per-currency-unit rate.

use core::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Errors that can occur when constructing a [`Rate`].
#[derive(thiserror::Error, Debug, Clone)]
pub enum RateError {
    /// The rate is zero or negative.
    #[error("rate must be greater than zero, got {0}")]
    NotPositive(Decimal),
}

/// Units of virtual currency granted per one unit of real currency.
///
/// Always strictly positive; construction enforces this, including when
/// deserializing persisted records.
///
/// Serializes as a plain JSON number (the persisted rate record stores
/// numbers, not decimal strings).
///
/// ## Examples
///
/// ```
/// use coinforge_core::Rate;
/// use rust_decimal::Decimal;
///
/// let rate = Rate::new(Decimal::from(87)).unwrap();
/// assert_eq!(rate.coins_for(Decimal::from(20)), Decimal::from(1740));
///
/// assert!(Rate::new(Decimal::ZERO).is_err());
/// assert!(Rate::new(Decimal::from(-1)).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Rate(Decimal);

impl Rate {
    /// Construct a rate, rejecting zero and negative values.
    ///
    /// # Errors
    ///
    /// Returns [`RateError::NotPositive`] if `value <= 0`.
    pub fn new(value: Decimal) -> Result<Self, RateError> {
        if value <= Decimal::ZERO {
            return Err(RateError::NotPositive(value));
        }
        Ok(Self(value))
    }

    /// Returns the rate as a decimal value.
    #[must_use]
    pub const fn value(&self) -> Decimal {
        self.0
    }

    /// Coins credited for the given monetary amount.
    #[must_use]
    pub fn coins_for(&self, amount: Decimal) -> Decimal {
        (self.0 * amount).normalize()
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

impl TryFrom<Decimal> for Rate {
    type Error = RateError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

// Manual serde impls so the wire form is a JSON number while construction
// keeps enforcing positivity on the way back in.
impl Serialize for Rate {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        rust_decimal::serde::float::serialize(&self.0, serializer)
    }
}

impl<'de> Deserialize<'de> for Rate {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = rust_decimal::serde::float::deserialize(deserializer)?;
        Self::new(value).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn test_rejects_non_positive() {
        assert!(matches!(
            Rate::new(Decimal::ZERO),
            Err(RateError::NotPositive(_))
        ));
        assert!(matches!(
            Rate::new(dec!(-5)),
            Err(RateError::NotPositive(_))
        ));
    }

    #[test]
    fn test_coins_for() {
        let rate = Rate::new(dec!(87)).unwrap();
        assert_eq!(rate.coins_for(dec!(20)), dec!(1740));

        let fractional = Rate::new(dec!(87.5)).unwrap();
        assert_eq!(fractional.coins_for(dec!(2)), dec!(175));
    }

    #[test]
    fn test_serializes_as_number() {
        let rate = Rate::new(dec!(87)).unwrap();
        let json = serde_json::to_string(&rate).unwrap();
        assert_eq!(json, "87.0");

        let parsed: Rate = serde_json::from_str("87").unwrap();
        assert_eq!(parsed.value(), dec!(87));
    }

    #[test]
    fn test_deserialize_rejects_non_positive() {
        assert!(serde_json::from_str::<Rate>("0").is_err());
        assert!(serde_json::from_str::<Rate>("-3").is_err());
    }

    #[test]
    fn test_display_trims_trailing_zeros() {
        let rate = Rate::new(dec!(100.00)).unwrap();
        assert_eq!(rate.to_string(), "100");
    }
}
