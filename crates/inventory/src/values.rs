//! Validated value objects shared by drugs and movements.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use pharmastock_core::{DomainError, DomainResult, ValueObject};

/// A strictly positive movement quantity.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Quantity(i64);

impl Quantity {
    pub fn new(value: i64) -> DomainResult<Self> {
        if value <= 0 {
            return Err(DomainError::invalid(format!(
                "quantity must be greater than zero (got {value})"
            )));
        }
        Ok(Self(value))
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl ValueObject for Quantity {}

impl TryFrom<i64> for Quantity {
    type Error = DomainError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Quantity> for i64 {
    fn from(value: Quantity) -> Self {
        value.0
    }
}

impl core::fmt::Display for Quantity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// A non-negative monetary amount (list price or receipt unit price) with at
/// most two decimal places.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Price(Decimal);

impl Price {
    pub const SCALE: u32 = 2;

    pub fn new(amount: Decimal) -> DomainResult<Self> {
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(DomainError::invalid(format!(
                "price cannot be negative (got {amount})"
            )));
        }
        if amount.normalize().scale() > Self::SCALE {
            return Err(DomainError::invalid(format!(
                "price {amount} has more than {} decimal places",
                Self::SCALE
            )));
        }
        Ok(Self(amount))
    }

    pub fn amount(self) -> Decimal {
        self.0
    }
}

impl ValueObject for Price {}

impl TryFrom<Decimal> for Price {
    type Error = DomainError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Price> for Decimal {
    fn from(value: Price) -> Self {
        value.0
    }
}

impl core::fmt::Display for Price {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Trim optional free text; blank input is stored as absent.
pub fn optional_text(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

/// Trim a required name, rejecting blank input.
pub fn required_text(field: &str, value: &str) -> DomainResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DomainError::invalid(format!("{field} cannot be empty")));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::str::FromStr;

    #[test]
    fn quantity_rejects_zero_and_negative() {
        assert!(Quantity::new(0).is_err());
        assert!(Quantity::new(-5).is_err());
        assert_eq!(Quantity::new(7).unwrap().get(), 7);
    }

    #[test]
    fn price_allows_zero_but_not_negative() {
        assert!(Price::new(Decimal::ZERO).is_ok());
        assert!(Price::new(Decimal::from_str("18.50").unwrap()).is_ok());
        let err = Price::new(Decimal::from_str("-0.01").unwrap()).unwrap_err();
        assert!(matches!(err, DomainError::InvalidArgument(_)));
    }

    #[test]
    fn price_rejects_sub_cent_amounts() {
        let err = Price::new(Decimal::from_str("12.345").unwrap()).unwrap_err();
        assert!(matches!(err, DomainError::InvalidArgument(msg) if msg.contains("decimal places")));
        // Trailing zeros are not extra precision.
        assert!(Price::new(Decimal::from_str("12.3400").unwrap()).is_ok());
    }

    #[test]
    fn optional_text_drops_blank_values() {
        assert_eq!(optional_text(Some("  ".into())), None);
        assert_eq!(optional_text(Some(" Depot A ".into())), Some("Depot A".into()));
        assert_eq!(optional_text(None), None);
    }

    #[test]
    fn required_text_names_the_field() {
        let err = required_text("category name", "   ").unwrap_err();
        assert_eq!(err, DomainError::invalid("category name cannot be empty"));
    }
}
