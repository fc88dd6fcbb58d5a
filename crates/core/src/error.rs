//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Every variant is a deterministic business failure that the calling layer can
/// recover from. Storage faults are reported by the infrastructure crate instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed or out-of-range input (non-positive quantity, unparsable date, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A referenced drug, category or operator does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A stock-out asked for more than the drug currently holds.
    #[error("insufficient stock: requested {requested}, current balance {current}")]
    InsufficientStock { current: i64, requested: i64 },

    /// A concurrent write won the race and the retry budget ran out.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A delete was blocked by dependent rows.
    #[error("referential integrity: {0}")]
    ReferentialIntegrity(String),
}

impl DomainError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn not_found(entity: &'static str, id: impl core::fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn insufficient_stock(current: i64, requested: i64) -> Self {
        Self::InsufficientStock { current, requested }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_stock_message_carries_the_balance() {
        let err = DomainError::insufficient_stock(40, 100);
        assert_eq!(
            err.to_string(),
            "insufficient stock: requested 100, current balance 40"
        );
    }

    #[test]
    fn not_found_names_the_entity() {
        let err = DomainError::not_found("drug", 42);
        assert_eq!(err.to_string(), "drug not found: 42");
        assert!(matches!(err, DomainError::NotFound { entity: "drug", .. }));
    }
}
