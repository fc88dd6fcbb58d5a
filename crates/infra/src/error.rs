use thiserror::Error;

use pharmastock_core::DomainError;

use crate::store::StoreError;

/// Error surface of the engine, catalog and query services.
///
/// Mirrors the domain taxonomy so callers can match one flat enum; every
/// failure kind is a distinct variant.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("insufficient stock: requested {requested}, current balance {current}")]
    InsufficientStock { current: i64, requested: i64 },

    /// Concurrent writers kept moving the row and the retry budget ran out.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("referential integrity: {0}")]
    ReferentialIntegrity(String),

    /// Non-retryable storage failure.
    #[error("storage error: {0}")]
    Store(StoreError),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

impl LedgerError {
    pub fn not_found(entity: &'static str, id: impl core::fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

impl From<DomainError> for LedgerError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::InvalidArgument(msg) => LedgerError::InvalidArgument(msg),
            DomainError::NotFound { entity, id } => LedgerError::NotFound { entity, id },
            DomainError::InsufficientStock { current, requested } => {
                LedgerError::InsufficientStock { current, requested }
            }
            DomainError::Conflict(msg) => LedgerError::Conflict(msg),
            DomainError::ReferentialIntegrity(msg) => LedgerError::ReferentialIntegrity(msg),
        }
    }
}

impl From<StoreError> for LedgerError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Concurrency(msg) => LedgerError::Conflict(msg),
            StoreError::Duplicate(msg) => LedgerError::InvalidArgument(msg),
            StoreError::Missing { entity, id } => LedgerError::NotFound { entity, id },
            StoreError::Referenced(msg) => LedgerError::ReferentialIntegrity(msg),
            other @ StoreError::Backend(_) => LedgerError::Store(other),
        }
    }
}
