use std::sync::Arc;

use thiserror::Error;

use pharmastock_core::{CategoryId, DrugId, ExpectedVersion, OperatorId};
use pharmastock_inventory::{Category, Direction, Drug, Operator, StockMovement};

/// Storage operation error.
///
/// These are **infrastructure errors** as opposed to domain errors (validation,
/// insufficient stock). `Concurrency` is the only transient kind: callers may
/// reload and retry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Optimistic concurrency check failed (the row moved on since it was read).
    #[error("concurrent write detected: {0}")]
    Concurrency(String),

    /// A uniqueness constraint was violated (id, category name, username).
    #[error("duplicate: {0}")]
    Duplicate(String),

    /// The addressed row, or a row it must reference, does not exist.
    #[error("{entity} not found: {id}")]
    Missing { entity: &'static str, id: String },

    /// A delete was blocked by dependent rows.
    #[error("still referenced: {0}")]
    Referenced(String),

    /// Anything else the backend reports (poisoned lock, connection failure, ...).
    #[error("backend failure: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn missing(entity: &'static str, id: impl core::fmt::Display) -> Self {
        Self::Missing {
            entity,
            id: id.to_string(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Concurrency(_))
    }
}

/// Which ledger entries to return.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MovementFilter {
    pub drug_id: Option<DrugId>,
    pub direction: Option<Direction>,
}

impl MovementFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_drug(drug_id: DrugId) -> Self {
        Self {
            drug_id: Some(drug_id),
            direction: None,
        }
    }

    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }

    pub fn matches(&self, movement: &StockMovement) -> bool {
        self.drug_id.is_none_or(|id| movement.drug_id == id)
            && self.direction.is_none_or(|d| movement.direction == d)
    }
}

/// Catalog persistence: categories and drugs (the authoritative balance column).
///
/// Implementations must enforce referential integrity atomically with respect
/// to concurrent writers:
/// - a drug can only be inserted/moved into an existing category
/// - a category referenced by any drug cannot be deleted
/// - a drug referenced by any movement cannot be deleted
pub trait CatalogStore: Send + Sync {
    fn insert_category(&self, category: Category) -> Result<(), StoreError>;

    fn update_category(&self, category: Category) -> Result<(), StoreError>;

    fn delete_category(&self, id: CategoryId) -> Result<(), StoreError>;

    fn find_category(&self, id: CategoryId) -> Result<Option<Category>, StoreError>;

    fn list_categories(&self) -> Result<Vec<Category>, StoreError>;

    /// Insert a new drug together with the movement carrying its opening stock.
    ///
    /// `drug` must already reflect `opening` (quantity and version). Both land or
    /// neither does. Returns the committed opening movement.
    fn insert_drug(
        &self,
        drug: Drug,
        opening: Option<StockMovement>,
    ) -> Result<Option<StockMovement>, StoreError>;

    /// Replace a drug's catalog fields if the stored row is still at `expected`.
    fn update_drug(&self, drug: Drug, expected: ExpectedVersion) -> Result<(), StoreError>;

    fn delete_drug(&self, id: DrugId) -> Result<(), StoreError>;

    fn find_drug(&self, id: DrugId) -> Result<Option<Drug>, StoreError>;

    fn list_drugs(&self) -> Result<Vec<Drug>, StoreError>;
}

/// Append-only ledger of stock movements.
pub trait LedgerStore: Send + Sync {
    /// Commit a decided movement together with the post-movement drug row.
    ///
    /// Implementations must:
    /// - fail with `Missing` if the drug no longer exists
    /// - fail with `Concurrency` unless the stored drug is still at `expected`
    /// - assign the next ledger `sequence` number
    /// - persist the movement and the drug row atomically (all or nothing)
    fn post_movement(
        &self,
        drug: &Drug,
        movement: StockMovement,
        expected: ExpectedVersion,
    ) -> Result<StockMovement, StoreError>;

    /// Movements matching `filter`, in ledger (sequence) order.
    fn list_movements(&self, filter: &MovementFilter) -> Result<Vec<StockMovement>, StoreError>;
}

/// Minimal operator directory backing the operator references on movements.
pub trait OperatorDirectory: Send + Sync {
    fn insert_operator(&self, operator: Operator) -> Result<(), StoreError>;

    fn find_operator(&self, id: OperatorId) -> Result<Option<Operator>, StoreError>;

    fn find_operator_by_username(&self, username: &str) -> Result<Option<Operator>, StoreError>;
}

impl<S> CatalogStore for Arc<S>
where
    S: CatalogStore + ?Sized,
{
    fn insert_category(&self, category: Category) -> Result<(), StoreError> {
        (**self).insert_category(category)
    }

    fn update_category(&self, category: Category) -> Result<(), StoreError> {
        (**self).update_category(category)
    }

    fn delete_category(&self, id: CategoryId) -> Result<(), StoreError> {
        (**self).delete_category(id)
    }

    fn find_category(&self, id: CategoryId) -> Result<Option<Category>, StoreError> {
        (**self).find_category(id)
    }

    fn list_categories(&self) -> Result<Vec<Category>, StoreError> {
        (**self).list_categories()
    }

    fn insert_drug(
        &self,
        drug: Drug,
        opening: Option<StockMovement>,
    ) -> Result<Option<StockMovement>, StoreError> {
        (**self).insert_drug(drug, opening)
    }

    fn update_drug(&self, drug: Drug, expected: ExpectedVersion) -> Result<(), StoreError> {
        (**self).update_drug(drug, expected)
    }

    fn delete_drug(&self, id: DrugId) -> Result<(), StoreError> {
        (**self).delete_drug(id)
    }

    fn find_drug(&self, id: DrugId) -> Result<Option<Drug>, StoreError> {
        (**self).find_drug(id)
    }

    fn list_drugs(&self) -> Result<Vec<Drug>, StoreError> {
        (**self).list_drugs()
    }
}

impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore + ?Sized,
{
    fn post_movement(
        &self,
        drug: &Drug,
        movement: StockMovement,
        expected: ExpectedVersion,
    ) -> Result<StockMovement, StoreError> {
        (**self).post_movement(drug, movement, expected)
    }

    fn list_movements(&self, filter: &MovementFilter) -> Result<Vec<StockMovement>, StoreError> {
        (**self).list_movements(filter)
    }
}

impl<S> OperatorDirectory for Arc<S>
where
    S: OperatorDirectory + ?Sized,
{
    fn insert_operator(&self, operator: Operator) -> Result<(), StoreError> {
        (**self).insert_operator(operator)
    }

    fn find_operator(&self, id: OperatorId) -> Result<Option<Operator>, StoreError> {
        (**self).find_operator(id)
    }

    fn find_operator_by_username(&self, username: &str) -> Result<Option<Operator>, StoreError> {
        (**self).find_operator_by_username(username)
    }
}
