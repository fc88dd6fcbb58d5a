//! Catalog + ledger persistence boundary.
//!
//! The traits in [`r#trait`] make no storage assumptions; `InMemoryStore` backs
//! tests and the demo binary, and the `postgres` feature adds a durable adapter.

pub mod in_memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PgInventoryStore;
pub use r#trait::{CatalogStore, LedgerStore, MovementFilter, OperatorDirectory, StoreError};
