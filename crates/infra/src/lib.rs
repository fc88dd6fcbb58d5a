//! Infrastructure layer: stores, the balance engine, catalog and query services.

pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod locks;
pub mod queries;
pub mod seed;
pub mod store;


pub use catalog::{CatalogService, CreatedDrug};
pub use config::{ConfigError, LedgerConfig};
pub use engine::{BalanceAudit, BalanceEngine};
pub use error::{LedgerError, LedgerResult};
pub use locks::DrugLocks;
pub use queries::{DrugDetail, InventoryQueries, MovementSummary};
pub use seed::{seed_demo, SeedReport};
pub use store::{
    CatalogStore, InMemoryStore, LedgerStore, MovementFilter, OperatorDirectory, StoreError,
};
