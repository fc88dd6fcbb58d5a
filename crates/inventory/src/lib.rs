//! Pharmaceutical inventory domain.
//!
//! Categories, drugs, operators and the stock movements that make up the ledger,
//! implemented as deterministic domain logic (no IO, no storage). The `Drug`
//! aggregate decides movements and keeps its cached balance in step with them.

pub mod category;
pub mod drug;
pub mod movement;
pub mod operator;
pub mod values;

pub use category::{Category, CategoryPatch};
pub use drug::{parse_date, Drug, DrugPatch, DrugStatus, NewDrug, OPENING_BALANCE};
pub use movement::{Direction, LedgerTotals, StockCommand, StockIn, StockMovement, StockOut};
pub use operator::Operator;
pub use values::{Price, Quantity};
