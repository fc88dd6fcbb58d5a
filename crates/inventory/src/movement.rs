use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use pharmastock_core::{DrugId, Entity, MovementId, OperatorId};

use crate::values::{optional_text, Price, Quantity};

/// Direction of a stock movement.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Receipt into inventory.
    In,
    /// Removal from inventory (dispense, disposal).
    Out,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }
}

impl core::fmt::Display for Direction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ledger entry: one accepted stock movement.
///
/// Movements are facts. Once a store has committed one it is never updated or
/// deleted; corrections are recorded as further movements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: MovementId,
    /// Position in the ledger, assigned by the store on commit (0 while uncommitted).
    pub sequence: u64,
    pub direction: Direction,
    pub drug_id: DrugId,
    pub quantity: Quantity,
    /// Receipt unit price (stock-in only).
    pub unit_price: Option<Price>,
    /// Supplier for stock-in, reason for stock-out.
    pub counterparty: Option<String>,
    /// Free-text batch label (stock-in only).
    pub batch_label: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub operator_id: Option<OperatorId>,
    pub remark: Option<String>,
}

impl StockMovement {
    /// Signed effect on the drug balance.
    pub fn delta(&self) -> i64 {
        match self.direction {
            Direction::In => self.quantity.get(),
            Direction::Out => -self.quantity.get(),
        }
    }

    pub fn is_committed(&self) -> bool {
        self.sequence > 0
    }
}

impl Entity for StockMovement {
    type Id = MovementId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Command: record a receipt.
///
/// `quantity` and `unit_price` are raw caller input; the drug aggregate validates
/// them when deciding the movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockIn {
    pub movement_id: MovementId,
    pub drug_id: DrugId,
    pub quantity: i64,
    pub unit_price: Option<Decimal>,
    pub supplier: Option<String>,
    pub batch_label: Option<String>,
    pub operator_id: Option<OperatorId>,
    pub remark: Option<String>,
    /// When the command was issued. The balance engine replaces it with the
    /// commit time, so ledger time follows ledger order.
    pub occurred_at: DateTime<Utc>,
}

impl StockIn {
    pub fn new(drug_id: DrugId, quantity: i64) -> Self {
        Self {
            movement_id: MovementId::new(),
            drug_id,
            quantity,
            unit_price: None,
            supplier: None,
            batch_label: None,
            operator_id: None,
            remark: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn unit_price(mut self, price: Decimal) -> Self {
        self.unit_price = Some(price);
        self
    }

    pub fn supplier(mut self, supplier: impl Into<String>) -> Self {
        self.supplier = optional_text(Some(supplier.into()));
        self
    }

    pub fn batch_label(mut self, label: impl Into<String>) -> Self {
        self.batch_label = optional_text(Some(label.into()));
        self
    }

    pub fn operator(mut self, operator_id: Option<OperatorId>) -> Self {
        self.operator_id = operator_id;
        self
    }

    pub fn remark(mut self, remark: impl Into<String>) -> Self {
        self.remark = optional_text(Some(remark.into()));
        self
    }
}

/// Command: record a dispense or disposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockOut {
    pub movement_id: MovementId,
    pub drug_id: DrugId,
    pub quantity: i64,
    pub reason: Option<String>,
    pub operator_id: Option<OperatorId>,
    pub remark: Option<String>,
    /// When the command was issued. The balance engine replaces it with the
    /// commit time, so ledger time follows ledger order.
    pub occurred_at: DateTime<Utc>,
}

impl StockOut {
    pub fn new(drug_id: DrugId, quantity: i64) -> Self {
        Self {
            movement_id: MovementId::new(),
            drug_id,
            quantity,
            reason: None,
            operator_id: None,
            remark: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = optional_text(Some(reason.into()));
        self
    }

    pub fn operator(mut self, operator_id: Option<OperatorId>) -> Self {
        self.operator_id = operator_id;
        self
    }

    pub fn remark(mut self, remark: impl Into<String>) -> Self {
        self.remark = optional_text(Some(remark.into()));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockCommand {
    StockIn(StockIn),
    StockOut(StockOut),
}

impl StockCommand {
    pub fn drug_id(&self) -> DrugId {
        match self {
            StockCommand::StockIn(c) => c.drug_id,
            StockCommand::StockOut(c) => c.drug_id,
        }
    }

    pub fn operator_id(&self) -> Option<OperatorId> {
        match self {
            StockCommand::StockIn(c) => c.operator_id,
            StockCommand::StockOut(c) => c.operator_id,
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            StockCommand::StockIn(_) => Direction::In,
            StockCommand::StockOut(_) => Direction::Out,
        }
    }

    pub fn quantity(&self) -> i64 {
        match self {
            StockCommand::StockIn(c) => c.quantity,
            StockCommand::StockOut(c) => c.quantity,
        }
    }
}

impl From<StockIn> for StockCommand {
    fn from(value: StockIn) -> Self {
        StockCommand::StockIn(value)
    }
}

impl From<StockOut> for StockCommand {
    fn from(value: StockOut) -> Self {
        StockCommand::StockOut(value)
    }
}

/// Totals derived from a drug's ledger.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerTotals {
    pub received: i64,
    pub dispensed: i64,
    pub movements: usize,
}

impl LedgerTotals {
    pub fn from_movements<'a>(movements: impl IntoIterator<Item = &'a StockMovement>) -> Self {
        movements
            .into_iter()
            .fold(LedgerTotals::default(), |mut acc, m| {
                match m.direction {
                    Direction::In => acc.received += m.quantity.get(),
                    Direction::Out => acc.dispensed += m.quantity.get(),
                }
                acc.movements += 1;
                acc
            })
    }

    /// Σ IN − Σ OUT: the balance the ledger implies.
    pub fn balance(&self) -> i64 {
        self.received - self.dispensed
    }
}
