use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use pharmastock_core::{Aggregate, AggregateRoot, CategoryId, DomainError, DomainResult, DrugId};

use crate::movement::{Direction, StockCommand, StockIn, StockMovement, StockOut};
use crate::values::{optional_text, required_text, Price, Quantity};

/// Counterparty recorded on the movement that carries a drug's opening stock.
pub const OPENING_BALANCE: &str = "opening balance";

/// Whether a drug is currently offered.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrugStatus {
    #[default]
    Active,
    Inactive,
}

/// Parse an optional `YYYY-MM-DD` date field. Blank input means "no date".
pub fn parse_date(field: &str, raw: Option<&str>) -> DomainResult<Option<NaiveDate>> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map(Some)
        .map_err(|e| DomainError::invalid(format!("{field} '{raw}' is not a YYYY-MM-DD date: {e}")))
}

/// Construction contract for a new drug.
///
/// Omitted fields resolve as follows: no list price, opening stock 0, status
/// `Active`, no dates, no specification/unit/manufacturer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDrug {
    pub name: String,
    pub category_id: CategoryId,
    pub specification: Option<String>,
    pub unit: Option<String>,
    pub price: Option<Decimal>,
    pub opening_stock: Option<i64>,
    pub manufacturer: Option<String>,
    pub production_date: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
    pub status: Option<DrugStatus>,
}

impl NewDrug {
    pub fn new(name: impl Into<String>, category_id: CategoryId) -> Self {
        Self {
            name: name.into(),
            category_id,
            specification: None,
            unit: None,
            price: None,
            opening_stock: None,
            manufacturer: None,
            production_date: None,
            expiry_date: None,
            status: None,
        }
    }
}

/// Partial update of a drug's catalog fields. `None` leaves a field unchanged;
/// a blank string clears an optional text field and `Some(None)` clears the
/// price or a date.
///
/// There is deliberately no quantity here: balances move only through the ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrugPatch {
    pub name: Option<String>,
    pub category_id: Option<CategoryId>,
    pub specification: Option<String>,
    pub unit: Option<String>,
    pub price: Option<Option<Decimal>>,
    pub manufacturer: Option<String>,
    pub production_date: Option<Option<NaiveDate>>,
    pub expiry_date: Option<Option<NaiveDate>>,
    pub status: Option<DrugStatus>,
}

/// Aggregate root: Drug.
///
/// `quantity` is a cache of the drug's ledger (Σ IN − Σ OUT). It only changes
/// through `apply`, which is fed the movements `handle` decided.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Drug {
    id: DrugId,
    name: String,
    category_id: CategoryId,
    specification: Option<String>,
    unit: Option<String>,
    price: Option<Price>,
    quantity: i64,
    manufacturer: Option<String>,
    production_date: Option<NaiveDate>,
    expiry_date: Option<NaiveDate>,
    status: DrugStatus,
    created_at: DateTime<Utc>,
    version: u64,
}

impl Drug {
    /// Build a drug from its construction contract. The opening stock is not
    /// applied here; see [`Drug::opening_stock_in`].
    pub fn create(id: DrugId, new: &NewDrug, created_at: DateTime<Utc>) -> DomainResult<Self> {
        let name = required_text("drug name", &new.name)?;
        let price = new.price.map(Price::new).transpose()?;
        if let Some(opening) = new.opening_stock {
            if opening < 0 {
                return Err(DomainError::invalid(format!(
                    "opening stock cannot be negative (got {opening})"
                )));
            }
        }
        check_dates(new.production_date, new.expiry_date)?;

        Ok(Self {
            id,
            name,
            category_id: new.category_id,
            specification: optional_text(new.specification.clone()),
            unit: optional_text(new.unit.clone()),
            price,
            quantity: 0,
            manufacturer: optional_text(new.manufacturer.clone()),
            production_date: new.production_date,
            expiry_date: new.expiry_date,
            status: new.status.unwrap_or_default(),
            created_at,
            version: 1,
        })
    }

    /// Rehydrate a drug from persisted columns (storage adapters only).
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: DrugId,
        name: String,
        category_id: CategoryId,
        specification: Option<String>,
        unit: Option<String>,
        price: Option<Price>,
        quantity: i64,
        manufacturer: Option<String>,
        production_date: Option<NaiveDate>,
        expiry_date: Option<NaiveDate>,
        status: DrugStatus,
        created_at: DateTime<Utc>,
        version: u64,
    ) -> Self {
        Self {
            id,
            name,
            category_id,
            specification,
            unit,
            price,
            quantity,
            manufacturer,
            production_date,
            expiry_date,
            status,
            created_at,
            version,
        }
    }

    /// The stock-in command that carries a positive opening stock, if any.
    pub fn opening_stock_in(&self, new: &NewDrug) -> Option<StockIn> {
        match new.opening_stock {
            Some(qty) if qty > 0 => {
                let mut cmd = StockIn::new(self.id, qty).supplier(OPENING_BALANCE);
                cmd.occurred_at = self.created_at;
                Some(cmd)
            }
            _ => None,
        }
    }

    pub fn id_typed(&self) -> DrugId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn category_id(&self) -> CategoryId {
        self.category_id
    }

    pub fn specification(&self) -> Option<&str> {
        self.specification.as_deref()
    }

    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }

    pub fn price(&self) -> Option<Price> {
        self.price
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn manufacturer(&self) -> Option<&str> {
        self.manufacturer.as_deref()
    }

    pub fn production_date(&self) -> Option<NaiveDate> {
        self.production_date
    }

    pub fn expiry_date(&self) -> Option<NaiveDate> {
        self.expiry_date
    }

    pub fn status(&self) -> DrugStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Case-insensitive substring match on the name.
    pub fn name_contains(&self, needle: &str) -> bool {
        self.name.to_lowercase().contains(&needle.to_lowercase())
    }

    /// Apply a catalog edit. Bumps the version; never touches the quantity.
    pub fn apply_patch(&mut self, patch: &DrugPatch) -> DomainResult<()> {
        let mut next = self.clone();

        if let Some(name) = &patch.name {
            next.name = required_text("drug name", name)?;
        }
        if let Some(category_id) = patch.category_id {
            next.category_id = category_id;
        }
        if patch.specification.is_some() {
            next.specification = optional_text(patch.specification.clone());
        }
        if patch.unit.is_some() {
            next.unit = optional_text(patch.unit.clone());
        }
        if let Some(price) = patch.price {
            next.price = price.map(Price::new).transpose()?;
        }
        if patch.manufacturer.is_some() {
            next.manufacturer = optional_text(patch.manufacturer.clone());
        }
        if let Some(production_date) = patch.production_date {
            next.production_date = production_date;
        }
        if let Some(expiry_date) = patch.expiry_date {
            next.expiry_date = expiry_date;
        }
        if let Some(status) = patch.status {
            next.status = status;
        }
        check_dates(next.production_date, next.expiry_date)?;

        next.version += 1;
        *self = next;
        Ok(())
    }

    fn ensure_drug_id(&self, drug_id: DrugId) -> Result<(), DomainError> {
        if self.id != drug_id {
            return Err(DomainError::invalid(format!(
                "movement targets drug {drug_id} but was routed to {}",
                self.id
            )));
        }
        Ok(())
    }

    fn handle_in(&self, cmd: &StockIn) -> Result<Vec<StockMovement>, DomainError> {
        self.ensure_drug_id(cmd.drug_id)?;
        let quantity = Quantity::new(cmd.quantity)?;
        let unit_price = cmd.unit_price.map(Price::new).transpose()?;

        if self.quantity.checked_add(quantity.get()).is_none() {
            return Err(DomainError::invalid("stock-in would overflow the balance"));
        }

        Ok(vec![StockMovement {
            id: cmd.movement_id,
            sequence: 0,
            direction: Direction::In,
            drug_id: cmd.drug_id,
            quantity,
            unit_price,
            counterparty: optional_text(cmd.supplier.clone()),
            batch_label: optional_text(cmd.batch_label.clone()),
            occurred_at: cmd.occurred_at,
            operator_id: cmd.operator_id,
            remark: optional_text(cmd.remark.clone()),
        }])
    }

    fn handle_out(&self, cmd: &StockOut) -> Result<Vec<StockMovement>, DomainError> {
        self.ensure_drug_id(cmd.drug_id)?;
        let quantity = Quantity::new(cmd.quantity)?;

        if quantity.get() > self.quantity {
            return Err(DomainError::insufficient_stock(self.quantity, quantity.get()));
        }

        Ok(vec![StockMovement {
            id: cmd.movement_id,
            sequence: 0,
            direction: Direction::Out,
            drug_id: cmd.drug_id,
            quantity,
            unit_price: None,
            counterparty: optional_text(cmd.reason.clone()),
            batch_label: None,
            occurred_at: cmd.occurred_at,
            operator_id: cmd.operator_id,
            remark: optional_text(cmd.remark.clone()),
        }])
    }
}

fn check_dates(production: Option<NaiveDate>, expiry: Option<NaiveDate>) -> DomainResult<()> {
    if let (Some(p), Some(e)) = (production, expiry) {
        if e < p {
            return Err(DomainError::invalid(format!(
                "expiry date {e} is before production date {p}"
            )));
        }
    }
    Ok(())
}

impl AggregateRoot for Drug {
    type Id = DrugId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl Aggregate for Drug {
    type Command = StockCommand;
    type Event = StockMovement;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        self.quantity += event.delta();
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            StockCommand::StockIn(cmd) => self.handle_in(cmd),
            StockCommand::StockOut(cmd) => self.handle_out(cmd),
        }
    }
}
