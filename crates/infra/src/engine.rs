//! Balance engine: the only writer of stock balances.
//!
//! Every movement runs the same cycle:
//!
//! ```text
//! StockIn / StockOut
//!   ↓
//! 1. Validate quantity, resolve operator, check the drug exists
//!   ↓
//! 2. Take the per-drug lock
//!   ↓
//! 3. Load the drug row (current balance + version)
//!   ↓
//! 4. Decide the movement (Drug::handle, pure) and stamp it with the commit time
//!   ↓
//! 5. Commit row + movement with ExpectedVersion::Exact (store CAS)
//!   ↓
//! 6. On a transient CAS failure, go back to 3 until the attempt budget is spent
//! ```
//!
//! The lock serializes writers inside one process; the CAS protects against
//! writers the lock cannot see (another process on the same database). Neither
//! path leaves a movement without its balance update or the other way round.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use pharmastock_core::{Aggregate, AggregateRoot, DomainError, DrugId, ExpectedVersion, OperatorId};
use pharmastock_inventory::{
    Drug, LedgerTotals, Quantity, StockCommand, StockIn, StockMovement, StockOut,
};

use crate::config::LedgerConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::locks::DrugLocks;
use crate::store::{CatalogStore, LedgerStore, MovementFilter, OperatorDirectory, StoreError};

/// Cached balance next to the balance the ledger implies.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceAudit {
    pub drug_id: DrugId,
    pub cached: i64,
    pub ledger: i64,
    pub consistent: bool,
}

#[derive(Debug)]
pub struct BalanceEngine<S> {
    store: S,
    locks: DrugLocks,
    max_attempts: u32,
}

impl<S> BalanceEngine<S> {
    pub fn new(store: S) -> Self {
        Self::with_config(store, &LedgerConfig::default())
    }

    pub fn with_config(store: S, config: &LedgerConfig) -> Self {
        Self {
            store,
            locks: DrugLocks::new(),
            max_attempts: config.max_commit_attempts.max(1),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl<S> BalanceEngine<S>
where
    S: CatalogStore + LedgerStore + OperatorDirectory,
{
    /// Record a receipt and raise the balance by `cmd.quantity`.
    #[instrument(
        skip(self, cmd),
        fields(drug_id = %cmd.drug_id, quantity = cmd.quantity),
        err
    )]
    pub fn record_stock_in(&self, cmd: StockIn) -> LedgerResult<StockMovement> {
        self.record(cmd.into())
    }

    /// Record a dispense/disposal. The `quantity <= balance` check happens
    /// inside the serialized section, so concurrent stock-outs never overdraw.
    #[instrument(
        skip(self, cmd),
        fields(drug_id = %cmd.drug_id, quantity = cmd.quantity),
        err
    )]
    pub fn record_stock_out(&self, cmd: StockOut) -> LedgerResult<StockMovement> {
        self.record(cmd.into())
    }

    /// Record either kind of movement.
    pub fn record(&self, command: StockCommand) -> LedgerResult<StockMovement> {
        Quantity::new(command.quantity())?;
        if let Some(operator_id) = command.operator_id() {
            self.resolve_operator(operator_id)?;
        }

        let drug_id = command.drug_id();
        self.load_drug(drug_id)?;
        self.locks
            .with_lock(drug_id, || self.commit_with_retry(drug_id, &command))
    }

    /// Cached balance of one drug.
    #[instrument(skip(self), fields(drug_id = %drug_id))]
    pub fn current_balance(&self, drug_id: DrugId) -> LedgerResult<i64> {
        let drug = self.load_drug(drug_id)?;
        debug!(quantity = drug.quantity(), "balance read");
        Ok(drug.quantity())
    }

    /// Recompute Σ IN − Σ OUT from the ledger and compare with the cached balance.
    ///
    /// Runs under the drug's lock so the two reads see the same commit.
    #[instrument(skip(self), fields(drug_id = %drug_id))]
    pub fn audit_balance(&self, drug_id: DrugId) -> LedgerResult<BalanceAudit> {
        self.locks.with_lock(drug_id, || {
            let drug = self.load_drug(drug_id)?;
            let movements = self.store.list_movements(&MovementFilter::for_drug(drug_id))?;
            let ledger = LedgerTotals::from_movements(&movements).balance();

            let audit = BalanceAudit {
                drug_id,
                cached: drug.quantity(),
                ledger,
                consistent: drug.quantity() == ledger,
            };
            if !audit.consistent {
                warn!(cached = audit.cached, ledger = audit.ledger, "balance drift detected");
            }
            Ok(audit)
        })
    }

    fn load_drug(&self, drug_id: DrugId) -> LedgerResult<Drug> {
        self.store
            .find_drug(drug_id)?
            .ok_or_else(|| LedgerError::not_found("drug", drug_id))
    }

    fn resolve_operator(&self, operator_id: OperatorId) -> LedgerResult<()> {
        match self.store.find_operator(operator_id)? {
            Some(_) => Ok(()),
            None => Err(LedgerError::not_found("operator", operator_id)),
        }
    }

    fn commit_with_retry(
        &self,
        drug_id: DrugId,
        command: &StockCommand,
    ) -> LedgerResult<StockMovement> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;

            let drug = self.load_drug(drug_id)?;
            let expected = ExpectedVersion::Exact(drug.version());

            let decided = drug.handle(command).map_err(|err| {
                if let DomainError::InsufficientStock { current, requested } = &err {
                    warn!(current, requested, "stock-out rejected");
                }
                LedgerError::from(err)
            })?;

            let mut next = drug.clone();
            for movement in &decided {
                next.apply(movement);
            }
            let mut movement = decided.into_iter().next().ok_or_else(|| {
                LedgerError::Store(StoreError::Backend(
                    "stock command decided no movement".to_string(),
                ))
            })?;
            movement.occurred_at = Utc::now();

            match self.store.post_movement(&next, movement, expected) {
                Ok(committed) => {
                    info!(
                        movement_id = %committed.id,
                        sequence = committed.sequence,
                        direction = %committed.direction,
                        quantity = committed.quantity.get(),
                        balance = next.quantity(),
                        "movement recorded"
                    );
                    return Ok(committed);
                }
                Err(err) if err.is_transient() && attempt < self.max_attempts => {
                    warn!(attempt, max_attempts = self.max_attempts, error = %err, "commit lost a race; retrying");
                }
                Err(err) if err.is_transient() => {
                    warn!(attempt, error = %err, "commit retries exhausted");
                    return Err(LedgerError::Conflict(format!(
                        "drug {drug_id} kept changing; gave up after {attempt} attempt(s)"
                    )));
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::str::FromStr;
    use rust_decimal::Decimal;
    use std::sync::Arc;

    use pharmastock_core::CategoryId;
    use pharmastock_inventory::{Category, Direction, NewDrug, Operator};

    use crate::store::InMemoryStore;

    fn setup() -> (BalanceEngine<Arc<InMemoryStore>>, DrugId) {
        let store = Arc::new(InMemoryStore::new());
        let category =
            Category::create(CategoryId::new(), "Antibiotics", None, Utc::now()).unwrap();
        let category_id = category.id;
        store.insert_category(category).unwrap();

        let drug = Drug::create(
            DrugId::new(),
            &NewDrug::new("Amoxicillin capsules", category_id),
            Utc::now(),
        )
        .unwrap();
        let id = drug.id_typed();
        store.insert_drug(drug, None).unwrap();

        (BalanceEngine::new(store), id)
    }

    #[test]
    fn stock_in_then_out_then_overdraw() {
        let (engine, id) = setup();

        let receipt = engine
            .record_stock_in(
                StockIn::new(id, 50)
                    .unit_price(Decimal::from_str("17.00").unwrap())
                    .supplier("East Warehouse"),
            )
            .unwrap();
        assert_eq!(receipt.direction, Direction::In);
        assert!(receipt.is_committed());
        assert_eq!(engine.current_balance(id).unwrap(), 50);

        engine
            .record_stock_out(StockOut::new(id, 10).reason("outpatient"))
            .unwrap();
        assert_eq!(engine.current_balance(id).unwrap(), 40);

        let err = engine.record_stock_out(StockOut::new(id, 100)).unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientStock {
                current: 40,
                requested: 100
            }
        );
        assert_eq!(engine.current_balance(id).unwrap(), 40);

        let movements = engine
            .store()
            .list_movements(&MovementFilter::for_drug(id))
            .unwrap();
        assert_eq!(movements.len(), 2);
    }

    #[test]
    fn non_positive_quantity_is_rejected_before_lookup() {
        let (engine, _) = setup();
        let unknown = DrugId::new();
        let err = engine.record_stock_in(StockIn::new(unknown, 0)).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidArgument(_)));

        let err = engine.record_stock_in(StockIn::new(unknown, 1)).unwrap_err();
        assert_eq!(err, LedgerError::not_found("drug", unknown));
    }

    #[test]
    fn unknown_drugs_leave_no_lock_entries() {
        let (engine, id) = setup();
        for _ in 0..1000 {
            let err = engine
                .record_stock_out(StockOut::new(DrugId::new(), 1))
                .unwrap_err();
            assert!(matches!(err, LedgerError::NotFound { entity: "drug", .. }));
        }
        engine.record_stock_in(StockIn::new(id, 3)).unwrap();
        engine.audit_balance(id).unwrap();
        assert!(engine.locks.is_empty());
    }

    #[test]
    fn movements_carry_the_commit_time() {
        let (engine, id) = setup();
        let first = engine.record_stock_in(StockIn::new(id, 5)).unwrap();

        let mut backdated = StockIn::new(id, 5);
        backdated.occurred_at = chrono::DateTime::from_timestamp(978_307_200, 0).unwrap();
        let issued = backdated.occurred_at;
        let second = engine.record_stock_in(backdated).unwrap();

        assert!(second.sequence > first.sequence);
        assert!(second.occurred_at >= first.occurred_at);
        assert_ne!(second.occurred_at, issued);

        let ledger = engine
            .store()
            .list_movements(&MovementFilter::for_drug(id))
            .unwrap();
        assert!(ledger.windows(2).all(|w| w[0].occurred_at <= w[1].occurred_at));
    }

    #[test]
    fn unknown_operator_is_not_found() {
        let (engine, id) = setup();
        let ghost = OperatorId::new();
        let err = engine
            .record_stock_in(StockIn::new(id, 5).operator(Some(ghost)))
            .unwrap_err();
        assert_eq!(err, LedgerError::not_found("operator", ghost));
        assert_eq!(engine.current_balance(id).unwrap(), 0);
    }

    #[test]
    fn known_operator_is_recorded_on_the_movement() {
        let (engine, id) = setup();
        let op = Operator::register(OperatorId::new(), "admin", None, Utc::now()).unwrap();
        engine.store().insert_operator(op.clone()).unwrap();

        let m = engine
            .record_stock_in(StockIn::new(id, 5).operator(Some(op.id)))
            .unwrap();
        assert_eq!(m.operator_id, Some(op.id));
    }

    #[test]
    fn audit_matches_after_mixed_movements() {
        let (engine, id) = setup();
        engine.record_stock_in(StockIn::new(id, 30)).unwrap();
        engine.record_stock_out(StockOut::new(id, 12)).unwrap();
        let _ = engine.record_stock_out(StockOut::new(id, 500));

        let audit = engine.audit_balance(id).unwrap();
        assert_eq!(audit.cached, 18);
        assert_eq!(audit.ledger, 18);
        assert!(audit.consistent);
    }

    #[test]
    fn attempt_budget_is_never_zero() {
        let config = LedgerConfig {
            max_commit_attempts: 0,
            ..LedgerConfig::default()
        };
        let engine = BalanceEngine::with_config(InMemoryStore::new(), &config);
        assert_eq!(engine.max_attempts(), 1);
    }
}
