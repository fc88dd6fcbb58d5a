//! Read-only query facade over the catalog and ledger.

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, instrument};

use pharmastock_core::DrugId;
use pharmastock_inventory::{Category, Drug, LedgerTotals, StockMovement};

use crate::error::{LedgerError, LedgerResult};
use crate::store::{CatalogStore, LedgerStore, MovementFilter};

/// A drug together with its category's display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DrugDetail {
    #[serde(flatten)]
    pub drug: Drug,
    pub category_name: Option<String>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub struct MovementSummary {
    pub drug_id: DrugId,
    #[serde(flatten)]
    pub totals: LedgerTotals,
    pub balance: i64,
}

#[derive(Debug)]
pub struct InventoryQueries<S> {
    store: S,
}

impl<S> InventoryQueries<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S> InventoryQueries<S>
where
    S: CatalogStore + LedgerStore,
{
    /// Drugs whose name contains `name_filter` (case-insensitive), ordered by
    /// name then id. A missing or blank filter lists everything.
    #[instrument(skip(self))]
    pub fn list_drugs(&self, name_filter: Option<&str>) -> LedgerResult<Vec<Drug>> {
        let needle = name_filter.map(str::trim).filter(|s| !s.is_empty());
        let mut drugs: Vec<Drug> = self
            .store
            .list_drugs()?
            .into_iter()
            .filter(|d| needle.is_none_or(|n| d.name_contains(n)))
            .collect();
        drugs.sort_by(|a, b| {
            a.name()
                .cmp(b.name())
                .then_with(|| a.id_typed().cmp(&b.id_typed()))
        });
        debug!(count = drugs.len(), "drugs listed");
        Ok(drugs)
    }

    pub fn list_categories(&self) -> LedgerResult<Vec<Category>> {
        let mut categories = self.store.list_categories()?;
        categories.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(categories)
    }

    /// Movements in ledger order.
    pub fn list_movements(&self, filter: &MovementFilter) -> LedgerResult<Vec<StockMovement>> {
        Ok(self.store.list_movements(filter)?)
    }

    pub fn drug_detail(&self, id: DrugId) -> LedgerResult<DrugDetail> {
        let drug = self
            .store
            .find_drug(id)?
            .ok_or_else(|| LedgerError::not_found("drug", id))?;
        let category_name = self.store.find_category(drug.category_id())?.map(|c| c.name);
        Ok(DrugDetail {
            drug,
            category_name,
        })
    }

    /// Drugs that expire on or before `on_or_before`, soonest first.
    pub fn expiring_drugs(&self, on_or_before: NaiveDate) -> LedgerResult<Vec<Drug>> {
        let mut drugs: Vec<Drug> = self
            .store
            .list_drugs()?
            .into_iter()
            .filter(|d| d.expiry_date().is_some_and(|e| e <= on_or_before))
            .collect();
        drugs.sort_by(|a, b| {
            a.expiry_date()
                .cmp(&b.expiry_date())
                .then_with(|| a.name().cmp(b.name()))
        });
        Ok(drugs)
    }

    pub fn movement_summary(&self, id: DrugId) -> LedgerResult<MovementSummary> {
        if self.store.find_drug(id)?.is_none() {
            return Err(LedgerError::not_found("drug", id));
        }
        let movements = self.store.list_movements(&MovementFilter::for_drug(id))?;
        let totals = LedgerTotals::from_movements(&movements);
        Ok(MovementSummary {
            drug_id: id,
            totals,
            balance: totals.balance(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use pharmastock_core::CategoryId;
    use pharmastock_inventory::{Direction, NewDrug, StockOut};

    use crate::catalog::CatalogService;
    use crate::engine::BalanceEngine;
    use crate::store::InMemoryStore;

    struct Fixture {
        catalog: CatalogService<Arc<InMemoryStore>>,
        engine: BalanceEngine<Arc<InMemoryStore>>,
        queries: InventoryQueries<Arc<InMemoryStore>>,
        category: CategoryId,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let catalog = CatalogService::new(Arc::clone(&store));
        let category = catalog.create_category("Antibiotics", None).unwrap().id;
        Fixture {
            catalog,
            engine: BalanceEngine::new(Arc::clone(&store)),
            queries: InventoryQueries::new(store),
            category,
        }
    }

    fn drug(fx: &Fixture, name: &str, opening: i64, expiry: Option<&str>) -> DrugId {
        let mut new = NewDrug::new(name, fx.category);
        new.opening_stock = Some(opening);
        new.expiry_date = pharmastock_inventory::parse_date("expiry date", expiry).unwrap();
        fx.catalog.create_drug(new).unwrap().drug.id_typed()
    }

    #[test]
    fn list_drugs_filters_and_sorts_by_name() {
        let fx = fixture();
        drug(&fx, "Cefalexin", 0, None);
        drug(&fx, "Amoxicillin capsules", 0, None);
        drug(&fx, "amoxicillin syrup", 0, None);

        let names: Vec<String> = fx
            .queries
            .list_drugs(Some("AMOXI"))
            .unwrap()
            .iter()
            .map(|d| d.name().to_string())
            .collect();
        assert_eq!(names, vec!["Amoxicillin capsules", "amoxicillin syrup"]);

        assert_eq!(fx.queries.list_drugs(Some("  ")).unwrap().len(), 3);
        assert_eq!(fx.queries.list_drugs(None).unwrap()[0].name(), "Amoxicillin capsules");
    }

    #[test]
    fn detail_carries_category_name() {
        let fx = fixture();
        let id = drug(&fx, "Amoxicillin", 0, None);
        let detail = fx.queries.drug_detail(id).unwrap();
        assert_eq!(detail.category_name.as_deref(), Some("Antibiotics"));

        let json = serde_json::to_value(&detail).unwrap();
        assert_eq!(json["category_name"], "Antibiotics");
        assert_eq!(json["name"], "Amoxicillin");
    }

    #[test]
    fn expiring_drugs_are_soonest_first() {
        let fx = fixture();
        drug(&fx, "Late", 0, Some("2027-01-01"));
        drug(&fx, "Soon", 0, Some("2026-11-01"));
        drug(&fx, "Never", 0, None);

        let cutoff = NaiveDate::from_ymd_opt(2026, 12, 31).unwrap();
        let names: Vec<String> = fx
            .queries
            .expiring_drugs(cutoff)
            .unwrap()
            .iter()
            .map(|d| d.name().to_string())
            .collect();
        assert_eq!(names, vec!["Soon"]);
    }

    #[test]
    fn summary_and_filtered_movements() {
        let fx = fixture();
        let id = drug(&fx, "Amoxicillin", 50, None);
        fx.engine.record_stock_out(StockOut::new(id, 10)).unwrap();

        let summary = fx.queries.movement_summary(id).unwrap();
        assert_eq!(summary.totals.received, 50);
        assert_eq!(summary.totals.dispensed, 10);
        assert_eq!(summary.totals.movements, 2);
        assert_eq!(summary.balance, 40);

        let outs = fx
            .queries
            .list_movements(&MovementFilter::for_drug(id).direction(Direction::Out))
            .unwrap();
        assert_eq!(outs.len(), 1);
        assert_eq!(outs[0].quantity.get(), 10);

        assert!(matches!(
            fx.queries.movement_summary(DrugId::new()),
            Err(LedgerError::NotFound { .. })
        ));
    }
}
