use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};

use pharmastock_core::{AggregateRoot, CategoryId, DrugId, ExpectedVersion, OperatorId};
use pharmastock_inventory::category::name_key;
use pharmastock_inventory::{Category, Drug, Operator, StockMovement};

use super::r#trait::{CatalogStore, LedgerStore, MovementFilter, OperatorDirectory, StoreError};

/// A drug row and its ledger partition, guarded together.
#[derive(Debug)]
struct DrugRow {
    drug: Drug,
    ledger: Vec<StockMovement>,
}

/// Last sequence number handed out and the time it was stamped with.
#[derive(Debug, Default)]
struct LedgerClock {
    sequence: u64,
    last_at: Option<DateTime<Utc>>,
}

/// In-memory catalog + ledger store.
///
/// Each drug row owns its ledger partition behind its own mutex, so a commit for
/// one drug never waits on another. Lock order is fixed to avoid deadlocks:
/// `categories` → `drugs` → a single row → `clock`.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    categories: RwLock<HashMap<CategoryId, Category>>,
    drugs: RwLock<HashMap<DrugId, Arc<Mutex<DrugRow>>>>,
    operators: RwLock<HashMap<OperatorId, Operator>>,
    clock: Mutex<LedgerClock>,
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Backend("lock poisoned".to_string())
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign the next ledger sequence. `occurred_at` is raised to the last
    /// stamped time if needed, so timestamps never decrease along the ledger.
    fn stamp(&self, movement: &mut StockMovement) -> Result<(), StoreError> {
        let mut clock = self.clock.lock().map_err(poisoned)?;
        clock.sequence += 1;
        if let Some(last) = clock.last_at {
            movement.occurred_at = movement.occurred_at.max(last);
        }
        clock.last_at = Some(movement.occurred_at);
        movement.sequence = clock.sequence;
        Ok(())
    }

    fn ensure_category_name_free(
        categories: &HashMap<CategoryId, Category>,
        candidate: &Category,
    ) -> Result<(), StoreError> {
        let key = candidate.name_key();
        let taken = categories
            .values()
            .any(|c| c.id != candidate.id && c.name_key() == key);
        if taken {
            return Err(StoreError::Duplicate(format!(
                "category name '{}' already exists",
                candidate.name
            )));
        }
        Ok(())
    }
}

impl CatalogStore for InMemoryStore {
    fn insert_category(&self, category: Category) -> Result<(), StoreError> {
        let mut categories = self.categories.write().map_err(poisoned)?;
        if categories.contains_key(&category.id) {
            return Err(StoreError::Duplicate(format!("category id {}", category.id)));
        }
        Self::ensure_category_name_free(&categories, &category)?;
        categories.insert(category.id, category);
        Ok(())
    }

    fn update_category(&self, category: Category) -> Result<(), StoreError> {
        let mut categories = self.categories.write().map_err(poisoned)?;
        if !categories.contains_key(&category.id) {
            return Err(StoreError::missing("category", category.id));
        }
        Self::ensure_category_name_free(&categories, &category)?;
        categories.insert(category.id, category);
        Ok(())
    }

    fn delete_category(&self, id: CategoryId) -> Result<(), StoreError> {
        let mut categories = self.categories.write().map_err(poisoned)?;
        if !categories.contains_key(&id) {
            return Err(StoreError::missing("category", id));
        }

        let drugs = self.drugs.read().map_err(poisoned)?;
        let mut referencing = 0usize;
        for row in drugs.values() {
            let row = row.lock().map_err(poisoned)?;
            if row.drug.category_id() == id {
                referencing += 1;
            }
        }
        if referencing > 0 {
            return Err(StoreError::Referenced(format!(
                "category {id} is used by {referencing} drug(s)"
            )));
        }

        categories.remove(&id);
        Ok(())
    }

    fn find_category(&self, id: CategoryId) -> Result<Option<Category>, StoreError> {
        let categories = self.categories.read().map_err(poisoned)?;
        Ok(categories.get(&id).cloned())
    }

    fn list_categories(&self) -> Result<Vec<Category>, StoreError> {
        let categories = self.categories.read().map_err(poisoned)?;
        Ok(categories.values().cloned().collect())
    }

    fn insert_drug(
        &self,
        drug: Drug,
        opening: Option<StockMovement>,
    ) -> Result<Option<StockMovement>, StoreError> {
        let categories = self.categories.read().map_err(poisoned)?;
        if !categories.contains_key(&drug.category_id()) {
            return Err(StoreError::missing("category", drug.category_id()));
        }

        let mut drugs = self.drugs.write().map_err(poisoned)?;
        let id = drug.id_typed();
        if drugs.contains_key(&id) {
            return Err(StoreError::Duplicate(format!("drug id {id}")));
        }

        let opening = match opening {
            Some(mut movement) => {
                if movement.drug_id != id {
                    return Err(StoreError::Backend(format!(
                        "opening movement targets drug {} instead of {id}",
                        movement.drug_id
                    )));
                }
                self.stamp(&mut movement)?;
                Some(movement)
            }
            None => None,
        };

        let row = DrugRow {
            drug,
            ledger: opening.iter().cloned().collect(),
        };
        drugs.insert(id, Arc::new(Mutex::new(row)));
        Ok(opening)
    }

    fn update_drug(&self, drug: Drug, expected: ExpectedVersion) -> Result<(), StoreError> {
        let categories = self.categories.read().map_err(poisoned)?;
        if !categories.contains_key(&drug.category_id()) {
            return Err(StoreError::missing("category", drug.category_id()));
        }

        let drugs = self.drugs.read().map_err(poisoned)?;
        let id = drug.id_typed();
        let slot = drugs.get(&id).ok_or_else(|| StoreError::missing("drug", id))?;
        let mut row = slot.lock().map_err(poisoned)?;

        let current = row.drug.version();
        if !expected.matches(current) {
            return Err(StoreError::Concurrency(format!(
                "drug {id}: expected {expected:?}, found {current}"
            )));
        }
        if drug.quantity() != row.drug.quantity() {
            return Err(StoreError::Backend(format!(
                "catalog update for drug {id} tried to change the balance"
            )));
        }

        row.drug = drug;
        Ok(())
    }

    fn delete_drug(&self, id: DrugId) -> Result<(), StoreError> {
        let mut drugs = self.drugs.write().map_err(poisoned)?;
        let slot = drugs.get(&id).ok_or_else(|| StoreError::missing("drug", id))?;
        {
            let row = slot.lock().map_err(poisoned)?;
            if !row.ledger.is_empty() {
                return Err(StoreError::Referenced(format!(
                    "drug {id} has {} stock movement(s)",
                    row.ledger.len()
                )));
            }
        }
        drugs.remove(&id);
        Ok(())
    }

    fn find_drug(&self, id: DrugId) -> Result<Option<Drug>, StoreError> {
        let drugs = self.drugs.read().map_err(poisoned)?;
        match drugs.get(&id) {
            Some(slot) => Ok(Some(slot.lock().map_err(poisoned)?.drug.clone())),
            None => Ok(None),
        }
    }

    fn list_drugs(&self) -> Result<Vec<Drug>, StoreError> {
        let drugs = self.drugs.read().map_err(poisoned)?;
        drugs
            .values()
            .map(|slot| -> Result<Drug, StoreError> {
                Ok(slot.lock().map_err(poisoned)?.drug.clone())
            })
            .collect()
    }
}

impl LedgerStore for InMemoryStore {
    fn post_movement(
        &self,
        drug: &Drug,
        mut movement: StockMovement,
        expected: ExpectedVersion,
    ) -> Result<StockMovement, StoreError> {
        let id = drug.id_typed();
        if movement.drug_id != id {
            return Err(StoreError::Backend(format!(
                "movement targets drug {} but row is {id}",
                movement.drug_id
            )));
        }

        // Shared map lock: keeps the row from being deleted while we commit,
        // without blocking commits on other drugs.
        let drugs = self.drugs.read().map_err(poisoned)?;
        let slot = drugs.get(&id).ok_or_else(|| StoreError::missing("drug", id))?;
        let mut row = slot.lock().map_err(poisoned)?;

        let current = row.drug.version();
        if !expected.matches(current) {
            return Err(StoreError::Concurrency(format!(
                "drug {id}: expected {expected:?}, found {current}"
            )));
        }

        self.stamp(&mut movement)?;
        row.drug = drug.clone();
        row.ledger.push(movement.clone());
        Ok(movement)
    }

    fn list_movements(&self, filter: &MovementFilter) -> Result<Vec<StockMovement>, StoreError> {
        let drugs = self.drugs.read().map_err(poisoned)?;
        let mut out = Vec::new();

        let rows: Vec<&Arc<Mutex<DrugRow>>> = match filter.drug_id {
            Some(id) => drugs.get(&id).into_iter().collect(),
            None => drugs.values().collect(),
        };
        for slot in rows {
            let row = slot.lock().map_err(poisoned)?;
            out.extend(row.ledger.iter().filter(|m| filter.matches(m)).cloned());
        }

        out.sort_by_key(|m| m.sequence);
        Ok(out)
    }
}

impl OperatorDirectory for InMemoryStore {
    fn insert_operator(&self, operator: Operator) -> Result<(), StoreError> {
        let mut operators = self.operators.write().map_err(poisoned)?;
        let key = name_key(&operator.username);
        if operators.contains_key(&operator.id)
            || operators.values().any(|o| name_key(&o.username) == key)
        {
            return Err(StoreError::Duplicate(format!(
                "operator '{}' already exists",
                operator.username
            )));
        }
        operators.insert(operator.id, operator);
        Ok(())
    }

    fn find_operator(&self, id: OperatorId) -> Result<Option<Operator>, StoreError> {
        let operators = self.operators.read().map_err(poisoned)?;
        Ok(operators.get(&id).cloned())
    }

    fn find_operator_by_username(&self, username: &str) -> Result<Option<Operator>, StoreError> {
        let operators = self.operators.read().map_err(poisoned)?;
        let key = name_key(username);
        Ok(operators
            .values()
            .find(|o| name_key(&o.username) == key)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pharmastock_core::Aggregate;
    use pharmastock_inventory::{NewDrug, StockIn, StockOut};

    fn category(store: &InMemoryStore, name: &str) -> CategoryId {
        let c = Category::create(CategoryId::new(), name, None, Utc::now()).unwrap();
        let id = c.id;
        store.insert_category(c).unwrap();
        id
    }

    fn drug(store: &InMemoryStore, category_id: CategoryId) -> Drug {
        let d = Drug::create(DrugId::new(), &NewDrug::new("Ibuprofen", category_id), Utc::now())
            .unwrap();
        store.insert_drug(d.clone(), None).unwrap();
        d
    }

    fn decide(drug: &Drug, qty: i64) -> (Drug, StockMovement) {
        let movement = drug
            .handle(&StockIn::new(drug.id_typed(), qty).into())
            .unwrap()
            .remove(0);
        let mut next = drug.clone();
        next.apply(&movement);
        (next, movement)
    }

    #[test]
    fn post_movement_assigns_increasing_sequences() {
        let store = InMemoryStore::new();
        let d = drug(&store, category(&store, "Analgesics"));

        let (next, m) = decide(&d, 5);
        let first = store
            .post_movement(&next, m, ExpectedVersion::Exact(d.version()))
            .unwrap();
        let (next2, m2) = decide(&next, 7);
        let second = store
            .post_movement(&next2, m2, ExpectedVersion::Exact(next.version()))
            .unwrap();

        assert!(first.sequence >= 1);
        assert!(second.sequence > first.sequence);
        assert_eq!(store.find_drug(d.id_typed()).unwrap().unwrap().quantity(), 12);
    }

    #[test]
    fn ledger_time_never_runs_backwards() {
        let store = InMemoryStore::new();
        let d = drug(&store, category(&store, "Analgesics"));

        let (next, m) = decide(&d, 5);
        let first = store
            .post_movement(&next, m, ExpectedVersion::Exact(d.version()))
            .unwrap();
        let (next2, mut late) = decide(&next, 5);
        late.occurred_at = first.occurred_at - chrono::Duration::days(1);
        let second = store
            .post_movement(&next2, late, ExpectedVersion::Exact(next.version()))
            .unwrap();

        assert!(second.sequence > first.sequence);
        assert!(second.occurred_at >= first.occurred_at);
    }

    #[test]
    fn stale_version_is_a_concurrency_error_and_changes_nothing() {
        let store = InMemoryStore::new();
        let d = drug(&store, category(&store, "Analgesics"));
        let (next, m) = decide(&d, 5);
        store
            .post_movement(&next, m, ExpectedVersion::Exact(d.version()))
            .unwrap();

        // Decided from the stale snapshot.
        let (stale_next, stale_m) = decide(&d, 3);
        let err = store
            .post_movement(&stale_next, stale_m, ExpectedVersion::Exact(d.version()))
            .unwrap_err();
        assert!(err.is_transient());

        assert_eq!(store.find_drug(d.id_typed()).unwrap().unwrap().quantity(), 5);
        assert_eq!(store.list_movements(&MovementFilter::all()).unwrap().len(), 1);
    }

    #[test]
    fn category_names_are_unique_case_insensitively() {
        let store = InMemoryStore::new();
        category(&store, "Vitamins");
        let dup = Category::create(CategoryId::new(), "  vitamins ", None, Utc::now()).unwrap();
        assert!(matches!(
            store.insert_category(dup),
            Err(StoreError::Duplicate(_))
        ));
    }

    #[test]
    fn referenced_rows_cannot_be_deleted() {
        let store = InMemoryStore::new();
        let cat = category(&store, "Antibiotics");
        let d = drug(&store, cat);

        assert!(matches!(
            store.delete_category(cat),
            Err(StoreError::Referenced(_))
        ));

        let (next, m) = decide(&d, 1);
        store
            .post_movement(&next, m, ExpectedVersion::Exact(d.version()))
            .unwrap();
        assert!(matches!(
            store.delete_drug(d.id_typed()),
            Err(StoreError::Referenced(_))
        ));
    }

    #[test]
    fn unreferenced_rows_can_be_deleted() {
        let store = InMemoryStore::new();
        let cat = category(&store, "Antibiotics");
        let d = drug(&store, cat);

        store.delete_drug(d.id_typed()).unwrap();
        store.delete_category(cat).unwrap();
        assert!(store.find_drug(d.id_typed()).unwrap().is_none());
        assert!(matches!(
            store.delete_category(cat),
            Err(StoreError::Missing { entity: "category", .. })
        ));
    }

    #[test]
    fn drug_insert_requires_existing_category() {
        let store = InMemoryStore::new();
        let d = Drug::create(DrugId::new(), &NewDrug::new("Orphan", CategoryId::new()), Utc::now())
            .unwrap();
        assert!(matches!(
            store.insert_drug(d, None),
            Err(StoreError::Missing { entity: "category", .. })
        ));
    }

    #[test]
    fn list_movements_filters_by_drug_and_direction() {
        let store = InMemoryStore::new();
        let cat = category(&store, "Antibiotics");
        let a = drug(&store, cat);
        let b = drug(&store, cat);

        let (a1, m) = decide(&a, 10);
        store.post_movement(&a1, m, ExpectedVersion::Exact(a.version())).unwrap();
        let (b1, m) = decide(&b, 4);
        store.post_movement(&b1, m, ExpectedVersion::Exact(b.version())).unwrap();

        let out = a1
            .handle(&StockOut::new(a.id_typed(), 3).into())
            .unwrap()
            .remove(0);
        let mut a2 = a1.clone();
        a2.apply(&out);
        store.post_movement(&a2, out, ExpectedVersion::Exact(a1.version())).unwrap();

        let only_a = store.list_movements(&MovementFilter::for_drug(a.id_typed())).unwrap();
        assert_eq!(only_a.len(), 2);
        assert!(only_a.windows(2).all(|w| w[0].sequence < w[1].sequence));

        let ins = store
            .list_movements(&MovementFilter::all().direction(pharmastock_inventory::Direction::In))
            .unwrap();
        assert_eq!(ins.len(), 2);
    }

    #[test]
    fn operators_are_found_by_username_ignoring_case() {
        let store = InMemoryStore::new();
        let op = Operator::register(OperatorId::new(), "Admin", None, Utc::now()).unwrap();
        store.insert_operator(op.clone()).unwrap();

        assert_eq!(store.find_operator_by_username(" admin ").unwrap(), Some(op.clone()));
        let dup = Operator::register(OperatorId::new(), "ADMIN", None, Utc::now()).unwrap();
        assert!(matches!(store.insert_operator(dup), Err(StoreError::Duplicate(_))));
    }
}
