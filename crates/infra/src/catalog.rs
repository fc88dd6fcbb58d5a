//! Catalog management: categories, drugs and operators.

use chrono::Utc;
use tracing::{info, instrument, warn};

use pharmastock_core::{Aggregate, AggregateRoot, CategoryId, DrugId, ExpectedVersion, OperatorId};
use pharmastock_inventory::{
    Category, CategoryPatch, Drug, DrugPatch, DrugStatus, NewDrug, Operator, StockMovement,
};

use crate::config::LedgerConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::store::{CatalogStore, LedgerStore, OperatorDirectory};

/// A freshly created drug and the movement that carried its opening stock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedDrug {
    pub drug: Drug,
    pub opening: Option<StockMovement>,
}

#[derive(Debug)]
pub struct CatalogService<S> {
    store: S,
    max_attempts: u32,
}

impl<S> CatalogService<S> {
    pub fn new(store: S) -> Self {
        Self::with_config(store, &LedgerConfig::default())
    }

    pub fn with_config(store: S, config: &LedgerConfig) -> Self {
        Self {
            store,
            max_attempts: config.max_commit_attempts.max(1),
        }
    }
}

impl<S> CatalogService<S>
where
    S: CatalogStore + LedgerStore + OperatorDirectory,
{
    #[instrument(skip(self, description), err)]
    pub fn create_category(
        &self,
        name: &str,
        description: Option<String>,
    ) -> LedgerResult<Category> {
        let category = Category::create(CategoryId::new(), name, description, Utc::now())?;
        self.store.insert_category(category.clone())?;
        info!(category_id = %category.id, name = %category.name, "category created");
        Ok(category)
    }

    #[instrument(skip(self, patch), fields(category_id = %id), err)]
    pub fn update_category(&self, id: CategoryId, patch: CategoryPatch) -> LedgerResult<Category> {
        let mut category = self.find_category(id)?;
        category.apply_patch(&patch);
        self.store.update_category(category.clone())?;
        Ok(category)
    }

    #[instrument(skip(self), fields(category_id = %id), err)]
    pub fn delete_category(&self, id: CategoryId) -> LedgerResult<()> {
        self.store.delete_category(id)?;
        info!("category deleted");
        Ok(())
    }

    pub fn find_category(&self, id: CategoryId) -> LedgerResult<Category> {
        self.store
            .find_category(id)?
            .ok_or_else(|| LedgerError::not_found("category", id))
    }

    /// Create a drug. A positive opening stock is posted as the drug's first
    /// IN movement in the same store write.
    #[instrument(skip(self, new), fields(name = %new.name), err)]
    pub fn create_drug(&self, new: NewDrug) -> LedgerResult<CreatedDrug> {
        let mut drug = Drug::create(DrugId::new(), &new, Utc::now())?;
        self.find_category(new.category_id)?;

        let opening = match drug.opening_stock_in(&new) {
            Some(cmd) => {
                let movement = drug
                    .handle(&cmd.into())?
                    .into_iter()
                    .next()
                    .ok_or_else(|| {
                        LedgerError::InvalidArgument("opening stock decided no movement".into())
                    })?;
                drug.apply(&movement);
                Some(movement)
            }
            None => None,
        };

        let opening = self.store.insert_drug(drug.clone(), opening)?;
        info!(
            drug_id = %drug.id_typed(),
            opening_stock = drug.quantity(),
            "drug created"
        );
        Ok(CreatedDrug { drug, opening })
    }

    /// Edit catalog fields. The balance is left alone; a concurrent movement
    /// only forces a reload and another attempt.
    #[instrument(skip(self, patch), fields(drug_id = %id), err)]
    pub fn update_drug(&self, id: DrugId, patch: DrugPatch) -> LedgerResult<Drug> {
        if let Some(category_id) = patch.category_id {
            self.find_category(category_id)?;
        }

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let mut drug = self.find_drug(id)?;
            let expected = ExpectedVersion::Exact(drug.version());
            drug.apply_patch(&patch)?;

            match self.store.update_drug(drug.clone(), expected) {
                Ok(()) => return Ok(drug),
                Err(err) if err.is_transient() && attempt < self.max_attempts => {
                    warn!(attempt, error = %err, "drug update lost a race; retrying");
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    pub fn set_drug_status(&self, id: DrugId, status: DrugStatus) -> LedgerResult<Drug> {
        self.update_drug(
            id,
            DrugPatch {
                status: Some(status),
                ..DrugPatch::default()
            },
        )
    }

    #[instrument(skip(self), fields(drug_id = %id), err)]
    pub fn delete_drug(&self, id: DrugId) -> LedgerResult<()> {
        self.store.delete_drug(id)?;
        info!("drug deleted");
        Ok(())
    }

    pub fn find_drug(&self, id: DrugId) -> LedgerResult<Drug> {
        self.store
            .find_drug(id)?
            .ok_or_else(|| LedgerError::not_found("drug", id))
    }

    #[instrument(skip(self, display_name), err)]
    pub fn register_operator(
        &self,
        username: &str,
        display_name: Option<String>,
    ) -> LedgerResult<Operator> {
        let operator = Operator::register(OperatorId::new(), username, display_name, Utc::now())?;
        self.store.insert_operator(operator.clone())?;
        info!(operator_id = %operator.id, username = %operator.username, "operator registered");
        Ok(operator)
    }

    pub fn find_operator(&self, id: OperatorId) -> LedgerResult<Operator> {
        self.store
            .find_operator(id)?
            .ok_or_else(|| LedgerError::not_found("operator", id))
    }

    pub fn find_operator_by_username(&self, username: &str) -> LedgerResult<Operator> {
        self.store
            .find_operator_by_username(username)?
            .ok_or_else(|| LedgerError::not_found("operator", username.trim()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pharmastock_inventory::OPENING_BALANCE;
    use std::sync::Arc;

    use crate::store::{InMemoryStore, MovementFilter};

    fn service() -> CatalogService<Arc<InMemoryStore>> {
        CatalogService::new(Arc::new(InMemoryStore::new()))
    }

    #[test]
    fn opening_stock_is_posted_as_first_movement() {
        let catalog = service();
        let cat = catalog.create_category("Antipyretics", None).unwrap();
        let mut new = NewDrug::new("Ibuprofen tablets", cat.id);
        new.opening_stock = Some(80);

        let created = catalog.create_drug(new).unwrap();
        assert_eq!(created.drug.quantity(), 80);
        let opening = created.opening.unwrap();
        assert_eq!(opening.counterparty.as_deref(), Some(OPENING_BALANCE));
        assert!(opening.is_committed());

        let ledger = catalog
            .store
            .list_movements(&MovementFilter::for_drug(created.drug.id_typed()))
            .unwrap();
        assert_eq!(ledger, vec![opening]);
    }

    #[test]
    fn zero_opening_stock_posts_nothing() {
        let catalog = service();
        let cat = catalog.create_category("Vitamins", None).unwrap();
        let created = catalog.create_drug(NewDrug::new("Vitamin C", cat.id)).unwrap();
        assert_eq!(created.drug.quantity(), 0);
        assert!(created.opening.is_none());
    }

    #[test]
    fn drug_needs_an_existing_category() {
        let catalog = service();
        let err = catalog
            .create_drug(NewDrug::new("Orphan", CategoryId::new()))
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound { entity: "category", .. }));
    }

    #[test]
    fn duplicate_category_name_is_invalid() {
        let catalog = service();
        catalog.create_category("Antibiotics", None).unwrap();
        let err = catalog.create_category("ANTIBIOTICS", None).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidArgument(_)));
    }

    #[test]
    fn update_and_status_never_touch_quantity() {
        let catalog = service();
        let cat = catalog.create_category("Antibiotics", None).unwrap();
        let mut new = NewDrug::new("Amoxicillin", cat.id);
        new.opening_stock = Some(120);
        let id = catalog.create_drug(new).unwrap().drug.id_typed();

        let updated = catalog
            .update_drug(
                id,
                DrugPatch {
                    specification: Some("0.25g*24".into()),
                    expiry_date: Some(NaiveDate::from_ymd_opt(2027, 6, 30)),
                    ..DrugPatch::default()
                },
            )
            .unwrap();
        assert_eq!(updated.specification(), Some("0.25g*24"));
        assert_eq!(updated.quantity(), 120);

        let inactive = catalog.set_drug_status(id, DrugStatus::Inactive).unwrap();
        assert_eq!(inactive.status(), DrugStatus::Inactive);
        assert_eq!(catalog.find_drug(id).unwrap().quantity(), 120);
    }

    #[test]
    fn moving_drug_to_unknown_category_is_rejected() {
        let catalog = service();
        let cat = catalog.create_category("Antibiotics", None).unwrap();
        let id = catalog
            .create_drug(NewDrug::new("Amoxicillin", cat.id))
            .unwrap()
            .drug
            .id_typed();

        let err = catalog
            .update_drug(
                id,
                DrugPatch {
                    category_id: Some(CategoryId::new()),
                    ..DrugPatch::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound { entity: "category", .. }));
        assert_eq!(catalog.find_drug(id).unwrap().category_id(), cat.id);
    }

    #[test]
    fn deletes_respect_references() {
        let catalog = service();
        let cat = catalog.create_category("Antibiotics", None).unwrap();
        let mut new = NewDrug::new("Amoxicillin", cat.id);
        new.opening_stock = Some(1);
        let stocked = catalog.create_drug(new).unwrap().drug.id_typed();
        let empty = catalog
            .create_drug(NewDrug::new("Cefalexin", cat.id))
            .unwrap()
            .drug
            .id_typed();

        assert!(matches!(
            catalog.delete_drug(stocked),
            Err(LedgerError::ReferentialIntegrity(_))
        ));
        assert!(matches!(
            catalog.delete_category(cat.id),
            Err(LedgerError::ReferentialIntegrity(_))
        ));

        catalog.delete_drug(empty).unwrap();
        assert!(matches!(
            catalog.find_drug(empty),
            Err(LedgerError::NotFound { entity: "drug", .. })
        ));
    }

    #[test]
    fn operators_resolve_by_id_and_username() {
        let catalog = service();
        let op = catalog
            .register_operator("pharmacist", Some("On-duty pharmacist".into()))
            .unwrap();
        assert_eq!(catalog.find_operator(op.id).unwrap(), op);
        assert_eq!(catalog.find_operator_by_username("Pharmacist").unwrap(), op);
        assert!(matches!(
            catalog.register_operator("PHARMACIST", None),
            Err(LedgerError::InvalidArgument(_))
        ));
        assert!(matches!(
            catalog.find_operator_by_username("nobody"),
            Err(LedgerError::NotFound { entity: "operator", .. })
        ));
    }
}
