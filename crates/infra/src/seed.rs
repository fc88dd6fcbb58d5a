//! Demo catalog for local runs.

use core::str::FromStr;

use chrono::{Months, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;

use pharmastock_core::{CategoryId, DrugId, OperatorId};
use pharmastock_inventory::{NewDrug, StockIn, StockOut};

use crate::catalog::CatalogService;
use crate::engine::BalanceEngine;
use crate::error::{LedgerError, LedgerResult};
use crate::store::{CatalogStore, LedgerStore, OperatorDirectory};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    pub categories: Vec<CategoryId>,
    pub drugs: Vec<DrugId>,
    pub operator: Option<OperatorId>,
    pub movements: usize,
}

impl SeedReport {
    pub fn is_empty(&self) -> bool {
        self.categories.is_empty() && self.drugs.is_empty()
    }
}

struct DemoDrug {
    name: &'static str,
    category: usize,
    specification: &'static str,
    unit: &'static str,
    price: &'static str,
    opening: i64,
    manufacturer: &'static str,
    produced_months_ago: u32,
    shelf_life_months: u32,
}

const CATEGORIES: [(&str, &str); 3] = [
    ("Antibiotics", "Common antibiotic drugs"),
    ("Antipyretics & analgesics", "Fever and pain relief"),
    ("Vitamins", "Vitamins and nutritional supplements"),
];

const DRUGS: [DemoDrug; 3] = [
    DemoDrug {
        name: "Amoxicillin capsules",
        category: 0,
        specification: "0.25g*24",
        unit: "box",
        price: "18.50",
        opening: 120,
        manufacturer: "Huamei Pharmaceutical Co.",
        produced_months_ago: 2,
        shelf_life_months: 26,
    },
    DemoDrug {
        name: "Ibuprofen tablets",
        category: 1,
        specification: "0.2g*20",
        unit: "box",
        price: "15.00",
        opening: 80,
        manufacturer: "Kangning Medicine Ltd.",
        produced_months_ago: 1,
        shelf_life_months: 13,
    },
    DemoDrug {
        name: "Vitamin C tablets",
        category: 2,
        specification: "100mg*100",
        unit: "bottle",
        price: "22.00",
        opening: 45,
        manufacturer: "Nutrition Pharma Works",
        produced_months_ago: 3,
        shelf_life_months: 15,
    },
];

fn price(raw: &str) -> LedgerResult<Decimal> {
    Decimal::from_str(raw)
        .map_err(|e| LedgerError::InvalidArgument(format!("price '{raw}': {e}")))
}

/// Load the demo catalog into an empty store.
///
/// Does nothing (and returns an empty report) when any category already exists.
/// Every quantity goes through the engine, so seeded balances match the ledger.
pub fn seed_demo<S>(
    catalog: &CatalogService<S>,
    engine: &BalanceEngine<S>,
) -> LedgerResult<SeedReport>
where
    S: CatalogStore + LedgerStore + OperatorDirectory,
{
    if !engine.store().list_categories()?.is_empty() {
        info!("catalog not empty; skipping demo seed");
        return Ok(SeedReport::default());
    }

    let mut report = SeedReport::default();
    for (name, description) in CATEGORIES {
        let category = catalog.create_category(name, Some(description.to_string()))?;
        report.categories.push(category.id);
    }

    let today = Utc::now().date_naive();
    for demo in &DRUGS {
        let mut new = NewDrug::new(demo.name, report.categories[demo.category]);
        new.specification = Some(demo.specification.to_string());
        new.unit = Some(demo.unit.to_string());
        new.price = Some(price(demo.price)?);
        new.opening_stock = Some(demo.opening);
        new.manufacturer = Some(demo.manufacturer.to_string());
        new.production_date = today.checked_sub_months(Months::new(demo.produced_months_ago));
        new.expiry_date = new
            .production_date
            .and_then(|p| p.checked_add_months(Months::new(demo.shelf_life_months)));

        let created = catalog.create_drug(new)?;
        report.movements += usize::from(created.opening.is_some());
        report.drugs.push(created.drug.id_typed());
    }

    let admin = catalog.register_operator("admin", Some("Administrator".to_string()))?;
    report.operator = Some(admin.id);
    let operator = Some(admin.id);
    let batch = format!("IN-{}", Utc::now().format("%Y%m%d"));

    let (first, second) = (report.drugs[0], report.drugs[1]);
    engine.record_stock_in(
        StockIn::new(first, 50)
            .unit_price(price("17.00")?)
            .supplier("East China Pharma Warehouse")
            .batch_label(format!("{batch}-01"))
            .operator(operator)
            .remark("first delivery"),
    )?;
    engine.record_stock_in(
        StockIn::new(second, 30)
            .unit_price(price("14.00")?)
            .supplier("South China Pharma Warehouse")
            .batch_label(format!("{batch}-02"))
            .operator(operator)
            .remark("restock"),
    )?;
    engine.record_stock_out(
        StockOut::new(first, 10)
            .reason("outpatient use")
            .operator(operator)
            .remark("daily dispensing"),
    )?;
    engine.record_stock_out(
        StockOut::new(second, 5)
            .reason("disposal")
            .operator(operator)
            .remark("near expiry"),
    )?;
    report.movements += 4;

    info!(
        categories = report.categories.len(),
        drugs = report.drugs.len(),
        movements = report.movements,
        "demo catalog seeded"
    );
    Ok(report)
}
