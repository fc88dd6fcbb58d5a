use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;

use pharmastock_core::DrugId;
use pharmastock_infra::{
    seed_demo, BalanceAudit, BalanceEngine, CatalogService, CatalogStore, DrugDetail,
    InMemoryStore, InventoryQueries, LedgerConfig, LedgerStore, MovementFilter,
    OperatorDirectory, SeedReport,
};
use pharmastock_inventory::{Category, StockMovement};

#[derive(Debug, Serialize)]
struct Snapshot {
    seed: SeedReport,
    categories: Vec<Category>,
    drugs: Vec<DrugDetail>,
    audits: Vec<BalanceAudit>,
    movements: Vec<StockMovement>,
}

fn main() -> anyhow::Result<()> {
    pharmastock_observability::init();

    let config = LedgerConfig::from_env().context("invalid configuration")?;
    tracing::info!(
        max_commit_attempts = config.max_commit_attempts,
        seed_demo = config.seed_demo,
        postgres = config.database_url.is_some(),
        "starting pharmastock"
    );

    match config.database_url.as_deref() {
        Some(url) => run_on_postgres(url, &config),
        None => run(Arc::new(InMemoryStore::new()), &config),
    }
}

fn run<S>(store: Arc<S>, config: &LedgerConfig) -> anyhow::Result<()>
where
    S: CatalogStore + LedgerStore + OperatorDirectory,
{
    let catalog = CatalogService::with_config(Arc::clone(&store), config);
    let engine = BalanceEngine::with_config(Arc::clone(&store), config);
    let queries = InventoryQueries::new(Arc::clone(&store));

    let seed = if config.seed_demo {
        seed_demo(&catalog, &engine).context("seeding demo catalog")?
    } else {
        SeedReport::default()
    };

    let drug_ids: Vec<DrugId> = queries
        .list_drugs(None)?
        .iter()
        .map(|d| d.id_typed())
        .collect();
    let snapshot = Snapshot {
        seed,
        categories: queries.list_categories()?,
        drugs: drug_ids
            .iter()
            .map(|id| queries.drug_detail(*id))
            .collect::<Result<_, _>>()?,
        audits: drug_ids
            .iter()
            .map(|id| engine.audit_balance(*id))
            .collect::<Result<_, _>>()?,
        movements: queries.list_movements(&MovementFilter::all())?,
    };

    if let Some(drift) = snapshot.audits.iter().find(|a| !a.consistent) {
        anyhow::bail!(
            "drug {} balance {} disagrees with ledger {}",
            drift.drug_id,
            drift.cached,
            drift.ledger
        );
    }

    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

#[cfg(feature = "postgres")]
fn run_on_postgres(url: &str, config: &LedgerConfig) -> anyhow::Result<()> {
    use pharmastock_infra::store::PgInventoryStore;

    let runtime = tokio::runtime::Runtime::new().context("starting tokio runtime")?;
    let store = PgInventoryStore::connect(url, runtime.handle().clone())
        .context("connecting to postgres")?;
    store.migrate().context("applying schema")?;
    run(Arc::new(store), config)
}

#[cfg(not(feature = "postgres"))]
fn run_on_postgres(_url: &str, _config: &LedgerConfig) -> anyhow::Result<()> {
    anyhow::bail!(
        "{} is set but this build has no postgres support; rebuild with --features postgres",
        pharmastock_infra::config::DATABASE_URL_VAR
    )
}
