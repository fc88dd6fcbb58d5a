//! Postgres-backed catalog and ledger (feature `postgres`).
//!
//! Implements the same synchronous store traits as [`InMemoryStore`], so the
//! balance engine, catalog service and queries run unchanged on top of it. The
//! async sqlx calls are driven on a tokio runtime handle supplied at
//! construction; the trait methods must therefore be called from plain threads,
//! never from inside that runtime's tasks.
//!
//! The balance column and the ledger live in the same database, so one
//! transaction covers both writes of a movement:
//!
//! 1. `SELECT … FOR UPDATE` the drug row (serializes writers across processes)
//! 2. compare its version with the engine's expectation
//! 3. `UPDATE drugs SET quantity, version`
//! 4. `INSERT INTO stock_movements … RETURNING sequence, occurred_at`
//! 5. commit
//!
//! ## Error Mapping
//!
//! | PostgreSQL code | `StoreError` | Scenario |
//! |-----------------|--------------|----------|
//! | `23505` | `Duplicate` | id, category name or username already taken |
//! | `23503` | `Referenced` / `Missing` | delete blocked by dependents, or unknown parent row |
//! | `40001`, `40P01` | `Concurrency` | serialization failure or deadlock (retried by the engine) |
//! | anything else | `Backend` | connection loss, pool closed, bad row data |
//!
//! [`InMemoryStore`]: super::InMemoryStore

use std::future::Future;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tokio::runtime::Handle;
use tracing::{info, instrument};
use uuid::Uuid;

use pharmastock_core::{AggregateRoot, CategoryId, DrugId, ExpectedVersion, MovementId, OperatorId};
use pharmastock_inventory::category::name_key;
use pharmastock_inventory::{
    Category, Direction, Drug, DrugStatus, Operator, Price, Quantity, StockMovement,
};

use super::r#trait::{CatalogStore, LedgerStore, MovementFilter, OperatorDirectory, StoreError};

const MIGRATION: &str = include_str!("../../migrations/0001_inventory.sql");

const DRUG_COLUMNS: &str = "id, name, category_id, specification, unit, price, quantity, \
     manufacturer, production_date, expiry_date, status, created_at, version";

const MOVEMENT_COLUMNS: &str = "sequence, id, direction, drug_id, quantity, unit_price, \
     counterparty, batch_label, occurred_at, operator_id, remark";

#[derive(Debug, Clone)]
pub struct PgInventoryStore {
    pool: PgPool,
    runtime: Handle,
}

impl PgInventoryStore {
    pub fn new(pool: PgPool, runtime: Handle) -> Self {
        Self { pool, runtime }
    }

    pub fn connect(database_url: &str, runtime: Handle) -> Result<Self, StoreError> {
        let pool = runtime
            .block_on(
                PgPoolOptions::new()
                    .max_connections(8)
                    .connect(database_url),
            )
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool, runtime))
    }

    /// Create tables and indexes if they are missing.
    #[instrument(skip(self), err)]
    pub fn migrate(&self) -> Result<(), StoreError> {
        self.block_on(sqlx::raw_sql(MIGRATION).execute(&self.pool))
            .map_err(|e| map_sqlx_error("migrate", e))?;
        info!("postgres schema ready");
        Ok(())
    }

    fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, StoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))
    }

    async fn insert_drug_tx(
        &self,
        drug: &Drug,
        opening: Option<StockMovement>,
    ) -> Result<Option<StockMovement>, StoreError> {
        let mut tx = self.begin().await?;

        sqlx::query(&format!(
            "INSERT INTO drugs ({DRUG_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"
        ))
        .bind(drug.id_typed().as_uuid())
        .bind(drug.name())
        .bind(drug.category_id().as_uuid())
        .bind(drug.specification())
        .bind(drug.unit())
        .bind(drug.price().map(Price::amount))
        .bind(drug.quantity())
        .bind(drug.manufacturer())
        .bind(drug.production_date())
        .bind(drug.expiry_date())
        .bind(status_str(drug.status()))
        .bind(drug.created_at())
        .bind(version_i64(drug.version())?)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_drug", e))?;

        let opening = match opening {
            Some(movement) => Some(insert_movement(&mut tx, movement).await?),
            None => None,
        };

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))?;
        Ok(opening)
    }

    async fn update_drug_tx(&self, drug: &Drug, expected: ExpectedVersion) -> Result<(), StoreError> {
        let id = drug.id_typed();
        let mut tx = self.begin().await?;
        let (version, quantity) = lock_drug(&mut tx, id).await?;
        if !expected.matches(version) {
            return Err(StoreError::Concurrency(format!(
                "drug {id}: expected {expected:?}, found {version}"
            )));
        }
        if quantity != drug.quantity() {
            return Err(StoreError::Backend(format!(
                "catalog update for drug {id} tried to change the balance"
            )));
        }

        sqlx::query(
            "UPDATE drugs SET name = $2, category_id = $3, specification = $4, unit = $5, \
             price = $6, manufacturer = $7, production_date = $8, expiry_date = $9, \
             status = $10, version = $11 \
             WHERE id = $1",
        )
        .bind(id.as_uuid())
        .bind(drug.name())
        .bind(drug.category_id().as_uuid())
        .bind(drug.specification())
        .bind(drug.unit())
        .bind(drug.price().map(Price::amount))
        .bind(drug.manufacturer())
        .bind(drug.production_date())
        .bind(drug.expiry_date())
        .bind(status_str(drug.status()))
        .bind(version_i64(drug.version())?)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_drug", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))
    }

    async fn post_movement_tx(
        &self,
        drug: &Drug,
        movement: StockMovement,
        expected: ExpectedVersion,
    ) -> Result<StockMovement, StoreError> {
        let id = drug.id_typed();
        let mut tx = self.begin().await?;
        let (version, _) = lock_drug(&mut tx, id).await?;
        if !expected.matches(version) {
            return Err(StoreError::Concurrency(format!(
                "drug {id}: expected {expected:?}, found {version}"
            )));
        }

        sqlx::query("UPDATE drugs SET quantity = $2, version = $3 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(drug.quantity())
            .bind(version_i64(drug.version())?)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update_balance", e))?;

        let committed = insert_movement(&mut tx, movement).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))?;
        Ok(committed)
    }
}

impl CatalogStore for PgInventoryStore {
    fn insert_category(&self, category: Category) -> Result<(), StoreError> {
        self.block_on(
            sqlx::query(
                "INSERT INTO categories (id, name, description, created_at) VALUES ($1, $2, $3, $4)",
            )
            .bind(category.id.as_uuid())
            .bind(&category.name)
            .bind(&category.description)
            .bind(category.created_at)
            .execute(&self.pool),
        )
        .map_err(|e| map_sqlx_error("insert_category", e))?;
        Ok(())
    }

    fn update_category(&self, category: Category) -> Result<(), StoreError> {
        let result = self
            .block_on(
                sqlx::query("UPDATE categories SET name = $2, description = $3 WHERE id = $1")
                    .bind(category.id.as_uuid())
                    .bind(&category.name)
                    .bind(&category.description)
                    .execute(&self.pool),
            )
            .map_err(|e| map_sqlx_error("update_category", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::missing("category", category.id));
        }
        Ok(())
    }

    fn delete_category(&self, id: CategoryId) -> Result<(), StoreError> {
        let result = self
            .block_on(
                sqlx::query("DELETE FROM categories WHERE id = $1")
                    .bind(id.as_uuid())
                    .execute(&self.pool),
            )
            .map_err(|e| map_sqlx_error("delete_category", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::missing("category", id));
        }
        Ok(())
    }

    fn find_category(&self, id: CategoryId) -> Result<Option<Category>, StoreError> {
        let row = self
            .block_on(
                sqlx::query(
                    "SELECT id, name, description, created_at FROM categories WHERE id = $1",
                )
                .bind(id.as_uuid())
                .fetch_optional(&self.pool),
            )
            .map_err(|e| map_sqlx_error("find_category", e))?;
        row.as_ref().map(category_from_row).transpose()
    }

    fn list_categories(&self) -> Result<Vec<Category>, StoreError> {
        let rows = self
            .block_on(
                sqlx::query(
                    "SELECT id, name, description, created_at FROM categories \
                     ORDER BY lower(name), id",
                )
                .fetch_all(&self.pool),
            )
            .map_err(|e| map_sqlx_error("list_categories", e))?;
        rows.iter().map(category_from_row).collect()
    }

    #[instrument(skip(self, drug, opening), fields(drug_id = %drug.id_typed()), err)]
    fn insert_drug(
        &self,
        drug: Drug,
        opening: Option<StockMovement>,
    ) -> Result<Option<StockMovement>, StoreError> {
        self.block_on(self.insert_drug_tx(&drug, opening))
    }

    fn update_drug(&self, drug: Drug, expected: ExpectedVersion) -> Result<(), StoreError> {
        self.block_on(self.update_drug_tx(&drug, expected))
    }

    fn delete_drug(&self, id: DrugId) -> Result<(), StoreError> {
        let result = self
            .block_on(
                sqlx::query("DELETE FROM drugs WHERE id = $1")
                    .bind(id.as_uuid())
                    .execute(&self.pool),
            )
            .map_err(|e| map_sqlx_error("delete_drug", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::missing("drug", id));
        }
        Ok(())
    }

    fn find_drug(&self, id: DrugId) -> Result<Option<Drug>, StoreError> {
        let row = self
            .block_on(
                sqlx::query(&format!("SELECT {DRUG_COLUMNS} FROM drugs WHERE id = $1"))
                    .bind(id.as_uuid())
                    .fetch_optional(&self.pool),
            )
            .map_err(|e| map_sqlx_error("find_drug", e))?;
        row.as_ref().map(drug_from_row).transpose()
    }

    fn list_drugs(&self) -> Result<Vec<Drug>, StoreError> {
        let rows = self
            .block_on(
                sqlx::query(&format!("SELECT {DRUG_COLUMNS} FROM drugs ORDER BY lower(name), id"))
                    .fetch_all(&self.pool),
            )
            .map_err(|e| map_sqlx_error("list_drugs", e))?;
        rows.iter().map(drug_from_row).collect()
    }
}

impl LedgerStore for PgInventoryStore {
    fn post_movement(
        &self,
        drug: &Drug,
        movement: StockMovement,
        expected: ExpectedVersion,
    ) -> Result<StockMovement, StoreError> {
        let id = drug.id_typed();
        if movement.drug_id != id {
            return Err(StoreError::Backend(format!(
                "movement targets drug {} but row is {id}",
                movement.drug_id
            )));
        }
        self.block_on(self.post_movement_tx(drug, movement, expected))
    }

    fn list_movements(&self, filter: &MovementFilter) -> Result<Vec<StockMovement>, StoreError> {
        let rows = self
            .block_on(
                sqlx::query(&format!(
                    "SELECT {MOVEMENT_COLUMNS} FROM stock_movements \
                     WHERE ($1::uuid IS NULL OR drug_id = $1) \
                       AND ($2::text IS NULL OR direction = $2) \
                     ORDER BY sequence ASC"
                ))
                .bind(filter.drug_id.map(Uuid::from))
                .bind(filter.direction.map(Direction::as_str))
                .fetch_all(&self.pool),
            )
            .map_err(|e| map_sqlx_error("list_movements", e))?;
        rows.iter().map(movement_from_row).collect()
    }
}

impl OperatorDirectory for PgInventoryStore {
    fn insert_operator(&self, operator: Operator) -> Result<(), StoreError> {
        self.block_on(
            sqlx::query(
                "INSERT INTO operators (id, username, display_name, created_at) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(operator.id.as_uuid())
            .bind(&operator.username)
            .bind(&operator.display_name)
            .bind(operator.created_at)
            .execute(&self.pool),
        )
        .map_err(|e| map_sqlx_error("insert_operator", e))?;
        Ok(())
    }

    fn find_operator(&self, id: OperatorId) -> Result<Option<Operator>, StoreError> {
        let row = self
            .block_on(
                sqlx::query(
                    "SELECT id, username, display_name, created_at FROM operators WHERE id = $1",
                )
                .bind(id.as_uuid())
                .fetch_optional(&self.pool),
            )
            .map_err(|e| map_sqlx_error("find_operator", e))?;
        row.as_ref().map(operator_from_row).transpose()
    }

    fn find_operator_by_username(&self, username: &str) -> Result<Option<Operator>, StoreError> {
        let row = self
            .block_on(
                sqlx::query(
                    "SELECT id, username, display_name, created_at FROM operators \
                     WHERE lower(username) = $1",
                )
                .bind(name_key(username))
                .fetch_optional(&self.pool),
            )
            .map_err(|e| map_sqlx_error("find_operator_by_username", e))?;
        row.as_ref().map(operator_from_row).transpose()
    }
}

/// Lock the drug row for the rest of the transaction and return its
/// `(version, quantity)`.
async fn lock_drug(
    tx: &mut Transaction<'static, Postgres>,
    id: DrugId,
) -> Result<(u64, i64), StoreError> {
    let row = sqlx::query("SELECT version, quantity FROM drugs WHERE id = $1 FOR UPDATE")
        .bind(id.as_uuid())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("lock_drug", e))?
        .ok_or_else(|| StoreError::missing("drug", id))?;

    let version: i64 = row.try_get("version").map_err(decode)?;
    let quantity: i64 = row.try_get("quantity").map_err(decode)?;
    let version = u64::try_from(version)
        .map_err(|_| StoreError::Backend(format!("negative drug version {version}")))?;
    Ok((version, quantity))
}

/// Append a movement. The caller holds the drug row lock, so the drug's latest
/// `occurred_at` is stable and the new entry never sorts before it.
async fn insert_movement(
    tx: &mut Transaction<'static, Postgres>,
    mut movement: StockMovement,
) -> Result<StockMovement, StoreError> {
    let row = sqlx::query(
        "INSERT INTO stock_movements \
         (id, direction, drug_id, quantity, unit_price, counterparty, batch_label, \
          occurred_at, operator_id, remark) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, \
                 GREATEST($8, (SELECT max(occurred_at) FROM stock_movements WHERE drug_id = $3)), \
                 $9, $10) \
         RETURNING sequence, occurred_at",
    )
    .bind(movement.id.as_uuid())
    .bind(movement.direction.as_str())
    .bind(movement.drug_id.as_uuid())
    .bind(movement.quantity.get())
    .bind(movement.unit_price.map(Price::amount))
    .bind(&movement.counterparty)
    .bind(&movement.batch_label)
    .bind(movement.occurred_at)
    .bind(movement.operator_id.map(Uuid::from))
    .bind(&movement.remark)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_movement", e))?;

    let sequence: i64 = row.try_get("sequence").map_err(decode)?;
    movement.sequence = u64::try_from(sequence)
        .map_err(|_| StoreError::Backend(format!("negative ledger sequence {sequence}")))?;
    movement.occurred_at = row.try_get("occurred_at").map_err(decode)?;
    Ok(movement)
}

fn category_from_row(row: &PgRow) -> Result<Category, StoreError> {
    Ok(Category {
        id: CategoryId::from_uuid(row.try_get("id").map_err(decode)?),
        name: row.try_get("name").map_err(decode)?,
        description: row.try_get("description").map_err(decode)?,
        created_at: row.try_get("created_at").map_err(decode)?,
    })
}

fn operator_from_row(row: &PgRow) -> Result<Operator, StoreError> {
    Ok(Operator {
        id: OperatorId::from_uuid(row.try_get("id").map_err(decode)?),
        username: row.try_get("username").map_err(decode)?,
        display_name: row.try_get("display_name").map_err(decode)?,
        created_at: row.try_get("created_at").map_err(decode)?,
    })
}

fn drug_from_row(row: &PgRow) -> Result<Drug, StoreError> {
    let price: Option<Decimal> = row.try_get("price").map_err(decode)?;
    let status: String = row.try_get("status").map_err(decode)?;
    let version: i64 = row.try_get("version").map_err(decode)?;
    let production_date: Option<NaiveDate> = row.try_get("production_date").map_err(decode)?;
    let expiry_date: Option<NaiveDate> = row.try_get("expiry_date").map_err(decode)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(decode)?;

    Ok(Drug::restore(
        DrugId::from_uuid(row.try_get("id").map_err(decode)?),
        row.try_get("name").map_err(decode)?,
        CategoryId::from_uuid(row.try_get("category_id").map_err(decode)?),
        row.try_get("specification").map_err(decode)?,
        row.try_get("unit").map_err(decode)?,
        price
            .map(Price::new)
            .transpose()
            .map_err(|e| StoreError::Backend(e.to_string()))?,
        row.try_get("quantity").map_err(decode)?,
        row.try_get("manufacturer").map_err(decode)?,
        production_date,
        expiry_date,
        parse_status(&status)?,
        created_at,
        u64::try_from(version)
            .map_err(|_| StoreError::Backend(format!("negative drug version {version}")))?,
    ))
}

fn movement_from_row(row: &PgRow) -> Result<StockMovement, StoreError> {
    let sequence: i64 = row.try_get("sequence").map_err(decode)?;
    let direction: String = row.try_get("direction").map_err(decode)?;
    let quantity: i64 = row.try_get("quantity").map_err(decode)?;
    let unit_price: Option<Decimal> = row.try_get("unit_price").map_err(decode)?;
    let operator_id: Option<Uuid> = row.try_get("operator_id").map_err(decode)?;
    let corrupt = |e: pharmastock_core::DomainError| StoreError::Backend(e.to_string());

    Ok(StockMovement {
        id: MovementId::from_uuid(row.try_get("id").map_err(decode)?),
        sequence: u64::try_from(sequence)
            .map_err(|_| StoreError::Backend(format!("negative ledger sequence {sequence}")))?,
        direction: match direction.as_str() {
            "in" => Direction::In,
            "out" => Direction::Out,
            other => return Err(StoreError::Backend(format!("unknown direction '{other}'"))),
        },
        drug_id: DrugId::from_uuid(row.try_get("drug_id").map_err(decode)?),
        quantity: Quantity::new(quantity).map_err(corrupt)?,
        unit_price: unit_price.map(Price::new).transpose().map_err(corrupt)?,
        counterparty: row.try_get("counterparty").map_err(decode)?,
        batch_label: row.try_get("batch_label").map_err(decode)?,
        occurred_at: row.try_get("occurred_at").map_err(decode)?,
        operator_id: operator_id.map(OperatorId::from_uuid),
        remark: row.try_get("remark").map_err(decode)?,
    })
}

fn status_str(status: DrugStatus) -> &'static str {
    match status {
        DrugStatus::Active => "active",
        DrugStatus::Inactive => "inactive",
    }
}

fn parse_status(raw: &str) -> Result<DrugStatus, StoreError> {
    match raw {
        "active" => Ok(DrugStatus::Active),
        "inactive" => Ok(DrugStatus::Inactive),
        other => Err(StoreError::Backend(format!("unknown drug status '{other}'"))),
    }
}

fn version_i64(version: u64) -> Result<i64, StoreError> {
    i64::try_from(version)
        .map_err(|_| StoreError::Backend(format!("version {version} overflows BIGINT")))
}

fn decode(err: sqlx::Error) -> StoreError {
    StoreError::Backend(format!("failed to decode row: {err}"))
}

/// Map SQLx errors to `StoreError`.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Duplicate(msg),
                // FK violation on DELETE means dependents exist; on INSERT/UPDATE the
                // parent row is missing.
                Some("23503") if operation.starts_with("delete") => StoreError::Referenced(msg),
                Some("23503") => StoreError::Missing {
                    entity: "referenced row",
                    id: msg,
                },
                Some("40001") | Some("40P01") => StoreError::Concurrency(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {operation}"))
        }
        other => StoreError::Backend(format!("sqlx error in {operation}: {other}")),
    }
}
