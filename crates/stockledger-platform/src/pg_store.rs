use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use stockledger_core::{
    EntryQuery, LedgerEntry, LedgerError, LedgerResult, LedgerStore, LedgerTx, NewLedgerEntry,
    NewStagedMaterial, NewStockRecord, Ownership, StagedMaterial, StockKey, StockQuery,
    StockRecord,
};

const STOCK_COLUMNS: &str = "id, stock_id, location_id, customer_id, category, description, \
     notes, quantity, min_quantity, max_quantity, is_active, unit_cost, ownership, updated_at";

const ENTRY_COLUMNS: &str = "id, stock_record_id, stock_id, location_id, customer_id, category, \
     quantity_change, unit_cost, remaining_quantity, source_entry_id, notes, reference, \
     recorded_at";

const STAGED_COLUMNS: &str = "id, customer_id, stock_id, category, description, quantity, \
     unit_cost, min_quantity, max_quantity, is_active, ownership, staged_at";

/// Ledger store backed by PostgreSQL.
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    type Tx = PgLedgerTx;

    async fn begin(&self) -> LedgerResult<PgLedgerTx> {
        let tx = self.pool.begin().await.map_err(LedgerError::store)?;
        Ok(PgLedgerTx { tx })
    }

    async fn entries(&self, query: &EntryQuery) -> LedgerResult<Vec<LedgerEntry>> {
        let sql = format!(
            r#"
            SELECT {ENTRY_COLUMNS}
            FROM ledger_entries
            WHERE ($1::bigint IS NULL OR stock_record_id = $1)
              AND ($2::text IS NULL OR stock_id = $2)
              AND ($3::bigint IS NULL OR customer_id = $3)
              AND ($4::text IS NULL OR category = $4)
              AND ($5::bigint IS NULL OR location_id = $5)
              AND ($6::timestamptz IS NULL OR recorded_at >= $6)
              AND ($7::timestamptz IS NULL OR recorded_at <= $7)
            ORDER BY id ASC
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(query.stock_record_id)
            .bind(query.stock_id.as_deref())
            .bind(query.customer_id)
            .bind(query.category.as_deref())
            .bind(query.location_id)
            .bind(query.recorded_from)
            .bind(query.recorded_to)
            .fetch_all(&self.pool)
            .await
            .map_err(LedgerError::store)?;

        rows.iter().map(entry_from_row).collect()
    }

    async fn stock_records(&self, query: &StockQuery) -> LedgerResult<Vec<StockRecord>> {
        let sql = format!(
            r#"
            SELECT {STOCK_COLUMNS}
            FROM stock_records
            WHERE ($1::text IS NULL OR stock_id = $1)
              AND ($2::bigint IS NULL OR customer_id = $2)
              AND ($3::bigint IS NULL OR location_id = $3)
            ORDER BY updated_at ASC, id ASC
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(query.stock_id.as_deref())
            .bind(query.customer_id)
            .bind(query.location_id)
            .fetch_all(&self.pool)
            .await
            .map_err(LedgerError::store)?;

        rows.iter().map(stock_from_row).collect()
    }

    async fn staged_materials(&self) -> LedgerResult<Vec<StagedMaterial>> {
        let sql = format!("SELECT {STAGED_COLUMNS} FROM staged_materials ORDER BY id ASC");
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(LedgerError::store)?;

        rows.iter().map(staged_from_row).collect()
    }
}

/// One PostgreSQL transaction. Dropping it without committing rolls it back.
pub struct PgLedgerTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn lock_stock(&mut self, key: &StockKey) -> LedgerResult<Option<StockRecord>> {
        let sql = format!(
            r#"
            SELECT {STOCK_COLUMNS}
            FROM stock_records
            WHERE stock_id = $1 AND location_id = $2 AND ownership = $3
            FOR UPDATE
            "#
        );
        let row = sqlx::query(&sql)
            .bind(&key.stock_id)
            .bind(key.location_id)
            .bind(key.ownership.as_str())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(LedgerError::store)?;

        row.as_ref().map(stock_from_row).transpose()
    }

    async fn insert_stock(&mut self, record: NewStockRecord) -> LedgerResult<StockRecord> {
        let sql = format!(
            r#"
            INSERT INTO stock_records (
                stock_id,
                location_id,
                customer_id,
                category,
                description,
                notes,
                quantity,
                min_quantity,
                max_quantity,
                is_active,
                unit_cost,
                ownership,
                updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING {STOCK_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(&record.key.stock_id)
            .bind(record.key.location_id)
            .bind(record.defaults.customer_id)
            .bind(&record.defaults.category)
            .bind(&record.defaults.description)
            .bind(&record.defaults.notes)
            .bind(record.quantity)
            .bind(record.defaults.min_quantity)
            .bind(record.defaults.max_quantity)
            .bind(record.defaults.is_active)
            .bind(record.defaults.unit_cost)
            .bind(record.key.ownership.as_str())
            .bind(record.updated_at)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(LedgerError::store)?;

        stock_from_row(&row)
    }

    async fn update_stock_quantity(
        &mut self,
        stock_record_id: i64,
        quantity: i64,
        updated_at: DateTime<Utc>,
    ) -> LedgerResult<StockRecord> {
        let sql = format!(
            r#"
            UPDATE stock_records
            SET quantity = $2, updated_at = $3
            WHERE id = $1
            RETURNING {STOCK_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(stock_record_id)
            .bind(quantity)
            .bind(updated_at)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(LedgerError::store)?
            .ok_or_else(|| {
                LedgerError::store(format!("stock record {stock_record_id} does not exist"))
            })?;

        stock_from_row(&row)
    }

    async fn delete_stock(&mut self, stock_record_id: i64) -> LedgerResult<()> {
        let result = sqlx::query("DELETE FROM stock_records WHERE id = $1")
            .bind(stock_record_id)
            .execute(&mut *self.tx)
            .await
            .map_err(LedgerError::store)?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::store(format!(
                "stock record {stock_record_id} does not exist"
            )));
        }
        Ok(())
    }

    async fn open_lots(&mut self, stock_record_id: i64) -> LedgerResult<Vec<LedgerEntry>> {
        let sql = format!(
            r#"
            SELECT {ENTRY_COLUMNS}
            FROM ledger_entries
            WHERE stock_record_id = $1
              AND quantity_change > 0
              AND remaining_quantity > 0
            ORDER BY id ASC
            FOR UPDATE
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(stock_record_id)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(LedgerError::store)?;

        rows.iter().map(entry_from_row).collect()
    }

    async fn latest_deduction(
        &mut self,
        stock_record_id: i64,
    ) -> LedgerResult<Option<LedgerEntry>> {
        let sql = format!(
            r#"
            SELECT {ENTRY_COLUMNS}
            FROM ledger_entries
            WHERE stock_record_id = $1 AND quantity_change < 0
            ORDER BY id DESC
            LIMIT 1
            "#
        );
        let row = sqlx::query(&sql)
            .bind(stock_record_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(LedgerError::store)?;

        row.as_ref().map(entry_from_row).transpose()
    }

    async fn append_entry(&mut self, entry: NewLedgerEntry) -> LedgerResult<LedgerEntry> {
        let sql = format!(
            r#"
            INSERT INTO ledger_entries (
                stock_record_id,
                stock_id,
                location_id,
                customer_id,
                category,
                quantity_change,
                unit_cost,
                remaining_quantity,
                source_entry_id,
                notes,
                reference,
                recorded_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING {ENTRY_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(entry.stock_record_id)
            .bind(&entry.stock_id)
            .bind(entry.location_id)
            .bind(entry.customer_id)
            .bind(&entry.category)
            .bind(entry.quantity_change)
            .bind(entry.unit_cost)
            .bind(entry.remaining_quantity)
            .bind(entry.source_entry_id)
            .bind(&entry.notes)
            .bind(entry.reference.as_deref())
            .bind(entry.recorded_at)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(LedgerError::store)?;

        entry_from_row(&row)
    }

    async fn grow_lot(
        &mut self,
        entry_id: i64,
        quantity: i64,
        recorded_at: DateTime<Utc>,
    ) -> LedgerResult<LedgerEntry> {
        let sql = format!(
            r#"
            UPDATE ledger_entries
            SET quantity_change = quantity_change + $2,
                remaining_quantity = remaining_quantity + $2,
                recorded_at = $3
            WHERE id = $1 AND quantity_change > 0
            RETURNING {ENTRY_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(entry_id)
            .bind(quantity)
            .bind(recorded_at)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|err| {
                if is_numeric_overflow(&err) {
                    LedgerError::InvalidQuantity(quantity)
                } else {
                    LedgerError::store(err)
                }
            })?
            .ok_or_else(|| LedgerError::store(format!("lot {entry_id} does not exist")))?;

        entry_from_row(&row)
    }

    async fn set_lot_remaining(&mut self, entry_id: i64, remaining: i64) -> LedgerResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE ledger_entries
            SET remaining_quantity = $2
            WHERE id = $1
              AND quantity_change > 0
              AND $2 BETWEEN 0 AND quantity_change
            "#,
        )
        .bind(entry_id)
        .bind(remaining)
        .execute(&mut *self.tx)
        .await
        .map_err(LedgerError::store)?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::store(format!(
                "remaining quantity {remaining} out of range for lot {entry_id}"
            )));
        }
        Ok(())
    }

    async fn insert_staged(
        &mut self,
        material: NewStagedMaterial,
    ) -> LedgerResult<StagedMaterial> {
        let sql = format!(
            r#"
            INSERT INTO staged_materials (
                customer_id,
                stock_id,
                category,
                description,
                quantity,
                unit_cost,
                min_quantity,
                max_quantity,
                is_active,
                ownership,
                staged_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {STAGED_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(material.customer_id)
            .bind(&material.stock_id)
            .bind(&material.category)
            .bind(&material.description)
            .bind(material.quantity)
            .bind(material.unit_cost)
            .bind(material.min_quantity)
            .bind(material.max_quantity)
            .bind(material.is_active)
            .bind(material.ownership.as_str())
            .bind(Utc::now())
            .fetch_one(&mut *self.tx)
            .await
            .map_err(LedgerError::store)?;

        staged_from_row(&row)
    }

    async fn lock_staged(&mut self, staged_id: i64) -> LedgerResult<Option<StagedMaterial>> {
        let sql = format!("SELECT {STAGED_COLUMNS} FROM staged_materials WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(staged_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(LedgerError::store)?;

        row.as_ref().map(staged_from_row).transpose()
    }

    async fn delete_staged(&mut self, staged_id: i64) -> LedgerResult<()> {
        let result = sqlx::query("DELETE FROM staged_materials WHERE id = $1")
            .bind(staged_id)
            .execute(&mut *self.tx)
            .await
            .map_err(LedgerError::store)?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::store(format!(
                "staged material {staged_id} does not exist"
            )));
        }
        Ok(())
    }

    async fn commit(self) -> LedgerResult<()> {
        self.tx.commit().await.map_err(LedgerError::store)
    }

    async fn rollback(self) -> LedgerResult<()> {
        self.tx.rollback().await.map_err(LedgerError::store)
    }
}

/// `numeric_value_out_of_range`, raised when BIGINT arithmetic overflows.
fn is_numeric_overflow(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == "22003")
}

fn ownership_from_row(row: &PgRow) -> LedgerResult<Ownership> {
    let ownership: String = row.try_get("ownership").map_err(LedgerError::store)?;
    Ownership::parse(&ownership)
        .map_err(|_| LedgerError::store(format!("unknown ownership '{ownership}' in store")))
}

fn stock_from_row(row: &PgRow) -> LedgerResult<StockRecord> {
    Ok(StockRecord {
        id: row.try_get("id").map_err(LedgerError::store)?,
        stock_id: row.try_get("stock_id").map_err(LedgerError::store)?,
        location_id: row.try_get("location_id").map_err(LedgerError::store)?,
        customer_id: row.try_get("customer_id").map_err(LedgerError::store)?,
        category: row.try_get("category").map_err(LedgerError::store)?,
        description: row.try_get("description").map_err(LedgerError::store)?,
        notes: row.try_get("notes").map_err(LedgerError::store)?,
        quantity: row.try_get("quantity").map_err(LedgerError::store)?,
        min_quantity: row.try_get("min_quantity").map_err(LedgerError::store)?,
        max_quantity: row.try_get("max_quantity").map_err(LedgerError::store)?,
        is_active: row.try_get("is_active").map_err(LedgerError::store)?,
        unit_cost: row.try_get("unit_cost").map_err(LedgerError::store)?,
        ownership: ownership_from_row(row)?,
        updated_at: row.try_get("updated_at").map_err(LedgerError::store)?,
    })
}

fn entry_from_row(row: &PgRow) -> LedgerResult<LedgerEntry> {
    Ok(LedgerEntry {
        id: row.try_get("id").map_err(LedgerError::store)?,
        stock_record_id: row.try_get("stock_record_id").map_err(LedgerError::store)?,
        stock_id: row.try_get("stock_id").map_err(LedgerError::store)?,
        location_id: row.try_get("location_id").map_err(LedgerError::store)?,
        customer_id: row.try_get("customer_id").map_err(LedgerError::store)?,
        category: row.try_get("category").map_err(LedgerError::store)?,
        quantity_change: row.try_get("quantity_change").map_err(LedgerError::store)?,
        unit_cost: row.try_get("unit_cost").map_err(LedgerError::store)?,
        remaining_quantity: row.try_get("remaining_quantity").map_err(LedgerError::store)?,
        source_entry_id: row.try_get("source_entry_id").map_err(LedgerError::store)?,
        notes: row.try_get("notes").map_err(LedgerError::store)?,
        reference: row.try_get("reference").map_err(LedgerError::store)?,
        recorded_at: row.try_get("recorded_at").map_err(LedgerError::store)?,
    })
}

fn staged_from_row(row: &PgRow) -> LedgerResult<StagedMaterial> {
    Ok(StagedMaterial {
        id: row.try_get("id").map_err(LedgerError::store)?,
        customer_id: row.try_get("customer_id").map_err(LedgerError::store)?,
        stock_id: row.try_get("stock_id").map_err(LedgerError::store)?,
        category: row.try_get("category").map_err(LedgerError::store)?,
        description: row.try_get("description").map_err(LedgerError::store)?,
        quantity: row.try_get("quantity").map_err(LedgerError::store)?,
        unit_cost: row.try_get("unit_cost").map_err(LedgerError::store)?,
        min_quantity: row.try_get("min_quantity").map_err(LedgerError::store)?,
        max_quantity: row.try_get("max_quantity").map_err(LedgerError::store)?,
        is_active: row.try_get("is_active").map_err(LedgerError::store)?,
        ownership: ownership_from_row(row)?,
        staged_at: row.try_get("staged_at").map_err(LedgerError::store)?,
    })
}
