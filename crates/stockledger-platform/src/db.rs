use anyhow::{Context, Result};
use sqlx::{PgPool, postgres::PgPoolOptions};
use tracing::info;

const SCHEMA: [&str; 5] = [
    r#"
    CREATE TABLE IF NOT EXISTS stock_records (
        id BIGSERIAL PRIMARY KEY,
        stock_id TEXT NOT NULL,
        location_id BIGINT NOT NULL,
        customer_id BIGINT NOT NULL,
        category TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        notes TEXT NOT NULL DEFAULT '',
        quantity BIGINT NOT NULL CHECK (quantity >= 0),
        min_quantity BIGINT NOT NULL DEFAULT 0,
        max_quantity BIGINT NOT NULL DEFAULT 0,
        is_active BOOLEAN NOT NULL DEFAULT TRUE,
        unit_cost NUMERIC(18, 4) NOT NULL,
        ownership TEXT NOT NULL CHECK (ownership IN ('HOUSE', 'CUSTOMER')),
        updated_at TIMESTAMPTZ NOT NULL,
        UNIQUE (stock_id, location_id, ownership)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ledger_entries (
        id BIGSERIAL PRIMARY KEY,
        stock_record_id BIGINT NOT NULL,
        stock_id TEXT NOT NULL,
        location_id BIGINT NOT NULL,
        customer_id BIGINT NOT NULL,
        category TEXT NOT NULL,
        quantity_change BIGINT NOT NULL CHECK (quantity_change <> 0),
        unit_cost NUMERIC(18, 4) NOT NULL,
        remaining_quantity BIGINT NOT NULL DEFAULT 0,
        source_entry_id BIGINT REFERENCES ledger_entries (id),
        notes TEXT NOT NULL DEFAULT '',
        reference TEXT,
        recorded_at TIMESTAMPTZ NOT NULL,
        CHECK (remaining_quantity >= 0 AND remaining_quantity <= GREATEST(quantity_change, 0))
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS ledger_entries_stock_record_idx
        ON ledger_entries (stock_record_id, id)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS ledger_entries_recorded_at_idx
        ON ledger_entries (recorded_at)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS staged_materials (
        id BIGSERIAL PRIMARY KEY,
        customer_id BIGINT NOT NULL,
        stock_id TEXT NOT NULL,
        category TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        quantity BIGINT NOT NULL CHECK (quantity > 0),
        unit_cost NUMERIC(18, 4) NOT NULL CHECK (unit_cost >= 0),
        min_quantity BIGINT NOT NULL DEFAULT 0,
        max_quantity BIGINT NOT NULL DEFAULT 0,
        is_active BOOLEAN NOT NULL DEFAULT TRUE,
        ownership TEXT NOT NULL CHECK (ownership IN ('HOUSE', 'CUSTOMER')),
        staged_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
];

pub async fn connect_database(database_url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .context("failed to connect to DATABASE_URL")?;

    Ok(pool)
}

/// Creates the ledger tables when they do not exist yet.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement)
            .execute(pool)
            .await
            .context("failed to apply ledger schema")?;
    }
    info!("ledger schema ready");
    Ok(())
}
