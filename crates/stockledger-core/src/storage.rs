use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::LedgerResult;
use crate::models::{
    LedgerEntry, NewLedgerEntry, NewStagedMaterial, NewStockRecord, StagedMaterial, StockKey,
    StockRecord,
};
use crate::queries::{EntryQuery, StockQuery};

/// Backing store for stock records, the ledger and staged material.
///
/// Mutations only happen through a [`LedgerTx`] obtained from [`LedgerStore::begin`];
/// reads on the store itself see committed state only.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    type Tx: LedgerTx;

    async fn begin(&self) -> LedgerResult<Self::Tx>;

    /// Entries matching `query`, ordered by id.
    async fn entries(&self, query: &EntryQuery) -> LedgerResult<Vec<LedgerEntry>>;

    /// Current stock records matching `query`, ordered by last update then id.
    async fn stock_records(&self, query: &StockQuery) -> LedgerResult<Vec<StockRecord>>;

    /// Staged material ordered by id.
    async fn staged_materials(&self) -> LedgerResult<Vec<StagedMaterial>>;
}

/// One unit of work against the store. Dropping a transaction without
/// committing discards every write made through it.
#[async_trait]
pub trait LedgerTx: Send {
    /// Loads the record for `key` and holds it against other writers until the
    /// transaction ends.
    async fn lock_stock(&mut self, key: &StockKey) -> LedgerResult<Option<StockRecord>>;

    async fn insert_stock(&mut self, record: NewStockRecord) -> LedgerResult<StockRecord>;

    async fn update_stock_quantity(
        &mut self,
        stock_record_id: i64,
        quantity: i64,
        updated_at: DateTime<Utc>,
    ) -> LedgerResult<StockRecord>;

    async fn delete_stock(&mut self, stock_record_id: i64) -> LedgerResult<()>;

    /// Positive entries of the record with remaining quantity, oldest first.
    async fn open_lots(&mut self, stock_record_id: i64) -> LedgerResult<Vec<LedgerEntry>>;

    /// Most recent negative entry of the record, if any.
    async fn latest_deduction(&mut self, stock_record_id: i64)
    -> LedgerResult<Option<LedgerEntry>>;

    async fn append_entry(&mut self, entry: NewLedgerEntry) -> LedgerResult<LedgerEntry>;

    /// Adds `quantity` to both the quantity and the remaining quantity of a lot.
    async fn grow_lot(
        &mut self,
        entry_id: i64,
        quantity: i64,
        recorded_at: DateTime<Utc>,
    ) -> LedgerResult<LedgerEntry>;

    async fn set_lot_remaining(&mut self, entry_id: i64, remaining: i64) -> LedgerResult<()>;

    async fn insert_staged(&mut self, material: NewStagedMaterial)
    -> LedgerResult<StagedMaterial>;

    /// Loads a staged record and holds it against other writers.
    async fn lock_staged(&mut self, staged_id: i64) -> LedgerResult<Option<StagedMaterial>>;

    async fn delete_staged(&mut self, staged_id: i64) -> LedgerResult<()>;

    async fn commit(self) -> LedgerResult<()>;

    async fn rollback(self) -> LedgerResult<()>;
}
