use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use stockledger_core::{
    EntryQuery, LedgerEntry, LedgerError, LedgerResult, LedgerStore, LedgerTx, NewLedgerEntry,
    NewStagedMaterial, NewStockRecord, StagedMaterial, StockKey, StockQuery, StockRecord,
};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::debug;

#[derive(Debug, Clone, Default)]
struct LedgerState {
    stock: BTreeMap<i64, StockRecord>,
    entries: BTreeMap<i64, LedgerEntry>,
    staged: BTreeMap<i64, StagedMaterial>,
    stock_sequence: i64,
    entry_sequence: i64,
    staged_sequence: i64,
}

impl LedgerState {
    fn stock_mut(&mut self, id: i64) -> LedgerResult<&mut StockRecord> {
        self.stock
            .get_mut(&id)
            .ok_or_else(|| LedgerError::store(format!("stock record {id} does not exist")))
    }

    fn entry_mut(&mut self, id: i64) -> LedgerResult<&mut LedgerEntry> {
        self.entries
            .get_mut(&id)
            .ok_or_else(|| LedgerError::store(format!("ledger entry {id} does not exist")))
    }
}

/// Store kept entirely in process memory.
///
/// Transactions work on a private copy of the committed state and publish it
/// on commit. One transaction at a time holds the writer lock, which stands in
/// for row locking; reads never wait for a writer.
#[derive(Clone)]
pub struct InMemoryLedgerStore {
    committed: Arc<RwLock<LedgerState>>,
    writer: Arc<Mutex<()>>,
    write_budget: Arc<AtomicUsize>,
}

impl Default for InMemoryLedgerStore {
    fn default() -> Self {
        Self {
            committed: Arc::default(),
            writer: Arc::default(),
            write_budget: Arc::new(AtomicUsize::new(usize::MAX)),
        }
    }
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every transaction begun from now on fail with a store failure
    /// once it has performed `writes` writes.
    pub fn fail_writes_after(&self, writes: usize) {
        self.write_budget.store(writes, Ordering::SeqCst);
    }

    pub fn clear_write_failures(&self) {
        self.write_budget.store(usize::MAX, Ordering::SeqCst);
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    type Tx = InMemoryLedgerTx;

    async fn begin(&self) -> LedgerResult<InMemoryLedgerTx> {
        let writer = self.writer.clone().lock_owned().await;
        let working = self.committed.read().await.clone();

        Ok(InMemoryLedgerTx {
            _writer: writer,
            committed: self.committed.clone(),
            working,
            writes_left: self.write_budget.load(Ordering::SeqCst),
        })
    }

    async fn entries(&self, query: &EntryQuery) -> LedgerResult<Vec<LedgerEntry>> {
        let state = self.committed.read().await;
        Ok(state
            .entries
            .values()
            .filter(|entry| query.matches(entry))
            .cloned()
            .collect())
    }

    async fn stock_records(&self, query: &StockQuery) -> LedgerResult<Vec<StockRecord>> {
        let state = self.committed.read().await;
        let mut records: Vec<StockRecord> = state
            .stock
            .values()
            .filter(|record| query.matches(record))
            .cloned()
            .collect();
        records.sort_by_key(|record| (record.updated_at, record.id));
        Ok(records)
    }

    async fn staged_materials(&self) -> LedgerResult<Vec<StagedMaterial>> {
        let state = self.committed.read().await;
        Ok(state.staged.values().cloned().collect())
    }
}

pub struct InMemoryLedgerTx {
    _writer: OwnedMutexGuard<()>,
    committed: Arc<RwLock<LedgerState>>,
    working: LedgerState,
    writes_left: usize,
}

impl InMemoryLedgerTx {
    fn charge_write(&mut self) -> LedgerResult<()> {
        if self.writes_left == usize::MAX {
            return Ok(());
        }
        if self.writes_left == 0 {
            return Err(LedgerError::store("injected write failure"));
        }
        self.writes_left -= 1;
        Ok(())
    }
}

#[async_trait]
impl LedgerTx for InMemoryLedgerTx {
    async fn lock_stock(&mut self, key: &StockKey) -> LedgerResult<Option<StockRecord>> {
        Ok(self
            .working
            .stock
            .values()
            .find(|record| record.key() == *key)
            .cloned())
    }

    async fn insert_stock(&mut self, record: NewStockRecord) -> LedgerResult<StockRecord> {
        self.charge_write()?;
        if self
            .working
            .stock
            .values()
            .any(|existing| existing.key() == record.key)
        {
            return Err(LedgerError::store(format!(
                "duplicate stock record for {}",
                record.key
            )));
        }

        self.working.stock_sequence += 1;
        let stored = StockRecord {
            id: self.working.stock_sequence,
            stock_id: record.key.stock_id,
            location_id: record.key.location_id,
            customer_id: record.defaults.customer_id,
            category: record.defaults.category,
            description: record.defaults.description,
            notes: record.defaults.notes,
            quantity: record.quantity,
            min_quantity: record.defaults.min_quantity,
            max_quantity: record.defaults.max_quantity,
            is_active: record.defaults.is_active,
            unit_cost: record.defaults.unit_cost,
            ownership: record.key.ownership,
            updated_at: record.updated_at,
        };
        self.working.stock.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn update_stock_quantity(
        &mut self,
        stock_record_id: i64,
        quantity: i64,
        updated_at: DateTime<Utc>,
    ) -> LedgerResult<StockRecord> {
        self.charge_write()?;
        let record = self.working.stock_mut(stock_record_id)?;
        record.quantity = quantity;
        record.updated_at = updated_at;
        Ok(record.clone())
    }

    async fn delete_stock(&mut self, stock_record_id: i64) -> LedgerResult<()> {
        self.charge_write()?;
        self.working
            .stock
            .remove(&stock_record_id)
            .map(|_| ())
            .ok_or_else(|| {
                LedgerError::store(format!("stock record {stock_record_id} does not exist"))
            })
    }

    async fn open_lots(&mut self, stock_record_id: i64) -> LedgerResult<Vec<LedgerEntry>> {
        Ok(self
            .working
            .entries
            .values()
            .filter(|entry| entry.stock_record_id == stock_record_id && entry.is_open_lot())
            .cloned()
            .collect())
    }

    async fn latest_deduction(
        &mut self,
        stock_record_id: i64,
    ) -> LedgerResult<Option<LedgerEntry>> {
        Ok(self
            .working
            .entries
            .values()
            .rev()
            .find(|entry| entry.stock_record_id == stock_record_id && entry.quantity_change < 0)
            .cloned())
    }

    async fn append_entry(&mut self, entry: NewLedgerEntry) -> LedgerResult<LedgerEntry> {
        self.charge_write()?;
        self.working.entry_sequence += 1;
        let stored = LedgerEntry {
            id: self.working.entry_sequence,
            stock_record_id: entry.stock_record_id,
            stock_id: entry.stock_id,
            location_id: entry.location_id,
            customer_id: entry.customer_id,
            category: entry.category,
            quantity_change: entry.quantity_change,
            unit_cost: entry.unit_cost,
            remaining_quantity: entry.remaining_quantity,
            source_entry_id: entry.source_entry_id,
            notes: entry.notes,
            reference: entry.reference,
            recorded_at: entry.recorded_at,
        };
        self.working.entries.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn grow_lot(
        &mut self,
        entry_id: i64,
        quantity: i64,
        recorded_at: DateTime<Utc>,
    ) -> LedgerResult<LedgerEntry> {
        self.charge_write()?;
        let lot = self.working.entry_mut(entry_id)?;
        let (Some(quantity_change), Some(remaining_quantity)) = (
            lot.quantity_change.checked_add(quantity),
            lot.remaining_quantity.checked_add(quantity),
        ) else {
            return Err(LedgerError::InvalidQuantity(quantity));
        };
        lot.quantity_change = quantity_change;
        lot.remaining_quantity = remaining_quantity;
        lot.recorded_at = recorded_at;
        Ok(lot.clone())
    }

    async fn set_lot_remaining(&mut self, entry_id: i64, remaining: i64) -> LedgerResult<()> {
        self.charge_write()?;
        let lot = self.working.entry_mut(entry_id)?;
        if remaining < 0 || remaining > lot.quantity_change {
            return Err(LedgerError::store(format!(
                "remaining quantity {remaining} out of range for lot {entry_id}"
            )));
        }
        lot.remaining_quantity = remaining;
        Ok(())
    }

    async fn insert_staged(
        &mut self,
        material: NewStagedMaterial,
    ) -> LedgerResult<StagedMaterial> {
        self.charge_write()?;
        self.working.staged_sequence += 1;
        let stored = StagedMaterial {
            id: self.working.staged_sequence,
            customer_id: material.customer_id,
            stock_id: material.stock_id,
            category: material.category,
            description: material.description,
            quantity: material.quantity,
            unit_cost: material.unit_cost,
            min_quantity: material.min_quantity,
            max_quantity: material.max_quantity,
            is_active: material.is_active,
            ownership: material.ownership,
            staged_at: Utc::now(),
        };
        self.working.staged.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn lock_staged(&mut self, staged_id: i64) -> LedgerResult<Option<StagedMaterial>> {
        Ok(self.working.staged.get(&staged_id).cloned())
    }

    async fn delete_staged(&mut self, staged_id: i64) -> LedgerResult<()> {
        self.charge_write()?;
        self.working
            .staged
            .remove(&staged_id)
            .map(|_| ())
            .ok_or_else(|| LedgerError::store(format!("staged material {staged_id} does not exist")))
    }

    async fn commit(self) -> LedgerResult<()> {
        let mut committed = self.committed.write().await;
        *committed = self.working;
        debug!(
            entries = committed.entries.len(),
            stock_records = committed.stock.len(),
            "in-memory transaction committed"
        );
        Ok(())
    }

    async fn rollback(self) -> LedgerResult<()> {
        debug!("in-memory transaction rolled back");
        Ok(())
    }
}
