pub mod lots;
pub mod reconcile;
pub mod staging;
pub mod stock;
pub mod transfer;
pub mod valuation;

use stockledger_core::{
    LedgerResult, LedgerStore, LedgerTx, NewStagedMaterial, StagedMaterial, StockQuery,
};
use tracing::{info, warn};

pub use lots::{LotDraw, Shortfall, plan_draws};
pub use reconcile::Discrepancy;
pub use staging::Acceptance;
pub use stock::{Adjustment, StockAdjustment};
pub use transfer::{TransferRequest, TransferResult};
pub use valuation::{BalanceFilter, BalanceRow, HistoryFilter, StockOnHandRow, TransactionRow};

/// Entry point for every ledger operation.
///
/// Each mutation runs in its own store transaction that is committed on
/// success and rolled back on any error.
#[derive(Clone)]
pub struct InventoryLedger<S> {
    store: S,
}

impl<S: LedgerStore> InventoryLedger<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn adjust(&self, adjustment: &Adjustment) -> LedgerResult<StockAdjustment> {
        let mut tx = self.store.begin().await?;
        let result = stock::adjust(&mut tx, adjustment).await;
        let adjusted = finish(tx, result, "adjust").await?;
        info!(
            key = %adjustment.key,
            delta = adjustment.delta,
            quantity = adjusted.record.quantity,
            entries = adjusted.entries.len(),
            "stock adjusted"
        );
        Ok(adjusted)
    }

    pub async fn transfer(&self, request: &TransferRequest) -> LedgerResult<TransferResult> {
        let mut tx = self.store.begin().await?;
        let result = transfer::transfer(&mut tx, request).await;
        let moved = finish(tx, result, "transfer").await?;
        info!(
            stock_id = %request.stock_id,
            from = request.source_location,
            to = request.destination_location,
            quantity = request.quantity,
            "stock transferred"
        );
        Ok(moved)
    }

    pub async fn stage(&self, material: NewStagedMaterial) -> LedgerResult<StagedMaterial> {
        let mut tx = self.store.begin().await?;
        let result = staging::stage(&mut tx, material).await;
        let staged = finish(tx, result, "stage").await?;
        info!(staged_id = staged.id, stock_id = %staged.stock_id, "material staged");
        Ok(staged)
    }

    pub async fn list_staged(&self) -> LedgerResult<Vec<StagedMaterial>> {
        self.store.staged_materials().await
    }

    pub async fn accept_staged(
        &self,
        staged_id: i64,
        acceptance: &Acceptance,
    ) -> LedgerResult<StockAdjustment> {
        let mut tx = self.store.begin().await?;
        let result = staging::accept(&mut tx, staged_id, acceptance).await;
        let accepted = finish(tx, result, "accept_staged").await?;
        info!(
            staged_id,
            stock_record_id = accepted.record.id,
            "staged material accepted"
        );
        Ok(accepted)
    }

    pub async fn transaction_history(
        &self,
        filter: &HistoryFilter,
    ) -> LedgerResult<Vec<TransactionRow>> {
        valuation::transaction_history(&self.store, filter).await
    }

    pub async fn balance_as_of(&self, filter: &BalanceFilter) -> LedgerResult<Vec<BalanceRow>> {
        valuation::balance_as_of(&self.store, filter).await
    }

    pub async fn stock_on_hand(&self, query: &StockQuery) -> LedgerResult<Vec<StockOnHandRow>> {
        valuation::stock_on_hand(&self.store, query).await
    }

    pub async fn reconcile(&self) -> LedgerResult<Vec<Discrepancy>> {
        reconcile::reconcile(&self.store).await
    }
}

async fn finish<T: LedgerTx, V>(
    tx: T,
    result: LedgerResult<V>,
    operation: &'static str,
) -> LedgerResult<V> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            warn!(operation, error = %err, "rolling back");
            if let Err(rollback_err) = tx.rollback().await {
                warn!(operation, error = %rollback_err, "rollback failed");
            }
            Err(err)
        }
    }
}
