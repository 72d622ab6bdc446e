use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use stockledger_core::{EntryQuery, LedgerResult, LedgerStore, StockQuery};
use tracing::warn;

/// A stock record whose snapshot disagrees with its ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discrepancy {
    pub stock_record_id: i64,
    pub stock_id: String,
    pub location_id: i64,
    pub recorded_quantity: i64,
    /// Sum of every signed quantity change.
    pub ledger_quantity: i64,
    /// Sum of the remaining quantity of open lots.
    pub open_lot_quantity: i64,
}

#[derive(Default)]
struct Totals {
    ledger: i64,
    open: i64,
}

pub async fn reconcile<S: LedgerStore>(store: &S) -> LedgerResult<Vec<Discrepancy>> {
    let records = store.stock_records(&StockQuery::default()).await?;
    let entries = store.entries(&EntryQuery::default()).await?;

    let mut totals: BTreeMap<i64, Totals> = BTreeMap::new();
    for entry in &entries {
        let total = totals.entry(entry.stock_record_id).or_default();
        total.ledger += entry.quantity_change;
        if entry.is_lot() {
            total.open += entry.remaining_quantity;
        }
    }

    let mut discrepancies = Vec::new();
    for record in records {
        let total = totals.remove(&record.id).unwrap_or_default();
        if total.ledger != record.quantity || total.open != record.quantity {
            warn!(
                stock_record_id = record.id,
                stock_id = %record.stock_id,
                recorded = record.quantity,
                ledger = total.ledger,
                open_lots = total.open,
                "stock record out of balance with ledger"
            );
            discrepancies.push(Discrepancy {
                stock_record_id: record.id,
                stock_id: record.stock_id,
                location_id: record.location_id,
                recorded_quantity: record.quantity,
                ledger_quantity: total.ledger,
                open_lot_quantity: total.open,
            });
        }
    }
    discrepancies.sort_by_key(|row| row.stock_record_id);
    Ok(discrepancies)
}
