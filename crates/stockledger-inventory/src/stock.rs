use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use stockledger_core::{
    EntryMetadata, LedgerEntry, LedgerError, LedgerResult, LedgerTx, NewStockRecord,
    StockDefaults, StockKey, StockRecord, normalize_unit_cost,
};
use tracing::debug;

use crate::lots;

/// A signed quantity change for one stock record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Adjustment {
    pub key: StockKey,
    pub delta: i64,
    /// Required for additions; ignored for deductions.
    #[serde(default)]
    pub unit_cost: Option<Decimal>,
    /// Used when an addition creates the record.
    #[serde(default)]
    pub defaults: Option<StockDefaults>,
    #[serde(default)]
    pub metadata: EntryMetadata,
}

impl Adjustment {
    pub fn receive(key: StockKey, quantity: i64, unit_cost: Decimal) -> Self {
        Self {
            key,
            delta: quantity,
            unit_cost: Some(unit_cost),
            defaults: None,
            metadata: EntryMetadata::default(),
        }
    }

    pub fn consume(key: StockKey, quantity: i64) -> Self {
        Self {
            key,
            delta: -quantity,
            unit_cost: None,
            defaults: None,
            metadata: EntryMetadata::default(),
        }
    }

    pub fn with_defaults(mut self, defaults: StockDefaults) -> Self {
        self.defaults = Some(defaults);
        self
    }

    pub fn with_metadata(mut self, metadata: EntryMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Outcome of an adjustment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockAdjustment {
    /// The record after the change. When `removed` is set this is the last
    /// state before deletion, with a quantity of zero.
    pub record: StockRecord,
    pub removed: bool,
    pub entries: Vec<LedgerEntry>,
}

/// Applies `adjustment` to the stock record and the ledger inside `tx`.
pub async fn adjust<T: LedgerTx>(
    tx: &mut T,
    adjustment: &Adjustment,
) -> LedgerResult<StockAdjustment> {
    let delta = adjustment.delta;
    // Zero has no direction and i64::MIN has no positive counterpart.
    let Some(magnitude) = delta.checked_abs().filter(|magnitude| *magnitude > 0) else {
        return Err(LedgerError::InvalidQuantity(delta));
    };
    let unit_cost = match adjustment.unit_cost {
        Some(cost) => Some(normalize_unit_cost(cost)?),
        None if delta > 0 => return Err(LedgerError::MissingUnitCost),
        None => None,
    };

    let record = match tx.lock_stock(&adjustment.key).await? {
        Some(existing) => {
            let quantity = existing
                .quantity
                .checked_add(delta)
                .ok_or(LedgerError::InvalidQuantity(delta))?;
            if quantity < 0 {
                return Err(LedgerError::InsufficientQuantity {
                    stock_id: existing.stock_id.clone(),
                    requested: magnitude,
                    available: existing.quantity,
                });
            }
            tx.update_stock_quantity(existing.id, quantity, adjustment.metadata.recorded_at)
                .await?
        }
        None => {
            if delta < 0 {
                return Err(LedgerError::UnknownStockLocation(adjustment.key.clone()));
            }
            let Some(mut defaults) = adjustment.defaults.clone() else {
                return Err(LedgerError::UnknownStockLocation(adjustment.key.clone()));
            };
            defaults.unit_cost = normalize_unit_cost(defaults.unit_cost)?;
            debug!(key = %adjustment.key, "creating stock record");
            tx.insert_stock(NewStockRecord {
                key: adjustment.key.clone(),
                defaults,
                quantity: delta,
                updated_at: adjustment.metadata.recorded_at,
            })
            .await?
        }
    };

    let entries = lots::apply(tx, &record, delta, unit_cost, &adjustment.metadata).await?;

    let removed = record.quantity == 0;
    if removed {
        debug!(key = %adjustment.key, "stock record emptied, deleting");
        tx.delete_stock(record.id).await?;
    }

    Ok(StockAdjustment {
        record,
        removed,
        entries,
    })
}
