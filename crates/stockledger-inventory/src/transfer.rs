use serde::{Deserialize, Serialize};
use stockledger_core::{
    EntryMetadata, LedgerEntry, LedgerError, LedgerResult, LedgerTx, Ownership, StockDefaults,
    StockKey, StockRecord,
};
use tracing::debug;

use crate::stock::{self, Adjustment, StockAdjustment};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub stock_id: String,
    pub source_location: i64,
    pub destination_location: i64,
    pub ownership: Ownership,
    pub quantity: i64,
    #[serde(default)]
    pub metadata: EntryMetadata,
}

impl TransferRequest {
    pub fn source_key(&self) -> StockKey {
        StockKey::new(self.stock_id.as_str(), self.source_location, self.ownership)
    }

    pub fn destination_key(&self) -> StockKey {
        StockKey::new(self.stock_id.as_str(), self.destination_location, self.ownership)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferResult {
    pub source: StockAdjustment,
    pub destination: StockRecord,
    /// Negative entries written at the source, one per lot drawn.
    pub outbound: Vec<LedgerEntry>,
    /// Entries written or grown at the destination, in the same order.
    pub inbound: Vec<LedgerEntry>,
}

/// Moves stock between two locations, carrying every drawn lot's unit cost
/// across unchanged.
pub async fn transfer<T: LedgerTx>(
    tx: &mut T,
    request: &TransferRequest,
) -> LedgerResult<TransferResult> {
    if request.quantity <= 0 {
        return Err(LedgerError::InvalidQuantity(request.quantity));
    }
    if request.source_location == request.destination_location {
        return Err(LedgerError::SameLocation(request.source_location));
    }

    let source_key = request.source_key();
    let Some(source) = tx.lock_stock(&source_key).await? else {
        return Err(LedgerError::UnknownStockLocation(source_key));
    };
    if source.quantity < request.quantity {
        return Err(LedgerError::InsufficientQuantity {
            stock_id: source.stock_id,
            requested: request.quantity,
            available: source.quantity,
        });
    }
    let defaults = StockDefaults::from(&source);

    let outbound = stock::adjust(
        tx,
        &Adjustment::consume(source_key, request.quantity).with_metadata(request.metadata.clone()),
    )
    .await?;

    let destination_key = request.destination_key();
    let mut destination = None;
    let mut inbound = Vec::with_capacity(outbound.entries.len());
    for drawn in &outbound.entries {
        let addition = Adjustment::receive(
            destination_key.clone(),
            -drawn.quantity_change,
            drawn.unit_cost,
        )
        .with_defaults(defaults.clone())
        .with_metadata(request.metadata.clone());

        let added = stock::adjust(tx, &addition).await?;
        inbound.extend(added.entries);
        destination = Some(added.record);
    }

    let Some(destination) = destination else {
        return Err(LedgerError::store(format!(
            "transfer of {} drew no lots",
            request.stock_id
        )));
    };

    debug!(
        stock_id = %request.stock_id,
        from = request.source_location,
        to = request.destination_location,
        lots = inbound.len(),
        "transfer matched"
    );

    Ok(TransferResult {
        outbound: outbound.entries.clone(),
        source: outbound,
        destination,
        inbound,
    })
}
