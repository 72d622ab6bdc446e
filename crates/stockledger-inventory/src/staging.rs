use serde::{Deserialize, Serialize};
use stockledger_core::{
    EntryMetadata, LedgerError, LedgerResult, LedgerTx, NewStagedMaterial, StagedMaterial,
    StockDefaults, StockKey, normalize_unit_cost,
};
use tracing::debug;

use crate::stock::{self, Adjustment, StockAdjustment};

/// Where and how much of a staged record to accept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Acceptance {
    pub location_id: i64,
    /// Defaults to the staged quantity.
    #[serde(default)]
    pub quantity: Option<i64>,
    #[serde(default)]
    pub metadata: EntryMetadata,
}

pub async fn stage<T: LedgerTx>(
    tx: &mut T,
    material: NewStagedMaterial,
) -> LedgerResult<StagedMaterial> {
    if material.quantity <= 0 {
        return Err(LedgerError::InvalidQuantity(material.quantity));
    }
    let mut material = material;
    material.stock_id = material.stock_id.trim().to_string();
    material.unit_cost = normalize_unit_cost(material.unit_cost)?;
    tx.insert_staged(material).await
}

/// Turns a staged record into stock at `acceptance.location_id` and removes it
/// from staging.
pub async fn accept<T: LedgerTx>(
    tx: &mut T,
    staged_id: i64,
    acceptance: &Acceptance,
) -> LedgerResult<StockAdjustment> {
    let Some(staged) = tx.lock_staged(staged_id).await? else {
        return Err(LedgerError::StagedMaterialNotFound(staged_id));
    };

    let quantity = acceptance.quantity.unwrap_or(staged.quantity);
    if quantity <= 0 {
        return Err(LedgerError::InvalidQuantity(quantity));
    }

    let key = StockKey::new(staged.stock_id.as_str(), acceptance.location_id, staged.ownership);
    let addition = Adjustment::receive(key, quantity, staged.unit_cost)
        .with_defaults(StockDefaults::from(&staged))
        .with_metadata(acceptance.metadata.clone());
    let adjusted = stock::adjust(tx, &addition).await?;

    tx.delete_staged(staged.id).await?;
    debug!(
        staged_id,
        stock_id = %staged.stock_id,
        location_id = acceptance.location_id,
        quantity,
        "staged material accepted"
    );
    Ok(adjusted)
}
