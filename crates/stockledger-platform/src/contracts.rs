use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use stockledger_core::{EntryMetadata, Ownership, StockDefaults, StockKey};
use stockledger_inventory::{
    Acceptance, Adjustment, BalanceFilter, StockAdjustment, TransferRequest, TransferResult,
};
use uuid::Uuid;

/// Redis channel carrying [`LedgerChangedEvent`]s.
pub const LEDGER_CHANNEL: &str = "inventory.ledger";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdjustStockRequest {
    pub stock_id: String,
    pub location_id: i64,
    #[serde(default = "default_ownership")]
    pub ownership: Ownership,
    pub quantity_change: i64,
    pub unit_cost: Option<Decimal>,
    /// Attributes for a record created by this addition.
    pub defaults: Option<StockDefaults>,
    #[serde(default)]
    pub notes: String,
    pub reference: Option<String>,
    pub recorded_at: Option<DateTime<Utc>>,
}

impl AdjustStockRequest {
    pub fn into_adjustment(self) -> Adjustment {
        Adjustment {
            key: StockKey::new(self.stock_id, self.location_id, self.ownership),
            delta: self.quantity_change,
            unit_cost: self.unit_cost,
            defaults: self.defaults,
            metadata: metadata(self.notes, self.reference, self.recorded_at),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferStockRequest {
    pub stock_id: String,
    pub source_location_id: i64,
    pub destination_location_id: i64,
    #[serde(default = "default_ownership")]
    pub ownership: Ownership,
    pub quantity: i64,
    #[serde(default)]
    pub notes: String,
    pub reference: Option<String>,
}

impl TransferStockRequest {
    pub fn into_request(self) -> TransferRequest {
        TransferRequest {
            stock_id: self.stock_id.trim().to_string(),
            source_location: self.source_location_id,
            destination_location: self.destination_location_id,
            ownership: self.ownership,
            quantity: self.quantity,
            metadata: metadata(self.notes, self.reference, None),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptStagedRequest {
    pub location_id: i64,
    pub quantity: Option<i64>,
    #[serde(default)]
    pub notes: String,
    pub reference: Option<String>,
}

impl AcceptStagedRequest {
    pub fn into_acceptance(self) -> Acceptance {
        Acceptance {
            location_id: self.location_id,
            quantity: self.quantity,
            metadata: metadata(self.notes, self.reference, None),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BalanceParams {
    /// Calendar day whose entries are all included. Defaults to now.
    pub as_of: Option<NaiveDate>,
    pub customer_id: Option<i64>,
    pub category: Option<String>,
}

impl BalanceParams {
    pub fn into_filter(self) -> BalanceFilter {
        let filter = match self.as_of {
            Some(date) => BalanceFilter::on(date),
            None => BalanceFilter::as_of(Utc::now()),
        };
        BalanceFilter {
            customer_id: self.customer_id,
            category: self.category,
            ..filter
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemsResponse<T> {
    pub items: Vec<T>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerChangeKind {
    Adjusted,
    Transferred,
    Accepted,
}

/// Published after a ledger mutation has been committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerChangedEvent {
    pub event_id: Uuid,
    pub kind: LedgerChangeKind,
    pub stock_id: String,
    pub location_ids: Vec<i64>,
    pub entry_ids: Vec<i64>,
    pub occurred_at: DateTime<Utc>,
}

impl LedgerChangedEvent {
    pub fn adjusted(kind: LedgerChangeKind, adjusted: &StockAdjustment) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            kind,
            stock_id: adjusted.record.stock_id.clone(),
            location_ids: vec![adjusted.record.location_id],
            entry_ids: adjusted.entries.iter().map(|entry| entry.id).collect(),
            occurred_at: Utc::now(),
        }
    }

    pub fn transferred(moved: &TransferResult) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            kind: LedgerChangeKind::Transferred,
            stock_id: moved.destination.stock_id.clone(),
            location_ids: vec![moved.source.record.location_id, moved.destination.location_id],
            entry_ids: moved
                .outbound
                .iter()
                .chain(&moved.inbound)
                .map(|entry| entry.id)
                .collect(),
            occurred_at: Utc::now(),
        }
    }
}

fn metadata(
    notes: String,
    reference: Option<String>,
    recorded_at: Option<DateTime<Utc>>,
) -> EntryMetadata {
    let mut metadata = EntryMetadata::new(notes.trim());
    if let Some(reference) = reference {
        metadata = metadata.with_reference(reference);
    }
    if let Some(recorded_at) = recorded_at {
        metadata = metadata.at(recorded_at);
    }
    metadata
}

fn default_ownership() -> Ownership {
    Ownership::House
}
