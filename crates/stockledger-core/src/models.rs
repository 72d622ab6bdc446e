use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};

/// Decimal places kept on every unit cost.
pub const COST_SCALE: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Ownership {
    House,
    Customer,
}

impl Ownership {
    pub fn as_str(&self) -> &'static str {
        match self {
            Ownership::House => "HOUSE",
            Ownership::Customer => "CUSTOMER",
        }
    }

    pub fn parse(value: &str) -> LedgerResult<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "HOUSE" => Ok(Ownership::House),
            "CUSTOMER" => Ok(Ownership::Customer),
            other => Err(LedgerError::InvalidOwnership(other.to_string())),
        }
    }
}

impl fmt::Display for Ownership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a stock record: one per stock item, location and ownership class.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StockKey {
    pub stock_id: String,
    pub location_id: i64,
    pub ownership: Ownership,
}

impl StockKey {
    pub fn new(stock_id: impl Into<String>, location_id: i64, ownership: Ownership) -> Self {
        Self {
            stock_id: stock_id.into().trim().to_string(),
            location_id,
            ownership,
        }
    }
}

impl fmt::Display for StockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at location {} ({})",
            self.stock_id, self.location_id, self.ownership
        )
    }
}

/// Current-quantity snapshot for a stock item at one location.
///
/// `unit_cost` is informational only: it records the cost the record was
/// created with. The authoritative cost basis lives in the ledger lots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockRecord {
    pub id: i64,
    pub stock_id: String,
    pub location_id: i64,
    pub customer_id: i64,
    pub category: String,
    pub description: String,
    pub notes: String,
    pub quantity: i64,
    pub min_quantity: i64,
    pub max_quantity: i64,
    pub is_active: bool,
    pub unit_cost: Decimal,
    pub ownership: Ownership,
    pub updated_at: DateTime<Utc>,
}

impl StockRecord {
    pub fn key(&self) -> StockKey {
        StockKey {
            stock_id: self.stock_id.clone(),
            location_id: self.location_id,
            ownership: self.ownership,
        }
    }

    pub fn below_minimum(&self) -> bool {
        self.quantity < self.min_quantity
    }
}

/// Attributes used when an addition creates a stock record that does not exist yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockDefaults {
    pub customer_id: i64,
    pub category: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub notes: String,
    pub unit_cost: Decimal,
    #[serde(default)]
    pub min_quantity: i64,
    #[serde(default)]
    pub max_quantity: i64,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

impl From<&StockRecord> for StockDefaults {
    fn from(record: &StockRecord) -> Self {
        Self {
            customer_id: record.customer_id,
            category: record.category.clone(),
            description: record.description.clone(),
            notes: record.notes.clone(),
            unit_cost: record.unit_cost,
            min_quantity: record.min_quantity,
            max_quantity: record.max_quantity,
            is_active: record.is_active,
        }
    }
}

impl From<&StagedMaterial> for StockDefaults {
    fn from(staged: &StagedMaterial) -> Self {
        Self {
            customer_id: staged.customer_id,
            category: staged.category.clone(),
            description: staged.description.clone(),
            notes: String::new(),
            unit_cost: staged.unit_cost,
            min_quantity: staged.min_quantity,
            max_quantity: staged.max_quantity,
            is_active: staged.is_active,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewStockRecord {
    pub key: StockKey,
    pub defaults: StockDefaults,
    pub quantity: i64,
    pub updated_at: DateTime<Utc>,
}

/// One append to the transaction log.
///
/// Positive entries are lots; `remaining_quantity` tracks how much of the lot
/// is still unconsumed. Negative entries record a draw against the lot named
/// by `source_entry_id` and always carry a remaining quantity of zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: i64,
    pub stock_record_id: i64,
    pub stock_id: String,
    pub location_id: i64,
    pub customer_id: i64,
    pub category: String,
    pub quantity_change: i64,
    pub unit_cost: Decimal,
    pub remaining_quantity: i64,
    pub source_entry_id: Option<i64>,
    pub notes: String,
    pub reference: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn is_lot(&self) -> bool {
        self.quantity_change > 0
    }

    pub fn is_open_lot(&self) -> bool {
        self.is_lot() && self.remaining_quantity > 0
    }

    pub fn value(&self) -> Decimal {
        Decimal::from(self.quantity_change) * self.unit_cost
    }
}

#[derive(Debug, Clone)]
pub struct NewLedgerEntry {
    pub stock_record_id: i64,
    pub stock_id: String,
    pub location_id: i64,
    pub customer_id: i64,
    pub category: String,
    pub quantity_change: i64,
    pub unit_cost: Decimal,
    pub remaining_quantity: i64,
    pub source_entry_id: Option<i64>,
    pub notes: String,
    pub reference: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl NewLedgerEntry {
    /// Entry skeleton for `record`; quantities and cost are filled in by the caller.
    pub fn for_record(record: &StockRecord, metadata: &EntryMetadata) -> Self {
        Self {
            stock_record_id: record.id,
            stock_id: record.stock_id.clone(),
            location_id: record.location_id,
            customer_id: record.customer_id,
            category: record.category.clone(),
            quantity_change: 0,
            unit_cost: Decimal::ZERO,
            remaining_quantity: 0,
            source_entry_id: None,
            notes: metadata.notes.clone(),
            reference: metadata.reference.clone(),
            recorded_at: metadata.recorded_at,
        }
    }
}

/// Free-text context attached to every entry written by one operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default = "Utc::now")]
    pub recorded_at: DateTime<Utc>,
}

impl EntryMetadata {
    pub fn new(notes: impl Into<String>) -> Self {
        Self {
            notes: notes.into(),
            reference: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        let reference = reference.into();
        self.reference = if reference.trim().is_empty() {
            None
        } else {
            Some(reference.trim().to_string())
        };
        self
    }

    pub fn at(mut self, recorded_at: DateTime<Utc>) -> Self {
        self.recorded_at = recorded_at;
        self
    }
}

impl Default for EntryMetadata {
    fn default() -> Self {
        Self::new("")
    }
}

/// Incoming material awaiting acceptance into a location. Has no ledger effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedMaterial {
    pub id: i64,
    pub customer_id: i64,
    pub stock_id: String,
    pub category: String,
    pub description: String,
    pub quantity: i64,
    pub unit_cost: Decimal,
    pub min_quantity: i64,
    pub max_quantity: i64,
    pub is_active: bool,
    pub ownership: Ownership,
    pub staged_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewStagedMaterial {
    pub customer_id: i64,
    pub stock_id: String,
    pub category: String,
    #[serde(default)]
    pub description: String,
    pub quantity: i64,
    pub unit_cost: Decimal,
    #[serde(default)]
    pub min_quantity: i64,
    #[serde(default)]
    pub max_quantity: i64,
    #[serde(default = "default_active")]
    pub is_active: bool,
    pub ownership: Ownership,
}

/// Validates a unit cost and rounds it to [`COST_SCALE`] places.
pub fn normalize_unit_cost(cost: Decimal) -> LedgerResult<Decimal> {
    if cost.is_sign_negative() && !cost.is_zero() {
        return Err(LedgerError::InvalidUnitCost(cost));
    }
    Ok(cost.round_dp(COST_SCALE))
}

fn default_active() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn ownership_parse_is_case_insensitive() {
        assert_eq!(Ownership::parse(" house ").unwrap(), Ownership::House);
        assert_eq!(Ownership::parse("Customer").unwrap(), Ownership::Customer);
        assert!(matches!(
            Ownership::parse("tag"),
            Err(LedgerError::InvalidOwnership(value)) if value == "TAG"
        ));
    }

    #[test]
    fn unit_cost_rounds_and_rejects_negatives() {
        assert_eq!(normalize_unit_cost(dec!(1.23456)).unwrap(), dec!(1.2346));
        assert_eq!(normalize_unit_cost(dec!(0)).unwrap(), dec!(0));
        assert!(matches!(
            normalize_unit_cost(dec!(-0.01)),
            Err(LedgerError::InvalidUnitCost(_))
        ));
    }

    #[test]
    fn equal_costs_compare_equal_across_scales() {
        let a = normalize_unit_cost(dec!(3)).unwrap();
        let b = normalize_unit_cost(dec!(3.0000)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn entry_value_is_signed() {
        let entry = LedgerEntry {
            id: 1,
            stock_record_id: 1,
            stock_id: "ENV-10".to_string(),
            location_id: 1,
            customer_id: 1,
            category: "Envelope".to_string(),
            quantity_change: -3,
            unit_cost: dec!(2.5),
            remaining_quantity: 0,
            source_entry_id: Some(1),
            notes: String::new(),
            reference: None,
            recorded_at: Utc::now(),
        };
        assert_eq!(entry.value(), dec!(-7.5));
        assert!(!entry.is_lot());
        assert!(!entry.is_open_lot());
    }

    #[test]
    fn blank_reference_is_dropped() {
        let metadata = EntryMetadata::new("restock").with_reference("   ");
        assert_eq!(metadata.reference, None);
        let metadata = EntryMetadata::new("use").with_reference(" JT-77 ");
        assert_eq!(metadata.reference.as_deref(), Some("JT-77"));
    }
}
