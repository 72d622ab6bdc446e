//! Read-only aggregations over the ledger and the stock snapshot.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use stockledger_core::{
    EntryQuery, LedgerEntry, LedgerResult, LedgerStore, StockQuery, StockRecord, end_of_day,
    start_of_day,
};

/// Filter accepted by the transaction history report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryFilter {
    pub stock_id: Option<String>,
    pub customer_id: Option<i64>,
    pub category: Option<String>,
    pub location_id: Option<i64>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
}

impl HistoryFilter {
    pub fn to_query(&self) -> EntryQuery {
        EntryQuery {
            stock_record_id: None,
            stock_id: non_blank(self.stock_id.as_deref()),
            customer_id: self.customer_id,
            category: non_blank(self.category.as_deref()),
            location_id: self.location_id,
            recorded_from: self.date_from.map(start_of_day),
            recorded_to: self.date_to.map(end_of_day),
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRow {
    pub entry_id: i64,
    pub stock_record_id: i64,
    pub stock_id: String,
    pub location_id: i64,
    pub customer_id: i64,
    pub category: String,
    pub quantity_change: i64,
    pub unit_cost: Decimal,
    pub value: Decimal,
    pub remaining_quantity: i64,
    pub notes: String,
    pub reference: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl From<LedgerEntry> for TransactionRow {
    fn from(entry: LedgerEntry) -> Self {
        Self {
            value: entry.value(),
            entry_id: entry.id,
            stock_record_id: entry.stock_record_id,
            stock_id: entry.stock_id,
            location_id: entry.location_id,
            customer_id: entry.customer_id,
            category: entry.category,
            quantity_change: entry.quantity_change,
            unit_cost: entry.unit_cost,
            remaining_quantity: entry.remaining_quantity,
            notes: entry.notes,
            reference: entry.reference,
            recorded_at: entry.recorded_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceRow {
    pub stock_id: String,
    pub category: String,
    pub quantity: i64,
    pub value: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockOnHandRow {
    #[serde(flatten)]
    pub record: StockRecord,
    pub below_minimum: bool,
}

pub async fn transaction_history<S: LedgerStore>(
    store: &S,
    filter: &HistoryFilter,
) -> LedgerResult<Vec<TransactionRow>> {
    let entries = store.entries(&filter.to_query()).await?;
    Ok(entries.into_iter().map(TransactionRow::from).collect())
}

/// Filter accepted by the point-in-time balance report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceFilter {
    pub customer_id: Option<i64>,
    pub category: Option<String>,
    /// Inclusive cutoff on the entry timestamp.
    pub as_of: DateTime<Utc>,
}

impl BalanceFilter {
    pub fn as_of(as_of: DateTime<Utc>) -> Self {
        Self {
            customer_id: None,
            category: None,
            as_of,
        }
    }

    /// Balance including every entry recorded on `date`.
    pub fn on(date: NaiveDate) -> Self {
        Self::as_of(end_of_day(date))
    }

    pub fn for_customer(mut self, customer_id: i64) -> Self {
        self.customer_id = Some(customer_id);
        self
    }

    pub fn in_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn to_query(&self) -> EntryQuery {
        EntryQuery {
            customer_id: self.customer_id,
            category: non_blank(self.category.as_deref()),
            recorded_to: Some(self.as_of),
            ..EntryQuery::default()
        }
    }
}

/// Quantity and value per stock id and category over the entries matching
/// `filter`.
///
/// Entries are bucketed by their current timestamp. A lot that absorbed a
/// later equal-cost addition carries that addition's timestamp, so a cutoff
/// between the original receipt and the merge omits the whole lot while
/// still counting draws made against it, and can report negative stock.
pub async fn balance_as_of<S: LedgerStore>(
    store: &S,
    filter: &BalanceFilter,
) -> LedgerResult<Vec<BalanceRow>> {
    let entries = store.entries(&filter.to_query()).await?;
    Ok(summarize(&entries))
}

/// Groups entries by stock id and category, ordered by both.
pub fn summarize(entries: &[LedgerEntry]) -> Vec<BalanceRow> {
    let mut groups: BTreeMap<(&str, &str), (i64, Decimal)> = BTreeMap::new();
    for entry in entries {
        let totals = groups
            .entry((entry.stock_id.as_str(), entry.category.as_str()))
            .or_insert((0, Decimal::ZERO));
        totals.0 += entry.quantity_change;
        totals.1 += entry.value();
    }

    groups
        .into_iter()
        .map(|((stock_id, category), (quantity, value))| BalanceRow {
            stock_id: stock_id.to_string(),
            category: category.to_string(),
            quantity,
            value,
        })
        .collect()
}

pub async fn stock_on_hand<S: LedgerStore>(
    store: &S,
    query: &StockQuery,
) -> LedgerResult<Vec<StockOnHandRow>> {
    let records = store.stock_records(query).await?;
    Ok(records
        .into_iter()
        .map(|record| StockOnHandRow {
            below_minimum: record.below_minimum(),
            record,
        })
        .collect())
}
