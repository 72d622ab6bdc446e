use chrono::{DateTime, NaiveDate, NaiveTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{LedgerEntry, StockRecord};

/// Filter over ledger entries. Every bound is inclusive and unset fields match anything.
///
/// Both store implementations must select exactly the entries for which
/// [`EntryQuery::matches`] holds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryQuery {
    pub stock_record_id: Option<i64>,
    pub stock_id: Option<String>,
    pub customer_id: Option<i64>,
    pub category: Option<String>,
    pub location_id: Option<i64>,
    pub recorded_from: Option<DateTime<Utc>>,
    pub recorded_to: Option<DateTime<Utc>>,
}

impl EntryQuery {
    pub fn matches(&self, entry: &LedgerEntry) -> bool {
        self.stock_record_id
            .is_none_or(|id| entry.stock_record_id == id)
            && self
                .stock_id
                .as_deref()
                .is_none_or(|stock_id| entry.stock_id == stock_id)
            && self.customer_id.is_none_or(|id| entry.customer_id == id)
            && self
                .category
                .as_deref()
                .is_none_or(|category| entry.category == category)
            && self.location_id.is_none_or(|id| entry.location_id == id)
            && self.recorded_from.is_none_or(|from| entry.recorded_at >= from)
            && self.recorded_to.is_none_or(|to| entry.recorded_at <= to)
    }
}

/// Filter over current stock records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StockQuery {
    pub stock_id: Option<String>,
    pub customer_id: Option<i64>,
    pub location_id: Option<i64>,
}

impl StockQuery {
    pub fn matches(&self, record: &StockRecord) -> bool {
        self.stock_id
            .as_deref()
            .is_none_or(|stock_id| record.stock_id == stock_id)
            && self.customer_id.is_none_or(|id| record.customer_id == id)
            && self.location_id.is_none_or(|id| record.location_id == id)
    }
}

/// First instant of `date` in UTC.
pub fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

/// Last microsecond of `date` in UTC, the inclusive upper bound for date-based filters.
pub fn end_of_day(date: NaiveDate) -> DateTime<Utc> {
    start_of_day(date) + TimeDelta::days(1) - TimeDelta::microseconds(1)
}
