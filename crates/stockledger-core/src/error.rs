use std::fmt::Display;

use rust_decimal::Decimal;
use thiserror::Error;

use crate::models::StockKey;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("invalid quantity {0}: a non-zero whole number of units is required")]
    InvalidQuantity(i64),

    #[error("invalid unit cost {0}: costs cannot be negative")]
    InvalidUnitCost(Decimal),

    #[error("a unit cost is required when adding stock")]
    MissingUnitCost,

    #[error("invalid ownership '{0}': expected HOUSE or CUSTOMER")]
    InvalidOwnership(String),

    #[error("insufficient quantity of {stock_id}: requested {requested}, available {available}")]
    InsufficientQuantity {
        stock_id: String,
        requested: i64,
        available: i64,
    },

    #[error("no cost basis found for {stock_id} (stock record {stock_record_id})")]
    NoCostBasisFound {
        stock_record_id: i64,
        stock_id: String,
    },

    #[error("no stock record for {0}")]
    UnknownStockLocation(StockKey),

    #[error("transfer source and destination are both location {0}")]
    SameLocation(i64),

    #[error("staged material {0} not found")]
    StagedMaterialNotFound(i64),

    #[error("store failure: {0}")]
    StoreFailure(String),
}

impl LedgerError {
    pub fn store<E: Display>(err: E) -> Self {
        LedgerError::StoreFailure(err.to_string())
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
