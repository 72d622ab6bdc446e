pub mod error;
pub mod models;
pub mod queries;
pub mod storage;

pub use error::{LedgerError, LedgerResult};
pub use models::{
    COST_SCALE, EntryMetadata, LedgerEntry, NewLedgerEntry, NewStagedMaterial, NewStockRecord,
    Ownership, StagedMaterial, StockDefaults, StockKey, StockRecord, normalize_unit_cost,
};
pub use queries::{EntryQuery, StockQuery, end_of_day, start_of_day};
pub use storage::{LedgerStore, LedgerTx};
