pub mod config;
pub mod contracts;
pub mod db;
pub mod pg_store;
pub mod redis_bus;

pub use config::ServiceConfig;
pub use contracts::{
    AcceptStagedRequest, AdjustStockRequest, BalanceParams, ItemsResponse, LEDGER_CHANNEL,
    LedgerChangeKind, LedgerChangedEvent, TransferStockRequest,
};
pub use db::{connect_database, ensure_schema};
pub use pg_store::{PgLedgerStore, PgLedgerTx};
pub use redis_bus::RedisBus;
