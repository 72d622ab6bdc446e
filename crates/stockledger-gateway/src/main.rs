use std::net::SocketAddr;

use anyhow::Result as AnyResult;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use stockledger_core::{LedgerError, NewStagedMaterial, StagedMaterial, StockQuery};
use stockledger_inventory::{
    BalanceRow, Discrepancy, HistoryFilter, InventoryLedger, StockAdjustment, StockOnHandRow,
    TransactionRow, TransferResult,
};
use stockledger_platform::{
    AcceptStagedRequest, AdjustStockRequest, BalanceParams, ItemsResponse, LedgerChangeKind,
    LedgerChangedEvent, PgLedgerStore, RedisBus, ServiceConfig, TransferStockRequest,
    connect_database, ensure_schema,
};
use tracing::{error, info, warn};

type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

#[derive(Clone)]
struct AppState {
    ledger: InventoryLedger<PgLedgerStore>,
    redis: Option<RedisBus>,
}

#[tokio::main]
async fn main() -> AnyResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "stockledger_gateway=info".to_string()),
        )
        .init();

    let config = ServiceConfig::from_env("0.0.0.0:8080")?;
    let pool = connect_database(&config.database_url, config.database_max_connections).await?;
    ensure_schema(&pool).await?;
    let redis = config
        .redis_url
        .as_deref()
        .map(RedisBus::connect)
        .transpose()?;
    if redis.is_none() {
        info!("REDIS_URL not set, ledger notifications disabled");
    }

    let state = AppState {
        ledger: InventoryLedger::new(PgLedgerStore::new(pool)),
        redis,
    };
    let router = Router::new()
        .route("/healthz", get(healthz))
        .route("/stock", get(list_stock))
        .route("/stock/adjustments", post(adjust_stock))
        .route("/stock/transfers", post(transfer_stock))
        .route("/staging", get(list_staged).post(stage_material))
        .route("/staging/{staged_id}/accept", post(accept_staged))
        .route("/reports/transactions", get(transaction_report))
        .route("/reports/balance", get(balance_report))
        .route("/reports/reconciliation", get(reconciliation_report))
        .with_state(state);

    let addr: SocketAddr = config.http_addr.parse()?;
    info!("gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

async fn healthz(State(state): State<AppState>) -> Result<&'static str, (StatusCode, String)> {
    sqlx::query("SELECT 1")
        .execute(state.ledger.store().pool())
        .await
        .map_err(internal_error)?;
    Ok("ok")
}

async fn list_stock(
    State(state): State<AppState>,
    Query(query): Query<StockQuery>,
) -> ApiResult<ItemsResponse<StockOnHandRow>> {
    let items = state
        .ledger
        .stock_on_hand(&query)
        .await
        .map_err(ledger_error)?;
    Ok(Json(ItemsResponse { items }))
}

async fn adjust_stock(
    State(state): State<AppState>,
    Json(payload): Json<AdjustStockRequest>,
) -> ApiResult<StockAdjustment> {
    let adjusted = state
        .ledger
        .adjust(&payload.into_adjustment())
        .await
        .map_err(ledger_error)?;

    notify(
        &state,
        LedgerChangedEvent::adjusted(LedgerChangeKind::Adjusted, &adjusted),
    )
    .await;
    Ok(Json(adjusted))
}

async fn transfer_stock(
    State(state): State<AppState>,
    Json(payload): Json<TransferStockRequest>,
) -> ApiResult<TransferResult> {
    let moved = state
        .ledger
        .transfer(&payload.into_request())
        .await
        .map_err(ledger_error)?;

    notify(&state, LedgerChangedEvent::transferred(&moved)).await;
    Ok(Json(moved))
}

async fn list_staged(State(state): State<AppState>) -> ApiResult<ItemsResponse<StagedMaterial>> {
    let items = state.ledger.list_staged().await.map_err(ledger_error)?;
    Ok(Json(ItemsResponse { items }))
}

async fn stage_material(
    State(state): State<AppState>,
    Json(payload): Json<NewStagedMaterial>,
) -> Result<(StatusCode, Json<StagedMaterial>), (StatusCode, String)> {
    let staged = state.ledger.stage(payload).await.map_err(ledger_error)?;
    Ok((StatusCode::CREATED, Json(staged)))
}

async fn accept_staged(
    State(state): State<AppState>,
    Path(staged_id): Path<i64>,
    Json(payload): Json<AcceptStagedRequest>,
) -> ApiResult<StockAdjustment> {
    let accepted = state
        .ledger
        .accept_staged(staged_id, &payload.into_acceptance())
        .await
        .map_err(ledger_error)?;

    notify(
        &state,
        LedgerChangedEvent::adjusted(LedgerChangeKind::Accepted, &accepted),
    )
    .await;
    Ok(Json(accepted))
}

async fn transaction_report(
    State(state): State<AppState>,
    Query(filter): Query<HistoryFilter>,
) -> ApiResult<ItemsResponse<TransactionRow>> {
    let items = state
        .ledger
        .transaction_history(&filter)
        .await
        .map_err(ledger_error)?;
    Ok(Json(ItemsResponse { items }))
}

async fn balance_report(
    State(state): State<AppState>,
    Query(params): Query<BalanceParams>,
) -> ApiResult<ItemsResponse<BalanceRow>> {
    let items = state
        .ledger
        .balance_as_of(&params.into_filter())
        .await
        .map_err(ledger_error)?;
    Ok(Json(ItemsResponse { items }))
}

async fn reconciliation_report(
    State(state): State<AppState>,
) -> ApiResult<ItemsResponse<Discrepancy>> {
    let items = state.ledger.reconcile().await.map_err(ledger_error)?;
    Ok(Json(ItemsResponse { items }))
}

/// Publishes a committed change. Failures are logged only; the mutation stands.
async fn notify(state: &AppState, event: LedgerChangedEvent) {
    let Some(redis) = &state.redis else {
        return;
    };
    if let Err(err) = redis.publish_ledger_change(&event).await {
        warn!(event_id = %event.event_id, "failed to publish ledger event: {err}");
    }
}

fn ledger_error(err: LedgerError) -> (StatusCode, String) {
    let status = match &err {
        LedgerError::InvalidQuantity(_)
        | LedgerError::InvalidUnitCost(_)
        | LedgerError::MissingUnitCost
        | LedgerError::InvalidOwnership(_)
        | LedgerError::SameLocation(_) => StatusCode::BAD_REQUEST,
        LedgerError::UnknownStockLocation(_) | LedgerError::StagedMaterialNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        LedgerError::InsufficientQuantity { .. } => StatusCode::CONFLICT,
        LedgerError::NoCostBasisFound { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        LedgerError::StoreFailure(_) => {
            error!("ledger store failure: {err}");
            return internal_error(err);
        }
    };
    (status, err.to_string())
}

fn internal_error<E: std::fmt::Display>(err: E) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}
