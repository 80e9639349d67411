use std::{
    collections::{HashMap, HashSet},
    net::SocketAddr,
    sync::{Arc, Mutex, PoisonError},
};

use anyhow::{Context, Result as AnyResult};
use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
};
use tally_core::{HierarchyNode, LoadMode, RowStore, TenantScope, tables};
use tally_platform::{
    BulkImportRequest, BulkImportResponse, COMPLETED_CHANNEL, PROGRESS_CHANNEL, RecalcRequest,
    RedisBus, RepairRequest, ServiceConfig, SyncRequest, TenantQuery, VoucherImportRequest,
    connect_database,
};
use tally_store::PgStore;
use tally_sync::{
    HttpTallyClient, PushError, RecalcReport, RelationshipRepairer, RepairReport, SyncOrchestrator,
    SyncReport, SyncSession, TallySource, group_hierarchy, load, push_vouchers, recalculate_amounts,
    voucher_type_hierarchy,
};
use tally_xml::ImportResponse;
use tokio::sync::{RwLock, mpsc};
use tracing::{error, info, warn};

#[derive(Clone)]
struct AppState {
    store: Arc<dyn RowStore>,
    tally: Arc<dyn TallySource>,
    orchestrator: SyncOrchestrator,
    redis: Option<RedisBus>,
    reports: Arc<RwLock<HashMap<TenantScope, SyncReport>>>,
    guard: SyncGuard,
    tally_company: Option<String>,
    education_mode: bool,
}

impl AppState {
    fn new(store: Arc<dyn RowStore>, tally: Arc<dyn TallySource>) -> Self {
        Self {
            orchestrator: SyncOrchestrator::new(tally.clone(), store.clone()),
            store,
            tally,
            redis: None,
            reports: Arc::default(),
            guard: SyncGuard::default(),
            tally_company: None,
            education_mode: false,
        }
    }
}

/// Tenants with a sync in flight. Two `replace` runs for one tenant must not
/// interleave.
#[derive(Clone, Default)]
struct SyncGuard {
    running: Arc<Mutex<HashSet<TenantScope>>>,
}

impl SyncGuard {
    fn try_acquire(&self, scope: TenantScope) -> Option<SyncPermit> {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        running.insert(scope).then(|| SyncPermit {
            scope,
            running: self.running.clone(),
        })
    }
}

struct SyncPermit {
    scope: TenantScope,
    running: Arc<Mutex<HashSet<TenantScope>>>,
}

impl Drop for SyncPermit {
    fn drop(&mut self) {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.scope);
    }
}

#[tokio::main]
async fn main() -> AnyResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| {
            "tally_gateway=info,tally_sync=info,tower_http=info".to_string()
        }))
        .init();

    let config = ServiceConfig::from_env("0.0.0.0:8080")?;
    let pool = connect_database(&config.database_url, config.db_max_connections).await?;
    let store = PgStore::new(pool);
    store
        .ping()
        .await
        .context("database health check failed")?;

    let tally = HttpTallyClient::new(&config.tally_url, config.tally_timeout)
        .context("failed to build tally client")?;
    info!(url = tally.url(), "tally endpoint configured");

    let mut state = AppState::new(Arc::new(store), Arc::new(tally));
    state.tally_company = config.tally_company.clone();
    state.education_mode = config.education_mode;
    if let Some(redis_url) = &config.redis_url {
        state.redis = Some(RedisBus::connect(redis_url)?);
    }

    let router = Router::new()
        .route("/healthz", get(healthz))
        .route("/bulk-import", post(bulk_import))
        .route("/sync", post(run_sync))
        .route("/sync/status", get(sync_status))
        .route("/repair/relationships", post(repair_relationships))
        .route("/repair/amounts", post(repair_amounts))
        .route("/hierarchy/groups", get(groups))
        .route("/hierarchy/voucher-types", get(voucher_types))
        .route("/vouchers/import", post(import_vouchers))
        .with_state(state);

    let addr: SocketAddr = config.http_addr.parse()?;
    info!("gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn bulk_import(
    State(state): State<AppState>,
    Json(payload): Json<BulkImportRequest>,
) -> Result<Json<BulkImportResponse>, (StatusCode, String)> {
    if payload.tables.is_empty() {
        return Err(invalid_request("tables must not be empty"));
    }
    if let Some(unknown) = payload
        .tables
        .iter()
        .find(|table| !tables::is_known(&table.table_name))
    {
        return Err(invalid_request(format!(
            "unknown table: {}",
            unknown.table_name
        )));
    }

    let scope = payload.scope();
    let replaces = payload
        .tables
        .iter()
        .any(|table| table.operation == LoadMode::Replace);
    let _permit = if replaces {
        Some(state.guard.try_acquire(scope).ok_or_else(|| busy(scope))?)
    } else {
        None
    };

    let mut summaries = Vec::with_capacity(payload.tables.len());
    for table in payload.tables {
        let summary = load(
            state.store.as_ref(),
            &table.table_name,
            table.operation,
            table.data,
            &scope,
        )
        .await;
        summaries.push(summary);
    }

    let total_processed = summaries.iter().map(|summary| summary.inserted).sum();
    let total_failed = summaries.iter().map(|summary| summary.failed).sum();
    info!(
        %scope,
        import_type = %payload.import_type,
        total_processed,
        total_failed,
        "bulk import finished"
    );

    Ok(Json(BulkImportResponse {
        success: total_failed == 0,
        import_type: payload.import_type,
        total_processed,
        total_failed,
        tables: summaries,
    }))
}

async fn run_sync(
    State(state): State<AppState>,
    Json(payload): Json<SyncRequest>,
) -> Result<Json<SyncReport>, (StatusCode, String)> {
    let scope = payload.scope();
    let plan = payload
        .into_plan(state.tally_company.as_deref())
        .map_err(invalid_request)?;

    let Some(_permit) = state.guard.try_acquire(scope) else {
        return Err(busy(scope));
    };

    let session = match &state.redis {
        Some(redis) => {
            let (sender, mut receiver) = mpsc::unbounded_channel();
            let redis = redis.clone();
            tokio::spawn(async move {
                while let Some(progress) = receiver.recv().await {
                    if let Err(err) = redis.publish_json(PROGRESS_CHANNEL, &progress).await {
                        warn!("failed to publish sync progress: {err}");
                    }
                }
            });
            SyncSession::new().with_progress(sender)
        }
        None => SyncSession::new(),
    };

    let report = state.orchestrator.run(&plan, session).await;

    if let Some(redis) = &state.redis {
        if let Err(err) = redis.publish_json(COMPLETED_CHANNEL, &report).await {
            error!("failed to publish sync report: {err}");
        }
    }
    state.reports.write().await.insert(scope, report.clone());

    Ok(Json(report))
}

async fn sync_status(
    State(state): State<AppState>,
    Query(query): Query<TenantQuery>,
) -> Result<Json<SyncReport>, (StatusCode, String)> {
    let scope = query.scope();
    state
        .reports
        .read()
        .await
        .get(&scope)
        .cloned()
        .map(Json)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("no sync recorded for {scope}")))
}

async fn repair_relationships(
    State(state): State<AppState>,
    Json(payload): Json<RepairRequest>,
) -> Result<Json<RepairReport>, (StatusCode, String)> {
    let voucher_number = payload
        .voucher_number
        .as_deref()
        .map(str::trim)
        .filter(|number| !number.is_empty());

    let report = RelationshipRepairer::new(state.store.as_ref(), payload.scope())
        .run(voucher_number)
        .await;
    Ok(Json(report))
}

async fn repair_amounts(
    State(state): State<AppState>,
    Json(payload): Json<RecalcRequest>,
) -> Result<Json<RecalcReport>, (StatusCode, String)> {
    if payload.limit == Some(0) {
        return Err(invalid_request("limit must be greater than zero"));
    }

    recalculate_amounts(state.store.as_ref(), &payload.scope(), payload.limit)
        .await
        .map(Json)
        .map_err(internal_error)
}

async fn groups(
    State(state): State<AppState>,
    Query(query): Query<TenantQuery>,
) -> Result<Json<Vec<HierarchyNode>>, (StatusCode, String)> {
    group_hierarchy(state.store.as_ref(), &query.scope())
        .await
        .map(Json)
        .map_err(internal_error)
}

async fn voucher_types(
    State(state): State<AppState>,
    Query(query): Query<TenantQuery>,
) -> Result<Json<Vec<HierarchyNode>>, (StatusCode, String)> {
    voucher_type_hierarchy(state.store.as_ref(), &query.scope())
        .await
        .map(Json)
        .map_err(internal_error)
}

async fn import_vouchers(
    State(state): State<AppState>,
    Json(payload): Json<VoucherImportRequest>,
) -> Result<Json<ImportResponse>, (StatusCode, String)> {
    if payload.vouchers.is_empty() {
        return Err(invalid_request("vouchers must not be empty"));
    }

    let company = payload.company.or_else(|| state.tally_company.clone());
    let education_mode = payload.education_mode.unwrap_or(state.education_mode);

    match push_vouchers(
        state.tally.as_ref(),
        company.as_deref(),
        &payload.vouchers,
        education_mode,
    )
    .await
    {
        Ok(response) => Ok(Json(response)),
        Err(PushError::Invalid(err)) => Err(invalid_request(err)),
        Err(PushError::Client(err)) => Err((StatusCode::BAD_GATEWAY, err.to_string())),
    }
}

fn busy(scope: TenantScope) -> (StatusCode, String) {
    (
        StatusCode::CONFLICT,
        format!("a sync or replace for {scope} is already running"),
    )
}

fn invalid_request<E: std::fmt::Display>(err: E) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, err.to_string())
}

fn internal_error<E: std::fmt::Display>(err: E) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}
