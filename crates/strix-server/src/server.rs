// crates/strix-server/src/server.rs
// ============================================================================
// Module: Strix REST Server
// Description: axum router, handlers, and SSE progress streaming.
// Purpose: Serve the scan engine to CLI and WebUI clients over HTTP.
// Dependencies: strix-core, strix-correlate, axum, tokio, tokio-stream
// ============================================================================

//! ## Overview
//! Handlers translate HTTP requests into scheduler, store, and correlation
//! calls and map typed errors to status codes: validation failures are 400,
//! unknown scans 404, state conflicts 409, unsupported export formats 415,
//! everything else 500. Core calls are synchronous and run on the blocking
//! pool. The progress stream polls snapshots on an interval, emits `progress`
//! frames, a `heartbeat` at least every 30 seconds, and one terminal
//! `complete` frame.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::extract::Path;
use axum::extract::Query;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::response::Sse;
use axum::response::sse::Event as SseEvent;
use axum::routing::get;
use axum::routing::post;
use serde::Deserialize;
use serde::Serialize;
use strix_core::EventHash;
use strix_core::EventQuery;
use strix_core::EventStore;
use strix_core::ExportError;
use strix_core::ExportFormat;
use strix_core::ModuleName;
use strix_core::ModuleProvider;
use strix_core::ModuleSelection;
use strix_core::ScanId;
use strix_core::ScanScheduler;
use strix_core::SchedulerError;
use strix_core::StoreError;
use strix_core::UseCase;
use strix_core::export_events;
use strix_correlate::CorrelationEngine;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_stream::wrappers::ReceiverStream;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Heartbeat frames are emitted at least this often.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
/// Buffered SSE frames per stream.
const SSE_CHANNEL_CAPACITY: usize = 16;

// ============================================================================
// SECTION: State
// ============================================================================

/// Shared server state.
#[derive(Clone)]
pub struct AppState {
    /// Scan lifecycle controller.
    pub scheduler: Arc<ScanScheduler>,
    /// Durable event store for reads.
    pub store: Arc<dyn EventStore>,
    /// Correlation engine for on-demand runs.
    pub engine: Arc<CorrelationEngine>,
    /// Module registry for descriptor listings.
    pub provider: Arc<dyn ModuleProvider>,
    /// SSE progress poll interval.
    pub progress_poll: Duration,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Server-level errors mapped onto HTTP statuses.
///
/// # Invariants
/// - Every variant maps to exactly one status code.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Request was malformed or referenced unknown modules.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Referenced scan does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// Operation conflicts with current scan state.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Export format is not supported.
    #[error("unsupported media type: {0}")]
    Unsupported(String),
    /// Engine-internal failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Returns the HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Unsupported(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

impl From<SchedulerError> for ServerError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::InvalidTarget(inner) => Self::BadRequest(inner.to_string()),
            SchedulerError::Resolve(inner) => Self::BadRequest(inner.to_string()),
            SchedulerError::NotFound(scan) => Self::NotFound(scan),
            SchedulerError::AlreadyTerminal {
                scan,
                status,
            } => Self::Conflict(format!("scan {scan} already terminal: {status}")),
            SchedulerError::ScanRunning(scan) => Self::Conflict(format!("scan is running: {scan}")),
            SchedulerError::Store(inner) => Self::from(inner),
            SchedulerError::Internal(message) => Self::Internal(message),
        }
    }
}

impl From<StoreError> for ServerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(message) => Self::NotFound(message),
            StoreError::Conflict(message) => Self::Conflict(message),
            StoreError::Invalid(message) => Self::BadRequest(message),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<ExportError> for ServerError {
    fn from(err: ExportError) -> Self {
        match err {
            ExportError::Unsupported(format) => Self::Unsupported(format),
            ExportError::Encoding(message) => Self::Internal(message),
        }
    }
}

/// Parses a scan id path parameter; unknown shapes read as 404.
fn parse_scan_id(raw: &str) -> Result<ScanId, ServerError> {
    ScanId::parse(raw).map_err(|_| ServerError::NotFound(format!("scan: {raw}")))
}

/// Runs a blocking core call on the blocking pool.
async fn blocking<T, F>(work: F) -> Result<T, ServerError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ServerError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| ServerError::Internal(format!("blocking task failed: {err}")))?
}

// ============================================================================
// SECTION: Request/Response Bodies
// ============================================================================

/// Body of `POST /api/scans`.
#[derive(Debug, Deserialize)]
pub struct CreateScanBody {
    /// Raw target string.
    pub target: String,
    /// Display name.
    pub scan_name: String,
    /// Use-case tag used when no explicit module list is given.
    pub scan_type: String,
    /// Optional explicit module names.
    #[serde(default)]
    pub modules: Option<Vec<String>>,
}

/// Response of `POST /api/scans`.
#[derive(Debug, Serialize)]
struct CreateScanResponse {
    /// New scan identifier.
    scan_id: ScanId,
}

/// Body of `POST /api/scans/{id}/correlations`.
#[derive(Debug, Default, Deserialize)]
pub struct RunCorrelationsBody {
    /// Optional restriction to named rules.
    #[serde(default)]
    pub rules: Option<Vec<String>>,
}

/// Response of `POST /api/scans/{id}/correlations`.
#[derive(Debug, Serialize)]
struct RunCorrelationsResponse {
    /// Rules evaluated.
    ran: usize,
    /// Correlation results written.
    found: usize,
}

/// Body of `POST /api/scans/{id}/false-positive`.
#[derive(Debug, Deserialize)]
pub struct FalsePositiveBody {
    /// Event hashes to update.
    pub hashes: Vec<String>,
    /// New flag value.
    pub fp: bool,
}

/// Response of `POST /api/scans/{id}/false-positive`.
#[derive(Debug, Serialize)]
struct FalsePositiveResponse {
    /// Rows updated.
    updated: u64,
}

/// Query parameters of `GET /api/scans/{id}/events`.
#[derive(Debug, Default, Deserialize)]
pub struct EventsParams {
    /// Restrict to one event type.
    #[serde(default)]
    pub event_type: Option<String>,
    /// Restrict to one producing module.
    #[serde(default)]
    pub module: Option<String>,
    /// Maximum rows returned.
    #[serde(default)]
    pub limit: Option<usize>,
    /// Rows skipped before the first returned row.
    #[serde(default)]
    pub offset: Option<usize>,
}

// ============================================================================
// SECTION: Router
// ============================================================================

/// Builds the REST router over shared state.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/scans", post(create_scan).get(list_scans))
        .route("/api/scans/{id}", get(scan_detail).delete(delete_scan))
        .route("/api/scans/{id}/stop", post(stop_scan))
        .route("/api/scans/{id}/events", get(scan_events))
        .route("/api/scans/{id}/summary", get(scan_summary))
        .route(
            "/api/scans/{id}/correlations",
            get(scan_correlations).post(run_correlations),
        )
        .route("/api/scans/{id}/export/{format}", get(export_scan))
        .route("/api/scans/{id}/progress/stream", get(progress_stream))
        .route("/api/scans/{id}/false-positive", post(set_false_positive))
        .route("/api/modules", get(list_modules))
        .with_state(state)
}

/// Serves the router on the given listener address until shutdown.
///
/// # Errors
///
/// Returns [`ServerError::Internal`] when the listener cannot bind or the
/// server fails.
pub async fn serve(state: AppState, bind: std::net::SocketAddr) -> Result<(), ServerError> {
    let listener = TcpListener::bind(bind)
        .await
        .map_err(|err| ServerError::Internal(format!("bind {bind} failed: {err}")))?;
    tracing::info!(%bind, "strix server listening");
    axum::serve(listener, router(state))
        .await
        .map_err(|err| ServerError::Internal(format!("server failed: {err}")))
}

// ============================================================================
// SECTION: Scan Handlers
// ============================================================================

/// `POST /api/scans`: starts a scan.
async fn create_scan(
    State(state): State<AppState>,
    Json(body): Json<CreateScanBody>,
) -> Result<Json<impl Serialize>, ServerError> {
    let selection = match &body.modules {
        Some(names) if !names.is_empty() => {
            let parsed = names
                .iter()
                .map(|raw| ModuleName::parse(raw))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|err| ServerError::BadRequest(err.to_string()))?;
            ModuleSelection::Names(parsed)
        }
        _ => ModuleSelection::ByUseCase(
            UseCase::parse(&body.scan_type)
                .map_err(|err| ServerError::BadRequest(err.to_string()))?,
        ),
    };
    let scheduler = Arc::clone(&state.scheduler);
    let scan_id = blocking(move || {
        scheduler
            .start_scan(strix_core::StartScanRequest {
                name: body.scan_name,
                target: body.target,
                target_kind: None,
                selection,
                option_overrides: std::collections::BTreeMap::new(),
            })
            .map_err(ServerError::from)
    })
    .await?;
    Ok(Json(CreateScanResponse {
        scan_id,
    }))
}

/// `GET /api/scans`: lists scans.
async fn list_scans(State(state): State<AppState>) -> Result<Json<impl Serialize>, ServerError> {
    let store = Arc::clone(&state.store);
    let scans = blocking(move || store.list_scans().map_err(ServerError::from)).await?;
    Ok(Json(serde_json::json!({ "scans": scans })))
}

/// `GET /api/scans/{id}`: scan detail with progress snapshot.
async fn scan_detail(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<impl Serialize>, ServerError> {
    let scan_id = parse_scan_id(&id)?;
    let store = Arc::clone(&state.store);
    let scheduler = Arc::clone(&state.scheduler);
    let (record, snapshot) = blocking(move || {
        let record = store.get_scan(&scan_id).map_err(ServerError::from)?;
        let snapshot = scheduler.status(&scan_id).map_err(ServerError::from)?;
        Ok((record, snapshot))
    })
    .await?;
    Ok(Json(serde_json::json!({ "scan": record, "progress": snapshot })))
}

/// `POST /api/scans/{id}/stop`: stops a running scan.
async fn stop_scan(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<impl Serialize>, ServerError> {
    let scan_id = parse_scan_id(&id)?;
    let scheduler = Arc::clone(&state.scheduler);
    blocking(move || scheduler.stop_scan(&scan_id).map_err(ServerError::from)).await?;
    Ok(Json(serde_json::json!({})))
}

/// `DELETE /api/scans/{id}`: deletes a stopped scan.
async fn delete_scan(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<impl Serialize>, ServerError> {
    let scan_id = parse_scan_id(&id)?;
    let scheduler = Arc::clone(&state.scheduler);
    blocking(move || scheduler.delete_scan(&scan_id).map_err(ServerError::from)).await?;
    Ok(Json(serde_json::json!({})))
}

// ============================================================================
// SECTION: Query Handlers
// ============================================================================

/// `GET /api/scans/{id}/events`: filtered event page.
async fn scan_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<EventsParams>,
) -> Result<Json<impl Serialize>, ServerError> {
    let scan_id = parse_scan_id(&id)?;
    let module = params
        .module
        .as_deref()
        .map(ModuleName::parse)
        .transpose()
        .map_err(|err| ServerError::BadRequest(err.to_string()))?;
    let query = EventQuery {
        event_type: params.event_type,
        module,
        limit: params.limit.unwrap_or(strix_core::interfaces::DEFAULT_EVENT_PAGE),
        offset: params.offset.unwrap_or(0),
        ..EventQuery::default()
    };
    let store = Arc::clone(&state.store);
    let events = blocking(move || {
        store.get_scan(&scan_id).map_err(ServerError::from)?;
        store.events(&scan_id, &query).map_err(ServerError::from)
    })
    .await?;
    Ok(Json(serde_json::json!({ "events": events })))
}

/// `GET /api/scans/{id}/summary`: per-type totals.
async fn scan_summary(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<impl Serialize>, ServerError> {
    let scan_id = parse_scan_id(&id)?;
    let store = Arc::clone(&state.store);
    let summary = blocking(move || {
        store.get_scan(&scan_id).map_err(ServerError::from)?;
        store.summary(&scan_id).map_err(ServerError::from)
    })
    .await?;
    Ok(Json(serde_json::json!({ "summary": summary })))
}

/// `GET /api/scans/{id}/correlations`: correlation results.
async fn scan_correlations(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<impl Serialize>, ServerError> {
    let scan_id = parse_scan_id(&id)?;
    let store = Arc::clone(&state.store);
    let correlations = blocking(move || {
        store.get_scan(&scan_id).map_err(ServerError::from)?;
        store.correlations(&scan_id).map_err(ServerError::from)
    })
    .await?;
    Ok(Json(serde_json::json!({ "correlations": correlations })))
}

/// `POST /api/scans/{id}/correlations`: on-demand correlation run.
async fn run_correlations(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<RunCorrelationsBody>>,
) -> Result<Json<impl Serialize>, ServerError> {
    let scan_id = parse_scan_id(&id)?;
    let rules = body.and_then(|Json(body)| body.rules);
    let engine = Arc::clone(&state.engine);
    let outcome = blocking(move || {
        engine
            .run_scan(&scan_id, rules.as_deref())
            .map_err(|err| match err {
                strix_correlate::EngineError::Store(inner) => ServerError::from(inner),
            })
    })
    .await?;
    Ok(Json(RunCorrelationsResponse {
        ran: outcome.rules_run,
        found: outcome.results,
    }))
}

/// `GET /api/scans/{id}/export/{format}`: event export bytes.
async fn export_scan(
    State(state): State<AppState>,
    Path((id, format)): Path<(String, String)>,
) -> Result<Response, ServerError> {
    let scan_id = parse_scan_id(&id)?;
    let format = ExportFormat::parse(&format)?;
    let store = Arc::clone(&state.store);
    let bytes = blocking(move || {
        let events = store.all_events(&scan_id).map_err(ServerError::from)?;
        export_events(&events, format).map_err(ServerError::from)
    })
    .await?;
    Ok((
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, format.content_type())],
        bytes,
    )
        .into_response())
}

/// `POST /api/scans/{id}/false-positive`: flags event hashes.
async fn set_false_positive(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<FalsePositiveBody>,
) -> Result<Json<impl Serialize>, ServerError> {
    let scan_id = parse_scan_id(&id)?;
    let hashes = body
        .hashes
        .iter()
        .map(|raw| EventHash::parse(raw))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| ServerError::BadRequest(err.to_string()))?;
    let scheduler = Arc::clone(&state.scheduler);
    let updated = blocking(move || {
        scheduler
            .set_false_positive(&scan_id, &hashes, body.fp)
            .map_err(ServerError::from)
    })
    .await?;
    Ok(Json(FalsePositiveResponse {
        updated,
    }))
}

/// `GET /api/modules`: module descriptors.
async fn list_modules(State(state): State<AppState>) -> Json<impl Serialize> {
    Json(serde_json::json!({ "modules": state.provider.descriptors() }))
}

// ============================================================================
// SECTION: Progress Stream
// ============================================================================

/// `GET /api/scans/{id}/progress/stream`: SSE progress frames.
async fn progress_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Sse<ReceiverStream<Result<SseEvent, Infallible>>>, ServerError> {
    let scan_id = parse_scan_id(&id)?;
    {
        // Fail with 404 before the stream starts when the scan is unknown.
        let scheduler = Arc::clone(&state.scheduler);
        let probe = scan_id.clone();
        blocking(move || scheduler.status(&probe).map_err(ServerError::from)).await?;
    }
    let (tx, rx) = tokio::sync::mpsc::channel::<Result<SseEvent, Infallible>>(SSE_CHANNEL_CAPACITY);
    let scheduler = Arc::clone(&state.scheduler);
    let poll = state.progress_poll;
    tokio::spawn(async move {
        let mut last_heartbeat = tokio::time::Instant::now();
        loop {
            let snapshot = {
                let scheduler = Arc::clone(&scheduler);
                let scan_id = scan_id.clone();
                tokio::task::spawn_blocking(move || scheduler.status(&scan_id)).await
            };
            let snapshot = match snapshot {
                Ok(Ok(snapshot)) => snapshot,
                Ok(Err(_)) | Err(_) => break,
            };
            let terminal = snapshot.status.is_terminal();
            let frame = SseEvent::default()
                .event("progress")
                .json_data(&snapshot)
                .unwrap_or_default();
            if tx.send(Ok(frame)).await.is_err() {
                break;
            }
            if terminal {
                let done = SseEvent::default()
                    .event("complete")
                    .json_data(&snapshot)
                    .unwrap_or_default();
                let _ = tx.send(Ok(done)).await;
                break;
            }
            if last_heartbeat.elapsed() >= HEARTBEAT_INTERVAL {
                last_heartbeat = tokio::time::Instant::now();
                let beat = SseEvent::default().event("heartbeat").data("{}");
                if tx.send(Ok(beat)).await.is_err() {
                    break;
                }
            }
            tokio::time::sleep(poll).await;
        }
    });
    Ok(Sse::new(ReceiverStream::new(rx)))
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests;
