//! Axum router and all HTTP handlers for trc-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. Handlers are `pub(crate)` so the scenario tests in
//! `tests/` can compose the router directly.

use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use futures_util::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{error, warn};
use trc_db::StoreError;
use trc_runtime::{BufferError, BusMsg, CoordinatorError};
use trc_schemas::{RawEvent, Scenario};

use crate::{
    api_types::{
        ErrorResponse, HealthResponse, IngestAck, ListQuery, TransactionDetail, TransactionRow,
        VolumeQuery,
    },
    state::{AppState, BuildInfo},
};

/// Hard cap on `limit` for the list endpoint.
pub const MAX_LIST_LIMIT: usize = 500;
/// Hard cap on `minutes` for the volume endpoint (one day).
pub const MAX_VOLUME_MINUTES: u32 = 24 * 60;

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/stream", get(stream))
        .route("/ingest", post(ingest))
        .route("/api/reconciliation/summary", get(summary))
        .route("/api/reconciliation/transactions", get(list_transactions))
        .route("/api/reconciliation/transaction/:id", get(transaction_detail))
        .route("/api/reconciliation/volume", get(volume))
        .route("/api/reconciliation/recent", get(recent))
        .with_state(state)
}

fn error_response(status: StatusCode, body: ErrorResponse) -> Response {
    (status, Json(body)).into_response()
}

fn store_failure(e: StoreError) -> Response {
    error!(error = %e, "store query failed");
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        ErrorResponse::new(e.to_string()),
    )
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let (status, body) = health_report(&st.build, st.coordinator.buffer().len());
    (status, Json(body))
}

/// An unreadable buffer makes the service unhealthy: ingest would 503 too.
fn health_report(
    build: &BuildInfo,
    buffered: Result<usize, BufferError>,
) -> (StatusCode, HealthResponse) {
    match buffered {
        Ok(buffered) => (
            StatusCode::OK,
            HealthResponse {
                ok: true,
                service: build.service,
                version: build.version,
                buffered,
                error: None,
            },
        ),
        Err(e) => {
            error!(error = %e, "health: buffer unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                HealthResponse {
                    ok: false,
                    service: build.service,
                    version: build.version,
                    buffered: 0,
                    error: Some(e.to_string()),
                },
            )
        }
    }
}

// ---------------------------------------------------------------------------
// POST /ingest
// ---------------------------------------------------------------------------

/// Accept one source event.
///
/// The caller only learns whether the event was accepted. Reconciliation
/// runs inline, but a failed finalize is logged and the buffered events are
/// kept for retry; it is never reported back to the source.
pub(crate) async fn ingest(
    State(st): State<Arc<AppState>>,
    body: Result<Json<RawEvent>, JsonRejection>,
) -> Response {
    let Json(raw) = match body {
        Ok(b) => b,
        Err(rejection) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                ErrorResponse::new(rejection.body_text()),
            )
        }
    };

    match st.coordinator.ingest(&raw).await {
        Ok(_) | Err(CoordinatorError::Persistence(_)) => {
            (StatusCode::OK, Json(IngestAck::received())).into_response()
        }
        Err(CoordinatorError::Validation(e)) => {
            warn!(error = %e, "ingest rejected");
            error_response(
                StatusCode::BAD_REQUEST,
                ErrorResponse::with_field(e.to_string(), e.field()),
            )
        }
        Err(CoordinatorError::Buffer(e)) => {
            error!(error = %e, "ingest failed: buffer unavailable");
            error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorResponse::new(e.to_string()),
            )
        }
    }
}

// ---------------------------------------------------------------------------
// GET /api/reconciliation/summary
// ---------------------------------------------------------------------------

pub(crate) async fn summary(State(st): State<Arc<AppState>>) -> Response {
    match st.store().summary().await {
        Ok(s) => (StatusCode::OK, Json(s)).into_response(),
        Err(e) => store_failure(e),
    }
}

// ---------------------------------------------------------------------------
// GET /api/reconciliation/transactions?scenario=&limit=
// ---------------------------------------------------------------------------

pub(crate) async fn list_transactions(
    State(st): State<Arc<AppState>>,
    Query(q): Query<ListQuery>,
) -> Response {
    let scenario = match q.scenario.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => match Scenario::parse(&raw.to_ascii_uppercase()) {
            Some(s) => Some(s),
            None => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    ErrorResponse::with_field(format!("unknown scenario: {raw}"), "scenario"),
                )
            }
        },
    };
    let limit = q
        .limit
        .unwrap_or(st.query.list_limit)
        .clamp(1, MAX_LIST_LIMIT);

    match st.store().list(scenario, limit).await {
        Ok(rows) => {
            let rows: Vec<TransactionRow> = rows.iter().map(TransactionRow::from).collect();
            (StatusCode::OK, Json(rows)).into_response()
        }
        Err(e) => store_failure(e),
    }
}

// ---------------------------------------------------------------------------
// GET /api/reconciliation/transaction/:id
// ---------------------------------------------------------------------------

pub(crate) async fn transaction_detail(
    State(st): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match st.store().find(&id).await {
        Ok(rec) => (StatusCode::OK, Json(TransactionDetail::from(&rec))).into_response(),
        Err(StoreError::NotFound { .. }) => error_response(
            StatusCode::NOT_FOUND,
            ErrorResponse::new("Transaction not found"),
        ),
        Err(e) => store_failure(e),
    }
}

// ---------------------------------------------------------------------------
// GET /api/reconciliation/volume?minutes=
// ---------------------------------------------------------------------------

pub(crate) async fn volume(
    State(st): State<Arc<AppState>>,
    Query(q): Query<VolumeQuery>,
) -> Response {
    let minutes = q
        .minutes
        .unwrap_or(st.query.volume_window_minutes)
        .clamp(1, MAX_VOLUME_MINUTES);
    let window = chrono::Duration::minutes(i64::from(minutes));

    match st.store().volume_by_minute(window, Utc::now()).await {
        Ok(buckets) => (StatusCode::OK, Json(buckets)).into_response(),
        Err(e) => store_failure(e),
    }
}

// ---------------------------------------------------------------------------
// GET /api/reconciliation/recent
// ---------------------------------------------------------------------------

pub(crate) async fn recent(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (StatusCode::OK, Json(st.notifier().recent()))
}

// ---------------------------------------------------------------------------
// GET /v1/stream  (SSE)
// ---------------------------------------------------------------------------

pub(crate) async fn stream(State(st): State<Arc<AppState>>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));

    let rx = st.notifier().subscribe();
    let events = broadcast_to_sse(rx);

    (headers, Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

fn broadcast_to_sse(
    rx: broadcast::Receiver<BusMsg>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(m) => {
                let data = serde_json::to_string(&m).ok()?;
                Some(Ok(Event::default().event(m.event_name()).data(data)))
            }
            Err(_) => None, // lagged
        }
    })
}
