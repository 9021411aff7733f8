//! HTTP status endpoint
//!
//! Read-only views of a running relay:
//!
//! - `GET /health` - liveness
//! - `GET /table` - the table rendering, text
//! - `GET /metrics` - ingest, table and per-destination counters, JSON
//! - `GET /badmetrics` - recently rejected lines, JSON

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use cinder_badmetrics::{BadMetricRecord, BadMetrics};
use cinder_metrics::{
    DestinationStatus, IngestMetrics, IngestSnapshot, RelayStatusProvider, TableStatus,
};
use cinder_routing::Table;

/// Shared state behind the status endpoint.
#[derive(Clone)]
pub struct HttpState {
    pub instance: String,
    pub table: Arc<Table>,
    pub ingest: Arc<IngestMetrics>,
    pub bad_metrics: Arc<BadMetrics>,
}

/// Everything `/metrics` reports.
#[derive(Serialize)]
struct MetricsResponse {
    instance: String,
    ingest: IngestSnapshot,
    table: TableStatus,
    destinations: Vec<DestinationStatus>,
}

/// Build the status router.
pub fn http_router(state: HttpState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/table", get(table))
        .route("/metrics", get(metrics))
        .route("/badmetrics", get(badmetrics))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok\n"
}

async fn table(State(state): State<HttpState>) -> String {
    state.table.print()
}

async fn metrics(State(state): State<HttpState>) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        instance: state.instance.clone(),
        ingest: state.ingest.snapshot(),
        table: state.table.table_status(),
        destinations: state.table.destination_status(),
    })
}

async fn badmetrics(State(state): State<HttpState>) -> Json<Vec<BadMetricRecord>> {
    Json(state.bad_metrics.snapshot())
}
