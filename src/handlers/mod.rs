use crate::models::error::ScanError;
use crate::models::metrics::{
    ConnectionEntry, CpuMemorySample, MetricKind, ProcessEntry, Snapshot, TrafficSample,
};
use crate::services::detector::AnomalyDetector;
use crate::services::probes::Probe;
use crate::services::scan::{collect_reading, ScanAggregator};
use crate::services::store::SnapshotStore;
use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;

const DEFAULT_LIST_LIMIT: usize = 50;

#[derive(Clone)]
pub struct AppState {
    pub aggregator: Arc<ScanAggregator>,
    pub store: Arc<RwLock<SnapshotStore>>,
    pub detector: AnomalyDetector,
    pub cpu_memory: Arc<dyn Probe<Output = CpuMemorySample>>,
    pub processes: Arc<dyn Probe<Output = Vec<ProcessEntry>>>,
    pub network: Arc<dyn Probe<Output = Vec<ConnectionEntry>>>,
    pub traffic: Arc<dyn Probe<Output = TrafficSample>>,
    pub probe_timeout: Duration,
    pub history_window: usize,
    pub started_at: DateTime<Utc>,
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/cpu-memory", get(cpu_memory))
        .route("/api/processes", get(processes))
        .route("/api/network-connections", get(network_connections))
        .route("/api/traffic-stats", get(traffic_stats))
        .route("/api/classify-traffic", post(classify_traffic))
        .route("/api/full-scan", get(full_scan))
        .route("/api/save-scan", post(save_scan))
        .route("/api/scans", get(list_scans))
        .route("/api/scans/:id", get(get_scan))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// Routes

/// Process-wide liveness only; touches no probe.
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = (Utc::now() - state.started_at).num_seconds();
    Json(json!({
        "status": "ok",
        "uptime_secs": uptime,
    }))
}

async fn cpu_memory(State(state): State<AppState>) -> impl IntoResponse {
    let reading = collect_reading(
        MetricKind::CpuMemory,
        state.probe_timeout,
        state.cpu_memory.probe(),
    )
    .await;
    Json(reading)
}

async fn processes(State(state): State<AppState>) -> impl IntoResponse {
    let reading = collect_reading(
        MetricKind::Process,
        state.probe_timeout,
        state.processes.probe(),
    )
    .await;
    Json(reading)
}

async fn network_connections(State(state): State<AppState>) -> impl IntoResponse {
    let reading = collect_reading(
        MetricKind::Network,
        state.probe_timeout,
        state.network.probe(),
    )
    .await;
    Json(reading)
}

/// Thin traffic read plus an on-demand verdict against stored history,
/// so the dashboard's traffic tab carries its own anomaly flag.
async fn traffic_stats(State(state): State<AppState>) -> Result<impl IntoResponse, ScanError> {
    let reading = collect_reading(
        MetricKind::Traffic,
        state.probe_timeout,
        state.traffic.probe(),
    )
    .await;

    let anomaly = match &reading.payload {
        Some(sample) => {
            let history = {
                let store = state.store.read().await;
                store.last_traffic_samples(state.history_window)
            };
            Some(state.detector.classify(&history, sample)?)
        }
        None => None,
    };

    Ok(Json(json!({
        "reading": reading,
        "anomaly": anomaly,
    })))
}

#[derive(Deserialize)]
struct ClassifyRequest {
    history: Vec<TrafficSample>,
    current: TrafficSample,
}

async fn classify_traffic(
    State(state): State<AppState>,
    Json(req): Json<ClassifyRequest>,
) -> Result<impl IntoResponse, ScanError> {
    let verdict = state.detector.classify(&req.history, &req.current)?;
    Ok(Json(verdict))
}

/// Compute a scan without persisting it; the caller inspects the result
/// and commits it through /api/save-scan if wanted.
async fn full_scan(State(state): State<AppState>) -> Result<impl IntoResponse, ScanError> {
    let snapshot = state.aggregator.run_full_scan().await?;
    Ok(Json(snapshot))
}

async fn save_scan(
    State(state): State<AppState>,
    Json(mut snapshot): Json<Snapshot>,
) -> Result<impl IntoResponse, ScanError> {
    // partial is derived state; reconcile it with the readings rather
    // than trusting the caller's flag
    snapshot.partial = snapshot.has_failed_reading();

    let mut store = state.store.write().await;
    let id = store.save(snapshot).await?;
    Ok(Json(json!({
        "status": "saved",
        "id": id,
    })))
}

#[derive(Deserialize)]
struct ListQuery {
    limit: Option<usize>,
    before: Option<DateTime<Utc>>,
}

async fn list_scans(
    State(state): State<AppState>,
    Query(params): Query<ListQuery>,
) -> impl IntoResponse {
    let store = state.store.read().await;
    let rows = store.list(params.limit.unwrap_or(DEFAULT_LIST_LIMIT), params.before);
    let count = rows.len();
    Json(json!({
        "scans": rows,
        "count": count,
    }))
}

async fn get_scan(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ScanError> {
    let store = state.store.read().await;
    let snapshot = store.get(id)?;
    Ok(Json(snapshot))
}
