use anyhow::Result;
use chrono::Utc;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

mod handlers;
mod models;
mod services;
mod utils;

use handlers::{create_app, AppState};
use models::config::AppConfig;
use models::metrics::{ConnectionEntry, CpuMemorySample, ProcessEntry, TrafficSample};
use services::detector::AnomalyDetector;
use services::probes::{
    CpuMemoryProbe, NetworkConnectionsProbe, Probe, ProcessProbe, TrafficProbe,
};
use services::scan::ScanAggregator;
use services::store::SnapshotStore;
use utils::logging::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = AppConfig::load().unwrap_or_default();

    // Initialize logging
    init_logging(&config.logging)?;

    info!("Starting hostwatch");

    // Snapshot history lives for the whole process; created here, handed
    // to the API layer by handle
    let mut store = SnapshotStore::with_persistence(
        config.retention.max_snapshots,
        &config.retention.data_file,
    );
    if let Err(e) = store.load().await {
        warn!("Snapshot history load error: {}", e);
    }
    let store = Arc::new(RwLock::new(store));

    let detector = AnomalyDetector::new(config.anomaly.clone());

    let cpu_memory: Arc<dyn Probe<Output = CpuMemorySample>> = Arc::new(CpuMemoryProbe::new());
    let processes: Arc<dyn Probe<Output = Vec<ProcessEntry>>> =
        Arc::new(ProcessProbe::new(config.suspicion.clone()));
    let network: Arc<dyn Probe<Output = Vec<ConnectionEntry>>> =
        Arc::new(NetworkConnectionsProbe::new(config.suspicion.clone()));
    let traffic: Arc<dyn Probe<Output = TrafficSample>> = Arc::new(TrafficProbe::new());

    let aggregator = Arc::new(ScanAggregator::new(
        Arc::clone(&cpu_memory),
        Arc::clone(&processes),
        Arc::clone(&network),
        Arc::clone(&traffic),
        detector.clone(),
        Arc::clone(&store),
        config.scan.clone(),
    ));

    let state = AppState {
        aggregator,
        store,
        detector,
        cpu_memory,
        processes,
        network,
        traffic,
        probe_timeout: Duration::from_millis(config.scan.probe_timeout_ms),
        history_window: config.scan.history_window,
        started_at: Utc::now(),
    };

    // Create and run the web server
    let app = create_app(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("API listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
