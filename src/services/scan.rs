use crate::models::config::ScanConfig;
use crate::models::error::{ErrorKind, ScanError};
use crate::models::metrics::{
    AnomalyVerdict, ConnectionEntry, CpuMemorySample, MetricKind, MetricReading, ProcessEntry,
    ScanSummary, Snapshot, TrafficSample,
};
use crate::services::detector::AnomalyDetector;
use crate::services::probes::Probe;
use crate::services::store::SnapshotStore;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;

/// Orchestrates the four metric probes into one snapshot. Computing a
/// scan has no side effect; committing it to the store is the caller's
/// separate step.
pub struct ScanAggregator {
    cpu_memory: Arc<dyn Probe<Output = CpuMemorySample>>,
    processes: Arc<dyn Probe<Output = Vec<ProcessEntry>>>,
    network: Arc<dyn Probe<Output = Vec<ConnectionEntry>>>,
    traffic: Arc<dyn Probe<Output = TrafficSample>>,
    detector: AnomalyDetector,
    store: Arc<RwLock<SnapshotStore>>,
    config: ScanConfig,
}

impl ScanAggregator {
    pub fn new(
        cpu_memory: Arc<dyn Probe<Output = CpuMemorySample>>,
        processes: Arc<dyn Probe<Output = Vec<ProcessEntry>>>,
        network: Arc<dyn Probe<Output = Vec<ConnectionEntry>>>,
        traffic: Arc<dyn Probe<Output = TrafficSample>>,
        detector: AnomalyDetector,
        store: Arc<RwLock<SnapshotStore>>,
        config: ScanConfig,
    ) -> Self {
        Self {
            cpu_memory,
            processes,
            network,
            traffic,
            detector,
            store,
            config,
        }
    }

    /// Run all four probes concurrently, each under its own deadline,
    /// and assemble whatever succeeded. Fails only when every probe
    /// failed.
    pub async fn run_full_scan(&self) -> Result<Snapshot, ScanError> {
        let deadline = Duration::from_millis(self.config.probe_timeout_ms);

        let (cpu_memory, processes, network, traffic) = tokio::join!(
            collect_reading(MetricKind::CpuMemory, deadline, self.cpu_memory.probe()),
            collect_reading(MetricKind::Process, deadline, self.processes.probe()),
            collect_reading(MetricKind::Network, deadline, self.network.probe()),
            collect_reading(MetricKind::Traffic, deadline, self.traffic.probe()),
        );

        let succeeded = [cpu_memory.ok, processes.ok, network.ok, traffic.ok];
        if !succeeded.iter().any(|ok| *ok) {
            warn!("Full scan failed: no probe produced a reading");
            return Err(ScanError::TotalScanFailure);
        }
        let partial = !succeeded.iter().all(|ok| *ok);

        let anomaly = match &traffic.payload {
            Some(sample) => {
                let history = {
                    let store = self.store.read().await;
                    store.last_traffic_samples(self.config.history_window)
                };
                self.detector.classify(&history, sample)?
            }
            None => AnomalyVerdict::no_data(traffic.captured_at),
        };

        let summary = summarize(&processes, &network, &anomaly);
        let snapshot = Snapshot {
            id: Uuid::new_v4(),
            taken_at: Utc::now(),
            cpu_memory,
            processes,
            network,
            traffic,
            anomaly,
            summary,
            partial,
        };

        info!(
            id = %snapshot.id,
            partial = snapshot.partial,
            anomalous = snapshot.anomaly.is_anomalous,
            "Full scan assembled"
        );
        Ok(snapshot)
    }
}

/// Resolve one probe future into a reading, converting timeouts and
/// probe errors into failed readings instead of scan aborts.
pub(crate) async fn collect_reading<T, F>(
    kind: MetricKind,
    deadline: Duration,
    probe: F,
) -> MetricReading<T>
where
    F: Future<Output = Result<T, ScanError>>,
{
    match timeout(deadline, probe).await {
        Ok(Ok(payload)) => MetricReading::success(kind, payload),
        Ok(Err(e)) => {
            warn!("Probe {:?} failed: {}", kind, e);
            MetricReading::failed(kind, e.kind())
        }
        Err(_) => {
            warn!("Probe {:?} exceeded {:?} deadline", kind, deadline);
            MetricReading::failed(kind, ErrorKind::Timeout)
        }
    }
}

fn summarize(
    processes: &MetricReading<Vec<ProcessEntry>>,
    network: &MetricReading<Vec<ConnectionEntry>>,
    anomaly: &AnomalyVerdict,
) -> ScanSummary {
    let (total_processes, suspicious_processes) = match &processes.payload {
        Some(list) => (list.len(), list.iter().filter(|p| p.suspicious).count()),
        None => (0, 0),
    };
    let (active_connections, suspicious_connections) = match &network.payload {
        Some(list) => (list.len(), list.iter().filter(|c| c.suspicious).count()),
        None => (0, 0),
    };

    ScanSummary {
        total_processes,
        suspicious_processes,
        active_connections,
        suspicious_connections,
        traffic_anomaly: anomaly.is_anomalous,
    }
}
