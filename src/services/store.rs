use crate::models::error::ScanError;
use crate::models::metrics::{Snapshot, SnapshotSummary, TrafficSample};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};
use uuid::Uuid;

/// Append-only snapshot history. Entries are never edited in place;
/// retention drops whole snapshots from the front.
pub struct SnapshotStore {
    snapshots: VecDeque<Snapshot>,
    max_snapshots: usize,
    data_file: Option<PathBuf>,
}

impl SnapshotStore {
    /// In-memory store without persistence.
    pub fn new(max_snapshots: usize) -> Self {
        Self {
            snapshots: VecDeque::new(),
            max_snapshots,
            data_file: None,
        }
    }

    pub fn with_persistence(max_snapshots: usize, data_file: impl AsRef<Path>) -> Self {
        Self {
            snapshots: VecDeque::new(),
            max_snapshots,
            data_file: Some(data_file.as_ref().to_path_buf()),
        }
    }

    /// Reload persisted history. A missing file is a fresh start, not an
    /// error.
    pub async fn load(&mut self) -> Result<()> {
        let Some(path) = &self.data_file else {
            return Ok(());
        };

        match fs::read_to_string(path).await {
            Ok(content) => {
                let snapshots: Vec<Snapshot> =
                    serde_json::from_str(&content).context("corrupt snapshot file")?;
                info!("Loaded {} persisted snapshots", snapshots.len());
                self.snapshots = snapshots.into();
                self.apply_retention();
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context("failed to read snapshot file"),
        }
    }

    /// Append a snapshot, taking ownership. The snapshot's own id is
    /// confirmed unique before it is admitted.
    pub async fn save(&mut self, snapshot: Snapshot) -> Result<Uuid, ScanError> {
        if self.snapshots.iter().any(|s| s.id == snapshot.id) {
            return Err(ScanError::DuplicateId(snapshot.id));
        }

        let id = snapshot.id;
        self.snapshots.push_back(snapshot);
        self.apply_retention();

        // Persistence is best-effort; the in-memory append already
        // happened and the caller holds a valid id
        if let Err(e) = self.flush().await {
            warn!("Snapshot persistence error: {}", e);
        }

        Ok(id)
    }

    pub fn get(&self, id: Uuid) -> Result<Snapshot, ScanError> {
        self.snapshots
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or(ScanError::NotFound(id))
    }

    /// Most-recent-first summaries. `before` pages further back.
    /// Ordered by `taken_at`, not insertion order: save-scan admits
    /// caller-supplied snapshots whose timestamps may arrive out of
    /// order.
    pub fn list(&self, limit: usize, before: Option<DateTime<Utc>>) -> Vec<SnapshotSummary> {
        let mut rows: Vec<SnapshotSummary> = self
            .snapshots
            .iter()
            .filter(|s| before.map_or(true, |b| s.taken_at < b))
            .map(SnapshotSummary::from)
            .collect();
        rows.sort_by(|a, b| b.taken_at.cmp(&a.taken_at));
        rows.truncate(limit);
        rows
    }

    /// Traffic samples from the most recent `n` snapshots whose traffic
    /// probe succeeded, time-ascending for the detector baseline.
    pub fn last_traffic_samples(&self, n: usize) -> Vec<TrafficSample> {
        let mut recent: Vec<&Snapshot> = self.snapshots.iter().filter(|s| s.traffic.ok).collect();
        recent.sort_by(|a, b| b.taken_at.cmp(&a.taken_at));

        let mut samples: Vec<TrafficSample> = recent
            .into_iter()
            .take(n)
            .filter_map(|s| s.traffic.payload.clone())
            .collect();
        samples.sort_by_key(|s| s.timestamp);
        samples
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    fn apply_retention(&mut self) {
        while self.snapshots.len() > self.max_snapshots {
            if let Some(dropped) = self.snapshots.pop_front() {
                info!("Retention dropped snapshot {}", dropped.id);
            }
        }
    }

    async fn flush(&self) -> Result<()> {
        let Some(path) = &self.data_file else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let snapshots: Vec<&Snapshot> = self.snapshots.iter().collect();
        let content = serde_json::to_string_pretty(&snapshots)?;

        // Atomic write: write to temp file then rename
        let temp_file = path.with_extension("json.tmp");
        fs::write(&temp_file, content).await?;
        fs::rename(&temp_file, path).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::error::ErrorKind;
    use crate::models::metrics::{
        AnomalyVerdict, CpuMemorySample, MetricKind, MetricReading, ScanSummary, TrafficSample,
    };
    use chrono::{Duration, TimeZone};

    fn snapshot_at(offset_secs: i64, traffic_ok: bool) -> Snapshot {
        let taken_at =
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap() + Duration::seconds(offset_secs);
        let traffic = if traffic_ok {
            MetricReading::success(
                MetricKind::Traffic,
                TrafficSample {
                    timestamp: taken_at,
                    bytes_in: 1000 + offset_secs as u64,
                    bytes_out: 500,
                    connection_count: 5,
                },
            )
        } else {
            MetricReading::failed(MetricKind::Traffic, ErrorKind::ProbeFailure)
        };

        Snapshot {
            id: Uuid::new_v4(),
            taken_at,
            cpu_memory: MetricReading::success(
                MetricKind::CpuMemory,
                CpuMemorySample {
                    cpu_percent: 10.0,
                    mem_used_bytes: 512,
                    mem_total_bytes: 1024,
                },
            ),
            processes: MetricReading::success(MetricKind::Process, vec![]),
            network: MetricReading::success(MetricKind::Network, vec![]),
            traffic,
            anomaly: AnomalyVerdict::no_data(taken_at),
            summary: ScanSummary {
                total_processes: 0,
                suspicious_processes: 0,
                active_connections: 0,
                suspicious_connections: 0,
                traffic_anomaly: false,
            },
            partial: !traffic_ok,
        }
    }

    #[tokio::test]
    async fn save_then_get_round_trips() {
        let mut store = SnapshotStore::new(10);
        let snapshot = snapshot_at(0, false);
        let expected = snapshot.clone();

        let id = store.save(snapshot).await.unwrap();
        let fetched = store.get(id).unwrap();

        // Failed-probe markers survive the round trip too
        assert_eq!(fetched, expected);
        assert!(!fetched.traffic.ok);
        assert_eq!(fetched.traffic.error, Some(ErrorKind::ProbeFailure));
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected() {
        let mut store = SnapshotStore::new(10);
        let snapshot = snapshot_at(0, true);
        let twin = snapshot.clone();

        store.save(snapshot).await.unwrap();
        let err = store.save(twin).await.unwrap_err();
        assert!(matches!(err, ScanError::DuplicateId(_)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn unknown_id_is_not_found() {
        let store = SnapshotStore::new(10);
        let err = store.get(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, ScanError::NotFound(_)));
    }

    #[tokio::test]
    async fn list_is_recent_first_and_bounded() {
        let mut store = SnapshotStore::new(10);
        for i in 0..5 {
            store.save(snapshot_at(i, true)).await.unwrap();
        }

        let rows = store.list(3, None);
        assert_eq!(rows.len(), 3);
        assert!(rows[0].taken_at > rows[1].taken_at);
        assert!(rows[1].taken_at > rows[2].taken_at);

        // Page backwards from the oldest row of the first page
        let older = store.list(10, Some(rows[2].taken_at));
        assert_eq!(older.len(), 2);
        assert!(older.iter().all(|r| r.taken_at < rows[2].taken_at));
    }

    #[tokio::test]
    async fn traffic_history_skips_failed_readings_and_ascends() {
        let mut store = SnapshotStore::new(10);
        store.save(snapshot_at(0, true)).await.unwrap();
        store.save(snapshot_at(1, false)).await.unwrap();
        store.save(snapshot_at(2, true)).await.unwrap();
        store.save(snapshot_at(3, true)).await.unwrap();

        let samples = store.last_traffic_samples(2);
        assert_eq!(samples.len(), 2);
        assert!(samples[0].timestamp < samples[1].timestamp);
        assert_eq!(samples[1].bytes_in, 1003);

        let all = store.last_traffic_samples(10);
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn out_of_order_saves_keep_ordering_contracts() {
        let mut store = SnapshotStore::new(10);
        store.save(snapshot_at(100, true)).await.unwrap();
        store.save(snapshot_at(0, true)).await.unwrap();
        store.save(snapshot_at(50, true)).await.unwrap();

        let rows = store.list(10, None);
        assert!(rows[0].taken_at > rows[1].taken_at);
        assert!(rows[1].taken_at > rows[2].taken_at);

        // Detector history must still come out time-ascending
        let samples = store.last_traffic_samples(10);
        assert_eq!(samples.len(), 3);
        assert!(samples[0].timestamp < samples[1].timestamp);
        assert!(samples[1].timestamp < samples[2].timestamp);
    }

    #[tokio::test]
    async fn retention_drops_oldest_whole_entries() {
        let mut store = SnapshotStore::new(3);
        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(store.save(snapshot_at(i, true)).await.unwrap());
        }

        assert_eq!(store.len(), 3);
        assert!(matches!(store.get(ids[0]), Err(ScanError::NotFound(_))));
        assert!(store.get(ids[4]).is_ok());
    }

    #[tokio::test]
    async fn persisted_history_survives_reload() {
        let path = std::env::temp_dir().join(format!("hostwatch-store-{}.json", Uuid::new_v4()));

        let mut store = SnapshotStore::with_persistence(10, &path);
        let snapshot = snapshot_at(0, true);
        let expected = snapshot.clone();
        let id = store.save(snapshot).await.unwrap();

        let mut reloaded = SnapshotStore::with_persistence(10, &path);
        reloaded.load().await.unwrap();
        assert_eq!(reloaded.get(id).unwrap(), expected);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn load_tolerates_missing_file() {
        let path = std::env::temp_dir().join(format!("hostwatch-none-{}.json", Uuid::new_v4()));
        let mut store = SnapshotStore::with_persistence(10, &path);
        store.load().await.unwrap();
        assert!(store.is_empty());
    }
}
