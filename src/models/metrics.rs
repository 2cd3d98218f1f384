use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::error::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MetricKind {
    CpuMemory,
    Process,
    Network,
    Traffic,
}

/// Outcome of a single probe call. A failed reading keeps its kind and
/// timestamp so a partial snapshot still tells the client what was
/// attempted and when.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricReading<T> {
    pub kind: MetricKind,
    pub captured_at: DateTime<Utc>,
    pub payload: Option<T>,
    pub ok: bool,
    pub error: Option<ErrorKind>,
}

impl<T> MetricReading<T> {
    pub fn success(kind: MetricKind, payload: T) -> Self {
        Self {
            kind,
            captured_at: Utc::now(),
            payload: Some(payload),
            ok: true,
            error: None,
        }
    }

    pub fn failed(kind: MetricKind, error: ErrorKind) -> Self {
        Self {
            kind,
            captured_at: Utc::now(),
            payload: None,
            ok: false,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuMemorySample {
    pub cpu_percent: f64,
    pub mem_used_bytes: u64,
    pub mem_total_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessEntry {
    pub pid: u32,
    pub name: String,
    pub cpu_percent: f64,
    pub mem_bytes: u64,
    pub suspicious: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    Tcp,
    Udp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionEntry {
    pub local_addr: String,
    pub remote_addr: String,
    pub protocol: Protocol,
    pub state: String,
    pub pid: Option<u32>,
    pub suspicious: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficSample {
    pub timestamp: DateTime<Utc>,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub connection_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyVerdict {
    pub sample_timestamp: DateTime<Utc>,
    pub is_anomalous: bool,
    pub score: f64,
    pub reason: Option<String>,
}

impl AnomalyVerdict {
    /// Verdict used when the traffic probe produced nothing to classify.
    pub fn no_data(sample_timestamp: DateTime<Utc>) -> Self {
        Self {
            sample_timestamp,
            is_anomalous: false,
            score: 0.0,
            reason: Some("no-data".to_string()),
        }
    }
}

/// Counts derived from the readings at assembly time, mirroring what the
/// dashboard shows in its scan header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub total_processes: usize,
    pub suspicious_processes: usize,
    pub active_connections: usize,
    pub suspicious_connections: usize,
    pub traffic_anomaly: bool,
}

/// One full-scan result. Immutable once assembled; ownership moves to the
/// store on save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: Uuid,
    pub taken_at: DateTime<Utc>,
    pub cpu_memory: MetricReading<CpuMemorySample>,
    pub processes: MetricReading<Vec<ProcessEntry>>,
    pub network: MetricReading<Vec<ConnectionEntry>>,
    pub traffic: MetricReading<TrafficSample>,
    pub anomaly: AnomalyVerdict,
    pub summary: ScanSummary,
    pub partial: bool,
}

impl Snapshot {
    /// True when any of the four readings failed; `partial` must always
    /// agree with this.
    pub fn has_failed_reading(&self) -> bool {
        !(self.cpu_memory.ok && self.processes.ok && self.network.ok && self.traffic.ok)
    }
}

/// Listing row for scan history, small enough to page through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotSummary {
    pub id: Uuid,
    pub taken_at: DateTime<Utc>,
    pub partial: bool,
    pub anomalous: bool,
    pub score: f64,
}

impl From<&Snapshot> for SnapshotSummary {
    fn from(snapshot: &Snapshot) -> Self {
        Self {
            id: snapshot.id,
            taken_at: snapshot.taken_at,
            partial: snapshot.partial,
            anomalous: snapshot.anomaly.is_anomalous,
            score: snapshot.anomaly.score,
        }
    }
}
