use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub scan: ScanConfig,
    pub anomaly: AnomalyConfig,
    pub suspicion: SuspicionConfig,
    pub retention: RetentionConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn load() -> Option<Self> {
        // Try to load from config.toml or config.json
        if let Ok(content) = std::fs::read_to_string("config.toml") {
            if let Ok(config) = toml::from_str(&content) {
                return Some(config);
            }
        }

        if let Ok(content) = std::fs::read_to_string("config.json") {
            if let Ok(config) = serde_json::from_str(&content) {
                return Some(config);
            }
        }

        None
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Per-probe deadline; a probe past this is recorded as a timeout,
    /// never aborts the scan.
    pub probe_timeout_ms: u64,
    /// How many stored traffic samples feed the detector baseline.
    pub history_window: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: 2000,
            history_window: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    /// Trailing window for the rolling mean/std baseline.
    pub window_size: usize,
    /// How many standard deviations from the mean count as anomalous.
    pub sigma_threshold: f64,
    /// Absolute connection-count ceiling, independent of the baseline.
    pub connection_ceiling: u64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            window_size: 20,
            sigma_threshold: 3.0,
            connection_ceiling: 500,
        }
    }
}

/// Thresholds for flagging individual processes and connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SuspicionConfig {
    pub process_cpu_threshold: f64,
    /// Fraction of total memory above which a process is flagged.
    pub process_mem_fraction: f64,
    pub process_name_keywords: Vec<String>,
    pub suspicious_ports: Vec<u16>,
    pub high_port_cutoff: u16,
}

impl Default for SuspicionConfig {
    fn default() -> Self {
        Self {
            process_cpu_threshold: 80.0,
            process_mem_fraction: 0.5,
            process_name_keywords: vec![
                "miner".to_string(),
                "crypto".to_string(),
                "hack".to_string(),
            ],
            suspicious_ports: vec![1337, 4444, 5555, 6666, 7777, 8080, 9999],
            high_port_cutoff: 60000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Oldest snapshots are dropped past this count; entries are only
    /// ever deleted whole, never edited.
    pub max_snapshots: usize,
    pub data_file: String,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_snapshots: 100,
            data_file: "data/scans.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info,tower_http=warn,hyper=warn".to_string(),
        }
    }
}
