use crate::models::config::SuspicionConfig;
use crate::models::error::ScanError;
use crate::models::metrics::{
    ConnectionEntry, CpuMemorySample, ProcessEntry, Protocol, TrafficSample,
};
use async_trait::async_trait;
use chrono::Utc;
use sysinfo::{Networks, System};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

const PROC_NET_TCP: &str = "/proc/net/tcp";
const PROC_NET_UDP: &str = "/proc/net/udp";

/// A single metric source. Implementations validate raw OS readings into
/// the typed entities here; anything malformed comes back as a
/// `ProbeFailure` instead of leaking untyped data upward.
#[async_trait]
pub trait Probe: Send + Sync {
    type Output;

    async fn probe(&self) -> Result<Self::Output, ScanError>;
}

pub struct CpuMemoryProbe {
    system: Mutex<System>,
}

impl CpuMemoryProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new_all()),
        }
    }
}

#[async_trait]
impl Probe for CpuMemoryProbe {
    type Output = CpuMemorySample;

    async fn probe(&self) -> Result<CpuMemorySample, ScanError> {
        let mut system = self.system.lock().await;
        system.refresh_cpu();
        system.refresh_memory();

        let cpu_percent = system.global_cpu_info().cpu_usage() as f64;
        let mem_used_bytes = system.used_memory();
        let mem_total_bytes = system.total_memory();

        if mem_total_bytes == 0 {
            return Err(ScanError::ProbeFailure(
                "no memory reading available".to_string(),
            ));
        }
        if mem_used_bytes > mem_total_bytes {
            return Err(ScanError::ProbeFailure(format!(
                "used memory {} exceeds total {}",
                mem_used_bytes, mem_total_bytes
            )));
        }

        Ok(CpuMemorySample {
            cpu_percent,
            mem_used_bytes,
            mem_total_bytes,
        })
    }
}

pub struct ProcessProbe {
    system: Mutex<System>,
    suspicion: SuspicionConfig,
}

impl ProcessProbe {
    pub fn new(suspicion: SuspicionConfig) -> Self {
        Self {
            system: Mutex::new(System::new_all()),
            suspicion,
        }
    }
}

#[async_trait]
impl Probe for ProcessProbe {
    type Output = Vec<ProcessEntry>;

    async fn probe(&self) -> Result<Vec<ProcessEntry>, ScanError> {
        let mut system = self.system.lock().await;
        system.refresh_processes();
        system.refresh_memory();

        let mem_total = system.total_memory();
        let mut entries: Vec<ProcessEntry> = system
            .processes()
            .iter()
            .map(|(pid, process)| {
                let cpu_percent = process.cpu_usage() as f64;
                let mem_bytes = process.memory();
                let name = process.name().to_string();
                let suspicious = is_suspicious_process(
                    &name,
                    cpu_percent,
                    mem_bytes,
                    mem_total,
                    &self.suspicion,
                );
                ProcessEntry {
                    pid: pid.as_u32(),
                    name,
                    cpu_percent,
                    mem_bytes,
                    suspicious,
                }
            })
            .collect();

        // HashMap iteration order is not stable; key the set by pid
        entries.sort_by_key(|e| e.pid);
        Ok(entries)
    }
}

pub struct NetworkConnectionsProbe {
    suspicion: SuspicionConfig,
}

impl NetworkConnectionsProbe {
    pub fn new(suspicion: SuspicionConfig) -> Self {
        Self { suspicion }
    }
}

#[async_trait]
impl Probe for NetworkConnectionsProbe {
    type Output = Vec<ConnectionEntry>;

    async fn probe(&self) -> Result<Vec<ConnectionEntry>, ScanError> {
        let mut connections = Vec::new();
        let mut readable = false;

        if let Ok(content) = fs::read_to_string(PROC_NET_TCP).await {
            readable = true;
            connections.extend(parse_proc_net(&content, Protocol::Tcp, &self.suspicion));
        }
        if let Ok(content) = fs::read_to_string(PROC_NET_UDP).await {
            readable = true;
            connections.extend(parse_proc_net(&content, Protocol::Udp, &self.suspicion));
        }

        if !readable {
            return Err(ScanError::ProbeFailure(
                "connection tables unreadable".to_string(),
            ));
        }

        Ok(connections)
    }
}

pub struct TrafficProbe {
    state: Mutex<TrafficState>,
}

struct TrafficState {
    networks: Networks,
    last_totals: Option<(u64, u64)>,
}

impl TrafficProbe {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TrafficState {
                networks: Networks::new_with_refreshed_list(),
                last_totals: None,
            }),
        }
    }
}

#[async_trait]
impl Probe for TrafficProbe {
    type Output = TrafficSample;

    async fn probe(&self) -> Result<TrafficSample, ScanError> {
        let connection_count = established_connection_count().await;

        let mut state = self.state.lock().await;
        state.networks.refresh();

        let mut total_in = 0u64;
        let mut total_out = 0u64;
        for (_name, data) in &state.networks {
            total_in += data.total_received();
            total_out += data.total_transmitted();
        }

        // First call has no previous totals to diff against
        let (bytes_in, bytes_out) = match state.last_totals {
            Some((last_in, last_out)) => (
                total_in.saturating_sub(last_in),
                total_out.saturating_sub(last_out),
            ),
            None => (0, 0),
        };
        state.last_totals = Some((total_in, total_out));

        Ok(TrafficSample {
            timestamp: Utc::now(),
            bytes_in,
            bytes_out,
            connection_count,
        })
    }
}

async fn established_connection_count() -> u64 {
    match fs::read_to_string(PROC_NET_TCP).await {
        Ok(content) => content
            .lines()
            .skip(1)
            .filter(|line| {
                line.split_whitespace()
                    .nth(3)
                    .map(|st| st == "01")
                    .unwrap_or(false)
            })
            .count() as u64,
        Err(e) => {
            debug!("Connection count unavailable: {}", e);
            0
        }
    }
}

fn is_suspicious_process(
    name: &str,
    cpu_percent: f64,
    mem_bytes: u64,
    mem_total: u64,
    config: &SuspicionConfig,
) -> bool {
    if cpu_percent > config.process_cpu_threshold {
        return true;
    }
    if mem_total > 0 && mem_bytes as f64 / mem_total as f64 > config.process_mem_fraction {
        return true;
    }
    let lowered = name.to_lowercase();
    config
        .process_name_keywords
        .iter()
        .any(|keyword| lowered.contains(keyword.as_str()))
}

fn is_suspicious_connection(local_port: u16, remote_port: u16, config: &SuspicionConfig) -> bool {
    config.suspicious_ports.contains(&local_port)
        || config.suspicious_ports.contains(&remote_port)
        || local_port > config.high_port_cutoff
        || remote_port > config.high_port_cutoff
}

/// Parse a `/proc/net/tcp`-format table. Malformed rows are skipped; the
/// kernel occasionally truncates the file mid-write.
fn parse_proc_net(content: &str, protocol: Protocol, config: &SuspicionConfig) -> Vec<ConnectionEntry> {
    let mut entries = Vec::new();

    for line in content.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            continue;
        }

        let local = match parse_hex_addr(fields[1]) {
            Some(addr) => addr,
            None => continue,
        };
        let remote = match parse_hex_addr(fields[2]) {
            Some(addr) => addr,
            None => continue,
        };
        let state = match u8::from_str_radix(fields[3], 16) {
            Ok(code) => tcp_state_name(code).to_string(),
            Err(_) => continue,
        };

        let suspicious = is_suspicious_connection(local.1, remote.1, config);

        entries.push(ConnectionEntry {
            local_addr: format!("{}:{}", local.0, local.1),
            remote_addr: format!("{}:{}", remote.0, remote.1),
            protocol,
            state,
            // procfs rows carry inode and uid, not pid
            pid: None,
            suspicious,
        });
    }

    entries
}

/// Decode the kernel's little-endian hex `IP:PORT` form, e.g.
/// `0100007F:1F90` -> `127.0.0.1`, `8080`.
fn parse_hex_addr(field: &str) -> Option<(String, u16)> {
    let (ip_hex, port_hex) = field.split_once(':')?;
    if ip_hex.len() != 8 {
        return None;
    }
    let raw = u32::from_str_radix(ip_hex, 16).ok()?;
    let ip = std::net::Ipv4Addr::from(raw.swap_bytes());
    let port = u16::from_str_radix(port_hex, 16).ok()?;
    Some((ip.to_string(), port))
}

fn tcp_state_name(code: u8) -> &'static str {
    match code {
        0x01 => "ESTABLISHED",
        0x02 => "SYN_SENT",
        0x03 => "SYN_RECV",
        0x04 => "FIN_WAIT1",
        0x05 => "FIN_WAIT2",
        0x06 => "TIME_WAIT",
        0x07 => "CLOSE",
        0x08 => "CLOSE_WAIT",
        0x09 => "LAST_ACK",
        0x0A => "LISTEN",
        0x0B => "CLOSING",
        _ => "UNKNOWN",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TCP_TABLE: &str = "  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode\n\
   0: 0100007F:1F90 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 12345 1 0000000000000000 100 0 0 10 0\n\
   1: 0100007F:0539 0200A8C0:115C 01 00000000:00000000 00:00000000 00000000  1000        0 12346 1 0000000000000000 100 0 0 10 0\n\
   2: garbage\n";

    #[test]
    fn parses_tcp_table_and_skips_malformed_rows() {
        let config = SuspicionConfig::default();
        let entries = parse_proc_net(TCP_TABLE, Protocol::Tcp, &config);

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].local_addr, "127.0.0.1:8080");
        assert_eq!(entries[0].state, "LISTEN");
        assert_eq!(entries[1].remote_addr, "192.168.0.2:4444");
        assert_eq!(entries[1].state, "ESTABLISHED");
        assert_eq!(entries[1].protocol, Protocol::Tcp);
        assert!(entries[1].pid.is_none());
    }

    #[test]
    fn flags_suspicious_ports() {
        let config = SuspicionConfig::default();
        let entries = parse_proc_net(TCP_TABLE, Protocol::Tcp, &config);

        // 8080 is on the default watch list, 4444 too
        assert!(entries[0].suspicious);
        assert!(entries[1].suspicious);
        assert!(is_suspicious_connection(22, 61000, &config));
        assert!(!is_suspicious_connection(22, 443, &config));
    }

    #[test]
    fn hex_addr_decoding() {
        assert_eq!(
            parse_hex_addr("0100007F:1F90"),
            Some(("127.0.0.1".to_string(), 8080))
        );
        assert_eq!(parse_hex_addr("00000000:0000").unwrap().1, 0);
        assert_eq!(parse_hex_addr("nonsense"), None);
        assert_eq!(parse_hex_addr("0100007F"), None);
    }

    #[test]
    fn process_suspicion_thresholds() {
        let config = SuspicionConfig::default();

        assert!(is_suspicious_process("stress", 95.0, 1024, 8192, &config));
        assert!(is_suspicious_process("bloated", 1.0, 5000, 8192, &config));
        assert!(is_suspicious_process("XMRig-Miner", 0.5, 10, 8192, &config));
        assert!(!is_suspicious_process("sshd", 0.5, 10, 8192, &config));
    }
}
