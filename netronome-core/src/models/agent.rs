use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Id;

/// Distinguishes the overlapping "monitor" and "vnstat" agent client types
/// from the original service: both are modeled as one
/// [`crate::agent::client::AgentClient`], distinguished only by this field.
/// `LegacyVnstat` agents skip the `/system/hardware` pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentProtocolVariant {
    #[default]
    Unified,
    LegacyVnstat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorAgent {
    pub id: Id,
    pub name: String,
    pub url: String,
    pub api_key: Option<String>,
    pub enabled: bool,
    pub is_tailscale: bool,
    pub tailscale_hostname: Option<String>,
    pub protocol_variant: AgentProtocolVariant,
    pub discovered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MonitorAgent {
    /// Derived base URL with the SSE suffix stripped, used for the pull-side
    /// `/stats/peaks`, `/system/info`, `/system/hardware`, `/export/historical`
    /// endpoints.
    pub fn base_url(&self) -> String {
        self.url
            .trim_end_matches("/events")
            .trim_end_matches('/')
            .to_string()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BandwidthSample {
    pub rx_bytes_per_s: u64,
    pub tx_bytes_per_s: u64,
}

/// Last parsed SSE sample for one agent, overwritten on each event.
#[derive(Debug, Clone, Default)]
pub struct AgentLiveData {
    pub sample: Option<BandwidthSample>,
    pub rx_rate_str: Option<String>,
    pub tx_rate_str: Option<String>,
    pub connected: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AgentPeakStats {
    pub agent_id: Id,
    pub peak_rx_bytes: u64,
    pub peak_tx_bytes: u64,
    pub peak_rx_ts: DateTime<Utc>,
    pub peak_tx_ts: DateTime<Utc>,
}

impl AgentPeakStats {
    pub fn zero(agent_id: Id, at: DateTime<Utc>) -> Self {
        Self {
            agent_id,
            peak_rx_bytes: 0,
            peak_tx_bytes: 0,
            peak_rx_ts: at,
            peak_tx_ts: at,
        }
    }

    /// Applies one sample, returning `(rx_increased, tx_increased)`. Peaks are
    /// monotonic non-decreasing within a process lifetime.
    pub fn apply_sample(&mut self, sample: BandwidthSample, at: DateTime<Utc>) -> (bool, bool) {
        let rx_increased = sample.rx_bytes_per_s > self.peak_rx_bytes;
        if rx_increased {
            self.peak_rx_bytes = sample.rx_bytes_per_s;
            self.peak_rx_ts = at;
        }
        let tx_increased = sample.tx_bytes_per_s > self.peak_tx_bytes;
        if tx_increased {
            self.peak_tx_bytes = sample.tx_bytes_per_s;
            self.peak_tx_ts = at;
        }
        (rx_increased, tx_increased)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotPeriod {
    Hourly,
    Daily,
    Monthly,
    Total,
    Vnstat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalSnapshot {
    pub id: Id,
    pub agent_id: Id,
    pub interface: String,
    pub period: SnapshotPeriod,
    pub data_json: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// `GET <base>/system/info` response shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSystemInfo {
    pub hostname: String,
    pub kernel: String,
    pub uptime: String,
    pub vnstat_version: Option<String>,
    pub interfaces: std::collections::HashMap<String, InterfaceInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct InterfaceInfo {
    pub alias: Option<String>,
    pub ip_address: Option<String>,
    pub link_speed: Option<String>,
}

/// `GET <base>/system/hardware` response shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorResourceStats {
    pub cpu: CpuStats,
    pub memory: MemoryStats,
    pub disks: Vec<DiskStats>,
    pub temperature: Vec<TemperatureReading>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CpuStats {
    pub usage_percent: f64,
    pub model: String,
    pub cores: u32,
    pub threads: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryStats {
    pub used_percent: f64,
    pub swap_percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskStats {
    pub path: String,
    pub device: String,
    pub fstype: String,
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub used_percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemperatureReading {
    pub sensor_key: String,
    pub temperature: f64,
    pub label: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_strips_sse_suffix() {
        let agent = MonitorAgent {
            id: 1,
            name: "home".to_string(),
            url: "http://10.0.0.1:8080/events".to_string(),
            api_key: None,
            enabled: true,
            is_tailscale: false,
            tailscale_hostname: None,
            protocol_variant: AgentProtocolVariant::Unified,
            discovered_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(agent.base_url(), "http://10.0.0.1:8080");
    }

    #[test]
    fn peak_tracks_only_strict_increases() {
        let now = Utc::now();
        let mut peaks = AgentPeakStats::zero(1, now);

        let (rx, tx) = peaks.apply_sample(
            BandwidthSample {
                rx_bytes_per_s: 100,
                tx_bytes_per_s: 10,
            },
            now,
        );
        assert!(rx && tx);
        assert_eq!(peaks.peak_rx_bytes, 100);

        let (rx, tx) = peaks.apply_sample(
            BandwidthSample {
                rx_bytes_per_s: 200,
                tx_bytes_per_s: 10,
            },
            now,
        );
        assert!(rx && !tx);
        assert_eq!(peaks.peak_rx_bytes, 200);

        let (rx, tx) = peaks.apply_sample(
            BandwidthSample {
                rx_bytes_per_s: 150,
                tx_bytes_per_s: 10,
            },
            now,
        );
        assert!(!rx && !tx);
        assert_eq!(peaks.peak_rx_bytes, 200);

        let (rx, _tx) = peaks.apply_sample(
            BandwidthSample {
                rx_bytes_per_s: 250,
                tx_bytes_per_s: 10,
            },
            now,
        );
        assert!(rx);
        assert_eq!(peaks.peak_rx_bytes, 250);
    }
}
