//! Process configuration.
//!
//! The TOML/env loader that turns `NETRONOME__<UPPER_SNAKE>` environment keys
//! and a config file into a [`Config`] is an external collaborator; this
//! module owns the resolved shape and a small `from_file` convenience that
//! mirrors `Config::from_file`.
//! Field names match the env keys 1:1 so a thin external loader can populate
//! them mechanically.

use std::fs;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database_url: String,
    pub log_format: LogFormat,
    pub server: ServerConfig,
    pub scheduler: SchedulerConfig,
    pub packetloss: PacketLossConfig,
    pub agent: AgentConfig,
    pub notification: NotificationConfig,
    pub retention: RetentionConfig,
}

/// HTTP surface the core owns: the live-update SSE endpoint and `/healthz`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub tick_secs: u64,
    pub run_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PacketLossConfig {
    pub max_concurrent_probes: usize,
    pub privileged_icmp: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub resource_stats_tick_secs: u64,
    pub historical_tick_secs: u64,
    pub cleanup_tick_secs: u64,
    pub vnstat_enabled: bool,
    pub vnstat_reconnect_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Placeholder for future channel/transport-level tuning; today the
    /// dispatcher needs no configuration beyond the channels/rules in the
    /// `Store` itself.
    pub default_timeout_secs: u64,
}

/// Per-kind retention windows: results, snapshots, and
/// history are append-only and pruned by a periodic retention task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub test_results_days: u32,
    pub packetloss_results_days: u32,
    pub notification_history_days: u32,
    pub historical_snapshots_days: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Text,
    Auto,
}

impl LogFormat {
    /// Resolves `Auto` based on whether stdout is a TTY.
    pub fn resolve(self) -> LogFormat {
        match self {
            LogFormat::Auto => {
                if atty_stdout() {
                    LogFormat::Text
                } else {
                    LogFormat::Json
                }
            }
            other => other,
        }
    }
}

fn atty_stdout() -> bool {
    use std::io::IsTerminal;
    std::io::stdout().is_terminal()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite://netronome.db".to_string(),
            log_format: LogFormat::Auto,
            server: ServerConfig::default(),
            scheduler: SchedulerConfig::default(),
            packetloss: PacketLossConfig::default(),
            agent: AgentConfig::default(),
            notification: NotificationConfig::default(),
            retention: RetentionConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7575,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: crate::constants::scheduler::TICK_SECS,
            run_timeout_secs: crate::constants::scheduler::RUN_TIMEOUT_SECS,
        }
    }
}

impl Default for PacketLossConfig {
    fn default() -> Self {
        Self {
            max_concurrent_probes: crate::constants::packetloss::DEFAULT_MAX_CONCURRENT_PROBES,
            privileged_icmp: false,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            resource_stats_tick_secs: crate::constants::agent::RESOURCE_STATS_TICK_SECS,
            historical_tick_secs: crate::constants::agent::HISTORICAL_TICK_SECS,
            cleanup_tick_secs: crate::constants::agent::CLEANUP_TICK_SECS,
            vnstat_enabled: true,
            vnstat_reconnect_interval_secs: 30,
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 10,
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            test_results_days: 90,
            packetloss_results_days: 30,
            notification_history_days: 30,
            historical_snapshots_days: 365,
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let content =
            fs::read_to_string(path).map_err(|e| Error::Config(format!("failed to read config: {e}")))?;
        let config: Config =
            toml::from_str(&content).map_err(|e| Error::Config(format!("failed to parse config: {e}")))?;
        Ok(config)
    }
}
