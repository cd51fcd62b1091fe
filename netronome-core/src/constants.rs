//! Tunable defaults for the control plane, grouped by subsystem.

/// Broadcast bus configuration
pub mod bus {
    /// Per-subscriber pending-update backlog before it is dropped.
    pub const SUBSCRIBER_BACKLOG: usize = 256;
}

/// Scheduler configuration
pub mod scheduler {
    /// Tick interval for scanning due schedules.
    pub const TICK_SECS: u64 = 60;
    /// Per-run budget for a single scheduled speed test.
    pub const RUN_TIMEOUT_SECS: u64 = 300;
    /// Startup anti-thundering-herd jitter window, lower bound (inclusive).
    pub const STARTUP_JITTER_MIN_SECS: u64 = 1;
    /// Startup anti-thundering-herd jitter window, upper bound (inclusive).
    pub const STARTUP_JITTER_MAX_SECS: u64 = 300;
}

/// Packet-loss monitor engine configuration
pub mod packetloss {
    /// Default cap on in-flight probes across all monitors.
    pub const DEFAULT_MAX_CONCURRENT_PROBES: usize = 8;
    /// Minimum spacing between ICMP echoes within a single probe.
    pub const INTER_PACKET_INTERVAL_MS: u64 = 200;
    /// Minimum rate for `packetloss_progress` broadcasts during a probe.
    pub const PROGRESS_BROADCAST_HZ: u64 = 1;
    /// Per-packet wait before declaring it lost.
    pub const PACKET_TIMEOUT_MS: u64 = 1_000;
}

/// Agent client + service configuration
pub mod agent {
    /// Initial reconnect backoff.
    pub const BACKOFF_INITIAL_SECS: u64 = 1;
    /// Reconnect backoff ceiling.
    pub const BACKOFF_MAX_SECS: u64 = 60;
    /// Resource-stat pull cadence. The original service used 5m in one code
    /// path and 30s in another; this implementation adopts 30s.
    pub const RESOURCE_STATS_TICK_SECS: u64 = 30;
    /// Historical snapshot pull cadence.
    pub const HISTORICAL_TICK_SECS: u64 = 3_600;
    /// Retention-cleanup cadence.
    pub const CLEANUP_TICK_SECS: u64 = 3_600;
    /// Per-agent bandwidth-sample persistence rate cap.
    pub const SAMPLE_PERSIST_HZ: u64 = 1;
    /// Timeout for `/system/info` and `/system/hardware` pulls.
    pub const SYSTEM_PULL_TIMEOUT_SECS: u64 = 30;
    /// Timeout for `/export/historical` pulls.
    pub const HISTORICAL_PULL_TIMEOUT_SECS: u64 = 60;
    /// Deadline for the final cleanup pass on shutdown.
    pub const SHUTDOWN_CLEANUP_DEADLINE_SECS: u64 = 30;
}

/// Store retry policy (see `error::retry_transient`)
pub mod store {
    pub const TRANSIENT_RETRY_ATTEMPTS: u32 = 3;
    pub const TRANSIENT_RETRY_BACKOFF_MS: u64 = 100;
}
