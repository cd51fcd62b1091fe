//! Typed persistence capability set.
//!
//! This is the union of operations used by the [`crate::scheduler::Scheduler`],
//! [`crate::packetloss::engine::PacketLossEngine`],
//! [`crate::agent::service::AgentService`], and
//! [`crate::notify::dispatcher::Dispatcher`]. The concrete SQLite/Postgres
//! backends are an external collaborator; only the
//! trait and an in-memory reference implementation (used as the binary's
//! default and by every unit test) live here, mirroring
//! `data::storage::Storage` + `InMemoryStorage` split.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::models::agent::{
    AgentPeakStats, HistoricalSnapshot, MonitorAgent, MonitorResourceStats, MonitorSystemInfo,
};
use crate::models::notification::{
    NotificationCategory, NotificationChannel, NotificationEvent, NotificationHistory,
    NotificationRule,
};
use crate::models::packetloss::{MonitorState, PacketLossMonitor, PacketLossResult};
use crate::models::schedule::Schedule;
use crate::models::speedtest::TestResult;
use crate::models::Id;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Entity kinds subject to retention pruning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetainedKind {
    TestResults,
    PacketLossResults,
    NotificationHistory,
    HistoricalSnapshots,
}

#[async_trait]
pub trait Store: Send + Sync {
    // --- Schedules ---
    async fn list_schedules(&self) -> StoreResult<Vec<Schedule>>;
    async fn get_schedule(&self, id: Id) -> StoreResult<Schedule>;
    async fn update_schedule_run(
        &self,
        id: Id,
        last_run: DateTime<Utc>,
        next_run: DateTime<Utc>,
    ) -> StoreResult<()>;
    /// Startup-jitter initialization: moves a past-due `next_run` forward
    /// without executing the schedule.
    async fn reschedule_next_run(&self, id: Id, next_run: DateTime<Utc>) -> StoreResult<()>;
    async fn insert_test_result(&self, result: TestResult) -> StoreResult<Id>;

    // --- Packet-loss monitors ---
    async fn list_monitors(&self) -> StoreResult<Vec<PacketLossMonitor>>;
    async fn get_monitor(&self, id: Id) -> StoreResult<PacketLossMonitor>;
    async fn update_monitor_state(
        &self,
        id: Id,
        state: MonitorState,
        changed_at: DateTime<Utc>,
    ) -> StoreResult<()>;
    async fn update_monitor_run(
        &self,
        id: Id,
        last_run: DateTime<Utc>,
        next_run: Option<DateTime<Utc>>,
    ) -> StoreResult<()>;
    async fn insert_packetloss_result(&self, result: PacketLossResult) -> StoreResult<Id>;

    // --- Agents ---
    async fn list_agents(&self) -> StoreResult<Vec<MonitorAgent>>;
    async fn get_agent(&self, id: Id) -> StoreResult<MonitorAgent>;
    async fn insert_discovered_agent(&self, agent: MonitorAgent) -> StoreResult<Id>;
    async fn get_peak_stats(&self, agent_id: Id) -> StoreResult<Option<AgentPeakStats>>;
    async fn upsert_peak_stats(&self, stats: AgentPeakStats) -> StoreResult<()>;
    async fn insert_bandwidth_sample(
        &self,
        agent_id: Id,
        rx_bytes_per_s: u64,
        tx_bytes_per_s: u64,
        at: DateTime<Utc>,
    ) -> StoreResult<()>;
    async fn insert_historical_snapshot(&self, snapshot: HistoricalSnapshot) -> StoreResult<Id>;
    async fn upsert_system_info(&self, agent_id: Id, info: MonitorSystemInfo) -> StoreResult<()>;
    async fn upsert_resource_stats(
        &self,
        agent_id: Id,
        stats: MonitorResourceStats,
    ) -> StoreResult<()>;

    // --- Notifications ---
    async fn list_rules_for(
        &self,
        category: NotificationCategory,
        event_type: &str,
    ) -> StoreResult<Vec<NotificationRule>>;
    async fn get_channel(&self, id: Id) -> StoreResult<NotificationChannel>;
    async fn get_event(
        &self,
        category: NotificationCategory,
        event_type: &str,
    ) -> StoreResult<NotificationEvent>;
    async fn insert_notification_history(&self, row: NotificationHistory) -> StoreResult<Id>;

    // --- Retention ---
    async fn prune_older_than(
        &self,
        kind: RetainedKind,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<u64>;

    /// Cheap liveness probe used by the `/healthz` route.
    async fn ping(&self) -> StoreResult<()>;
}
