//! In-memory [`Store`] used as the binary's default persistence (no external
//! database configured) and by every unit/integration test in this crate.
//! Grounded on `data::storage::memory::InMemoryStorage`.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

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

use super::{RetainedKind, Store, StoreResult};

#[derive(Default)]
struct Inner {
    next_id: Id,
    schedules: HashMap<Id, Schedule>,
    test_results: HashMap<Id, TestResult>,
    monitors: HashMap<Id, PacketLossMonitor>,
    packetloss_results: HashMap<Id, PacketLossResult>,
    agents: HashMap<Id, MonitorAgent>,
    peak_stats: HashMap<Id, AgentPeakStats>,
    bandwidth_samples: Vec<(Id, u64, u64, DateTime<Utc>)>,
    historical_snapshots: HashMap<Id, HistoricalSnapshot>,
    system_info: HashMap<Id, MonitorSystemInfo>,
    resource_stats: HashMap<Id, MonitorResourceStats>,
    channels: HashMap<Id, NotificationChannel>,
    events: HashMap<Id, NotificationEvent>,
    rules: HashMap<Id, NotificationRule>,
    history: HashMap<Id, NotificationHistory>,
}

impl Inner {
    fn mint(&mut self) -> Id {
        self.next_id += 1;
        self.next_id
    }
}

/// Thread-safe, process-local implementation of [`Store`].
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Test/seed helper: inserts a schedule, minting its ID.
    pub fn seed_schedule(&self, mut schedule: Schedule) -> Id {
        let mut inner = self.inner.lock();
        let id = inner.mint();
        schedule.id = id;
        inner.schedules.insert(id, schedule);
        id
    }

    pub fn seed_monitor(&self, mut monitor: PacketLossMonitor) -> Id {
        let mut inner = self.inner.lock();
        let id = inner.mint();
        monitor.id = id;
        inner.monitors.insert(id, monitor);
        id
    }

    pub fn seed_agent(&self, mut agent: MonitorAgent) -> Id {
        let mut inner = self.inner.lock();
        let id = inner.mint();
        agent.id = id;
        inner.agents.insert(id, agent);
        id
    }

    pub fn seed_channel(&self, mut channel: NotificationChannel) -> Id {
        let mut inner = self.inner.lock();
        let id = inner.mint();
        channel.id = id;
        inner.channels.insert(id, channel);
        id
    }

    pub fn seed_event(&self, mut event: NotificationEvent) -> Id {
        let mut inner = self.inner.lock();
        let id = inner.mint();
        event.id = id;
        inner.events.insert(id, event);
        id
    }

    pub fn seed_rule(&self, mut rule: NotificationRule) -> Id {
        let mut inner = self.inner.lock();
        let id = inner.mint();
        rule.id = id;
        inner.rules.insert(id, rule);
        id
    }

    pub fn history_rows(&self) -> Vec<NotificationHistory> {
        self.inner.lock().history.values().cloned().collect()
    }

    pub fn bandwidth_sample_count(&self, agent_id: Id) -> usize {
        self.inner
            .lock()
            .bandwidth_samples
            .iter()
            .filter(|(id, ..)| *id == agent_id)
            .count()
    }
}

fn not_found(what: &str, id: Id) -> StoreError {
    StoreError::NotFound(format!("{what} {id} not found"))
}

#[async_trait]
impl Store for InMemoryStore {
    async fn list_schedules(&self) -> StoreResult<Vec<Schedule>> {
        Ok(self.inner.lock().schedules.values().cloned().collect())
    }

    async fn get_schedule(&self, id: Id) -> StoreResult<Schedule> {
        self.inner
            .lock()
            .schedules
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("schedule", id))
    }

    async fn update_schedule_run(
        &self,
        id: Id,
        last_run: DateTime<Utc>,
        next_run: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let schedule = inner
            .schedules
            .get_mut(&id)
            .ok_or_else(|| not_found("schedule", id))?;
        schedule.last_run = Some(last_run);
        schedule.next_run = next_run;
        Ok(())
    }

    async fn reschedule_next_run(&self, id: Id, next_run: DateTime<Utc>) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let schedule = inner
            .schedules
            .get_mut(&id)
            .ok_or_else(|| not_found("schedule", id))?;
        schedule.next_run = next_run;
        Ok(())
    }

    async fn insert_test_result(&self, mut result: TestResult) -> StoreResult<Id> {
        let mut inner = self.inner.lock();
        let id = inner.mint();
        result.id = id;
        inner.test_results.insert(id, result);
        Ok(id)
    }

    async fn list_monitors(&self) -> StoreResult<Vec<PacketLossMonitor>> {
        Ok(self.inner.lock().monitors.values().cloned().collect())
    }

    async fn get_monitor(&self, id: Id) -> StoreResult<PacketLossMonitor> {
        self.inner
            .lock()
            .monitors
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("monitor", id))
    }

    async fn update_monitor_state(
        &self,
        id: Id,
        state: MonitorState,
        changed_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let monitor = inner
            .monitors
            .get_mut(&id)
            .ok_or_else(|| not_found("monitor", id))?;
        monitor.last_state = state;
        monitor.last_state_change = Some(changed_at);
        monitor.updated_at = changed_at;
        Ok(())
    }

    async fn update_monitor_run(
        &self,
        id: Id,
        last_run: DateTime<Utc>,
        next_run: Option<DateTime<Utc>>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let monitor = inner
            .monitors
            .get_mut(&id)
            .ok_or_else(|| not_found("monitor", id))?;
        monitor.last_run = Some(last_run);
        monitor.next_run = next_run;
        Ok(())
    }

    async fn insert_packetloss_result(&self, mut result: PacketLossResult) -> StoreResult<Id> {
        let mut inner = self.inner.lock();
        let id = inner.mint();
        result.id = id;
        inner.packetloss_results.insert(id, result);
        Ok(id)
    }

    async fn list_agents(&self) -> StoreResult<Vec<MonitorAgent>> {
        Ok(self.inner.lock().agents.values().cloned().collect())
    }

    async fn get_agent(&self, id: Id) -> StoreResult<MonitorAgent> {
        self.inner
            .lock()
            .agents
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("agent", id))
    }

    async fn insert_discovered_agent(&self, mut agent: MonitorAgent) -> StoreResult<Id> {
        let mut inner = self.inner.lock();
        let id = inner.mint();
        agent.id = id;
        inner.agents.insert(id, agent);
        Ok(id)
    }

    async fn get_peak_stats(&self, agent_id: Id) -> StoreResult<Option<AgentPeakStats>> {
        Ok(self.inner.lock().peak_stats.get(&agent_id).copied())
    }

    async fn upsert_peak_stats(&self, stats: AgentPeakStats) -> StoreResult<()> {
        self.inner.lock().peak_stats.insert(stats.agent_id, stats);
        Ok(())
    }

    async fn insert_bandwidth_sample(
        &self,
        agent_id: Id,
        rx_bytes_per_s: u64,
        tx_bytes_per_s: u64,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.inner
            .lock()
            .bandwidth_samples
            .push((agent_id, rx_bytes_per_s, tx_bytes_per_s, at));
        Ok(())
    }

    async fn insert_historical_snapshot(
        &self,
        mut snapshot: HistoricalSnapshot,
    ) -> StoreResult<Id> {
        let mut inner = self.inner.lock();
        let id = inner.mint();
        snapshot.id = id;
        inner.historical_snapshots.insert(id, snapshot);
        Ok(id)
    }

    async fn upsert_system_info(&self, agent_id: Id, info: MonitorSystemInfo) -> StoreResult<()> {
        self.inner.lock().system_info.insert(agent_id, info);
        Ok(())
    }

    async fn upsert_resource_stats(
        &self,
        agent_id: Id,
        stats: MonitorResourceStats,
    ) -> StoreResult<()> {
        self.inner.lock().resource_stats.insert(agent_id, stats);
        Ok(())
    }

    async fn list_rules_for(
        &self,
        category: NotificationCategory,
        event_type: &str,
    ) -> StoreResult<Vec<NotificationRule>> {
        let inner = self.inner.lock();
        let matching_event_ids: Vec<Id> = inner
            .events
            .values()
            .filter(|e| e.category == category && e.event_type == event_type)
            .map(|e| e.id)
            .collect();
        Ok(inner
            .rules
            .values()
            .filter(|r| r.enabled && matching_event_ids.contains(&r.event_id))
            .cloned()
            .collect())
    }

    async fn get_channel(&self, id: Id) -> StoreResult<NotificationChannel> {
        self.inner
            .lock()
            .channels
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("channel", id))
    }

    async fn get_event(
        &self,
        category: NotificationCategory,
        event_type: &str,
    ) -> StoreResult<NotificationEvent> {
        self.inner
            .lock()
            .events
            .values()
            .find(|e| e.category == category && e.event_type == event_type)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("event {event_type:?} not found")))
    }

    async fn insert_notification_history(&self, mut row: NotificationHistory) -> StoreResult<Id> {
        let mut inner = self.inner.lock();
        let id = inner.mint();
        row.id = id;
        inner.history.insert(id, row);
        Ok(id)
    }

    async fn prune_older_than(
        &self,
        kind: RetainedKind,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut inner = self.inner.lock();
        let pruned = match kind {
            RetainedKind::TestResults => {
                let before = inner.test_results.len();
                inner.test_results.retain(|_, r| r.created_at >= cutoff);
                before - inner.test_results.len()
            }
            RetainedKind::PacketLossResults => {
                let before = inner.packetloss_results.len();
                inner
                    .packetloss_results
                    .retain(|_, r| r.created_at >= cutoff);
                before - inner.packetloss_results.len()
            }
            RetainedKind::NotificationHistory => {
                let before = inner.history.len();
                inner.history.retain(|_, r| r.created_at >= cutoff);
                before - inner.history.len()
            }
            RetainedKind::HistoricalSnapshots => {
                let before = inner.historical_snapshots.len();
                inner
                    .historical_snapshots
                    .retain(|_, r| r.created_at >= cutoff);
                before - inner.historical_snapshots.len()
            }
        };
        Ok(pruned as u64)
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::notification::ThresholdOperator;

    #[tokio::test]
    async fn list_rules_filters_by_category_and_event_type_only() {
        let store = InMemoryStore::new();
        let event_id = store.seed_event(NotificationEvent {
            id: 0,
            category: NotificationCategory::Packetloss,
            event_type: "threshold_exceeded".to_string(),
            supports_threshold: true,
            threshold_unit: Some("pct".to_string()),
        });
        store.seed_rule(NotificationRule {
            id: 0,
            channel_id: 1,
            event_id,
            enabled: true,
            threshold_value: Some(5.0),
            threshold_operator: Some(ThresholdOperator::Gt),
        });
        store.seed_rule(NotificationRule {
            id: 0,
            channel_id: 2,
            event_id,
            enabled: false,
            threshold_value: None,
            threshold_operator: None,
        });

        let rules = store
            .list_rules_for(NotificationCategory::Packetloss, "threshold_exceeded")
            .await
            .unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].channel_id, 1);
    }

    #[tokio::test]
    async fn prune_removes_only_rows_older_than_cutoff() {
        let store = InMemoryStore::new();
        let old = Utc::now() - chrono::Duration::days(40);
        let recent = Utc::now();

        store
            .insert_notification_history(NotificationHistory {
                id: 0,
                channel_id: 1,
                event_id: 1,
                success: true,
                error: None,
                payload: "old".to_string(),
                created_at: old,
            })
            .await
            .unwrap();
        store
            .insert_notification_history(NotificationHistory {
                id: 0,
                channel_id: 1,
                event_id: 1,
                success: true,
                error: None,
                payload: "recent".to_string(),
                created_at: recent,
            })
            .await
            .unwrap();

        let cutoff = Utc::now() - chrono::Duration::days(30);
        let pruned = store
            .prune_older_than(RetainedKind::NotificationHistory, cutoff)
            .await
            .unwrap();
        assert_eq!(pruned, 1);
        assert_eq!(store.history_rows().len(), 1);
    }
}
