//! Lifecycle of all [`AgentClient`]s, plus the pull-side collectors for
//! hardware/historical snapshots. Grounded on
//! `services::download_session` (an `RwLock`-guarded `id -> handle` map with
//! idempotent start/stop) for client bookkeeping, and
//! `trusted_file_transfer::follower_downloader::spawn_follower_download_task`
//! for the periodic-pull-over-HTTP shape.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::Client as HttpClient;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::Bus;
use crate::config::{AgentConfig, RetentionConfig};
use crate::constants::agent::{HISTORICAL_PULL_TIMEOUT_SECS, SHUTDOWN_CLEANUP_DEADLINE_SECS, SYSTEM_PULL_TIMEOUT_SECS};
use crate::error::{Error, Result};
use crate::models::agent::{
    AgentProtocolVariant, HistoricalSnapshot, MonitorAgent, MonitorResourceStats, MonitorSystemInfo,
    SnapshotPeriod,
};
use crate::models::update::{AgentDiscovered, Update};
use crate::models::Id;
use crate::notify::dispatcher::Dispatcher;
use crate::store::{RetainedKind, Store};

use super::client::{AgentClient, AgentClientStatus};

struct ClientHandle {
    client: Arc<AgentClient>,
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

pub struct AgentService {
    store: Arc<dyn Store>,
    bus: Bus,
    dispatcher: Arc<Dispatcher>,
    http: HttpClient,
    config: AgentConfig,
    retention: RetentionConfig,
    clients: RwLock<HashMap<Id, ClientHandle>>,
    last_connected: RwLock<HashMap<Id, bool>>,
}

impl AgentService {
    pub fn new(
        store: Arc<dyn Store>,
        bus: Bus,
        dispatcher: Arc<Dispatcher>,
        config: AgentConfig,
        retention: RetentionConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            bus,
            dispatcher,
            http: HttpClient::new(),
            config,
            retention,
            clients: RwLock::new(HashMap::new()),
            last_connected: RwLock::new(HashMap::new()),
        })
    }

    pub async fn is_healthy(&self) -> bool {
        true
    }

    /// Loads every enabled agent and starts a client for each.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let agents = self.store.list_agents().await.map_err(Error::from)?;
        for agent in agents.into_iter().filter(|a| a.enabled) {
            self.start_agent(agent.id).await?;
        }
        Ok(())
    }

    /// No-op if a client for `id` is already running.
    pub async fn start_agent(self: &Arc<Self>, id: Id) -> Result<()> {
        {
            let clients = self.clients.read().await;
            if clients.contains_key(&id) {
                return Ok(());
            }
        }

        let agent = self.store.get_agent(id).await?;
        let client = AgentClient::new(&agent, self.store.clone(), self.bus.clone(), self.http.clone());
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let run_client = client.clone();
        let join = tokio::spawn(async move {
            run_client.run(task_cancel).await;
        });

        self.clients
            .write()
            .await
            .insert(id, ClientHandle { client, cancel, join });
        Ok(())
    }

    /// Registers an agent found by an external discovery collaborator (e.g.
    /// an mDNS or Tailscale peer scan), publishes `Update::AgentDiscovered`,
    /// and starts a client for it immediately if it comes in enabled.
    pub async fn discover_agent(self: &Arc<Self>, mut agent: MonitorAgent) -> Result<Id> {
        agent.discovered_at = Some(Utc::now());
        let enabled = agent.enabled;
        let id = self.store.insert_discovered_agent(agent.clone()).await.map_err(Error::from)?;

        self.bus.publish(Update::AgentDiscovered(AgentDiscovered {
            agent_id: id,
            name: agent.name,
        }));

        if enabled {
            self.start_agent(id).await?;
        }
        Ok(id)
    }

    /// Cancels the client for `id` and awaits its drain. No-op if not running.
    pub async fn stop_agent(&self, id: Id) {
        let handle = self.clients.write().await.remove(&id);
        if let Some(handle) = handle {
            handle.cancel.cancel();
            let _ = handle.join.await;
        }
    }

    /// `status(id) -> (connected, last_sample?)`.
    pub async fn status(&self, id: Id) -> Option<AgentClientStatus> {
        self.clients.read().await.get(&id).map(|h| h.client.status())
    }

    /// Runs the resource-stats, historical-snapshot, and cleanup tickers
    /// until `cancel` fires.
    pub async fn run_background_tickers(self: Arc<Self>, cancel: CancellationToken) {
        let mut resource_ticker = tokio::time::interval(Duration::from_secs(self.config.resource_stats_tick_secs));
        let mut historical_ticker = tokio::time::interval(Duration::from_secs(self.config.historical_tick_secs));
        let mut cleanup_ticker = tokio::time::interval(Duration::from_secs(self.config.cleanup_tick_secs));
        resource_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        historical_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        cleanup_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = resource_ticker.tick() => self.collect_resource_stats().await,
                _ = historical_ticker.tick() => self.collect_historical_snapshots().await,
                _ = cleanup_ticker.tick() => self.run_retention_pass().await,
            }
        }
    }

    /// For every enabled+connected agent, pulls `/system/info` and (unless
    /// `LegacyVnstat`) `/system/hardware`, each bounded by
    /// [`SYSTEM_PULL_TIMEOUT_SECS`].
    async fn collect_resource_stats(&self) {
        self.detect_connection_transitions().await;

        for (id, agent, connected) in self.connected_agents().await {
            let base = agent.base_url();
            match self.pull_json::<MonitorSystemInfo>(&base, "/system/info", &agent, SYSTEM_PULL_TIMEOUT_SECS).await {
                Ok(info) => {
                    if let Err(e) = self.store.upsert_system_info(id, info).await {
                        warn!(target: "agent_service::collect_resource_stats", agent_id = id, error = %e, "failed to persist system info");
                    }
                }
                Err(e) => debug!(target: "agent_service::collect_resource_stats", agent_id = id, error = %e, "system/info pull failed"),
            }

            if !connected || agent.protocol_variant == AgentProtocolVariant::LegacyVnstat {
                continue;
            }
            match self.pull_json::<MonitorResourceStats>(&base, "/system/hardware", &agent, SYSTEM_PULL_TIMEOUT_SECS).await {
                Ok(stats) => {
                    if let Err(e) = self.store.upsert_resource_stats(id, stats).await {
                        warn!(target: "agent_service::collect_resource_stats", agent_id = id, error = %e, "failed to persist resource stats");
                    }
                }
                Err(e) => debug!(target: "agent_service::collect_resource_stats", agent_id = id, error = %e, "system/hardware pull failed"),
            }
        }
    }

    async fn collect_historical_snapshots(&self) {
        for (id, agent, _connected) in self.connected_agents().await {
            let base = agent.base_url();
            let export = match self
                .pull_json::<HistoricalExport>(&base, "/export/historical", &agent, HISTORICAL_PULL_TIMEOUT_SECS)
                .await
            {
                Ok(export) => export,
                Err(e) => {
                    debug!(target: "agent_service::collect_historical_snapshots", agent_id = id, error = %e, "export/historical pull failed");
                    continue;
                }
            };

            let now = Utc::now();
            for iface in export.interfaces {
                for (period, value) in [
                    (SnapshotPeriod::Hourly, iface.traffic.hour),
                    (SnapshotPeriod::Daily, iface.traffic.day),
                    (SnapshotPeriod::Monthly, iface.traffic.month),
                    (SnapshotPeriod::Total, iface.traffic.total),
                ] {
                    let Some(value) = value else { continue };
                    let snapshot = HistoricalSnapshot {
                        id: 0,
                        agent_id: id,
                        interface: iface.name.clone(),
                        period,
                        data_json: value,
                        created_at: now,
                    };
                    if let Err(e) = self.store.insert_historical_snapshot(snapshot).await {
                        warn!(target: "agent_service::collect_historical_snapshots", agent_id = id, error = %e, "failed to persist historical snapshot");
                    }
                }
            }
        }
    }

    /// Emits an edge-triggered `agent` notification whenever a client's
    /// connection state flips, since the last resource-stats tick. Mirrors
    /// the packet-loss engine's edge-triggering but over the coarser 30s
    /// poll cadence rather than per-sample.
    async fn detect_connection_transitions(&self) {
        let current: HashMap<Id, bool> = {
            let clients = self.clients.read().await;
            clients.iter().map(|(id, h)| (*id, h.client.status().connected)).collect()
        };

        let mut last = self.last_connected.write().await;
        for (&id, &connected) in &current {
            let previous = last.insert(id, connected);
            match previous {
                Some(prev) if prev && !connected => {
                    let _ = self
                        .dispatcher
                        .emit(
                            crate::models::notification::NotificationCategory::Agent,
                            "agent_disconnected",
                            format!("agent {id} disconnected"),
                            None,
                        )
                        .await;
                }
                Some(prev) if !prev && connected => {
                    let _ = self
                        .dispatcher
                        .emit(
                            crate::models::notification::NotificationCategory::Agent,
                            "agent_reconnected",
                            format!("agent {id} reconnected"),
                            None,
                        )
                        .await;
                }
                _ => {}
            }
        }
        last.retain(|id, _| current.contains_key(id));
    }

    /// Purges rows past their configured retention window
    /// (results, packet-loss results, notification history, historical
    /// snapshots). Also invoked once more on shutdown with a tighter
    /// deadline.
    async fn run_retention_pass(&self) {
        let _ = self.prune_all().await;
    }

    async fn prune_all(&self) -> Result<()> {
        let now = Utc::now();
        let windows = [
            (RetainedKind::TestResults, self.retention.test_results_days),
            (RetainedKind::PacketLossResults, self.retention.packetloss_results_days),
            (RetainedKind::NotificationHistory, self.retention.notification_history_days),
            (RetainedKind::HistoricalSnapshots, self.retention.historical_snapshots_days),
        ];
        for (kind, days) in windows {
            let cutoff = now - chrono::Duration::days(days as i64);
            match self.store.prune_older_than(kind, cutoff).await {
                Ok(pruned) if pruned > 0 => {
                    debug!(target: "agent_service::prune_all", kind = ?kind, pruned, "retention pass pruned rows")
                }
                Ok(_) => {}
                Err(e) => warn!(target: "agent_service::prune_all", kind = ?kind, error = %e, "retention pass failed"),
            }
        }
        Ok(())
    }

    async fn connected_agents(&self) -> Vec<(Id, MonitorAgent, bool)> {
        let agents = match self.store.list_agents().await {
            Ok(a) => a,
            Err(e) => {
                warn!(target: "agent_service::connected_agents", error = %e, "failed to list agents");
                return Vec::new();
            }
        };
        let clients = self.clients.read().await;
        agents
            .into_iter()
            .filter(|a| a.enabled)
            .map(|a| {
                let connected = clients.get(&a.id).map(|h| h.client.status().connected).unwrap_or(false);
                (a.id, a, connected)
            })
            .collect()
    }

    async fn pull_json<T: serde::de::DeserializeOwned>(
        &self,
        base: &str,
        path: &str,
        agent: &MonitorAgent,
        timeout_secs: u64,
    ) -> std::result::Result<T, String> {
        let url = format!("{base}{path}");
        let mut req = self.http.get(&url).timeout(Duration::from_secs(timeout_secs));
        if let Some(key) = &agent.api_key {
            req = req.header("X-API-Key", key);
        }
        let response = req.send().await.map_err(|e| e.to_string())?;
        let response = response.error_for_status().map_err(|e| e.to_string())?;
        response.json::<T>().await.map_err(|e| e.to_string())
    }

    /// Stops every client, then runs one final retention pass bounded by
    /// [`SHUTDOWN_CLEANUP_DEADLINE_SECS`].
    pub async fn shutdown(&self) {
        let handles: Vec<(Id, ClientHandle)> = self.clients.write().await.drain().collect();
        for (id, handle) in handles {
            handle.cancel.cancel();
            if let Err(e) = handle.join.await {
                warn!(target: "agent_service::shutdown", agent_id = id, error = %e, "agent client task panicked");
            }
        }

        match tokio::time::timeout(Duration::from_secs(SHUTDOWN_CLEANUP_DEADLINE_SECS), self.prune_all()).await {
            Ok(_) => info!(target: "agent_service::shutdown", "final cleanup pass completed"),
            Err(_) => warn!(target: "agent_service::shutdown", "final cleanup pass exceeded its deadline"),
        }
    }
}

#[derive(Debug, serde::Deserialize)]
struct HistoricalExport {
    interfaces: Vec<HistoricalInterface>,
}

#[derive(Debug, serde::Deserialize)]
struct HistoricalInterface {
    name: String,
    traffic: HistoricalTraffic,
}

#[derive(Debug, serde::Deserialize)]
struct HistoricalTraffic {
    hour: Option<serde_json::Value>,
    day: Option<serde_json::Value>,
    month: Option<serde_json::Value>,
    total: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::models::notification::{NotificationCategory, NotificationChannel, NotificationEvent, NotificationRule};
    use crate::sender::{AlwaysSucceedsSender, Sender};
    use crate::store::memory::InMemoryStore;

    fn test_agent(enabled: bool) -> MonitorAgent {
        let now = Utc::now();
        MonitorAgent {
            id: 0,
            name: "test".to_string(),
            url: "http://example.invalid/events".to_string(),
            api_key: None,
            enabled,
            is_tailscale: false,
            tailscale_hostname: None,
            protocol_variant: AgentProtocolVariant::Unified,
            discovered_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn start_agent_on_unknown_id_fails_cleanly() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let bus = Bus::new();
        let dispatcher = Arc::new(Dispatcher::new(store.clone(), Arc::new(AlwaysSucceedsSender)));
        let service = AgentService::new(store, bus, dispatcher, AgentConfig::default(), RetentionConfig::default());

        let result = service.start_agent(999).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn stop_agent_on_unknown_id_is_a_noop() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let bus = Bus::new();
        let dispatcher = Arc::new(Dispatcher::new(store.clone(), Arc::new(AlwaysSucceedsSender)));
        let service = AgentService::new(store, bus, dispatcher, AgentConfig::default(), RetentionConfig::default());
        service.stop_agent(42).await;
        assert!(service.status(42).await.is_none());
    }

    #[tokio::test]
    async fn discover_agent_inserts_publishes_and_starts_a_client() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let bus = Bus::new();
        let (mut sub, _cancel) = bus.subscribe();
        let dispatcher = Arc::new(Dispatcher::new(store.clone(), Arc::new(AlwaysSucceedsSender)));
        let service = AgentService::new(store, bus, dispatcher, AgentConfig::default(), RetentionConfig::default());

        let id = service.discover_agent(test_agent(true)).await.unwrap();

        match sub.next().await.unwrap() {
            Update::AgentDiscovered(d) => assert_eq!(d.agent_id, id),
            _ => panic!("expected AgentDiscovered"),
        }
        assert!(service.status(id).await.is_some());
    }

    #[tokio::test]
    async fn discover_agent_does_not_start_a_client_when_disabled() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let bus = Bus::new();
        let dispatcher = Arc::new(Dispatcher::new(store.clone(), Arc::new(AlwaysSucceedsSender)));
        let service = AgentService::new(store, bus, dispatcher, AgentConfig::default(), RetentionConfig::default());

        let id = service.discover_agent(test_agent(false)).await.unwrap();
        assert!(service.status(id).await.is_none());
    }

    #[tokio::test]
    async fn prune_all_honors_per_kind_retention_windows() {
        let store = Arc::new(InMemoryStore::new());
        let old = Utc::now() - chrono::Duration::days(40);

        store
            .insert_notification_history(crate::models::notification::NotificationHistory {
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

        let store_dyn: Arc<dyn Store> = store.clone();
        let bus = Bus::new();
        let dispatcher = Arc::new(Dispatcher::new(store_dyn.clone(), Arc::new(AlwaysSucceedsSender)));
        let retention = RetentionConfig {
            test_results_days: 1,
            packetloss_results_days: 1,
            notification_history_days: 1,
            historical_snapshots_days: 1,
        };
        let service = AgentService::new(store_dyn, bus, dispatcher, AgentConfig::default(), retention);

        assert!(service.prune_all().await.is_ok());
        assert!(store.history_rows().is_empty());
    }

    #[tokio::test]
    async fn detect_connection_transitions_emits_disconnect_then_reconnect() {
        struct CountingSender {
            count: AtomicUsize,
        }

        #[async_trait]
        impl Sender for CountingSender {
            async fn send(&self, _url: &str, _payload: &str) -> std::result::Result<(), crate::error::NotifyError> {
                self.count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let store = Arc::new(InMemoryStore::new());
        let agent_id = store.seed_agent(test_agent(true));
        let mut agent = test_agent(true);
        agent.id = agent_id;

        let channel_id = store.seed_channel(NotificationChannel {
            id: 0,
            name: "c".to_string(),
            url: "discord://x".to_string(),
            enabled: true,
        });
        let disconnected_event = store.seed_event(NotificationEvent {
            id: 0,
            category: NotificationCategory::Agent,
            event_type: "agent_disconnected".to_string(),
            supports_threshold: false,
            threshold_unit: None,
        });
        let reconnected_event = store.seed_event(NotificationEvent {
            id: 0,
            category: NotificationCategory::Agent,
            event_type: "agent_reconnected".to_string(),
            supports_threshold: false,
            threshold_unit: None,
        });
        store.seed_rule(NotificationRule {
            id: 0,
            channel_id,
            event_id: disconnected_event,
            enabled: true,
            threshold_value: None,
            threshold_operator: None,
        });
        store.seed_rule(NotificationRule {
            id: 0,
            channel_id,
            event_id: reconnected_event,
            enabled: true,
            threshold_value: None,
            threshold_operator: None,
        });

        let sender = Arc::new(CountingSender { count: AtomicUsize::new(0) });
        let store_dyn: Arc<dyn Store> = store.clone();
        let bus = Bus::new();
        let dispatcher = Arc::new(Dispatcher::new(store_dyn.clone(), sender.clone()));
        let service = AgentService::new(
            store_dyn,
            bus,
            dispatcher,
            AgentConfig::default(),
            RetentionConfig::default(),
        );

        let client = AgentClient::new(&agent, store.clone(), Bus::new(), HttpClient::new());
        client.set_connected_for_test(true);
        let cancel = CancellationToken::new();
        let join = tokio::spawn(async {});
        service
            .clients
            .write()
            .await
            .insert(agent_id, ClientHandle { client: client.clone(), cancel, join });

        // first observation just seeds last_connected, no transition yet
        service.detect_connection_transitions().await;
        assert_eq!(sender.count.load(Ordering::SeqCst), 0);

        client.set_connected_for_test(false);
        service.detect_connection_transitions().await;
        assert_eq!(sender.count.load(Ordering::SeqCst), 1);

        client.set_connected_for_test(true);
        service.detect_connection_transitions().await;
        assert_eq!(sender.count.load(Ordering::SeqCst), 2);
    }
}
