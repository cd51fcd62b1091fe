//! Supervises one long-running task per enabled [`PacketLossMonitor`].
//! Grounded on `services::node_health`
//! (periodic signal evaluation against cached state) for the probe/evaluate
//! shape, and `services::download_session` (a `RwLock`-guarded map of
//! per-entity handles) for supervisor lifecycle bookkeeping.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::Bus;
use crate::clock::{local_time_of_day, Clock};
use crate::config::PacketLossConfig;
use crate::constants::packetloss::PROGRESS_BROADCAST_HZ;
use crate::error::{Error, Result};
use crate::models::packetloss::{MonitorState, PacketLossMonitor, PacketLossResult, ScheduleKind};
use crate::models::update::{PacketlossDone, PacketlossProgress, Update};
use crate::models::Id;
use crate::notify::dispatcher::Dispatcher;
use crate::store::Store;

use super::probe::{run_icmp_probe, run_mtr_probe, run_unprivileged_probe, should_use_mtr, ProbeOutcome};

struct SupervisorHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

pub struct PacketLossEngine {
    store: Arc<dyn Store>,
    bus: Bus,
    dispatcher: Arc<Dispatcher>,
    clock: Clock,
    config: PacketLossConfig,
    semaphore: Arc<Semaphore>,
    supervisors: RwLock<HashMap<Id, SupervisorHandle>>,
}

impl PacketLossEngine {
    pub fn new(
        store: Arc<dyn Store>,
        bus: Bus,
        dispatcher: Arc<Dispatcher>,
        config: PacketLossConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            bus,
            dispatcher,
            clock: Clock,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_probes)),
            config,
            supervisors: RwLock::new(HashMap::new()),
        })
    }

    /// Loads all enabled monitors and starts a supervisor for each.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let monitors = self.store.list_monitors().await.map_err(Error::from)?;
        for monitor in monitors.into_iter().filter(|m| m.enabled) {
            self.start_monitor(monitor.id).await?;
        }
        Ok(())
    }

    /// No-op if a supervisor for `id` is already running.
    pub async fn start_monitor(self: &Arc<Self>, id: Id) -> Result<()> {
        {
            let supervisors = self.supervisors.read().await;
            if supervisors.contains_key(&id) {
                return Ok(());
            }
        }

        let cancel = CancellationToken::new();
        let engine = self.clone();
        let task_cancel = cancel.clone();
        let join = tokio::spawn(async move {
            engine.supervise(id, task_cancel).await;
        });

        self.supervisors
            .write()
            .await
            .insert(id, SupervisorHandle { cancel, join });
        Ok(())
    }

    /// Cancels the supervisor for `id` and awaits its drain. No-op if not running.
    pub async fn stop_monitor(&self, id: Id) {
        let handle = self.supervisors.write().await.remove(&id);
        if let Some(handle) = handle {
            handle.cancel.cancel();
            let _ = handle.join.await;
        }
    }

    /// Cancels every supervisor and awaits drain.
    pub async fn shutdown(&self) {
        let handles: Vec<(Id, SupervisorHandle)> =
            self.supervisors.write().await.drain().collect();
        for (id, handle) in handles {
            handle.cancel.cancel();
            if let Err(e) = handle.join.await {
                warn!(target: "packetloss_engine::shutdown", monitor_id = id, error = %e, "supervisor task panicked");
            }
        }
    }

    pub async fn is_healthy(&self) -> bool {
        true
    }

    pub async fn running_count(&self) -> usize {
        self.supervisors.read().await.len()
    }

    async fn supervise(self: Arc<Self>, monitor_id: Id, cancel: CancellationToken) {
        loop {
            let monitor = match self.store.get_monitor(monitor_id).await {
                Ok(m) => m,
                Err(e) => {
                    warn!(target: "packetloss_engine::supervise", monitor_id, error = %e, "failed to load monitor, stopping supervisor");
                    return;
                }
            };
            if !monitor.enabled {
                return;
            }

            let wait = self.time_until_next_run(&monitor);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(wait) => {}
            }

            let Ok(permit) = self.semaphore.clone().try_acquire_owned() else {
                warn!(
                    target: "packetloss_engine::supervise",
                    monitor_id,
                    "max_concurrent_probes saturated, skipping this cycle"
                );
                // Re-arm for the next cycle without probing.
                if matches!(monitor.schedule_kind, ScheduleKind::Interval) {
                    let next = self.clock.now_utc()
                        + chrono::Duration::from_std(
                            monitor.interval.unwrap_or(Duration::from_secs(60)),
                        )
                        .unwrap_or_default();
                    let _ = self
                        .store
                        .update_monitor_run(monitor_id, self.clock.now_utc(), Some(next))
                        .await;
                }
                continue;
            };

            if cancel.is_cancelled() {
                drop(permit);
                return;
            }

            self.run_one_probe(&monitor).await;
            drop(permit);
        }
    }

    /// Computes how long the supervisor should sleep before its next probe.
    fn time_until_next_run(&self, monitor: &PacketLossMonitor) -> Duration {
        match monitor.schedule_kind {
            ScheduleKind::Interval => {
                let interval = monitor.interval.unwrap_or(Duration::from_secs(60));
                match monitor.next_run {
                    Some(next) => {
                        let now = self.clock.now_utc();
                        (next - now).to_std().unwrap_or(Duration::ZERO)
                    }
                    None => interval,
                }
            }
            ScheduleKind::ExactTimes => {
                let Some(times) = &monitor.exact_times else {
                    return Duration::from_secs(60);
                };
                if times.is_empty() {
                    return Duration::from_secs(3600);
                }
                let now = local_time_of_day();
                let mut deltas: Vec<i64> = times
                    .iter()
                    .map(|t| {
                        let mut d = (*t - now).num_seconds();
                        if d < 0 {
                            d += 24 * 3600;
                        }
                        d
                    })
                    .collect();
                deltas.sort_unstable();
                Duration::from_secs(deltas[0].max(0) as u64)
            }
        }
    }

    async fn run_one_probe(&self, monitor: &PacketLossMonitor) {
        let monitor_id = monitor.id;
        let total_packets = monitor.packet_count.max(1);
        let bus = self.bus.clone();
        let progress = move |sent: u32, recv: u32, used_mtr: bool| {
            bus.publish(Update::PacketlossProgress(PacketlossProgress {
                monitor_id,
                progress_pct: (sent as f64 / total_packets as f64 * 100.0).min(100.0),
                packets_sent: sent,
                packets_recv: recv,
                used_mtr,
            }));
        };

        let use_mtr = should_use_mtr(monitor, self.config.privileged_icmp);
        let last_broadcast = Arc::new(std::sync::Mutex::new(std::time::Instant::now()));
        let outcome: std::result::Result<ProbeOutcome, _> = if use_mtr {
            let lb = last_broadcast.clone();
            run_mtr_probe(&monitor.host, monitor.packet_count, move |sent, recv| {
                maybe_broadcast(&lb, || progress(sent, recv, true));
            })
            .await
        } else if self.config.privileged_icmp {
            let lb = last_broadcast.clone();
            run_icmp_probe(&monitor.host, monitor.packet_count, true, move |sent, recv| {
                maybe_broadcast(&lb, || progress(sent, recv, false));
            })
            .await
        } else {
            let lb = last_broadcast.clone();
            run_unprivileged_probe(&monitor.host, monitor.packet_count, move |sent, recv| {
                maybe_broadcast(&lb, || progress(sent, recv, false));
            })
            .await
        };

        let outcome = match outcome {
            Ok(o) => o,
            Err(e) => {
                warn!(target: "packetloss_engine::run_one_probe", monitor_id, error = %e, "probe execution failed");
                // A probe error is modeled as total loss so the state
                // machine below still sees a result to evaluate.
                ProbeOutcome {
                    packets_sent: monitor.packet_count,
                    packets_recv: 0,
                    min_rtt_ms: 0.0,
                    max_rtt_ms: 0.0,
                    avg_rtt_ms: 0.0,
                    stddev_rtt_ms: 0.0,
                    used_mtr: use_mtr,
                    hop_count: None,
                    mtr_hops: None,
                    privileged: self.config.privileged_icmp,
                }
            }
        };

        let now = self.clock.now_utc();
        let loss_pct = outcome.loss_pct();

        let result = PacketLossResult {
            id: 0,
            monitor_id,
            loss_pct,
            min_rtt_ms: outcome.min_rtt_ms,
            max_rtt_ms: outcome.max_rtt_ms,
            avg_rtt_ms: outcome.avg_rtt_ms,
            stddev_rtt_ms: outcome.stddev_rtt_ms,
            packets_sent: outcome.packets_sent,
            packets_recv: outcome.packets_recv,
            used_mtr: outcome.used_mtr,
            hop_count: outcome.hop_count,
            mtr_hops: outcome.mtr_hops.clone(),
            privileged: outcome.privileged,
            created_at: now,
        };

        let result_id = match self.store.insert_packetloss_result(result).await {
            Ok(id) => id,
            Err(e) => {
                warn!(target: "packetloss_engine::run_one_probe", monitor_id, error = %e, "failed to persist packet-loss result");
                0
            }
        };

        self.bus.publish(Update::PacketlossDone(PacketlossDone {
            monitor_id,
            result_id,
            loss_pct,
        }));

        self.evaluate_state_machine(monitor, loss_pct, now).await;

        let next_run = match monitor.schedule_kind {
            ScheduleKind::Interval => {
                let interval = monitor.interval.unwrap_or(Duration::from_secs(60));
                Some(now + chrono::Duration::from_std(interval).unwrap_or_default())
            }
            ScheduleKind::ExactTimes => None,
        };
        if let Err(e) = self.store.update_monitor_run(monitor_id, now, next_run).await {
            warn!(target: "packetloss_engine::run_one_probe", monitor_id, error = %e, "failed to update monitor run bookkeeping");
        }
    }

    /// Edge-triggered state machine. Persists the new state
    /// exactly once per transition and emits a notification only when
    /// entering `degraded`/`down`, or recovering from either back to `up`.
    async fn evaluate_state_machine(
        &self,
        monitor: &PacketLossMonitor,
        loss_pct: f64,
        at: chrono::DateTime<Utc>,
    ) {
        let target = if loss_pct >= 100.0 {
            MonitorState::Down
        } else if loss_pct > monitor.threshold_pct {
            MonitorState::Degraded
        } else {
            MonitorState::Up
        };

        if target == monitor.last_state {
            return;
        }

        if let Err(e) = self
            .store
            .update_monitor_state(monitor.id, target, at)
            .await
        {
            warn!(target: "packetloss_engine::evaluate_state_machine", monitor_id = monitor.id, error = %e, "failed to persist state transition");
        }

        let was_unwell = matches!(monitor.last_state, MonitorState::Degraded | MonitorState::Down);
        let name = monitor.name.clone().unwrap_or_else(|| monitor.host.clone());

        match target {
            MonitorState::Degraded => {
                info!(target: "packetloss_engine::evaluate_state_machine", monitor_id = monitor.id, loss_pct, "monitor degraded, threshold exceeded");
                let _ = self
                    .dispatcher
                    .emit(
                        crate::models::notification::NotificationCategory::Packetloss,
                        "threshold_exceeded",
                        format!("{name} packet loss {loss_pct:.1}% exceeds threshold {:.1}%", monitor.threshold_pct),
                        Some(loss_pct),
                    )
                    .await;
            }
            MonitorState::Down => {
                info!(target: "packetloss_engine::evaluate_state_machine", monitor_id = monitor.id, "monitor unreachable");
                let _ = self
                    .dispatcher
                    .emit(
                        crate::models::notification::NotificationCategory::Packetloss,
                        "monitor_down",
                        format!("{name} is unreachable (100% packet loss)"),
                        Some(loss_pct),
                    )
                    .await;
            }
            MonitorState::Up if was_unwell => {
                info!(target: "packetloss_engine::evaluate_state_machine", monitor_id = monitor.id, "monitor recovered");
                let _ = self
                    .dispatcher
                    .emit(
                        crate::models::notification::NotificationCategory::Packetloss,
                        "monitor_recovered",
                        format!("{name} recovered, packet loss {loss_pct:.1}%"),
                        Some(loss_pct),
                    )
                    .await;
            }
            MonitorState::Up | MonitorState::Unknown => {
                debug!(target: "packetloss_engine::evaluate_state_machine", monitor_id = monitor.id, "monitor state settled without notification");
            }
        }
    }
}

/// Caps `packetloss_progress` broadcasts at [`PROGRESS_BROADCAST_HZ`].
fn maybe_broadcast(last: &std::sync::Mutex<std::time::Instant>, f: impl FnOnce()) {
    let mut guard = last.lock().unwrap();
    if guard.elapsed() >= Duration::from_millis(1000 / PROGRESS_BROADCAST_HZ.max(1)) {
        *guard = std::time::Instant::now();
        f();
    }
}
