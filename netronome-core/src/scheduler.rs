//! Periodic and wall-clock-anchored execution of [`Schedule`] rows.
//! Grounded on `services::msp::discover_provider_id`
//! retry loop for the "tick, act, re-arm" shape, generalized from a single
//! retrying task to a 60s ticker fanning out one bounded task per due
//! schedule.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bus::Bus;
use crate::clock::Clock;
use crate::config::SchedulerConfig;
use crate::constants::scheduler::{STARTUP_JITTER_MAX_SECS, STARTUP_JITTER_MIN_SECS};
use crate::error::Result;
use crate::models::schedule::Schedule;
use crate::models::update::{SpeedtestDone, SpeedtestProgress, Update};
use crate::models::Id;
use crate::notify::dispatcher::Dispatcher;
use crate::runner::Runner;
use crate::store::Store;

pub struct Scheduler {
    store: Arc<dyn Store>,
    runner: Arc<dyn Runner>,
    bus: Bus,
    dispatcher: Arc<Dispatcher>,
    clock: Clock,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn Store>,
        runner: Arc<dyn Runner>,
        bus: Bus,
        dispatcher: Arc<Dispatcher>,
        config: SchedulerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            runner,
            bus,
            dispatcher,
            clock: Clock,
            config,
        })
    }

    pub async fn is_healthy(&self) -> bool {
        true
    }

    /// Runs the scheduler until `cancel` fires: applies startup jitter once,
    /// then ticks every [`SchedulerConfig::tick_secs`], dispatching one
    /// bounded task per due schedule.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        if let Err(e) = self.apply_startup_jitter().await {
            warn!(target: "scheduler::run", error = %e, "failed to apply startup jitter");
        }

        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.tick_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut in_flight = Vec::new();
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    in_flight.retain(|h: &tokio::task::JoinHandle<()>| !h.is_finished());
                    if let Err(e) = self.tick(&mut in_flight).await {
                        warn!(target: "scheduler::run", error = %e, "tick failed to load schedules");
                    }
                }
            }
        }

        // Shutdown: wait for in-flight tasks up to their own per-run deadline.
        for handle in in_flight {
            let _ = handle.await;
        }
    }

    /// Moves every overdue schedule's `next_run` into a random point within
    /// `[now+1s, now+300s]` without executing it, the sole anti-thundering-herd
    /// measure.
    async fn apply_startup_jitter(&self) -> Result<()> {
        let now = self.clock.now_utc();
        let schedules = crate::error::retry_transient(|| async {
            self.store.list_schedules().await.map_err(Into::into)
        })
        .await?;
        for schedule in schedules.into_iter().filter(|s| s.enabled && s.next_run <= now) {
            let jitter_secs = rand::thread_rng()
                .gen_range(STARTUP_JITTER_MIN_SECS..=STARTUP_JITTER_MAX_SECS);
            let next_run = now + chrono::Duration::seconds(jitter_secs as i64);
            info!(
                target: "scheduler::apply_startup_jitter",
                schedule_id = schedule.id,
                jitter_secs,
                "moved overdue schedule's next_run forward instead of executing immediately"
            );
            self.store.reschedule_next_run(schedule.id, next_run).await?;
        }
        Ok(())
    }

    async fn tick(self: &Arc<Self>, in_flight: &mut Vec<tokio::task::JoinHandle<()>>) -> Result<()> {
        let now = self.clock.now_utc();
        let schedules = crate::error::retry_transient(|| async {
            self.store.list_schedules().await.map_err(Into::into)
        })
        .await?;
        for schedule in schedules.into_iter().filter(|s| s.is_due(now)) {
            let scheduler = self.clone();
            let timeout = Duration::from_secs(self.config.run_timeout_secs);
            let handle = tokio::spawn(async move {
                match tokio::time::timeout(timeout, scheduler.execute(schedule.clone())).await {
                    Ok(()) => {}
                    Err(_) => {
                        warn!(target: "scheduler::tick", schedule_id = schedule.id, "scheduled run exceeded its timeout budget");
                        let _ = scheduler
                            .dispatcher
                            .emit(
                                crate::models::notification::NotificationCategory::Speedtest,
                                "speedtest_failed",
                                format!("schedule {} timed out after {}s", schedule.id, timeout.as_secs()),
                                None,
                            )
                            .await;
                    }
                }
            });
            in_flight.push(handle);
        }
        Ok(())
    }

    async fn execute(self: Arc<Self>, schedule: Schedule) {
        let schedule_id = schedule.id;
        self.bus.publish(Update::SpeedtestProgress(SpeedtestProgress {
            schedule_id,
            progress_pct: 0.0,
        }));

        let mut options = schedule.options.clone();
        options.is_scheduled = true;

        match self.runner.run(&options).await {
            Ok(result) => {
                let success = match self.store.insert_test_result(result).await {
                    Ok(result_id) => {
                        self.bus.publish(Update::SpeedtestDone(SpeedtestDone {
                            schedule_id,
                            result_id,
                            success: true,
                        }));
                        true
                    }
                    Err(e) => {
                        warn!(target: "scheduler::execute", schedule_id, error = %e, "failed to persist test result");
                        false
                    }
                };
                if !success {
                    let _ = self
                        .dispatcher
                        .emit(
                            crate::models::notification::NotificationCategory::Speedtest,
                            "speedtest_failed",
                            format!("schedule {schedule_id} completed but its result could not be saved"),
                            None,
                        )
                        .await;
                }
            }
            Err(e) => {
                warn!(target: "scheduler::execute", schedule_id, error = %e, "runner failed");
                self.bus.publish(Update::SpeedtestDone(SpeedtestDone {
                    schedule_id,
                    result_id: 0,
                    success: false,
                }));
                let _ = self
                    .dispatcher
                    .emit(
                        crate::models::notification::NotificationCategory::Speedtest,
                        "speedtest_failed",
                        format!("schedule {schedule_id} failed: {e}"),
                        None,
                    )
                    .await;
            }
        }

        self.advance(schedule).await;
    }

    async fn advance(&self, schedule: Schedule) {
        let now = self.clock.now_utc();
        let next_run = now
            + chrono::Duration::from_std(schedule.interval).unwrap_or(chrono::Duration::hours(1));
        if let Err(e) = self.store.update_schedule_run(schedule.id, now, next_run).await {
            warn!(target: "scheduler::advance", schedule_id = schedule.id, error = %e, "failed to advance schedule");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::schedule::{TestOptions, TestType};
    use crate::models::speedtest::TestResult;
    use crate::runner::{FakeRunner, RunnerError};
    use crate::sender::AlwaysSucceedsSender;
    use crate::store::memory::InMemoryStore;
    use std::time::Duration as StdDuration;

    fn test_options() -> TestOptions {
        TestOptions {
            test_type: TestType::Speedtest,
            server_ids: vec!["server-1".to_string()],
            is_scheduled: false,
        }
    }

    fn seed_schedule(store: &InMemoryStore, next_run: chrono::DateTime<Utc>, interval_secs: u64) -> Id {
        let now = Utc::now();
        store.seed_schedule(Schedule {
            id: 0,
            target_ids: vec!["server-1".to_string()],
            interval: StdDuration::from_secs(interval_secs),
            options: test_options(),
            last_run: None,
            next_run,
            enabled: true,
            created_at: now,
        })
    }

    #[tokio::test]
    async fn startup_jitter_moves_overdue_schedules_into_the_future_window() {
        let store = Arc::new(InMemoryStore::new());
        let past = Utc::now() - chrono::Duration::minutes(10);
        let id = seed_schedule(&store, past, 300);

        let bus = Bus::new();
        let dispatcher = Arc::new(Dispatcher::new(store.clone(), Arc::new(AlwaysSucceedsSender)));
        let runner = Arc::new(FakeRunner::new(vec![]));
        let scheduler = Scheduler::new(
            store.clone(),
            runner,
            bus,
            dispatcher,
            SchedulerConfig {
                tick_secs: 60,
                run_timeout_secs: 300,
            },
        );

        scheduler.apply_startup_jitter().await.unwrap();

        let schedule = store.get_schedule(id).await.unwrap();
        let now = Utc::now();
        assert!(schedule.next_run > now);
        assert!(schedule.next_run <= now + chrono::Duration::seconds(301));
        assert!(schedule.last_run.is_none());
    }

    #[tokio::test]
    async fn successful_run_persists_result_and_advances_next_run() {
        let store = Arc::new(InMemoryStore::new());
        let now = Utc::now();
        let id = seed_schedule(&store, now - chrono::Duration::seconds(1), 300);

        let bus = Bus::new();
        let dispatcher = Arc::new(Dispatcher::new(store.clone(), Arc::new(AlwaysSucceedsSender)));
        let result = TestResult {
            id: 0,
            server_name: "srv".to_string(),
            server_id: "server-1".to_string(),
            server_host: None,
            test_type: TestType::Speedtest,
            down_mbps: 100.0,
            up_mbps: 20.0,
            latency_ms_string: "12ms".to_string(),
            jitter_ms: Some(1.0),
            is_scheduled: true,
            created_at: now,
        };
        let runner = Arc::new(FakeRunner::new(vec![Ok(result)]));
        let scheduler = Scheduler::new(
            store.clone(),
            runner,
            bus,
            dispatcher,
            SchedulerConfig {
                tick_secs: 60,
                run_timeout_secs: 300,
            },
        );

        let schedule = store.get_schedule(id).await.unwrap();
        scheduler.execute(schedule).await;

        let schedule = store.get_schedule(id).await.unwrap();
        assert!(schedule.last_run.is_some());
        assert!(schedule.next_run > now + chrono::Duration::seconds(250));
    }

    #[tokio::test]
    async fn failed_run_emits_failure_notification() {
        let store = Arc::new(InMemoryStore::new());
        let now = Utc::now();
        let id = seed_schedule(&store, now, 300);

        let event_id = store.seed_event(crate::models::notification::NotificationEvent {
            id: 0,
            category: crate::models::notification::NotificationCategory::Speedtest,
            event_type: "speedtest_failed".to_string(),
            supports_threshold: false,
            threshold_unit: None,
        });
        let channel_id = store.seed_channel(crate::models::notification::NotificationChannel {
            id: 0,
            name: "c".to_string(),
            url: "discord://x".to_string(),
            enabled: true,
        });
        store.seed_rule(crate::models::notification::NotificationRule {
            id: 0,
            channel_id,
            event_id,
            enabled: true,
            threshold_value: None,
            threshold_operator: None,
        });

        let bus = Bus::new();
        let dispatcher = Arc::new(Dispatcher::new(store.clone(), Arc::new(AlwaysSucceedsSender)));
        let runner = Arc::new(FakeRunner::new(vec![Err(RunnerError::Failed("boom".to_string()))]));
        let scheduler = Scheduler::new(
            store.clone(),
            runner,
            bus,
            dispatcher,
            SchedulerConfig {
                tick_secs: 60,
                run_timeout_secs: 300,
            },
        );

        let schedule = store.get_schedule(id).await.unwrap();
        scheduler.execute(schedule).await;

        assert_eq!(store.history_rows().len(), 1);
        assert!(store.history_rows()[0].success);
    }
}
