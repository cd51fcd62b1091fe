//! Composition root: resolves the `Store`/`Runner`/`Sender` collaborators
//! into a running control plane and sequences startup/shutdown.
//!
//! Grounded on `services::Services` (one struct bundling every
//! subsystem behind `Arc`, built once at startup and cloned into route
//! handlers), generalized from an HTTP-handler bag into a long-running
//! process with its own background tasks.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::agent::AgentService;
use crate::bus::Bus;
use crate::config::Config;
use crate::notify::Dispatcher;
use crate::packetloss::PacketLossEngine;
use crate::runner::Runner;
use crate::scheduler::Scheduler;
use crate::sender::Sender;
use crate::store::Store;

/// Everything the process needs to serve the live-update/health routes and
/// run the three measurement subsystems. Cheap to clone (every field is an
/// `Arc`); this is what `http::create_app` takes as its router state.
#[derive(Clone)]
pub struct Wiring {
    pub store: Arc<dyn Store>,
    pub bus: Bus,
    pub scheduler: Arc<Scheduler>,
    pub packetloss: Arc<PacketLossEngine>,
    pub agents: Arc<AgentService>,
}

impl Wiring {
    pub fn new(
        config: &Config,
        store: Arc<dyn Store>,
        runner: Arc<dyn Runner>,
        sender: Arc<dyn Sender>,
    ) -> Self {
        let bus = Bus::new();
        let dispatcher = Arc::new(Dispatcher::new(store.clone(), sender));

        let scheduler = Scheduler::new(
            store.clone(),
            runner,
            bus.clone(),
            dispatcher.clone(),
            config.scheduler.clone(),
        );
        let packetloss = PacketLossEngine::new(
            store.clone(),
            bus.clone(),
            dispatcher.clone(),
            config.packetloss.clone(),
        );
        let agents = AgentService::new(
            store.clone(),
            bus.clone(),
            dispatcher,
            config.agent.clone(),
            config.retention.clone(),
        );

        Self {
            store,
            bus,
            scheduler,
            packetloss,
            agents,
        }
    }

    /// Starts every component's supervised background work and runs until
    /// `cancel` fires, then drains each in the order it was brought up in
    /// reverse: scheduler's own in-flight runs, packet-loss supervisors,
    /// agent clients, and finally one last retention pass.
    pub async fn run(self, cancel: CancellationToken) -> crate::error::Result<()> {
        info!(target: "wiring::run", "starting packet-loss monitors and agent clients");
        self.packetloss.start().await?;
        self.agents.start().await?;

        let scheduler_task: JoinHandle<()> = {
            let scheduler = self.scheduler.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { scheduler.run(cancel).await })
        };
        let agent_tickers_task: JoinHandle<()> = {
            let agents = self.agents.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { agents.run_background_tickers(cancel).await })
        };

        cancel.cancelled().await;
        info!(target: "wiring::run", "shutdown signalled, draining components");

        let _ = scheduler_task.await;
        let _ = agent_tickers_task.await;
        self.packetloss.shutdown().await;
        self.agents.shutdown().await;

        info!(target: "wiring::run", "shutdown complete");
        Ok(())
    }

    /// Aggregate health snapshot for the `/healthz` route.
    pub async fn health(&self) -> HealthSnapshot {
        HealthSnapshot {
            store: self.store.ping().await.is_ok(),
            scheduler: self.scheduler.is_healthy().await,
            packetloss: self.packetloss.is_healthy().await,
            agents: self.agents.is_healthy().await,
        }
    }
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct HealthSnapshot {
    pub store: bool,
    pub scheduler: bool,
    pub packetloss: bool,
    pub agents: bool,
}

impl HealthSnapshot {
    pub fn is_healthy(&self) -> bool {
        self.store && self.scheduler && self.packetloss && self.agents
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::FakeRunner;
    use crate::sender::AlwaysSucceedsSender;
    use crate::store::memory::InMemoryStore;

    #[tokio::test]
    async fn run_drains_cleanly_on_cancellation() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let wiring = Wiring::new(
            &Config::default(),
            store,
            Arc::new(FakeRunner::new(vec![])),
            Arc::new(AlwaysSucceedsSender),
        );

        let cancel = CancellationToken::new();
        let run_cancel = cancel.clone();
        let handle = tokio::spawn(async move { wiring.run(run_cancel).await });

        cancel.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("wiring did not shut down in time")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn health_snapshot_reports_all_components_healthy_by_default() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let wiring = Wiring::new(
            &Config::default(),
            store,
            Arc::new(FakeRunner::new(vec![])),
            Arc::new(AlwaysSucceedsSender),
        );
        let health = wiring.health().await;
        assert!(health.is_healthy());
    }
}
