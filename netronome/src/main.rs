//! Netronome Binary
//!
//! Composition root for the network-quality observatory's measurement
//! control plane. Parses CLI flags, loads configuration, wires the default
//! in-process collaborators (the concrete database/runner/notification
//! transport are external collaborators left to a real deployment to
//! supply), and serves the live-update/health routes until shutdown.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use netronome_core::config::Config;
use netronome_core::http::create_app;
use netronome_core::runner::NullRunner;
use netronome_core::sender::LoggingSender;
use netronome_core::store::memory::InMemoryStore;
use netronome_core::{log, Wiring};

#[derive(Parser, Debug)]
#[command(name = "netronome")]
#[command(about = "Netronome measurement control plane", long_about = None)]
struct Args {
    /// Config file path (TOML)
    #[arg(short, long)]
    config: Option<String>,

    /// Override server host
    #[arg(long)]
    host: Option<String>,

    /// Override server port
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config()?;
    log::initialize_logging(config.log_format);

    info!("starting netronome control plane");
    debug!(host = %config.server.host, port = config.server.port, "resolved configuration");

    // The concrete SQLite/Postgres `Store`, speedtest/iperf3/librespeed
    // `Runner`, and notification-transport `Sender` are external
    // collaborators; this binary's default wiring uses the
    // in-memory/no-op fallbacks so the control plane runs standalone.
    let store: Arc<dyn netronome_core::store::Store> = Arc::new(InMemoryStore::new());
    let runner = Arc::new(NullRunner);
    let sender = Arc::new(LoggingSender);

    let wiring = Wiring::new(&config, store, runner, sender);
    let app = create_app(wiring.clone());

    let cancel = CancellationToken::new();
    let control_plane = tokio::spawn({
        let cancel = cancel.clone();
        async move { wiring.run(cancel).await }
    });

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "serving live-update and health routes");

    let server_cancel = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            wait_for_shutdown_signal().await;
            server_cancel.cancel();
        })
        .await
        .context("http server error")?;

    control_plane
        .await
        .context("control plane task panicked")??;

    info!("netronome shut down cleanly");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

fn load_config() -> Result<Config> {
    let args = Args::parse();

    let mut config = match args.config {
        Some(path) => {
            Config::from_file(&path).with_context(|| format!("failed to read config file: {path}"))?
        }
        None => Config::default(),
    };

    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    Ok(config)
}
