//! # relay
//!
//! Relay server binary: loads settings, opens the shared store and serves
//! the HTTP surface until interrupted.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use relay_engine::Relay;
use relay_engine::manifest::default_manifest;
use relay_server::RelayServer;
use relay_settings::{RelaySettings, StoreBackend};
use relay_store::{MemoryStore, SharedStore, SqliteStore};
use relay_telemetry::{TelemetryConfig, init_telemetry};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How often expired store entries are swept.
const PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Stateless relay between LLM agents and in-browser tool executors.
#[derive(Parser, Debug)]
#[command(name = "relay", version, about)]
struct Cli {
    /// Settings file (defaults to `~/.relay/settings.json`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server (default).
    Serve {
        /// Override the bind address.
        #[arg(long)]
        host: Option<String>,
        /// Override the listen port (0 for auto-assign).
        #[arg(long)]
        port: Option<u16>,
    },
    /// Print the effective settings as JSON and exit.
    PrintConfig,
}

fn load(cli: &Cli) -> Result<RelaySettings> {
    let path = cli.config.clone().unwrap_or_else(relay_settings::settings_path);
    relay_settings::load_settings_from_path(&path)
        .with_context(|| format!("failed to load settings from {}", path.display()))
}

enum Store {
    Memory(Arc<MemoryStore>),
    Sqlite(Arc<SqliteStore>),
}

impl Store {
    fn open(settings: &RelaySettings) -> Result<Self> {
        Ok(match settings.store.backend {
            StoreBackend::Memory => Self::Memory(Arc::new(MemoryStore::new())),
            StoreBackend::Sqlite => {
                let path = PathBuf::from(&settings.store.path);
                let store = SqliteStore::open(&path)
                    .with_context(|| format!("failed to open store at {}", path.display()))?;
                Self::Sqlite(Arc::new(store))
            }
        })
    }

    fn shared(&self) -> SharedStore {
        match self {
            Self::Memory(s) => Arc::clone(s) as SharedStore,
            Self::Sqlite(s) => Arc::clone(s) as SharedStore,
        }
    }

    async fn purge(&self) -> usize {
        match self {
            Self::Memory(s) => s.purge_expired(),
            Self::Sqlite(s) => s.purge_expired().await.unwrap_or_else(|e| {
                warn!(error = %e, "store purge failed");
                0
            }),
        }
    }
}

async fn purge_periodically(store: Store, cancel: CancellationToken) {
    let mut tick = tokio::time::interval(PURGE_INTERVAL);
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = tick.tick() => {
                let purged = store.purge().await;
                if purged > 0 {
                    debug!(purged, "expired store entries removed");
                }
            }
        }
    }
}

async fn serve(mut settings: RelaySettings, host: Option<String>, port: Option<u16>) -> Result<()> {
    if let Some(host) = host {
        settings.server.host = host;
    }
    if let Some(port) = port {
        settings.server.port = port;
    }

    let telemetry = init_telemetry(&TelemetryConfig {
        level: settings.logging.level.clone(),
        json: settings.logging.json,
        prometheus: true,
    })?;

    let store = Store::open(&settings)?;
    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let grace = Duration::from_millis(settings.server.shutdown_grace_ms);
    info!(backend = store.shared().backend(), "store ready");

    let relay = Relay::new(store.shared(), settings, default_manifest()?);
    let mut server = RelayServer::new(relay);
    if let Some(handle) = telemetry.prometheus() {
        server = server.with_prometheus(handle.clone());
    }
    let server = Arc::new(server);

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    let coordinator = Arc::clone(server.shutdown());
    let serving = Arc::clone(&server);
    coordinator.spawn("listener", move |_| async move {
        if let Err(e) = serving.serve(listener).await {
            error!(error = %e, "server stopped with error");
        }
    });
    coordinator.spawn("purger", move |cancel| purge_periodically(store, cancel));

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    info!(open_streams = coordinator.open_streams(), "shutdown requested");
    let report = coordinator.graceful_shutdown(Some(grace)).await;
    info!(clean = report.is_clean(), "relay stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load(&cli)?;
    match cli.command {
        Some(Command::PrintConfig) => {
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(())
        }
        Some(Command::Serve { host, port }) => serve(settings, host, port).await,
        None => serve(settings, None, None).await,
    }
}
