//! MCI Orchestrator Daemon
//!
//! Runs the fleet services and serves the control protocol for the CLI.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mci_core::config::{self, OrchestratorConfig};
use mci_core::traits::RecordStore;
use mci_orchestrator::connection::DriverRegistry;
use mci_orchestrator::driver::{HttpDriver, SimulatedDriver};
use mci_orchestrator::ipc::IpcServer;
use mci_orchestrator::remote::SshShell;
use mci_orchestrator::store::{FileStore, MemoryStore};
use mci_orchestrator::{Fleet, OrchestratorState};

#[derive(Parser)]
#[command(name = "mci-orchestrator")]
#[command(about = "Multi-cloud VM fleet orchestrator daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address (overrides config)
    #[arg(short, long)]
    bind: Option<String>,

    /// Record store file (overrides config)
    #[arg(long)]
    store: Option<PathBuf>,

    /// Keep records in memory only, ignoring any configured store file
    #[arg(long, conflicts_with = "store")]
    memory: bool,

    /// Run in foreground with verbose output
    #[arg(short, long)]
    foreground: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.foreground { "debug" } else { &args.log_level };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("MCI Orchestrator starting...");

    let mut config = load_config(args.config.as_ref())?;
    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }
    config.validate().context("Invalid configuration")?;

    let store = open_store(&config, args.store, args.memory).await?;
    let drivers = build_drivers(&config)?;
    if drivers.providers().is_empty() {
        tracing::warn!("No cloud drivers configured - provisioning requests will be rejected");
    } else {
        tracing::info!("Cloud drivers: {}", drivers.providers().join(", "));
    }
    let shell = Arc::new(SshShell::new(config.remote.connect_timeout));

    let bind_addr = config.bind_address.clone();
    let allow_remote = config.allow_remote;
    let state = OrchestratorState::new(config, store, drivers, shell);
    tracing::info!("Loaded {} connection(s)", state.connections.len());
    let fleet = Fleet::new(state);

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let server = IpcServer::new(bind_addr, fleet)
        .with_allow_remote(allow_remote)
        .with_shutdown_token(cancel);
    server.run().await?;

    tracing::info!("Orchestrator shutdown complete");
    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<OrchestratorConfig> {
    if let Some(config_path) = path {
        return config::load_config(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path));
    }

    let default_path = config::default_config_path();
    if default_path.exists() {
        Ok(config::load_config(&default_path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config from {:?}: {}", default_path, e);
            OrchestratorConfig::default()
        }))
    } else {
        tracing::info!("Using default configuration");
        Ok(OrchestratorConfig::default())
    }
}

async fn open_store(
    config: &OrchestratorConfig,
    path: Option<PathBuf>,
    memory: bool,
) -> Result<Arc<dyn RecordStore>> {
    let path = match path.or_else(|| config.store.path.clone()) {
        Some(path) if !memory => path,
        _ => {
            tracing::warn!("Keeping records in memory only - they are lost on shutdown");
            return Ok(Arc::new(MemoryStore::new()));
        }
    };
    let store = FileStore::open(&path)
        .await
        .with_context(|| format!("Failed to open record store {:?}", path))?;
    tracing::info!("Record store: {:?}", store.path());
    Ok(Arc::new(store))
}

fn build_drivers(config: &OrchestratorConfig) -> Result<DriverRegistry> {
    let drivers = DriverRegistry::new();
    for provider in &config.driver.sim_providers {
        drivers.register(Arc::new(SimulatedDriver::new(provider.clone())));
    }
    if !config.driver.http_providers.is_empty() {
        match &config.driver.endpoint {
            Some(endpoint) => {
                for provider in &config.driver.http_providers {
                    let driver =
                        HttpDriver::new(provider.clone(), endpoint.clone(), config.driver.timeout)?;
                    drivers.register(Arc::new(driver));
                }
            }
            None => tracing::warn!(
                "driver.http_providers set without driver.endpoint - ignoring {:?}",
                config.driver.http_providers
            ),
        }
    }
    Ok(drivers)
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        cancel.cancel();
    });
}
