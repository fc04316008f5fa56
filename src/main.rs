use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use owl_gateway::config::{ConfigManager, GatewayConfig};
use owl_gateway::execution::{
    BrowserProcessPool, Dispatcher, ProcessPoolManager, WorkerLauncher, WorkerMode,
};
use owl_gateway::logging::{init_structured_logging, ConsoleTarget};
use owl_gateway::registry::{snapshot, TaskRegistry};
use owl_gateway::society::{CommandSocietyRunner, ModuleCatalog};
use owl_gateway::web::{self, state::AppState};

#[derive(Parser)]
#[command(name = "owl-gateway", version, about = "Task gateway for agent-society execution")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP/WebSocket gateway.
    Serve {
        /// Configuration directory (defaults to ./config).
        #[arg(long, env = "OWL_GATEWAY_CONFIG_DIR")]
        config_dir: Option<PathBuf>,
    },
    /// Run as a worker child process. Spawned by the gateway, not meant
    /// for direct use.
    Worker {
        #[arg(long, value_enum)]
        mode: WorkerMode,
        /// Configuration file or directory handed down by the parent.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    match Cli::parse().command {
        Commands::Serve { config_dir } => serve(config_dir).await,
        Commands::Worker { mode, config } => worker(mode, config).await,
    }
}

async fn serve(config_dir: Option<PathBuf>) -> anyhow::Result<()> {
    let manager =
        ConfigManager::load_from_directory(config_dir.clone()).context("configuration")?;
    let config = manager.config().clone();
    init_structured_logging(&config.logging.directory, ConsoleTarget::Stdout);
    info!(
        environment = manager.environment(),
        "starting owl-gateway {}",
        env!("CARGO_PKG_VERSION")
    );

    let registry = Arc::new(TaskRegistry::new());
    let snapshot_path = config.snapshot.snapshot_path();
    match snapshot::load_snapshot(&registry, &snapshot_path) {
        Ok(0) => {}
        Ok(restored) => info!(restored, "registry restored from snapshot"),
        Err(e) => warn!(error = %e, "snapshot restore failed, starting empty"),
    }

    let shutdown = CancellationToken::new();
    let snapshot_task = tokio::spawn(snapshot::run_snapshot_loop(
        registry.clone(),
        config.snapshot.clone(),
        shutdown.clone(),
    ));

    let launcher = WorkerLauncher::current(config_dir).context("worker launcher")?;
    let generic_pool = Arc::new(ProcessPoolManager::new(
        launcher.clone(),
        config.pools.shutdown_grace(),
    ));
    let browser_pool = Arc::new(BrowserProcessPool::new(
        registry.clone(),
        launcher,
        config.pools.browser_workers,
        config.pools.shutdown_grace(),
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        registry.clone(),
        Arc::new(ModuleCatalog::with_overrides(&config.modules)),
        Arc::new(CommandSocietyRunner::new(&config.society)),
        generic_pool,
        browser_pool,
        config.pools.clone(),
        config.browser.clone(),
    ));

    let state = AppState::new(dispatcher.clone(), Arc::new(config));
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received");
        signal_token.cancel();
    });

    let result = web::serve(state, shutdown.clone().cancelled_owned()).await;
    if let Err(e) = &result {
        error!(error = %e, "server exited with error");
    }

    info!("draining pools");
    dispatcher.shutdown().await;
    shutdown.cancel();
    snapshot_task.await.ok();
    info!("gateway stopped");
    result.map_err(Into::into)
}

async fn worker(mode: WorkerMode, config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = load_worker_config(config_path).context("worker configuration")?;
    // Stdout carries the reply protocol, so all logging goes to stderr.
    init_structured_logging(&config.logging.directory, ConsoleTarget::Stderr);
    owl_gateway::execution::run_worker(mode, config)
        .await
        .map_err(Into::into)
}

fn load_worker_config(path: Option<PathBuf>) -> owl_gateway::Result<GatewayConfig> {
    let manager = match path {
        Some(path) if path.is_file() => ConfigManager::load_file(&path)?,
        Some(dir) => ConfigManager::load_from_directory(Some(dir))?,
        None => ConfigManager::load()?,
    };
    Ok(manager.config().clone())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            error!(error = %e, "cannot install SIGTERM handler");
            tokio::signal::ctrl_c().await.ok();
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    tokio::signal::ctrl_c().await.ok();
}
