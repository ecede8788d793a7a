#![forbid(unsafe_code)]

//! `procwarden`: process supervisor daemon.
//!
//! Loads configuration, builds the instance registry (starting every
//! enabled instance), serves the control socket for `procwarden-ctl`, and
//! stops all instances on Ctrl-C or SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use procwarden::config::GlobalConfig;
use procwarden::ipc::server::spawn_ipc_server;
use procwarden::orchestrator::{InstanceRegistry, LifecycleSettings};
use procwarden::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "procwarden", about = "Single-host process supervisor", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the instance record directory from the config file.
    #[arg(long)]
    instances_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("procwarden bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = GlobalConfig::load_from_path(&args.config)?;
    if let Some(dir) = args.instances_dir {
        config.instances_dir = Some(dir);
    }
    let records = config.all_instances()?;
    info!(records = records.len(), "configuration loaded");

    // ── Build registry and start enabled instances ──────
    let settings = LifecycleSettings::from(&config);
    let registry = Arc::new(InstanceRegistry::initialize(records, settings).await?);

    // ── Start control socket ────────────────────────────
    let ct = CancellationToken::new();
    let ipc_handle = match spawn_ipc_server(&config.ipc_name, Arc::clone(&registry), ct.clone()) {
        Ok(handle) => Some(handle),
        Err(err) => {
            error!(%err, "control socket unavailable; continuing without it");
            None
        }
    };

    info!(
        total = registry.total_count(),
        running = registry.running_count(),
        "procwarden ready"
    );

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();

    registry.shutdown().await;

    if let Some(handle) = ipc_handle {
        if let Err(err) = handle.await {
            warn!(%err, "IPC server task failed");
        }
    }
    info!("procwarden shut down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
