//! sealkeepd - replace-then-lock file service.
//!
//! Listens on a Unix socket and executes Modify, Delete,
//! Incremental-Update and Get-Info requests against a managed directory.
//! Runs in the foreground; SIGTERM or SIGINT stops accepting, lets
//! in-flight requests finish, and removes the socket file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use sealkeep_core::{SealkeepConfig, SystemClock};
use sealkeep_daemon::protocol::{SocketManager, SocketManagerConfig};
use sealkeep_daemon::{ServerContext, run_server};
use tokio::signal::unix::{SignalKind, signal};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Configuration file read when `--config` is not given, if present.
const DEFAULT_CONFIG_FILE: &str = "sealkeep.toml";

#[derive(Parser, Debug)]
#[command(name = "sealkeepd", version, about = "Replace-then-lock file service")]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to the listening Unix socket
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Managed root directory
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log to file instead of stdout
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level, args.log_file.as_deref())?;

    let mut config = load_config(args.config.as_deref())?;
    if let Some(socket) = args.socket {
        config.daemon.socket_path = socket;
    }
    if let Some(data_dir) = args.data_dir {
        config.daemon.data_dir = data_dir;
    }

    std::fs::create_dir_all(&config.daemon.data_dir).with_context(|| {
        format!(
            "failed to create data directory {}",
            config.daemon.data_dir.display()
        )
    })?;

    let ctx = Arc::new(
        ServerContext::from_config(&config, Arc::new(SystemClock))
            .context("failed to initialize server")?,
    );

    let socket_manager =
        SocketManager::bind(SocketManagerConfig::from_daemon_config(&config.daemon))
            .context("failed to bind socket")?;

    info!(
        data_dir = %config.daemon.data_dir.display(),
        min_retention_hours = config.retention.min_retention_hours,
        label_backend = ?config.label.backend,
        "sealkeepd starting"
    );

    // Handle Unix signals
    let mut sigterm = signal(SignalKind::terminate()).context("failed to register SIGTERM")?;
    let mut sigint = signal(SignalKind::interrupt()).context("failed to register SIGINT")?;
    let signal_ctx = Arc::clone(&ctx);
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        signal_ctx.request_shutdown();
    });

    run_server(socket_manager, ctx).await
}

fn init_logging(level: &str, log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    if let Some(log_file) = log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .with_context(|| format!("failed to open log file {}", log_file.display()))?;

        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_ansi(false),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<SealkeepConfig> {
    match path {
        Some(path) => SealkeepConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            SealkeepConfig::from_file(Path::new(DEFAULT_CONFIG_FILE))
                .with_context(|| format!("failed to load config from {DEFAULT_CONFIG_FILE}"))
        },
        None => {
            info!("No configuration file, using defaults");
            Ok(SealkeepConfig::default())
        },
    }
}
