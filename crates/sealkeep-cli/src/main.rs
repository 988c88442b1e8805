//! sealkeep - command-line client for sealkeepd.
//!
//! Sends one request per invocation and prints the daemon's response.
//! Exits 0 when the response reports success, 1 otherwise.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sealkeep_core::SealkeepConfig;
use sealkeep_core::config::{AuthConfig, default_socket_path};
use secrecy::SecretString;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod commands;

use commands::Target;

/// sealkeep - replace-then-lock file client
#[derive(Parser, Debug)]
#[command(name = "sealkeep")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "sealkeep.toml")]
    config: PathBuf,

    /// Path to Unix socket
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Shared token (falls back to the configured token source)
    #[arg(long, env = "SEALKEEP_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Per-step timeout in seconds
    #[arg(long, default_value = "30")]
    timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replace a file's contents
    Modify {
        /// Path relative to the managed root
        path: String,

        /// Read contents from this file instead of stdin
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Delete a file once its retention period has passed
    #[command(alias = "rm")]
    Delete {
        /// Path relative to the managed root
        path: String,
    },

    /// Merge new contents into a file in place
    Update {
        /// Path relative to the managed root
        path: String,

        /// Read contents from this file instead of stdin
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Show the info record for a file
    Info {
        /// Path relative to the managed root
        path: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = load_config(&cli.config)?;
    let socket_path = cli
        .socket
        .clone()
        .or_else(|| config.as_ref().map(|c| c.daemon.socket_path.clone()))
        .unwrap_or_else(default_socket_path);
    let token = resolve_token(cli.token.clone(), config.as_ref())?;

    let target = Target {
        socket_path,
        token,
        timeout: Duration::from_secs(cli.timeout),
    };
    debug!(socket = %target.socket_path.display(), "Using socket");

    let succeeded = match cli.command {
        Commands::Modify { path, file } => commands::file::modify(&target, &path, file.as_deref()),
        Commands::Delete { path } => commands::file::delete(&target, &path),
        Commands::Update { path, file } => commands::file::update(&target, &path, file.as_deref()),
        Commands::Info { path } => commands::file::info(&target, &path),
    }?;

    if !succeeded {
        std::process::exit(1);
    }
    Ok(())
}

/// Loads the config file if it exists.
fn load_config(path: &Path) -> Result<Option<SealkeepConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    SealkeepConfig::from_file(path)
        .map(Some)
        .with_context(|| format!("failed to load config from {}", path.display()))
}

fn resolve_token(flag: Option<String>, config: Option<&SealkeepConfig>) -> Result<SecretString> {
    if let Some(token) = flag.filter(|t| !t.is_empty()) {
        return Ok(SecretString::from(token));
    }
    let resolved = match config {
        Some(config) => config.auth.resolve_token(),
        None => AuthConfig::default().resolve_token(),
    };
    resolved.context("no shared token available (see --token)")
}
