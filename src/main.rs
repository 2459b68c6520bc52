//! autosign - Unattended signing policy core
//!
//! Decides, without a person at the device, whether a signing request may
//! proceed. A policy document describes what is allowed:
//! - Transaction rules (amount caps, velocity, whitelists, user quorums)
//! - Message signing paths, XPUB and address sharing
//! - A one-time storage locker secret and how often it may be read
//!
//! Every decision is written to the audit medium when one is present.
//!
//! # Usage
//!
//! ```bash
//! # Requests are JSON lines on stdin, responses JSON lines on stdout
//! autosign --config /etc/autosign/autosign.toml
//!
//! echo '{"op":"status"}' | autosign
//! ```

mod api;
mod audit;
mod auth;
mod config;
mod device;
mod errors;
mod policy;
mod secrets;
mod security;

#[cfg(test)]
mod testing;

use crate::api::AppState;
use crate::audit::{AuditMedium, DirectoryMedium, NoMedium};
use crate::config::{Config, LoggingConfig};
use crate::device::{ConfiguredUsers, DeviceEnv, DeviceSession, StaticWallets, SystemClock};
use crate::errors::Result;
use crate::secrets::FileSecretStore;
use std::env;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info, warn};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = config_arg();
    let config = Config::load(config_path.as_deref())?;
    config.validate()?;

    init_logging(&config.logging);
    info!("Starting autosign v{}", VERSION);

    let mut session = DeviceSession::new(build_env(&config));

    if config.device.auto_activate && session.policy_available() {
        let activated = match session.stage_saved() {
            Ok(_) => session.activate(false),
            Err(e) => Err(e),
        };
        match activated {
            Ok(()) => info!("Saved policy activated"),
            Err(e) => error!("Could not activate saved policy: {}", e),
        }
    }

    let state = Arc::new(AppState::new(session));

    tokio::select! {
        res = serve_stdin(state) => res?,
        _ = shutdown_signal() => {}
    }

    info!("Shut down gracefully");
    Ok(())
}

/// `--config <path>`, if given
fn config_arg() -> Option<String> {
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next();
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(path.to_string());
        }
    }
    None
}

/// Initialize logging. Logs go to stderr; stdout carries responses.
fn init_logging(cfg: &LoggingConfig) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cfg.level));

    let registry = tracing_subscriber::registry().with(filter);
    if cfg.format == "json" {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn build_env(config: &Config) -> DeviceEnv {
    let audit: Arc<dyn AuditMedium> = match &config.storage.audit_root {
        Some(root) => Arc::new(DirectoryMedium::new(root)),
        None => Arc::new(NoMedium),
    };

    DeviceEnv {
        users: Arc::new(ConfiguredUsers::new(&config.device.users)),
        wallets: Arc::new(StaticWallets::new(config.device.wallets.clone())),
        secrets: Arc::new(FileSecretStore::new(&config.storage.secret_path)),
        audit,
        clock: Arc::new(SystemClock),
        policy_path: config.storage.policy_path.clone(),
    }
}

/// Answer requests from stdin until it closes
async fn serve_stdin(state: Arc<AppState>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let mut out = state.handle_line(line).await;
        out.push('\n');
        stdout.write_all(out.as_bytes()).await?;
        stdout.flush().await?;
    }

    warn!("Request stream closed");
    Ok(())
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}
