//! Translation Gateway Daemon
//!
//! Serves the chat-completions style translation endpoint on top of
//! `gateway-core`.
//!
//! # Usage
//!
//! ```bash
//! # Start with the default config file
//! translate-gateway
//!
//! # Explicit config and listen address
//! translate-gateway --config ./gateway.toml --host 0.0.0.0 --port 5050
//!
//! # Verbose logging
//! RUST_LOG=debug translate-gateway
//! ```
//!
//! # Signals
//!
//! - `SIGTERM` / `SIGINT`: stop accepting requests, stop the side channels,
//!   persist cookies and close every chat session

mod server;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};

use gateway_core::config::{default_config_path, load_config_from_path, ConfigOverrides};
use gateway_core::Gateway;

/// Translation Gateway - paragraph-preserving translation proxy
#[derive(Parser, Debug)]
#[command(name = "translate-gateway")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "GATEWAY_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Listen host (overrides config)
    #[arg(long, value_name = "HOST")]
    host: Option<String>,

    /// Listen port (overrides config)
    #[arg(short = 'p', long, value_name = "PORT")]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "GATEWAY_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

/// Initialize logging with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("gateway_daemon={level},gateway_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();
}

/// Resolve once SIGTERM or SIGINT arrives
async fn shutdown_signal() {
    let (mut sigterm, mut sigint) =
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(term), Ok(int)) => (term, int),
            (Err(e), _) | (_, Err(e)) => {
                error!(error = %e, "Failed to install signal handlers, falling back to ctrl-c");
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!(error = %e, "Failed to listen for ctrl-c");
                }
                return;
            }
        };

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM, initiating shutdown"),
        _ = sigint.recv() => info!("Received SIGINT, initiating shutdown"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging first
    init_logging(&args.log_level);

    info!("Translation Gateway starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config_path = args.config.or_else(default_config_path);
    let mut config =
        load_config_from_path(config_path.clone()).context("Failed to load configuration")?;

    let mut overrides = ConfigOverrides::new();
    if let Some(host) = args.host {
        overrides = overrides.with_host(host);
    }
    if let Some(port) = args.port {
        overrides = overrides.with_port(port);
    }
    overrides.apply(&mut config);

    config.validate().context("Invalid configuration")?;
    info!(
        config_path = ?config_path,
        source = %config.source(),
        text_backend = %config.translation.text_backend,
        "Configuration loaded"
    );

    let gateway = Arc::new(
        Gateway::from_config(&config)
            .await
            .context("Failed to build gateway")?,
    );
    gateway.start().await;

    let result = server::serve(
        &config.server.bind_address(),
        &config.server.route,
        Arc::clone(&gateway),
        shutdown_signal(),
    )
    .await;

    info!("Shutting down...");
    gateway.shutdown().await;

    match result {
        Ok(()) => {
            info!("Translation gateway stopped cleanly");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Gateway stopped with error");
            Err(e)
        }
    }
}
