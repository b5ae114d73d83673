//! portgate: transparent TCP port-forwarding daemon.
//!
//! Reads the forwarder map (external/internal addresses plus the static port
//! map), binds every configured external port on IPv4 and IPv6, and relays
//! bytes between each inbound connection and its backend until either side
//! closes.

use clap::Parser;
use portgate_core::ForwardConfig;
use portgate_server::{Forwarder, ServerConfig};
use std::path::PathBuf;
use tracing::{error, info};

/// portgate — transparent TCP port forwarder
#[derive(Parser, Debug)]
#[command(name = "portgate", version, about = "Transparent TCP port forwarder")]
struct Cli {
    /// Settings file path (TOML)
    #[arg(long, default_value = "~/.portgate/config.toml")]
    config: String,

    /// Forwarder map file (overrides the settings file)
    #[arg(short, long)]
    map: Option<String>,

    /// Backend connect timeout in milliseconds
    #[arg(long)]
    connect_timeout_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting portgate");

    // Load server config (file + CLI overrides)
    let config_path = PathBuf::from(&cli.config);
    let server_config = match ServerConfig::load(
        Some(&config_path),
        cli.map.as_deref(),
        cli.connect_timeout_ms,
    ) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    // Load and validate the forwarder map
    let forward = match ForwardConfig::load(&server_config.map_path) {
        Ok(f) => f,
        Err(e) => {
            error!(path = %server_config.map_path.display(), error = %e, "failed to load forwarder map");
            std::process::exit(1);
        }
    };

    let forwarder = Forwarder::new(server_config, forward);

    // Fire the shutdown channel on SIGINT/SIGTERM
    let shutdown = forwarder.shutdown_handle();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("received shutdown signal");
        shutdown.signal();
    });

    if let Err(e) = forwarder.run().await {
        error!(error = %e, "forwarder error");
        std::process::exit(1);
    }

    info!("portgate stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
