//! warden-server: access-control gateway.
//!
//! Sits in front of a tunneling engine, a set of asset mirrors, and a static
//! site. Enforces the banned-address list, the hot-reloaded blocklist, and one
//! client address per login before anything reaches those backends.

mod app;
mod auth;
mod config;
mod dispatcher;
mod response;
mod server;
mod tunnel;

use anyhow::Context;
use clap::Parser;
use config::ServerConfig;
use server::WardenServer;
use std::path::PathBuf;
use tracing::{error, info};

/// warden-server — access-control gateway
#[derive(Parser, Debug)]
#[command(name = "warden-server", version, about = "Access-control gateway")]
struct Cli {
    /// Listen port
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,

    /// Bind address
    #[arg(long)]
    bind: Option<String>,

    /// Config file path
    #[arg(long, default_value = "warden.toml")]
    config: String,

    /// Directory of the static site
    #[arg(long)]
    static_dir: Option<String>,

    /// Blocklist JSON file
    #[arg(long)]
    blocklist: Option<String>,

    /// Tunnel engine address (host:port)
    #[arg(long)]
    tunnel_backend: Option<String>,

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

    info!(version = env!("CARGO_PKG_VERSION"), "starting warden-server");

    let server = match build(&cli) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %format!("{e:#}"), "failed to start");
            std::process::exit(1);
        }
    };

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!(error = %e, "server error");
                std::process::exit(1);
            }
        }
        _ = shutdown_signal() => {
            info!("received shutdown signal");
        }
    }

    info!("warden-server stopped");
}

/// Load config (file + CLI overrides) and assemble the server.
fn build(cli: &Cli) -> anyhow::Result<WardenServer> {
    let config_path = PathBuf::from(&cli.config);
    let server_config = ServerConfig::load(
        Some(&config_path),
        cli.port,
        cli.bind.as_deref(),
        cli.static_dir.as_deref(),
        cli.blocklist.as_deref(),
        cli.tunnel_backend.as_deref(),
    )
    .context("failed to load config")?;

    info!(
        addr = %server_config.listen,
        static_dir = %server_config.static_dir.display(),
        "configuration resolved"
    );

    WardenServer::new(server_config).context("failed to create server")
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
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
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
