//! Burrow relay server
//!
//! Binds one HTTP listener serving the management API, the control-channel
//! attachment endpoint, and the public proxy ingress.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use burrow_control::IDLE_TUNNEL_MAX_AGE_HOURS;
use burrow_relay::{build_router, AppState, RelayConfig};

/// How often unattached, idle tunnels are swept.
const SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// Burrow relay - public endpoint for reverse HTTP tunnels
#[derive(Parser, Debug)]
#[command(
    name = "burrow-relay",
    about = "Accepts public HTTP traffic and forwards it to agents over control channels",
    version
)]
struct Args {
    /// Address to bind the HTTP listener to
    #[arg(long, env = "BURROW_BIND", default_value = "0.0.0.0:8080")]
    bind: SocketAddr,

    /// Advertised base URL (defaults to the bind address)
    #[arg(long, env = "BURROW_PUBLIC_URL")]
    public_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&args.log_level))
        .with_target(true)
        .init();

    let config = RelayConfig::new(args.bind, args.public_url);
    info!(bind = %config.bind, public_url = %config.public_url, "Starting burrow relay");

    let state = Arc::new(AppState::new(config.clone()));
    let router = build_router(state.clone());

    // Bound memory: drop tunnels nobody has touched in a day
    let sweeper_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        interval.tick().await;
        loop {
            interval.tick().await;
            let swept = sweeper_state
                .control
                .registry()
                .sweep_idle(chrono::Duration::hours(IDLE_TUNNEL_MAX_AGE_HOURS));
            if !swept.is_empty() {
                info!(count = swept.len(), "Swept idle tunnels");
            }
        }
    });

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;

    info!("Relay listening on {}", config.bind);

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
        .context("Relay server error")?;

    Ok(())
}
