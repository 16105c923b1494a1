//! Burrow agent binary
//!
//! Expose a local HTTP server through a burrow relay:
//!
//! ```bash
//! # Tunnel localhost:3000 through a local relay
//! burrow-agent --port 3000
//!
//! # Remote relay and a preferred tunnel id
//! burrow-agent -p 8000 -s https://tunnel.example.com -d myapp
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use burrow_agent::{Agent, AgentConfig};

/// Burrow agent - expose a local HTTP server through a burrow relay
#[derive(Parser, Debug)]
#[command(
    name = "burrow-agent",
    about = "Forwards public tunnel traffic to a local HTTP server",
    version
)]
struct Args {
    /// Local port to expose
    #[arg(short = 'p', long = "port", env = "TUNNEL_PORT", default_value_t = 3000)]
    port: u16,

    /// Relay server base URL
    #[arg(
        short = 's',
        long = "server",
        env = "TUNNEL_SERVER",
        default_value = "http://localhost:8080"
    )]
    server: String,

    /// Preferred tunnel id (subdomain); generated by the relay if omitted
    #[arg(short = 'd', long = "subdomain")]
    subdomain: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&args.log_level))
        .with_target(false)
        .init();

    info!("Starting burrow agent");
    info!("  Local port: {}", args.port);
    info!("  Relay: {}", args.server);
    if let Some(subdomain) = &args.subdomain {
        info!("  Requested id: {}", subdomain);
    }

    let config = AgentConfig {
        local_port: args.port,
        server_url: args.server,
        subdomain: args.subdomain,
    };
    let mut agent = Agent::new(config).context("Failed to create agent")?;

    tokio::select! {
        result = agent.run() => {
            if let Err(e) = result {
                error!("Agent error: {e}");
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            agent.shutdown().await;
        }
    }

    info!("Agent stopped");
    Ok(())
}
