//! Error kinds surfaced by the relay core

use thiserror::Error;

/// Everything that can go wrong while managing tunnels or proxying through
/// them. The relay maps each kind to a single HTTP status; nothing is
/// retried internally and the tunnel stays up.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TunnelError {
    #[error("Tunnel '{0}' not found")]
    NotFound(String),

    #[error("Tunnel '{0}' already exists")]
    AlreadyExists(String),

    #[error("No agent connected for tunnel '{0}'")]
    NotConnected(String),

    #[error("Timed out waiting for agent response")]
    Timeout,

    #[error("Control channel dropped")]
    ChannelDropped,

    #[error("Tunnel was deleted")]
    TunnelGone,

    #[error("Failed to send frame to agent")]
    SendFailed,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
