//! Burrow agent
//!
//! Runs next to a private origin, registers a tunnel with the relay, holds
//! the control channel open, and answers `http_request` frames by calling
//! the origin. Reconnects with a capped, fixed-interval retry policy.

mod agent;
mod forwarder;
mod reconnect;

pub use agent::{Agent, AgentConfig, AgentError, TunnelHandle};
pub use forwarder::OriginForwarder;
pub use reconnect::{ReconnectConfig, ReconnectError, ReconnectManager};
