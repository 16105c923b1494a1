//! Burrow relay
//!
//! Accepts public HTTP requests on behalf of agents behind NAT, ferries
//! them over per-tunnel control channels, and returns the agents' replies.
//! Three surfaces share one router: the management API, the WebSocket
//! attachment endpoint, and the `/t/{id}/…` proxy ingress.

pub mod api;
pub mod config;
pub mod ingress;
pub mod ws;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use axum::{Json, Router};
use serde_json::json;

use burrow_control::{ControlPlane, TunnelError};
pub use config::RelayConfig;

/// Shared state behind every handler.
pub struct AppState {
    pub control: Arc<ControlPlane>,
    pub config: RelayConfig,
}

impl AppState {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            control: Arc::new(ControlPlane::new()),
            config,
        }
    }
}

/// Assemble the relay router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(api::health))
        .route("/api/tunnel/create", post(api::create_tunnel))
        .route("/api/tunnels", get(api::list_tunnels))
        .route(
            "/api/tunnel/{id}",
            get(api::get_tunnel).delete(api::delete_tunnel),
        )
        .route("/ws/{id}", get(ws::attach_channel))
        .route("/t/{*path}", any(ingress::proxy_any))
        .with_state(state)
}

/// HTTP status for each core error kind.
pub fn status_for(err: &TunnelError) -> StatusCode {
    match err {
        TunnelError::NotFound(_) => StatusCode::NOT_FOUND,
        TunnelError::AlreadyExists(_) => StatusCode::CONFLICT,
        TunnelError::NotConnected(_) => StatusCode::SERVICE_UNAVAILABLE,
        TunnelError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        TunnelError::ChannelDropped | TunnelError::TunnelGone | TunnelError::SendFailed => {
            StatusCode::BAD_GATEWAY
        }
        TunnelError::BadRequest(_) => StatusCode::BAD_REQUEST,
        TunnelError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// JSON error response in the shape the management API and ingress share.
pub(crate) fn error_response(err: &TunnelError) -> Response {
    (status_for(err), Json(json!({ "error": err.to_string() }))).into_response()
}
