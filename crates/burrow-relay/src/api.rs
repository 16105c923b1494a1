//! Management API
//!
//! Consumed by agents at startup/shutdown and by operators. All bodies are
//! JSON with camelCase fields.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::{error_response, AppState};
use burrow_control::TunnelError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTunnelRequest {
    pub local_port: Option<u16>,
    pub subdomain: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedTunnel {
    pub id: String,
    pub public_url: String,
    pub ws_url: String,
    pub local_port: u16,
    pub created_at: DateTime<Utc>,
}

/// `POST /api/tunnel/create`
pub async fn create_tunnel(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateTunnelRequest>,
) -> Response {
    let Some(local_port) = request.local_port else {
        return error_response(&TunnelError::BadRequest(
            "localPort is required".to_string(),
        ));
    };

    match state
        .control
        .registry()
        .create(local_port, request.subdomain.as_deref())
    {
        Ok(tunnel) => {
            info!(tunnel_id = %tunnel.id, local_port, "Tunnel registered via API");
            let created = CreatedTunnel {
                public_url: state.config.tunnel_url(&tunnel.id),
                ws_url: state.config.channel_url(&tunnel.id),
                id: tunnel.id,
                local_port: tunnel.local_port,
                created_at: tunnel.created_at,
            };
            Json(json!({ "success": true, "tunnel": created })).into_response()
        }
        Err(e) => error_response(&e),
    }
}

/// `GET /api/tunnels`
pub async fn list_tunnels(State(state): State<Arc<AppState>>) -> Response {
    let tunnels = state.control.registry().list();
    debug!(count = tunnels.len(), "Listing tunnels");
    Json(json!({ "tunnels": tunnels })).into_response()
}

/// `GET /api/tunnel/{id}`
pub async fn get_tunnel(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match state.control.registry().get(&id) {
        Some(tunnel) => Json(tunnel).into_response(),
        None => error_response(&TunnelError::NotFound(id)),
    }
}

/// `DELETE /api/tunnel/{id}`: closes any attached channel and fails the
/// tunnel's in-flight requests before removing the record.
pub async fn delete_tunnel(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match state.control.delete_tunnel(&id).await {
        Ok(tunnel) => Json(json!({
            "success": true,
            "message": format!("Tunnel '{}' deleted", tunnel.id),
        }))
        .into_response(),
        Err(e) => error_response(&e),
    }
}

/// `GET /health`
pub async fn health(State(state): State<Arc<AppState>>) -> Response {
    let registry = state.control.registry();
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now(),
        "activeTunnels": registry.len(),
        "connectedTunnels": registry.connected_len(),
        "pendingRequests": state.control.pending().len(),
    }))
    .into_response()
}
