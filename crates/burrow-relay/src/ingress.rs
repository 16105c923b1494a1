//! Public proxy ingress
//!
//! `ANY /t/{id}/{rest...}` converts the caller's HTTP exchange to a frame,
//! dispatches it through the control plane, and writes the agent's reply
//! back. The caller sees exactly one mapped status per request; nothing is
//! retried.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::header::{HeaderName, HeaderValue};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::{debug, warn};

use crate::{error_response, AppState};
use burrow_control::{ProxiedRequest, TunnelError};
use burrow_proto::is_hop_by_hop;

/// Whole-body limit; bodies are materialized, not streamed.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// `ANY /t/{id}/{rest...}`: one wildcard route so `/t/{id}`, `/t/{id}/`,
/// and deeper paths all land here; the tunnel id is the first segment.
pub async fn proxy_any(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    request: Request,
) -> Response {
    let (tunnel_id, rest) = match path.split_once('/') {
        Some((id, rest)) => (id.to_string(), rest.to_string()),
        None => (path, String::new()),
    };
    proxy(state, tunnel_id, rest, request).await
}

async fn proxy(state: Arc<AppState>, tunnel_id: String, rest: String, request: Request) -> Response {
    let Some(tunnel) = state.control.registry().get(&tunnel_id) else {
        return error_response(&TunnelError::NotFound(tunnel_id));
    };

    if !tunnel.connected {
        // Tell the caller which agent is missing rather than a bare 503
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "error": format!("Tunnel '{}' has no agent connected", tunnel.id),
                "tunnelId": tunnel.id,
                "localPort": tunnel.local_port,
                "hint": format!(
                    "Start the agent with --port {} to serve this tunnel",
                    tunnel.local_port
                ),
            })),
        )
            .into_response();
    }

    let method = request.method().clone();
    let raw_query = request.uri().query().map(str::to_string);

    let mut headers = HashMap::new();
    for (name, value) in request.headers() {
        if is_hop_by_hop(name.as_str()) {
            continue;
        }
        if let Ok(value) = value.to_str() {
            headers.insert(name.as_str().to_ascii_lowercase(), value.to_string());
        }
    }

    let query: HashMap<String, String> = raw_query
        .as_deref()
        .map(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .into_owned()
                .collect()
        })
        .unwrap_or_default();

    let mut path = format!("/{rest}");
    if let Some(q) = &raw_query {
        path.push('?');
        path.push_str(q);
    }

    let body = if method == Method::GET || method == Method::HEAD {
        None
    } else {
        match axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES).await {
            Ok(bytes) if bytes.is_empty() => None,
            Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) => {
                warn!(tunnel_id = %tunnel.id, error = %e, "Failed to read request body");
                return error_response(&TunnelError::BadRequest(
                    "could not read request body".to_string(),
                ));
            }
        }
    };

    debug!(tunnel_id = %tunnel.id, method = %method, path, "Proxying request");

    let proxied = ProxiedRequest {
        method: method.to_string(),
        path,
        query,
        headers,
        body,
    };

    match state.control.dispatch(&tunnel.id, proxied).await {
        Ok(reply) => {
            state.control.registry().record_request(&tunnel.id);

            let status =
                StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            let mut response = Response::builder().status(status);
            for (name, value) in &reply.headers {
                if is_hop_by_hop(name) {
                    continue;
                }
                if let (Ok(name), Ok(value)) = (
                    HeaderName::from_bytes(name.as_bytes()),
                    HeaderValue::from_str(value),
                ) {
                    response = response.header(name, value);
                }
            }
            response
                .body(Body::from(reply.body))
                .unwrap_or_else(|e| {
                    warn!(tunnel_id = %tunnel.id, error = %e, "Reply could not be written");
                    error_response(&TunnelError::Internal("malformed agent reply".to_string()))
                })
        }
        Err(e) => {
            debug!(tunnel_id = %tunnel.id, error = %e, "Proxied request failed");
            error_response(&e)
        }
    }
}
