//! Local origin forwarder
//!
//! Turns an `http_request` frame into a call against the origin next door
//! and always produces an `http_response` frame: 503 when the origin is
//! down, 500 when forwarding itself fails. One invocation per frame, each
//! on its own task, so a slow origin never stalls the channel.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::header::{HeaderName, HeaderValue};
use thiserror::Error;
use tracing::{debug, warn};

use burrow_proto::{is_hop_by_hop, Frame};

/// Deadline for the real forwarded request.
const FORWARD_TIMEOUT: Duration = Duration::from_secs(30);
/// Deadline for the is-anything-listening probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum ForwarderError {
    #[error("Invalid method '{0}'")]
    InvalidMethod(String),

    #[error("Origin request failed: {0}")]
    Upstream(#[from] reqwest::Error),
}

/// Forwards proxied requests to `http://127.0.0.1:{port}`.
pub struct OriginForwarder {
    client: reqwest::Client,
    base_url: String,
    local_port: u16,
}

impl OriginForwarder {
    pub fn new(local_port: u16) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: format!("http://127.0.0.1:{local_port}"),
            local_port,
        }
    }

    /// Handle one `http_request` frame end to end. Never errors: every
    /// failure becomes a reply frame carrying the original id.
    pub async fn handle(
        &self,
        request_id: String,
        method: String,
        path: String,
        headers: HashMap<String, String>,
        body: Option<String>,
    ) -> Frame {
        if !self.origin_alive().await {
            warn!(port = self.local_port, "Local origin is not responding");
            return error_reply(
                request_id,
                503,
                &format!("Local server on port {} is not running", self.local_port),
            );
        }

        match self.forward(&method, &path, headers, body).await {
            Ok((status, headers, body)) => {
                debug!(request_id, status, "Origin replied");
                Frame::HttpResponse {
                    request_id,
                    status,
                    headers,
                    body,
                }
            }
            Err(e) => {
                warn!(request_id, error = %e, "Forwarding to origin failed");
                error_reply(request_id, 500, &e.to_string())
            }
        }
    }

    /// Cheap liveness probe so a dead origin fails fast instead of eating
    /// the full forward deadline.
    async fn origin_alive(&self) -> bool {
        self.client
            .get(format!("{}/", self.base_url))
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .is_ok()
    }

    async fn forward(
        &self,
        method: &str,
        path: &str,
        headers: HashMap<String, String>,
        body: Option<String>,
    ) -> Result<(u16, HashMap<String, String>, String), ForwarderError> {
        let method = reqwest::Method::from_bytes(method.as_bytes())
            .map_err(|_| ForwarderError::InvalidMethod(method.to_string()))?;

        // The frame path already carries the query string
        let mut request = self
            .client
            .request(method, format!("{}{}", self.base_url, path))
            .timeout(FORWARD_TIMEOUT);

        for (name, value) in headers {
            if is_hop_by_hop(&name) {
                continue;
            }
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(&value),
            ) {
                request = request.header(name, value);
            }
        }

        if let Some(body) = body {
            request = request.body(body);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();

        let mut reply_headers = HashMap::new();
        for (name, value) in response.headers() {
            if is_hop_by_hop(name.as_str()) {
                continue;
            }
            if let Ok(value) = value.to_str() {
                reply_headers.insert(name.as_str().to_ascii_lowercase(), value.to_string());
            }
        }

        let body = response.text().await?;
        Ok((status, reply_headers, body))
    }
}

fn error_reply(request_id: String, status: u16, message: &str) -> Frame {
    Frame::HttpResponse {
        request_id,
        status,
        headers: HashMap::from([(
            "content-type".to_string(),
            "application/json".to_string(),
        )]),
        body: serde_json::json!({ "error": message }).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::routing::get;
    use axum::Router;

    /// Serve a stub origin on an ephemeral port.
    async fn spawn_origin(router: Router) -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        port
    }

    fn response_parts(frame: Frame) -> (String, u16, HashMap<String, String>, String) {
        match frame {
            Frame::HttpResponse {
                request_id,
                status,
                headers,
                body,
            } => (request_id, status, headers, body),
            other => panic!("Expected http_response, got {}", other.kind()),
        }
    }

    #[tokio::test]
    async fn test_forwards_to_origin() {
        let router = Router::new()
            .route("/", get(|| async { "root" }))
            .route("/hello", get(|| async { "ok" }));
        let port = spawn_origin(router).await;

        let forwarder = OriginForwarder::new(port);
        let frame = forwarder
            .handle(
                "r1".to_string(),
                "GET".to_string(),
                "/hello".to_string(),
                HashMap::new(),
                None,
            )
            .await;

        let (request_id, status, _, body) = response_parts(frame);
        assert_eq!(request_id, "r1");
        assert_eq!(status, 200);
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn test_query_string_reaches_origin() {
        let router = Router::new().route("/", get(|| async { "root" })).route(
            "/echo",
            get(
                |axum::extract::RawQuery(query): axum::extract::RawQuery| async move {
                    query.unwrap_or_default()
                },
            ),
        );
        let port = spawn_origin(router).await;

        let forwarder = OriginForwarder::new(port);
        let frame = forwarder
            .handle(
                "r2".to_string(),
                "GET".to_string(),
                "/echo?x=1&y=2".to_string(),
                HashMap::new(),
                None,
            )
            .await;

        let (_, status, _, body) = response_parts(frame);
        assert_eq!(status, 200);
        assert_eq!(body, "x=1&y=2");
    }

    #[tokio::test]
    async fn test_origin_down_is_503() {
        // Ephemeral port with nothing listening
        let dead_port = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let forwarder = OriginForwarder::new(dead_port);
        let frame = forwarder
            .handle(
                "r3".to_string(),
                "GET".to_string(),
                "/".to_string(),
                HashMap::new(),
                None,
            )
            .await;

        let (request_id, status, headers, body) = response_parts(frame);
        assert_eq!(request_id, "r3");
        assert_eq!(status, 503);
        assert_eq!(headers["content-type"], "application/json");
        assert!(body.contains("not running"));
    }

    #[tokio::test]
    async fn test_post_body_and_status_pass_through() {
        let router = Router::new().route("/", get(|| async { "root" })).route(
            "/submit",
            axum::routing::post(|body: String| async move {
                (axum::http::StatusCode::CREATED, format!("got:{body}"))
            }),
        );
        let port = spawn_origin(router).await;

        let forwarder = OriginForwarder::new(port);
        let frame = forwarder
            .handle(
                "r4".to_string(),
                "POST".to_string(),
                "/submit".to_string(),
                HashMap::new(),
                Some("hello".to_string()),
            )
            .await;

        let (_, status, _, body) = response_parts(frame);
        assert_eq!(status, 201);
        assert_eq!(body, "got:hello");
    }

    #[tokio::test]
    async fn test_hop_by_hop_headers_not_forwarded() {
        let router = Router::new().route("/", get(|| async { "root" })).route(
            "/headers",
            get(|headers: axum::http::HeaderMap| async move {
                headers
                    .get("x-custom")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("missing")
                    .to_string()
            }),
        );
        let port = spawn_origin(router).await;

        let forwarder = OriginForwarder::new(port);
        let frame = forwarder
            .handle(
                "r5".to_string(),
                "GET".to_string(),
                "/headers".to_string(),
                HashMap::from([
                    ("x-custom".to_string(), "kept".to_string()),
                    ("transfer-encoding".to_string(), "chunked".to_string()),
                ]),
                None,
            )
            .await;

        let (_, status, _, body) = response_parts(frame);
        assert_eq!(status, 200);
        assert_eq!(body, "kept");
    }
}
