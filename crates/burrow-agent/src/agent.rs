//! Agent runtime
//!
//! Registers a tunnel over the management API, attaches the control
//! channel, and pumps frames: inbound `http_request`s fan out to forwarder
//! tasks, replies and keepalives funnel through one writer task.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::forwarder::OriginForwarder;
use crate::reconnect::{ReconnectConfig, ReconnectError, ReconnectManager};
use burrow_proto::Frame;

/// Cadence of `ping` frames on the control channel.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
/// Deadline for management API calls.
const MANAGEMENT_TIMEOUT: Duration = Duration::from_secs(30);
/// Deadline for the startup health probe.
const HEALTH_TIMEOUT: Duration = Duration::from_secs(15);

/// Frames queued for the channel writer.
const EGRESS_BUFFER: usize = 64;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("HTTP client error: {0}")]
    Client(String),

    #[error("Relay health probe failed: {0}")]
    HealthProbe(String),

    #[error("Tunnel registration failed: {0}")]
    Registration(String),

    #[error("Control channel error: {0}")]
    Transport(String),

    #[error("Gave up reconnecting: {0}")]
    Reconnect(#[from] ReconnectError),
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Local origin port to expose
    pub local_port: u16,
    /// Relay base URL, e.g. `http://tunnel.example.com`
    pub server_url: String,
    /// Preferred tunnel id; the relay generates one when absent
    pub subdomain: Option<String>,
}

/// The relay's record of our tunnel, as returned by the create call.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelHandle {
    pub id: String,
    pub public_url: String,
    pub ws_url: String,
    pub local_port: u16,
}

#[derive(Debug, Deserialize)]
struct CreateResponse {
    tunnel: TunnelHandle,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: String,
}

pub struct Agent {
    config: AgentConfig,
    management: reqwest::Client,
    forwarder: Arc<OriginForwarder>,
    tunnel: Option<TunnelHandle>,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Result<Self, AgentError> {
        let management = reqwest::Client::builder()
            .timeout(MANAGEMENT_TIMEOUT)
            .build()
            .map_err(|e| AgentError::Client(e.to_string()))?;

        let forwarder = Arc::new(OriginForwarder::new(config.local_port));

        Ok(Self {
            config,
            management,
            forwarder,
            tunnel: None,
        })
    }

    /// Register the tunnel, then keep a channel attached until the
    /// reconnection budget runs out. Blocks for the agent's lifetime.
    pub async fn run(&mut self) -> Result<(), AgentError> {
        self.probe_relay().await?;

        let handle = self.create_tunnel().await?;
        info!(
            tunnel_id = %handle.id,
            public_url = %handle.public_url,
            "Tunnel registered"
        );
        self.tunnel = Some(handle.clone());

        let mut reconnect = ReconnectManager::new(ReconnectConfig::default());
        loop {
            match self.run_channel(&handle, &mut reconnect).await {
                Ok(()) => info!("Control channel closed by relay"),
                Err(e) => warn!(error = %e, "Control channel failed"),
            }

            reconnect.wait().await?;
            info!(
                attempt = reconnect.attempt(),
                "Reconnecting to {}", handle.ws_url
            );
        }
    }

    /// Best-effort cleanup on interrupt: the channel dropped with the run
    /// future; tell the relay to forget the tunnel.
    pub async fn shutdown(&self) {
        let Some(handle) = &self.tunnel else { return };

        info!(tunnel_id = %handle.id, "Deleting tunnel");
        let url = format!("{}/api/tunnel/{}", self.server_base(), handle.id);
        if let Err(e) = self.management.delete(url).send().await {
            warn!(error = %e, "Tunnel delete failed; the relay will sweep it");
        }
    }

    fn server_base(&self) -> &str {
        self.config.server_url.trim_end_matches('/')
    }

    async fn probe_relay(&self) -> Result<(), AgentError> {
        let url = format!("{}/health", self.server_base());
        let response = self
            .management
            .get(&url)
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
            .map_err(|e| AgentError::HealthProbe(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AgentError::HealthProbe(format!(
                "{url} returned {}",
                response.status()
            )));
        }
        debug!("Relay is healthy");
        Ok(())
    }

    async fn create_tunnel(&self) -> Result<TunnelHandle, AgentError> {
        let mut payload = serde_json::json!({ "localPort": self.config.local_port });
        if let Some(subdomain) = &self.config.subdomain {
            payload["subdomain"] = serde_json::json!(subdomain);
        }

        let response = self
            .management
            .post(format!("{}/api/tunnel/create", self.server_base()))
            .json(&payload)
            .send()
            .await
            .map_err(|e| AgentError::Registration(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response
                .json::<ApiError>()
                .await
                .map(|e| e.error)
                .unwrap_or_else(|_| status.to_string());
            return Err(AgentError::Registration(detail));
        }

        let created = response
            .json::<CreateResponse>()
            .await
            .map_err(|e| AgentError::Registration(format!("bad create response: {e}")))?;
        Ok(created.tunnel)
    }

    /// Attach one channel and pump it until it closes or errors.
    async fn run_channel(
        &self,
        handle: &TunnelHandle,
        reconnect: &mut ReconnectManager,
    ) -> Result<(), AgentError> {
        debug!(url = %handle.ws_url, "Opening control channel");
        let (channel, _) = connect_async(handle.ws_url.as_str())
            .await
            .map_err(|e| AgentError::Transport(e.to_string()))?;
        let (sink, mut stream) = channel.split();

        let (out_tx, out_rx) = mpsc::channel::<Frame>(EGRESS_BUFFER);
        let writer = tokio::spawn(write_frames(sink, out_rx));

        let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
        keepalive.tick().await; // first tick completes immediately

        let result = loop {
            tokio::select! {
                message = stream.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        self.handle_frame(text.as_str(), handle, &out_tx, reconnect);
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!(?frame, "Relay closed the channel");
                        break Ok(());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break Err(AgentError::Transport(e.to_string())),
                    None => break Ok(()),
                },
                _ = keepalive.tick() => {
                    let ping = Frame::Ping { timestamp: unix_timestamp() };
                    if out_tx.send(ping).await.is_err() {
                        break Err(AgentError::Transport("channel writer stopped".to_string()));
                    }
                }
            }
        };

        writer.abort();
        result
    }

    /// Dispatch one inbound frame. Each request becomes its own task so a
    /// slow origin never blocks the channel.
    fn handle_frame(
        &self,
        text: &str,
        handle: &TunnelHandle,
        out_tx: &mpsc::Sender<Frame>,
        reconnect: &mut ReconnectManager,
    ) {
        match Frame::decode(text) {
            Ok(Frame::Connected { tunnel_id, .. }) => {
                reconnect.reset();
                info!(
                    tunnel_id,
                    "Attached: {} -> http://127.0.0.1:{}",
                    handle.public_url,
                    self.config.local_port
                );
            }
            Ok(Frame::HttpRequest {
                id,
                method,
                path,
                headers,
                body,
                ..
            }) => {
                debug!(request_id = %id, method, path, "Request frame received");
                let forwarder = self.forwarder.clone();
                let out_tx = out_tx.clone();
                tokio::spawn(async move {
                    let reply = forwarder.handle(id, method, path, headers, body).await;
                    if out_tx.send(reply).await.is_err() {
                        warn!("Channel writer gone, dropping reply");
                    }
                });
            }
            Ok(Frame::Pong { .. }) => {
                debug!("Keepalive acknowledged");
            }
            Ok(Frame::Error { message }) => {
                warn!(message, "Relay reported an error");
            }
            Ok(other) => {
                debug!(kind = other.kind(), "Ignoring unexpected frame");
            }
            Err(e) => {
                warn!(error = %e, "Dropping undecodable frame");
            }
        }
    }
}

/// The channel's only writer.
async fn write_frames(
    mut sink: SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>,
    mut out_rx: mpsc::Receiver<Frame>,
) {
    while let Some(frame) = out_rx.recv().await {
        let text = match frame.encode() {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, "Frame failed to serialize");
                continue;
            }
        };
        if sink.send(Message::Text(text.into())).await.is_err() {
            debug!("Channel sink closed, writer stopping");
            break;
        }
    }
}

fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
