//! Control-channel attachment endpoint
//!
//! `GET /ws/{tunnelId}` upgrades to a WebSocket and binds the socket to the
//! tunnel. The reader half dispatches inbound frames; a single writer task
//! drains the egress queue, which keeps the channel single-writer no matter
//! how many proxied requests are in flight.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use bytes::Bytes;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::AppState;
use burrow_control::{Egress, HttpReply, CLOSE_POLICY_VIOLATION};
use burrow_proto::Frame;

/// Transport-level ping cadence for dead-connection detection.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Egress queue depth per channel.
const EGRESS_BUFFER: usize = 64;

/// `GET /ws/{tunnelId}`
pub async fn attach_channel(
    State(state): State<Arc<AppState>>,
    Path(tunnel_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_channel(state, tunnel_id, socket))
}

async fn handle_channel(state: Arc<AppState>, tunnel_id: String, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();

    // Attachment to an unknown tunnel is a policy violation; say why, then
    // close with 1002.
    if state.control.registry().get(&tunnel_id).is_none() {
        warn!(tunnel_id, "Channel attachment for unknown tunnel");
        let rejection = Frame::Error {
            message: format!("unknown tunnel '{tunnel_id}'"),
        };
        if let Ok(text) = rejection.encode() {
            let _ = sink.send(Message::Text(text.into())).await;
        }
        let _ = sink
            .send(Message::Close(Some(CloseFrame {
                code: CLOSE_POLICY_VIOLATION,
                reason: Utf8Bytes::from_static("unknown tunnel"),
            })))
            .await;
        return;
    }

    let (out_tx, out_rx) = mpsc::channel::<Egress>(EGRESS_BUFFER);
    let writer = tokio::spawn(write_egress(sink, out_rx, tunnel_id.clone()));

    // Queue the greeting before the hub can route any request here, so
    // `connected` is always the channel's first frame.
    let greeting = Frame::Connected {
        tunnel_id: tunnel_id.clone(),
        message: format!("Tunnel '{tunnel_id}' ready"),
    };
    if out_tx.send(Egress::Frame(greeting)).await.is_err() {
        return;
    }

    let conn_id = match state.control.attach_channel(&tunnel_id, out_tx.clone()) {
        Ok(conn_id) => conn_id,
        Err(e) => {
            // Tunnel deleted between the lookup and the attach
            warn!(tunnel_id, error = %e, "Channel attachment rejected");
            let _ = out_tx
                .send(Egress::Close(CLOSE_POLICY_VIOLATION))
                .await;
            return;
        }
    };

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => {
                handle_frame(&state, &tunnel_id, text.as_str(), &out_tx).await;
            }
            Ok(Message::Close(frame)) => {
                debug!(tunnel_id, ?frame, "Channel closed by agent");
                break;
            }
            // Transport pings are answered by the websocket layer itself;
            // pongs acknowledge our keepalive.
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(other) => {
                debug!(tunnel_id, "Ignoring non-text channel message: {other:?}");
            }
            Err(e) => {
                warn!(tunnel_id, error = %e, "Channel transport error");
                break;
            }
        }
    }

    state.control.detach_channel(&tunnel_id, conn_id);
    writer.abort();
    info!(tunnel_id, conn_id, "Channel reader finished");
}

/// Dispatch one inbound frame. Failures never terminate the channel.
async fn handle_frame(
    state: &Arc<AppState>,
    tunnel_id: &str,
    text: &str,
    out_tx: &mpsc::Sender<Egress>,
) {
    match Frame::decode(text) {
        Ok(Frame::HttpResponse {
            request_id,
            status,
            headers,
            body,
        }) => {
            let reply = HttpReply {
                status,
                headers,
                body,
            };
            if !state.control.on_response(tunnel_id, &request_id, reply) {
                debug!(tunnel_id, request_id, "Reply had no waiting request");
            }
        }
        Ok(Frame::Ping { timestamp }) => {
            state.control.registry().touch(tunnel_id);
            let _ = out_tx.send(Egress::Frame(Frame::Pong { timestamp })).await;
        }
        Ok(other) => {
            debug!(tunnel_id, kind = other.kind(), "Ignoring unexpected frame");
        }
        Err(e) => {
            warn!(tunnel_id, error = %e, "Dropping undecodable frame");
        }
    }
}

/// The channel's only writer: drains queued frames and emits keepalive
/// pings until told to close or the transport fails.
async fn write_egress(
    mut sink: SplitSink<WebSocket, Message>,
    mut out_rx: mpsc::Receiver<Egress>,
    tunnel_id: String,
) {
    let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
    keepalive.tick().await; // first tick is immediate

    loop {
        tokio::select! {
            egress = out_rx.recv() => match egress {
                Some(Egress::Frame(frame)) => {
                    let text = match frame.encode() {
                        Ok(text) => text,
                        Err(e) => {
                            error!(tunnel_id, error = %e, "Frame failed to serialize");
                            continue;
                        }
                    };
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        debug!(tunnel_id, "Channel sink closed, writer stopping");
                        break;
                    }
                }
                Some(Egress::Close(code)) => {
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: Utf8Bytes::from_static("tunnel closed"),
                        })))
                        .await;
                    break;
                }
                None => break,
            },
            _ = keepalive.tick() => {
                if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                    debug!(tunnel_id, "Keepalive failed, writer stopping");
                    break;
                }
            }
        }
    }
}
