//! Control-channel frame types
//!
//! Every message on a control channel is a UTF-8 JSON object carrying a
//! `type` discriminator. Request/response pairs are correlated by id; the
//! transport imposes no ordering between distinct exchanges.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Frame encode/decode errors
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Failed to encode frame: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Failed to decode frame: {0}")]
    Decode(#[source] serde_json::Error),
}

/// A single message on the control channel
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// First frame sent by the relay after a successful attachment
    #[serde(rename_all = "camelCase")]
    Connected { tunnel_id: String, message: String },

    /// A public HTTP request forwarded to the agent
    HttpRequest {
        id: String,
        method: String,
        /// Origin-form path, query string included
        path: String,
        /// Parsed query parameters; agents prefer the query embedded in `path`
        query: HashMap<String, String>,
        headers: HashMap<String, String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        body: Option<String>,
    },

    /// The agent's reply to an `http_request`, matched by `requestId`
    #[serde(rename_all = "camelCase")]
    HttpResponse {
        request_id: String,
        status: u16,
        headers: HashMap<String, String>,
        body: String,
    },

    /// Agent keepalive
    Ping { timestamp: u64 },

    /// Relay reply to `ping`, timestamp echoed
    Pong { timestamp: u64 },

    /// Out-of-band error notification, either direction
    Error { message: String },
}

impl Frame {
    /// Serialize to the JSON text representation sent on the wire.
    pub fn encode(&self) -> Result<String, FrameError> {
        serde_json::to_string(self).map_err(FrameError::Encode)
    }

    /// Parse a frame from wire text. Callers log and drop failures; a bad
    /// frame never terminates the channel.
    pub fn decode(text: &str) -> Result<Self, FrameError> {
        serde_json::from_str(text).map_err(FrameError::Decode)
    }

    /// The `type` discriminator, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Connected { .. } => "connected",
            Frame::HttpRequest { .. } => "http_request",
            Frame::HttpResponse { .. } => "http_response",
            Frame::Ping { .. } => "ping",
            Frame::Pong { .. } => "pong",
            Frame::Error { .. } => "error",
        }
    }
}
