//! Control channel hub
//!
//! Tracks the one live channel per tunnel and routes outbound frames to it.
//! Each channel has a single writer task draining an egress queue; the queue
//! sender is the per-channel serialization point, so frames never interleave
//! on the wire.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::TunnelError;
use burrow_proto::Frame;

/// Normal closure; sent on explicit delete, preemption, and shutdown.
pub const CLOSE_NORMAL: u16 = 1000;
/// Bad attachment path or unknown tunnel id.
pub const CLOSE_POLICY_VIOLATION: u16 = 1002;

/// What a channel's writer task pulls off its egress queue
#[derive(Debug)]
pub enum Egress {
    Frame(Frame),
    /// Close the transport with the given code and stop writing
    Close(u16),
}

struct AgentChannel {
    /// Attachment epoch; detach only tears down a matching attachment
    conn_id: u64,
    outbound: mpsc::Sender<Egress>,
}

/// One attached channel per tunnel, new attachment wins.
pub struct ChannelHub {
    channels: Arc<DashMap<String, AgentChannel>>,
    next_conn_id: AtomicU64,
}

impl ChannelHub {
    pub fn new() -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            next_conn_id: AtomicU64::new(1),
        }
    }

    /// Attach a channel, displacing any previous one (which is told to close
    /// with [`CLOSE_NORMAL`]). Returns the attachment id and whether a
    /// previous channel was displaced.
    pub fn attach(&self, tunnel_id: &str, outbound: mpsc::Sender<Egress>) -> (u64, bool) {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let previous = self
            .channels
            .insert(tunnel_id.to_string(), AgentChannel { conn_id, outbound });

        let preempted = previous.is_some();
        if let Some(old) = previous {
            debug!(tunnel_id, old_conn = old.conn_id, new_conn = conn_id, "Channel preempted");
            let _ = old.outbound.try_send(Egress::Close(CLOSE_NORMAL));
        }
        (conn_id, preempted)
    }

    /// Remove the attachment, but only if `conn_id` still matches: a reader
    /// that was preempted must not tear down its successor.
    pub fn detach(&self, tunnel_id: &str, conn_id: u64) -> bool {
        self.channels
            .remove_if(tunnel_id, |_, channel| channel.conn_id == conn_id)
            .is_some()
    }

    /// Queue a frame for the tunnel's channel.
    pub async fn send(&self, tunnel_id: &str, frame: Frame) -> Result<(), TunnelError> {
        let outbound = self
            .channels
            .get(tunnel_id)
            .map(|channel| channel.outbound.clone())
            .ok_or_else(|| TunnelError::NotConnected(tunnel_id.to_string()))?;

        outbound.send(Egress::Frame(frame)).await.map_err(|_| {
            warn!(tunnel_id, "Channel writer gone, frame not sent");
            TunnelError::SendFailed
        })
    }

    /// Close and remove the tunnel's channel, if any.
    pub async fn close(&self, tunnel_id: &str, code: u16) -> bool {
        match self.channels.remove(tunnel_id) {
            Some((_, channel)) => {
                let _ = channel.outbound.send(Egress::Close(code)).await;
                debug!(tunnel_id, code, "Channel closed");
                true
            }
            None => false,
        }
    }

    pub fn is_attached(&self, tunnel_id: &str) -> bool {
        self.channels.contains_key(tunnel_id)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

impl Default for ChannelHub {
    fn default() -> Self {
        Self::new()
    }
}
