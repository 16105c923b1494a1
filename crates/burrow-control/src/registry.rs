//! Tunnel registry
//!
//! Owns the set of live tunnels and their metadata. All tunnel state is in
//! memory; a relay restart invalidates every outstanding attachment URL.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::TunnelError;
use crate::ids::short_id;

/// A single private-origin mapping and its attachment state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tunnel {
    /// Short URL-safe id, unique across live tunnels
    pub id: String,
    /// Port the agent claims to forward to; informational at the relay
    pub local_port: u16,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// Proxied requests successfully matched to a reply
    pub request_count: u64,
    /// True iff a control channel is currently attached
    pub connected: bool,
}

/// Registry of live tunnels, keyed by id. Mutations go through the entry
/// lock of the backing map; readers take snapshots.
pub struct TunnelRegistry {
    tunnels: DashMap<String, Tunnel>,
}

impl TunnelRegistry {
    pub fn new() -> Self {
        Self {
            tunnels: DashMap::new(),
        }
    }

    /// Create a tunnel. A caller-supplied id must be URL-safe and not
    /// currently live; without one, a fresh short id is drawn (regenerating
    /// on the off chance of a collision).
    pub fn create(
        &self,
        local_port: u16,
        preferred_id: Option<&str>,
    ) -> Result<Tunnel, TunnelError> {
        let id = match preferred_id {
            Some(requested) => {
                validate_id(requested)?;
                if self.tunnels.contains_key(requested) {
                    return Err(TunnelError::AlreadyExists(requested.to_string()));
                }
                requested.to_string()
            }
            None => loop {
                let candidate = short_id();
                if !self.tunnels.contains_key(&candidate) {
                    break candidate;
                }
            },
        };

        let now = Utc::now();
        let tunnel = Tunnel {
            id: id.clone(),
            local_port,
            created_at: now,
            last_activity: now,
            request_count: 0,
            connected: false,
        };

        self.tunnels.insert(id.clone(), tunnel.clone());
        info!(tunnel_id = %id, local_port, "Tunnel created");
        Ok(tunnel)
    }

    /// Snapshot of a single tunnel.
    pub fn get(&self, id: &str) -> Option<Tunnel> {
        self.tunnels.get(id).map(|t| t.value().clone())
    }

    /// Snapshot of all live tunnels.
    pub fn list(&self) -> Vec<Tunnel> {
        self.tunnels.iter().map(|t| t.value().clone()).collect()
    }

    /// Remove a tunnel record. Channel teardown and pending-request
    /// cancellation are the control plane's job.
    pub fn remove(&self, id: &str) -> Option<Tunnel> {
        let removed = self.tunnels.remove(id).map(|(_, t)| t);
        if removed.is_some() {
            info!(tunnel_id = %id, "Tunnel removed");
        }
        removed
    }

    /// Refresh `last_activity`.
    pub fn touch(&self, id: &str) {
        if let Some(mut tunnel) = self.tunnels.get_mut(id) {
            tunnel.last_activity = Utc::now();
        }
    }

    /// Count one successfully matched reply and refresh activity.
    pub fn record_request(&self, id: &str) {
        if let Some(mut tunnel) = self.tunnels.get_mut(id) {
            tunnel.request_count += 1;
            tunnel.last_activity = Utc::now();
        }
    }

    /// Flip the attachment flag. Returns false when the id is unknown.
    pub fn set_connected(&self, id: &str, connected: bool) -> bool {
        match self.tunnels.get_mut(id) {
            Some(mut tunnel) => {
                tunnel.connected = connected;
                tunnel.last_activity = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Remove unattached tunnels idle for longer than `max_idle`. Returns
    /// the removed ids.
    pub fn sweep_idle(&self, max_idle: Duration) -> Vec<String> {
        let cutoff = Utc::now() - max_idle;
        let stale: Vec<String> = self
            .tunnels
            .iter()
            .filter(|t| !t.connected && t.last_activity < cutoff)
            .map(|t| t.id.clone())
            .collect();

        for id in &stale {
            self.tunnels.remove(id);
            debug!(tunnel_id = %id, "Swept idle tunnel");
        }
        stale
    }

    pub fn len(&self) -> usize {
        self.tunnels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tunnels.is_empty()
    }

    /// Number of tunnels with an attached channel.
    pub fn connected_len(&self) -> usize {
        self.tunnels.iter().filter(|t| t.connected).count()
    }
}

impl Default for TunnelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_id(id: &str) -> Result<(), TunnelError> {
    let ok = !id.is_empty()
        && id.len() <= 63
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(TunnelError::BadRequest(format!(
            "Invalid tunnel id '{id}': use 1-63 URL-safe characters"
        )))
    }
}
