//! Burrow control plane
//!
//! The relay-side core: tunnel registry, control channel hub, and the
//! request correlator that parks public HTTP exchanges until the agent's
//! reply comes back over the channel.

mod error;
mod hub;
mod ids;
mod pending;
mod registry;

pub use error::TunnelError;
pub use hub::{ChannelHub, Egress, CLOSE_NORMAL, CLOSE_POLICY_VIOLATION};
pub use ids::short_id;
pub use pending::{HttpReply, PendingRequests};
pub use registry::{Tunnel, TunnelRegistry};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info};

use burrow_proto::Frame;

/// End-to-end deadline for a proxied request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Unattached tunnels idle past this many hours are swept.
pub const IDLE_TUNNEL_MAX_AGE_HOURS: i64 = 24;

/// A public HTTP request, already stripped of hop-by-hop headers and with
/// its body materialized, ready to be framed for the agent.
#[derive(Debug, Clone)]
pub struct ProxiedRequest {
    pub method: String,
    /// Origin-form path, query string included
    pub path: String,
    pub query: HashMap<String, String>,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
}

/// Bundles the registry, hub, and pending tracker, and owns the
/// correlation flow between them.
pub struct ControlPlane {
    registry: Arc<TunnelRegistry>,
    hub: Arc<ChannelHub>,
    pending: PendingRequests,
}

impl ControlPlane {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(TunnelRegistry::new()),
            hub: Arc::new(ChannelHub::new()),
            pending: PendingRequests::new(),
        }
    }

    pub fn registry(&self) -> &TunnelRegistry {
        &self.registry
    }

    pub fn hub(&self) -> &ChannelHub {
        &self.hub
    }

    pub fn pending(&self) -> &PendingRequests {
        &self.pending
    }

    /// Attach a freshly upgraded channel for `tunnel_id`. A displaced
    /// predecessor is closed and its in-flight requests fail with
    /// [`TunnelError::ChannelDropped`]; they were sent on a channel that no
    /// longer exists.
    pub fn attach_channel(
        &self,
        tunnel_id: &str,
        outbound: mpsc::Sender<Egress>,
    ) -> Result<u64, TunnelError> {
        if self.registry.get(tunnel_id).is_none() {
            return Err(TunnelError::NotFound(tunnel_id.to_string()));
        }

        let (conn_id, preempted) = self.hub.attach(tunnel_id, outbound);
        if preempted {
            self.pending
                .cancel_tunnel(tunnel_id, TunnelError::ChannelDropped);
        }
        self.registry.set_connected(tunnel_id, true);
        info!(tunnel_id, conn_id, preempted, "Agent channel attached");
        Ok(conn_id)
    }

    /// Tear down after a channel's reader exits. No-op when the attachment
    /// was already displaced by a newer one.
    pub fn detach_channel(&self, tunnel_id: &str, conn_id: u64) {
        if self.hub.detach(tunnel_id, conn_id) {
            self.registry.set_connected(tunnel_id, false);
            let cancelled = self
                .pending
                .cancel_tunnel(tunnel_id, TunnelError::ChannelDropped);
            info!(tunnel_id, conn_id, cancelled, "Agent channel detached");
        }
    }

    /// Forward a public request to the agent and suspend until the matching
    /// reply, a failure, or the 30 s deadline.
    pub async fn dispatch(
        &self,
        tunnel_id: &str,
        request: ProxiedRequest,
    ) -> Result<HttpReply, TunnelError> {
        self.dispatch_with_deadline(tunnel_id, request, REQUEST_TIMEOUT)
            .await
    }

    /// [`dispatch`](Self::dispatch) with an explicit deadline.
    pub async fn dispatch_with_deadline(
        &self,
        tunnel_id: &str,
        request: ProxiedRequest,
        deadline: Duration,
    ) -> Result<HttpReply, TunnelError> {
        let request_id = short_id();
        let rx = self.pending.register(tunnel_id, &request_id);

        let frame = Frame::HttpRequest {
            id: request_id.clone(),
            method: request.method,
            path: request.path,
            query: request.query,
            headers: request.headers,
            body: request.body,
        };

        if let Err(e) = self.hub.send(tunnel_id, frame).await {
            self.pending.discard(tunnel_id, &request_id);
            return Err(e);
        }

        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(TunnelError::Internal(
                "pending request dropped without resolution".to_string(),
            )),
            Err(_) => {
                self.pending.discard(tunnel_id, &request_id);
                debug!(tunnel_id, request_id, "Proxied request timed out");
                Err(TunnelError::Timeout)
            }
        }
    }

    /// Route an `http_response` frame back to its parked caller. Unknown or
    /// duplicate replies are dropped.
    pub fn on_response(&self, tunnel_id: &str, request_id: &str, reply: HttpReply) -> bool {
        self.pending.resolve(tunnel_id, request_id, reply)
    }

    /// Delete a tunnel: close any attached channel, fail its pending
    /// requests with [`TunnelError::TunnelGone`], drop the record.
    pub async fn delete_tunnel(&self, tunnel_id: &str) -> Result<Tunnel, TunnelError> {
        let tunnel = self
            .registry
            .remove(tunnel_id)
            .ok_or_else(|| TunnelError::NotFound(tunnel_id.to_string()))?;

        self.hub.close(tunnel_id, CLOSE_NORMAL).await;
        self.pending.cancel_tunnel(tunnel_id, TunnelError::TunnelGone);
        Ok(tunnel)
    }
}

impl Default for ControlPlane {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ProxiedRequest {
        ProxiedRequest {
            method: "GET".to_string(),
            path: "/hello".to_string(),
            query: HashMap::new(),
            headers: HashMap::new(),
            body: None,
        }
    }

    fn reply(status: u16) -> HttpReply {
        HttpReply {
            status,
            headers: HashMap::new(),
            body: "ok".to_string(),
        }
    }

    /// Attach a stub channel that answers every http_request with `status`.
    fn attach_echo_agent(plane: &Arc<ControlPlane>, tunnel_id: &str, status: u16) -> u64 {
        let (tx, mut rx) = mpsc::channel(16);
        let conn_id = plane.attach_channel(tunnel_id, tx).unwrap();

        let plane = plane.clone();
        let tunnel_id = tunnel_id.to_string();
        tokio::spawn(async move {
            while let Some(egress) = rx.recv().await {
                match egress {
                    Egress::Frame(Frame::HttpRequest { id, .. }) => {
                        plane.on_response(&tunnel_id, &id, reply(status));
                    }
                    Egress::Close(_) => break,
                    _ => {}
                }
            }
        });
        conn_id
    }

    #[tokio::test]
    async fn test_dispatch_happy_path() {
        let plane = Arc::new(ControlPlane::new());
        let tunnel = plane.registry().create(3000, None).unwrap();
        attach_echo_agent(&plane, &tunnel.id, 200);

        let result = plane.dispatch(&tunnel.id, request()).await.unwrap();
        assert_eq!(result.status, 200);
        assert!(plane.pending().is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_not_connected() {
        let plane = ControlPlane::new();
        let tunnel = plane.registry().create(3000, None).unwrap();

        let result = plane.dispatch(&tunnel.id, request()).await;
        assert_eq!(result, Err(TunnelError::NotConnected(tunnel.id.clone())));
        assert!(plane.pending().is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_timeout_clears_pending() {
        let plane = Arc::new(ControlPlane::new());
        let tunnel = plane.registry().create(3000, None).unwrap();

        // Agent that reads frames but never replies
        let (tx, mut rx) = mpsc::channel(16);
        plane.attach_channel(&tunnel.id, tx).unwrap();
        tokio::spawn(async move { while rx.recv().await.is_some() {} });

        let result = plane
            .dispatch_with_deadline(&tunnel.id, request(), Duration::from_millis(50))
            .await;
        assert_eq!(result, Err(TunnelError::Timeout));
        assert!(plane.pending().is_empty());
    }

    #[tokio::test]
    async fn test_attach_unknown_tunnel() {
        let plane = ControlPlane::new();
        let (tx, _rx) = mpsc::channel(16);
        assert_eq!(
            plane.attach_channel("ghost", tx),
            Err(TunnelError::NotFound("ghost".to_string()))
        );
    }

    #[tokio::test]
    async fn test_detach_fails_pending_and_disconnects() {
        let plane = Arc::new(ControlPlane::new());
        let tunnel = plane.registry().create(3000, None).unwrap();

        let (tx, _rx) = mpsc::channel(16);
        let conn_id = plane.attach_channel(&tunnel.id, tx).unwrap();
        assert!(plane.registry().get(&tunnel.id).unwrap().connected);

        let waiter = plane.pending().register(&tunnel.id, "r1");
        plane.detach_channel(&tunnel.id, conn_id);

        assert!(!plane.registry().get(&tunnel.id).unwrap().connected);
        assert_eq!(waiter.await.unwrap(), Err(TunnelError::ChannelDropped));
    }

    #[tokio::test]
    async fn test_preempted_detach_keeps_successor() {
        let plane = Arc::new(ControlPlane::new());
        let tunnel = plane.registry().create(3000, None).unwrap();

        let (tx1, _rx1) = mpsc::channel(16);
        let old_conn = plane.attach_channel(&tunnel.id, tx1).unwrap();

        attach_echo_agent(&plane, &tunnel.id, 200);

        // The preempted reader detaching must not disturb the new channel
        plane.detach_channel(&tunnel.id, old_conn);
        assert!(plane.registry().get(&tunnel.id).unwrap().connected);

        let result = plane.dispatch(&tunnel.id, request()).await.unwrap();
        assert_eq!(result.status, 200);
    }

    #[tokio::test]
    async fn test_delete_tunnel_cancels_pending() {
        let plane = Arc::new(ControlPlane::new());
        let tunnel = plane.registry().create(3000, None).unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        plane.attach_channel(&tunnel.id, tx).unwrap();
        let waiter = plane.pending().register(&tunnel.id, "r1");

        plane.delete_tunnel(&tunnel.id).await.unwrap();

        assert!(plane.registry().get(&tunnel.id).is_none());
        assert_eq!(waiter.await.unwrap(), Err(TunnelError::TunnelGone));
        assert!(matches!(rx.recv().await, Some(Egress::Close(CLOSE_NORMAL))));

        let result = plane.delete_tunnel(&tunnel.id).await;
        assert_eq!(result, Err(TunnelError::NotFound(tunnel.id.clone())));
    }
}
