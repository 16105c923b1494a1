//! Pending request tracker
//!
//! Parks each public HTTP exchange until the matching `http_response` frame
//! arrives or a termination condition resolves it. Keyed by
//! `(tunnel_id, request_id)` so a whole tunnel's requests can be cancelled
//! in one pass.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::TunnelError;

/// The agent's reply to a proxied request, ready to be written back to the
/// public caller.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpReply {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
}

type Waiter = oneshot::Sender<Result<HttpReply, TunnelError>>;

/// Tracks in-flight proxied requests awaiting agent replies
#[derive(Clone)]
pub struct PendingRequests {
    requests: Arc<DashMap<(String, String), Waiter>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self {
            requests: Arc::new(DashMap::new()),
        }
    }

    /// Park a request; the receiver resolves exactly once.
    pub fn register(
        &self,
        tunnel_id: &str,
        request_id: &str,
    ) -> oneshot::Receiver<Result<HttpReply, TunnelError>> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .insert((tunnel_id.to_string(), request_id.to_string()), tx);
        debug!(tunnel_id, request_id, "Registered pending request");
        rx
    }

    /// Deliver a reply. Returns false for unknown or already-resolved ids;
    /// such replies are dropped silently by the caller.
    pub fn resolve(&self, tunnel_id: &str, request_id: &str, reply: HttpReply) -> bool {
        match self
            .requests
            .remove(&(tunnel_id.to_string(), request_id.to_string()))
        {
            Some((_, tx)) => {
                if tx.send(Ok(reply)).is_err() {
                    warn!(tunnel_id, request_id, "Caller gone before reply arrived");
                    return false;
                }
                debug!(tunnel_id, request_id, "Resolved pending request");
                true
            }
            None => {
                debug!(tunnel_id, request_id, "Dropping unmatched reply");
                false
            }
        }
    }

    /// Resolve a single request with a failure reason.
    pub fn fail(&self, tunnel_id: &str, request_id: &str, reason: TunnelError) -> bool {
        match self
            .requests
            .remove(&(tunnel_id.to_string(), request_id.to_string()))
        {
            Some((_, tx)) => tx.send(Err(reason)).is_ok(),
            None => false,
        }
    }

    /// Drop a record without resolving it (the waiting side already gave up,
    /// e.g. on timeout).
    pub fn discard(&self, tunnel_id: &str, request_id: &str) {
        self.requests
            .remove(&(tunnel_id.to_string(), request_id.to_string()));
    }

    /// Resolve every pending request for a tunnel with the given reason.
    /// Returns how many were cancelled.
    pub fn cancel_tunnel(&self, tunnel_id: &str, reason: TunnelError) -> usize {
        let keys: Vec<(String, String)> = self
            .requests
            .iter()
            .filter(|entry| entry.key().0 == tunnel_id)
            .map(|entry| entry.key().clone())
            .collect();

        let mut cancelled = 0;
        for key in keys {
            if let Some((_, tx)) = self.requests.remove(&key) {
                let _ = tx.send(Err(reason.clone()));
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            debug!(tunnel_id, cancelled, "Cancelled pending requests");
        }
        cancelled
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(status: u16) -> HttpReply {
        HttpReply {
            status,
            headers: HashMap::new(),
            body: String::new(),
        }
    }

    #[tokio::test]
    async fn test_register_and_resolve() {
        let pending = PendingRequests::new();
        let rx = pending.register("t1", "r1");
        assert_eq!(pending.len(), 1);

        assert!(pending.resolve("t1", "r1", reply(200)));
        assert_eq!(pending.len(), 0);

        let received = rx.await.unwrap().unwrap();
        assert_eq!(received.status, 200);
    }

    #[tokio::test]
    async fn test_duplicate_reply_dropped() {
        let pending = PendingRequests::new();
        let rx = pending.register("t1", "r1");

        assert!(pending.resolve("t1", "r1", reply(200)));
        assert!(!pending.resolve("t1", "r1", reply(500)));

        assert_eq!(rx.await.unwrap().unwrap().status, 200);
    }

    #[tokio::test]
    async fn test_unknown_reply_dropped() {
        let pending = PendingRequests::new();
        assert!(!pending.resolve("t1", "nope", reply(200)));
    }

    #[tokio::test]
    async fn test_fail_single() {
        let pending = PendingRequests::new();
        let rx = pending.register("t1", "r1");

        assert!(pending.fail("t1", "r1", TunnelError::SendFailed));
        assert_eq!(rx.await.unwrap(), Err(TunnelError::SendFailed));
    }

    #[tokio::test]
    async fn test_cancel_tunnel_scoped() {
        let pending = PendingRequests::new();
        let rx_a1 = pending.register("a", "r1");
        let rx_a2 = pending.register("a", "r2");
        let rx_b = pending.register("b", "r1");

        let cancelled = pending.cancel_tunnel("a", TunnelError::ChannelDropped);
        assert_eq!(cancelled, 2);
        assert_eq!(pending.len(), 1);

        assert_eq!(rx_a1.await.unwrap(), Err(TunnelError::ChannelDropped));
        assert_eq!(rx_a2.await.unwrap(), Err(TunnelError::ChannelDropped));

        // Tunnel b untouched
        assert!(pending.resolve("b", "r1", reply(204)));
        assert_eq!(rx_b.await.unwrap().unwrap().status, 204);
    }

    #[tokio::test]
    async fn test_discard_leaves_receiver_hanging() {
        let pending = PendingRequests::new();
        let rx = pending.register("t1", "r1");

        pending.discard("t1", "r1");
        assert!(pending.is_empty());

        // Sender dropped without a value
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn test_same_request_id_across_tunnels() {
        let pending = PendingRequests::new();
        let rx_a = pending.register("a", "shared");
        let rx_b = pending.register("b", "shared");

        assert!(pending.resolve("a", "shared", reply(200)));
        assert!(pending.resolve("b", "shared", reply(201)));

        assert_eq!(rx_a.await.unwrap().unwrap().status, 200);
        assert_eq!(rx_b.await.unwrap().unwrap().status, 201);
    }
}
