//! Relay configuration

use std::net::SocketAddr;

/// Runtime configuration for the relay.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address the HTTP listener binds to
    pub bind: SocketAddr,
    /// Advertised base URL, used to build `publicUrl`/`wsUrl` for agents
    pub public_url: String,
}

impl RelayConfig {
    pub fn new(bind: SocketAddr, public_url: Option<String>) -> Self {
        let public_url = public_url.unwrap_or_else(|| {
            if bind.ip().is_unspecified() {
                format!("http://localhost:{}", bind.port())
            } else {
                format!("http://{bind}")
            }
        });
        Self {
            bind,
            public_url: public_url.trim_end_matches('/').to_string(),
        }
    }

    /// Public proxy URL for a tunnel.
    pub fn tunnel_url(&self, tunnel_id: &str) -> String {
        format!("{}/t/{}", self.public_url, tunnel_id)
    }

    /// Control-channel attachment URL for a tunnel.
    pub fn channel_url(&self, tunnel_id: &str) -> String {
        let ws_base = if let Some(rest) = self.public_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.public_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            format!("ws://{}", self.public_url)
        };
        format!("{ws_base}/ws/{tunnel_id}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls_from_public_base() {
        let config = RelayConfig::new(
            "127.0.0.1:8080".parse().unwrap(),
            Some("http://tunnel.example.com".to_string()),
        );
        assert_eq!(config.tunnel_url("ab12"), "http://tunnel.example.com/t/ab12");
        assert_eq!(
            config.channel_url("ab12"),
            "ws://tunnel.example.com/ws/ab12"
        );
    }

    #[test]
    fn test_https_becomes_wss() {
        let config = RelayConfig::new(
            "127.0.0.1:443".parse().unwrap(),
            Some("https://tunnel.example.com/".to_string()),
        );
        assert_eq!(
            config.channel_url("ab12"),
            "wss://tunnel.example.com/ws/ab12"
        );
    }

    #[test]
    fn test_default_public_url() {
        let config = RelayConfig::new("0.0.0.0:9000".parse().unwrap(), None);
        assert_eq!(config.public_url, "http://localhost:9000");
    }
}
