//! Capped fixed-interval reconnection policy
//!
//! The control URL is stable across attachments and the relay closes a
//! displaced channel itself, so retrying the same URL on a fixed cadence is
//! race-free. Exhausting the cap is fatal for the agent.

use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Pause between attempts
    pub interval: Duration,
    /// Attempts allowed before giving up
    pub max_attempts: usize,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_attempts: 5,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReconnectError {
    #[error("Max reconnection attempts reached")]
    MaxAttemptsReached,
}

/// Counts attempts and paces the retry loop.
pub struct ReconnectManager {
    config: ReconnectConfig,
    attempt: usize,
}

impl ReconnectManager {
    pub fn new(config: ReconnectConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Wait out the interval before the next attempt, or fail once the cap
    /// is hit.
    pub async fn wait(&mut self) -> Result<(), ReconnectError> {
        self.attempt += 1;
        if self.attempt > self.config.max_attempts {
            return Err(ReconnectError::MaxAttemptsReached);
        }

        debug!(
            attempt = self.attempt,
            max = self.config.max_attempts,
            "Waiting {}s before reconnecting",
            self.config.interval.as_secs()
        );
        sleep(self.config.interval).await;
        Ok(())
    }

    /// Clear the counter after a successful attachment.
    pub fn reset(&mut self) {
        if self.attempt > 0 {
            debug!("Reconnected, resetting attempt counter");
        }
        self.attempt = 0;
    }

    pub fn attempt(&self) -> usize {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast(max_attempts: usize) -> ReconnectConfig {
        ReconnectConfig {
            interval: Duration::from_millis(1),
            max_attempts,
        }
    }

    #[tokio::test]
    async fn test_counts_attempts() {
        let mut manager = ReconnectManager::new(fast(3));
        assert_eq!(manager.attempt(), 0);

        manager.wait().await.unwrap();
        manager.wait().await.unwrap();
        assert_eq!(manager.attempt(), 2);
    }

    #[tokio::test]
    async fn test_cap_is_fatal() {
        let mut manager = ReconnectManager::new(fast(2));

        assert!(manager.wait().await.is_ok());
        assert!(manager.wait().await.is_ok());
        assert_eq!(
            manager.wait().await,
            Err(ReconnectError::MaxAttemptsReached)
        );
    }

    #[tokio::test]
    async fn test_reset_restores_budget() {
        let mut manager = ReconnectManager::new(fast(2));

        manager.wait().await.unwrap();
        manager.wait().await.unwrap();
        manager.reset();
        assert_eq!(manager.attempt(), 0);

        assert!(manager.wait().await.is_ok());
    }
}
