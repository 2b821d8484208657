//! Background metadata refresh task.
//!
//! Periodically re-fetches cluster metadata so broker additions,
//! address changes and leadership moves are picked up between commands.

use std::sync::Weak;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::client::ClusterClient;

/// Background task that periodically refreshes a client's metadata.
///
/// Holds only a weak reference: the task ends when the client is closed
/// or dropped.
pub struct MetadataRefresher {
    client: Weak<ClusterClient>,
    interval: Duration,
    shutdown_rx: watch::Receiver<bool>,
}

impl MetadataRefresher {
    /// Create a new metadata refresher.
    ///
    /// # Arguments
    ///
    /// * `client` - The client whose metadata is refreshed
    /// * `interval` - Refresh interval (zero disables refreshing)
    /// * `shutdown_rx` - Shutdown signal receiver
    #[must_use]
    pub fn new(
        client: Weak<ClusterClient>,
        interval: Duration,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            client,
            interval,
            shutdown_rx,
        }
    }

    /// Run the refresh loop until shutdown.
    pub async fn run(mut self) {
        if self.interval.is_zero() {
            info!("metadata refresh disabled (interval=0)");
            return;
        }

        debug!(
            interval_ms = self.interval.as_millis() as u64,
            "starting background metadata refresh"
        );

        let mut interval = tokio::time::interval(self.interval);
        // The first tick completes immediately; connect already fetched metadata.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if !self.refresh().await {
                        break;
                    }
                }
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        debug!("metadata refresher stopped");
    }

    /// Refresh once. Returns false when the client is gone.
    async fn refresh(&self) -> bool {
        let Some(client) = self.client.upgrade() else {
            return false;
        };
        if client.is_closed() {
            return false;
        }

        match client.refresh_tracked().await {
            Ok(()) => debug!("metadata refresh complete"),
            Err(e) => warn!(error = %e, "failed to refresh metadata"),
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client_config::ClientConfig;
    use crate::testing::MockBroker;
    use kafka_protocol::messages::ApiKey;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_disabled_when_interval_zero() {
        let (_tx, rx) = watch::channel(false);
        let refresher = MetadataRefresher::new(Weak::new(), Duration::ZERO, rx);

        let result = tokio::time::timeout(Duration::from_millis(100), refresher.run()).await;
        assert!(result.is_ok(), "should complete immediately when disabled");
    }

    #[tokio::test]
    async fn test_stops_when_client_dropped() {
        let (_tx, rx) = watch::channel(false);
        let refresher = MetadataRefresher::new(Weak::new(), Duration::from_millis(10), rx);

        let result = tokio::time::timeout(Duration::from_secs(1), refresher.run()).await;
        assert!(result.is_ok(), "should stop once the client is gone");
    }

    #[tokio::test]
    async fn test_stops_on_shutdown_signal() {
        let (tx, rx) = watch::channel(false);
        let refresher = MetadataRefresher::new(Weak::new(), Duration::from_secs(3600), rx);
        let handle = tokio::spawn(refresher.run());

        tx.send(true).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_refreshes_periodically() {
        let broker = MockBroker::start(1).await;
        let config = ClientConfig {
            metadata_refresh: Duration::from_millis(50),
            ..ClientConfig::default()
        };
        let client: Arc<ClusterClient> = ClusterClient::connect(&[broker.address()], config)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(broker.calls_for(ApiKey::MetadataKey).len() >= 3);

        client.close().await;
    }
}
