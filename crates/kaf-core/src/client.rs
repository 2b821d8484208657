//! Cluster client: the connection handle for one cluster.
//!
//! [`ClusterClient::connect`] dials the seed brokers in order, bootstraps
//! full cluster metadata from the first one that answers and keeps a
//! broker table keyed by node id. Connections to individual brokers are
//! opened lazily, with the same [`ClientConfig`], the first time they are
//! needed. A background [`MetadataRefresher`] keeps the metadata current
//! until the client is closed.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use kafka_protocol::messages::MetadataResponse;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, instrument, warn};

use crate::broker::{BrokerConnection, MetadataRefresher};
use crate::client_config::ClientConfig;
use crate::error::{ClientError, Result};

/// Node id used for seed connections before metadata identifies them.
const SEED_BROKER_ID: i32 = -1;

/// Metadata for one topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicMetadata {
    pub name: String,
    pub error_code: i16,
    pub is_internal: bool,
    /// Partitions ordered by id.
    pub partitions: Vec<PartitionMetadata>,
}

impl TopicMetadata {
    /// Replication factor, taken from the first partition.
    #[must_use]
    pub fn replication_factor(&self) -> usize {
        self.partitions.first().map_or(0, |p| p.replicas.len())
    }
}

/// Metadata for one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionMetadata {
    pub id: i32,
    pub error_code: i16,
    /// Leader node id, or -1 while leaderless.
    pub leader: i32,
    pub replicas: Vec<i32>,
    pub isr: Vec<i32>,
    pub offline_replicas: Vec<i32>,
}

#[derive(Debug, Default)]
struct ClusterMetadata {
    cluster_id: Option<String>,
    controller_id: i32,
    topics: BTreeMap<String, TopicMetadata>,
}

/// A connected cluster.
pub struct ClusterClient {
    config: ClientConfig,
    seeds: Vec<String>,
    /// The seed connection that bootstrapped the client.
    seed: RwLock<Option<Arc<BrokerConnection>>>,
    /// Known brokers by node id.
    brokers: DashMap<i32, Arc<BrokerConnection>>,
    metadata: RwLock<ClusterMetadata>,
    closed: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
}

impl std::fmt::Debug for ClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterClient")
            .field("seeds", &self.seeds)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl ClusterClient {
    /// Connect to a cluster through its seed brokers.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NoBrokersAvailable`] with the last failure if
    /// no seed broker can be opened, or the error of the initial metadata
    /// fetch.
    #[instrument(skip(brokers, config), fields(seeds = ?brokers))]
    pub async fn connect(brokers: &[String], config: ClientConfig) -> Result<Arc<Self>> {
        let mut last_error = String::from("no seed brokers configured");
        let mut seed = None;

        for address in brokers {
            let conn = BrokerConnection::new(SEED_BROKER_ID, address.clone());
            match conn.open(&config).await {
                Ok(()) => {
                    info!(server = %address, "connected to seed broker");
                    seed = Some(Arc::new(conn));
                    break;
                }
                Err(e) => {
                    warn!(server = %address, error = %e, "failed to connect to seed broker");
                    last_error = e.to_string();
                }
            }
        }

        let Some(seed) = seed else {
            return Err(ClientError::NoBrokersAvailable { last_error });
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let refresh_interval = config.metadata_refresh;
        let client = Arc::new(Self {
            config,
            seeds: brokers.to_vec(),
            seed: RwLock::new(Some(seed)),
            brokers: DashMap::new(),
            metadata: RwLock::new(ClusterMetadata::default()),
            closed: AtomicBool::new(false),
            shutdown_tx,
        });

        if let Err(e) = client.refresh_tracked().await {
            client.close().await;
            return Err(e);
        }

        if !refresh_interval.is_zero() {
            let refresher =
                MetadataRefresher::new(Arc::downgrade(&client), refresh_interval, shutdown_rx);
            tokio::spawn(refresher.run());
        }

        Ok(client)
    }

    /// The configuration every broker connection is opened with.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Seed broker addresses.
    #[must_use]
    pub fn seeds(&self) -> &[String] {
        &self.seeds
    }

    /// Known brokers, ordered by node id. Connections may not be open.
    pub fn brokers(&self) -> Vec<Arc<BrokerConnection>> {
        let mut brokers: Vec<_> = self.brokers.iter().map(|e| Arc::clone(e.value())).collect();
        brokers.sort_by_key(|b| b.id());
        brokers
    }

    /// The broker with node id `id`, opened if necessary.
    ///
    /// # Errors
    ///
    /// Returns an error if the broker is unknown or cannot be opened.
    pub async fn broker(&self, id: i32) -> Result<Arc<BrokerConnection>> {
        self.ensure_open()?;
        let conn = self
            .brokers
            .get(&id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| ClientError::BrokerUnavailable {
                broker_id: id,
                address: String::new(),
                message: "broker not in cluster metadata".to_string(),
            })?;
        self.open_broker(&conn).await?;
        Ok(conn)
    }

    /// The controller broker, opened if necessary.
    ///
    /// # Errors
    ///
    /// Returns an error if no controller is known or it cannot be opened.
    pub async fn controller(&self) -> Result<Arc<BrokerConnection>> {
        let id = self.metadata.read().await.controller_id;
        if id < 0 {
            return Err(ClientError::BrokerUnavailable {
                broker_id: id,
                address: String::new(),
                message: "no controller in cluster metadata".to_string(),
            });
        }
        self.broker(id).await
    }

    /// Controller node id from the last metadata fetch.
    pub async fn controller_id(&self) -> i32 {
        self.metadata.read().await.controller_id
    }

    /// Cluster id, when the brokers report one.
    pub async fn cluster_id(&self) -> Option<String> {
        self.metadata.read().await.cluster_id.clone()
    }

    /// Topic names, sorted.
    pub async fn topics(&self) -> Vec<String> {
        self.metadata.read().await.topics.keys().cloned().collect()
    }

    /// Metadata of every known topic, sorted by name.
    pub async fn topic_metadata(&self) -> Vec<TopicMetadata> {
        self.metadata.read().await.topics.values().cloned().collect()
    }

    /// Partition ids of `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::TopicNotFound`] if the topic is unknown.
    pub async fn partitions(&self, topic: &str) -> Result<Vec<i32>> {
        let metadata = self.metadata.read().await;
        let topic_meta = metadata
            .topics
            .get(topic)
            .ok_or_else(|| ClientError::TopicNotFound(topic.to_string()))?;
        Ok(topic_meta.partitions.iter().map(|p| p.id).collect())
    }

    /// The leader of `topic`/`partition`, opened if necessary.
    ///
    /// # Errors
    ///
    /// Returns an error if the topic or partition is unknown, the partition
    /// has no leader, or the leader cannot be opened.
    pub async fn leader(&self, topic: &str, partition: i32) -> Result<Arc<BrokerConnection>> {
        let leader = {
            let metadata = self.metadata.read().await;
            let topic_meta = metadata
                .topics
                .get(topic)
                .ok_or_else(|| ClientError::TopicNotFound(topic.to_string()))?;
            let partition_meta = topic_meta
                .partitions
                .iter()
                .find(|p| p.id == partition)
                .ok_or_else(|| ClientError::PartitionNotFound {
                    topic: topic.to_string(),
                    partition,
                })?;
            partition_meta.leader
        };

        if leader < 0 {
            return Err(ClientError::LeaderNotAvailable {
                topic: topic.to_string(),
                partition,
            });
        }
        self.broker(leader).await
    }

    /// Fetch metadata for `topics` (all topics when empty) and update the
    /// broker table.
    ///
    /// A full refresh replaces the topic list; a partial one updates only
    /// the named topics.
    ///
    /// # Errors
    ///
    /// Returns an error if the client is closed or no broker answers.
    pub async fn refresh_metadata(&self, topics: &[String]) -> Result<()> {
        self.ensure_open()?;
        let conn = self.any_broker().await?;
        let response = conn.get_metadata(topics).await?;
        self.apply_metadata(&response, topics.is_empty()).await;
        Ok(())
    }

    /// Refresh on the client's own schedule: every topic with
    /// `metadata_full`, otherwise only the topics already known. With no
    /// known topics yet, every topic is fetched.
    ///
    /// # Errors
    ///
    /// Returns an error if the client is closed or no broker answers.
    pub async fn refresh_tracked(&self) -> Result<()> {
        if self.config.metadata_full {
            return self.refresh_metadata(&[]).await;
        }
        let topics = self.topics().await;
        self.refresh_metadata(&topics).await
    }

    /// An open connection to some broker.
    ///
    /// Prefers the seed connection, then any open broker, then tries to open
    /// known brokers and finally re-opens the seed.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NoBrokersAvailable`] if nothing can be opened.
    pub async fn any_broker(&self) -> Result<Arc<BrokerConnection>> {
        self.ensure_open()?;

        let seed = self.seed.read().await.clone();
        if let Some(seed) = &seed {
            if seed.is_connected().await {
                return Ok(Arc::clone(seed));
            }
        }

        let brokers = self.brokers();
        for conn in &brokers {
            if conn.is_connected().await {
                return Ok(Arc::clone(conn));
            }
        }

        let mut last_error = String::from("no known brokers");
        for conn in brokers.iter().chain(seed.iter()) {
            match self.open_broker(conn).await {
                Ok(()) => return Ok(Arc::clone(conn)),
                Err(e) => {
                    debug!(broker_id = conn.id(), error = %e, "broker unavailable");
                    last_error = e.to_string();
                }
            }
        }

        Err(ClientError::NoBrokersAvailable { last_error })
    }

    /// Close every connection and stop the metadata refresher.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(true);

        if let Some(seed) = self.seed.write().await.take() {
            seed.close().await;
        }
        for conn in self.brokers() {
            conn.close().await;
        }
        self.brokers.clear();
        info!(seeds = ?self.seeds, "cluster client closed");
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(ClientError::Closed)
        } else {
            Ok(())
        }
    }

    /// Open `conn` unless it already is.
    async fn open_broker(&self, conn: &BrokerConnection) -> Result<()> {
        if conn.is_connected().await {
            return Ok(());
        }
        match conn.open(&self.config).await {
            // Lost a race with another opener.
            Ok(()) | Err(ClientError::AlreadyConnected(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn apply_metadata(&self, response: &MetadataResponse, full: bool) {
        let mut seen = Vec::with_capacity(response.brokers.len());
        for broker in &response.brokers {
            let id = broker.node_id.0;
            let address = format!("{}:{}", &*broker.host, broker.port);
            seen.push(id);

            let replace = match self.brokers.get(&id) {
                Some(existing) => existing.address() != address,
                None => true,
            };
            if replace {
                debug!(broker_id = id, address = %address, "registering broker");
                let old = self
                    .brokers
                    .insert(id, Arc::new(BrokerConnection::new(id, address)));
                if let Some(old) = old {
                    old.close().await;
                }
            }
        }

        let gone: Vec<i32> = self
            .brokers
            .iter()
            .map(|e| *e.key())
            .filter(|id| !seen.contains(id))
            .collect();
        for id in gone {
            if let Some((_, conn)) = self.brokers.remove(&id) {
                debug!(broker_id = id, "broker left the cluster");
                conn.close().await;
            }
        }

        let mut metadata = self.metadata.write().await;
        metadata.controller_id = response.controller_id.0;
        metadata.cluster_id = response.cluster_id.as_ref().map(|id| id.to_string());
        if full {
            metadata.topics.clear();
        }
        for topic in &response.topics {
            let Some(name) = topic.name.as_deref() else {
                continue;
            };
            let name = name.to_string();
            let mut partitions: Vec<PartitionMetadata> = topic
                .partitions
                .iter()
                .map(|p| PartitionMetadata {
                    id: p.partition_index,
                    error_code: p.error_code,
                    leader: p.leader_id.0,
                    replicas: p.replica_nodes.iter().map(|b| b.0).collect(),
                    isr: p.isr_nodes.iter().map(|b| b.0).collect(),
                    offline_replicas: p.offline_replicas.iter().map(|b| b.0).collect(),
                })
                .collect();
            partitions.sort_by_key(|p| p.id);

            metadata.topics.insert(
                name.clone(),
                TopicMetadata {
                    name,
                    error_code: topic.error_code,
                    is_internal: topic.is_internal,
                    partitions,
                },
            );
        }

        debug!(
            broker_count = self.brokers.len(),
            topic_count = metadata.topics.len(),
            controller_id = metadata.controller_id,
            "applied metadata"
        );
    }
}

impl Drop for ClusterClient {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockBroker;
    use kafka_protocol::messages::ApiKey;

    fn config() -> ClientConfig {
        ClientConfig {
            connect_timeout: std::time::Duration::from_millis(500),
            metadata_refresh: std::time::Duration::ZERO,
            ..ClientConfig::default()
        }
    }

    #[tokio::test]
    async fn test_connect_no_seeds() {
        let err = ClusterClient::connect(&[], config()).await.unwrap_err();
        assert!(matches!(err, ClientError::NoBrokersAvailable { .. }));
    }

    #[tokio::test]
    async fn test_connect_all_seeds_fail_reports_last_error() {
        let seeds = vec!["127.0.0.1:1".to_string(), "127.0.0.1:2".to_string()];
        let err = ClusterClient::connect(&seeds, config()).await.unwrap_err();
        match err {
            ClientError::NoBrokersAvailable { last_error } => {
                assert!(last_error.contains("127.0.0.1:2"), "{last_error}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_connect_skips_dead_seed() {
        let broker = MockBroker::start(1).await;
        broker.add_topic("orders", 3);

        let seeds = vec!["127.0.0.1:1".to_string(), broker.address()];
        let client = ClusterClient::connect(&seeds, config()).await.unwrap();

        assert_eq!(client.topics().await, vec!["orders".to_string()]);
        assert_eq!(client.partitions("orders").await.unwrap(), vec![0, 1, 2]);
        assert_eq!(client.controller_id().await, 1);
        assert_eq!(client.brokers().len(), 1);
    }

    #[tokio::test]
    async fn test_leader_and_controller_are_opened_lazily() {
        let broker = MockBroker::start(7).await;
        broker.add_topic("orders", 1);
        let client = ClusterClient::connect(&[broker.address()], config())
            .await
            .unwrap();

        let registered = client.brokers();
        assert!(!registered[0].is_connected().await);

        let leader = client.leader("orders", 0).await.unwrap();
        assert_eq!(leader.id(), 7);
        assert!(leader.is_connected().await);

        let controller = client.controller().await.unwrap();
        assert!(Arc::ptr_eq(&leader, &controller));
    }

    #[tokio::test]
    async fn test_unknown_topic_and_partition() {
        let broker = MockBroker::start(1).await;
        broker.add_topic("orders", 1);
        let client = ClusterClient::connect(&[broker.address()], config())
            .await
            .unwrap();

        assert!(matches!(
            client.partitions("missing").await,
            Err(ClientError::TopicNotFound(_))
        ));
        assert!(matches!(
            client.leader("orders", 9).await,
            Err(ClientError::PartitionNotFound { partition: 9, .. })
        ));
        assert!(matches!(
            client.broker(42).await,
            Err(ClientError::BrokerUnavailable { broker_id: 42, .. })
        ));
    }

    #[tokio::test]
    async fn test_refresh_picks_up_new_topics() {
        let broker = MockBroker::start(1).await;
        let client = ClusterClient::connect(&[broker.address()], config())
            .await
            .unwrap();
        assert!(client.topics().await.is_empty());

        broker.add_topic("payments", 2);
        client.refresh_metadata(&[]).await.unwrap();
        assert_eq!(client.topics().await, vec!["payments".to_string()]);
        assert_eq!(broker.calls_for(ApiKey::MetadataKey).len(), 2);
    }

    #[tokio::test]
    async fn test_close() {
        let broker = MockBroker::start(1).await;
        let client = ClusterClient::connect(&[broker.address()], config())
            .await
            .unwrap();

        client.close().await;
        assert!(client.is_closed());
        assert!(client.brokers().is_empty());
        assert!(matches!(
            client.refresh_metadata(&[]).await,
            Err(ClientError::Closed)
        ));
        // Closing twice is harmless.
        client.close().await;
    }

    #[tokio::test]
    async fn test_any_broker_reopens_after_failure() {
        let broker = MockBroker::start(1).await;
        let client = ClusterClient::connect(&[broker.address()], config())
            .await
            .unwrap();

        broker.fail_next(ApiKey::MetadataKey, 1);
        assert!(client.refresh_metadata(&[]).await.is_err());

        client.refresh_metadata(&[]).await.unwrap();
        assert!(client.any_broker().await.unwrap().is_connected().await);
    }

    #[tokio::test]
    async fn test_partial_metadata_tracks_known_topics() {
        let broker = MockBroker::start(1).await;
        broker.add_topic("orders", 1);
        let client = ClusterClient::connect(
            &[broker.address()],
            ClientConfig {
                metadata_full: false,
                ..config()
            },
        )
        .await
        .unwrap();
        assert_eq!(client.topics().await, vec!["orders".to_string()]);

        broker.add_topic("payments", 1);
        client.refresh_tracked().await.unwrap();
        assert_eq!(client.topics().await, vec!["orders".to_string()]);

        client.refresh_metadata(&[]).await.unwrap();
        assert_eq!(
            client.topics().await,
            vec!["orders".to_string(), "payments".to_string()]
        );
    }
}
