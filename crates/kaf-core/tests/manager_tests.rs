//! Integration tests for the per-cluster connection cache.
//!
//! Covers name resolution, caching and config re-reads against a mock broker.

use std::sync::Arc;

use kaf_core::config::{Cluster, Config};
use kaf_core::error::{ClientError, ConfigError};
use kaf_core::manager::{ConnManager, FileConfigLoader};
use kaf_core::testing::MockBroker;
use kafka_protocol::messages::ApiKey;

/// Config with one cluster per `(name, address)`, `current` active.
fn config(current: &str, clusters: &[(&str, String)]) -> Config {
    Config {
        current_cluster: current.to_string(),
        clusters: clusters
            .iter()
            .map(|(name, address)| Cluster {
                name: (*name).to_string(),
                brokers: vec![address.clone()],
                ..Cluster::default()
            })
            .collect(),
    }
}

#[tokio::test]
async fn test_get_client_is_cached_per_name() {
    let broker = MockBroker::start(1).await;
    let manager = ConnManager::with_loader(config("local", &[("local", broker.address())]));

    let first = manager.get_client("local").await.unwrap();
    let second = manager.get_client("local").await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    // One seed connection, one metadata fetch.
    assert_eq!(broker.calls_for(ApiKey::ApiVersionsKey).len(), 1);
    assert_eq!(broker.calls_for(ApiKey::MetadataKey).len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_use_creates_one_client() {
    let broker = MockBroker::start(1).await;
    let manager = Arc::new(ConnManager::with_loader(config(
        "local",
        &[("local", broker.address())],
    )));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.get_client("local").await })
        })
        .collect();

    let mut clients = Vec::new();
    for handle in handles {
        clients.push(handle.await.unwrap().unwrap());
    }

    assert!(clients.iter().all(|c| Arc::ptr_eq(c, &clients[0])));
    assert_eq!(broker.calls_for(ApiKey::ApiVersionsKey).len(), 1);
    assert_eq!(manager.cached_clusters().await, vec!["local".to_string()]);
}

#[tokio::test]
async fn test_get_client_unknown_cluster() {
    let broker = MockBroker::start(1).await;
    let manager = ConnManager::with_loader(config("local", &[("local", broker.address())]));

    let err = manager.get_client("prod").await.unwrap_err();
    assert_eq!(err.to_string(), "Cluster \"prod\" not found.");
    assert!(broker.calls().is_empty());
}

#[tokio::test]
async fn test_admin_client_falls_back_to_active_cluster() {
    let broker = MockBroker::start(1).await;
    broker.add_topic("orders", 2);
    let manager = ConnManager::with_loader(config("local", &[("local", broker.address())]));

    let admin = manager.get_admin_client("prod").await.unwrap();
    let topics = admin.list_topics().await.unwrap();
    assert_eq!(topics["orders"].num_partitions, 2);

    // Cached under the name that was asked for.
    assert_eq!(manager.cached_clusters().await, vec!["prod".to_string()]);
}

#[tokio::test]
async fn test_admin_client_without_active_cluster() {
    let broker = MockBroker::start(1).await;
    let manager = ConnManager::with_loader(config("", &[("local", broker.address())]));

    let err = manager.get_admin_client("").await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::Config(ConfigError::ClusterNotFound(_))
    ));
}

#[tokio::test]
async fn test_client_and_admin_share_the_cache() {
    let broker = MockBroker::start(1).await;
    let manager = ConnManager::with_loader(config("local", &[("local", broker.address())]));

    let client = manager.get_client("local").await.unwrap();
    let admin = manager.get_admin_client("local").await.unwrap();
    assert!(Arc::ptr_eq(&client, admin.client()));
}

#[tokio::test]
async fn test_empty_name_is_cached_separately() {
    let broker = MockBroker::start(1).await;
    let manager = ConnManager::with_loader(config("local", &[("local", broker.address())]));

    let by_default = manager.get_admin_client("").await.unwrap();
    let by_name = manager.get_admin_client("local").await.unwrap();

    assert!(!Arc::ptr_eq(by_default.client(), by_name.client()));
    assert_eq!(
        manager.cached_clusters().await,
        vec![String::new(), "local".to_string()]
    );
}

#[tokio::test]
async fn test_clusters_resolve_to_their_own_brokers() {
    let first = MockBroker::start(1).await;
    let second = MockBroker::start(2).await;
    let manager = ConnManager::with_loader(config(
        "a",
        &[("a", first.address()), ("b", second.address())],
    ));

    let a = manager.get_client("a").await.unwrap();
    let b = manager.get_client("b").await.unwrap();
    assert_eq!(a.controller_id().await, 1);
    assert_eq!(b.controller_id().await, 2);
}

#[tokio::test]
async fn test_config_is_reread_on_cache_miss() {
    let broker = MockBroker::start(1).await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config");

    config("a", &[("a", broker.address())])
        .write(Some(&path))
        .unwrap();
    let manager = ConnManager::with_loader(FileConfigLoader::new(Some(path.clone())));
    assert!(manager.get_client("b").await.is_err());

    config("a", &[("a", broker.address()), ("b", broker.address())])
        .write(Some(&path))
        .unwrap();
    assert!(manager.get_client("b").await.is_ok());
}

#[tokio::test]
async fn test_connect_failure_is_not_cached() {
    let manager = ConnManager::with_loader(config("dead", &[("dead", "127.0.0.1:1".to_string())]));

    let err = manager.get_client("dead").await.unwrap_err();
    assert!(matches!(err, ClientError::NoBrokersAvailable { .. }));
    assert!(manager.cached_clusters().await.is_empty());
}

#[tokio::test]
async fn test_cluster_without_brokers_is_rejected() {
    let manager = ConnManager::with_loader(Config {
        current_cluster: "empty".to_string(),
        clusters: vec![Cluster {
            name: "empty".to_string(),
            ..Cluster::default()
        }],
    });

    let err = manager.get_client("empty").await.unwrap_err();
    assert!(matches!(err, ClientError::Config(ConfigError::NoBrokers(_))));
}

#[tokio::test]
async fn test_close_all() {
    let broker = MockBroker::start(1).await;
    let manager = ConnManager::with_loader(config("local", &[("local", broker.address())]));

    let client = manager.get_client("local").await.unwrap();
    manager.close_all().await;

    assert!(client.is_closed());
    assert!(manager.cached_clusters().await.is_empty());

    let reopened = manager.get_client("local").await.unwrap();
    assert!(!Arc::ptr_eq(&client, &reopened));
}
