//! Integration tests for offset lookups through the connection cache.
//!
//! The manager retries a failed lookup once after reconnecting the broker.

use kaf_core::config::{Cluster, Config};
use kaf_core::error::{ClientError, ConfigError};
use kaf_core::manager::ConnManager;
use kaf_core::offsets::{OffsetRequest, OffsetTime};
use kaf_core::testing::MockBroker;
use kafka_protocol::messages::ApiKey;

fn config(address: String, version: Option<&str>) -> Config {
    Config {
        current_cluster: "local".to_string(),
        clusters: vec![Cluster {
            name: "local".to_string(),
            version: version.map(str::to_string),
            brokers: vec![address],
            ..Cluster::default()
        }],
    }
}

fn request(topic: &str, partitions: i32, time: OffsetTime) -> OffsetRequest {
    let mut request = OffsetRequest::new();
    for partition in 0..partitions {
        request.add_block(topic, partition, time, 1);
    }
    request
}

#[tokio::test]
async fn test_latest_and_earliest_offsets() {
    let broker = MockBroker::start(1).await;
    broker.add_topic("orders", 2);
    broker.set_offsets("orders", 0, 5, 120);
    broker.set_offsets("orders", 1, 0, 42);

    let manager = ConnManager::with_loader(config(broker.address(), None));
    let client = manager.get_client("local").await.unwrap();
    let leader = client.leader("orders", 0).await.unwrap();

    let latest = manager
        .get_available_offsets(&leader, "local", &request("orders", 2, OffsetTime::Latest))
        .await
        .unwrap();
    assert_eq!(latest.get_block("orders", 0).unwrap().result().unwrap(), 120);
    assert_eq!(latest.get_block("orders", 1).unwrap().result().unwrap(), 42);

    let earliest = manager
        .get_available_offsets(&leader, "local", &request("orders", 1, OffsetTime::Earliest))
        .await
        .unwrap();
    assert_eq!(earliest.get_block("orders", 0).unwrap().offset, 5);

    // Kafka 1.1 caps ListOffsets at v2.
    let calls = broker.calls_for(ApiKey::ListOffsetsKey);
    assert_eq!(calls.last().unwrap().api_version, 2);
}

#[tokio::test]
async fn test_old_release_uses_list_offsets_v0() {
    let broker = MockBroker::start(1).await;
    broker.add_topic("orders", 1);
    broker.set_offsets("orders", 0, 0, 77);

    let manager = ConnManager::with_loader(config(broker.address(), Some("0.10.0.0")));
    let client = manager.get_client("local").await.unwrap();
    let leader = client.leader("orders", 0).await.unwrap();

    let response = manager
        .get_available_offsets(&leader, "local", &request("orders", 1, OffsetTime::Latest))
        .await
        .unwrap();
    assert_eq!(response.get_block("orders", 0).unwrap().offset, 77);
    assert_eq!(
        broker.calls_for(ApiKey::ListOffsetsKey).last().unwrap().api_version,
        0
    );
}

#[tokio::test]
async fn test_broker_advertised_version_wins_over_release() {
    let broker = MockBroker::start(1).await;
    broker.limit_api_version(ApiKey::ListOffsetsKey, 1);
    broker.add_topic("orders", 1);
    broker.set_offsets("orders", 0, 3, 30);

    let manager = ConnManager::with_loader(config(broker.address(), Some("2.8.0")));
    let client = manager.get_client("local").await.unwrap();
    let leader = client.leader("orders", 0).await.unwrap();

    let response = manager
        .get_available_offsets(&leader, "local", &request("orders", 1, OffsetTime::Earliest))
        .await
        .unwrap();
    assert_eq!(response.get_block("orders", 0).unwrap().offset, 3);
    assert_eq!(
        broker.calls_for(ApiKey::ListOffsetsKey).last().unwrap().api_version,
        1
    );
}

#[tokio::test]
async fn test_unknown_partition_is_reported_per_block() {
    let broker = MockBroker::start(1).await;
    broker.add_topic("orders", 1);

    let manager = ConnManager::with_loader(config(broker.address(), None));
    let client = manager.get_client("local").await.unwrap();
    let leader = client.leader("orders", 0).await.unwrap();

    let response = manager
        .get_available_offsets(&leader, "local", &request("orders", 3, OffsetTime::Latest))
        .await
        .unwrap();
    assert!(response.get_block("orders", 0).unwrap().result().is_ok());
    assert!(matches!(
        response.get_block("orders", 2).unwrap().result(),
        Err(ClientError::Kafka { code: 3, .. })
    ));
}

#[tokio::test]
async fn test_lookup_reconnects_and_retries_once() {
    let broker = MockBroker::start(1).await;
    broker.add_topic("orders", 1);
    broker.set_offsets("orders", 0, 0, 9);

    let manager = ConnManager::with_loader(config(broker.address(), None));
    let client = manager.get_client("local").await.unwrap();
    let leader = client.leader("orders", 0).await.unwrap();
    let connections_before = broker.calls_for(ApiKey::ApiVersionsKey).len();

    broker.fail_next(ApiKey::ListOffsetsKey, 1);
    let response = manager
        .get_available_offsets(&leader, "local", &request("orders", 1, OffsetTime::Latest))
        .await
        .unwrap();

    assert_eq!(response.get_block("orders", 0).unwrap().offset, 9);
    assert_eq!(broker.calls_for(ApiKey::ListOffsetsKey).len(), 2);
    assert_eq!(
        broker.calls_for(ApiKey::ApiVersionsKey).len(),
        connections_before + 1
    );
    assert!(leader.is_connected().await);
}

#[tokio::test]
async fn test_second_failure_is_returned() {
    let broker = MockBroker::start(1).await;
    broker.add_topic("orders", 1);

    let manager = ConnManager::with_loader(config(broker.address(), None));
    let client = manager.get_client("local").await.unwrap();
    let leader = client.leader("orders", 0).await.unwrap();

    broker.fail_next(ApiKey::ListOffsetsKey, 2);
    let err = manager
        .get_available_offsets(&leader, "local", &request("orders", 1, OffsetTime::Latest))
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::Connection(_)));
    assert_eq!(broker.calls_for(ApiKey::ListOffsetsKey).len(), 2);
}

#[tokio::test]
async fn test_config_error_stops_the_retry() {
    let broker = MockBroker::start(1).await;
    broker.add_topic("orders", 1);

    let manager = ConnManager::with_loader(config(broker.address(), None));
    let client = manager.get_client("local").await.unwrap();
    let leader = client.leader("orders", 0).await.unwrap();

    // A manager whose config no longer resolves any cluster.
    let stale = ConnManager::with_loader(Config::default());

    broker.fail_next(ApiKey::ListOffsetsKey, 1);
    let err = stale
        .get_available_offsets(&leader, "local", &request("orders", 1, OffsetTime::Latest))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ClientError::Config(ConfigError::ClusterNotFound(_))
    ));
    assert!(!leader.is_connected().await);
    assert_eq!(broker.calls_for(ApiKey::ListOffsetsKey).len(), 1);
}
