//! Admin operations over a [`ClusterClient`].
//!
//! A [`ClusterAdmin`] shares its client's connections; creating one opens
//! nothing. Topic creation and deletion go to the controller.

use std::collections::BTreeMap;
use std::sync::Arc;

use kafka_protocol::messages::create_topics_request::{
    CreatableReplicaAssignment, CreatableTopic, CreateableTopicConfig,
};
use kafka_protocol::messages::{BrokerId, CreateTopicsRequest, TopicName};
use kafka_protocol::protocol::StrBytes;
use tracing::{info, instrument};

use crate::client::ClusterClient;
use crate::error::{ClientError, Result};

/// Shape of a topic, as listed or as requested at creation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicDetail {
    pub num_partitions: i32,
    pub replication_factor: i16,
    /// Explicit replica placement by partition. When set, the partition
    /// count and replication factor are derived from it by the broker.
    pub replica_assignment: BTreeMap<i32, Vec<i32>>,
    /// Topic-level config overrides.
    pub config_entries: BTreeMap<String, Option<String>>,
}

/// A broker as seen in cluster metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerInfo {
    pub id: i32,
    pub address: String,
}

/// Result of [`ClusterAdmin::describe_cluster`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterDescription {
    pub cluster_id: Option<String>,
    pub controller_id: i32,
    /// Ordered by id.
    pub brokers: Vec<BrokerInfo>,
}

/// Admin handle over a shared client.
#[derive(Debug, Clone)]
pub struct ClusterAdmin {
    client: Arc<ClusterClient>,
}

impl ClusterAdmin {
    /// Wrap a client.
    #[must_use]
    pub fn from_client(client: Arc<ClusterClient>) -> Self {
        Self { client }
    }

    /// The underlying client.
    #[must_use]
    pub fn client(&self) -> &Arc<ClusterClient> {
        &self.client
    }

    /// All topics with their partition layout, from fresh metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if metadata cannot be fetched.
    pub async fn list_topics(&self) -> Result<BTreeMap<String, TopicDetail>> {
        self.client.refresh_metadata(&[]).await?;
        Ok(self
            .client
            .topic_metadata()
            .await
            .into_iter()
            .map(|topic| {
                let detail = TopicDetail {
                    num_partitions: topic.partitions.len() as i32,
                    replication_factor: topic.replication_factor() as i16,
                    replica_assignment: topic
                        .partitions
                        .iter()
                        .map(|p| (p.id, p.replicas.clone()))
                        .collect(),
                    config_entries: BTreeMap::new(),
                };
                (topic.name, detail)
            })
            .collect())
    }

    /// Brokers and controller, from fresh metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if metadata cannot be fetched.
    pub async fn describe_cluster(&self) -> Result<ClusterDescription> {
        self.client.refresh_metadata(&[]).await?;
        Ok(ClusterDescription {
            cluster_id: self.client.cluster_id().await,
            controller_id: self.client.controller_id().await,
            brokers: self
                .client
                .brokers()
                .iter()
                .map(|b| BrokerInfo {
                    id: b.id(),
                    address: b.address().to_string(),
                })
                .collect(),
        })
    }

    /// Create a topic.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Kafka`] if the controller rejects the topic,
    /// or any error reaching the controller.
    #[instrument(skip(self, detail), fields(topic = %name))]
    pub async fn create_topic(
        &self,
        name: &str,
        detail: &TopicDetail,
        validate_only: bool,
    ) -> Result<()> {
        let (num_partitions, replication_factor) = if detail.replica_assignment.is_empty() {
            (detail.num_partitions, detail.replication_factor)
        } else {
            (-1, -1)
        };

        let topic = CreatableTopic::default()
            .with_name(topic_name(name))
            .with_num_partitions(num_partitions)
            .with_replication_factor(replication_factor)
            .with_assignments(
                detail
                    .replica_assignment
                    .iter()
                    .map(|(&partition, replicas)| {
                        CreatableReplicaAssignment::default()
                            .with_partition_index(partition)
                            .with_broker_ids(replicas.iter().map(|&id| BrokerId(id)).collect())
                    })
                    .collect(),
            )
            .with_configs(
                detail
                    .config_entries
                    .iter()
                    .map(|(key, value)| {
                        CreateableTopicConfig::default()
                            .with_name(StrBytes::from_string(key.clone()))
                            .with_value(value.clone().map(StrBytes::from_string))
                    })
                    .collect(),
            );

        let request = CreateTopicsRequest::default()
            .with_topics(vec![topic])
            .with_timeout_ms(self.timeout_ms())
            .with_validate_only(validate_only);

        let controller = self.client.controller().await?;
        let response = controller.create_topics(&request).await?;

        for result in &response.topics {
            if result.error_code != 0 {
                return Err(ClientError::from_code(
                    result.error_code,
                    result.error_message.as_deref(),
                ));
            }
        }

        info!(validate_only, "topic created");
        Ok(())
    }

    /// Delete a topic.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Kafka`] if the controller rejects the deletion,
    /// or any error reaching the controller.
    #[instrument(skip(self), fields(topic = %name))]
    pub async fn delete_topic(&self, name: &str) -> Result<()> {
        let controller = self.client.controller().await?;
        let response = controller
            .delete_topics(&[name.to_string()], self.timeout_ms())
            .await?;

        for result in &response.responses {
            if result.error_code != 0 {
                return Err(ClientError::from_code(
                    result.error_code,
                    result.error_message.as_deref(),
                ));
            }
        }

        info!("topic deleted");
        Ok(())
    }

    fn timeout_ms(&self) -> i32 {
        i32::try_from(self.client.config().request_timeout.as_millis()).unwrap_or(i32::MAX)
    }
}

fn topic_name(name: &str) -> TopicName {
    TopicName(StrBytes::from_string(name.to_string()))
}
