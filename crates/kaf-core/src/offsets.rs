//! Offset lookup (ListOffsets) request and response types.
//!
//! These wrap the `kafka-protocol` ListOffsets messages in the shape the CLI
//! works with: blocks keyed by topic and partition, and a single resolved
//! offset per block regardless of the protocol version that carried it.

use std::collections::BTreeMap;

use kafka_protocol::messages::list_offsets_request::{ListOffsetsPartition, ListOffsetsTopic};
use kafka_protocol::messages::{BrokerId, ListOffsetsRequest, ListOffsetsResponse, TopicName};
use kafka_protocol::protocol::StrBytes;

use crate::error::{ClientError, Result};

/// Which offset to look up for a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetTime {
    /// The offset of the next message to be written (`-1`).
    Latest,
    /// The oldest available offset (`-2`).
    Earliest,
    /// The earliest offset whose timestamp is at or after this time (ms).
    Timestamp(i64),
}

impl OffsetTime {
    /// The value sent in the `timestamp` field.
    #[must_use]
    pub fn as_timestamp(self) -> i64 {
        match self {
            Self::Latest => -1,
            Self::Earliest => -2,
            Self::Timestamp(ms) => ms,
        }
    }
}

impl From<i64> for OffsetTime {
    fn from(value: i64) -> Self {
        match value {
            -1 => Self::Latest,
            -2 => Self::Earliest,
            ms => Self::Timestamp(ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RequestBlock {
    time: OffsetTime,
    max_offsets: i32,
}

/// A ListOffsets request under construction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OffsetRequest {
    blocks: BTreeMap<String, BTreeMap<i32, RequestBlock>>,
}

impl OffsetRequest {
    /// Create an empty request.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask for the offset of `topic`/`partition` at `time`.
    ///
    /// `max_offsets` only has an effect on brokers answering with version 0
    /// of the API. Adding the same partition twice replaces the first block.
    pub fn add_block(&mut self, topic: &str, partition: i32, time: OffsetTime, max_offsets: i32) {
        self.blocks
            .entry(topic.to_string())
            .or_default()
            .insert(partition, RequestBlock { time, max_offsets });
    }

    /// Whether no blocks have been added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Number of partition blocks in the request.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.values().map(BTreeMap::len).sum()
    }

    /// Build the protocol message for `version`.
    pub(crate) fn to_protocol(&self, version: i16) -> ListOffsetsRequest {
        let topics = self
            .blocks
            .iter()
            .map(|(topic, partitions)| {
                let partitions = partitions
                    .iter()
                    .map(|(&partition, block)| {
                        let mut p = ListOffsetsPartition::default()
                            .with_partition_index(partition)
                            .with_timestamp(block.time.as_timestamp());
                        if version == 0 {
                            p.max_num_offsets = block.max_offsets;
                        }
                        p
                    })
                    .collect();
                ListOffsetsTopic::default()
                    .with_name(TopicName(StrBytes::from_string(topic.clone())))
                    .with_partitions(partitions)
            })
            .collect();

        // Consumers identify themselves with replica id -1.
        ListOffsetsRequest::default()
            .with_replica_id(BrokerId(-1))
            .with_topics(topics)
    }
}

/// The answer for one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetBlock {
    /// Broker error code; 0 on success.
    pub error_code: i16,
    /// The resolved offset, or -1 if none was returned.
    pub offset: i64,
    /// Timestamp of the offset (version 1 and later), or -1.
    pub timestamp: i64,
}

impl OffsetBlock {
    /// The offset, or the broker's error.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Kafka`] when `error_code` is non-zero.
    pub fn result(&self) -> Result<i64> {
        if self.error_code == 0 {
            Ok(self.offset)
        } else {
            Err(ClientError::from_code(self.error_code, None))
        }
    }
}

/// A decoded ListOffsets response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OffsetResponse {
    blocks: BTreeMap<String, BTreeMap<i32, OffsetBlock>>,
}

impl OffsetResponse {
    /// The block for `topic`/`partition`, if the broker returned one.
    #[must_use]
    pub fn get_block(&self, topic: &str, partition: i32) -> Option<&OffsetBlock> {
        self.blocks.get(topic)?.get(&partition)
    }

    /// All blocks as `(topic, partition, block)`.
    pub fn blocks(&self) -> impl Iterator<Item = (&str, i32, &OffsetBlock)> {
        self.blocks.iter().flat_map(|(topic, partitions)| {
            partitions
                .iter()
                .map(move |(&partition, block)| (topic.as_str(), partition, block))
        })
    }

    /// Record a block.
    pub fn add_block(&mut self, topic: &str, partition: i32, block: OffsetBlock) {
        self.blocks
            .entry(topic.to_string())
            .or_default()
            .insert(partition, block);
    }

    /// Convert a protocol response.
    ///
    /// Version 0 responses carry a list of offsets; the first one is used.
    pub(crate) fn from_protocol(response: &ListOffsetsResponse, version: i16) -> Self {
        let mut out = Self::default();
        for topic in &response.topics {
            let name: &str = &topic.name;
            for partition in &topic.partitions {
                let (offset, timestamp) = if version == 0 {
                    (partition.old_style_offsets.first().copied().unwrap_or(-1), -1)
                } else {
                    (partition.offset, partition.timestamp)
                };
                out.add_block(
                    name,
                    partition.partition_index,
                    OffsetBlock {
                        error_code: partition.error_code,
                        offset,
                        timestamp,
                    },
                );
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kafka_protocol::messages::list_offsets_response::{
        ListOffsetsPartitionResponse, ListOffsetsTopicResponse,
    };

    #[test]
    fn test_offset_time_values() {
        assert_eq!(OffsetTime::Latest.as_timestamp(), -1);
        assert_eq!(OffsetTime::Earliest.as_timestamp(), -2);
        assert_eq!(OffsetTime::Timestamp(1_700_000_000_000).as_timestamp(), 1_700_000_000_000);
        assert_eq!(OffsetTime::from(-2), OffsetTime::Earliest);
        assert_eq!(OffsetTime::from(42), OffsetTime::Timestamp(42));
    }

    #[test]
    fn test_add_block_groups_by_topic() {
        let mut request = OffsetRequest::new();
        request.add_block("orders", 0, OffsetTime::Latest, 1);
        request.add_block("orders", 1, OffsetTime::Latest, 1);
        request.add_block("payments", 0, OffsetTime::Earliest, 1);
        request.add_block("orders", 0, OffsetTime::Earliest, 1);
        assert_eq!(request.len(), 3);

        let protocol = request.to_protocol(1);
        assert_eq!(protocol.replica_id, BrokerId(-1));
        assert_eq!(protocol.topics.len(), 2);

        let orders = &protocol.topics[0];
        let name: &str = &orders.name;
        assert_eq!(name, "orders");
        assert_eq!(orders.partitions.len(), 2);
        assert_eq!(orders.partitions[0].timestamp, -2);
    }

    #[test]
    fn test_max_offsets_only_for_version_0() {
        let mut request = OffsetRequest::new();
        request.add_block("orders", 0, OffsetTime::Latest, 5);

        assert_eq!(request.to_protocol(0).topics[0].partitions[0].max_num_offsets, 5);
        assert_eq!(request.to_protocol(2).topics[0].partitions[0].max_num_offsets, 1);
    }

    fn response(partition: ListOffsetsPartitionResponse) -> ListOffsetsResponse {
        ListOffsetsResponse::default().with_topics(vec![ListOffsetsTopicResponse::default()
            .with_name(TopicName(StrBytes::from_static_str("orders")))
            .with_partitions(vec![partition])])
    }

    #[test]
    fn test_from_protocol_v1() {
        let resp = response(
            ListOffsetsPartitionResponse::default()
                .with_partition_index(3)
                .with_offset(120)
                .with_timestamp(99),
        );
        let parsed = OffsetResponse::from_protocol(&resp, 1);
        let block = parsed.get_block("orders", 3).unwrap();
        assert_eq!(block.offset, 120);
        assert_eq!(block.timestamp, 99);
        assert_eq!(block.result().unwrap(), 120);
        assert!(parsed.get_block("orders", 4).is_none());
        assert!(parsed.get_block("payments", 3).is_none());
    }

    #[test]
    fn test_from_protocol_v0_uses_first_old_style_offset() {
        let resp = response(
            ListOffsetsPartitionResponse::default()
                .with_partition_index(0)
                .with_old_style_offsets(vec![57, 12]),
        );
        let parsed = OffsetResponse::from_protocol(&resp, 0);
        assert_eq!(parsed.get_block("orders", 0).unwrap().offset, 57);
    }

    #[test]
    fn test_block_error_code() {
        let resp = response(
            ListOffsetsPartitionResponse::default()
                .with_partition_index(0)
                .with_error_code(3),
        );
        let parsed = OffsetResponse::from_protocol(&resp, 1);
        let err = parsed.get_block("orders", 0).unwrap().result().unwrap_err();
        assert!(matches!(err, ClientError::Kafka { code: 3, .. }));
    }
}
