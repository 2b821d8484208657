//! Core library for the `kaf` Kafka CLI.
//!
//! Resolves named clusters from `~/.kaf/config`, connects to them and keeps
//! one client per cluster for the rest of the process.
//!
//! # Architecture
//!
//! - [`config`] - The YAML cluster configuration file
//! - [`version`] - Kafka release versions and the API versions they cap
//! - [`client_config`] - Transport settings derived from a cluster entry
//! - [`tls`] - TLS connector for SSL and SASL_SSL clusters
//! - [`auth`] - SASL PLAIN and SCRAM clients
//! - [`broker`] - Single broker connections and background metadata refresh
//! - [`client`] - Cluster client with broker discovery and leader lookup
//! - [`admin`] - Topic and cluster administration
//! - [`offsets`] - ListOffsets request and response types
//! - [`manager`] - Per-cluster connection cache
//! - [`error`] - Error types
//!
//! # Example
//!
//! ```rust,ignore
//! use kaf_core::ConnManager;
//!
//! let manager = ConnManager::new();
//! let admin = manager.get_admin_client("").await?;
//! for (name, detail) in admin.list_topics().await? {
//!     println!("{name}: {} partitions", detail.num_partitions);
//! }
//! ```

#![forbid(unsafe_code)]

pub mod admin;
pub mod auth;
pub mod broker;
pub mod client;
pub mod client_config;
pub mod config;
pub mod error;
pub mod manager;
pub mod offsets;
pub mod tls;
pub mod version;

/// Test utilities for integration testing.
///
/// This module is only available when compiling tests or when the `testing` feature is enabled.
#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export commonly used types
pub use admin::{BrokerInfo, ClusterAdmin, ClusterDescription, TopicDetail};
pub use broker::BrokerConnection;
pub use client::{ClusterClient, PartitionMetadata, TopicMetadata};
pub use client_config::{ClientConfig, SaslSettings};
pub use config::{Cluster, Config, SaslConfig, SaslMechanism, SecurityProtocol, TlsConfig};
pub use error::{AuthError, ClientError, ConfigError, Result, TlsError};
pub use manager::{ConfigLoader, ConnManager, FileConfigLoader};
pub use offsets::{OffsetBlock, OffsetRequest, OffsetResponse, OffsetTime};
pub use tls::TlsConnector;
pub use version::KafkaVersion;
