//! Broker connections.
//!
//! This module provides:
//! - A single broker connection with TLS, ApiVersions and SASL setup
//! - Typed request/response exchange with version negotiation
//! - Background metadata refresh for a cluster client

pub mod connection;
pub mod metadata_refresh;
pub mod stream;

pub use connection::BrokerConnection;
pub use metadata_refresh::MetadataRefresher;
pub use stream::BrokerStream;
