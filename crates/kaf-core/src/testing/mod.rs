//! Test utilities.
//!
//! - [`MockBroker`] - A single-node Kafka broker speaking the real wire protocol
//! - [`pem`] - Self-signed certificate material for TLS tests
//!
//! # Example
//!
//! ```rust,ignore
//! use kaf_core::testing::MockBroker;
//!
//! #[tokio::test]
//! async fn test_metadata() {
//!     let broker = MockBroker::start(1).await;
//!     broker.add_topic("orders", 3);
//!
//!     // Connect a client to broker.address() ...
//!     assert_eq!(broker.calls_for(ApiKey::MetadataKey).len(), 1);
//! }
//! ```

pub mod mock_broker;
pub mod pem;

pub use mock_broker::{BrokerCall, MockBroker};
