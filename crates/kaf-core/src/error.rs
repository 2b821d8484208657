//! Domain error types for cluster connection management.
//!
//! Uses `thiserror` for ergonomic error definitions with proper context.

use kafka_protocol::error::ResponseError;
use thiserror::Error;

/// Errors related to loading and resolving cluster configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read or write the configuration file.
    #[error("failed to access config file '{path}': {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse or serialize YAML configuration.
    #[error("failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// No cluster with the requested name, and no usable fallback.
    #[error("Cluster \"{0}\" not found.")]
    ClusterNotFound(String),

    /// No home directory to derive the default config location from.
    #[error("unable to determine home directory for the default config path")]
    NoHomeDir,

    /// The cluster has no broker addresses.
    #[error("cluster '{0}' has no brokers configured")]
    NoBrokers(String),

    /// Invalid address format.
    #[error("invalid address format: {0} (expected 'host:port')")]
    InvalidAddress(String),

    /// The Kafka version string could not be parsed.
    #[error("Unable to parse Kafka version: {0}")]
    InvalidVersion(String),

    /// The security protocol requires SASL but the cluster has no SASL block.
    #[error("cluster '{cluster}' uses {protocol} but has no SASL configuration")]
    MissingSasl { cluster: String, protocol: String },

    /// The configured feature needs a newer protocol version.
    #[error("{feature} requires Kafka {required} or newer (configured: {configured})")]
    UnsupportedVersion {
        feature: &'static str,
        required: String,
        configured: String,
    },

    /// TLS material referenced by the cluster could not be loaded.
    #[error(transparent)]
    Tls(#[from] TlsError),
}

/// Errors related to TLS setup and handshakes.
#[derive(Error, Debug)]
pub enum TlsError {
    /// A certificate file could not be read.
    #[error("Unable to read {role} '{path}': {message}")]
    CertificateLoad {
        role: &'static str,
        path: String,
        message: String,
    },

    /// A private key file could not be read.
    #[error("Unable to read {role} '{path}': {message}")]
    PrivateKeyLoad {
        role: &'static str,
        path: String,
        message: String,
    },

    /// The file contained no PEM certificates.
    #[error("no certificates found in '{0}'")]
    NoCertificates(String),

    /// The file contained no PEM private key.
    #[error("no private key found in '{0}'")]
    NoPrivateKeys(String),

    /// Client certificate and key do not form a usable pair.
    #[error("Unable to create key pair: {0}")]
    KeyPair(String),

    /// Generic TLS configuration error.
    #[error("TLS configuration error: {0}")]
    Config(String),

    /// The TLS handshake with the broker failed.
    #[error("TLS handshake failed: {0}")]
    Handshake(String),
}

/// Errors raised by the client side of a SASL exchange.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The broker does not offer the requested mechanism.
    #[error("SASL mechanism '{mechanism}' not supported by broker (supported: {supported:?})")]
    MechanismNotSupported {
        mechanism: String,
        supported: Vec<String>,
    },

    /// The broker rejected a SASL step.
    #[error("SASL authentication failed (error code {code}): {message}")]
    Rejected { code: i16, message: String },

    /// A server message could not be parsed.
    #[error("invalid SASL server message: {0}")]
    InvalidMessage(String),

    /// The server nonce does not extend the client nonce.
    #[error("server nonce does not start with client nonce")]
    NonceMismatch,

    /// The server signature did not verify.
    #[error("server signature verification failed")]
    ServerSignatureMismatch,

    /// A step was driven out of order.
    #[error("SASL exchange out of order: {0}")]
    OutOfOrder(&'static str),
}

/// Errors that occur while talking to the cluster.
#[derive(Error, Debug)]
pub enum ClientError {
    /// TCP/IO connection error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// Broker is not available or connection failed.
    #[error("broker {broker_id} ({address}) unavailable: {message}")]
    BrokerUnavailable {
        broker_id: i32,
        address: String,
        message: String,
    },

    /// `open` was called on a connection that is already open.
    #[error("broker {0} is already connected")]
    AlreadyConnected(i32),

    /// None of the seed brokers could be reached.
    #[error("no brokers available: {last_error}")]
    NoBrokersAvailable { last_error: String },

    /// Failed to decode a Kafka protocol message.
    #[error("protocol decode error: {message}")]
    ProtocolDecode { message: String },

    /// Failed to encode a Kafka protocol message.
    #[error("protocol encode error: {message}")]
    ProtocolEncode { message: String },

    /// Response correlation ID mismatch.
    #[error("correlation ID mismatch: expected {expected}, got {actual}")]
    CorrelationIdMismatch { expected: i32, actual: i32 },

    /// The client and broker share no version of an API.
    #[error("unsupported API: key={api_key} (client {client_min}..={client_max}, broker {broker_min}..={broker_max})")]
    UnsupportedVersion {
        api_key: i16,
        client_min: i16,
        client_max: i16,
        broker_min: i16,
        broker_max: i16,
    },

    /// The broker answered with a non-zero error code.
    #[error("kafka error {code}: {message}")]
    Kafka { code: i16, message: String },

    /// Topic was not found in metadata.
    #[error("topic not found: {0}")]
    TopicNotFound(String),

    /// Partition was not found in metadata.
    #[error("partition {partition} not found for topic {topic}")]
    PartitionNotFound { topic: String, partition: i32 },

    /// Partition currently has no leader.
    #[error("no leader for {topic}/{partition}")]
    LeaderNotAvailable { topic: String, partition: i32 },

    /// The client was closed.
    #[error("client is closed")]
    Closed,

    /// Configuration error.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// TLS error.
    #[error(transparent)]
    Tls(#[from] TlsError),

    /// SASL error.
    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl ClientError {
    /// Build a [`ClientError::Kafka`] from a broker error code.
    ///
    /// The broker's own message wins; otherwise the protocol's description
    /// of the code is used.
    #[must_use]
    pub fn from_code(code: i16, message: Option<&str>) -> Self {
        let message = match message.filter(|m| !m.is_empty()) {
            Some(m) => m.to_string(),
            None => ResponseError::try_from_code(code)
                .map_or_else(|| "unknown server error".to_string(), |e| e.to_string()),
        };
        Self::Kafka { code, message }
    }
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for TLS operations.
pub type TlsResult<T> = std::result::Result<T, TlsError>;

/// Result type alias for SASL operations.
pub type AuthResult<T> = std::result::Result<T, AuthError>;
