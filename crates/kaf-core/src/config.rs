//! Cluster configuration schema.
//!
//! Configuration is a YAML file (by default `~/.kaf/config`) holding a list of
//! named clusters and the name of the currently active one:
//!
//! ```yaml
//! current-cluster: local
//! clusters:
//!   - name: local
//!     brokers: ["localhost:9092"]
//!   - name: prod
//!     version: 2.8.0
//!     brokers: ["kafka-1.example.com:9093", "kafka-2.example.com:9093"]
//!     security-protocol: SASL_SSL
//!     SASL:
//!       mechanism: SCRAM-SHA-512
//!       username: "${KAFKA_USERNAME}"
//!       password: "${KAFKA_PASSWORD}"
//!     TLS:
//!       cafile: /etc/ssl/kafka-ca.pem
//! ```

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::error::{ConfigError, ConfigResult};

/// Directory (relative to the home directory) holding the default config file.
const DEFAULT_CONFIG_DIR: &str = ".kaf";

/// File name of the default config file.
const DEFAULT_CONFIG_FILE: &str = "config";

/// Root configuration: every known cluster plus the active one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    /// Name of the cluster used when none is given explicitly.
    #[serde(rename = "current-cluster", default)]
    pub current_cluster: String,

    /// All configured clusters.
    #[serde(default)]
    pub clusters: Vec<Cluster>,
}

/// A named Kafka cluster and how to reach it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Cluster {
    /// Name used to select the cluster.
    pub name: String,

    /// Kafka version of the brokers, e.g. "2.8.0" or "0.10.2.0".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Seed broker addresses (`host:port`).
    #[serde(default)]
    pub brokers: Vec<String>,

    /// SASL credentials.
    #[serde(rename = "SASL", default, skip_serializing_if = "Option::is_none")]
    pub sasl: Option<SaslConfig>,

    /// TLS material.
    #[serde(rename = "TLS", default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,

    /// Security protocol for broker connections.
    #[serde(rename = "security-protocol", default)]
    pub security_protocol: SecurityProtocol,
}

/// Security protocol for Kafka connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityProtocol {
    /// Plain TCP without encryption or authentication.
    #[default]
    Plaintext,
    /// TLS encryption without SASL authentication.
    Ssl,
    /// SASL authentication without TLS encryption.
    SaslPlaintext,
    /// TLS encryption with SASL authentication.
    SaslSsl,
}

impl SecurityProtocol {
    /// Check if TLS is required for this protocol.
    #[must_use]
    pub fn requires_tls(&self) -> bool {
        matches!(self, Self::Ssl | Self::SaslSsl)
    }

    /// Check if SASL is required for this protocol.
    #[must_use]
    pub fn requires_sasl(&self) -> bool {
        matches!(self, Self::SaslPlaintext | Self::SaslSsl)
    }
}

impl fmt::Display for SecurityProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Plaintext => "PLAINTEXT",
            Self::Ssl => "SSL",
            Self::SaslPlaintext => "SASL_PLAINTEXT",
            Self::SaslSsl => "SASL_SSL",
        };
        f.write_str(name)
    }
}

/// SASL authentication mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub enum SaslMechanism {
    /// SASL/PLAIN - simple username/password authentication.
    #[default]
    #[serde(rename = "PLAIN")]
    Plain,
    /// SASL/SCRAM-SHA-256 - salted challenge-response authentication.
    #[serde(rename = "SCRAM-SHA-256")]
    ScramSha256,
    /// SASL/SCRAM-SHA-512 - salted challenge-response authentication.
    #[serde(rename = "SCRAM-SHA-512")]
    ScramSha512,
}

impl SaslMechanism {
    /// Get the Kafka mechanism name as used in the SASL handshake.
    #[must_use]
    pub fn mechanism_name(&self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
            Self::ScramSha256 => "SCRAM-SHA-256",
            Self::ScramSha512 => "SCRAM-SHA-512",
        }
    }
}

/// SASL credentials for a cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct SaslConfig {
    /// SASL mechanism to use.
    #[serde(default)]
    pub mechanism: SaslMechanism,

    /// Username for authentication.
    /// Supports environment variable expansion: "${KAFKA_USERNAME}"
    #[serde(default)]
    pub username: String,

    /// Password for authentication.
    /// Supports environment variable expansion: "${KAFKA_PASSWORD}"
    #[serde(default)]
    pub password: String,
}

impl SaslConfig {
    /// Get the username with environment variables expanded.
    #[must_use]
    pub fn username(&self) -> String {
        expand_env_vars(&self.username)
    }

    /// Get the password with environment variables expanded.
    #[must_use]
    pub fn password(&self) -> String {
        expand_env_vars(&self.password)
    }
}

/// TLS material for a cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct TlsConfig {
    /// CA certificate (PEM) used to verify brokers. System roots when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cafile: Option<PathBuf>,

    /// Client certificate (PEM) for mutual TLS.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clientfile: Option<PathBuf>,

    /// Client private key (PEM) for mutual TLS.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clientkeyfile: Option<PathBuf>,

    /// Skip broker certificate verification (INSECURE - for testing only).
    #[serde(default)]
    pub insecure: bool,
}

/// Expand environment variables in a string.
///
/// Replaces `${VAR_NAME}` with the value of the environment variable `VAR_NAME`.
/// If the variable is not set, replaces with an empty string.
fn expand_env_vars(s: &str) -> String {
    static ENV_VAR: OnceLock<Regex> = OnceLock::new();
    let re = ENV_VAR.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid regex")
    });
    re.replace_all(s, |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_default()
    })
    .to_string()
}

/// Location of the default config file, `~/.kaf/config`.
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn default_config_path() -> ConfigResult<PathBuf> {
    let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
    Ok(home.join(DEFAULT_CONFIG_DIR).join(DEFAULT_CONFIG_FILE))
}

impl Config {
    /// Read the configuration.
    ///
    /// With `None`, reads `~/.kaf/config`; a missing default file yields an
    /// empty configuration. An explicitly given path must exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn read(path: Option<&Path>) -> ConfigResult<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (default_config_path()?, false),
        };

        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if !explicit && e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::IoError {
                    path: path.display().to_string(),
                    source: e,
                })
            }
        };

        Self::from_str(&content)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing fails.
    pub fn from_str(content: &str) -> ConfigResult<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Write the configuration, creating the parent directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn write(&self, path: Option<&Path>) -> ConfigResult<()> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => default_config_path()?,
        };
        let io_err = |source| ConfigError::IoError {
            path: path.display().to_string(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let content = serde_yaml::to_string(self)?;
        std::fs::write(&path, content).map_err(io_err)
    }

    /// Find a cluster by exact name. When names repeat, the last one wins.
    #[must_use]
    pub fn find_cluster(&self, name: &str) -> Option<&Cluster> {
        self.clusters.iter().rev().find(|c| c.name == name)
    }

    /// The cluster named by `current-cluster`, if any.
    #[must_use]
    pub fn active_cluster(&self) -> Option<&Cluster> {
        if self.current_cluster.is_empty() {
            return None;
        }
        self.find_cluster(&self.current_cluster)
    }

    /// Make `name` the active cluster.
    ///
    /// # Errors
    ///
    /// Returns an error if no cluster has that name.
    pub fn set_current_cluster(&mut self, name: &str) -> ConfigResult<()> {
        if self.find_cluster(name).is_none() {
            return Err(ConfigError::ClusterNotFound(name.to_string()));
        }
        self.current_cluster = name.to_string();
        Ok(())
    }
}

impl Cluster {
    /// Validate the cluster's broker list.
    ///
    /// # Errors
    ///
    /// Returns an error if there are no brokers or an address is not `host:port`.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.brokers.is_empty() {
            return Err(ConfigError::NoBrokers(self.name.clone()));
        }
        for broker in &self.brokers {
            parse_address(broker)?;
        }
        Ok(())
    }
}

/// Split a `host:port` address.
///
/// # Errors
///
/// Returns an error if the address cannot be parsed.
pub fn parse_address(addr: &str) -> ConfigResult<(String, u16)> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| ConfigError::InvalidAddress(addr.to_string()))?;
    if host.is_empty() {
        return Err(ConfigError::InvalidAddress(addr.to_string()));
    }
    let port: u16 = port
        .parse()
        .map_err(|_| ConfigError::InvalidAddress(addr.to_string()))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    Ok((host.to_string(), port))
}
