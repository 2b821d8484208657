//! Transport configuration derived from a [`Cluster`].
//!
//! [`ClientConfig::from_cluster`] translates the user-facing cluster schema
//! into everything a broker connection needs: protocol version, TLS
//! connector, SASL credentials, timeouts and metadata behaviour.
//!
//! Translation rules:
//! - `version` is parsed when set, otherwise 1.1.0 is assumed.
//! - A `SASL` block enables SASL with its credentials and mechanism.
//! - A `TLS` block enables TLS (CA file, client certificate, `insecure`)
//!   unless the protocol is `SASL_SSL`.
//! - `SASL_SSL` always enables TLS; a `TLS` block contributes only its
//!   CA file and `insecure` flag, and SASL credentials are mandatory.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::config::{Cluster, SaslMechanism, SecurityProtocol, TlsConfig};
use crate::error::{ConfigError, ConfigResult};
use crate::tls::{TlsConnector, TlsSettings};
use crate::version::KafkaVersion;

/// Client id sent in every request header.
pub const DEFAULT_CLIENT_ID: &str = "kaf";

/// Default connection timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default background metadata refresh interval.
pub const DEFAULT_METADATA_REFRESH: Duration = Duration::from_secs(60);

/// Resolved SASL credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct SaslSettings {
    /// Mechanism to negotiate.
    pub mechanism: SaslMechanism,
    /// Username, with environment variables expanded.
    pub username: String,
    /// Password, with environment variables expanded.
    pub password: String,
}

impl std::fmt::Debug for SaslSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaslSettings")
            .field("mechanism", &self.mechanism)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Everything needed to open connections to one cluster.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Protocol version the brokers are assumed to speak.
    pub version: KafkaVersion,
    /// Client id sent in request headers.
    pub client_id: String,
    /// TLS connector; `None` for plaintext connections.
    pub tls: Option<Arc<TlsConnector>>,
    /// SASL credentials; `None` when SASL is disabled.
    pub sasl: Option<SaslSettings>,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Fetch metadata for all topics rather than only those in use.
    pub metadata_full: bool,
    /// Background metadata refresh interval; zero disables it.
    pub metadata_refresh: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            version: KafkaVersion::DEFAULT,
            client_id: DEFAULT_CLIENT_ID.to_string(),
            tls: None,
            sasl: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            metadata_full: true,
            metadata_refresh: DEFAULT_METADATA_REFRESH,
        }
    }
}

impl ClientConfig {
    /// Translate a cluster definition.
    ///
    /// # Errors
    ///
    /// Returns an error if the version cannot be parsed, TLS material cannot
    /// be loaded, or the security protocol needs SASL credentials that are
    /// not configured.
    pub fn from_cluster(cluster: &Cluster) -> ConfigResult<Self> {
        let mut config = Self::default();

        if let Some(version) = cluster.version.as_deref().filter(|v| !v.is_empty()) {
            config.version = KafkaVersion::parse(version)?;
        }

        if let Some(sasl) = &cluster.sasl {
            config.sasl = Some(SaslSettings {
                mechanism: sasl.mechanism,
                username: sasl.username(),
                password: sasl.password(),
            });
        }

        let tls_settings = match (cluster.security_protocol, &cluster.tls) {
            (SecurityProtocol::SaslSsl, Some(tls)) => Some(TlsSettings {
                ca_file: tls.cafile.clone(),
                client_cert: None,
                insecure: tls.insecure,
            }),
            (SecurityProtocol::SaslSsl, None) | (SecurityProtocol::Ssl, None) => {
                Some(TlsSettings::default())
            }
            (_, Some(tls)) => Some(full_tls_settings(tls)),
            (_, None) => None,
        };

        if let Some(settings) = tls_settings {
            config.tls = Some(Arc::new(TlsConnector::new(&settings)?));
        }

        if cluster.security_protocol.requires_sasl() && config.sasl.is_none() {
            return Err(ConfigError::MissingSasl {
                cluster: cluster.name.clone(),
                protocol: cluster.security_protocol.to_string(),
            });
        }

        if config.sasl.is_some() && !config.version.supports_sasl_authenticate() {
            return Err(ConfigError::UnsupportedVersion {
                feature: "SASL authentication",
                required: KafkaVersion::V1_0_0_0.to_string(),
                configured: config.version.to_string(),
            });
        }

        debug!(
            cluster = %cluster.name,
            version = %config.version,
            tls = config.tls.is_some(),
            sasl = ?config.sasl.as_ref().map(|s| s.mechanism),
            "built client config"
        );

        Ok(config)
    }

    /// Whether connections are wrapped in TLS.
    #[must_use]
    pub fn tls_enabled(&self) -> bool {
        self.tls.is_some()
    }

    /// Whether connections authenticate with SASL.
    #[must_use]
    pub fn sasl_enabled(&self) -> bool {
        self.sasl.is_some()
    }

    /// The security protocol these settings amount to.
    #[must_use]
    pub fn security_protocol(&self) -> SecurityProtocol {
        match (self.tls_enabled(), self.sasl_enabled()) {
            (false, false) => SecurityProtocol::Plaintext,
            (true, false) => SecurityProtocol::Ssl,
            (false, true) => SecurityProtocol::SaslPlaintext,
            (true, true) => SecurityProtocol::SaslSsl,
        }
    }
}

/// TLS settings for every protocol except `SASL_SSL`.
///
/// A client certificate is only used when both the certificate and the key
/// are configured.
fn full_tls_settings(tls: &TlsConfig) -> TlsSettings {
    let client_cert = match (&tls.clientfile, &tls.clientkeyfile) {
        (Some(cert), Some(key)) => Some((cert.clone(), key.clone())),
        _ => None,
    };
    TlsSettings {
        ca_file: tls.cafile.clone(),
        client_cert,
        insecure: tls.insecure,
    }
}
