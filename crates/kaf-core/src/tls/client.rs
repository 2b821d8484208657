//! TLS client connector for broker connections.

use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::ring::default_provider;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector as TokioTlsConnector;
use tracing::{debug, warn};

use crate::error::{TlsError, TlsResult};

/// Install the ring crypto provider if not already installed.
fn ensure_crypto_provider() {
    let _ = CryptoProvider::install_default(default_provider());
}

/// What a TLS connection to a broker should trust and present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsSettings {
    /// CA certificate (PEM). When unset, the webpki roots are trusted.
    pub ca_file: Option<PathBuf>,

    /// Client certificate and private key (PEM) for mutual TLS.
    pub client_cert: Option<(PathBuf, PathBuf)>,

    /// Accept any server certificate.
    pub insecure: bool,
}

/// TLS connector for outbound connections to Kafka brokers.
///
/// All certificate material is read when the connector is built, so a
/// connector that exists is ready to handshake.
#[derive(Clone)]
pub struct TlsConnector {
    inner: TokioTlsConnector,
    settings: TlsSettings,
}

impl std::fmt::Debug for TlsConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConnector")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl TlsConnector {
    /// Create a new TLS connector.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Certificate files cannot be loaded
    /// - Private key files cannot be loaded
    /// - The client certificate and key do not match
    pub fn new(settings: &TlsSettings) -> TlsResult<Self> {
        ensure_crypto_provider();
        let client_config = build_client_config(settings)?;
        Ok(Self {
            inner: TokioTlsConnector::from(Arc::new(client_config)),
            settings: settings.clone(),
        })
    }

    /// Create a TLS connector trusting the webpki roots.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS configuration cannot be built.
    pub fn with_native_roots() -> TlsResult<Self> {
        Self::new(&TlsSettings::default())
    }

    /// The settings this connector was built from.
    #[must_use]
    pub fn settings(&self) -> &TlsSettings {
        &self.settings
    }

    /// Connect to a server over TLS.
    ///
    /// # Errors
    ///
    /// Returns an error if the server name is invalid or the handshake fails.
    pub async fn connect(
        &self,
        server_name: &str,
        stream: TcpStream,
    ) -> TlsResult<TlsStream<TcpStream>> {
        let server_name = ServerName::try_from(server_name.to_string())
            .map_err(|e| TlsError::Config(format!("invalid server name: {e}")))?;

        debug!(insecure = self.settings.insecure, "initiating TLS handshake");

        self.inner
            .connect(server_name, stream)
            .await
            .map_err(|e| TlsError::Handshake(e.to_string()))
    }
}

/// Build a rustls `ClientConfig` from the settings.
fn build_client_config(settings: &TlsSettings) -> TlsResult<ClientConfig> {
    let root_store = build_root_store(settings)?;

    let builder = if settings.insecure {
        warn!("TLS certificate verification disabled");
        let provider = Arc::new(default_provider());
        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(SkipServerVerification(provider)))
    } else {
        ClientConfig::builder().with_root_certificates(root_store)
    };

    let client_config = if let Some((cert_path, key_path)) = &settings.client_cert {
        debug!("loading client certificate for mTLS");
        let certs = load_certificates(cert_path, "clientfile")?;
        let key = load_private_key(key_path, "clientkeyfile")?;

        builder
            .with_client_auth_cert(certs, key)
            .map_err(|e| TlsError::KeyPair(e.to_string()))?
    } else {
        builder.with_no_client_auth()
    };

    Ok(client_config)
}

/// Build the root certificate store.
fn build_root_store(settings: &TlsSettings) -> TlsResult<RootCertStore> {
    let mut root_store = RootCertStore::empty();

    if let Some(ca_path) = &settings.ca_file {
        debug!(path = %ca_path.display(), "loading custom CA certificate");
        let certs = load_certificates(ca_path, "cafile")?;
        let (added, _ignored) = root_store.add_parsable_certificates(certs);
        debug!(added, "added CA certificates to trust store");

        if added == 0 {
            return Err(TlsError::NoCertificates(ca_path.display().to_string()));
        }
    } else {
        debug!("using webpki root certificates");
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }

    Ok(root_store)
}

/// Load certificates from a PEM file.
fn load_certificates(path: &Path, role: &'static str) -> TlsResult<Vec<CertificateDer<'static>>> {
    let file = std::fs::File::open(path).map_err(|e| TlsError::CertificateLoad {
        role,
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    let mut reader = BufReader::new(file);
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut reader)
        .filter_map(|result| match result {
            Ok(cert) => Some(cert),
            Err(e) => {
                warn!(error = %e, "skipping invalid certificate");
                None
            }
        })
        .collect();

    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.display().to_string()));
    }

    debug!(count = certs.len(), path = %path.display(), "loaded certificates");
    Ok(certs)
}

/// Load a private key from a PEM file.
fn load_private_key(path: &Path, role: &'static str) -> TlsResult<PrivateKeyDer<'static>> {
    let file = std::fs::File::open(path).map_err(|e| TlsError::PrivateKeyLoad {
        role,
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    let mut reader = BufReader::new(file);

    loop {
        match rustls_pemfile::read_one(&mut reader) {
            Ok(Some(rustls_pemfile::Item::Pkcs1Key(key))) => return Ok(PrivateKeyDer::Pkcs1(key)),
            Ok(Some(rustls_pemfile::Item::Pkcs8Key(key))) => return Ok(PrivateKeyDer::Pkcs8(key)),
            Ok(Some(rustls_pemfile::Item::Sec1Key(key))) => return Ok(PrivateKeyDer::Sec1(key)),
            Ok(Some(_)) => continue,
            Ok(None) => break,
            Err(e) => {
                return Err(TlsError::PrivateKeyLoad {
                    role,
                    path: path.display().to_string(),
                    message: e.to_string(),
                });
            }
        }
    }

    Err(TlsError::NoPrivateKeys(path.display().to_string()))
}

/// Certificate verifier for `insecure: true`.
///
/// Any certificate chain is accepted; handshake signatures are still checked
/// so the peer must hold the key for the certificate it presents.
#[derive(Debug)]
struct SkipServerVerification(Arc<CryptoProvider>);

impl ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::pem::{ca_file, cert_file, key_file, temp_file};

    #[test]
    fn test_load_certificates() {
        let file = cert_file();
        let certs = load_certificates(file.path(), "cafile").unwrap();
        assert_eq!(certs.len(), 1);
    }

    #[test]
    fn test_load_private_key() {
        let file = key_file();
        let key = load_private_key(file.path(), "clientkeyfile");
        assert!(matches!(key, Ok(PrivateKeyDer::Pkcs8(_))));
    }

    #[test]
    fn test_load_certificates_file_not_found() {
        let result = load_certificates(Path::new("/nonexistent/path/cert.pem"), "cafile");
        assert!(matches!(
            result,
            Err(TlsError::CertificateLoad { role: "cafile", .. })
        ));
    }

    #[test]
    fn test_load_private_key_file_not_found() {
        let result = load_private_key(Path::new("/nonexistent/path/key.pem"), "clientkeyfile");
        assert!(matches!(
            result,
            Err(TlsError::PrivateKeyLoad { role: "clientkeyfile", .. })
        ));
    }

    #[test]
    fn test_not_pem_files() {
        let file = temp_file("not a certificate");
        assert!(matches!(
            load_certificates(file.path(), "cafile"),
            Err(TlsError::NoCertificates(_))
        ));
        assert!(matches!(
            load_private_key(file.path(), "clientkeyfile"),
            Err(TlsError::NoPrivateKeys(_))
        ));
    }

    #[test]
    fn test_connector_with_native_roots() {
        assert!(TlsConnector::with_native_roots().is_ok());
    }

    #[test]
    fn test_connector_with_custom_ca() {
        let ca = ca_file();
        let settings = TlsSettings {
            ca_file: Some(ca.path().to_path_buf()),
            ..TlsSettings::default()
        };
        let connector = TlsConnector::new(&settings);
        assert!(connector.is_ok(), "Expected Ok, got: {:?}", connector.err());
    }

    #[test]
    fn test_connector_with_client_cert() {
        let ca = ca_file();
        let cert = cert_file();
        let key = key_file();
        let settings = TlsSettings {
            ca_file: Some(ca.path().to_path_buf()),
            client_cert: Some((cert.path().to_path_buf(), key.path().to_path_buf())),
            insecure: false,
        };
        let connector = TlsConnector::new(&settings);
        assert!(connector.is_ok(), "Expected Ok, got: {:?}", connector.err());
    }

    #[test]
    fn test_connector_insecure_ignores_ca() {
        let settings = TlsSettings {
            insecure: true,
            ..TlsSettings::default()
        };
        let connector = TlsConnector::new(&settings).unwrap();
        assert!(connector.settings().insecure);
    }

    #[test]
    fn test_connector_insecure_still_reads_ca() {
        let settings = TlsSettings {
            ca_file: Some(PathBuf::from("/nonexistent/path/ca.pem")),
            insecure: true,
            ..TlsSettings::default()
        };
        assert!(matches!(
            TlsConnector::new(&settings),
            Err(TlsError::CertificateLoad { role: "cafile", .. })
        ));
    }

    #[test]
    fn test_connector_key_file_without_key() {
        let cert = cert_file();
        let not_a_key = cert_file();
        let settings = TlsSettings {
            client_cert: Some((cert.path().to_path_buf(), not_a_key.path().to_path_buf())),
            ..TlsSettings::default()
        };
        assert!(matches!(
            TlsConnector::new(&settings),
            Err(TlsError::NoPrivateKeys(_))
        ));
    }
}
