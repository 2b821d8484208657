//! Single Kafka broker connection.
//!
//! A [`BrokerConnection`] knows its broker id and address and is opened
//! lazily with a [`ClientConfig`]. Opening runs the full connection
//! sequence: TCP connect, TLS handshake, ApiVersions and SASL. Once open,
//! typed requests are sent at the highest version the client, the broker
//! and the configured Kafka version all support.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use kafka_protocol::messages::delete_topics_request::DeleteTopicState;
use kafka_protocol::messages::metadata_request::MetadataRequestTopic;
use kafka_protocol::messages::{
    ApiKey, ApiVersionsRequest, CreateTopicsRequest, CreateTopicsResponse, DeleteTopicsRequest,
    DeleteTopicsResponse, MetadataRequest, MetadataResponse, RequestHeader,
    ResponseHeader, SaslAuthenticateRequest, SaslHandshakeRequest, TopicName,
};
use kafka_protocol::protocol::{Decodable, Encodable, HeaderVersion, Request, StrBytes};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::auth::sasl_client;
use crate::client_config::{ClientConfig, SaslSettings};
use crate::config::parse_address;
use crate::error::{AuthError, ClientError, Result};
use crate::offsets::{OffsetRequest, OffsetResponse};
use crate::version::KafkaVersion;

use super::stream::BrokerStream;

/// Software name reported in ApiVersions v3+.
const CLIENT_SOFTWARE_NAME: &str = "kaf";

/// Largest response frame accepted from a broker (100 MB).
const MAX_FRAME_SIZE: usize = 100 * 1024 * 1024;

/// A connection to a single Kafka broker.
pub struct BrokerConnection {
    id: i32,
    address: String,
    session: Mutex<Option<Session>>,
    correlation_id: AtomicI32,
}

/// State of an open connection.
struct Session {
    stream: BrokerStream,
    client_id: StrBytes,
    request_timeout: Duration,
    version: KafkaVersion,
    /// Broker version ranges by API key. `None` when the configured Kafka
    /// version predates ApiVersions.
    api_versions: Option<HashMap<i16, (i16, i16)>>,
}

impl std::fmt::Debug for BrokerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerConnection")
            .field("id", &self.id)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl BrokerConnection {
    /// Create a connection handle; nothing is dialled until [`open`](Self::open).
    #[must_use]
    pub fn new(id: i32, address: impl Into<String>) -> Self {
        Self {
            id,
            address: address.into(),
            session: Mutex::new(None),
            correlation_id: AtomicI32::new(0),
        }
    }

    /// Broker id, or -1 for a seed broker not yet identified by metadata.
    #[must_use]
    pub fn id(&self) -> i32 {
        self.id
    }

    /// `host:port` of the broker.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Whether the connection is open.
    pub async fn is_connected(&self) -> bool {
        self.session.lock().await.is_some()
    }

    /// Open the connection.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::AlreadyConnected`] if the connection is open,
    /// and otherwise any TCP, TLS, ApiVersions or SASL failure.
    #[instrument(skip(self, config), fields(broker_id = self.id, address = %self.address))]
    pub async fn open(&self, config: &ClientConfig) -> Result<()> {
        let mut guard = self.session.lock().await;
        if guard.is_some() {
            return Err(ClientError::AlreadyConnected(self.id));
        }

        let tcp = match timeout(config.connect_timeout, TcpStream::connect(&self.address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                warn!(error = %e, "failed to connect to broker");
                return Err(self.unavailable(e.to_string()));
            }
            Err(_) => {
                warn!("connection timeout");
                return Err(self.unavailable("connection timeout"));
            }
        };
        if let Err(e) = tcp.set_nodelay(true) {
            debug!(error = %e, "unable to set TCP_NODELAY");
        }

        let stream = match &config.tls {
            Some(connector) => {
                let (host, _) = parse_address(&self.address)?;
                debug!(server_name = %host, "performing TLS handshake");
                BrokerStream::from(connector.connect(&host, tcp).await?)
            }
            None => BrokerStream::from(tcp),
        };

        let mut session = Session {
            stream,
            client_id: StrBytes::from_string(config.client_id.clone()),
            request_timeout: config.request_timeout,
            version: config.version,
            api_versions: None,
        };

        if config.version.supports_api_versions() {
            let versions = self.fetch_api_versions(&mut session).await?;
            debug!(api_count = versions.len(), "negotiated API versions");
            session.api_versions = Some(versions);
        }

        if let Some(sasl) = &config.sasl {
            self.authenticate(&mut session, sasl).await?;
        }

        info!(
            tls = session.stream.is_tls(),
            sasl = config.sasl.is_some(),
            "connected to broker"
        );
        *guard = Some(session);
        Ok(())
    }

    /// Close the connection. Closing a closed connection does nothing.
    pub async fn close(&self) {
        let session = self.session.lock().await.take();
        if let Some(mut session) = session {
            if let Err(e) = session.stream.shutdown().await {
                debug!(broker_id = self.id, error = %e, "error shutting down broker stream");
            }
            debug!(broker_id = self.id, address = %self.address, "closed broker connection");
        }
    }

    /// Send a request at the negotiated version and wait for the response.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is closed, no common version
    /// exists, or the exchange fails. I/O and framing failures close the
    /// connection.
    #[instrument(skip(self, request), fields(broker_id = self.id, api_key = R::KEY))]
    pub async fn send<R: Request>(&self, request: &R) -> Result<R::Response> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or_else(|| self.not_connected())?;
        let version = session.negotiate::<R>()?;
        let result = session
            .roundtrip(self.next_correlation_id(), version, request)
            .await;
        self.settle(&mut guard, result)
    }

    /// Like [`send`](Self::send), building the request for the negotiated version.
    async fn send_built<R, F>(&self, build: F) -> Result<(R::Response, i16)>
    where
        R: Request,
        F: FnOnce(i16) -> R,
    {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or_else(|| self.not_connected())?;
        let version = session.negotiate::<R>()?;
        let request = build(version);
        let result = session
            .roundtrip(self.next_correlation_id(), version, &request)
            .await
            .map(|response| (response, version));
        self.settle(&mut guard, result)
    }

    /// Look up partition offsets (ListOffsets).
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be sent or answered.
    pub async fn get_available_offsets(&self, request: &OffsetRequest) -> Result<OffsetResponse> {
        let (response, version) = self
            .send_built(|version| request.to_protocol(version))
            .await?;
        Ok(OffsetResponse::from_protocol(&response, version))
    }

    /// Fetch metadata for `topics`, or for every topic when empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be sent or answered.
    pub async fn get_metadata(&self, topics: &[String]) -> Result<MetadataResponse> {
        let (response, _) = self
            .send_built(|version| {
                let mut request = MetadataRequest::default();
                request.topics = match (topics.is_empty(), version) {
                    // v0 has no null topic list; empty means all topics.
                    (true, 0) => Some(Vec::new()),
                    (true, _) => None,
                    (false, _) => Some(
                        topics
                            .iter()
                            .map(|t| {
                                MetadataRequestTopic::default()
                                    .with_name(Some(TopicName(StrBytes::from_string(t.clone()))))
                            })
                            .collect(),
                    ),
                };
                if version >= 4 {
                    request.allow_auto_topic_creation = false;
                }
                request
            })
            .await?;
        Ok(response)
    }

    /// Create topics (CreateTopics). Must be sent to the controller.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be sent or answered. Per-topic
    /// failures are reported in the response.
    pub async fn create_topics(&self, request: &CreateTopicsRequest) -> Result<CreateTopicsResponse> {
        self.send(request).await
    }

    /// Delete topics (DeleteTopics). Must be sent to the controller.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be sent or answered. Per-topic
    /// failures are reported in the response.
    pub async fn delete_topics(
        &self,
        topics: &[String],
        timeout_ms: i32,
    ) -> Result<DeleteTopicsResponse> {
        let (response, _) = self
            .send_built(|version| {
                let names = topics
                    .iter()
                    .map(|t| TopicName(StrBytes::from_string(t.clone())));
                let request = DeleteTopicsRequest::default().with_timeout_ms(timeout_ms);
                if version >= 6 {
                    request.with_topics(
                        names
                            .map(|name| DeleteTopicState::default().with_name(Some(name)))
                            .collect(),
                    )
                } else {
                    request.with_topic_names(names.collect())
                }
            })
            .await?;
        Ok(response)
    }

    /// Generate a new correlation ID.
    #[must_use]
    pub fn next_correlation_id(&self) -> i32 {
        self.correlation_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn fetch_api_versions(&self, session: &mut Session) -> Result<HashMap<i16, (i16, i16)>> {
        let version = session.negotiate::<ApiVersionsRequest>()?;
        let mut request = ApiVersionsRequest::default();
        if version >= 3 {
            request.client_software_name = StrBytes::from_static_str(CLIENT_SOFTWARE_NAME);
            request.client_software_version = StrBytes::from_static_str(env!("CARGO_PKG_VERSION"));
        }

        let response = session
            .roundtrip(self.next_correlation_id(), version, &request)
            .await?;
        if response.error_code != 0 {
            return Err(ClientError::from_code(response.error_code, None));
        }

        Ok(response
            .api_keys
            .iter()
            .map(|k| (k.api_key, (k.min_version, k.max_version)))
            .collect())
    }

    /// Run the SASL handshake and authenticate exchange.
    async fn authenticate(&self, session: &mut Session, sasl: &SaslSettings) -> Result<()> {
        let mut client = sasl_client(sasl.mechanism, &sasl.username, &sasl.password);
        let mechanism = client.mechanism_name();
        debug!(mechanism, "performing SASL authentication");

        let version = session.negotiate::<SaslHandshakeRequest>()?;
        let handshake =
            SaslHandshakeRequest::default().with_mechanism(StrBytes::from_static_str(mechanism));
        let response = session
            .roundtrip(self.next_correlation_id(), version, &handshake)
            .await?;
        if response.error_code != 0 {
            let supported = response.mechanisms.iter().map(|m| m.to_string()).collect();
            return Err(AuthError::MechanismNotSupported {
                mechanism: mechanism.to_string(),
                supported,
            }
            .into());
        }

        let version = session.negotiate::<SaslAuthenticateRequest>()?;
        let mut challenge: Option<Bytes> = None;
        while let Some(message) = client.step(challenge.as_deref())? {
            let request = SaslAuthenticateRequest::default().with_auth_bytes(Bytes::from(message));
            let response = session
                .roundtrip(self.next_correlation_id(), version, &request)
                .await?;
            if response.error_code != 0 {
                return Err(AuthError::Rejected {
                    code: response.error_code,
                    message: response
                        .error_message
                        .as_deref()
                        .unwrap_or("authentication failed")
                        .to_string(),
                }
                .into());
            }
            challenge = Some(response.auth_bytes);
        }

        info!(mechanism, "SASL authentication completed");
        Ok(())
    }

    /// Drop the session after a failure that leaves the stream unusable.
    fn settle<T>(&self, session: &mut Option<Session>, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if breaks_connection(e) {
                warn!(broker_id = self.id, address = %self.address, error = %e, "closing broken broker connection");
                *session = None;
            }
        }
        result
    }

    fn unavailable(&self, message: impl Into<String>) -> ClientError {
        ClientError::BrokerUnavailable {
            broker_id: self.id,
            address: self.address.clone(),
            message: message.into(),
        }
    }

    fn not_connected(&self) -> ClientError {
        self.unavailable("not connected")
    }
}

impl Session {
    /// Version of `R` to send.
    fn negotiate<R: Request>(&self) -> Result<i16> {
        let broker = match &self.api_versions {
            Some(versions) => versions.get(&R::KEY).copied(),
            None => Some((R::VERSIONS.min, R::VERSIONS.max)),
        };
        let cap = ApiKey::try_from(R::KEY)
            .ok()
            .and_then(|key| self.version.max_api_version(key));
        negotiate_version(R::KEY, (R::VERSIONS.min, R::VERSIONS.max), broker, cap)
    }

    /// Encode, send and decode one request.
    async fn roundtrip<R: Request>(
        &mut self,
        correlation_id: i32,
        version: i16,
        request: &R,
    ) -> Result<R::Response> {
        let header = RequestHeader::default()
            .with_request_api_key(R::KEY)
            .with_request_api_version(version)
            .with_correlation_id(correlation_id)
            .with_client_id(Some(self.client_id.clone()));

        let mut buf = BytesMut::new();
        header
            .encode(&mut buf, R::header_version(version))
            .map_err(|e| ClientError::ProtocolEncode {
                message: format!("failed to encode request header: {e}"),
            })?;
        request
            .encode(&mut buf, version)
            .map_err(|e| ClientError::ProtocolEncode {
                message: format!("failed to encode request (api_key={}, v{version}): {e}", R::KEY),
            })?;

        debug!(correlation_id, api_key = R::KEY, version, request_len = buf.len(), "sending request");
        let mut frame = self.exchange(&buf).await?;

        let response_header =
            ResponseHeader::decode(&mut frame, R::Response::header_version(version)).map_err(
                |e| ClientError::ProtocolDecode {
                    message: format!("failed to decode response header: {e}"),
                },
            )?;
        if response_header.correlation_id != correlation_id {
            return Err(ClientError::CorrelationIdMismatch {
                expected: correlation_id,
                actual: response_header.correlation_id,
            });
        }

        R::Response::decode(&mut frame, version).map_err(|e| ClientError::ProtocolDecode {
            message: format!("failed to decode response (api_key={}, v{version}): {e}", R::KEY),
        })
    }

    /// Write one length-prefixed frame and read the reply frame.
    async fn exchange(&mut self, payload: &[u8]) -> Result<Bytes> {
        let len = i32::try_from(payload.len()).map_err(|_| ClientError::ProtocolEncode {
            message: "request too large".to_string(),
        })?;
        let mut frame = BytesMut::with_capacity(4 + payload.len());
        frame.put_i32(len);
        frame.extend_from_slice(payload);

        let stream = &mut self.stream;
        let response = timeout(self.request_timeout, async {
            stream.write_all(&frame).await?;
            stream.flush().await?;

            let len = stream.read_i32().await?;
            let len = usize::try_from(len)
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "negative frame length"))?;
            if len > MAX_FRAME_SIZE {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("frame size {len} exceeds maximum {MAX_FRAME_SIZE}"),
                ));
            }
            let mut buf = vec![0u8; len];
            stream.read_exact(&mut buf).await?;
            Ok::<_, io::Error>(buf)
        })
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "request timed out"))??;

        Ok(Bytes::from(response))
    }
}

/// Pick the highest version inside the client range, the broker range and
/// the configured cap.
fn negotiate_version(
    api_key: i16,
    client: (i16, i16),
    broker: Option<(i16, i16)>,
    cap: Option<i16>,
) -> Result<i16> {
    let (broker_min, broker_max) = broker.unwrap_or((-1, -1));
    let unsupported = || ClientError::UnsupportedVersion {
        api_key,
        client_min: client.0,
        client_max: client.1,
        broker_min,
        broker_max,
    };

    if broker.is_none() {
        return Err(unsupported());
    }
    let cap = cap.ok_or_else(unsupported)?;

    let max = client.1.min(broker_max).min(cap);
    if max < client.0.max(broker_min) {
        return Err(unsupported());
    }
    Ok(max)
}

/// Errors after which the stream position is unknown.
fn breaks_connection(e: &ClientError) -> bool {
    matches!(
        e,
        ClientError::Connection(_)
            | ClientError::ProtocolDecode { .. }
            | ClientError::CorrelationIdMismatch { .. }
    )
}
