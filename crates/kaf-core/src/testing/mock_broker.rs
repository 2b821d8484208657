//! Mock Kafka broker for integration testing.
//!
//! A single-node broker that:
//! - Accepts Kafka protocol connections on `127.0.0.1`
//! - Records every request it receives
//! - Answers ApiVersions, Metadata, ListOffsets, SASL, CreateTopics and
//!   DeleteTopics from an in-memory topic table
//! - Can drop a connection instead of answering, to simulate broker loss
//! - Optionally accepts only TLS, presenting the certificate from [`pem`](super::pem)

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::{BufMut, Bytes, BytesMut};
use kafka_protocol::messages::api_versions_response::ApiVersion;
use kafka_protocol::messages::create_topics_response::CreatableTopicResult;
use kafka_protocol::messages::delete_topics_response::DeletableTopicResult;
use kafka_protocol::messages::list_offsets_response::{
    ListOffsetsPartitionResponse, ListOffsetsTopicResponse,
};
use kafka_protocol::messages::metadata_response::{
    MetadataResponseBroker, MetadataResponsePartition, MetadataResponseTopic,
};
use kafka_protocol::messages::{
    ApiKey, ApiVersionsRequest, ApiVersionsResponse, BrokerId, CreateTopicsRequest,
    CreateTopicsResponse, DeleteTopicsRequest, DeleteTopicsResponse, ListOffsetsRequest,
    ListOffsetsResponse, MetadataRequest, MetadataResponse, RequestHeader, ResponseHeader,
    SaslAuthenticateRequest, SaslAuthenticateResponse, SaslHandshakeRequest,
    SaslHandshakeResponse, TopicName,
};
use kafka_protocol::protocol::{Decodable, Encodable, HeaderVersion, Message, Request, StrBytes};
use rustls::crypto::ring::default_provider;
use rustls::crypto::CryptoProvider;
use rustls::ServerConfig;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_rustls::TlsAcceptor;

use super::pem::{TEST_CERT, TEST_KEY};

const MOCK_HOST: &str = "127.0.0.1";
const MOCK_CLUSTER_ID: &str = "mock-cluster";

const UNKNOWN_TOPIC_OR_PARTITION: i16 = 3;
const UNSUPPORTED_SASL_MECHANISM: i16 = 33;
const TOPIC_ALREADY_EXISTS: i16 = 36;
const INVALID_PARTITIONS: i16 = 37;
const SASL_AUTHENTICATION_FAILED: i16 = 58;

/// A recorded broker call.
#[derive(Debug, Clone)]
pub struct BrokerCall {
    /// The API key of the request.
    pub api_key: i16,
    /// The API version of the request.
    pub api_version: i16,
    /// The correlation ID.
    pub correlation_id: i32,
    /// The raw request bytes (without length prefix).
    pub request_bytes: Bytes,
}

#[derive(Debug, Clone, Copy, Default)]
struct PartitionOffsets {
    earliest: i64,
    latest: i64,
}

#[derive(Default)]
struct State {
    calls: Vec<BrokerCall>,
    topics: BTreeMap<String, Vec<PartitionOffsets>>,
    credentials: Option<(String, String)>,
    failures: HashMap<i16, usize>,
    api_limits: HashMap<i16, i16>,
    failed_handshakes: usize,
}

struct Shared {
    node_id: i32,
    port: i32,
    state: Mutex<State>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Mock Kafka broker for testing.
///
/// The broker is its own controller and leads every partition. It stops
/// when dropped.
pub struct MockBroker {
    address: String,
    shared: Arc<Shared>,
    shutdown_tx: broadcast::Sender<()>,
}

impl MockBroker {
    /// Start a plaintext broker with node id `node_id` on an ephemeral port.
    ///
    /// # Panics
    ///
    /// Panics if no local port can be bound.
    pub async fn start(node_id: i32) -> Self {
        Self::bind(node_id, None).await
    }

    /// Start a broker that only accepts TLS connections.
    ///
    /// It presents [`TEST_CERT`](super::pem::TEST_CERT), which is valid for
    /// `localhost` and `127.0.0.1` and signed by
    /// [`TEST_CA_CERT`](super::pem::TEST_CA_CERT).
    ///
    /// # Panics
    ///
    /// Panics if the TLS config cannot be built or no local port can be bound.
    pub async fn start_tls(node_id: i32) -> Self {
        let acceptor = tls_acceptor().expect("build mock broker TLS acceptor");
        Self::bind(node_id, Some(acceptor)).await
    }

    async fn bind(node_id: i32, acceptor: Option<TlsAcceptor>) -> Self {
        let listener = TcpListener::bind((MOCK_HOST, 0))
            .await
            .expect("bind mock broker");
        let local = listener.local_addr().expect("mock broker address");

        let shared = Arc::new(Shared {
            node_id,
            port: i32::from(local.port()),
            state: Mutex::new(State::default()),
        });
        let (shutdown_tx, _) = broadcast::channel::<()>(1);

        let accept_shared = Arc::clone(&shared);
        let accept_shutdown = shutdown_tx.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    result = listener.accept() => {
                        match result {
                            Ok((stream, _addr)) => {
                                let shared = Arc::clone(&accept_shared);
                                let shutdown_rx = accept_shutdown.subscribe();
                                let acceptor = acceptor.clone();
                                tokio::spawn(async move {
                                    match acceptor {
                                        Some(acceptor) => match acceptor.accept(stream).await {
                                            Ok(stream) => {
                                                Self::handle_connection(stream, shared, shutdown_rx)
                                                    .await;
                                            }
                                            Err(_) => shared.state().failed_handshakes += 1,
                                        },
                                        None => {
                                            Self::handle_connection(stream, shared, shutdown_rx)
                                                .await;
                                        }
                                    }
                                });
                            }
                            Err(_) => break,
                        }
                    }
                }
            }
        });

        Self {
            address: local.to_string(),
            shared,
            shutdown_tx,
        }
    }

    /// `host:port` the broker listens on, as advertised in metadata.
    #[must_use]
    pub fn address(&self) -> String {
        self.address.clone()
    }

    /// Node id of this broker.
    #[must_use]
    pub fn node_id(&self) -> i32 {
        self.shared.node_id
    }

    /// Add a topic with `partitions` empty partitions.
    pub fn add_topic(&self, name: &str, partitions: i32) {
        let count = usize::try_from(partitions).unwrap_or(0);
        self.shared
            .state()
            .topics
            .insert(name.to_string(), vec![PartitionOffsets::default(); count]);
    }

    /// Set the earliest and latest offsets reported for a partition.
    pub fn set_offsets(&self, topic: &str, partition: i32, earliest: i64, latest: i64) {
        let mut state = self.shared.state();
        if let Some(slot) = state
            .topics
            .get_mut(topic)
            .and_then(|p| p.get_mut(usize::try_from(partition).ok()?))
        {
            *slot = PartitionOffsets { earliest, latest };
        }
    }

    /// Accept only SASL/PLAIN with these credentials.
    pub fn require_sasl_plain(&self, username: &str, password: &str) {
        self.shared.state().credentials = Some((username.to_string(), password.to_string()));
    }

    /// Drop the connection instead of answering the next `count` requests
    /// for `api_key`.
    pub fn fail_next(&self, api_key: ApiKey, count: usize) {
        self.shared.state().failures.insert(api_key as i16, count);
    }

    /// Advertise at most version `max` of `api_key` in ApiVersions.
    pub fn limit_api_version(&self, api_key: ApiKey, max: i16) {
        self.shared.state().api_limits.insert(api_key as i16, max);
    }

    /// All recorded calls, in arrival order.
    #[must_use]
    pub fn calls(&self) -> Vec<BrokerCall> {
        self.shared.state().calls.clone()
    }

    /// Recorded calls for one API.
    #[must_use]
    pub fn calls_for(&self, api_key: ApiKey) -> Vec<BrokerCall> {
        let key = api_key as i16;
        self.shared
            .state()
            .calls
            .iter()
            .filter(|c| c.api_key == key)
            .cloned()
            .collect()
    }

    /// Number of TLS handshakes that failed.
    #[must_use]
    pub fn failed_handshakes(&self) -> usize {
        self.shared.state().failed_handshakes
    }

    /// Clear the call log.
    pub fn clear_calls(&self) {
        self.shared.state().calls.clear();
    }

    /// Stop accepting and close open connections.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }

    async fn handle_connection<S>(
        mut stream: S,
        shared: Arc<Shared>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                result = Self::read_frame(&mut stream) => {
                    let frame = match result {
                        Ok(Some(frame)) => frame,
                        Ok(None) | Err(_) => break,
                    };
                    if frame.len() < 8 {
                        continue;
                    }

                    let api_key = i16::from_be_bytes([frame[0], frame[1]]);
                    let api_version = i16::from_be_bytes([frame[2], frame[3]]);
                    let correlation_id = i32::from_be_bytes([frame[4], frame[5], frame[6], frame[7]]);

                    let fail = {
                        let mut state = shared.state();
                        state.calls.push(BrokerCall {
                            api_key,
                            api_version,
                            correlation_id,
                            request_bytes: frame.clone(),
                        });
                        match state.failures.get_mut(&api_key) {
                            Some(remaining) if *remaining > 0 => {
                                *remaining -= 1;
                                true
                            }
                            _ => false,
                        }
                    };
                    if fail {
                        break;
                    }

                    let response = match shared.dispatch(api_key, api_version, frame) {
                        Ok(response) => response,
                        Err(_) => break,
                    };
                    if Self::write_frame(&mut stream, &response).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    /// Read a Kafka frame (4-byte length prefix + body).
    async fn read_frame<S: AsyncRead + Unpin>(stream: &mut S) -> io::Result<Option<Bytes>> {
        let mut len_buf = [0u8; 4];
        match stream.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        }

        let len = u32::from_be_bytes(len_buf) as usize;
        let mut buf = vec![0u8; len];
        stream.read_exact(&mut buf).await?;
        Ok(Some(Bytes::from(buf)))
    }

    /// Write a Kafka frame (4-byte length prefix + body).
    async fn write_frame<S: AsyncWrite + Unpin>(stream: &mut S, data: &[u8]) -> io::Result<()> {
        let mut buf = BytesMut::with_capacity(4 + data.len());
        buf.put_u32(data.len() as u32);
        buf.extend_from_slice(data);
        stream.write_all(&buf).await?;
        stream.flush().await
    }
}

impl Drop for MockBroker {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Shared {
    fn dispatch(&self, api_key: i16, version: i16, frame: Bytes) -> io::Result<BytesMut> {
        match ApiKey::try_from(api_key) {
            Ok(ApiKey::ApiVersionsKey) => {
                respond::<ApiVersionsRequest, _>(frame, version, |_, _| self.api_versions())
            }
            Ok(ApiKey::MetadataKey) => respond::<MetadataRequest, _>(frame, version, |req, v| {
                self.metadata(&req, v)
            }),
            Ok(ApiKey::ListOffsetsKey) => {
                respond::<ListOffsetsRequest, _>(frame, version, |req, v| {
                    self.list_offsets(&req, v)
                })
            }
            Ok(ApiKey::SaslHandshakeKey) => {
                respond::<SaslHandshakeRequest, _>(frame, version, |req, _| {
                    self.sasl_handshake(&req)
                })
            }
            Ok(ApiKey::SaslAuthenticateKey) => {
                respond::<SaslAuthenticateRequest, _>(frame, version, |req, _| {
                    self.sasl_authenticate(&req)
                })
            }
            Ok(ApiKey::CreateTopicsKey) => {
                respond::<CreateTopicsRequest, _>(frame, version, |req, v| {
                    self.create_topics(&req, v)
                })
            }
            Ok(ApiKey::DeleteTopicsKey) => {
                respond::<DeleteTopicsRequest, _>(frame, version, |req, v| {
                    self.delete_topics(&req, v)
                })
            }
            _ => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("mock broker does not handle api key {api_key}"),
            )),
        }
    }

    fn api_versions(&self) -> ApiVersionsResponse {
        let limits = self.state().api_limits.clone();
        let entry = |key: ApiKey, min: i16, max: i16| {
            let max = limits.get(&(key as i16)).map_or(max, |&limit| limit.min(max));
            ApiVersion::default()
                .with_api_key(key as i16)
                .with_min_version(min)
                .with_max_version(max)
        };

        ApiVersionsResponse::default().with_api_keys(vec![
            entry(
                ApiKey::ApiVersionsKey,
                ApiVersionsRequest::VERSIONS.min,
                ApiVersionsRequest::VERSIONS.max,
            ),
            entry(
                ApiKey::MetadataKey,
                MetadataRequest::VERSIONS.min,
                MetadataRequest::VERSIONS.max,
            ),
            entry(
                ApiKey::ListOffsetsKey,
                ListOffsetsRequest::VERSIONS.min,
                ListOffsetsRequest::VERSIONS.max,
            ),
            entry(
                ApiKey::SaslHandshakeKey,
                SaslHandshakeRequest::VERSIONS.min,
                SaslHandshakeRequest::VERSIONS.max,
            ),
            entry(
                ApiKey::SaslAuthenticateKey,
                SaslAuthenticateRequest::VERSIONS.min,
                SaslAuthenticateRequest::VERSIONS.max,
            ),
            entry(
                ApiKey::CreateTopicsKey,
                CreateTopicsRequest::VERSIONS.min,
                CreateTopicsRequest::VERSIONS.max,
            ),
            entry(
                ApiKey::DeleteTopicsKey,
                DeleteTopicsRequest::VERSIONS.min,
                DeleteTopicsRequest::VERSIONS.max,
            ),
        ])
    }

    fn metadata(&self, request: &MetadataRequest, version: i16) -> MetadataResponse {
        let state = self.state();

        let requested: Option<Vec<String>> = request.topics.as_ref().and_then(|topics| {
            let names: Vec<String> = topics
                .iter()
                .filter_map(|t| t.name.as_ref().map(|n| n.to_string()))
                .collect();
            // An empty list asks for every topic at v0 and for none later;
            // the client only sends an empty list at v0.
            (!names.is_empty()).then_some(names)
        });
        let names: Vec<String> = match requested {
            Some(names) => names,
            None => state.topics.keys().cloned().collect(),
        };

        let topics = names
            .into_iter()
            .map(|name| {
                let topic = MetadataResponseTopic::default()
                    .with_name(Some(topic_name(&name)));
                match state.topics.get(&name) {
                    Some(partitions) => topic.with_partitions(
                        (0..partitions.len())
                            .map(|index| self.partition_metadata(index))
                            .collect(),
                    ),
                    None => topic.with_error_code(UNKNOWN_TOPIC_OR_PARTITION),
                }
            })
            .collect();

        let mut response = MetadataResponse::default()
            .with_brokers(vec![MetadataResponseBroker::default()
                .with_node_id(BrokerId(self.node_id))
                .with_host(StrBytes::from_static_str(MOCK_HOST))
                .with_port(self.port)])
            .with_topics(topics);
        if version >= 1 {
            response.controller_id = BrokerId(self.node_id);
        }
        if version >= 2 {
            response.cluster_id = Some(StrBytes::from_static_str(MOCK_CLUSTER_ID));
        }
        response
    }

    fn partition_metadata(&self, index: usize) -> MetadataResponsePartition {
        let node = BrokerId(self.node_id);
        MetadataResponsePartition::default()
            .with_partition_index(i32::try_from(index).unwrap_or(i32::MAX))
            .with_leader_id(node)
            .with_replica_nodes(vec![node])
            .with_isr_nodes(vec![node])
    }

    fn list_offsets(&self, request: &ListOffsetsRequest, version: i16) -> ListOffsetsResponse {
        let state = self.state();

        let topics = request
            .topics
            .iter()
            .map(|topic| {
                let name: &str = &topic.name;
                let partitions = topic
                    .partitions
                    .iter()
                    .map(|p| {
                        let response = ListOffsetsPartitionResponse::default()
                            .with_partition_index(p.partition_index);
                        let offsets = state
                            .topics
                            .get(name)
                            .and_then(|parts| parts.get(usize::try_from(p.partition_index).ok()?));
                        let Some(offsets) = offsets else {
                            return response.with_error_code(UNKNOWN_TOPIC_OR_PARTITION);
                        };

                        let offset = match p.timestamp {
                            -2 => offsets.earliest,
                            _ => offsets.latest,
                        };
                        if version == 0 {
                            response.with_old_style_offsets(vec![offset])
                        } else {
                            response.with_offset(offset)
                        }
                    })
                    .collect();
                ListOffsetsTopicResponse::default()
                    .with_name(topic.name.clone())
                    .with_partitions(partitions)
            })
            .collect();

        ListOffsetsResponse::default().with_topics(topics)
    }

    fn sasl_handshake(&self, request: &SaslHandshakeRequest) -> SaslHandshakeResponse {
        let enabled = self.state().credentials.is_some();
        let mechanisms = if enabled {
            vec![StrBytes::from_static_str("PLAIN")]
        } else {
            Vec::new()
        };

        let mechanism: &str = &request.mechanism;
        let error_code = if enabled && mechanism == "PLAIN" {
            0
        } else {
            UNSUPPORTED_SASL_MECHANISM
        };
        SaslHandshakeResponse::default()
            .with_error_code(error_code)
            .with_mechanisms(mechanisms)
    }

    fn sasl_authenticate(&self, request: &SaslAuthenticateRequest) -> SaslAuthenticateResponse {
        let expected = self.state().credentials.clone();

        // authzid NUL username NUL password
        let mut fields = request.auth_bytes.split(|&b| b == 0).skip(1);
        let username = fields.next().map(String::from_utf8_lossy);
        let password = fields.next().map(String::from_utf8_lossy);

        let accepted = match (&expected, username, password) {
            (Some((user, pass)), Some(u), Some(p)) => *user == u && *pass == p,
            _ => false,
        };

        if accepted {
            SaslAuthenticateResponse::default()
        } else {
            SaslAuthenticateResponse::default()
                .with_error_code(SASL_AUTHENTICATION_FAILED)
                .with_error_message(Some(StrBytes::from_static_str(
                    "Authentication failed: Invalid username or password",
                )))
        }
    }

    fn create_topics(&self, request: &CreateTopicsRequest, version: i16) -> CreateTopicsResponse {
        let mut state = self.state();

        let results = request
            .topics
            .iter()
            .map(|topic| {
                let name = topic.name.to_string();
                let partitions = if topic.assignments.is_empty() {
                    topic.num_partitions
                } else {
                    i32::try_from(topic.assignments.len()).unwrap_or(i32::MAX)
                };

                let error = if state.topics.contains_key(&name) {
                    Some((TOPIC_ALREADY_EXISTS, format!("Topic '{name}' already exists.")))
                } else if partitions <= 0 {
                    Some((
                        INVALID_PARTITIONS,
                        "Number of partitions must be larger than 0.".to_string(),
                    ))
                } else {
                    None
                };

                let result = CreatableTopicResult::default().with_name(topic.name.clone());
                match error {
                    Some((code, message)) => {
                        let result = result.with_error_code(code);
                        if version >= 1 {
                            result.with_error_message(Some(StrBytes::from_string(message)))
                        } else {
                            result
                        }
                    }
                    None => {
                        if !request.validate_only {
                            let count = usize::try_from(partitions).unwrap_or(0);
                            state
                                .topics
                                .insert(name, vec![PartitionOffsets::default(); count]);
                        }
                        result
                    }
                }
            })
            .collect();

        CreateTopicsResponse::default().with_topics(results)
    }

    fn delete_topics(&self, request: &DeleteTopicsRequest, version: i16) -> DeleteTopicsResponse {
        let mut state = self.state();

        let names: Vec<TopicName> = if version >= 6 {
            request
                .topics
                .iter()
                .filter_map(|t| t.name.clone())
                .collect()
        } else {
            request.topic_names.clone()
        };

        let results = names
            .into_iter()
            .map(|name| {
                let key: &str = &name;
                let removed = state.topics.remove(key).is_some();
                let result = DeletableTopicResult::default().with_name(Some(name));
                if removed {
                    result
                } else {
                    result.with_error_code(UNKNOWN_TOPIC_OR_PARTITION)
                }
            })
            .collect();

        DeleteTopicsResponse::default().with_responses(results)
    }
}

/// TLS acceptor presenting the test server certificate.
fn tls_acceptor() -> io::Result<TlsAcceptor> {
    let _ = CryptoProvider::install_default(default_provider());

    let certs = rustls_pemfile::certs(&mut TEST_CERT.as_bytes()).collect::<io::Result<Vec<_>>>()?;
    let key = rustls_pemfile::private_key(&mut TEST_KEY.as_bytes())?
        .ok_or_else(|| invalid("no private key in test key"))?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(invalid)?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Decode a request of type `R`, answer it and encode the response frame.
fn respond<R, F>(mut frame: Bytes, version: i16, handle: F) -> io::Result<BytesMut>
where
    R: Request,
    F: FnOnce(R, i16) -> R::Response,
{
    let header = RequestHeader::decode(&mut frame, R::header_version(version)).map_err(invalid)?;
    let request = R::decode(&mut frame, version).map_err(invalid)?;
    let response = handle(request, version);

    let mut buf = BytesMut::new();
    ResponseHeader::default()
        .with_correlation_id(header.correlation_id)
        .encode(&mut buf, R::Response::header_version(version))
        .map_err(invalid)?;
    response.encode(&mut buf, version).map_err(invalid)?;
    Ok(buf)
}

fn invalid(e: impl std::fmt::Display) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e.to_string())
}

fn topic_name(name: &str) -> TopicName {
    TopicName(StrBytes::from_string(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn test_mock_broker_start_and_stop() {
        let broker = MockBroker::start(3).await;
        assert!(broker.address().starts_with("127.0.0.1:"));
        assert_eq!(broker.node_id(), 3);

        let stream = TcpStream::connect(broker.address()).await;
        assert!(stream.is_ok());
        broker.stop();
    }

    #[tokio::test]
    async fn test_call_log_records_requests() {
        let broker = MockBroker::start(1).await;
        let mut stream = TcpStream::connect(broker.address()).await.unwrap();

        let mut request = BytesMut::new();
        RequestHeader::default()
            .with_request_api_key(ApiKey::ApiVersionsKey as i16)
            .with_request_api_version(0)
            .with_correlation_id(42)
            .encode(&mut request, ApiVersionsRequest::header_version(0))
            .unwrap();
        ApiVersionsRequest::default().encode(&mut request, 0).unwrap();
        MockBroker::write_frame(&mut stream, &request).await.unwrap();

        let mut response = MockBroker::read_frame(&mut stream).await.unwrap().unwrap();
        let header = ResponseHeader::decode(&mut response, 0).unwrap();
        assert_eq!(header.correlation_id, 42);
        let body = ApiVersionsResponse::decode(&mut response, 0).unwrap();
        assert!(body
            .api_keys
            .iter()
            .any(|k| k.api_key == ApiKey::MetadataKey as i16));

        let calls = broker.calls_for(ApiKey::ApiVersionsKey);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].correlation_id, 42);

        broker.clear_calls();
        assert!(broker.calls().is_empty());
    }

    #[test]
    fn test_sasl_authenticate_parses_plain_message() {
        let shared = Shared {
            node_id: 1,
            port: 9092,
            state: Mutex::new(State::default()),
        };
        shared.state().credentials = Some(("alice".to_string(), "pw".to_string()));

        let ok = SaslAuthenticateRequest::default()
            .with_auth_bytes(Bytes::from_static(b"\0alice\0pw"));
        assert_eq!(shared.sasl_authenticate(&ok).error_code, 0);

        let bad = SaslAuthenticateRequest::default()
            .with_auth_bytes(Bytes::from_static(b"\0alice\0nope"));
        assert_eq!(
            shared.sasl_authenticate(&bad).error_code,
            SASL_AUTHENTICATION_FAILED
        );
    }
}
