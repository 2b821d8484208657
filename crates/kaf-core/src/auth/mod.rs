//! Client-side SASL mechanisms.
//!
//! Each mechanism is a small state machine with no I/O: the broker
//! connection feeds it the server's `auth_bytes` and sends whatever it
//! returns in the next `SaslAuthenticate` request, until the mechanism
//! reports completion.
//!
//! Supported mechanisms:
//! - PLAIN - username/password in cleartext (use over TLS)
//! - SCRAM-SHA-256 / SCRAM-SHA-512 - salted challenge-response (RFC 5802, RFC 7677)

pub mod plain;
pub mod scram;

pub use plain::PlainClient;
pub use scram::{ScramClient, ScramHash, ScramSha256, ScramSha512};

use crate::config::SaslMechanism;
use crate::error::AuthResult;

/// A client-side SASL mechanism.
pub trait SaslClient: Send {
    /// Mechanism name as sent in the SASL handshake.
    fn mechanism_name(&self) -> &'static str;

    /// Advance the exchange.
    ///
    /// `challenge` is `None` for the first step and the server's last
    /// `auth_bytes` afterwards. Returns the next message to send, or `None`
    /// once the exchange is complete.
    ///
    /// # Errors
    ///
    /// Returns an error if the server message is malformed or fails verification.
    fn step(&mut self, challenge: Option<&[u8]>) -> AuthResult<Option<Vec<u8>>>;
}

/// Create the client for a configured mechanism.
#[must_use]
pub fn sasl_client(
    mechanism: SaslMechanism,
    username: &str,
    password: &str,
) -> Box<dyn SaslClient> {
    match mechanism {
        SaslMechanism::Plain => Box::new(PlainClient::new(username, password)),
        SaslMechanism::ScramSha256 => Box::new(ScramClient::<ScramSha256>::new(username, password)),
        SaslMechanism::ScramSha512 => Box::new(ScramClient::<ScramSha512>::new(username, password)),
    }
}
