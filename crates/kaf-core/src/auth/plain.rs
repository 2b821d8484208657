//! SASL/PLAIN client.
//!
//! The single message is `\0username\0password`.

use crate::error::{AuthError, AuthResult};

use super::SaslClient;

/// SASL/PLAIN client.
#[derive(Debug)]
pub struct PlainClient {
    username: String,
    password: String,
    sent: bool,
}

impl PlainClient {
    /// Create a new PLAIN client.
    #[must_use]
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            sent: false,
        }
    }
}

impl SaslClient for PlainClient {
    fn mechanism_name(&self) -> &'static str {
        "PLAIN"
    }

    fn step(&mut self, challenge: Option<&[u8]>) -> AuthResult<Option<Vec<u8>>> {
        match (self.sent, challenge) {
            (false, None) => {
                self.sent = true;
                Ok(Some(
                    format!("\0{}\0{}", self.username, self.password).into_bytes(),
                ))
            }
            // The broker's reply to PLAIN carries no data.
            (true, Some(_)) => Ok(None),
            (false, Some(_)) => Err(AuthError::OutOfOrder("PLAIN got a challenge before sending")),
            (true, None) => Err(AuthError::OutOfOrder("PLAIN stepped twice without a reply")),
        }
    }
}
