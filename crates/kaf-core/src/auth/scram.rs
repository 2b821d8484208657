//! SASL/SCRAM client.
//!
//! SCRAM (Salted Challenge Response Authentication Mechanism) proves knowledge
//! of the password without sending it, and lets the client verify the server.
//!
//! Supports:
//! - SCRAM-SHA-256 (RFC 7677)
//! - SCRAM-SHA-512 (RFC 7677 variant)
//!
//! Exchange:
//! 1. client-first-message → server-first-message
//! 2. client-final-message → server-final-message

use std::marker::PhantomData;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use rand::Rng;
use sha2::{Digest, Sha256, Sha512};
use tracing::debug;

use crate::error::{AuthError, AuthResult};

use super::SaslClient;

/// Minimum number of PBKDF2 iterations (per RFC 7677).
pub const MIN_ITERATIONS: u32 = 4096;

/// Client nonce length in random bytes (before base64).
pub const NONCE_LENGTH: usize = 24;

/// Hash algorithm trait for SCRAM variants.
pub trait ScramHash: Send + Sync + std::fmt::Debug {
    /// The mechanism name.
    fn name() -> &'static str;
    /// Compute HMAC.
    fn hmac(key: &[u8], data: &[u8]) -> Vec<u8>;
    /// Compute hash.
    fn hash(data: &[u8]) -> Vec<u8>;
    /// Derive key using PBKDF2.
    fn pbkdf2(password: &[u8], salt: &[u8], iterations: u32) -> Vec<u8>;
}

/// SHA-256 implementation for SCRAM.
#[derive(Debug)]
pub struct ScramSha256;

impl ScramHash for ScramSha256 {
    fn name() -> &'static str {
        "SCRAM-SHA-256"
    }

    fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
        let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("HMAC can take key of any size");
        mac.update(data);
        mac.finalize().into_bytes().to_vec()
    }

    fn hash(data: &[u8]) -> Vec<u8> {
        Sha256::digest(data).to_vec()
    }

    fn pbkdf2(password: &[u8], salt: &[u8], iterations: u32) -> Vec<u8> {
        let mut output = vec![0u8; 32];
        pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut output);
        output
    }
}

/// SHA-512 implementation for SCRAM.
#[derive(Debug)]
pub struct ScramSha512;

impl ScramHash for ScramSha512 {
    fn name() -> &'static str {
        "SCRAM-SHA-512"
    }

    fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
        let mut mac = Hmac::<Sha512>::new_from_slice(key).expect("HMAC can take key of any size");
        mac.update(data);
        mac.finalize().into_bytes().to_vec()
    }

    fn hash(data: &[u8]) -> Vec<u8> {
        Sha512::digest(data).to_vec()
    }

    fn pbkdf2(password: &[u8], salt: &[u8], iterations: u32) -> Vec<u8> {
        let mut output = vec![0u8; 64];
        pbkdf2_hmac::<Sha512>(password, salt, iterations, &mut output);
        output
    }
}

#[derive(Debug)]
enum State {
    Initial,
    ClientFirstSent {
        client_first_bare: String,
    },
    ClientFinalSent {
        expected_server_signature: Vec<u8>,
    },
    Done,
}

/// SCRAM client for one authentication exchange.
#[derive(Debug)]
pub struct ScramClient<H: ScramHash> {
    username: String,
    password: String,
    client_nonce: String,
    state: State,
    _hash: PhantomData<H>,
}

impl<H: ScramHash> ScramClient<H> {
    /// Create a client with a random nonce.
    #[must_use]
    pub fn new(username: &str, password: &str) -> Self {
        let random_bytes: [u8; NONCE_LENGTH] = rand::thread_rng().gen();
        Self::with_nonce(username, password, &BASE64.encode(random_bytes))
    }

    /// Create a client with a fixed nonce.
    #[must_use]
    pub fn with_nonce(username: &str, password: &str, client_nonce: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            client_nonce: client_nonce.to_string(),
            state: State::Initial,
            _hash: PhantomData,
        }
    }

    /// Build the client-first-message: `n,,n=<user>,r=<nonce>`.
    ///
    /// "n,," is the GS2 header: no channel binding, no authzid.
    fn client_first(&mut self) -> Vec<u8> {
        let client_first_bare = format!(
            "n={},r={}",
            escape_username(&self.username),
            self.client_nonce
        );
        let message = format!("n,,{client_first_bare}");
        debug!(mechanism = H::name(), "sending client-first-message");
        self.state = State::ClientFirstSent { client_first_bare };
        message.into_bytes()
    }

    /// Answer the server-first-message with the client-final-message.
    fn client_final(&mut self, client_first_bare: &str, server_first: &[u8]) -> AuthResult<Vec<u8>> {
        let server_first = std::str::from_utf8(server_first).map_err(|_| {
            AuthError::InvalidMessage("invalid UTF-8 in server-first-message".to_string())
        })?;
        let (combined_nonce, salt, iterations) = parse_server_first_message(server_first)?;

        if !combined_nonce.starts_with(&self.client_nonce)
            || combined_nonce.len() == self.client_nonce.len()
        {
            return Err(AuthError::NonceMismatch);
        }
        if iterations < MIN_ITERATIONS {
            return Err(AuthError::InvalidMessage(format!(
                "iteration count {iterations} below minimum {MIN_ITERATIONS}"
            )));
        }

        let salted_password = H::pbkdf2(self.password.as_bytes(), &salt, iterations);
        let client_key = H::hmac(&salted_password, b"Client Key");
        let stored_key = H::hash(&client_key);
        let server_key = H::hmac(&salted_password, b"Server Key");

        // c=biws is base64("n,,"), the GS2 header.
        let client_final_without_proof = format!("c=biws,r={combined_nonce}");
        let auth_message =
            format!("{client_first_bare},{server_first},{client_final_without_proof}");

        let client_signature = H::hmac(&stored_key, auth_message.as_bytes());
        let client_proof: Vec<u8> = client_key
            .iter()
            .zip(client_signature.iter())
            .map(|(a, b)| a ^ b)
            .collect();

        let expected_server_signature = H::hmac(&server_key, auth_message.as_bytes());
        self.state = State::ClientFinalSent {
            expected_server_signature,
        };

        debug!(mechanism = H::name(), iterations, "sending client-final-message");
        Ok(format!(
            "{client_final_without_proof},p={}",
            BASE64.encode(client_proof)
        )
        .into_bytes())
    }

    /// Verify the server-final-message `v=<signature>`.
    fn verify_server_final(expected: &[u8], server_final: &[u8]) -> AuthResult<()> {
        let server_final = std::str::from_utf8(server_final).map_err(|_| {
            AuthError::InvalidMessage("invalid UTF-8 in server-final-message".to_string())
        })?;

        if let Some(error) = server_final.strip_prefix("e=") {
            return Err(AuthError::InvalidMessage(format!("server error: {error}")));
        }

        let verifier = server_final
            .split(',')
            .find_map(|part| part.strip_prefix("v="))
            .ok_or_else(|| AuthError::InvalidMessage("missing verifier (v=)".to_string()))?;
        let signature = BASE64
            .decode(verifier)
            .map_err(|e| AuthError::InvalidMessage(format!("invalid base64 verifier: {e}")))?;

        if signature != expected {
            return Err(AuthError::ServerSignatureMismatch);
        }
        Ok(())
    }
}

impl<H: ScramHash> SaslClient for ScramClient<H> {
    fn mechanism_name(&self) -> &'static str {
        H::name()
    }

    fn step(&mut self, challenge: Option<&[u8]>) -> AuthResult<Option<Vec<u8>>> {
        let state = std::mem::replace(&mut self.state, State::Done);
        match (state, challenge) {
            (State::Initial, None) => Ok(Some(self.client_first())),
            (State::ClientFirstSent { client_first_bare }, Some(server_first)) => {
                self.client_final(&client_first_bare, server_first).map(Some)
            }
            (
                State::ClientFinalSent {
                    expected_server_signature,
                },
                Some(server_final),
            ) => {
                Self::verify_server_final(&expected_server_signature, server_final)?;
                debug!(mechanism = H::name(), "SCRAM server signature verified");
                Ok(None)
            }
            (State::Done, _) => Err(AuthError::OutOfOrder("SCRAM exchange already finished")),
            (State::Initial, Some(_)) => {
                Err(AuthError::OutOfOrder("SCRAM got a challenge before client-first"))
            }
            (_, None) => Err(AuthError::OutOfOrder("SCRAM expected a server message")),
        }
    }
}

/// Escape a username for the `n=` attribute (RFC 5802 saslname).
fn escape_username(username: &str) -> String {
    username.replace('=', "=3D").replace(',', "=2C")
}

/// Parse server-first-message to extract combined nonce, salt, and iterations.
fn parse_server_first_message(message: &str) -> AuthResult<(String, Vec<u8>, u32)> {
    let mut combined_nonce = None;
    let mut salt = None;
    let mut iterations = None;

    for part in message.split(',') {
        if let Some(value) = part.strip_prefix("r=") {
            combined_nonce = Some(value.to_string());
        } else if let Some(value) = part.strip_prefix("s=") {
            salt = Some(
                BASE64
                    .decode(value)
                    .map_err(|e| AuthError::InvalidMessage(format!("invalid base64 salt: {e}")))?,
            );
        } else if let Some(value) = part.strip_prefix("i=") {
            iterations = Some(value.parse::<u32>().map_err(|e| {
                AuthError::InvalidMessage(format!("invalid iteration count: {e}"))
            })?);
        }
    }

    let missing = |what: &str| AuthError::InvalidMessage(format!("missing {what}"));
    Ok((
        combined_nonce.ok_or_else(|| missing("nonce (r=)"))?,
        salt.ok_or_else(|| missing("salt (s=)"))?,
        iterations.ok_or_else(|| missing("iteration count (i=)"))?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 7677 section 3 example exchange.
    const RFC_CLIENT_NONCE: &str = "rOprNGfwEbeRWgbNEkqO";
    const RFC_SERVER_FIRST: &str =
        "r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096";
    const RFC_CLIENT_FINAL: &str = "c=biws,r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,p=dHzbZapWIk4jUhN+Ute9ytag9zjfMHgsqmmiz7AndVQ=";
    const RFC_SERVER_FINAL: &str = "v=6rriTRBi23WpRR/wtup+mMhUZUn/dB5nLTJRsjl95G4=";

    fn rfc_client() -> ScramClient<ScramSha256> {
        ScramClient::with_nonce("user", "pencil", RFC_CLIENT_NONCE)
    }

    #[test]
    fn test_rfc7677_exchange() {
        let mut client = rfc_client();

        let first = client.step(None).unwrap().unwrap();
        assert_eq!(first, b"n,,n=user,r=rOprNGfwEbeRWgbNEkqO");

        let last = client
            .step(Some(RFC_SERVER_FIRST.as_bytes()))
            .unwrap()
            .unwrap();
        assert_eq!(String::from_utf8(last).unwrap(), RFC_CLIENT_FINAL);

        let done = client.step(Some(RFC_SERVER_FINAL.as_bytes())).unwrap();
        assert!(done.is_none());
    }

    #[test]
    fn test_bad_server_signature() {
        let mut client = rfc_client();
        client.step(None).unwrap();
        client.step(Some(RFC_SERVER_FIRST.as_bytes())).unwrap();

        let forged = format!("v={}", BASE64.encode([0u8; 32]));
        let result = client.step(Some(forged.as_bytes()));
        assert_eq!(result, Err(AuthError::ServerSignatureMismatch));
    }

    #[test]
    fn test_server_error_in_final_message() {
        let mut client = rfc_client();
        client.step(None).unwrap();
        client.step(Some(RFC_SERVER_FIRST.as_bytes())).unwrap();

        let result = client.step(Some(b"e=invalid-proof".as_slice()));
        assert!(matches!(result, Err(AuthError::InvalidMessage(m)) if m.contains("invalid-proof")));
    }

    #[test]
    fn test_nonce_mismatch() {
        let mut client = rfc_client();
        client.step(None).unwrap();

        let server_first = "r=someoneelse123,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096";
        let result = client.step(Some(server_first.as_bytes()));
        assert_eq!(result, Err(AuthError::NonceMismatch));
    }

    #[test]
    fn test_server_must_extend_nonce() {
        let mut client = rfc_client();
        client.step(None).unwrap();

        let server_first = format!("r={RFC_CLIENT_NONCE},s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096");
        let result = client.step(Some(server_first.as_bytes()));
        assert_eq!(result, Err(AuthError::NonceMismatch));
    }

    #[test]
    fn test_low_iteration_count_rejected() {
        let mut client = rfc_client();
        client.step(None).unwrap();

        let server_first = format!("r={RFC_CLIENT_NONCE}srv,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=1000");
        let result = client.step(Some(server_first.as_bytes()));
        assert!(matches!(result, Err(AuthError::InvalidMessage(m)) if m.contains("iteration")));
    }

    #[test]
    fn test_steps_out_of_order() {
        let mut client = rfc_client();
        assert!(matches!(
            client.step(Some(RFC_SERVER_FIRST.as_bytes())),
            Err(AuthError::OutOfOrder(_))
        ));

        let mut client = rfc_client();
        client.step(None).unwrap();
        assert!(matches!(client.step(None), Err(AuthError::OutOfOrder(_))));
    }

    #[test]
    fn test_parse_server_first_message_valid() {
        let message = "r=clientnonce123servernonce456,s=c2FsdDEyMzQ1Njc4OTAxMjM0NTY=,i=4096";
        let (nonce, salt, iterations) = parse_server_first_message(message).unwrap();
        assert_eq!(nonce, "clientnonce123servernonce456");
        assert_eq!(iterations, 4096);
        assert!(!salt.is_empty());
    }

    #[test]
    fn test_parse_server_first_message_with_extensions() {
        let message = "r=nonce,s=c2FsdA==,i=4096,e=extension";
        let (nonce, _, iterations) = parse_server_first_message(message).unwrap();
        assert_eq!(nonce, "nonce");
        assert_eq!(iterations, 4096);
    }

    #[test]
    fn test_parse_server_first_message_missing_parts() {
        let cases = [
            ("s=c2FsdA==,i=4096", "nonce"),
            ("r=nonce,i=4096", "salt"),
            ("r=nonce,s=c2FsdA==", "iteration"),
            ("r=nonce,s=!!!invalid-base64!!!,i=4096", "salt"),
            ("r=nonce,s=c2FsdA==,i=notanumber", "iteration"),
        ];
        for (message, expected) in cases {
            let err = parse_server_first_message(message).unwrap_err();
            assert!(
                err.to_string().contains(expected),
                "{message}: {err} should mention {expected}"
            );
        }
    }

    #[test]
    fn test_escape_username() {
        assert_eq!(escape_username("plain"), "plain");
        assert_eq!(escape_username("a=b,c"), "a=3Db=2Cc");
    }

    #[test]
    fn test_random_nonce_is_base64() {
        let mut client = ScramClient::<ScramSha512>::new("user", "pass");
        let first = String::from_utf8(client.step(None).unwrap().unwrap()).unwrap();
        let nonce = first.strip_prefix("n,,n=user,r=").unwrap();
        assert_eq!(nonce.len(), 32);
        assert!(BASE64.decode(nonce).is_ok());
    }

    #[test]
    fn test_sha512_output_lengths() {
        let salted = ScramSha512::pbkdf2(b"password", b"salt", MIN_ITERATIONS);
        assert_eq!(salted.len(), 64);
        assert_eq!(ScramSha512::hmac(&salted, b"Client Key").len(), 64);
        assert_eq!(ScramSha512::hash(b"data").len(), 64);
    }
}
