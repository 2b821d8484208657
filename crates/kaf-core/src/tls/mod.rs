//! TLS support for broker connections.
//!
//! # Usage
//!
//! ```rust,ignore
//! use kaf_core::tls::{TlsConnector, TlsSettings};
//!
//! let settings = TlsSettings { ca_file: Some("ca.pem".into()), ..Default::default() };
//! let connector = TlsConnector::new(&settings)?;
//! let tls_stream = connector.connect("kafka.example.com", tcp_stream).await?;
//! ```

pub mod client;

pub use client::{TlsConnector, TlsSettings};
