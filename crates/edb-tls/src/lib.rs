//! # edb-tls
//!
//! TLS setup for EdgeDB connections.
//!
//! The binary protocol runs over TLS with the `edgedb-binary` ALPN id.
//! [`SecurityMode`] selects how the server is authenticated:
//!
//! | Mode | Transport | Chain verified | Host name verified |
//! |------|-----------|----------------|--------------------|
//! | `Strict` | TLS | yes | yes |
//! | `NoHostVerification` | TLS | yes | no |
//! | `Insecure` | plaintext | - | - |
//!
//! `Default` behaves like `Strict`, or like `NoHostVerification` when a
//! custom certificate authority is configured.
//!
//! ```rust,ignore
//! use edb_tls::{SecurityMode, TlsConfig, TlsConnector};
//!
//! let config = TlsConfig::new()
//!     .with_ca_pem(&pem)?
//!     .security_mode(SecurityMode::Strict);
//! let connector = TlsConnector::new(config)?;
//! let stream = connector.connect(tcp, "db.example.com").await?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod connector;
pub mod error;

pub use config::{BINARY_ALPN, SecurityMode, TlsConfig};
pub use connector::TlsConnector;
pub use error::TlsError;

pub use tokio_rustls::client::TlsStream;
