//! # edb-auth
//!
//! Authentication for EdgeDB connections, isolated from connection logic.
//!
//! | Method | Credentials | Exchange |
//! |--------|-------------|----------|
//! | SCRAM-SHA-256 | [`Credentials::Password`] | SASL messages (binary) or `/auth/token` (HTTP) |
//! | Secret key | [`Credentials::SecretKey`] | `secret_key` handshake parameter or bearer token |
//! | Trust | [`Credentials::Trust`] | none |

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod credentials;
pub mod error;
pub mod scram;

pub use credentials::Credentials;
pub use error::AuthError;
pub use scram::{MECHANISM as SCRAM_MECHANISM, ScramClient, ScramServer};
