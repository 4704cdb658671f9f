//! # edb-client
//!
//! High-level async EdgeDB client with pooled connections and retrying
//! transactions.
//!
//! ## Features
//!
//! - **Binary protocol** over TCP with TLS (rustls), SCRAM-SHA-256 or
//!   secret-key authentication
//! - **HTTP transport**: command batches posted to `/db/{database}`; opening
//!   it performs no I/O
//! - **Described statement cache** so repeated queries skip the parse round
//!   trip
//! - **Stale type cache recovery**: codecs are rebuilt and the query retried
//!   once when the server reports a type mismatch
//! - **Bounded pool** with acquisition timeout; connections left mid-command
//!   are discarded
//! - **Transactions** re-run on transient errors with exponential backoff
//!
//! ## Connection States
//!
//! ```text
//! Disconnected -> Connecting -> Authenticating -> Idle <-> Executing
//! any -> Disconnected (transport failure, fatal error, timeout, close)
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use edb_client::{Client, ConnectOptions, QueryArgs};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), edb_client::Error> {
//!     let client = Client::new(ConnectOptions::from_dsn("edgedb://edgedb@localhost:5656/main")).await?;
//!
//!     let names = client.query("select User.name", &QueryArgs::none()).await?;
//!     let count: i64 = client
//!         .query_single_as("select count(User) filter .active = <bool>$0", &(true,).into())
//!         .await?;
//!
//!     client
//!         .transaction(async |tx| {
//!             tx.execute("insert User { name := 'Alice' }", &QueryArgs::none()).await
//!         })
//!         .await?;
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

mod binary;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
mod http;
pub mod invalidation;
pub mod state;
pub mod statement_cache;
pub mod transaction;

pub use client::{Client, ConnectionManager};
pub use config::{ConnectOptions, ConnectParams, RetryPolicy, TransportKind, http_address};
pub use connection::{Connection, Query, QueryResult};
pub use error::{Error, ErrorCategory, Result, ServerError, ServerErrorKind};
pub use invalidation::InvalidationPolicy;
pub use state::ConnectionState;
pub use statement_cache::StatementCache;
pub use transaction::{IsolationLevel, Transaction, TransactionOptions};

pub use edb_pool::{PoolConfig, PoolStatus};
pub use edb_protocol::{Cardinality, OutputFormat, TransactionState};
pub use edb_tls::SecurityMode;
pub use edb_types::{FromValue, Object, QueryArgs, Tuple, Value};
