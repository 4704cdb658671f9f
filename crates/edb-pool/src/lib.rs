//! # edb-pool
//!
//! Bounded async connection pool with scoped checkout.
//!
//! The pool is generic over a [`ManageConnection`] implementation, so it
//! knows nothing about the protocol; the client crate plugs in a manager
//! that opens and authenticates protocol connections.
//!
//! ## Features
//!
//! - Hard cap on live connections (`max_connections`), with FIFO waiting
//!   and an acquisition timeout
//! - RAII checkout: [`PooledConnection`] returns itself on drop, or is
//!   discarded when the manager reports it broken
//! - Optional validation on checkout
//! - Idle reaping beyond `min_connections` and a maximum connection lifetime
//!
//! ## Example
//!
//! ```rust,ignore
//! use edb_pool::{Pool, PoolConfig};
//!
//! let config = PoolConfig::new()
//!     .max_connections(20)
//!     .idle_timeout(Duration::from_secs(300));
//!
//! let pool = Pool::new(manager, config).await?;
//! let conn = pool.get().await?;
//! // Use connection...
//! // Connection automatically returned to pool on drop
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod pool;

pub use config::PoolConfig;
pub use error::PoolError;
pub use lifecycle::{ConnectionMetadata, ManageConnection};
pub use pool::{Pool, PoolStatus, PooledConnection};
