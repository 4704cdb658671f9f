//! # edb-testing
//!
//! Test infrastructure for EdgeDB driver development.
//!
//! Provides an in-process mock server that speaks both the binary protocol
//! and the HTTP transport, plus canned type descriptors for common shapes.
//!
//! ## Mock Server Example
//!
//! ```rust,ignore
//! use edb_testing::{MockResponse, MockResult, MockServer};
//!
//! #[tokio::test]
//! async fn test_with_mock_server() {
//!     let server = MockServer::builder()
//!         .with_password("edgedb", "secret")
//!         .with_response("select 42", MockResponse::Result(MockResult::int64(&[42]).unwrap()))
//!         .build()
//!         .await
//!         .unwrap();
//!
//!     // Connect your client to server.addr()
//!     let addr = server.addr();
//!     // ...
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod fixtures;
pub mod http;
pub mod mock_server;

pub use http::BINARY_CONTENT_TYPE;
pub use mock_server::{
    CommandKind, MockAuth, MockResponse, MockResult, MockServer, MockServerBuilder,
    MockServerConfig, MockServerError, RecordedCommand, Sequence,
};
