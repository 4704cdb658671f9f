//! # edb-types
//!
//! Value model and binary value codecs for the EdgeDB protocol.
//!
//! Query results arrive as raw element payloads described by type
//! descriptors. This crate turns descriptors into a tree of [`Codec`]s
//! (cached per connection by [`CodecCache`]) and converts between wire
//! bytes and [`Value`]s.
//!
//! ## Type Mappings
//!
//! | EdgeDB Type | Value | Rust Type |
//! |-------------|-------|-----------|
//! | `std::bool` | `Bool` | `bool` |
//! | `std::int16` | `Int16` | `i16` |
//! | `std::int32` | `Int32` | `i32` |
//! | `std::int64` | `Int64` | `i64` |
//! | `std::float32` | `Float32` | `f32` |
//! | `std::float64` | `Float64` | `f64` |
//! | `std::str` | `Str` | `String` |
//! | `std::bytes` | `Bytes` | `bytes::Bytes` |
//! | `std::uuid` | `Uuid` | `uuid::Uuid` |
//! | `std::json` | `Json` | `serde_json::Value` |
//! | `std::datetime` | `Datetime` | `chrono::DateTime<Utc>` |
//! | `cal::local_datetime` | `LocalDatetime` | `chrono::NaiveDateTime` |
//! | `cal::local_date` | `LocalDate` | `chrono::NaiveDate` |
//! | `cal::local_time` | `LocalTime` | `chrono::NaiveTime` |
//! | `std::duration` | `Duration` | `chrono::TimeDelta` |
//!
//! Tuples, named tuples and objects decode into [`Tuple`] and [`Object`].

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod args;
pub mod cache;
pub mod codec;
pub mod composite;
pub mod error;
pub mod from_value;
pub mod value;

pub use args::QueryArgs;
pub use cache::{CodecCache, MAX_NESTING_DEPTH};
pub use codec::{Codec, ScalarCodec};
pub use composite::{Object, ObjectShape, ShapeField, Tuple};
pub use error::{DecodeError, EncodeError, TypeError};
pub use from_value::FromValue;
pub use value::{Range, Value};
