//! Decoded value representation.

use bytes::Bytes;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Utc};
use serde::ser::{Error as _, SerializeSeq};
use serde::{Serialize, Serializer};
use uuid::Uuid;

use crate::composite::{Object, Tuple};

/// A value produced or consumed by the value codecs.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Empty set; also marks an absent optional field.
    Nothing,
    /// `std::uuid`
    Uuid(Uuid),
    /// `std::str`
    Str(String),
    /// `std::bytes`
    Bytes(Bytes),
    /// `std::int16`
    Int16(i16),
    /// `std::int32`
    Int32(i32),
    /// `std::int64`
    Int64(i64),
    /// `std::float32`
    Float32(f32),
    /// `std::float64`
    Float64(f64),
    /// `std::bool`
    Bool(bool),
    /// `std::json`, kept as the server's text.
    Json(String),
    /// `std::datetime`
    Datetime(DateTime<Utc>),
    /// `cal::local_datetime`
    LocalDatetime(NaiveDateTime),
    /// `cal::local_date`
    LocalDate(NaiveDate),
    /// `cal::local_time`
    LocalTime(NaiveTime),
    /// `std::duration`
    Duration(TimeDelta),
    /// Enum member label.
    Enum(String),
    /// Set of values.
    Set(Vec<Value>),
    /// Array of values.
    Array(Vec<Value>),
    /// Positional or named tuple.
    Tuple(Tuple),
    /// Object shape.
    Object(Object),
    /// Range.
    Range(Range),
}

impl Value {
    /// Whether this is the empty set.
    #[must_use]
    pub fn is_nothing(&self) -> bool {
        matches!(self, Self::Nothing)
    }

    /// Short name of the value kind, used in error messages.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Nothing => "nothing",
            Self::Uuid(_) => "uuid",
            Self::Str(_) => "str",
            Self::Bytes(_) => "bytes",
            Self::Int16(_) => "int16",
            Self::Int32(_) => "int32",
            Self::Int64(_) => "int64",
            Self::Float32(_) => "float32",
            Self::Float64(_) => "float64",
            Self::Bool(_) => "bool",
            Self::Json(_) => "json",
            Self::Datetime(_) => "datetime",
            Self::LocalDatetime(_) => "local_datetime",
            Self::LocalDate(_) => "local_date",
            Self::LocalTime(_) => "local_time",
            Self::Duration(_) => "duration",
            Self::Enum(_) => "enum",
            Self::Set(_) => "set",
            Self::Array(_) => "array",
            Self::Tuple(t) if t.is_named() => "named tuple",
            Self::Tuple(_) => "tuple",
            Self::Object(_) => "object",
            Self::Range(_) => "range",
        }
    }

    /// Get the value as a string slice, if it is text.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) | Self::Enum(s) | Self::Json(s) => Some(s),
            _ => None,
        }
    }

    /// Get the value as an i64, widening smaller integers.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int16(v) => Some(i64::from(*v)),
            Self::Int32(v) => Some(i64::from(*v)),
            Self::Int64(v) => Some(*v),
            _ => None,
        }
    }

    /// Get the value as a tuple.
    #[must_use]
    pub fn as_tuple(&self) -> Option<&Tuple> {
        match self {
            Self::Tuple(t) => Some(t),
            _ => None,
        }
    }

    /// Get the value as an object.
    #[must_use]
    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }
}

/// A range value.
#[derive(Debug, Clone, PartialEq)]
pub struct Range {
    /// Lower bound; `None` when unbounded.
    pub lower: Option<Box<Value>>,
    /// Upper bound; `None` when unbounded.
    pub upper: Option<Box<Value>>,
    /// Whether the lower bound is included.
    pub inc_lower: bool,
    /// Whether the upper bound is included.
    pub inc_upper: bool,
    /// Whether this is the empty range.
    pub empty: bool,
}

impl Range {
    /// A `[lower, upper)` range.
    #[must_use]
    pub fn new(lower: Option<Value>, upper: Option<Value>) -> Self {
        Self {
            lower: lower.map(Box::new),
            upper: upper.map(Box::new),
            inc_lower: true,
            inc_upper: false,
            empty: false,
        }
    }

    /// The empty range.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            lower: None,
            upper: None,
            inc_lower: false,
            inc_upper: false,
            empty: true,
        }
    }
}

impl Serialize for Range {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(5))?;
        map.serialize_entry("lower", &self.lower)?;
        map.serialize_entry("upper", &self.upper)?;
        map.serialize_entry("inc_lower", &self.inc_lower)?;
        map.serialize_entry("inc_upper", &self.inc_upper)?;
        map.serialize_entry("empty", &self.empty)?;
        map.end()
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Nothing => serializer.serialize_none(),
            Self::Uuid(v) => serializer.collect_str(v),
            Self::Str(v) | Self::Enum(v) => serializer.serialize_str(v),
            Self::Bytes(v) => serializer.serialize_bytes(v),
            Self::Int16(v) => serializer.serialize_i16(*v),
            Self::Int32(v) => serializer.serialize_i32(*v),
            Self::Int64(v) => serializer.serialize_i64(*v),
            Self::Float32(v) => serializer.serialize_f32(*v),
            Self::Float64(v) => serializer.serialize_f64(*v),
            Self::Bool(v) => serializer.serialize_bool(*v),
            Self::Json(text) => serde_json::from_str::<serde_json::Value>(text)
                .map_err(S::Error::custom)?
                .serialize(serializer),
            Self::Datetime(v) => serializer.serialize_str(&v.to_rfc3339()),
            Self::LocalDatetime(v) => serializer.collect_str(v),
            Self::LocalDate(v) => serializer.collect_str(v),
            Self::LocalTime(v) => serializer.collect_str(v),
            Self::Duration(v) => serializer.collect_str(v),
            Self::Set(items) | Self::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Tuple(t) => t.serialize(serializer),
            Self::Object(o) => o.serialize(serializer),
            Self::Range(r) => r.serialize(serializer),
        }
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Self::$variant(v)
                }
            }
        )*
    };
}

impl_from! {
    Uuid => Uuid,
    String => Str,
    Bytes => Bytes,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    f32 => Float32,
    f64 => Float64,
    bool => Bool,
    DateTime<Utc> => Datetime,
    NaiveDateTime => LocalDatetime,
    NaiveDate => LocalDate,
    NaiveTime => LocalTime,
    TimeDelta => Duration,
    Tuple => Tuple,
    Object => Object,
    Range => Range,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Self::Json(v.to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Nothing, Into::into)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Self::Array(v.into_iter().map(Into::into).collect())
    }
}
