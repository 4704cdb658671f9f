//! Trait for converting decoded values into Rust types.

use bytes::Bytes;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Utc};
use uuid::Uuid;

use crate::composite::{Object, Tuple};
use crate::error::TypeError;
use crate::value::Value;

/// Types that can be built from a decoded [`Value`].
///
/// Conversions consume the value. Empty values convert only into
/// `Option<T>` (as `None`) or into [`Value`] itself.
pub trait FromValue: Sized {
    /// Convert a value into this type.
    fn from_value(value: Value) -> Result<Self, TypeError>;
}

fn mismatch<T>(expected: &'static str, value: &Value) -> Result<T, TypeError> {
    if value.is_nothing() {
        Err(TypeError::UnexpectedNothing)
    } else {
        Err(TypeError::TypeMismatch {
            expected,
            actual: value.kind(),
        })
    }
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self, TypeError> {
        Ok(value)
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self, TypeError> {
        if value.is_nothing() {
            Ok(None)
        } else {
            T::from_value(value).map(Some)
        }
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self, TypeError> {
        match value {
            Value::Bool(v) => Ok(v),
            other => mismatch("bool", &other),
        }
    }
}

impl FromValue for i16 {
    fn from_value(value: Value) -> Result<Self, TypeError> {
        match value {
            Value::Int16(v) => Ok(v),
            other => mismatch("i16", &other),
        }
    }
}

impl FromValue for i32 {
    fn from_value(value: Value) -> Result<Self, TypeError> {
        match value {
            Value::Int32(v) => Ok(v),
            Value::Int16(v) => Ok(i32::from(v)),
            Value::Int64(v) => i32::try_from(v).map_err(|_| TypeError::OutOfRange {
                target_type: "i32",
            }),
            other => mismatch("i32", &other),
        }
    }
}

impl FromValue for i64 {
    fn from_value(value: Value) -> Result<Self, TypeError> {
        match value.as_i64() {
            Some(v) => Ok(v),
            None => mismatch("i64", &value),
        }
    }
}

impl FromValue for f32 {
    fn from_value(value: Value) -> Result<Self, TypeError> {
        match value {
            Value::Float32(v) => Ok(v),
            other => mismatch("f32", &other),
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self, TypeError> {
        match value {
            Value::Float64(v) => Ok(v),
            Value::Float32(v) => Ok(f64::from(v)),
            other => mismatch("f64", &other),
        }
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self, TypeError> {
        match value {
            Value::Str(s) | Value::Enum(s) => Ok(s),
            other => mismatch("String", &other),
        }
    }
}

impl FromValue for Bytes {
    fn from_value(value: Value) -> Result<Self, TypeError> {
        match value {
            Value::Bytes(b) => Ok(b),
            other => mismatch("Bytes", &other),
        }
    }
}

impl FromValue for Uuid {
    fn from_value(value: Value) -> Result<Self, TypeError> {
        match value {
            Value::Uuid(v) => Ok(v),
            other => mismatch("Uuid", &other),
        }
    }
}

impl FromValue for DateTime<Utc> {
    fn from_value(value: Value) -> Result<Self, TypeError> {
        match value {
            Value::Datetime(v) => Ok(v),
            other => mismatch("DateTime<Utc>", &other),
        }
    }
}

impl FromValue for NaiveDateTime {
    fn from_value(value: Value) -> Result<Self, TypeError> {
        match value {
            Value::LocalDatetime(v) => Ok(v),
            other => mismatch("NaiveDateTime", &other),
        }
    }
}

impl FromValue for NaiveDate {
    fn from_value(value: Value) -> Result<Self, TypeError> {
        match value {
            Value::LocalDate(v) => Ok(v),
            other => mismatch("NaiveDate", &other),
        }
    }
}

impl FromValue for NaiveTime {
    fn from_value(value: Value) -> Result<Self, TypeError> {
        match value {
            Value::LocalTime(v) => Ok(v),
            other => mismatch("NaiveTime", &other),
        }
    }
}

impl FromValue for TimeDelta {
    fn from_value(value: Value) -> Result<Self, TypeError> {
        match value {
            Value::Duration(v) => Ok(v),
            other => mismatch("TimeDelta", &other),
        }
    }
}

impl FromValue for serde_json::Value {
    fn from_value(value: Value) -> Result<Self, TypeError> {
        match value {
            Value::Json(text) => {
                serde_json::from_str(&text).map_err(|e| TypeError::InvalidJson(e.to_string()))
            }
            other => mismatch("serde_json::Value", &other),
        }
    }
}

impl FromValue for Tuple {
    fn from_value(value: Value) -> Result<Self, TypeError> {
        match value {
            Value::Tuple(t) => Ok(t),
            other => mismatch("Tuple", &other),
        }
    }
}

impl FromValue for Object {
    fn from_value(value: Value) -> Result<Self, TypeError> {
        match value {
            Value::Object(o) => Ok(o),
            other => mismatch("Object", &other),
        }
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: Value) -> Result<Self, TypeError> {
        match value {
            Value::Array(items) | Value::Set(items) => {
                items.into_iter().map(T::from_value).collect()
            }
            other => mismatch("Vec", &other),
        }
    }
}

macro_rules! impl_tuple_from_value {
    ($len:literal => $($name:ident),+) => {
        impl<$($name: FromValue),+> FromValue for ($($name,)+) {
            fn from_value(value: Value) -> Result<Self, TypeError> {
                let tuple = match value {
                    Value::Tuple(t) => t,
                    other => return mismatch("tuple", &other),
                };
                if tuple.len() != $len {
                    return Err(TypeError::TupleLength {
                        expected: $len,
                        actual: tuple.len(),
                    });
                }
                let mut values = tuple.into_values().into_iter();
                Ok(($(
                    $name::from_value(values.next().unwrap_or(Value::Nothing))?,
                )+))
            }
        }
    };
}

impl_tuple_from_value!(1 => A);
impl_tuple_from_value!(2 => A, B);
impl_tuple_from_value!(3 => A, B, C);
impl_tuple_from_value!(4 => A, B, C, D);
impl_tuple_from_value!(5 => A, B, C, D, E);
impl_tuple_from_value!(6 => A, B, C, D, E, F);
