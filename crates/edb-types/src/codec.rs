//! Value codec tree.
//!
//! Each [`Codec`] node encodes and decodes one type. Composite nodes hold
//! their children behind `Arc`, so a type that appears in several places
//! shares one codec. Trees are built by [`CodecCache`](crate::CodecCache).
//!
//! Decoding consumes exactly the region it is given; a short or long
//! region is an error. Encoding validates the value against the codec
//! before writing, and rolls the buffer back on failure, so a failed encode
//! never leaves partial output.

use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeDelta, Timelike};
use uuid::Uuid;

use crate::args::QueryArgs;
use crate::composite::{Object, ObjectShape, Tuple};
use crate::error::{DecodeError, EncodeError};
use crate::value::{Range, Value};

/// Microseconds between the Unix epoch and 2000-01-01T00:00:00Z.
const EPOCH_2000_MICROS: i64 = 946_684_800_000_000;

/// `num_days_from_ce` of 2000-01-01.
const EPOCH_2000_DAYS_CE: i32 = 730_120;

const MICROS_PER_DAY: i64 = 86_400_000_000;

const RANGE_EMPTY: u8 = 0x01;
const RANGE_INC_LOWER: u8 = 0x02;
const RANGE_INC_UPPER: u8 = 0x04;
const RANGE_INF_LOWER: u8 = 0x08;
const RANGE_INF_UPPER: u8 = 0x10;

const JSON_FORMAT: u8 = 1;

static NOTHING: Value = Value::Nothing;

/// Base scalar kinds with a fixed wire conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarCodec {
    /// 16-byte UUID.
    Uuid,
    /// UTF-8 text.
    Str,
    /// Raw bytes.
    Bytes,
    /// 2-byte big-endian integer.
    Int16,
    /// 4-byte big-endian integer.
    Int32,
    /// 8-byte big-endian integer.
    Int64,
    /// 4-byte IEEE 754.
    Float32,
    /// 8-byte IEEE 754.
    Float64,
    /// One byte, 0 or 1.
    Bool,
    /// Format byte plus UTF-8 JSON text.
    Json,
    /// Microseconds since 2000-01-01 UTC.
    Datetime,
    /// Microseconds since 2000-01-01, no zone.
    LocalDatetime,
    /// Days since 2000-01-01.
    LocalDate,
    /// Microseconds since midnight.
    LocalTime,
    /// Microseconds, days and months.
    Duration,
}

impl ScalarCodec {
    /// Name of the scalar, used in errors.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Uuid => "uuid",
            Self::Str => "str",
            Self::Bytes => "bytes",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::Bool => "bool",
            Self::Json => "json",
            Self::Datetime => "datetime",
            Self::LocalDatetime => "local_datetime",
            Self::LocalDate => "local_date",
            Self::LocalTime => "local_time",
            Self::Duration => "duration",
        }
    }

    fn decode(self, buf: &[u8]) -> Result<Value, DecodeError> {
        let value = match self {
            Self::Uuid => Value::Uuid(Uuid::from_bytes(fixed(buf, "uuid")?)),
            Self::Str => Value::Str(utf8(buf, "str")?),
            Self::Bytes => Value::Bytes(Bytes::copy_from_slice(buf)),
            Self::Int16 => Value::Int16(i16::from_be_bytes(fixed(buf, "int16")?)),
            Self::Int32 => Value::Int32(i32::from_be_bytes(fixed(buf, "int32")?)),
            Self::Int64 => Value::Int64(i64::from_be_bytes(fixed(buf, "int64")?)),
            Self::Float32 => Value::Float32(f32::from_be_bytes(fixed(buf, "float32")?)),
            Self::Float64 => Value::Float64(f64::from_be_bytes(fixed(buf, "float64")?)),
            Self::Bool => match fixed::<1>(buf, "bool")?[0] {
                0 => Value::Bool(false),
                1 => Value::Bool(true),
                other => return Err(DecodeError::InvalidBool(other)),
            },
            Self::Json => {
                let Some((&format, text)) = buf.split_first() else {
                    return Err(DecodeError::Truncated {
                        needed: 1,
                        available: 0,
                    });
                };
                if format != JSON_FORMAT {
                    return Err(DecodeError::InvalidJsonFormat(format));
                }
                Value::Json(utf8(text, "json")?)
            }
            Self::Datetime => {
                let micros = i64::from_be_bytes(fixed(buf, "datetime")?);
                let unix = micros
                    .checked_add(EPOCH_2000_MICROS)
                    .ok_or(DecodeError::OutOfRange("datetime"))?;
                Value::Datetime(
                    DateTime::from_timestamp_micros(unix).ok_or(DecodeError::OutOfRange("datetime"))?,
                )
            }
            Self::LocalDatetime => {
                let micros = i64::from_be_bytes(fixed(buf, "local_datetime")?);
                let unix = micros
                    .checked_add(EPOCH_2000_MICROS)
                    .ok_or(DecodeError::OutOfRange("local_datetime"))?;
                let dt = DateTime::from_timestamp_micros(unix)
                    .ok_or(DecodeError::OutOfRange("local_datetime"))?;
                Value::LocalDatetime(dt.naive_utc())
            }
            Self::LocalDate => {
                let days = i32::from_be_bytes(fixed(buf, "local_date")?);
                let date = days
                    .checked_add(EPOCH_2000_DAYS_CE)
                    .and_then(NaiveDate::from_num_days_from_ce_opt)
                    .ok_or(DecodeError::OutOfRange("local_date"))?;
                Value::LocalDate(date)
            }
            Self::LocalTime => {
                let micros = i64::from_be_bytes(fixed(buf, "local_time")?);
                if !(0..MICROS_PER_DAY).contains(&micros) {
                    return Err(DecodeError::OutOfRange("local_time"));
                }
                let secs = u32::try_from(micros / 1_000_000)
                    .map_err(|_| DecodeError::OutOfRange("local_time"))?;
                let nanos = u32::try_from(micros % 1_000_000 * 1_000)
                    .map_err(|_| DecodeError::OutOfRange("local_time"))?;
                Value::LocalTime(
                    NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos)
                        .ok_or(DecodeError::OutOfRange("local_time"))?,
                )
            }
            Self::Duration => {
                let raw: [u8; 16] = fixed(buf, "duration")?;
                let mut micros = [0u8; 8];
                micros.copy_from_slice(&raw[..8]);
                let micros = i64::from_be_bytes(micros);
                if raw[8..].iter().any(|b| *b != 0) {
                    // days and months are reserved for relative durations
                    return Err(DecodeError::OutOfRange("duration"));
                }
                Value::Duration(TimeDelta::microseconds(micros))
            }
        };
        Ok(value)
    }

    fn encode(self, dst: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
        match (self, value) {
            (Self::Uuid, Value::Uuid(v)) => dst.put_slice(v.as_bytes()),
            (Self::Str, Value::Str(v)) => dst.put_slice(v.as_bytes()),
            (Self::Bytes, Value::Bytes(v)) => dst.put_slice(v),
            (Self::Int16, v) => dst.put_i16(int_in_range(v, "int16")?),
            (Self::Int32, v) => dst.put_i32(int_in_range(v, "int32")?),
            (Self::Int64, v) => dst.put_i64(int_in_range(v, "int64")?),
            (Self::Float32, Value::Float32(v)) => dst.put_f32(*v),
            (Self::Float64, Value::Float64(v)) => dst.put_f64(*v),
            (Self::Float64, Value::Float32(v)) => dst.put_f64(f64::from(*v)),
            (Self::Bool, Value::Bool(v)) => dst.put_u8(u8::from(*v)),
            (Self::Json, Value::Json(text)) => {
                dst.put_u8(JSON_FORMAT);
                dst.put_slice(text.as_bytes());
            }
            (Self::Datetime, Value::Datetime(v)) => {
                let micros = v
                    .timestamp_micros()
                    .checked_sub(EPOCH_2000_MICROS)
                    .ok_or(EncodeError::OutOfRange("datetime"))?;
                dst.put_i64(micros);
            }
            (Self::LocalDatetime, Value::LocalDatetime(v)) => {
                let micros = v
                    .and_utc()
                    .timestamp_micros()
                    .checked_sub(EPOCH_2000_MICROS)
                    .ok_or(EncodeError::OutOfRange("local_datetime"))?;
                dst.put_i64(micros);
            }
            (Self::LocalDate, Value::LocalDate(v)) => {
                let days = v
                    .num_days_from_ce()
                    .checked_sub(EPOCH_2000_DAYS_CE)
                    .ok_or(EncodeError::OutOfRange("local_date"))?;
                dst.put_i32(days);
            }
            (Self::LocalTime, Value::LocalTime(v)) => {
                // leap-second nanos above 1e9 are clamped into the last microsecond
                let sub_micros = i64::from(v.nanosecond().min(999_999_999) / 1_000);
                dst.put_i64(i64::from(v.num_seconds_from_midnight()) * 1_000_000 + sub_micros);
            }
            (Self::Duration, Value::Duration(v)) => {
                let micros = v
                    .num_microseconds()
                    .ok_or(EncodeError::OutOfRange("duration"))?;
                dst.put_i64(micros);
                dst.put_i32(0);
                dst.put_i32(0);
            }
            (scalar, other) => {
                return Err(EncodeError::TypeMismatch {
                    expected: scalar.name(),
                    actual: other.kind(),
                });
            }
        }
        Ok(())
    }
}

fn int_in_range<T>(value: &Value, target: &'static str) -> Result<T, EncodeError>
where
    T: TryFrom<i64>,
{
    let wide = match value {
        Value::Int16(v) => i64::from(*v),
        Value::Int32(v) => i64::from(*v),
        Value::Int64(v) => *v,
        other => {
            return Err(EncodeError::TypeMismatch {
                expected: target,
                actual: other.kind(),
            });
        }
    };
    T::try_from(wide).map_err(|_| EncodeError::OutOfRange(target))
}

fn length_error(kind: &'static str, expected: usize, actual: usize) -> DecodeError {
    DecodeError::InvalidLength {
        kind,
        expected,
        actual,
    }
}

fn fixed<const N: usize>(buf: &[u8], kind: &'static str) -> Result<[u8; N], DecodeError> {
    buf.try_into().map_err(|_| length_error(kind, N, buf.len()))
}

fn utf8(buf: &[u8], kind: &'static str) -> Result<String, DecodeError> {
    std::str::from_utf8(buf)
        .map(str::to_owned)
        .map_err(|_| DecodeError::InvalidUtf8(kind))
}

/// Cursor over a value region.
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.buf.len() < n {
            return Err(DecodeError::Truncated {
                needed: n,
                available: self.buf.len(),
            });
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn i32(&mut self) -> Result<i32, DecodeError> {
        let raw = self.take(4)?;
        Ok(i32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    /// Length-prefixed element; `None` for the absent marker (-1).
    fn element(&mut self) -> Result<Option<&'a [u8]>, DecodeError> {
        match self.i32()? {
            -1 => Ok(None),
            len if len < 0 => Err(DecodeError::NegativeLength(len)),
            len => self.take(len as usize).map(Some),
        }
    }

    fn finish(&self, kind: &'static str) -> Result<(), DecodeError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(DecodeError::TrailingBytes {
                kind,
                extra: self.buf.len(),
            })
        }
    }
}

/// Write `i32` length + payload, back-patching the length.
fn write_element<F>(dst: &mut BytesMut, body: F) -> Result<(), EncodeError>
where
    F: FnOnce(&mut BytesMut) -> Result<(), EncodeError>,
{
    let at = dst.len();
    dst.put_i32(0);
    body(dst)?;
    let len = dst.len() - at - 4;
    let len = i32::try_from(len).map_err(|_| EncodeError::TooLong(len))?;
    dst[at..at + 4].copy_from_slice(&len.to_be_bytes());
    Ok(())
}

fn count_i32(count: usize) -> Result<i32, EncodeError> {
    i32::try_from(count).map_err(|_| EncodeError::TooLong(count))
}

/// A node of the codec tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Codec {
    /// "No data": empty payload, decodes to [`Value::Nothing`].
    Nothing,
    /// Base scalar.
    Scalar(ScalarCodec),
    /// Enumeration with its declared members.
    Enum {
        /// Member labels.
        members: Arc<[String]>,
    },
    /// Positional or named tuple.
    Tuple {
        /// Element names for named tuples.
        names: Option<Arc<[Arc<str>]>>,
        /// Element codecs.
        elements: Vec<Arc<Codec>>,
    },
    /// Object or input shape.
    Object {
        /// Declared fields.
        shape: Arc<ObjectShape>,
        /// Field codecs, in shape order.
        elements: Vec<Arc<Codec>>,
    },
    /// Array.
    Array {
        /// Element codec.
        element: Arc<Codec>,
    },
    /// Set.
    Set {
        /// Element codec.
        element: Arc<Codec>,
    },
    /// Range.
    Range {
        /// Bound codec.
        element: Arc<Codec>,
    },
}

impl Codec {
    /// Name of the codec kind, used in errors.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Nothing => "nothing",
            Self::Scalar(s) => s.name(),
            Self::Enum { .. } => "enum",
            Self::Tuple { names: Some(_), .. } => "named tuple",
            Self::Tuple { names: None, .. } => "tuple",
            Self::Object { .. } => "object",
            Self::Array { .. } => "array",
            Self::Set { .. } => "set",
            Self::Range { .. } => "range",
        }
    }

    /// Decode a value from exactly `buf`.
    pub fn decode(&self, buf: &[u8]) -> Result<Value, DecodeError> {
        match self {
            Self::Nothing => {
                Reader::new(buf).finish("nothing")?;
                Ok(Value::Nothing)
            }
            Self::Scalar(scalar) => scalar.decode(buf),
            Self::Enum { members } => {
                let label = utf8(buf, "enum")?;
                if !members.iter().any(|m| *m == label) {
                    return Err(DecodeError::UnknownEnumMember(label));
                }
                Ok(Value::Enum(label))
            }
            Self::Tuple { names, elements } => {
                let kind = self.kind();
                let mut reader = Reader::new(buf);
                check_count(&mut reader, kind, elements.len())?;
                let mut values = Vec::with_capacity(elements.len());
                for (index, codec) in elements.iter().enumerate() {
                    reader.i32()?;
                    let data = reader.element()?.ok_or(DecodeError::MissingElement(index))?;
                    values.push(codec.decode(data)?);
                }
                reader.finish(kind)?;
                Ok(Value::Tuple(Tuple::from_parts(names.as_deref(), values)))
            }
            Self::Object { shape, elements } => {
                let mut reader = Reader::new(buf);
                check_count(&mut reader, "object", elements.len())?;
                let mut values = Vec::with_capacity(elements.len());
                for (field, codec) in shape.fields().iter().zip(elements) {
                    reader.i32()?;
                    match reader.element()? {
                        Some(data) => values.push(codec.decode(data)?),
                        None if field.cardinality.allows_empty() => values.push(Value::Nothing),
                        None => return Err(DecodeError::MissingRequired(field.name.to_string())),
                    }
                }
                reader.finish("object")?;
                Ok(Value::Object(Object::new(Arc::clone(shape), values)))
            }
            Self::Array { element } => decode_array(buf, element, "array").map(Value::Array),
            Self::Set { element } => decode_array(buf, element, "set").map(Value::Set),
            Self::Range { element } => {
                let mut reader = Reader::new(buf);
                let flags = reader.u8()?;
                let known = RANGE_EMPTY
                    | RANGE_INC_LOWER
                    | RANGE_INC_UPPER
                    | RANGE_INF_LOWER
                    | RANGE_INF_UPPER;
                if flags & !known != 0 {
                    return Err(DecodeError::InvalidRangeFlags(flags));
                }
                let mut bound = |infinite: bool| -> Result<Option<Box<Value>>, DecodeError> {
                    if infinite || flags & RANGE_EMPTY != 0 {
                        return Ok(None);
                    }
                    let data = reader.element()?.ok_or(DecodeError::NegativeLength(-1))?;
                    Ok(Some(Box::new(element.decode(data)?)))
                };
                let lower = bound(flags & RANGE_INF_LOWER != 0)?;
                let upper = bound(flags & RANGE_INF_UPPER != 0)?;
                reader.finish("range")?;
                Ok(Value::Range(Range {
                    lower,
                    upper,
                    inc_lower: flags & RANGE_INC_LOWER != 0,
                    inc_upper: flags & RANGE_INC_UPPER != 0,
                    empty: flags & RANGE_EMPTY != 0,
                }))
            }
        }
    }

    /// Append the encoding of `value` to `dst`.
    ///
    /// On error `dst` is left unchanged.
    pub fn encode(&self, dst: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
        let start = dst.len();
        let result = self.encode_inner(dst, value);
        if result.is_err() {
            dst.truncate(start);
        }
        result
    }

    fn encode_inner(&self, dst: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
        match (self, value) {
            (Self::Nothing, Value::Nothing) => Ok(()),
            (Self::Scalar(scalar), value) => scalar.encode(dst, value),
            (Self::Enum { members }, Value::Enum(label) | Value::Str(label)) => {
                if !members.iter().any(|m| m == label) {
                    return Err(EncodeError::UnknownEnumMember(label.clone()));
                }
                dst.put_slice(label.as_bytes());
                Ok(())
            }
            (Self::Tuple { names, elements }, Value::Tuple(tuple)) => {
                if tuple.len() != elements.len() {
                    return Err(EncodeError::ArityMismatch {
                        kind: self.kind(),
                        expected: elements.len(),
                        actual: tuple.len(),
                    });
                }
                let values: Vec<&Value> = match names {
                    // named tuples accept their fields in any order
                    Some(names) if tuple.is_named() => names
                        .iter()
                        .map(|n| {
                            tuple
                                .get_named(n)
                                .ok_or_else(|| EncodeError::MissingArgument(n.to_string()))
                        })
                        .collect::<Result<_, _>>()?,
                    _ => tuple.iter().collect(),
                };
                encode_elements(dst, elements, &values)
            }
            (Self::Object { shape, elements }, Value::Object(object)) => {
                if object.values().len() != elements.len() {
                    return Err(EncodeError::ArityMismatch {
                        kind: "object",
                        expected: elements.len(),
                        actual: object.values().len(),
                    });
                }
                let values: Vec<&Value> = object.values().iter().collect();
                encode_shape(dst, shape, elements, &values)
            }
            (
                Self::Array { element } | Self::Set { element },
                Value::Array(items) | Value::Set(items),
            ) => encode_array(dst, element, items),
            (Self::Range { element }, Value::Range(range)) => {
                let mut flags = 0u8;
                if range.empty {
                    if range.lower.is_some() || range.upper.is_some() {
                        return Err(EncodeError::InvalidRange("empty range with bounds"));
                    }
                    if range.inc_lower || range.inc_upper {
                        return Err(EncodeError::InvalidRange("empty range with inclusive bounds"));
                    }
                    flags |= RANGE_EMPTY;
                } else {
                    if range.inc_lower {
                        flags |= RANGE_INC_LOWER;
                    }
                    if range.inc_upper {
                        flags |= RANGE_INC_UPPER;
                    }
                    if range.lower.is_none() {
                        flags |= RANGE_INF_LOWER;
                    }
                    if range.upper.is_none() {
                        flags |= RANGE_INF_UPPER;
                    }
                }
                dst.put_u8(flags);
                if !range.empty {
                    for bound in [&range.lower, &range.upper].into_iter().flatten() {
                        write_element(dst, |buf| element.encode_inner(buf, bound))?;
                    }
                }
                Ok(())
            }
            (codec, value) => Err(EncodeError::TypeMismatch {
                expected: codec.kind(),
                actual: value.kind(),
            }),
        }
    }

    /// Encode query arguments with this (input) codec.
    ///
    /// Positional arguments match tuples and shapes whose fields are named
    /// `0`, `1`, ...; named arguments match named tuples and shapes.
    pub fn encode_arguments(
        &self,
        dst: &mut BytesMut,
        args: &QueryArgs,
    ) -> Result<(), EncodeError> {
        let start = dst.len();
        let result = self.encode_arguments_inner(dst, args);
        if result.is_err() {
            dst.truncate(start);
        }
        result
    }

    fn encode_arguments_inner(
        &self,
        dst: &mut BytesMut,
        args: &QueryArgs,
    ) -> Result<(), EncodeError> {
        match self {
            Self::Nothing if args.is_empty() => Ok(()),
            Self::Tuple { names: None, elements } => match args {
                QueryArgs::Positional(values) => {
                    if values.len() != elements.len() {
                        return Err(EncodeError::ArityMismatch {
                            kind: "arguments",
                            expected: elements.len(),
                            actual: values.len(),
                        });
                    }
                    let refs: Vec<&Value> = values.iter().collect();
                    encode_elements(dst, elements, &refs)
                }
                QueryArgs::Named(named) if named.is_empty() && elements.is_empty() => {
                    encode_elements(dst, elements, &[])
                }
                QueryArgs::Named(_) => Err(EncodeError::ArgumentStyle {
                    expected: "positional",
                }),
            },
            Self::Tuple {
                names: Some(names), elements,
            } => {
                let values = match_named(names.iter().map(|n| &**n), args)?;
                let refs: Vec<&Value> = values
                    .iter()
                    .zip(names.iter())
                    .map(|(v, n)| v.ok_or_else(|| EncodeError::MissingArgument(n.to_string())))
                    .collect::<Result<_, _>>()?;
                encode_elements(dst, elements, &refs)
            }
            Self::Object { shape, elements } => {
                let values = match_named(shape.fields().iter().map(|f| &*f.name), args)?;
                let mut refs = Vec::with_capacity(values.len());
                for (value, field) in values.into_iter().zip(shape.fields()) {
                    match value {
                        Some(v) => refs.push(v),
                        None if field.cardinality.allows_empty() => refs.push(&NOTHING),
                        None => return Err(EncodeError::MissingArgument(field.name.to_string())),
                    }
                }
                encode_shape(dst, shape, elements, &refs)
            }
            _ => Err(EncodeError::TypeMismatch {
                expected: self.kind(),
                actual: "arguments",
            }),
        }
    }
}

fn check_count(
    reader: &mut Reader<'_>,
    kind: &'static str,
    expected: usize,
) -> Result<(), DecodeError> {
    let count = reader.i32()?;
    if usize::try_from(count).ok() != Some(expected) {
        return Err(DecodeError::ArityMismatch {
            kind,
            expected,
            actual: i64::from(count),
        });
    }
    Ok(())
}

fn decode_array(
    buf: &[u8],
    element: &Codec,
    kind: &'static str,
) -> Result<Vec<Value>, DecodeError> {
    let mut reader = Reader::new(buf);
    let ndims = reader.i32()?;
    reader.i32()?; // flags
    reader.i32()?; // reserved
    let values = match ndims {
        0 => Vec::new(),
        1 => {
            let len = reader.i32()?;
            reader.i32()?; // lower bound
            let len = usize::try_from(len).map_err(|_| DecodeError::NegativeLength(len))?;
            // each element needs at least its 4-byte length
            let mut values = Vec::with_capacity(len.min(reader.buf.len() / 4));
            for _ in 0..len {
                let data = reader.element()?.ok_or(DecodeError::NegativeLength(-1))?;
                values.push(element.decode(data)?);
            }
            values
        }
        other => return Err(DecodeError::InvalidDimensions(other)),
    };
    reader.finish(kind)?;
    Ok(values)
}

fn encode_array(dst: &mut BytesMut, element: &Codec, items: &[Value]) -> Result<(), EncodeError> {
    if items.is_empty() {
        dst.put_i32(0);
        dst.put_i32(0);
        dst.put_i32(0);
        return Ok(());
    }
    dst.put_i32(1);
    dst.put_i32(0);
    dst.put_i32(0);
    dst.put_i32(count_i32(items.len())?);
    dst.put_i32(1);
    for item in items {
        write_element(dst, |buf| element.encode_inner(buf, item))?;
    }
    Ok(())
}

fn encode_elements(
    dst: &mut BytesMut,
    codecs: &[Arc<Codec>],
    values: &[&Value],
) -> Result<(), EncodeError> {
    dst.put_i32(count_i32(codecs.len())?);
    for (codec, value) in codecs.iter().zip(values) {
        dst.put_i32(0);
        write_element(dst, |buf| codec.encode_inner(buf, value))?;
    }
    Ok(())
}

fn encode_shape(
    dst: &mut BytesMut,
    shape: &ObjectShape,
    codecs: &[Arc<Codec>],
    values: &[&Value],
) -> Result<(), EncodeError> {
    dst.put_i32(count_i32(codecs.len())?);
    for ((field, codec), value) in shape.fields().iter().zip(codecs).zip(values) {
        dst.put_i32(0);
        if value.is_nothing() && !matches!(**codec, Codec::Nothing) {
            if !field.cardinality.allows_empty() {
                return Err(EncodeError::MissingArgument(field.name.to_string()));
            }
            dst.put_i32(-1);
        } else {
            write_element(dst, |buf| codec.encode_inner(buf, value))?;
        }
    }
    Ok(())
}

/// Line up `args` with the declared names, rejecting unknown arguments.
fn match_named<'a, 'n>(
    declared: impl Iterator<Item = &'n str> + Clone,
    args: &'a QueryArgs,
) -> Result<Vec<Option<&'a Value>>, EncodeError> {
    let supplied: Vec<(String, &Value)> = match args {
        QueryArgs::Positional(values) => values
            .iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), v))
            .collect(),
        QueryArgs::Named(named) => named.iter().map(|(n, v)| (n.clone(), v)).collect(),
    };
    for (name, _) in &supplied {
        if !declared.clone().any(|d| d == name) {
            return Err(EncodeError::UnexpectedArgument(name.clone()));
        }
    }
    Ok(declared
        .map(|d| supplied.iter().find(|(n, _)| n == d).map(|(_, v)| *v))
        .collect())
}
