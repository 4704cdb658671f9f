//! Type descriptors.
//!
//! The server describes the shape of query arguments and results as a block
//! of self-describing records. Each record starts with a kind tag and a
//! 16-byte type id; children are referenced by id, so a record may point at
//! a type declared later in the same block.
//!
//! Parsing happens in two passes. [`parse_block`] reads the records into
//! [`TypeDescriptor`] values without looking at references. [`ingest`] (and
//! [`DescriptorSet::extend`]) then checks every referenced id against the
//! block, reporting dangling ids as [`ProtocolError::UnresolvedReference`].
//! Neither pass recurses, so deeply nested or hostile blocks cannot exhaust
//! the stack.

use std::collections::HashMap;
use std::fmt;

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use uuid::Uuid;

use crate::codec::{read_i32, read_string, read_u8, read_u16, read_u32, read_uuid, write_string, write_uuid};
use crate::error::ProtocolError;

/// Opaque 16-byte type identifier.
///
/// Ids are only stable within one connection's protocol epoch.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub Uuid);

impl TypeId {
    /// The "no data" type id.
    pub const NULL: Self = Self::from_u128(0);

    /// The empty tuple, used for queries without arguments.
    pub const EMPTY_TUPLE: Self = Self::from_u128(0xff);

    /// Build an id from its 128-bit integer form.
    #[must_use]
    pub const fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    /// Whether this is the "no data" id.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0.is_nil()
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeId({})", self.0)
    }
}

impl From<Uuid> for TypeId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

/// Well-known ids of the base scalar types.
pub mod scalars {
    use super::TypeId;

    /// `std::uuid`
    pub const UUID: TypeId = TypeId::from_u128(0x100);
    /// `std::str`
    pub const STR: TypeId = TypeId::from_u128(0x101);
    /// `std::bytes`
    pub const BYTES: TypeId = TypeId::from_u128(0x102);
    /// `std::int16`
    pub const INT16: TypeId = TypeId::from_u128(0x103);
    /// `std::int32`
    pub const INT32: TypeId = TypeId::from_u128(0x104);
    /// `std::int64`
    pub const INT64: TypeId = TypeId::from_u128(0x105);
    /// `std::float32`
    pub const FLOAT32: TypeId = TypeId::from_u128(0x106);
    /// `std::float64`
    pub const FLOAT64: TypeId = TypeId::from_u128(0x107);
    /// `std::bool`
    pub const BOOL: TypeId = TypeId::from_u128(0x109);
    /// `std::datetime`
    pub const DATETIME: TypeId = TypeId::from_u128(0x10a);
    /// `cal::local_datetime`
    pub const LOCAL_DATETIME: TypeId = TypeId::from_u128(0x10b);
    /// `cal::local_date`
    pub const LOCAL_DATE: TypeId = TypeId::from_u128(0x10c);
    /// `cal::local_time`
    pub const LOCAL_TIME: TypeId = TypeId::from_u128(0x10d);
    /// `std::duration`
    pub const DURATION: TypeId = TypeId::from_u128(0x10e);
    /// `std::json`
    pub const JSON: TypeId = TypeId::from_u128(0x10f);

    /// Human-readable name of a well-known scalar id.
    #[must_use]
    pub fn name(id: TypeId) -> Option<&'static str> {
        let name = match id {
            UUID => "std::uuid",
            STR => "std::str",
            BYTES => "std::bytes",
            INT16 => "std::int16",
            INT32 => "std::int32",
            INT64 => "std::int64",
            FLOAT32 => "std::float32",
            FLOAT64 => "std::float64",
            BOOL => "std::bool",
            DATETIME => "std::datetime",
            LOCAL_DATETIME => "cal::local_datetime",
            LOCAL_DATE => "cal::local_date",
            LOCAL_TIME => "cal::local_time",
            DURATION => "std::duration",
            JSON => "std::json",
            _ => return None,
        };
        Some(name)
    }
}

/// Result or element cardinality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Cardinality {
    /// The command returns nothing.
    NoResult = 0x6e,
    /// Zero or one element.
    AtMostOne = 0x6f,
    /// Exactly one element.
    One = 0x41,
    /// Any number of elements.
    Many = 0x6d,
    /// One or more elements.
    AtLeastOne = 0x4d,
}

impl Cardinality {
    /// Parse a cardinality byte.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0x6e => Ok(Self::NoResult),
            0x6f => Ok(Self::AtMostOne),
            0x41 => Ok(Self::One),
            0x6d => Ok(Self::Many),
            0x4d => Ok(Self::AtLeastOne),
            _ => Err(ProtocolError::InvalidValue {
                field: "cardinality",
                value: u64::from(value),
            }),
        }
    }

    /// Whether an empty set is a legal value under this cardinality.
    #[must_use]
    pub const fn allows_empty(&self) -> bool {
        matches!(self, Self::NoResult | Self::AtMostOne | Self::Many)
    }

    /// Whether more than one element is a legal value under this cardinality.
    #[must_use]
    pub const fn allows_many(&self) -> bool {
        matches!(self, Self::Many | Self::AtLeastOne)
    }
}

bitflags! {
    /// Flags on an object shape element.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShapeElementFlags: u32 {
        /// Implicitly included property (e.g. `id`).
        const IMPLICIT = 0x01;
        /// Link property (`@name`).
        const LINK_PROPERTY = 0x02;
        /// Link to another object.
        const LINK = 0x04;
    }
}

/// One element of an object or input shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeElement {
    /// Element flags.
    pub flags: ShapeElementFlags,
    /// Declared cardinality.
    pub cardinality: Cardinality,
    /// Property, link or link property name.
    pub name: String,
    /// Element type.
    pub type_id: TypeId,
}

/// One element of a named tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TupleElement {
    /// Field name.
    pub name: String,
    /// Field type.
    pub type_id: TypeId,
}

/// Kind tags of descriptor records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DescriptorKind {
    /// Set of elements.
    Set = 0,
    /// Object shape (query result).
    ObjectShape = 1,
    /// Base scalar identified by a well-known id.
    BaseScalar = 2,
    /// Scalar derived from another scalar.
    Scalar = 3,
    /// Positional tuple.
    Tuple = 4,
    /// Named tuple.
    NamedTuple = 5,
    /// Array.
    Array = 6,
    /// Enumeration.
    Enum = 7,
    /// Input shape (named query arguments).
    InputShape = 8,
    /// Range.
    Range = 9,
}

impl DescriptorKind {
    /// Map a raw tag to a kind, if known.
    #[must_use]
    pub fn from_u8(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => Self::Set,
            1 => Self::ObjectShape,
            2 => Self::BaseScalar,
            3 => Self::Scalar,
            4 => Self::Tuple,
            5 => Self::NamedTuple,
            6 => Self::Array,
            7 => Self::Enum,
            8 => Self::InputShape,
            9 => Self::Range,
            _ => return None,
        })
    }
}

/// Kind-specific body of a descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescriptorBody {
    /// Set of `element`.
    Set {
        /// Element type.
        element: TypeId,
    },
    /// Object shape.
    ObjectShape {
        /// Shape elements in declaration order.
        elements: Vec<ShapeElement>,
    },
    /// Base scalar; the descriptor id names the type.
    BaseScalar,
    /// Scalar derived from `base`.
    Scalar {
        /// Underlying scalar type.
        base: TypeId,
    },
    /// Positional tuple.
    Tuple {
        /// Element types.
        elements: Vec<TypeId>,
    },
    /// Named tuple.
    NamedTuple {
        /// Elements in declaration order.
        elements: Vec<TupleElement>,
    },
    /// Array of `element`.
    Array {
        /// Element type.
        element: TypeId,
        /// Declared dimensions (-1 for unbounded).
        dimensions: Vec<i32>,
    },
    /// Enumeration.
    Enum {
        /// Member labels in declaration order.
        members: Vec<String>,
    },
    /// Input shape for named arguments.
    InputShape {
        /// Shape elements in declaration order.
        elements: Vec<ShapeElement>,
    },
    /// Range over `element`.
    Range {
        /// Bound type.
        element: TypeId,
    },
}

/// A parsed type descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDescriptor {
    /// Type id.
    pub id: TypeId,
    /// Kind-specific body.
    pub body: DescriptorBody,
}

impl TypeDescriptor {
    /// Create a descriptor.
    #[must_use]
    pub fn new(id: TypeId, body: DescriptorBody) -> Self {
        Self { id, body }
    }

    /// Kind of this descriptor.
    #[must_use]
    pub fn kind(&self) -> DescriptorKind {
        match &self.body {
            DescriptorBody::Set { .. } => DescriptorKind::Set,
            DescriptorBody::ObjectShape { .. } => DescriptorKind::ObjectShape,
            DescriptorBody::BaseScalar => DescriptorKind::BaseScalar,
            DescriptorBody::Scalar { .. } => DescriptorKind::Scalar,
            DescriptorBody::Tuple { .. } => DescriptorKind::Tuple,
            DescriptorBody::NamedTuple { .. } => DescriptorKind::NamedTuple,
            DescriptorBody::Array { .. } => DescriptorKind::Array,
            DescriptorBody::Enum { .. } => DescriptorKind::Enum,
            DescriptorBody::InputShape { .. } => DescriptorKind::InputShape,
            DescriptorBody::Range { .. } => DescriptorKind::Range,
        }
    }

    /// Ids referenced by this descriptor, in declaration order.
    #[must_use]
    pub fn children(&self) -> Vec<TypeId> {
        match &self.body {
            DescriptorBody::Set { element }
            | DescriptorBody::Array { element, .. }
            | DescriptorBody::Range { element } => vec![*element],
            DescriptorBody::Scalar { base } => vec![*base],
            DescriptorBody::Tuple { elements } => elements.clone(),
            DescriptorBody::NamedTuple { elements } => {
                elements.iter().map(|e| e.type_id).collect()
            }
            DescriptorBody::ObjectShape { elements } | DescriptorBody::InputShape { elements } => {
                elements.iter().map(|e| e.type_id).collect()
            }
            DescriptorBody::BaseScalar | DescriptorBody::Enum { .. } => Vec::new(),
        }
    }

    /// Read one record from `src`. `offset` is only used for error reporting.
    fn decode(src: &mut Bytes, offset: usize) -> Result<Self, ProtocolError> {
        let tag = read_u8(src)?;
        let kind = DescriptorKind::from_u8(tag)
            .ok_or(ProtocolError::UnknownDescriptor { tag, offset })?;
        let id = TypeId(read_uuid(src)?);

        let body = match kind {
            DescriptorKind::Set => DescriptorBody::Set {
                element: TypeId(read_uuid(src)?),
            },
            DescriptorKind::ObjectShape => DescriptorBody::ObjectShape {
                elements: read_shape_elements(src)?,
            },
            DescriptorKind::InputShape => DescriptorBody::InputShape {
                elements: read_shape_elements(src)?,
            },
            DescriptorKind::BaseScalar => DescriptorBody::BaseScalar,
            DescriptorKind::Scalar => DescriptorBody::Scalar {
                base: TypeId(read_uuid(src)?),
            },
            DescriptorKind::Tuple => {
                let count = read_u16(src)?;
                let mut elements = Vec::with_capacity(usize::from(count).min(src.remaining() / 16));
                for _ in 0..count {
                    elements.push(TypeId(read_uuid(src)?));
                }
                DescriptorBody::Tuple { elements }
            }
            DescriptorKind::NamedTuple => {
                let count = read_u16(src)?;
                let mut elements = Vec::new();
                for _ in 0..count {
                    let name = read_string(src, "tuple element name")?;
                    let type_id = TypeId(read_uuid(src)?);
                    elements.push(TupleElement { name, type_id });
                }
                DescriptorBody::NamedTuple { elements }
            }
            DescriptorKind::Array => {
                let element = TypeId(read_uuid(src)?);
                let ndims = read_u16(src)?;
                let mut dimensions = Vec::new();
                for _ in 0..ndims {
                    dimensions.push(read_i32(src)?);
                }
                DescriptorBody::Array {
                    element,
                    dimensions,
                }
            }
            DescriptorKind::Enum => {
                let count = read_u16(src)?;
                let mut members = Vec::new();
                for _ in 0..count {
                    members.push(read_string(src, "enum member")?);
                }
                DescriptorBody::Enum { members }
            }
            DescriptorKind::Range => DescriptorBody::Range {
                element: TypeId(read_uuid(src)?),
            },
        };

        Ok(Self { id, body })
    }

    /// Append this record to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        dst.put_u8(self.kind() as u8);
        write_uuid(dst, &self.id.0);
        match &self.body {
            DescriptorBody::Set { element } | DescriptorBody::Range { element } => {
                write_uuid(dst, &element.0);
            }
            DescriptorBody::ObjectShape { elements } | DescriptorBody::InputShape { elements } => {
                dst.put_u16(count_u16(elements.len(), "shape elements")?);
                for element in elements {
                    dst.put_u32(element.flags.bits());
                    dst.put_u8(element.cardinality as u8);
                    write_string(dst, &element.name)?;
                    write_uuid(dst, &element.type_id.0);
                }
            }
            DescriptorBody::BaseScalar => {}
            DescriptorBody::Scalar { base } => write_uuid(dst, &base.0),
            DescriptorBody::Tuple { elements } => {
                dst.put_u16(count_u16(elements.len(), "tuple elements")?);
                for element in elements {
                    write_uuid(dst, &element.0);
                }
            }
            DescriptorBody::NamedTuple { elements } => {
                dst.put_u16(count_u16(elements.len(), "tuple elements")?);
                for element in elements {
                    write_string(dst, &element.name)?;
                    write_uuid(dst, &element.type_id.0);
                }
            }
            DescriptorBody::Array {
                element,
                dimensions,
            } => {
                write_uuid(dst, &element.0);
                dst.put_u16(count_u16(dimensions.len(), "array dimensions")?);
                for dim in dimensions {
                    dst.put_i32(*dim);
                }
            }
            DescriptorBody::Enum { members } => {
                dst.put_u16(count_u16(members.len(), "enum members")?);
                for member in members {
                    write_string(dst, member)?;
                }
            }
        }
        Ok(())
    }
}

fn count_u16(len: usize, field: &'static str) -> Result<u16, ProtocolError> {
    u16::try_from(len).map_err(|_| ProtocolError::TooLong { field, len })
}

fn read_shape_elements(src: &mut Bytes) -> Result<Vec<ShapeElement>, ProtocolError> {
    let count = read_u16(src)?;
    let mut elements = Vec::new();
    for _ in 0..count {
        let raw_flags = read_u32(src)?;
        let flags = ShapeElementFlags::from_bits(raw_flags).ok_or(ProtocolError::InvalidValue {
            field: "shape element flags",
            value: u64::from(raw_flags),
        })?;
        let cardinality = Cardinality::from_u8(read_u8(src)?)?;
        let name = read_string(src, "shape element name")?;
        let type_id = TypeId(read_uuid(src)?);
        elements.push(ShapeElement {
            flags,
            cardinality,
            name,
            type_id,
        });
    }
    Ok(elements)
}

/// First pass: read every record of a descriptor block.
///
/// References are not checked here.
pub fn parse_block(block: &Bytes) -> Result<Vec<TypeDescriptor>, ProtocolError> {
    let mut cursor = block.clone();
    let mut out = Vec::new();
    while cursor.has_remaining() {
        let offset = block.len() - cursor.remaining();
        out.push(TypeDescriptor::decode(&mut cursor, offset)?);
    }
    Ok(out)
}

/// Parse a descriptor block and resolve every reference inside it.
pub fn ingest(block: &Bytes) -> Result<HashMap<TypeId, TypeDescriptor>, ProtocolError> {
    let mut set = DescriptorSet::new();
    set.extend(block)?;
    Ok(set.descriptors)
}

/// Descriptors known to one connection.
///
/// New blocks are merged atomically: when a block fails to parse or resolve,
/// the set is left as it was.
#[derive(Debug, Clone, Default)]
pub struct DescriptorSet {
    descriptors: HashMap<TypeId, TypeDescriptor>,
}

impl DescriptorSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `block` and merge it into the set.
    ///
    /// Returns the ids declared by the block, in block order. References may
    /// point forward within the block or at descriptors already in the set.
    pub fn extend(&mut self, block: &Bytes) -> Result<Vec<TypeId>, ProtocolError> {
        let records = parse_block(block)?;

        let mut staged: HashMap<TypeId, TypeDescriptor> = HashMap::with_capacity(records.len());
        let mut order = Vec::with_capacity(records.len());
        for record in records {
            let previous = staged
                .get(&record.id)
                .or_else(|| self.descriptors.get(&record.id));
            match previous {
                Some(existing) if *existing != record => {
                    return Err(ProtocolError::ConflictingDescriptor(record.id));
                }
                Some(_) => {}
                None => order.push(record.id),
            }
            staged.insert(record.id, record);
        }

        for descriptor in staged.values() {
            for child in descriptor.children() {
                if !staged.contains_key(&child) && !self.descriptors.contains_key(&child) {
                    return Err(ProtocolError::UnresolvedReference {
                        from: descriptor.id,
                        missing: child,
                    });
                }
            }
        }

        self.descriptors.extend(staged);
        Ok(order)
    }

    /// Look up a descriptor.
    #[must_use]
    pub fn get(&self, id: &TypeId) -> Option<&TypeDescriptor> {
        self.descriptors.get(id)
    }

    /// Whether `id` is known.
    #[must_use]
    pub fn contains(&self, id: &TypeId) -> bool {
        self.descriptors.contains_key(id)
    }

    /// Number of known descriptors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Forget every descriptor.
    pub fn clear(&mut self) {
        self.descriptors.clear();
    }
}

/// Builder for descriptor blocks, used by servers and tests.
#[derive(Debug, Default)]
pub struct DescriptorBlockBuilder {
    records: Vec<TypeDescriptor>,
}

impl DescriptorBlockBuilder {
    /// Create an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a raw descriptor.
    #[must_use]
    pub fn push(mut self, descriptor: TypeDescriptor) -> Self {
        self.records.push(descriptor);
        self
    }

    /// Append a base scalar.
    #[must_use]
    pub fn base_scalar(self, id: TypeId) -> Self {
        self.push(TypeDescriptor::new(id, DescriptorBody::BaseScalar))
    }

    /// Append a derived scalar.
    #[must_use]
    pub fn scalar(self, id: TypeId, base: TypeId) -> Self {
        self.push(TypeDescriptor::new(id, DescriptorBody::Scalar { base }))
    }

    /// Append a positional tuple.
    #[must_use]
    pub fn tuple(self, id: TypeId, elements: &[TypeId]) -> Self {
        self.push(TypeDescriptor::new(
            id,
            DescriptorBody::Tuple {
                elements: elements.to_vec(),
            },
        ))
    }

    /// Append a named tuple.
    #[must_use]
    pub fn named_tuple(self, id: TypeId, elements: &[(&str, TypeId)]) -> Self {
        let elements = elements
            .iter()
            .map(|(name, type_id)| TupleElement {
                name: (*name).to_string(),
                type_id: *type_id,
            })
            .collect();
        self.push(TypeDescriptor::new(id, DescriptorBody::NamedTuple { elements }))
    }

    /// Append an object shape.
    #[must_use]
    pub fn object_shape(self, id: TypeId, elements: Vec<ShapeElement>) -> Self {
        self.push(TypeDescriptor::new(id, DescriptorBody::ObjectShape { elements }))
    }

    /// Append an input shape.
    #[must_use]
    pub fn input_shape(self, id: TypeId, elements: Vec<ShapeElement>) -> Self {
        self.push(TypeDescriptor::new(id, DescriptorBody::InputShape { elements }))
    }

    /// Append a one-dimensional array.
    #[must_use]
    pub fn array(self, id: TypeId, element: TypeId) -> Self {
        self.push(TypeDescriptor::new(
            id,
            DescriptorBody::Array {
                element,
                dimensions: vec![-1],
            },
        ))
    }

    /// Append a set.
    #[must_use]
    pub fn set(self, id: TypeId, element: TypeId) -> Self {
        self.push(TypeDescriptor::new(id, DescriptorBody::Set { element }))
    }

    /// Append an enum.
    #[must_use]
    pub fn enumeration(self, id: TypeId, members: &[&str]) -> Self {
        let members = members.iter().map(|m| (*m).to_string()).collect();
        self.push(TypeDescriptor::new(id, DescriptorBody::Enum { members }))
    }

    /// Append a range.
    #[must_use]
    pub fn range(self, id: TypeId, element: TypeId) -> Self {
        self.push(TypeDescriptor::new(id, DescriptorBody::Range { element }))
    }

    /// Encode all records into a block.
    pub fn build(self) -> Result<Bytes, ProtocolError> {
        let mut buf = BytesMut::new();
        for record in &self.records {
            record.encode(&mut buf)?;
        }
        Ok(buf.freeze())
    }
}
