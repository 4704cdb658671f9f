//! Canned type descriptors and results shared by driver tests.

use std::sync::Arc;

use bytes::Bytes;
use edb_protocol::{
    Cardinality, DescriptorBlockBuilder, ShapeElement, ShapeElementFlags, TypeId, scalars,
};
use edb_types::{Object, ObjectShape, ShapeField, Value};
use uuid::Uuid;

use crate::mock_server::{MockResult, Result};

/// Type id of the `User { id, name, email }` result shape.
pub const USER_TYPE: TypeId = TypeId::from_u128(0x5553_4552);

/// Type id of positional argument tuples built by [`positional_args`].
pub const POSITIONAL_ARGS_TYPE: TypeId = TypeId::from_u128(0x4152_4730);

/// Type id of named argument shapes built by [`named_args`].
pub const NAMED_ARGS_TYPE: TypeId = TypeId::from_u128(0x4152_474e);

/// Descriptor block for `select User { id, name, email }`.
#[must_use]
pub fn user_block() -> Bytes {
    let element = |flags, cardinality, name: &str, type_id| ShapeElement {
        flags,
        cardinality,
        name: name.into(),
        type_id,
    };
    DescriptorBlockBuilder::new()
        .base_scalar(scalars::UUID)
        .base_scalar(scalars::STR)
        .object_shape(
            USER_TYPE,
            vec![
                element(ShapeElementFlags::IMPLICIT, Cardinality::One, "id", scalars::UUID),
                element(ShapeElementFlags::empty(), Cardinality::One, "name", scalars::STR),
                element(ShapeElementFlags::empty(), Cardinality::AtMostOne, "email", scalars::STR),
            ],
        )
        .build()
        .unwrap_or_default()
}

/// A `User` object value.
#[must_use]
pub fn user(id: Uuid, name: &str, email: Option<&str>) -> Value {
    let field = |name: &str, flags, cardinality| ShapeField {
        name: name.into(),
        flags,
        cardinality,
    };
    let shape = Arc::new(ObjectShape::new(vec![
        field("id", ShapeElementFlags::IMPLICIT, Cardinality::One),
        field("name", ShapeElementFlags::empty(), Cardinality::One),
        field("email", ShapeElementFlags::empty(), Cardinality::AtMostOne),
    ]));
    Value::Object(Object::new(
        shape,
        vec![
            Value::Uuid(id),
            Value::Str(name.to_owned()),
            email.map_or(Value::Nothing, |e| Value::Str(e.to_owned())),
        ],
    ))
}

/// A result listing `users`.
pub fn users(users: &[Value]) -> Result<MockResult> {
    MockResult::new(USER_TYPE, user_block(), users)
}

/// Input descriptor for positional arguments of the given scalar types.
#[must_use]
pub fn positional_args(types: &[TypeId]) -> (TypeId, Bytes) {
    let mut builder = DescriptorBlockBuilder::new();
    let mut seen = Vec::new();
    for ty in types {
        if !seen.contains(ty) {
            seen.push(*ty);
            builder = builder.base_scalar(*ty);
        }
    }
    let block = builder
        .tuple(POSITIONAL_ARGS_TYPE, types)
        .build()
        .unwrap_or_default();
    (POSITIONAL_ARGS_TYPE, block)
}

/// Input descriptor for required named arguments of the given scalar types.
#[must_use]
pub fn named_args(fields: &[(&str, TypeId)]) -> (TypeId, Bytes) {
    let mut builder = DescriptorBlockBuilder::new();
    let mut seen = Vec::new();
    for (_, ty) in fields {
        if !seen.contains(ty) {
            seen.push(*ty);
            builder = builder.base_scalar(*ty);
        }
    }
    let elements = fields
        .iter()
        .map(|(name, ty)| ShapeElement {
            flags: ShapeElementFlags::empty(),
            cardinality: Cardinality::One,
            name: (*name).into(),
            type_id: *ty,
        })
        .collect();
    let block = builder
        .input_shape(NAMED_ARGS_TYPE, elements)
        .build()
        .unwrap_or_default();
    (NAMED_ARGS_TYPE, block)
}
