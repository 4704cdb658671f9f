//! Per-connection codec cache.
//!
//! Type ids are only meaningful within one connection, so every connection
//! owns its own [`CodecCache`]. Descriptor blocks received from the server
//! are merged into the cache with [`CodecCache::ingest`]; codecs are built
//! lazily on the first [`CodecCache::codec_for`] call for an id and reused
//! afterwards. When the server reports that the client's view of its types
//! is stale, [`CodecCache::invalidate`] drops everything at once.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use edb_protocol::{DescriptorBody, DescriptorSet, ProtocolError, TypeId, scalars};

use crate::codec::{Codec, ScalarCodec};
use crate::composite::{ObjectShape, ShapeField};

/// Deepest type nesting the builder accepts.
pub const MAX_NESTING_DEPTH: usize = 64;

/// Descriptors and built codecs for one connection.
#[derive(Debug, Default)]
pub struct CodecCache {
    descriptors: DescriptorSet,
    codecs: HashMap<TypeId, Arc<Codec>>,
    generation: u64,
}

enum Step {
    Enter { id: TypeId, parent: TypeId, depth: usize },
    Exit(TypeId),
}

impl CodecCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a descriptor block. Returns the ids it declared.
    pub fn ingest(&mut self, block: &Bytes) -> Result<Vec<TypeId>, ProtocolError> {
        let ids = self.descriptors.extend(block)?;
        tracing::trace!(declared = ids.len(), known = self.descriptors.len(), "ingested descriptors");
        Ok(ids)
    }

    /// Whether a descriptor (or a built-in) is known for `id`.
    #[must_use]
    pub fn knows(&self, id: &TypeId) -> bool {
        *id == TypeId::NULL || *id == TypeId::EMPTY_TUPLE || self.descriptors.contains(id)
    }

    /// Codec for `id`, building it and any missing children on first use.
    pub fn codec_for(&mut self, id: TypeId) -> Result<Arc<Codec>, ProtocolError> {
        if let Some(codec) = self.codecs.get(&id) {
            return Ok(Arc::clone(codec));
        }

        // Post-order walk with an explicit stack; `on_path` holds the ids
        // between the root and the node being entered.
        let mut stack = vec![Step::Enter {
            id,
            parent: id,
            depth: 0,
        }];
        let mut on_path: HashSet<TypeId> = HashSet::new();

        while let Some(step) = stack.pop() {
            match step {
                Step::Enter { id, parent, depth } => {
                    if self.codecs.contains_key(&id) {
                        continue;
                    }
                    if depth > MAX_NESTING_DEPTH {
                        return Err(ProtocolError::NestingTooDeep {
                            id,
                            max: MAX_NESTING_DEPTH,
                        });
                    }
                    if !on_path.insert(id) {
                        return Err(ProtocolError::DescriptorCycle(id));
                    }
                    stack.push(Step::Exit(id));
                    if id == TypeId::NULL || id == TypeId::EMPTY_TUPLE {
                        continue;
                    }
                    let descriptor = self.descriptors.get(&id).ok_or(
                        ProtocolError::UnresolvedReference {
                            from: parent,
                            missing: id,
                        },
                    )?;
                    for child in descriptor.children().into_iter().rev() {
                        if !self.codecs.contains_key(&child) {
                            stack.push(Step::Enter {
                                id: child,
                                parent: id,
                                depth: depth + 1,
                            });
                        }
                    }
                }
                Step::Exit(id) => {
                    on_path.remove(&id);
                    if self.codecs.contains_key(&id) {
                        continue;
                    }
                    let codec = self.build_node(id)?;
                    self.codecs.insert(id, codec);
                }
            }
        }

        self.codecs
            .get(&id)
            .cloned()
            .ok_or(ProtocolError::UnresolvedReference { from: id, missing: id })
    }

    /// Build one node whose children are already in `self.codecs`.
    fn build_node(&self, id: TypeId) -> Result<Arc<Codec>, ProtocolError> {
        if id == TypeId::NULL {
            return Ok(Arc::new(Codec::Nothing));
        }
        if id == TypeId::EMPTY_TUPLE && !self.descriptors.contains(&id) {
            return Ok(Arc::new(Codec::Tuple {
                names: None,
                elements: Vec::new(),
            }));
        }
        let descriptor = self
            .descriptors
            .get(&id)
            .ok_or(ProtocolError::UnresolvedReference { from: id, missing: id })?;
        let child = |child: &TypeId| -> Result<Arc<Codec>, ProtocolError> {
            self.codecs
                .get(child)
                .cloned()
                .ok_or(ProtocolError::UnresolvedReference {
                    from: id,
                    missing: *child,
                })
        };

        let codec = match &descriptor.body {
            DescriptorBody::BaseScalar => Codec::Scalar(base_scalar(id)?),
            // derived scalars share their base's wire format
            DescriptorBody::Scalar { base } => return child(base),
            DescriptorBody::Enum { members } => Codec::Enum {
                members: members.clone().into(),
            },
            DescriptorBody::Tuple { elements } => Codec::Tuple {
                names: None,
                elements: elements.iter().map(child).collect::<Result<_, _>>()?,
            },
            DescriptorBody::NamedTuple { elements } => Codec::Tuple {
                names: Some(elements.iter().map(|e| Arc::from(e.name.as_str())).collect()),
                elements: elements
                    .iter()
                    .map(|e| child(&e.type_id))
                    .collect::<Result<_, _>>()?,
            },
            DescriptorBody::ObjectShape { elements } | DescriptorBody::InputShape { elements } => {
                let shape = ObjectShape::new(
                    elements
                        .iter()
                        .map(|e| ShapeField {
                            name: Arc::from(e.name.as_str()),
                            flags: e.flags,
                            cardinality: e.cardinality,
                        })
                        .collect(),
                );
                Codec::Object {
                    shape: Arc::new(shape),
                    elements: elements
                        .iter()
                        .map(|e| child(&e.type_id))
                        .collect::<Result<_, _>>()?,
                }
            }
            DescriptorBody::Array { element, .. } => Codec::Array {
                element: child(element)?,
            },
            DescriptorBody::Set { element } => Codec::Set {
                element: child(element)?,
            },
            DescriptorBody::Range { element } => Codec::Range {
                element: child(element)?,
            },
        };
        Ok(Arc::new(codec))
    }

    /// Drop every descriptor and codec.
    ///
    /// Called when the server signals that the cached types are stale.
    pub fn invalidate(&mut self) {
        tracing::debug!(
            codecs = self.codecs.len(),
            descriptors = self.descriptors.len(),
            generation = self.generation,
            "invalidating codec cache"
        );
        self.codecs.clear();
        self.descriptors.clear();
        self.generation += 1;
    }

    /// Number of times the cache was invalidated.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of built codecs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.codecs.len()
    }

    /// Whether no codec has been built.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.codecs.is_empty()
    }
}

fn base_scalar(id: TypeId) -> Result<ScalarCodec, ProtocolError> {
    Ok(match id {
        scalars::UUID => ScalarCodec::Uuid,
        scalars::STR => ScalarCodec::Str,
        scalars::BYTES => ScalarCodec::Bytes,
        scalars::INT16 => ScalarCodec::Int16,
        scalars::INT32 => ScalarCodec::Int32,
        scalars::INT64 => ScalarCodec::Int64,
        scalars::FLOAT32 => ScalarCodec::Float32,
        scalars::FLOAT64 => ScalarCodec::Float64,
        scalars::BOOL => ScalarCodec::Bool,
        scalars::JSON => ScalarCodec::Json,
        scalars::DATETIME => ScalarCodec::Datetime,
        scalars::LOCAL_DATETIME => ScalarCodec::LocalDatetime,
        scalars::LOCAL_DATE => ScalarCodec::LocalDate,
        scalars::LOCAL_TIME => ScalarCodec::LocalTime,
        scalars::DURATION => ScalarCodec::Duration,
        other => return Err(ProtocolError::UnsupportedScalar(other)),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::value::Value;
    use bytes::BytesMut;
    use edb_protocol::{Cardinality, DescriptorBlockBuilder, ShapeElement, ShapeElementFlags};

    const USER: TypeId = TypeId::from_u128(0x1000);
    const NAMES: TypeId = TypeId::from_u128(0x1001);
    const EMAIL: TypeId = TypeId::from_u128(0x1002);

    fn user_block() -> Bytes {
        DescriptorBlockBuilder::new()
            .object_shape(
                USER,
                vec![
                    ShapeElement {
                        flags: ShapeElementFlags::IMPLICIT,
                        cardinality: Cardinality::One,
                        name: "id".into(),
                        type_id: scalars::UUID,
                    },
                    ShapeElement {
                        flags: ShapeElementFlags::empty(),
                        cardinality: Cardinality::Many,
                        name: "aliases".into(),
                        type_id: NAMES,
                    },
                    ShapeElement {
                        flags: ShapeElementFlags::empty(),
                        cardinality: Cardinality::AtMostOne,
                        name: "email".into(),
                        type_id: EMAIL,
                    },
                ],
            )
            .array(NAMES, scalars::STR)
            .scalar(EMAIL, scalars::STR)
            .base_scalar(scalars::UUID)
            .base_scalar(scalars::STR)
            .build()
            .unwrap()
    }

    #[test]
    fn test_builds_and_memoizes() {
        let mut cache = CodecCache::new();
        cache.ingest(&user_block()).unwrap();

        let first = cache.codec_for(USER).unwrap();
        assert_eq!(first.kind(), "object");
        let built = cache.len();
        let second = cache.codec_for(USER).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), built);

        // children are shared, not rebuilt
        let names = cache.codec_for(NAMES).unwrap();
        let Codec::Object { elements, .. } = &*first else {
            panic!("expected object codec");
        };
        assert!(Arc::ptr_eq(&elements[1], &names));
    }

    #[test]
    fn test_derived_scalar_uses_base_format() {
        let mut cache = CodecCache::new();
        cache.ingest(&user_block()).unwrap();
        let codec = cache.codec_for(EMAIL).unwrap();
        assert_eq!(*codec, Codec::Scalar(ScalarCodec::Str));
        assert!(Arc::ptr_eq(&codec, &cache.codec_for(scalars::STR).unwrap()));
    }

    #[test]
    fn test_decode_through_cache() {
        let mut cache = CodecCache::new();
        cache.ingest(&user_block()).unwrap();
        let codec = cache.codec_for(USER).unwrap();

        let id = uuid::Uuid::from_u128(42);
        let Codec::Object { shape, .. } = &*codec else {
            panic!("expected object codec");
        };
        let value = Value::Object(crate::Object::new(
            Arc::clone(shape),
            vec![
                Value::Uuid(id),
                Value::Array(vec![Value::from("al")]),
                Value::Nothing,
            ],
        ));
        let mut buf = BytesMut::new();
        codec.encode(&mut buf, &value).unwrap();
        assert_eq!(codec.decode(&buf).unwrap(), value);
    }

    #[test]
    fn test_cycle_detected() {
        let a = TypeId::from_u128(0xa);
        let b = TypeId::from_u128(0xb);
        let block = DescriptorBlockBuilder::new()
            .tuple(a, &[b])
            .array(b, a)
            .build()
            .unwrap();
        let mut cache = CodecCache::new();
        cache.ingest(&block).unwrap();
        assert!(matches!(
            cache.codec_for(a),
            Err(ProtocolError::DescriptorCycle(_))
        ));
    }

    #[test]
    fn test_deep_nesting_rejected() {
        let mut builder = DescriptorBlockBuilder::new().base_scalar(scalars::INT64);
        let mut inner = scalars::INT64;
        for i in 0..(MAX_NESTING_DEPTH as u128 + 2) {
            let id = TypeId::from_u128(0x10_0000 + i);
            builder = builder.tuple(id, &[inner]);
            inner = id;
        }
        let mut cache = CodecCache::new();
        cache.ingest(&builder.build().unwrap()).unwrap();
        assert!(matches!(
            cache.codec_for(inner),
            Err(ProtocolError::NestingTooDeep { .. })
        ));
    }

    #[test]
    fn test_unsupported_base_scalar() {
        let decimal = TypeId::from_u128(0x108);
        let block = DescriptorBlockBuilder::new()
            .base_scalar(decimal)
            .build()
            .unwrap();
        let mut cache = CodecCache::new();
        cache.ingest(&block).unwrap();
        assert_eq!(
            cache.codec_for(decimal).unwrap_err(),
            ProtocolError::UnsupportedScalar(decimal)
        );
    }

    #[test]
    fn test_builtin_ids_need_no_descriptor() {
        let mut cache = CodecCache::new();
        assert_eq!(*cache.codec_for(TypeId::NULL).unwrap(), Codec::Nothing);
        assert_eq!(cache.codec_for(TypeId::EMPTY_TUPLE).unwrap().kind(), "tuple");
    }

    #[test]
    fn test_invalidate_discards_everything() {
        let mut cache = CodecCache::new();
        cache.ingest(&user_block()).unwrap();
        cache.codec_for(USER).unwrap();
        assert!(!cache.is_empty());

        cache.invalidate();
        assert!(cache.is_empty());
        assert!(!cache.knows(&USER));
        assert_eq!(cache.generation(), 1);
        assert!(matches!(
            cache.codec_for(USER),
            Err(ProtocolError::UnresolvedReference { .. })
        ));
    }
}
