//! Composite values: tuples, named tuples and objects.
//!
//! A [`Tuple`] stores an ordered list of `(name, value)` pairs. Positional
//! tuples have no names; named tuples name every element. Both are indexed
//! positionally, and named tuples can additionally be addressed by name.
//! They serialize differently: a tuple becomes a JSON array, a named tuple
//! a JSON object.

use std::fmt;
use std::ops::Index;
use std::sync::Arc;

use edb_protocol::{Cardinality, ShapeElementFlags};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

use crate::value::Value;

/// An ordered, fixed-length tuple, optionally with field names.
#[derive(Clone, PartialEq, Default)]
pub struct Tuple {
    fields: Vec<(Option<Arc<str>>, Value)>,
}

impl Tuple {
    /// Create a positional tuple.
    #[must_use]
    pub fn positional(values: Vec<Value>) -> Self {
        Self {
            fields: values.into_iter().map(|v| (None, v)).collect(),
        }
    }

    /// Create a named tuple. Field order is preserved.
    pub fn named<I, N>(fields: I) -> Self
    where
        I: IntoIterator<Item = (N, Value)>,
        N: Into<Arc<str>>,
    {
        Self {
            fields: fields
                .into_iter()
                .map(|(name, value)| (Some(name.into()), value))
                .collect(),
        }
    }

    pub(crate) fn from_parts(names: Option<&[Arc<str>]>, values: Vec<Value>) -> Self {
        let fields = match names {
            Some(names) => names
                .iter()
                .cloned()
                .map(Some)
                .zip(values)
                .collect(),
            None => values.into_iter().map(|v| (None, v)).collect(),
        };
        Self { fields }
    }

    /// Whether the elements carry names.
    #[must_use]
    pub fn is_named(&self) -> bool {
        self.fields.first().is_some_and(|(name, _)| name.is_some())
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the tuple is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Element at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.fields.get(index).map(|(_, v)| v)
    }

    /// Element named `name`; always `None` for positional tuples.
    #[must_use]
    pub fn get_named(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(n, _)| n.as_deref() == Some(name))
            .map(|(_, v)| v)
    }

    /// Element names in order, if the tuple is named.
    #[must_use]
    pub fn names(&self) -> Option<Vec<&str>> {
        self.fields.iter().map(|(n, _)| n.as_deref()).collect()
    }

    /// Iterate over element values in order.
    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.fields.iter().map(|(_, v)| v)
    }

    /// Iterate over `(name, value)` pairs in order.
    pub fn fields(&self) -> impl Iterator<Item = (Option<&str>, &Value)> {
        self.fields.iter().map(|(n, v)| (n.as_deref(), v))
    }

    /// Consume the tuple and return its values in order.
    #[must_use]
    pub fn into_values(self) -> Vec<Value> {
        self.fields.into_iter().map(|(_, v)| v).collect()
    }
}

impl Index<usize> for Tuple {
    type Output = Value;

    fn index(&self, index: usize) -> &Self::Output {
        &self.fields[index].1
    }
}

impl<'a> IntoIterator for &'a Tuple {
    type Item = &'a Value;
    type IntoIter = Box<dyn Iterator<Item = &'a Value> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

impl fmt::Debug for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Named tuples print positionally; names are available via `fields`.
        f.write_str(if self.is_named() { "NamedTuple " } else { "Tuple " })?;
        f.debug_list().entries(self.iter()).finish()
    }
}

impl Serialize for Tuple {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.is_named() {
            let mut map = serializer.serialize_map(Some(self.len()))?;
            for (name, value) in self.fields() {
                map.serialize_entry(name.unwrap_or_default(), value)?;
            }
            map.end()
        } else {
            let mut seq = serializer.serialize_seq(Some(self.len()))?;
            for value in self.iter() {
                seq.serialize_element(value)?;
            }
            seq.end()
        }
    }
}

/// One declared field of an object shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeField {
    /// Field name.
    pub name: Arc<str>,
    /// Declared flags.
    pub flags: ShapeElementFlags,
    /// Declared cardinality.
    pub cardinality: Cardinality,
}

impl ShapeField {
    /// Whether this field is a link property.
    #[must_use]
    pub fn is_link_property(&self) -> bool {
        self.flags.contains(ShapeElementFlags::LINK_PROPERTY)
    }

    /// Whether this field was included implicitly (e.g. `id`).
    #[must_use]
    pub fn is_implicit(&self) -> bool {
        self.flags.contains(ShapeElementFlags::IMPLICIT)
    }
}

/// Field list shared by every object decoded with the same codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectShape {
    fields: Vec<ShapeField>,
}

impl ObjectShape {
    /// Create a shape.
    #[must_use]
    pub fn new(fields: Vec<ShapeField>) -> Self {
        Self { fields }
    }

    /// Declared fields in order.
    #[must_use]
    pub fn fields(&self) -> &[ShapeField] {
        &self.fields
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the shape has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn position(&self, name: &str, link_property: bool) -> Option<usize> {
        self.fields
            .iter()
            .position(|f| &*f.name == name && f.is_link_property() == link_property)
    }
}

/// A decoded object: values for the fields of an [`ObjectShape`].
///
/// Absent fields hold [`Value::Nothing`] rather than being left out.
#[derive(Clone, PartialEq)]
pub struct Object {
    shape: Arc<ObjectShape>,
    values: Vec<Value>,
}

impl Object {
    /// Create an object. `values` must follow the shape's field order.
    #[must_use]
    pub fn new(shape: Arc<ObjectShape>, values: Vec<Value>) -> Self {
        Self { shape, values }
    }

    /// The object's shape.
    #[must_use]
    pub fn shape(&self) -> &Arc<ObjectShape> {
        &self.shape
    }

    /// Value of a property or link.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.shape
            .position(name, false)
            .and_then(|i| self.values.get(i))
    }

    /// Value of a link property (`@name` in queries).
    #[must_use]
    pub fn link_property(&self, name: &str) -> Option<&Value> {
        self.shape
            .position(name, true)
            .and_then(|i| self.values.get(i))
    }

    /// Iterate over `(field, value)` pairs in shape order.
    pub fn fields(&self) -> impl Iterator<Item = (&ShapeField, &Value)> {
        self.shape.fields.iter().zip(&self.values)
    }

    /// Values in shape order.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Object ")?;
        let mut map = f.debug_map();
        for (field, value) in self.fields() {
            if field.is_link_property() {
                map.entry(&format_args!("@{}", field.name), value);
            } else {
                map.entry(&field.name, value);
            }
        }
        map.finish()
    }
}

impl Serialize for Object {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (field, value) in self.fields() {
            if field.is_link_property() {
                map.serialize_entry(&format!("@{}", field.name), value)?;
            } else {
                map.serialize_entry(&*field.name, value)?;
            }
        }
        map.end()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn pair() -> Tuple {
        Tuple::named([("a", Value::Int64(1)), ("b", Value::Str("x".into()))])
    }

    #[test]
    fn test_named_tuple_views() {
        let t = pair();
        assert!(t.is_named());
        assert_eq!(t.len(), 2);
        assert_eq!(t[0], Value::Int64(1));
        assert_eq!(t.get_named("b"), Some(&Value::Str("x".into())));
        assert_eq!(t.get_named("c"), None);
        assert_eq!(t.names(), Some(vec!["a", "b"]));
    }

    #[test]
    fn test_positional_tuple_has_no_names() {
        let t = Tuple::positional(vec![Value::Bool(true), Value::Int16(2)]);
        assert!(!t.is_named());
        assert_eq!(t.names(), None);
        assert_eq!(t.get_named("0"), None);
        assert_eq!(t.iter().count(), 2);
    }

    #[test]
    fn test_json_forms() {
        let positional = Tuple::positional(vec![Value::Int64(1), Value::Str("x".into())]);
        assert_eq!(serde_json::to_string(&positional).unwrap(), r#"[1,"x"]"#);
        assert_eq!(serde_json::to_string(&pair()).unwrap(), r#"{"a":1,"b":"x"}"#);
    }

    #[test]
    fn test_debug_distinguishes_tuples_from_lists() {
        let positional = Tuple::positional(vec![Value::Int64(1)]);
        assert_eq!(format!("{positional:?}"), "Tuple [Int64(1)]");
        assert_eq!(format!("{:?}", pair()), r#"NamedTuple [Int64(1), Str("x")]"#);
    }

    #[test]
    fn test_object_lookup() {
        let shape = Arc::new(ObjectShape::new(vec![
            ShapeField {
                name: "name".into(),
                flags: ShapeElementFlags::empty(),
                cardinality: Cardinality::One,
            },
            ShapeField {
                name: "since".into(),
                flags: ShapeElementFlags::LINK_PROPERTY,
                cardinality: Cardinality::AtMostOne,
            },
        ]));
        let obj = Object::new(shape, vec![Value::Str("Ann".into()), Value::Nothing]);
        assert_eq!(obj.get("name"), Some(&Value::Str("Ann".into())));
        assert_eq!(obj.get("since"), None);
        assert_eq!(obj.link_property("since"), Some(&Value::Nothing));
        assert_eq!(
            serde_json::to_string(&obj).unwrap(),
            r#"{"name":"Ann","@since":null}"#
        );
    }
}
