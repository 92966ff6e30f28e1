//! Dynamic value representation
//!
//! An explicit tagged union over everything the interpolation engine and
//! property system can touch: YAML/JSON scalars and collections, resource
//! references, solver property references, and construct URNs. The path
//! walkers operate over this representation; no runtime reflection.

use std::fmt;

use indexmap::IndexMap;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::MasonryError;
use crate::model::{PropertyRef, ResourceRef, Urn};
use crate::path::{self, Segment};

/// A dynamically-typed value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(IndexMap<String, Value>),
    /// Reference to a construct-level resource (typed interpolation result).
    Resource(ResourceRef),
    /// Deferred reference to a property of a concrete resource.
    Ref(PropertyRef),
    /// Reference to another construct instance.
    Urn(Urn),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Resource(_) => "resource",
            Value::Ref(_) => "ref",
            Value::Urn(_) => "urn",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&Vec<Value>> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Converts to a `serde_json::Value`, stringifying reference types.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Value::from(*f),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Value::Resource(r) => serde_json::Value::String(r.to_string()),
            Value::Ref(r) => serde_json::Value::String(r.to_string()),
            Value::Urn(u) => serde_json::Value::String(u.to_string()),
        }
    }
}

/// Mixed interpolation stringifies values and splices them into the
/// surrounding text; this Display is that stringification.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::String(s) => f.write_str(s),
            Value::List(_) | Value::Map(_) => {
                let json = serde_json::to_string(&self.to_json()).map_err(|_| fmt::Error)?;
                f.write_str(&json)
            }
            Value::Resource(r) => write!(f, "{r}"),
            Value::Ref(r) => write!(f, "{r}"),
            Value::Urn(u) => write!(f, "{u}"),
        }
    }
}

impl From<serde_yaml::Value> for Value {
    fn from(v: serde_yaml::Value) -> Self {
        match v {
            serde_yaml::Value::Null => Value::Null,
            serde_yaml::Value::Bool(b) => Value::Bool(b),
            serde_yaml::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_yaml::Value::String(s) => Value::String(s),
            serde_yaml::Value::Sequence(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_yaml::Value::Mapping(entries) => {
                let mut map = IndexMap::with_capacity(entries.len());
                for (k, v) in entries {
                    let key = match k {
                        serde_yaml::Value::String(s) => s,
                        other => yaml_key_to_string(&other),
                    };
                    map.insert(key, Value::from(v));
                }
                Value::Map(map)
            }
            serde_yaml::Value::Tagged(tagged) => Value::from(tagged.value),
        }
    }
}

fn yaml_key_to_string(key: &serde_yaml::Value) -> String {
    match key {
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(entries) => Value::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::String(s) => serializer.serialize_str(s),
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (k, v) in entries {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
            Value::Resource(r) => serializer.collect_str(r),
            Value::Ref(r) => serializer.collect_str(r),
            Value::Urn(u) => serializer.collect_str(u),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = serde_yaml::Value::deserialize(deserializer)?;
        Ok(Value::from(raw))
    }
}

// Property-bag navigation: dotted/bracketed paths over Value maps.

/// Reads a value at `path` from a bag. Invalid or absent paths are `None`;
/// this accessor never errors.
pub fn bag_get<'a>(bag: &'a IndexMap<String, Value>, path: &str) -> Option<&'a Value> {
    let segments = path::parse(path).ok()?;
    let (first, rest) = segments.split_first()?;
    let mut current = bag.get(first.as_field()?)?;
    for segment in rest {
        current = match (segment, current) {
            (Segment::Field(f), Value::Map(m)) => m.get(f)?,
            (Segment::Index(i), Value::List(l)) => l.get(*i)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Writes `value` at `path`, creating intermediate maps as needed.
pub fn bag_set(
    bag: &mut IndexMap<String, Value>,
    path: &str,
    value: Value,
) -> Result<(), MasonryError> {
    let segments = path::parse(path)?;
    let slot = bag_slot(bag, path, &segments)?;
    *slot = value;
    Ok(())
}

/// Removes the value at `path`. Missing paths are a no-op.
pub fn bag_remove(bag: &mut IndexMap<String, Value>, path: &str) -> Result<(), MasonryError> {
    let segments = path::parse(path)?;
    let Some((last, parents)) = segments.split_last() else {
        return Ok(());
    };
    if parents.is_empty() {
        if let Some(field) = last.as_field() {
            bag.shift_remove(field);
        }
        return Ok(());
    }
    let parent_path = path::join(parents);
    // Walk to the parent immutably first so a missing parent stays a no-op.
    if bag_get(bag, &parent_path).is_none() {
        return Ok(());
    }
    let parent = bag_slot(bag, path, parents)?;
    match (last, parent) {
        (Segment::Field(f), Value::Map(m)) => {
            m.shift_remove(f);
        }
        (Segment::Index(i), Value::List(l)) => {
            if *i < l.len() {
                l.remove(*i);
            }
        }
        _ => {}
    }
    Ok(())
}

/// Returns a mutable slot for `segments`, creating intermediate maps.
fn bag_slot<'a>(
    bag: &'a mut IndexMap<String, Value>,
    path: &str,
    segments: &[Segment],
) -> Result<&'a mut Value, MasonryError> {
    let (first, rest) = segments.split_first().ok_or_else(|| MasonryError::InvalidPath {
        path: path.to_string(),
        reason: "empty path".to_string(),
    })?;
    let field = first.as_field().ok_or_else(|| MasonryError::InvalidPath {
        path: path.to_string(),
        reason: "path must start with a field".to_string(),
    })?;
    let mut current = bag.entry(field.to_string()).or_insert(Value::Null);

    for segment in rest {
        current = match segment {
            Segment::Field(f) => {
                if !matches!(current, Value::Map(_)) {
                    *current = Value::Map(IndexMap::new());
                }
                match current {
                    Value::Map(m) => m.entry(f.clone()).or_insert(Value::Null),
                    _ => unreachable!(),
                }
            }
            Segment::Index(i) => match current {
                Value::List(l) => {
                    let len = l.len();
                    l.get_mut(*i).ok_or(MasonryError::IndexOutOfBounds {
                        path: path.to_string(),
                        index: *i,
                        len,
                    })?
                }
                _ => {
                    return Err(MasonryError::InvalidPath {
                        path: path.to_string(),
                        reason: format!("cannot index into {}", current.type_name()),
                    })
                }
            },
        };
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn yaml(s: &str) -> Value {
        Value::from(serde_yaml::from_str::<serde_yaml::Value>(s).unwrap())
    }

    #[test]
    fn yaml_conversion_preserves_key_order() {
        let v = yaml("zeta: 1\nalpha: 2\nmid: 3");
        let keys: Vec<&String> = v.as_map().unwrap().keys().collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn yaml_numbers_split_int_float() {
        assert_eq!(yaml("42"), Value::Int(42));
        assert_eq!(yaml("42.5"), Value::Float(42.5));
    }

    #[test]
    fn display_stringifies_collections_as_json() {
        let v = yaml("[1, two]");
        assert_eq!(v.to_string(), r#"[1,"two"]"#);
        assert_eq!(Value::Null.to_string(), "");
        assert_eq!(Value::Int(7).to_string(), "7");
    }

    #[test]
    fn bag_get_walks_nested_paths() {
        let mut bag = IndexMap::new();
        bag.insert("a".to_string(), yaml("b:\n  c: [10, 20]"));
        assert_eq!(bag_get(&bag, "a.b.c[1]"), Some(&Value::Int(20)));
        assert_eq!(bag_get(&bag, "a.b.missing"), None);
        assert_eq!(bag_get(&bag, "a.b.c[9]"), None);
    }

    #[test]
    fn bag_set_creates_intermediate_maps() {
        let mut bag = IndexMap::new();
        bag_set(&mut bag, "a.b.c", Value::Int(1)).unwrap();
        assert_eq!(bag_get(&bag, "a.b.c"), Some(&Value::Int(1)));
    }

    #[test]
    fn bag_set_index_out_of_bounds_errors() {
        let mut bag = IndexMap::new();
        bag.insert("l".to_string(), Value::List(vec![Value::Int(1)]));
        let err = bag_set(&mut bag, "l[3]", Value::Int(9)).unwrap_err();
        assert!(err.to_string().contains("out of bounds"));
    }

    #[test]
    fn bag_remove_deletes_nested_entry() {
        let mut bag = IndexMap::new();
        bag_set(&mut bag, "a.b", Value::Int(1)).unwrap();
        bag_set(&mut bag, "a.c", Value::Int(2)).unwrap();
        bag_remove(&mut bag, "a.b").unwrap();
        assert_eq!(bag_get(&bag, "a.b"), None);
        assert_eq!(bag_get(&bag, "a.c"), Some(&Value::Int(2)));
    }

    #[test]
    fn bag_remove_missing_is_noop() {
        let mut bag = IndexMap::new();
        bag_remove(&mut bag, "no.such.path").unwrap();
        assert!(bag.is_empty());
    }

    #[test]
    fn serialize_refs_as_strings() {
        let v = Value::Ref("aws:s3_bucket:b#arn".parse().unwrap());
        assert_eq!(serde_json::to_string(&v).unwrap(), r#""aws:s3_bucket:b#arn""#);
    }
}
