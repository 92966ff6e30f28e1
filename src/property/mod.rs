//! Property type system
//!
//! Typed property schema for construct inputs: a closed set of variants
//! (string, int, float, bool, map, list, set, key-value-list, path, any,
//! construct-reference) with parse / validate / default / contains
//! operations and path-addressed bag mutation. The variant is selected by a
//! type-tag string from YAML; parameterized tags like `list(string)` and
//! `map(string,int)` are supported alongside long-form schemas.

mod parse;
mod validate;

use anyhow::Result;
use indexmap::IndexMap;
use regex::Regex;
use serde::Deserialize;

use crate::error::MasonryError;
use crate::model::ConstructType;
use crate::value::{bag_get, bag_remove, bag_set, Value};

/// Ordered map of named properties.
pub type PropertyMap = IndexMap<String, Property>;

/// Seam for evaluating embedded template expressions during `parse`.
///
/// The interpolation engine implements this; `LiteralEval` is the inert
/// implementation for contexts with nothing to resolve.
pub trait DynamicEval {
    fn evaluate(&self, raw: &str) -> Result<Value>;
}

/// Evaluator that treats every string as a literal.
pub struct LiteralEval;

impl DynamicEval for LiteralEval {
    fn evaluate(&self, raw: &str) -> Result<Value> {
        Ok(Value::String(raw.to_string()))
    }
}

/// Regex-based sanitization rule: occurrences of `pattern` are replaced
/// with `replace`; a changed value is a `SanitizeError`, not a mutation.
#[derive(Debug, Clone)]
pub struct Sanitizer {
    pub pattern: Regex,
    pub replace: String,
}

impl Sanitizer {
    /// Returns the corrected string when the input needed correction.
    pub fn apply(&self, input: &str) -> Option<String> {
        let corrected = self.pattern.replace_all(input, self.replace.as_str());
        if corrected == input {
            None
        } else {
            Some(corrected.into_owned())
        }
    }
}

/// The closed variant set.
#[derive(Debug, Clone, Default)]
pub enum PropertyType {
    String,
    Int,
    Float,
    Bool,
    Path,
    #[default]
    Any,
    Map {
        key: Option<Box<Property>>,
        value: Option<Box<Property>>,
        properties: PropertyMap,
    },
    List {
        item: Option<Box<Property>>,
        properties: PropertyMap,
    },
    Set {
        item: Option<Box<Property>>,
    },
    KeyValueList {
        key: Box<Property>,
        value: Box<Property>,
    },
    Construct {
        allowed_types: Vec<ConstructType>,
    },
}

impl PropertyType {
    pub fn tag(&self) -> &'static str {
        match self {
            PropertyType::String => "string",
            PropertyType::Int => "int",
            PropertyType::Float => "float",
            PropertyType::Bool => "bool",
            PropertyType::Path => "path",
            PropertyType::Any => "any",
            PropertyType::Map { .. } => "map",
            PropertyType::List { .. } => "list",
            PropertyType::Set { .. } => "set",
            PropertyType::KeyValueList { .. } => "key_value_list",
            PropertyType::Construct { .. } => "construct",
        }
    }
}

/// A typed, validated property slot in an owning bag.
#[derive(Debug, Clone)]
pub struct Property {
    pub name: String,
    /// Dotted location in the owning property bag.
    pub path: String,
    pub ptype: PropertyType,
    pub required: bool,
    /// Raw default; may contain template expressions, evaluated on demand.
    pub default: Option<Value>,
    pub description: String,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub allowed_values: Vec<Value>,
    pub sanitize: Option<Sanitizer>,
}

/// Raw YAML schema for one property.
#[derive(Debug, Clone, Deserialize)]
pub struct PropertySchema {
    #[serde(rename = "type")]
    pub type_tag: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub min_length: Option<usize>,
    #[serde(default)]
    pub max_length: Option<usize>,
    #[serde(default)]
    pub min_value: Option<f64>,
    #[serde(default)]
    pub max_value: Option<f64>,
    #[serde(default)]
    pub allowed_values: Vec<Value>,
    #[serde(default)]
    pub sanitize: Option<SanitizeSchema>,
    #[serde(default)]
    pub item_type: Option<String>,
    #[serde(default)]
    pub key_type: Option<String>,
    #[serde(default)]
    pub value_type: Option<String>,
    #[serde(default)]
    pub properties: IndexMap<String, PropertySchema>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SanitizeSchema {
    pub pattern: String,
    #[serde(default)]
    pub replace: String,
}

/// Builds a `PropertyMap` from a named schema block, assigning paths
/// relative to `parent_path` (empty for top-level inputs).
pub fn build_properties(
    schemas: &IndexMap<String, PropertySchema>,
    parent_path: &str,
) -> Result<PropertyMap, MasonryError> {
    let mut out = PropertyMap::with_capacity(schemas.len());
    for (name, schema) in schemas {
        out.insert(name.clone(), Property::from_schema(name, parent_path, schema)?);
    }
    Ok(out)
}

impl Property {
    /// Factory keyed by the schema's type-tag string.
    pub fn from_schema(
        name: &str,
        parent_path: &str,
        schema: &PropertySchema,
    ) -> Result<Property, MasonryError> {
        let path = if parent_path.is_empty() {
            name.to_string()
        } else {
            format!("{parent_path}.{name}")
        };
        let ptype = parse_type_tag(&schema.type_tag, &path, schema)?;
        let sanitize = match &schema.sanitize {
            Some(s) => Some(Sanitizer {
                pattern: Regex::new(&s.pattern).map_err(|e| MasonryError::InvalidPath {
                    path: path.clone(),
                    reason: format!("invalid sanitize pattern: {e}"),
                })?,
                replace: s.replace.clone(),
            }),
            None => None,
        };
        Ok(Property {
            name: name.to_string(),
            path,
            ptype,
            required: schema.required,
            default: schema.default.clone(),
            description: schema.description.clone(),
            min_length: schema.min_length,
            max_length: schema.max_length,
            min_value: schema.min_value,
            max_value: schema.max_value,
            allowed_values: schema.allowed_values.clone(),
            sanitize,
        })
    }

    /// Synthesized sub-property (list item, map key/value) with only a type.
    fn synthetic(name: &str, path: String, ptype: PropertyType) -> Property {
        Property {
            name: name.to_string(),
            path,
            ptype,
            required: false,
            default: None,
            description: String::new(),
            min_length: None,
            max_length: None,
            min_value: None,
            max_value: None,
            allowed_values: Vec::new(),
            sanitize: None,
        }
    }

    /// Named sub-properties for object-shaped map/list types.
    pub fn sub_properties(&self) -> Option<&PropertyMap> {
        match &self.ptype {
            PropertyType::Map { properties, .. } | PropertyType::List { properties, .. }
                if !properties.is_empty() =>
            {
                Some(properties)
            }
            _ => None,
        }
    }

    /// The canonical empty value for this variant.
    pub fn zero_value(&self) -> Value {
        match &self.ptype {
            PropertyType::String | PropertyType::Path => Value::String(String::new()),
            PropertyType::Int => Value::Int(0),
            PropertyType::Float => Value::Float(0.0),
            PropertyType::Bool => Value::Bool(false),
            PropertyType::Any | PropertyType::Construct { .. } => Value::Null,
            PropertyType::Map { .. } => Value::Map(IndexMap::new()),
            PropertyType::List { .. }
            | PropertyType::Set { .. }
            | PropertyType::KeyValueList { .. } => Value::List(Vec::new()),
        }
    }

    /// Evaluates and parses the declared default, if any.
    pub fn default_value(&self, eval: &dyn DynamicEval) -> Result<Option<Value>> {
        match &self.default {
            Some(raw) => Ok(Some(self.parse(raw, eval)?)),
            None => Ok(None),
        }
    }

    /// Writes `value` at this property's path.
    pub fn set_value(
        &self,
        bag: &mut IndexMap<String, Value>,
        value: Value,
    ) -> Result<(), MasonryError> {
        bag_set(bag, &self.path, value)
    }

    /// Reads the current value at this property's path.
    pub fn get_value<'a>(&self, bag: &'a IndexMap<String, Value>) -> Option<&'a Value> {
        bag_get(bag, &self.path)
    }

    /// Appends into a collection-typed property. Lists and sets gain
    /// elements, maps gain entries; an unset slot is initialized first.
    /// Appending to a set scalar slot is only valid when the slot is unset.
    pub fn append_value(
        &self,
        bag: &mut IndexMap<String, Value>,
        value: Value,
    ) -> Result<(), MasonryError> {
        let existing = bag_get(bag, &self.path).cloned();
        let merged = match existing {
            None | Some(Value::Null) => match &self.ptype {
                PropertyType::List { .. }
                | PropertyType::Set { .. }
                | PropertyType::KeyValueList { .. } => match value {
                    Value::List(items) => Value::List(items),
                    other => Value::List(vec![other]),
                },
                _ => value,
            },
            Some(Value::List(mut items)) => {
                match value {
                    Value::List(more) => items.extend(more),
                    other => items.push(other),
                }
                if matches!(self.ptype, PropertyType::Set { .. }) {
                    items = dedupe(items);
                }
                Value::List(items)
            }
            Some(Value::Map(mut entries)) => match value {
                Value::Map(more) => {
                    entries.extend(more);
                    Value::Map(entries)
                }
                other => {
                    return Err(MasonryError::TypeMismatch {
                        path: self.path.clone(),
                        expected: "map",
                        actual: other.type_name().to_string(),
                    })
                }
            },
            Some(current) => {
                return Err(MasonryError::Bounds {
                    path: self.path.clone(),
                    reason: format!("cannot append to existing {} value", current.type_name()),
                })
            }
        };
        bag_set(bag, &self.path, merged)
    }

    /// Removes `value` from a collection-typed property; removing `Null`
    /// clears the whole slot.
    pub fn remove_value(
        &self,
        bag: &mut IndexMap<String, Value>,
        value: Value,
    ) -> Result<(), MasonryError> {
        if value.is_null() {
            return bag_remove(bag, &self.path);
        }
        let Some(existing) = bag_get(bag, &self.path).cloned() else {
            return Ok(());
        };
        let updated = match existing {
            Value::List(items) => {
                let removed: Vec<Value> = match value {
                    Value::List(targets) => items
                        .into_iter()
                        .filter(|item| !targets.contains(item))
                        .collect(),
                    single => items.into_iter().filter(|item| *item != single).collect(),
                };
                Value::List(removed)
            }
            Value::Map(mut entries) => {
                match value {
                    Value::String(key) => {
                        entries.shift_remove(&key);
                    }
                    Value::List(keys) => {
                        for key in keys {
                            if let Value::String(k) = key {
                                entries.shift_remove(&k);
                            }
                        }
                    }
                    other => {
                        return Err(MasonryError::TypeMismatch {
                            path: self.path.clone(),
                            expected: "map key",
                            actual: other.type_name().to_string(),
                        })
                    }
                }
                Value::Map(entries)
            }
            other => {
                return Err(MasonryError::Bounds {
                    path: self.path.clone(),
                    reason: format!("cannot remove from {} value", other.type_name()),
                })
            }
        };
        bag_set(bag, &self.path, updated)
    }

    /// Membership check appropriate to the variant.
    pub fn contains(&self, value: &Value, needle: &Value) -> bool {
        match (&self.ptype, value) {
            (PropertyType::String | PropertyType::Path, Value::String(s)) => match needle {
                Value::String(n) => s.contains(n.as_str()),
                _ => false,
            },
            (PropertyType::Construct { .. }, Value::Urn(urn)) => match needle {
                Value::Urn(other) => urn.same_construct(other),
                Value::String(s) => s
                    .parse::<crate::model::Urn>()
                    .map(|o| urn.same_construct(&o))
                    .unwrap_or(false),
                _ => false,
            },
            (_, Value::List(items)) => items.contains(needle),
            (_, Value::Map(entries)) => match needle {
                Value::String(key) => entries.contains_key(key),
                _ => entries.values().any(|v| v == needle),
            },
            (_, v) => v == needle,
        }
    }
}

fn dedupe(items: Vec<Value>) -> Vec<Value> {
    let mut seen: Vec<Value> = Vec::with_capacity(items.len());
    for item in items {
        if !seen.contains(&item) {
            seen.push(item);
        }
    }
    seen
}

/// Parses a type-tag string, including parameterized forms.
fn parse_type_tag(
    tag: &str,
    path: &str,
    schema: &PropertySchema,
) -> Result<PropertyType, MasonryError> {
    let tag = tag.trim();
    let (base, args) = match tag.split_once('(') {
        Some((base, rest)) => {
            let args = rest.strip_suffix(')').ok_or_else(|| {
                MasonryError::UnknownPropertyType { tag: tag.to_string() }
            })?;
            (base.trim(), Some(args.trim()))
        }
        None => (tag, None),
    };

    let sub = |name: &str, suffix: &str, sub_tag: &str| -> Result<Box<Property>, MasonryError> {
        let sub_path = format!("{path}{suffix}");
        let empty = empty_schema(sub_tag);
        Ok(Box::new(Property::synthetic(
            name,
            sub_path.clone(),
            parse_type_tag(sub_tag, &sub_path, &empty)?,
        )))
    };

    match base {
        "string" => Ok(PropertyType::String),
        "int" => Ok(PropertyType::Int),
        "float" => Ok(PropertyType::Float),
        "bool" => Ok(PropertyType::Bool),
        "path" => Ok(PropertyType::Path),
        "any" => Ok(PropertyType::Any),
        "list" => {
            let item = match args.or(schema.item_type.as_deref()) {
                Some(t) => Some(sub("item", "[*]", t)?),
                None => None,
            };
            let properties = build_properties(&schema.properties, path)?;
            Ok(PropertyType::List { item, properties })
        }
        "set" => {
            let item = match args.or(schema.item_type.as_deref()) {
                Some(t) => Some(sub("item", "[*]", t)?),
                None => None,
            };
            Ok(PropertyType::Set { item })
        }
        "map" => {
            let (key_tag, value_tag) = match args {
                Some(a) => match a.split_once(',') {
                    Some((k, v)) => (Some(k.trim()), Some(v.trim())),
                    None => {
                        return Err(MasonryError::UnknownPropertyType { tag: tag.to_string() })
                    }
                },
                None => (schema.key_type.as_deref(), schema.value_type.as_deref()),
            };
            let key = match key_tag {
                Some(t) => Some(sub("key", ".key", t)?),
                None => None,
            };
            let value = match value_tag {
                Some(t) => Some(sub("value", ".value", t)?),
                None => None,
            };
            let properties = build_properties(&schema.properties, path)?;
            Ok(PropertyType::Map { key, value, properties })
        }
        "key_value_list" => {
            let key = sub("key", ".key", schema.key_type.as_deref().unwrap_or("string"))?;
            let value = sub("value", ".value", schema.value_type.as_deref().unwrap_or("any"))?;
            Ok(PropertyType::KeyValueList { key, value })
        }
        "construct" => {
            let mut allowed_types = Vec::new();
            if let Some(list) = args {
                for part in list.split('|') {
                    let part = part.trim();
                    if !part.is_empty() {
                        allowed_types.push(part.parse()?);
                    }
                }
            }
            Ok(PropertyType::Construct { allowed_types })
        }
        _ => Err(MasonryError::UnknownPropertyType { tag: tag.to_string() }),
    }
}

fn empty_schema(tag: &str) -> PropertySchema {
    PropertySchema {
        type_tag: tag.to_string(),
        description: String::new(),
        required: false,
        default: None,
        min_length: None,
        max_length: None,
        min_value: None,
        max_value: None,
        allowed_values: Vec::new(),
        sanitize: None,
        item_type: None,
        key_type: None,
        value_type: None,
        properties: IndexMap::new(),
    }
}
