//! Property parsing: raw decoded values → canonical in-memory shapes
//!
//! A string that is itself a template expression is evaluated against the
//! dynamic context before being reinterpreted as the target type. Type
//! mismatches are hard errors; the only coercions are int←float (when the
//! float is integral within epsilon) and string←primitive.

use anyhow::{bail, Context, Result};
use indexmap::IndexMap;

use crate::error::MasonryError;
use crate::property::{DynamicEval, Property, PropertyType};
use crate::value::Value;

/// Floats within this distance of an integer parse as that integer;
/// anything else is a non-integral error, never a truncation.
const INT_EPSILON: f64 = 1e-7;

impl Property {
    /// Parses a raw decoded value into the canonical shape for this type,
    /// evaluating embedded template expressions first.
    pub fn parse(&self, raw: &Value, eval: &dyn DynamicEval) -> Result<Value> {
        let resolved;
        let raw = match raw {
            Value::String(s) if is_template(s) => {
                resolved = eval
                    .evaluate(s)
                    .with_context(|| format!("evaluating template for property {}", self.path))?;
                &resolved
            }
            other => other,
        };
        self.parse_concrete(raw, eval)
            .with_context(|| format!("parsing property {}", self.path))
    }

    fn parse_concrete(&self, raw: &Value, eval: &dyn DynamicEval) -> Result<Value> {
        if raw.is_null() {
            return Ok(Value::Null);
        }
        match &self.ptype {
            PropertyType::String => parse_string(&self.path, raw),
            PropertyType::Path => parse_path(&self.path, raw),
            PropertyType::Int => parse_int(&self.path, raw),
            PropertyType::Float => parse_float(&self.path, raw),
            PropertyType::Bool => match raw {
                Value::Bool(b) => Ok(Value::Bool(*b)),
                other => Err(self.mismatch("bool", other)),
            },
            PropertyType::Any => parse_any(raw, eval),
            PropertyType::List { item, properties } => match raw {
                Value::List(items) => {
                    let parsed = self.parse_items(items, item.as_deref(), properties, eval)?;
                    Ok(Value::List(parsed))
                }
                other => Err(self.mismatch("list", other)),
            },
            PropertyType::Set { item } => match raw {
                Value::List(items) => {
                    let parsed =
                        self.parse_items(items, item.as_deref(), &Default::default(), eval)?;
                    Ok(Value::List(super::dedupe(parsed)))
                }
                other => Err(self.mismatch("set", other)),
            },
            PropertyType::Map { key, value, properties } => match raw {
                Value::Map(entries) => {
                    let mut out = IndexMap::with_capacity(entries.len());
                    for (k, v) in entries {
                        let parsed_key = match key {
                            Some(kp) => match kp.parse(&Value::String(k.clone()), eval)? {
                                Value::String(s) => s,
                                other => other.to_string(),
                            },
                            None => k.clone(),
                        };
                        let parsed_value = if let Some(named) = properties.get(k.as_str()) {
                            named.parse(v, eval)?
                        } else if let Some(vp) = value {
                            vp.parse(v, eval)?
                        } else {
                            parse_any(v, eval)?
                        };
                        out.insert(parsed_key, parsed_value);
                    }
                    Ok(Value::Map(out))
                }
                other => Err(self.mismatch("map", other)),
            },
            PropertyType::KeyValueList { key, value } => {
                let pairs = map_to_list(raw, &key.name, &value.name)
                    .ok_or_else(|| self.mismatch("map or list of key/value pairs", raw))?;
                let mut out = Vec::with_capacity(pairs.len());
                for (k, v) in pairs {
                    let parsed_key = key.parse(&k, eval)?;
                    let parsed_value = value.parse(&v, eval)?;
                    let mut pair = IndexMap::with_capacity(2);
                    pair.insert(key.name.clone(), parsed_key);
                    pair.insert(value.name.clone(), parsed_value);
                    out.push(Value::Map(pair));
                }
                Ok(Value::List(out))
            }
            PropertyType::Construct { .. } => match raw {
                Value::Urn(urn) => Ok(Value::Urn(urn.clone())),
                Value::String(s) => Ok(Value::Urn(s.parse::<crate::model::Urn>()?)),
                other => Err(self.mismatch("construct URN", other)),
            },
        }
    }

    fn parse_items(
        &self,
        items: &[Value],
        item: Option<&Property>,
        properties: &super::PropertyMap,
        eval: &dyn DynamicEval,
    ) -> Result<Vec<Value>> {
        let mut out = Vec::with_capacity(items.len());
        for (index, element) in items.iter().enumerate() {
            let parsed = if !properties.is_empty() {
                // Object-shaped list: each element parses field-by-field.
                let Value::Map(fields) = element else {
                    bail!(MasonryError::TypeMismatch {
                        path: format!("{}[{index}]", self.path),
                        expected: "map",
                        actual: element.type_name().to_string(),
                    });
                };
                let mut obj = IndexMap::with_capacity(fields.len());
                for (k, v) in fields {
                    let parsed_field = match properties.get(k.as_str()) {
                        Some(sub) => sub.parse(v, eval)?,
                        None => parse_any(v, eval)?,
                    };
                    obj.insert(k.clone(), parsed_field);
                }
                Value::Map(obj)
            } else if let Some(item) = item {
                item.parse(element, eval)
                    .with_context(|| format!("parsing element {index} of {}", self.path))?
            } else {
                parse_any(element, eval)?
            };
            out.push(parsed);
        }
        Ok(out)
    }

    fn mismatch(&self, expected: &'static str, actual: &Value) -> anyhow::Error {
        MasonryError::TypeMismatch {
            path: self.path.clone(),
            expected,
            actual: actual.type_name().to_string(),
        }
        .into()
    }
}

pub(crate) fn is_template(s: &str) -> bool {
    s.contains("${") || s.contains("{{")
}

fn parse_string(path: &str, raw: &Value) -> Result<Value> {
    match raw {
        Value::String(s) => Ok(Value::String(s.clone())),
        // Primitive widening via stringification.
        Value::Int(_) | Value::Float(_) | Value::Bool(_) => Ok(Value::String(raw.to_string())),
        Value::Resource(_) | Value::Ref(_) | Value::Urn(_) => Ok(raw.clone()),
        other => bail!(MasonryError::TypeMismatch {
            path: path.to_string(),
            expected: "string",
            actual: other.type_name().to_string(),
        }),
    }
}

fn parse_path(path: &str, raw: &Value) -> Result<Value> {
    match raw {
        Value::String(s) => Ok(Value::String(clean_path(s))),
        other => bail!(MasonryError::TypeMismatch {
            path: path.to_string(),
            expected: "path",
            actual: other.type_name().to_string(),
        }),
    }
}

/// Lexically normalizes a slash path (drops `.` segments, resolves `..`).
fn clean_path(raw: &str) -> String {
    let absolute = raw.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for part in raw.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|p| *p != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }
    let joined = parts.join("/");
    match (absolute, joined.is_empty()) {
        (true, _) => format!("/{joined}"),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

fn parse_int(path: &str, raw: &Value) -> Result<Value> {
    match raw {
        Value::Int(i) => Ok(Value::Int(*i)),
        Value::Float(f) => {
            let rounded = f.round();
            if (f - rounded).abs() < INT_EPSILON {
                Ok(Value::Int(rounded as i64))
            } else {
                bail!("property {path}: float value {f} is not integral")
            }
        }
        other => bail!(MasonryError::TypeMismatch {
            path: path.to_string(),
            expected: "int",
            actual: other.type_name().to_string(),
        }),
    }
}

fn parse_float(path: &str, raw: &Value) -> Result<Value> {
    match raw {
        Value::Float(f) => Ok(Value::Float(*f)),
        Value::Int(i) => Ok(Value::Float(*i as f64)),
        other => bail!(MasonryError::TypeMismatch {
            path: path.to_string(),
            expected: "float",
            actual: other.type_name().to_string(),
        }),
    }
}

/// `any` values pass through with embedded templates evaluated recursively.
fn parse_any(raw: &Value, eval: &dyn DynamicEval) -> Result<Value> {
    match raw {
        Value::String(s) if is_template(s) => eval.evaluate(s),
        Value::List(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(parse_any(item, eval)?);
            }
            Ok(Value::List(out))
        }
        Value::Map(entries) => {
            let mut out = IndexMap::with_capacity(entries.len());
            for (k, v) in entries {
                out.insert(k.clone(), parse_any(v, eval)?);
            }
            Ok(Value::Map(out))
        }
        other => Ok(other.clone()),
    }
}

/// Normalizes both native-map and list-of-pairs input into the canonical
/// ordered pair list for key-value-list parsing.
fn map_to_list(raw: &Value, key_name: &str, value_name: &str) -> Option<Vec<(Value, Value)>> {
    match raw {
        Value::Map(entries) => Some(
            entries
                .iter()
                .map(|(k, v)| (Value::String(k.clone()), v.clone()))
                .collect(),
        ),
        Value::List(items) => {
            let mut pairs = Vec::with_capacity(items.len());
            for item in items {
                let fields = item.as_map()?;
                let key = fields.get(key_name)?.clone();
                let value = fields.get(value_name).cloned().unwrap_or(Value::Null);
                pairs.push((key, value));
            }
            Some(pairs)
        }
        _ => None,
    }
}
