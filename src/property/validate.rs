//! Property validation: required-ness, bounds, allowed values, sanitization
//!
//! Validation never mutates its input. Sanitization failures are a
//! distinguished non-fatal signal carrying the corrected value; collection
//! validation aggregates child sanitizations into one corrected collection.

use indexmap::IndexMap;

use crate::error::{MasonryError, SanitizeError};
use crate::property::{Property, PropertyMap, PropertyType};
use crate::value::Value;

impl Property {
    /// Validates `value` against this property's schema. `None` and `Null`
    /// are equivalent (unset).
    pub fn validate(&self, value: Option<&Value>) -> Result<(), MasonryError> {
        let value = match value {
            None | Some(Value::Null) => {
                if self.required {
                    return Err(MasonryError::RequiredProperty { path: self.path.clone() });
                }
                return Ok(());
            }
            Some(v) => v,
        };

        self.check_type(value)?;
        self.check_bounds(value)?;
        self.check_allowed(value)?;

        match &self.ptype {
            PropertyType::String | PropertyType::Path => self.check_sanitize(value),
            PropertyType::List { item, properties } => {
                self.validate_elements(value, item.as_deref(), properties)
            }
            PropertyType::Set { item } => {
                self.validate_elements(value, item.as_deref(), &PropertyMap::new())
            }
            PropertyType::Map { key, value: value_prop, properties } => {
                self.validate_entries(value, key.as_deref(), value_prop.as_deref(), properties)
            }
            PropertyType::KeyValueList { key, value: value_prop } => {
                self.validate_pairs(value, key, value_prop)
            }
            PropertyType::Construct { allowed_types } => {
                let Value::Urn(urn) = value else { unreachable!() };
                if !allowed_types.is_empty() && !allowed_types.iter().any(|t| urn.matches_type(t)) {
                    return Err(MasonryError::NotAllowed {
                        path: self.path.clone(),
                        value: value.clone(),
                    });
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn check_type(&self, value: &Value) -> Result<(), MasonryError> {
        let ok = match &self.ptype {
            PropertyType::String | PropertyType::Path => {
                matches!(value, Value::String(_) | Value::Resource(_) | Value::Ref(_))
            }
            PropertyType::Int => matches!(value, Value::Int(_)),
            PropertyType::Float => matches!(value, Value::Float(_) | Value::Int(_)),
            PropertyType::Bool => matches!(value, Value::Bool(_)),
            PropertyType::Any => true,
            PropertyType::Map { .. } => matches!(value, Value::Map(_)),
            PropertyType::List { .. }
            | PropertyType::Set { .. }
            | PropertyType::KeyValueList { .. } => matches!(value, Value::List(_)),
            PropertyType::Construct { .. } => matches!(value, Value::Urn(_)),
        };
        if ok {
            Ok(())
        } else {
            Err(MasonryError::TypeMismatch {
                path: self.path.clone(),
                expected: self.ptype.tag(),
                actual: value.type_name().to_string(),
            })
        }
    }

    fn check_bounds(&self, value: &Value) -> Result<(), MasonryError> {
        let bounds_err = |reason: String| MasonryError::Bounds {
            path: self.path.clone(),
            reason,
        };

        let length = match value {
            Value::String(s) => Some(s.len()),
            Value::List(items) => Some(items.len()),
            Value::Map(entries) => Some(entries.len()),
            _ => None,
        };
        if let Some(len) = length {
            if let Some(min) = self.min_length {
                if len < min {
                    return Err(bounds_err(format!("length {len} is less than minimum {min}")));
                }
            }
            if let Some(max) = self.max_length {
                if len > max {
                    return Err(bounds_err(format!("length {len} exceeds maximum {max}")));
                }
            }
        }

        let numeric = match value {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        };
        if let Some(n) = numeric {
            if let Some(min) = self.min_value {
                if n < min {
                    return Err(bounds_err(format!("value {n} is less than minimum {min}")));
                }
            }
            if let Some(max) = self.max_value {
                if n > max {
                    return Err(bounds_err(format!("value {n} exceeds maximum {max}")));
                }
            }
        }
        Ok(())
    }

    fn check_allowed(&self, value: &Value) -> Result<(), MasonryError> {
        // Enumerations only apply to scalar values.
        if self.allowed_values.is_empty()
            || matches!(value, Value::List(_) | Value::Map(_))
        {
            return Ok(());
        }
        if self.allowed_values.contains(value) {
            return Ok(());
        }
        Err(MasonryError::NotAllowed {
            path: self.path.clone(),
            value: value.clone(),
        })
    }

    fn check_sanitize(&self, value: &Value) -> Result<(), MasonryError> {
        let (Some(sanitizer), Value::String(s)) = (&self.sanitize, value) else {
            return Ok(());
        };
        match sanitizer.apply(s) {
            Some(corrected) => Err(SanitizeError {
                input: value.clone(),
                sanitized: Value::String(corrected),
            }
            .into()),
            None => Ok(()),
        }
    }

    fn validate_elements(
        &self,
        value: &Value,
        item: Option<&Property>,
        properties: &PropertyMap,
    ) -> Result<(), MasonryError> {
        let Value::List(items) = value else { unreachable!() };
        let mut errors = Vec::new();
        let mut corrected = items.clone();
        let mut sanitized_any = false;

        for (index, element) in items.iter().enumerate() {
            let result = if !properties.is_empty() {
                validate_named(element, properties)
            } else if let Some(item) = item {
                item.validate(Some(element))
            } else {
                Ok(())
            };
            match result {
                Ok(()) => {}
                Err(MasonryError::Sanitized(s)) => {
                    corrected[index] = s.sanitized;
                    sanitized_any = true;
                }
                Err(other) => errors.push(other),
            }
        }

        finish_collection(value, errors, sanitized_any, Value::List(corrected))
    }

    fn validate_entries(
        &self,
        value: &Value,
        key: Option<&Property>,
        value_prop: Option<&Property>,
        properties: &PropertyMap,
    ) -> Result<(), MasonryError> {
        let Value::Map(entries) = value else { unreachable!() };
        let mut errors = Vec::new();
        let mut corrected = entries.clone();
        let mut sanitized_any = false;

        if !properties.is_empty() {
            for (name, prop) in properties {
                match prop.validate(entries.get(name.as_str())) {
                    Ok(()) => {}
                    Err(MasonryError::Sanitized(s)) => {
                        corrected.insert(name.clone(), s.sanitized);
                        sanitized_any = true;
                    }
                    Err(other) => errors.push(other),
                }
            }
        } else {
            for (k, v) in entries {
                if let Some(kp) = key {
                    if let Err(e) = kp.validate(Some(&Value::String(k.clone()))) {
                        match e {
                            MasonryError::Sanitized(s) => {
                                if let (Some(old), Value::String(new_key)) =
                                    (corrected.shift_remove(k.as_str()), &s.sanitized)
                                {
                                    corrected.insert(new_key.clone(), old);
                                }
                                sanitized_any = true;
                            }
                            other => errors.push(other),
                        }
                    }
                }
                if let Some(vp) = value_prop {
                    match vp.validate(Some(v)) {
                        Ok(()) => {}
                        Err(MasonryError::Sanitized(s)) => {
                            corrected.insert(k.clone(), s.sanitized);
                            sanitized_any = true;
                        }
                        Err(other) => errors.push(other),
                    }
                }
            }
        }

        finish_collection(value, errors, sanitized_any, Value::Map(corrected))
    }

    fn validate_pairs(
        &self,
        value: &Value,
        key: &Property,
        value_prop: &Property,
    ) -> Result<(), MasonryError> {
        let Value::List(items) = value else { unreachable!() };
        let mut errors = Vec::new();
        let mut corrected = items.clone();
        let mut sanitized_any = false;

        for (index, element) in items.iter().enumerate() {
            let Some(fields) = element.as_map() else {
                errors.push(MasonryError::TypeMismatch {
                    path: format!("{}[{index}]", self.path),
                    expected: "map",
                    actual: element.type_name().to_string(),
                });
                continue;
            };
            for prop in [key, value_prop] {
                match prop.validate(fields.get(prop.name.as_str())) {
                    Ok(()) => {}
                    Err(MasonryError::Sanitized(s)) => {
                        if let Value::Map(pair) = &mut corrected[index] {
                            pair.insert(prop.name.clone(), s.sanitized);
                        }
                        sanitized_any = true;
                    }
                    Err(other) => errors.push(other),
                }
            }
        }

        finish_collection(value, errors, sanitized_any, Value::List(corrected))
    }
}

/// Validates an object-shaped element against named sub-properties,
/// aggregating per-field failures.
fn validate_named(element: &Value, properties: &PropertyMap) -> Result<(), MasonryError> {
    let fields: &IndexMap<String, Value> = match element.as_map() {
        Some(m) => m,
        None => {
            return Err(MasonryError::TypeMismatch {
                path: properties
                    .values()
                    .next()
                    .map(|p| p.path.clone())
                    .unwrap_or_default(),
                expected: "map",
                actual: element.type_name().to_string(),
            })
        }
    };
    let mut errors = Vec::new();
    let mut corrected = fields.clone();
    let mut sanitized_any = false;
    for (name, prop) in properties {
        match prop.validate(fields.get(name.as_str())) {
            Ok(()) => {}
            Err(MasonryError::Sanitized(s)) => {
                corrected.insert(name.clone(), s.sanitized);
                sanitized_any = true;
            }
            Err(other) => errors.push(other),
        }
    }
    finish_collection(element, errors, sanitized_any, Value::Map(corrected))
}

/// Folds child validation results: fatal errors aggregate; when every
/// failure was a sanitization, the result is one SanitizeError carrying the
/// corrected collection.
fn finish_collection(
    original: &Value,
    mut errors: Vec<MasonryError>,
    sanitized_any: bool,
    corrected: Value,
) -> Result<(), MasonryError> {
    if errors.is_empty() {
        if sanitized_any {
            return Err(SanitizeError {
                input: original.clone(),
                sanitized: corrected,
            }
            .into());
        }
        return Ok(());
    }
    if sanitized_any {
        errors.push(SanitizeError {
            input: original.clone(),
            sanitized: corrected,
        }
        .into());
    }
    Err(MasonryError::aggregate(errors).expect("non-empty"))
}
