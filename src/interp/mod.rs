//! Interpolation engine
//!
//! Resolves `${prefix:path}` expressions against an evaluation scope, after
//! first rendering any `{{ ... }}` expression blocks. A string that is one
//! isolated group resolves to the referenced value with its type intact;
//! groups embedded in surrounding text are stringified and spliced. Inside
//! the `resources` prefix, `key#property` short-circuits to a deferred
//! resource reference instead of reading a live value.

mod expr;
mod source;

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::{Construct, ConstructRegistry, Edge, ResourceRef, ScopeData, Urn};
use crate::path;
use crate::property::DynamicEval;
use crate::value::Value;

use source::Cursor;

/// Matches one interpolation group. The path part is optional so iteration
/// variables (`${key}`, `${index}`, `${selected}`) parse as groups too.
pub(crate) static INTERP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([a-zA-Z0-9_.]+)(?::([^}]*))?\}").expect("static regex"));

static SINGLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\$\{([a-zA-Z0-9_.]+)(?::([^}]*))?\}$").expect("static regex"));

// The key part takes no dots: dotted resource paths stay path traversals.
static IAC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_-]+#[a-zA-Z0-9._-]+$").expect("static regex"));

/// The binding endpoints visible to a binding-scoped context.
#[derive(Clone)]
pub struct BindingRefs<'a> {
    pub from: &'a Construct,
    pub to: Arc<Construct>,
}

/// Everything an interpolation expression can see: the working scope, the
/// owning construct URN, optional binding endpoints, the registry for URN
/// hops, and the current rule selection.
pub struct DynamicContext<'a> {
    pub(crate) data: &'a ScopeData,
    pub(crate) urn: &'a Urn,
    pub(crate) binding: Option<BindingRefs<'a>>,
    pub(crate) registry: &'a ConstructRegistry,
    pub(crate) selected: Option<&'a Value>,
    pub(crate) index: Option<usize>,
    pub(crate) key: Option<&'a str>,
}

impl<'a> DynamicContext<'a> {
    pub fn for_construct(urn: &'a Urn, data: &'a ScopeData, registry: &'a ConstructRegistry) -> Self {
        Self {
            data,
            urn,
            binding: None,
            registry,
            selected: None,
            index: None,
            key: None,
        }
    }

    pub fn for_binding(
        owner_urn: &'a Urn,
        data: &'a ScopeData,
        registry: &'a ConstructRegistry,
        refs: BindingRefs<'a>,
    ) -> Self {
        Self {
            data,
            urn: owner_urn,
            binding: Some(refs),
            registry,
            selected: None,
            index: None,
            key: None,
        }
    }

    /// Context for one iteration of a for-each rule.
    pub fn with_selection(
        &self,
        selected: &'a Value,
        index: usize,
        key: Option<&'a str>,
    ) -> DynamicContext<'a> {
        DynamicContext {
            data: self.data,
            urn: self.urn,
            binding: self.binding.clone(),
            registry: self.registry,
            selected: Some(selected),
            index: Some(index),
            key,
        }
    }

    /// Recursively interpolates a value. Map keys are interpolated and
    /// stringified; list elements support the `${prefix:path...}` spread
    /// form, splicing resolved list elements in place.
    pub fn interpolate(&self, value: &Value) -> Result<Value> {
        match value {
            Value::String(s) => self.interpolate_string(s),
            Value::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    if let Some((prefix, path)) = spread_group(item) {
                        let resolved = self
                            .resolve_group(prefix, Some(path))?
                            .unwrap_or(Value::Null);
                        match resolved {
                            Value::List(elements) => out.extend(elements),
                            Value::Null => {}
                            other => bail!(
                                "spread '${{{prefix}:{path}...}}' resolved to {}, expected a list",
                                other.type_name()
                            ),
                        }
                    } else {
                        out.push(self.interpolate(item)?);
                    }
                }
                Ok(Value::List(out))
            }
            Value::Map(entries) => {
                let mut out = indexmap::IndexMap::with_capacity(entries.len());
                for (k, v) in entries {
                    let key = if k.contains("${") || k.contains("{{") {
                        self.interpolate_string(k)?.to_string()
                    } else {
                        k.clone()
                    };
                    out.insert(key, self.interpolate(v)?);
                }
                Ok(Value::Map(out))
            }
            other => Ok(other.clone()),
        }
    }

    /// Interpolates one string. Expression blocks render first, then an
    /// isolated group yields the referenced value unchanged; anything else
    /// is spliced as text.
    pub fn interpolate_string(&self, raw: &str) -> Result<Value> {
        let rendered;
        let s = if raw.contains("{{") {
            rendered = expr::render(raw, self)?;
            rendered.as_str()
        } else {
            raw
        };

        if let Some(caps) = SINGLE_RE.captures(s) {
            let prefix = caps.get(1).expect("group 1").as_str();
            let path = caps.get(2).map(|m| m.as_str());
            if let Some(value) = self.resolve_group(prefix, path)? {
                return Ok(value);
            }
            return Ok(Value::String(s.to_string()));
        }
        if !s.contains("${") {
            return Ok(Value::String(s.to_string()));
        }

        let mut out = String::with_capacity(s.len());
        let mut last = 0;
        for caps in INTERP_RE.captures_iter(s) {
            let whole = caps.get(0).expect("group 0");
            out.push_str(&s[last..whole.start()]);
            let prefix = caps.get(1).expect("group 1").as_str();
            let path = caps.get(2).map(|m| m.as_str());
            match self.resolve_group(prefix, path)? {
                Some(value) => out.push_str(&value.to_string()),
                None => out.push_str(whole.as_str()),
            }
            last = whole.end();
        }
        out.push_str(&s[last..]);
        Ok(Value::String(out))
    }

    /// Evaluates a rule condition to a boolean using permissive string
    /// truthiness: empty, "false", and "<no value>" are false.
    pub fn render_condition(&self, raw: &str) -> Result<bool> {
        let rendered = if raw.contains("{{") {
            expr::render(raw, self)?
        } else if raw.contains("${") {
            self.interpolate_string(raw)?.to_string()
        } else {
            raw.to_string()
        };
        Ok(truthy(&rendered))
    }

    /// Evaluates a for-each selector, keeping the selected value's type so
    /// maps and lists stay iterable.
    pub fn select_iterable(&self, raw: &str) -> Result<Value> {
        let trimmed = raw.trim();
        if let Some(inner) = trimmed
            .strip_prefix("{{")
            .and_then(|rest| rest.strip_suffix("}}"))
        {
            if !inner.contains("{{") {
                return expr::eval(inner, self);
            }
        }
        self.interpolate_string(trimmed)
    }

    /// Resolves one group. `Ok(None)` means the group is not addressable in
    /// this context (an unknown bare variable) and should stay literal.
    fn resolve_group(&self, prefix: &str, path_part: Option<&str>) -> Result<Option<Value>> {
        let Some(path_part) = path_part else {
            return Ok(match prefix {
                "key" => self.key.map(|k| Value::String(k.to_string())),
                "index" => self.index.map(|i| Value::Int(i as i64)),
                "selected" => self.selected.cloned(),
                "from" => self.binding.as_ref().map(|b| Value::Urn(b.from.urn.clone())),
                "to" => self.binding.as_ref().map(|b| Value::Urn(b.to.urn.clone())),
                _ => None,
            });
        };

        let mut parts = prefix.split('.');
        let root = parts.next().expect("split yields at least one part");

        // key#property inside resources defers to the solver.
        if root == "resources" && IAC_RE.is_match(path_part) {
            let (key, property) = path_part.split_once('#').expect("matched by IAC_RE");
            let urn = self.section_urn(root)?;
            return Ok(Some(Value::Resource(ResourceRef::iac(key, property, Some(urn)))));
        }

        let mut segments: Vec<path::Segment> =
            parts.map(|p| path::Segment::Field(p.to_string())).collect();
        segments.extend(path::parse(path_part)?);

        let start = self.root_cursor(root)?;
        let value = source::walk(self, start, &segments)
            .with_context(|| format!("resolving '${{{prefix}:{path_part}}}'"))?;
        Ok(Some(value))
    }

    fn root_cursor(&self, root: &str) -> Result<Cursor<'a>> {
        Ok(match root {
            "inputs" => Cursor::value(Value::Map(self.data.inputs.clone()), self.urn.clone()),
            "resources" => Cursor::resources(self.data.resources.clone(), self.urn.clone()),
            "edges" => Cursor::value(edges_value(&self.data.edges), self.urn.clone()),
            "meta" => Cursor::value(meta_value(self.urn), self.urn.clone()),
            "selected" => Cursor::value(
                self.selected.cloned().unwrap_or(Value::Null),
                self.urn.clone(),
            ),
            "from" => {
                let refs = self.require_binding(root)?;
                Cursor::construct_ref(refs.from)
            }
            "to" => {
                let refs = self.require_binding(root)?;
                Cursor::construct_arc(refs.to.clone())
            }
            other => bail!("unknown interpolation prefix '{other}'"),
        })
    }

    /// The URN owning the given section, for reference tracking.
    fn section_urn(&self, root: &str) -> Result<Urn> {
        Ok(match root {
            "from" => self.require_binding(root)?.from.urn.clone(),
            "to" => self.require_binding(root)?.to.urn.clone(),
            _ => self.urn.clone(),
        })
    }

    fn require_binding(&self, root: &str) -> Result<&BindingRefs<'a>> {
        self.binding
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("prefix '{root}' is only valid in a binding scope"))
    }

}

/// Metadata section exposed under `${meta:...}` and `.Meta`.
pub(crate) fn meta_value(urn: &Urn) -> Value {
    let mut meta = indexmap::IndexMap::new();
    meta.insert("urn".to_string(), Value::Urn(urn.clone()));
    meta.insert("name".to_string(), Value::String(urn.resource.clone()));
    meta.insert("environment".to_string(), Value::String(urn.environment.clone()));
    meta.insert("application".to_string(), Value::String(urn.application.clone()));
    meta.insert("project".to_string(), Value::String(urn.project.clone()));
    Value::Map(meta)
}

impl DynamicEval for DynamicContext<'_> {
    fn evaluate(&self, raw: &str) -> Result<Value> {
        self.interpolate_string(raw)
    }
}

/// Detects the `${prefix:path...}` spread form on a list element.
fn spread_group(item: &Value) -> Option<(&str, &str)> {
    let s = item.as_str()?;
    let caps = SINGLE_RE.captures(s)?;
    let prefix = &s[caps.get(1)?.range()];
    let path = caps.get(2)?.as_str().strip_suffix("...")?;
    if path.is_empty() {
        return None;
    }
    Some((prefix, path))
}

pub(crate) fn edges_value(edges: &[Edge]) -> Value {
    Value::List(
        edges
            .iter()
            .map(|e| {
                let mut entry = indexmap::IndexMap::new();
                entry.insert("from".to_string(), Value::Resource(e.from.clone()));
                entry.insert("to".to_string(), Value::Resource(e.to.clone()));
                entry.insert("data".to_string(), Value::Map(e.data.clone()));
                Value::Map(entry)
            })
            .collect(),
    )
}

/// Permissive truthiness over rendered text.
pub(crate) fn truthy(rendered: &str) -> bool {
    !(rendered.is_empty() || rendered == "false" || rendered == "<no value>")
}
