//! Construct-level resources, edges, and references

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::MasonryError;
use crate::model::urn::Urn;
use crate::value::Value;

/// Typed resource identity with the wire format
/// `provider:type[:namespace]:name`.
///
/// The namespace segment is serialized only when non-empty OR when the name
/// itself contains a colon (so parsing stays unambiguous). Parsing splits on
/// at most four segments, leaving any extra colons inside the name. The
/// round-trip `parse(id.to_string()) == id` is lossless for all valid ids.
/// An id with a namespace but an empty name prints as `provider:type:ns`
/// and re-parses with `ns` as the name; evaluation never produces an empty
/// resource name, so only three-or-four-segment forms occur in practice.
///
/// Total order is (provider, type, namespace, name) lexicographic; this is
/// the tie-break order for deterministic topological sorts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId {
    pub provider: String,
    pub ty: String,
    pub namespace: String,
    pub name: String,
}

impl ResourceId {
    pub fn new(
        provider: impl Into<String>,
        ty: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            ty: ty.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.ty)?;
        if !self.namespace.is_empty() || self.name.contains(':') {
            write!(f, ":{}", self.namespace)?;
        }
        if !self.name.is_empty() {
            write!(f, ":{}", self.name)?;
        }
        Ok(())
    }
}

impl FromStr for ResourceId {
    type Err = MasonryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| MasonryError::InvalidResourceId {
            input: s.to_string(),
            reason: reason.to_string(),
        };

        let parts: Vec<&str> = s.splitn(4, ':').collect();
        if parts.len() < 2 || parts[0].is_empty() || parts[1].is_empty() {
            return Err(invalid("expected 'provider:type[:namespace]:name'"));
        }

        let mut id = ResourceId {
            provider: parts[0].to_string(),
            ty: parts[1].to_string(),
            ..Default::default()
        };
        match parts.len() {
            2 => {}
            3 => id.name = parts[2].to_string(),
            _ => {
                id.namespace = parts[2].to_string();
                id.name = parts[3].to_string();
            }
        }
        Ok(id)
    }
}

impl Serialize for ResourceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ResourceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

/// A construct-level resource: identity plus an order-preserving property bag.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resource {
    pub id: ResourceId,
    pub properties: IndexMap<String, Value>,
}

impl Resource {
    pub fn new(id: ResourceId) -> Self {
        Self {
            id,
            properties: IndexMap::new(),
        }
    }
}

/// How an edge endpoint or interpolated resource value is addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefKind {
    /// Plain resource key, resolved immediately within the owning scope.
    Template,
    /// `key#property` reference, deferred to the solver.
    Iac,
    /// Raw text still awaiting interpolation.
    Interpolated,
}

/// Reference to a resource by construct-level key.
///
/// `urn` names the construct that owns the referenced resource; it is
/// tracked through interpolation so cross-construct imports can be filtered.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    pub key: String,
    pub property: Option<String>,
    pub kind: RefKind,
    pub urn: Option<Urn>,
}

impl ResourceRef {
    pub fn template(key: impl Into<String>, urn: Option<Urn>) -> Self {
        Self {
            key: key.into(),
            property: None,
            kind: RefKind::Template,
            urn,
        }
    }

    pub fn iac(key: impl Into<String>, property: impl Into<String>, urn: Option<Urn>) -> Self {
        Self {
            key: key.into(),
            property: Some(property.into()),
            kind: RefKind::Iac,
            urn,
        }
    }

    pub fn interpolated(raw: impl Into<String>) -> Self {
        Self {
            key: raw.into(),
            property: None,
            kind: RefKind::Interpolated,
            urn: None,
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.property {
            Some(property) => write!(f, "{}#{}", self.key, property),
            None => f.write_str(&self.key),
        }
    }
}

/// A construct-level edge between two resource references.
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub from: ResourceRef,
    pub to: ResourceRef,
    pub data: IndexMap<String, Value>,
}

impl Edge {
    /// Edges are deduplicated by (from, to) identity; data is ignored.
    pub fn same_endpoints(&self, other: &Edge) -> bool {
        self.from == other.from && self.to == other.to
    }
}

/// A solver-level reference to one property of a concrete resource.
///
/// Wire format `resource-id#property`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropertyRef {
    pub resource: ResourceId,
    pub property: String,
}

impl fmt::Display for PropertyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.resource, self.property)
    }
}

impl FromStr for PropertyRef {
    type Err = MasonryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (resource, property) = s
            .rsplit_once('#')
            .ok_or_else(|| MasonryError::InvalidPropertyRef { input: s.to_string() })?;
        Ok(Self {
            resource: resource.parse()?,
            property: property.to_string(),
        })
    }
}

impl Serialize for PropertyRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PropertyRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

/// A resolved output of a construct or binding.
///
/// Exactly one of `property_ref` / `value` may be set; enforced at
/// evaluation time, not by the type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputDeclaration {
    pub name: String,
    pub property_ref: Option<PropertyRef>,
    pub value: Option<Value>,
}
