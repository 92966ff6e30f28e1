//! Constraint marshalling
//!
//! Flattens an evaluated construct into the request handed to the external
//! solver: application constraints in topological order, resource property
//! constraints per resource in declaration order, edge constraints in edge
//! order, and output constraints sorted by name. Resource references are
//! resolved to concrete ids here; an unresolved reference is a bug in
//! evaluation and fails the marshal.

use anyhow::{bail, Result};
use indexmap::IndexMap;
use serde::Serialize;

use crate::graph::ResourceGraph;
use crate::model::{Construct, ConstructRegistry, PropertyRef, RefKind, ResourceId, ResourceRef};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    MustExist,
    Equals,
}

/// One solver constraint.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum Constraint {
    Application {
        operator: Operator,
        node: ResourceId,
    },
    Resource {
        operator: Operator,
        target: ResourceId,
        property: String,
        value: Value,
    },
    Edge {
        operator: Operator,
        source: ResourceId,
        target: ResourceId,
        #[serde(skip_serializing_if = "IndexMap::is_empty")]
        data: IndexMap<String, Value>,
    },
    Output {
        operator: Operator,
        name: String,
        #[serde(rename = "ref", skip_serializing_if = "Option::is_none")]
        property_ref: Option<PropertyRef>,
        #[serde(skip_serializing_if = "Option::is_none")]
        value: Option<Value>,
    },
}

/// Everything the solver needs for one construct.
#[derive(Debug, Serialize)]
pub struct SolveRequest {
    pub constraints: Vec<Constraint>,
    pub initial_state: ResourceGraph,
}

/// Marshals an evaluated construct into a solve request.
pub(crate) fn marshal(
    construct: &Construct,
    registry: &ConstructRegistry,
) -> Result<SolveRequest> {
    let scope = &construct.scope;

    // Local graph over construct-level resources, for ordering only.
    let mut ordering = ResourceGraph::new();
    for resource in scope.resources.values() {
        ordering.add_vertex(crate::model::Resource::new(resource.id.clone()));
    }
    for edge in &scope.edges {
        let source = resolve_ref(construct, registry, &edge.from)?;
        let target = resolve_ref(construct, registry, &edge.to)?;
        if ordering.contains(&source) && ordering.contains(&target) {
            ordering.add_edge(source, target, IndexMap::new())?;
        }
    }
    let order = ordering.topological_sort()?;

    let mut constraints = Vec::new();
    for id in &order {
        constraints.push(Constraint::Application {
            operator: Operator::MustExist,
            node: id.clone(),
        });
    }

    let by_id: IndexMap<&ResourceId, &crate::model::Resource> =
        scope.resources.values().map(|r| (&r.id, r)).collect();
    for id in &order {
        let resource = by_id[id];
        for (property, value) in &resource.properties {
            constraints.push(Constraint::Resource {
                operator: Operator::Equals,
                target: id.clone(),
                property: property.clone(),
                value: resolve_value(construct, registry, value)?,
            });
        }
    }

    for edge in &scope.edges {
        let mut data = IndexMap::with_capacity(edge.data.len());
        for (k, v) in &edge.data {
            data.insert(k.clone(), resolve_value(construct, registry, v)?);
        }
        constraints.push(Constraint::Edge {
            operator: Operator::MustExist,
            source: resolve_ref(construct, registry, &edge.from)?,
            target: resolve_ref(construct, registry, &edge.to)?,
            data,
        });
    }

    let mut output_names: Vec<&String> = scope.output_declarations.keys().collect();
    output_names.sort();
    for name in output_names {
        let declaration = &scope.output_declarations[name];
        constraints.push(Constraint::Output {
            operator: Operator::MustExist,
            name: declaration.name.clone(),
            property_ref: declaration.property_ref.clone(),
            value: declaration.value.clone(),
        });
    }

    Ok(SolveRequest {
        constraints,
        initial_state: scope.initial_graph.clone(),
    })
}

/// Maps a construct-level reference to the concrete id it names, in the
/// local scope or in the referenced construct.
fn resolve_ref(
    construct: &Construct,
    registry: &ConstructRegistry,
    r: &ResourceRef,
) -> Result<ResourceId> {
    if r.kind == RefKind::Interpolated {
        bail!("edge endpoint '{}' was never interpolated", r.key);
    }
    if let Some(resource) = construct.scope.resources.get(&r.key) {
        return Ok(resource.id.clone());
    }
    if let Some(urn) = &r.urn {
        if *urn != construct.urn {
            if let Some(other) = registry.get(urn) {
                if let Some(resource) = other.scope.resources.get(&r.key) {
                    return Ok(resource.id.clone());
                }
            }
        }
    }
    bail!("unknown resource key '{}'", r.key)
}

/// Rewrites reference-shaped values into solver representations: a
/// resource-with-property becomes a property reference, a bare resource
/// becomes its id.
fn resolve_value(
    construct: &Construct,
    registry: &ConstructRegistry,
    value: &Value,
) -> Result<Value> {
    Ok(match value {
        Value::Resource(r) => {
            let id = resolve_ref(construct, registry, r)?;
            match &r.property {
                Some(property) => Value::Ref(PropertyRef {
                    resource: id,
                    property: property.clone(),
                }),
                None => Value::String(id.to_string()),
            }
        }
        Value::List(items) => Value::List(
            items
                .iter()
                .map(|item| resolve_value(construct, registry, item))
                .collect::<Result<_>>()?,
        ),
        Value::Map(entries) => {
            let mut out = IndexMap::with_capacity(entries.len());
            for (k, v) in entries {
                out.insert(k.clone(), resolve_value(construct, registry, v)?);
            }
            Value::Map(out)
        }
        other => other.clone(),
    })
}
