//! Path walker behind interpolation groups
//!
//! Walks parsed path segments from a starting section to a value, hopping
//! across construct boundaries when a URN value is encountered mid-path.
//! Resource nodes are a boundary: a path ending on a resource yields a
//! typed reference, not the resource's contents. An unresolved suffix is
//! retried once as a single flat literal key, so resource keys and property
//! names containing dots keep working.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use indexmap::IndexMap;

use crate::interp::{edges_value, meta_value, DynamicContext};
use crate::model::{Construct, Resource, ResourceRef, Urn};
use crate::path::{self, Segment};
use crate::value::Value;

#[derive(Clone)]
pub(crate) enum Handle<'a> {
    Borrowed(&'a Construct),
    Shared(Arc<Construct>),
}

impl Handle<'_> {
    fn construct(&self) -> &Construct {
        match self {
            Handle::Borrowed(c) => c,
            Handle::Shared(arc) => arc,
        }
    }
}

/// A walk position plus the URN of the construct whose data is in view.
#[derive(Clone)]
pub(crate) struct Cursor<'a> {
    node: Node<'a>,
    urn: Urn,
}

#[derive(Clone)]
enum Node<'a> {
    Value(Value),
    Resources(IndexMap<String, Resource>),
    Resource { key: String, resource: Resource },
    Construct(Handle<'a>),
}

impl<'a> Cursor<'a> {
    pub(crate) fn value(value: Value, urn: Urn) -> Self {
        // A map carrying its own urn field re-anchors reference tracking.
        let urn = match &value {
            Value::Map(m) => match m.get("urn") {
                Some(Value::Urn(u)) => u.clone(),
                Some(Value::String(s)) => s.parse().unwrap_or(urn),
                _ => urn,
            },
            _ => urn,
        };
        Cursor {
            node: Node::Value(value),
            urn,
        }
    }

    pub(crate) fn resources(resources: IndexMap<String, Resource>, urn: Urn) -> Self {
        Cursor {
            node: Node::Resources(resources),
            urn,
        }
    }

    pub(crate) fn construct_ref(construct: &'a Construct) -> Self {
        Cursor {
            urn: construct.urn.clone(),
            node: Node::Construct(Handle::Borrowed(construct)),
        }
    }

    pub(crate) fn construct_arc(construct: Arc<Construct>) -> Self {
        Cursor {
            urn: construct.urn.clone(),
            node: Node::Construct(Handle::Shared(construct)),
        }
    }
}

/// Walks `segments` from `start` and materializes the final value.
pub(crate) fn walk(ctx: &DynamicContext<'_>, start: Cursor<'_>, segments: &[Segment]) -> Result<Value> {
    let mut cursor = start;
    let mut i = 0;
    while i < segments.len() {
        cursor = hop(ctx, cursor)?;
        match step(&cursor, &segments[i])? {
            Some(next) => {
                cursor = next;
                i += 1;
            }
            None => {
                // Retry the rest of the path as one flat literal key.
                let flat = path::join(&segments[i..]);
                match step(&cursor, &Segment::Field(flat.clone()))? {
                    Some(next) => {
                        cursor = next;
                        i = segments.len();
                    }
                    None => bail!("'{flat}' not found"),
                }
            }
        }
    }
    finish(cursor)
}

/// Crosses a construct boundary when the cursor sits on a URN value.
fn hop<'a>(ctx: &DynamicContext<'_>, cursor: Cursor<'a>) -> Result<Cursor<'a>> {
    if let Node::Value(Value::Urn(urn)) = &cursor.node {
        let construct = ctx
            .registry
            .expect(urn)
            .with_context(|| format!("following reference to '{urn}'"))?;
        return Ok(Cursor::construct_arc(construct));
    }
    Ok(cursor)
}

fn step<'a>(cursor: &Cursor<'a>, segment: &Segment) -> Result<Option<Cursor<'a>>> {
    let urn = cursor.urn.clone();
    match (&cursor.node, segment) {
        (Node::Value(Value::Map(entries)), Segment::Field(f)) => {
            Ok(entries.get(f).map(|v| Cursor::value(v.clone(), urn)))
        }
        (Node::Value(Value::List(items)), Segment::Index(i)) => match items.get(*i) {
            Some(v) => Ok(Some(Cursor::value(v.clone(), urn))),
            None => bail!("index {i} out of bounds (len {})", items.len()),
        },
        (Node::Value(Value::List(_)), Segment::Field(_)) => Ok(None),
        (Node::Value(other), _) => {
            bail!("cannot descend into {} value", other.type_name())
        }
        (Node::Resources(resources), Segment::Field(f)) => Ok(resources.get(f).map(|r| Cursor {
            node: Node::Resource {
                key: f.clone(),
                resource: r.clone(),
            },
            urn,
        })),
        (Node::Resources(_), Segment::Index(_)) => {
            bail!("resources section cannot be indexed")
        }
        (Node::Resource { resource, .. }, Segment::Field(f)) => {
            if f == "Name" {
                return Ok(Some(Cursor::value(
                    Value::String(resource.id.name.clone()),
                    urn,
                )));
            }
            Ok(resource
                .properties
                .get(f)
                .map(|v| Cursor::value(v.clone(), urn)))
        }
        (Node::Resource { .. }, Segment::Index(_)) => {
            bail!("resource cannot be indexed")
        }
        (Node::Construct(handle), Segment::Field(f)) => {
            let construct = handle.construct();
            let scope = &construct.scope;
            let found = match f.as_str() {
                "inputs" => Some(Cursor::value(Value::Map(scope.inputs.clone()), urn)),
                "resources" => Some(Cursor::resources(scope.resources.clone(), urn)),
                "edges" => Some(Cursor::value(edges_value(&scope.edges), urn)),
                "meta" => Some(Cursor::value(meta_value(&construct.urn), urn)),
                name => {
                    if let Some(output) = scope.output_declarations.get(name) {
                        let value = match &output.property_ref {
                            Some(r) => Value::Ref(r.clone()),
                            None => output.value.clone().unwrap_or(Value::Null),
                        };
                        Some(Cursor::value(value, urn))
                    } else {
                        scope
                            .inputs
                            .get(name)
                            .map(|v| Cursor::value(v.clone(), urn))
                    }
                }
            };
            Ok(found)
        }
        (Node::Construct(_), Segment::Index(_)) => {
            bail!("construct cannot be indexed")
        }
    }
}

fn finish(cursor: Cursor<'_>) -> Result<Value> {
    Ok(match cursor.node {
        Node::Value(v) => v,
        Node::Resource { key, .. } => {
            Value::Resource(ResourceRef::template(key, Some(cursor.urn)))
        }
        Node::Resources(resources) => Value::Map(
            resources
                .keys()
                .map(|key| {
                    (
                        key.clone(),
                        Value::Resource(ResourceRef::template(key.clone(), Some(cursor.urn.clone()))),
                    )
                })
                .collect(),
        ),
        Node::Construct(handle) => Value::Urn(handle.construct().urn.clone()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ConstructRegistry, OutputDeclaration, ScopeData};
    use crate::template::ConstructTemplate;
    use pretty_assertions::assert_eq;

    fn registered_target(registry: &ConstructRegistry) -> Urn {
        let urn: Urn = "urn:a:p:e:app:construct/masonry.aws.Queue:q".parse().unwrap();
        let template: Arc<ConstructTemplate> =
            Arc::new(serde_yaml::from_str("id: masonry.aws.Queue").unwrap());
        let mut construct = Construct::new(urn.clone(), template);
        construct
            .scope
            .inputs
            .insert("visibility".to_string(), Value::Int(30));
        construct.scope.output_declarations.insert(
            "QueueArn".to_string(),
            OutputDeclaration {
                name: "QueueArn".to_string(),
                property_ref: Some("aws:sqs_queue:q#arn".parse().unwrap()),
                value: None,
            },
        );
        registry.insert(Arc::new(construct));
        urn
    }

    #[test]
    fn urn_hop_reads_dependency_inputs() {
        let registry = ConstructRegistry::new();
        let target = registered_target(&registry);

        let owner: Urn = "urn:a:p:e:app:construct/masonry.aws.Bucket:b".parse().unwrap();
        let mut data = ScopeData::default();
        data.inputs.insert("queue".to_string(), Value::Urn(target));
        let ctx = DynamicContext::for_construct(&owner, &data, &registry);

        assert_eq!(
            ctx.interpolate_string("${inputs:queue.inputs.visibility}").unwrap(),
            Value::Int(30)
        );
    }

    #[test]
    fn urn_hop_reads_output_by_name() {
        let registry = ConstructRegistry::new();
        let target = registered_target(&registry);

        let owner: Urn = "urn:a:p:e:app:construct/masonry.aws.Bucket:b".parse().unwrap();
        let mut data = ScopeData::default();
        data.inputs.insert("queue".to_string(), Value::Urn(target));
        let ctx = DynamicContext::for_construct(&owner, &data, &registry);

        assert_eq!(
            ctx.interpolate_string("${inputs:queue.QueueArn}").unwrap(),
            Value::Ref("aws:sqs_queue:q#arn".parse().unwrap())
        );
    }

    #[test]
    fn unregistered_urn_is_an_error() {
        let registry = ConstructRegistry::new();
        let owner: Urn = "urn:a:p:e:app:construct/masonry.aws.Bucket:b".parse().unwrap();
        let missing: Urn = "urn:a:p:e:app:construct/masonry.aws.Queue:gone".parse().unwrap();
        let mut data = ScopeData::default();
        data.inputs.insert("queue".to_string(), Value::Urn(missing));
        let ctx = DynamicContext::for_construct(&owner, &data, &registry);

        assert!(ctx
            .interpolate_string("${inputs:queue.inputs.visibility}")
            .is_err());
    }

    #[test]
    fn flat_key_fallback_handles_dotted_resource_keys() {
        let owner: Urn = "urn:a:p:e:app:construct/masonry.aws.Bucket:b".parse().unwrap();
        let mut data = ScopeData::default();
        data.resources.insert(
            "a.bucket".to_string(),
            Resource::new("aws:s3_bucket:ab".parse().unwrap()),
        );
        let registry = ConstructRegistry::new();
        let ctx = DynamicContext::for_construct(&owner, &data, &registry);

        match ctx.interpolate_string("${resources:a.bucket}").unwrap() {
            Value::Resource(r) => assert_eq!(r.key, "a.bucket"),
            other => panic!("expected resource ref, got {other:?}"),
        }
    }

    #[test]
    fn list_index_out_of_bounds_errors() {
        let owner: Urn = "urn:a:p:e:app:construct/masonry.aws.Bucket:b".parse().unwrap();
        let mut data = ScopeData::default();
        data.inputs.insert(
            "zones".to_string(),
            Value::List(vec![Value::String("a".to_string())]),
        );
        let registry = ConstructRegistry::new();
        let ctx = DynamicContext::for_construct(&owner, &data, &registry);

        let err = ctx.interpolate_string("${inputs:zones[4]}").unwrap_err();
        assert!(err.to_string().contains("resolving"), "{err:#}");
    }

    #[test]
    fn nested_map_urn_field_reanchors_tracking() {
        let registry = ConstructRegistry::new();
        let target = registered_target(&registry);

        let owner: Urn = "urn:a:p:e:app:construct/masonry.aws.Bucket:b".parse().unwrap();
        let mut data = ScopeData::default();
        let mut nested = IndexMap::new();
        nested.insert("urn".to_string(), Value::Urn(target.clone()));
        data.inputs.insert("dep".to_string(), Value::Map(nested));
        let ctx = DynamicContext::for_construct(&owner, &data, &registry);

        assert_eq!(
            ctx.interpolate_string("${inputs:dep.urn}").unwrap(),
            Value::Urn(target)
        );
    }
}
