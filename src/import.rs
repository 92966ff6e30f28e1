//! Importing solved constructs
//!
//! When a construct depends on another, the dependency's solved resources
//! are copied into the dependent's initial graph so the solver sees them
//! as pre-existing. Only properties the solver needs at deploy time are
//! carried: resources with no required deploy-time properties are skipped
//! entirely. Values come from registered live state, or from
//! `preview(id=<id>)` placeholders in dry-run mode.

use std::collections::HashSet;

use anyhow::{bail, Result};
use indexmap::IndexMap;
use tracing::debug;

use crate::error::MasonryError;
use crate::graph::ResourceGraph;
use crate::model::{Construct, Resource, ResourceId};
use crate::value::Value;

/// A solved deployment plan for a construct, produced by the external
/// solver. Implementations adapt the solver's output format.
pub trait Solution: Send + Sync {
    /// The solved resource graph in dataflow direction.
    fn dataflow_graph(&self) -> &ResourceGraph;

    /// Schema information for one solved resource.
    fn resource_info(&self, id: &ResourceId) -> Result<ResourceInfo, MasonryError>;
}

/// Per-resource schema facts the importer needs.
#[derive(Debug, Clone, Default)]
pub struct ResourceInfo {
    pub properties: IndexMap<String, PropertyInfo>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PropertyInfo {
    /// Only known after deployment (an ARN, a generated endpoint).
    pub deploy_time: bool,
    pub required: bool,
}

/// Provider-shaped state for one deployed resource, before conversion.
#[derive(Debug, Clone)]
pub struct RawState {
    pub urn: String,
    pub ty: String,
    pub outputs: IndexMap<String, Value>,
}

/// Adapts provider state into resources. Implementations own the mapping
/// from provider URN/type conventions to `ResourceId`s.
pub trait StateConverter: Send + Sync {
    fn convert(&self, state: &RawState) -> Result<Resource, MasonryError>;
}

/// Imports the solved resources of `target` into `graph`.
pub(crate) fn import_construct(
    target: &Construct,
    live: Option<&IndexMap<ResourceId, Resource>>,
    dry_run: bool,
    graph: &mut ResourceGraph,
) -> Result<()> {
    let Some(solution) = &target.solution else {
        debug!(urn = %target.urn, "dependency has no solution yet, nothing to import");
        return Ok(());
    };

    let dataflow = solution.dataflow_graph();
    for id in dataflow.topological_sort()? {
        let info = solution.resource_info(&id)?;
        let needed: Vec<&String> = info
            .properties
            .iter()
            .filter(|(_, p)| p.deploy_time && p.required)
            .map(|(name, _)| name)
            .collect();
        if needed.is_empty() {
            debug!(%id, "no required deploy-time properties, skipping");
            continue;
        }

        let resource = match live.and_then(|state| state.get(&id)) {
            Some(found) => found.clone(),
            None if dry_run => {
                let mut placeholder = Resource::new(id.clone());
                for name in needed {
                    placeholder
                        .properties
                        .insert(name.clone(), Value::String(format!("preview(id={id})")));
                }
                placeholder
            }
            None => bail!("no live state for resource '{id}' of '{}'", target.urn),
        };
        graph.add_vertex(resource);
    }

    for edge in dataflow.edges() {
        if graph.contains(&edge.source) && graph.contains(&edge.target) {
            graph.add_edge(edge.source.clone(), edge.target.clone(), edge.data.clone())?;
        } else {
            debug!(source = %edge.source, target = %edge.target, "skipping edge with excluded endpoint");
        }
    }
    Ok(())
}

/// Clears property references that point at resources absent from the
/// graph, so excluded resources never leak into the solver's input.
pub(crate) fn filter_import_properties(graph: &mut ResourceGraph) {
    let ids: HashSet<ResourceId> = graph.resource_ids().cloned().collect();
    let all: Vec<ResourceId> = ids.iter().cloned().collect();
    for id in &all {
        if let Some(resource) = graph.vertex_mut(id) {
            let properties = std::mem::take(&mut resource.properties);
            resource.properties = properties
                .into_iter()
                .filter_map(|(key, value)| keep_value(value, &ids).map(|v| (key, v)))
                .collect();
        }
    }
}

fn keep_value(value: Value, ids: &HashSet<ResourceId>) -> Option<Value> {
    match value {
        Value::Ref(r) => {
            if ids.contains(&r.resource) {
                Some(Value::Ref(r))
            } else {
                None
            }
        }
        Value::List(items) => Some(Value::List(
            items
                .into_iter()
                .filter_map(|item| keep_value(item, ids))
                .collect(),
        )),
        Value::Map(entries) => Some(Value::Map(
            entries
                .into_iter()
                .filter_map(|(key, v)| keep_value(v, ids).map(|v| (key, v)))
                .collect(),
        )),
        other => Some(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::ConstructTemplate;
    use std::sync::Arc;

    struct FakeSolution {
        graph: ResourceGraph,
        infos: IndexMap<ResourceId, ResourceInfo>,
    }

    impl Solution for FakeSolution {
        fn dataflow_graph(&self) -> &ResourceGraph {
            &self.graph
        }

        fn resource_info(&self, id: &ResourceId) -> Result<ResourceInfo, MasonryError> {
            Ok(self.infos.get(id).cloned().unwrap_or_default())
        }
    }

    fn deploy_time_info(names: &[&str]) -> ResourceInfo {
        let mut info = ResourceInfo::default();
        for name in names {
            info.properties.insert(
                name.to_string(),
                PropertyInfo {
                    deploy_time: true,
                    required: true,
                },
            );
        }
        info
    }

    fn solved_construct() -> Construct {
        let mut graph = ResourceGraph::new();
        graph.add_vertex(Resource::new("aws:s3_bucket:b".parse().unwrap()));
        graph.add_vertex(Resource::new("aws:s3_bucket_policy:p".parse().unwrap()));
        graph
            .add_edge(
                "aws:s3_bucket_policy:p".parse().unwrap(),
                "aws:s3_bucket:b".parse().unwrap(),
                IndexMap::new(),
            )
            .unwrap();

        let mut infos = IndexMap::new();
        infos.insert("aws:s3_bucket:b".parse().unwrap(), deploy_time_info(&["arn"]));
        // The policy has nothing the solver needs after deployment.
        infos.insert("aws:s3_bucket_policy:p".parse().unwrap(), ResourceInfo::default());

        let template: Arc<ConstructTemplate> =
            Arc::new(serde_yaml::from_str("id: masonry.aws.Bucket").unwrap());
        let mut construct = Construct::new(
            "urn:a:p:e:app:construct/masonry.aws.Bucket:b".parse().unwrap(),
            template,
        );
        construct.solution = Some(Arc::new(FakeSolution { graph, infos }));
        construct
    }

    #[test]
    fn unsolved_dependency_imports_nothing() {
        let template: Arc<ConstructTemplate> =
            Arc::new(serde_yaml::from_str("id: masonry.aws.Bucket").unwrap());
        let construct = Construct::new(
            "urn:a:p:e:app:construct/masonry.aws.Bucket:b".parse().unwrap(),
            template,
        );
        let mut graph = ResourceGraph::new();
        import_construct(&construct, None, false, &mut graph).unwrap();
        assert!(graph.is_empty());
    }

    #[test]
    fn dry_run_imports_preview_placeholders() {
        let construct = solved_construct();
        let mut graph = ResourceGraph::new();
        import_construct(&construct, None, true, &mut graph).unwrap();

        // Only the bucket has deploy-time properties; the policy is skipped
        // and the edge with it.
        assert_eq!(graph.vertex_count(), 1);
        assert!(graph.edges().is_empty());
        let bucket = graph.vertex(&"aws:s3_bucket:b".parse().unwrap()).unwrap();
        assert_eq!(
            bucket.properties["arn"],
            Value::String("preview(id=aws:s3_bucket:b)".to_string())
        );
    }

    #[test]
    fn live_state_is_preferred() {
        let construct = solved_construct();
        let mut live = IndexMap::new();
        let mut bucket = Resource::new("aws:s3_bucket:b".parse().unwrap());
        bucket
            .properties
            .insert("arn".to_string(), Value::String("arn:aws:s3:::b".to_string()));
        live.insert(bucket.id.clone(), bucket);

        let mut graph = ResourceGraph::new();
        import_construct(&construct, Some(&live), false, &mut graph).unwrap();
        let imported = graph.vertex(&"aws:s3_bucket:b".parse().unwrap()).unwrap();
        assert_eq!(
            imported.properties["arn"],
            Value::String("arn:aws:s3:::b".to_string())
        );
    }

    #[test]
    fn missing_live_state_without_dry_run_errors() {
        let construct = solved_construct();
        let mut graph = ResourceGraph::new();
        assert!(import_construct(&construct, None, false, &mut graph).is_err());
    }

    #[test]
    fn filter_clears_dangling_references() {
        let mut graph = ResourceGraph::new();
        let mut kept = Resource::new("aws:s3_bucket:b".parse().unwrap());
        kept.properties.insert(
            "policyRef".to_string(),
            Value::Ref("aws:s3_bucket_policy:gone#id".parse().unwrap()),
        );
        kept.properties.insert(
            "selfRef".to_string(),
            Value::Ref("aws:s3_bucket:b#arn".parse().unwrap()),
        );
        kept.properties.insert(
            "nested".to_string(),
            Value::List(vec![
                Value::Ref("aws:s3_bucket_policy:gone#id".parse().unwrap()),
                Value::Int(1),
            ]),
        );
        graph.add_vertex(kept);

        filter_import_properties(&mut graph);
        let bucket = graph.vertex(&"aws:s3_bucket:b".parse().unwrap()).unwrap();
        assert!(!bucket.properties.contains_key("policyRef"));
        assert!(bucket.properties.contains_key("selfRef"));
        assert_eq!(
            bucket.properties["nested"],
            Value::List(vec![Value::Int(1)])
        );
    }
}
