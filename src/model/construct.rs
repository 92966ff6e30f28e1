//! Evaluated construct state and the shared registry

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use indexmap::IndexMap;

use crate::error::MasonryError;
use crate::graph::ResourceGraph;
use crate::import::Solution;
use crate::model::resource::{Edge, OutputDeclaration, Resource};
use crate::model::urn::Urn;
use crate::template::{BindingTemplate, ConstructTemplate};
use crate::value::Value;

/// The mutable working set shared by construct and binding evaluation:
/// resolved inputs, resources keyed by construct-level key, edges, output
/// declarations, and the imported initial graph.
#[derive(Debug, Clone, Default)]
pub struct ScopeData {
    pub inputs: IndexMap<String, Value>,
    pub resources: IndexMap<String, Resource>,
    pub edges: Vec<Edge>,
    pub output_declarations: IndexMap<String, OutputDeclaration>,
    pub initial_graph: ResourceGraph,
}

/// An evaluated construct instance.
pub struct Construct {
    pub urn: Urn,
    pub template: Arc<ConstructTemplate>,
    pub scope: ScopeData,
    /// Set after the external solver has produced a deployable plan; used
    /// when other constructs import this one.
    pub solution: Option<Arc<dyn Solution>>,
}

impl Construct {
    pub fn new(urn: Urn, template: Arc<ConstructTemplate>) -> Self {
        Self {
            urn,
            template,
            scope: ScopeData::default(),
            solution: None,
        }
    }
}

impl fmt::Debug for Construct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Construct")
            .field("urn", &self.urn.to_string())
            .field("template", &self.template.id.to_string())
            .field("resources", &self.scope.resources.len())
            .field("edges", &self.scope.edges.len())
            .field("solved", &self.solution.is_some())
            .finish()
    }
}

/// An evaluated binding between two constructs, owned by `owner` (the
/// construct whose evaluation discovered it).
#[derive(Debug)]
pub struct Binding {
    pub owner: Urn,
    pub from: Urn,
    pub to: Urn,
    pub priority: i32,
    pub template: Arc<BindingTemplate>,
    pub scope: ScopeData,
}

/// Concurrent registry of evaluated constructs, keyed by URN.
///
/// Evaluation order is the caller's responsibility: a lookup miss is a hard
/// error, never a wait.
#[derive(Debug, Default)]
pub struct ConstructRegistry {
    constructs: DashMap<Urn, Arc<Construct>>,
}

impl ConstructRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, construct: Arc<Construct>) {
        self.constructs.insert(construct.urn.clone(), construct);
    }

    pub fn get(&self, urn: &Urn) -> Option<Arc<Construct>> {
        self.constructs
            .get(&urn.without_output())
            .map(|entry| entry.clone())
    }

    /// Like `get`, but a miss means the dependency was never evaluated.
    pub fn expect(&self, urn: &Urn) -> Result<Arc<Construct>, MasonryError> {
        self.get(urn)
            .ok_or_else(|| MasonryError::UrnNotFound(urn.to_string()))
    }

    pub fn len(&self) -> usize {
        self.constructs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constructs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> Arc<ConstructTemplate> {
        Arc::new(serde_yaml::from_str("id: masonry.aws.Bucket").unwrap())
    }

    #[test]
    fn registry_lookup_ignores_output_segment() {
        let registry = ConstructRegistry::new();
        let urn: Urn = "urn:a:p:e:app:construct/masonry.aws.Bucket:b".parse().unwrap();
        registry.insert(Arc::new(Construct::new(urn.clone(), template())));

        let mut with_output = urn.clone();
        with_output.output = "BucketArn".to_string();
        assert!(registry.get(&with_output).is_some());
    }

    #[test]
    fn registry_miss_is_an_error() {
        let registry = ConstructRegistry::new();
        let urn: Urn = "urn:a:p:e:app:construct/masonry.aws.Bucket:b".parse().unwrap();
        assert!(matches!(
            registry.expect(&urn),
            Err(MasonryError::UrnNotFound(_))
        ));
    }
}
