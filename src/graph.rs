//! Resource graph with deterministic topological ordering
//!
//! Directed graph over `ResourceId`. Insertion is idempotent (existing
//! vertices and edges are skipped, never overwritten) and the topological
//! sort breaks ties by the total order over `ResourceId`, so repeated runs
//! produce identical orderings for downstream codegen diffs.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use indexmap::IndexMap;
use serde::Serialize;

use crate::error::MasonryError;
use crate::model::{Resource, ResourceId};
use crate::value::Value;

/// An edge between two concrete resources.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphEdge {
    pub source: ResourceId,
    pub target: ResourceId,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub data: IndexMap<String, Value>,
}

/// Directed resource graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResourceGraph {
    resources: IndexMap<ResourceId, Resource>,
    edges: Vec<GraphEdge>,
}

impl ResourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a vertex. Returns false (and leaves the existing resource
    /// untouched) when the id is already present.
    pub fn add_vertex(&mut self, resource: Resource) -> bool {
        if self.resources.contains_key(&resource.id) {
            return false;
        }
        self.resources.insert(resource.id.clone(), resource);
        true
    }

    pub fn vertex(&self, id: &ResourceId) -> Option<&Resource> {
        self.resources.get(id)
    }

    pub fn vertex_mut(&mut self, id: &ResourceId) -> Option<&mut Resource> {
        self.resources.get_mut(id)
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.resources.contains_key(id)
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn vertex_count(&self) -> usize {
        self.resources.len()
    }

    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    pub fn resource_ids(&self) -> impl Iterator<Item = &ResourceId> {
        self.resources.keys()
    }

    pub fn edges(&self) -> &[GraphEdge] {
        &self.edges
    }

    /// Adds an edge. Both endpoints must exist. Returns false when an edge
    /// with the same (source, target) already exists.
    pub fn add_edge(
        &mut self,
        source: ResourceId,
        target: ResourceId,
        data: IndexMap<String, Value>,
    ) -> Result<bool, MasonryError> {
        for endpoint in [&source, &target] {
            if !self.contains(endpoint) {
                return Err(MasonryError::MissingEndpoint(endpoint.to_string()));
            }
        }
        if self
            .edges
            .iter()
            .any(|e| e.source == source && e.target == target)
        {
            return Ok(false);
        }
        self.edges.push(GraphEdge { source, target, data });
        Ok(true)
    }

    /// Merges `other` into self: vertices and edges already present are
    /// skipped, so the merge is idempotent.
    pub fn upsert_from(&mut self, other: &ResourceGraph) -> Result<(), MasonryError> {
        for resource in other.resources() {
            self.add_vertex(resource.clone());
        }
        for edge in other.edges() {
            self.add_edge(edge.source.clone(), edge.target.clone(), edge.data.clone())?;
        }
        Ok(())
    }

    /// Kahn's algorithm with a min-heap over `ResourceId` so ties are broken
    /// by (provider, type, namespace, name). Cycles are rejected.
    pub fn topological_sort(&self) -> Result<Vec<ResourceId>, MasonryError> {
        let mut in_degree: IndexMap<&ResourceId, usize> =
            self.resources.keys().map(|id| (id, 0)).collect();
        for edge in &self.edges {
            if let Some(degree) = in_degree.get_mut(&edge.target) {
                *degree += 1;
            }
        }

        let mut ready: BinaryHeap<Reverse<&ResourceId>> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| Reverse(*id))
            .collect();

        let mut order = Vec::with_capacity(self.resources.len());
        while let Some(Reverse(id)) = ready.pop() {
            order.push(id.clone());
            for edge in &self.edges {
                if &edge.source == id {
                    if let Some(degree) = in_degree.get_mut(&edge.target) {
                        *degree -= 1;
                        if *degree == 0 {
                            ready.push(Reverse(&edge.target));
                        }
                    }
                }
            }
        }

        if order.len() != self.resources.len() {
            let stuck = in_degree
                .iter()
                .find(|(_, d)| **d > 0)
                .map(|(id, _)| id.to_string())
                .unwrap_or_default();
            return Err(MasonryError::GraphCycle(stuck));
        }
        Ok(order)
    }
}
