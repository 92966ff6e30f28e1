//! Binding evaluation and merge
//!
//! A binding runs with the owner as `from` and the dependency as `to`,
//! producing its own scope which is then merged into the owner. The merge
//! is idempotent: resources merge shallowly with binding values winning,
//! edges deduplicate by endpoints, output name collisions keep the earlier
//! declaration, and the initial graph upserts.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::evaluator::{Evaluator, RuleScope};
use crate::interp::BindingRefs;
use crate::model::{Binding, Construct, ScopeData, Urn};
use crate::template::BindingTemplate;

/// A discovered binding awaiting evaluation.
#[derive(Debug, Clone)]
pub struct BindingSeed {
    pub to: Urn,
    pub template: Arc<BindingTemplate>,
}

pub(crate) fn evaluate_binding(
    evaluator: &Evaluator,
    owner: &Construct,
    seed: BindingSeed,
) -> Result<Binding> {
    let to = evaluator.registry().expect(&seed.to)?;
    debug!(from = %owner.urn, to = %to.urn, priority = seed.template.priority, "evaluating binding");
    let refs = BindingRefs {
        from: owner,
        to: to.clone(),
    };
    let urn = owner.urn.clone();
    let mut scope = ScopeData::default();

    evaluator
        .resolve_inputs(
            &mut scope,
            &urn,
            Some(&refs),
            &seed.template.inputs,
            &IndexMap::new(),
        )
        .with_context(|| format!("resolving binding inputs ({} -> {})", owner.urn, to.urn))?;

    // The binding sees the target's solved resources in its initial graph.
    {
        let guard = evaluator.states.get(&to.urn);
        let live = guard.as_ref().map(|g| g.value());
        crate::import::import_construct(&to, live, evaluator.dry_run, &mut scope.initial_graph)
            .with_context(|| format!("importing binding target '{}'", to.urn))?;
    }
    crate::import::filter_import_properties(&mut scope.initial_graph);

    for (key, template) in &seed.template.resources {
        evaluator
            .resolve_resource(&mut scope, &urn, Some(&refs), key, template, &RuleScope::default())
            .with_context(|| format!("resolving binding resource '{key}'"))?;
    }
    for template in &seed.template.edges {
        evaluator.resolve_edge(&mut scope, &urn, Some(&refs), template, &RuleScope::default())?;
    }
    evaluator.evaluate_rules(
        &mut scope,
        &urn,
        Some(&refs),
        &seed.template.input_rules,
        &RuleScope::default(),
    )?;
    evaluator.evaluate_outputs(&mut scope, &urn, Some(&refs), &seed.template.outputs)?;

    Ok(Binding {
        owner: owner.urn.clone(),
        from: owner.urn.clone(),
        to: seed.to,
        priority: seed.template.priority,
        template: seed.template,
        scope,
    })
}

/// Merges an evaluated binding into its owner.
pub(crate) fn apply_binding(owner: &mut Construct, binding: Binding) -> Result<()> {
    for (key, resource) in binding.scope.resources {
        match owner.scope.resources.get_mut(&key) {
            Some(existing) => {
                if existing.id != resource.id {
                    bail!(
                        "binding to '{}' changed identity of resource '{key}' from '{}' to '{}'",
                        binding.to,
                        existing.id,
                        resource.id
                    );
                }
                existing.properties.extend(resource.properties);
            }
            None => {
                owner.scope.resources.insert(key, resource);
            }
        }
    }

    for edge in binding.scope.edges {
        if !owner.scope.edges.iter().any(|e| e.same_endpoints(&edge)) {
            owner.scope.edges.push(edge);
        }
    }

    for (name, declaration) in binding.scope.output_declarations {
        if owner.scope.output_declarations.contains_key(&name) {
            warn!(
                output = name.as_str(),
                binding_to = %binding.to,
                "binding output collides with an existing declaration, keeping the first",
            );
            continue;
        }
        owner.scope.output_declarations.insert(name, declaration);
    }

    owner
        .scope
        .initial_graph
        .upsert_from(&binding.scope.initial_graph)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Edge, OutputDeclaration, Resource, ResourceRef};
    use crate::template::ConstructTemplate;
    use crate::value::Value;
    use pretty_assertions::assert_eq;

    fn owner() -> Construct {
        let template: Arc<ConstructTemplate> =
            Arc::new(serde_yaml::from_str("id: masonry.aws.Function").unwrap());
        Construct::new(
            "urn:a:p:e:app:construct/masonry.aws.Function:f".parse().unwrap(),
            template,
        )
    }

    fn simple_binding(scope: ScopeData) -> Binding {
        let template =
            Arc::new(BindingTemplate::parse("from: masonry.aws.Function\nto: masonry.aws.Bucket", None, None).unwrap());
        Binding {
            owner: "urn:a:p:e:app:construct/masonry.aws.Function:f".parse().unwrap(),
            from: "urn:a:p:e:app:construct/masonry.aws.Function:f".parse().unwrap(),
            to: "urn:a:p:e:app:construct/masonry.aws.Bucket:b".parse().unwrap(),
            priority: 0,
            template,
            scope,
        }
    }

    #[test]
    fn binding_properties_win_on_collision() {
        let mut c = owner();
        let mut r = Resource::new("aws:iam_role:f".parse().unwrap());
        r.properties.insert("policy".to_string(), Value::String("old".to_string()));
        c.scope.resources.insert("role".to_string(), r);

        let mut scope = ScopeData::default();
        let mut incoming = Resource::new("aws:iam_role:f".parse().unwrap());
        incoming
            .properties
            .insert("policy".to_string(), Value::String("new".to_string()));
        scope.resources.insert("role".to_string(), incoming);

        apply_binding(&mut c, simple_binding(scope)).unwrap();
        assert_eq!(
            c.scope.resources["role"].properties["policy"],
            Value::String("new".to_string())
        );
    }

    #[test]
    fn binding_cannot_change_resource_identity() {
        let mut c = owner();
        c.scope
            .resources
            .insert("role".to_string(), Resource::new("aws:iam_role:f".parse().unwrap()));

        let mut scope = ScopeData::default();
        scope
            .resources
            .insert("role".to_string(), Resource::new("aws:iam_role:other".parse().unwrap()));

        assert!(apply_binding(&mut c, simple_binding(scope)).is_err());
    }

    #[test]
    fn binding_edges_dedupe() {
        let mut c = owner();
        let edge = Edge {
            from: ResourceRef::template("a", None),
            to: ResourceRef::template("b", None),
            data: IndexMap::new(),
        };
        c.scope.edges.push(edge.clone());

        let mut scope = ScopeData::default();
        scope.edges.push(edge);
        apply_binding(&mut c, simple_binding(scope)).unwrap();
        assert_eq!(c.scope.edges.len(), 1);
    }

    #[test]
    fn binding_output_collision_keeps_first() {
        let mut c = owner();
        c.scope.output_declarations.insert(
            "Arn".to_string(),
            OutputDeclaration {
                name: "Arn".to_string(),
                property_ref: None,
                value: Some(Value::String("first".to_string())),
            },
        );

        let mut scope = ScopeData::default();
        scope.output_declarations.insert(
            "Arn".to_string(),
            OutputDeclaration {
                name: "Arn".to_string(),
                property_ref: None,
                value: Some(Value::String("second".to_string())),
            },
        );
        apply_binding(&mut c, simple_binding(scope)).unwrap();
        assert_eq!(
            c.scope.output_declarations["Arn"].value,
            Some(Value::String("first".to_string()))
        );
    }

    #[test]
    fn apply_binding_is_idempotent() {
        let mut c = owner();
        let mut scope = ScopeData::default();
        scope
            .resources
            .insert("role".to_string(), Resource::new("aws:iam_role:f".parse().unwrap()));
        scope.edges.push(Edge {
            from: ResourceRef::template("role", None),
            to: ResourceRef::template("role", None),
            data: IndexMap::new(),
        });

        apply_binding(&mut c, simple_binding(scope.clone())).unwrap();
        apply_binding(&mut c, simple_binding(scope)).unwrap();
        assert_eq!(c.scope.resources.len(), 1);
        assert_eq!(c.scope.edges.len(), 1);
    }
}
