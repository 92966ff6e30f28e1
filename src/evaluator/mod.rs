//! Construct evaluation pipeline
//!
//! Turns a construct request (URN plus user inputs) into a solver request:
//! inputs are parsed and validated against the template schema, input rules
//! expand conditionally, resources and edges are interpolated, bindings to
//! dependency constructs are discovered and merged, outputs are declared,
//! and the result is marshalled into constraints. Every step is
//! deterministic: maps preserve insertion order, bindings sort by priority
//! then target URN, outputs sort by name.

mod binding;
mod rules;

pub use binding::BindingSeed;
pub(crate) use rules::RuleScope;

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use dashmap::DashMap;
use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::constraints::{self, SolveRequest};
use crate::error::MasonryError;
use crate::import::{self, RawState, Solution, StateConverter};
use crate::interp::{BindingRefs, DynamicContext};
use crate::model::{
    Construct, ConstructRegistry, Edge, OutputDeclaration, RefKind, Resource, ResourceId,
    ResourceRef, ScopeData, Urn,
};
use crate::property::{PropertyMap, PropertyType};
use crate::template::{EdgeTemplate, OutputTemplate, ResourceTemplate, TemplateStore};
use crate::value::Value;

/// One construct to evaluate, with its user-supplied inputs.
#[derive(Debug, Clone)]
pub struct ConstructRequest {
    pub urn: Urn,
    pub inputs: IndexMap<String, Value>,
}

/// The evaluation engine. Holds the template store, the registry of
/// already-evaluated constructs, and per-construct live state for imports.
pub struct Evaluator {
    store: Arc<TemplateStore>,
    registry: ConstructRegistry,
    states: DashMap<Urn, IndexMap<ResourceId, Resource>>,
    dry_run: bool,
}

impl Evaluator {
    pub fn new(store: Arc<TemplateStore>) -> Self {
        Self {
            store,
            registry: ConstructRegistry::new(),
            states: DashMap::new(),
            dry_run: false,
        }
    }

    /// In dry-run mode missing live state yields `preview(id=<id>)`
    /// placeholders instead of errors.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn registry(&self) -> &ConstructRegistry {
        &self.registry
    }

    /// Records a solved plan for an already-evaluated construct so later
    /// constructs can import its resources.
    pub fn attach_solution(
        &self,
        urn: &Urn,
        solution: Arc<dyn Solution>,
    ) -> Result<(), MasonryError> {
        let existing = self.registry.expect(urn)?;
        self.registry.insert(Arc::new(Construct {
            urn: existing.urn.clone(),
            template: existing.template.clone(),
            scope: existing.scope.clone(),
            solution: Some(solution),
        }));
        Ok(())
    }

    /// Registers converted live state for a construct's resources.
    pub fn register_state(&self, urn: Urn, resources: Vec<Resource>) {
        let map = resources.into_iter().map(|r| (r.id.clone(), r)).collect();
        self.states.insert(urn.without_output(), map);
    }

    /// Converts provider-shaped raw state and registers it.
    pub fn register_raw_state(
        &self,
        urn: Urn,
        states: &[RawState],
        converter: &dyn StateConverter,
    ) -> Result<(), MasonryError> {
        let mut map = IndexMap::with_capacity(states.len());
        for state in states {
            let resource = converter.convert(state)?;
            map.insert(resource.id.clone(), resource);
        }
        self.states.insert(urn.without_output(), map);
        Ok(())
    }

    /// Evaluates one construct and returns the solve request for it.
    /// Dependencies named by construct-typed inputs must already be in the
    /// registry.
    pub fn evaluate(&self, request: ConstructRequest) -> Result<SolveRequest> {
        let construct_type = request
            .urn
            .construct_type()
            .with_context(|| format!("evaluating '{}'", request.urn))?;
        let template = self.store.get_construct(&construct_type)?;
        let mut construct = Construct::new(request.urn.without_output(), template);
        let urn = construct.urn.clone();
        let template = construct.template.clone();
        info!(urn = %urn, construct_type = %construct_type, "evaluating construct");

        self.resolve_inputs(
            &mut construct.scope,
            &urn,
            None,
            &template.inputs,
            &request.inputs,
        )
        .with_context(|| format!("resolving inputs of '{urn}'"))?;

        let seeds = self.discover_bindings(&construct)?;
        self.import_dependencies(&mut construct)?;

        self.evaluate_rules(
            &mut construct.scope,
            &urn,
            None,
            &template.input_rules,
            &RuleScope::default(),
        )?;
        for (key, rt) in &template.resources {
            self.resolve_resource(&mut construct.scope, &urn, None, key, rt, &RuleScope::default())
                .with_context(|| format!("resolving resource '{key}' of '{urn}'"))?;
        }
        for et in &template.edges {
            self.resolve_edge(&mut construct.scope, &urn, None, et, &RuleScope::default())?;
        }

        for seed in seeds {
            let evaluated = self.evaluate_binding(&construct, seed)?;
            binding::apply_binding(&mut construct, evaluated)?;
        }

        self.evaluate_outputs(&mut construct.scope, &urn, None, &template.outputs)?;

        let solve = constraints::marshal(&construct, &self.registry)?;
        self.registry.insert(Arc::new(construct));
        Ok(solve)
    }

    fn ctx<'a>(
        &'a self,
        data: &'a ScopeData,
        urn: &'a Urn,
        binding: Option<&BindingRefs<'a>>,
    ) -> DynamicContext<'a> {
        match binding {
            Some(refs) => DynamicContext::for_binding(urn, data, &self.registry, refs.clone()),
            None => DynamicContext::for_construct(urn, data, &self.registry),
        }
    }

    fn rule_ctx<'a>(
        &'a self,
        data: &'a ScopeData,
        urn: &'a Urn,
        binding: Option<&BindingRefs<'a>>,
        rule: &'a RuleScope,
    ) -> DynamicContext<'a> {
        let mut ctx = self.ctx(data, urn, binding);
        ctx.selected = rule.selected.as_ref();
        ctx.index = rule.index;
        ctx.key = rule.key.as_deref();
        ctx
    }

    /// Parses, defaults, validates, and stores template inputs. A sanitize
    /// failure is accepted with the corrected value and a warning; any
    /// other validation failure is fatal.
    pub(crate) fn resolve_inputs(
        &self,
        data: &mut ScopeData,
        urn: &Urn,
        binding: Option<&BindingRefs<'_>>,
        schema: &PropertyMap,
        provided: &IndexMap<String, Value>,
    ) -> Result<()> {
        for key in provided.keys() {
            if !schema.contains_key(key) {
                bail!("unknown input '{key}'");
            }
        }

        for (name, prop) in schema {
            let resolved = {
                let ctx = self.ctx(data, urn, binding);
                let value = match provided.get(name) {
                    Some(raw) => Some(prop.parse(raw, &ctx)?),
                    None => prop.default_value(&ctx)?,
                };
                match prop.validate(value.as_ref()) {
                    Ok(()) => value,
                    Err(MasonryError::Sanitized(s)) => {
                        warn!(
                            input = name.as_str(),
                            original = %s.input,
                            corrected = %s.sanitized,
                            "input value was sanitized",
                        );
                        Some(s.sanitized.clone())
                    }
                    Err(e) => return Err(e).with_context(|| format!("validating input '{name}'")),
                }
            };
            if let Some(value) = resolved {
                prop.set_value(&mut data.inputs, value)?;
            }
        }
        Ok(())
    }

    /// Finds bindings for every construct-typed input pointing at an
    /// already-evaluated dependency, ordered by (priority, target URN).
    fn discover_bindings(&self, construct: &Construct) -> Result<Vec<BindingSeed>> {
        let mut seeds = Vec::new();
        for prop in construct.template.inputs.values() {
            if !matches!(prop.ptype, PropertyType::Construct { .. }) {
                continue;
            }
            let Some(Value::Urn(target)) = prop.get_value(&construct.scope.inputs) else {
                continue;
            };
            let dependency = self.registry.expect(target)?;
            let to_type = dependency.template.id.clone();
            if let Some(template) = self.store.get_binding(&construct.template.id, &to_type)? {
                seeds.push(BindingSeed {
                    to: target.without_output(),
                    template,
                });
            } else {
                debug!(from = %construct.template.id, to = %to_type, "no binding defined");
            }
        }
        seeds.sort_by(|a, b| {
            (a.template.priority, a.to.to_string()).cmp(&(b.template.priority, b.to.to_string()))
        });
        Ok(seeds)
    }

    /// Imports the solved resources of every construct-typed dependency
    /// into the initial graph, then clears references to anything that was
    /// not imported.
    fn import_dependencies(&self, construct: &mut Construct) -> Result<()> {
        let mut targets = Vec::new();
        for prop in construct.template.inputs.values() {
            if !matches!(prop.ptype, PropertyType::Construct { .. }) {
                continue;
            }
            if let Some(Value::Urn(target)) = prop.get_value(&construct.scope.inputs) {
                targets.push(target.without_output());
            }
        }
        for target in targets {
            let dependency = self.registry.expect(&target)?;
            let guard = self.states.get(&dependency.urn);
            let live = guard.as_ref().map(|g| g.value());
            import::import_construct(
                &dependency,
                live,
                self.dry_run,
                &mut construct.scope.initial_graph,
            )
            .with_context(|| format!("importing '{}'", dependency.urn))?;
        }
        import::filter_import_properties(&mut construct.scope.initial_graph);
        Ok(())
    }

    pub(crate) fn evaluate_binding(
        &self,
        owner: &Construct,
        seed: BindingSeed,
    ) -> Result<crate::model::Binding> {
        binding::evaluate_binding(self, owner, seed)
    }

    pub(crate) fn evaluate_rules(
        &self,
        data: &mut ScopeData,
        urn: &Urn,
        binding: Option<&BindingRefs<'_>>,
        rules: &[crate::template::InputRuleTemplate],
        scope: &RuleScope,
    ) -> Result<()> {
        rules::evaluate_rules(self, data, urn, binding, rules, scope)
    }

    /// Interpolates one resource template and merges it into the scope
    /// under `key`. Re-resolving an existing key must keep the identity;
    /// properties merge with scalars overwritten, maps merged per key, and
    /// lists appended.
    pub(crate) fn resolve_resource(
        &self,
        data: &mut ScopeData,
        urn: &Urn,
        binding: Option<&BindingRefs<'_>>,
        key: &str,
        template: &ResourceTemplate,
        rule: &RuleScope,
    ) -> Result<()> {
        let (id, properties) = {
            let ctx = self.rule_ctx(data, urn, binding, rule);
            let ty = ctx.interpolate_string(&template.ty)?.to_string();
            let (provider, rtype) = ty
                .split_once(':')
                .ok_or_else(|| anyhow::anyhow!("resource type '{ty}' must be 'provider:type'"))?;
            let namespace = ctx.interpolate_string(&template.namespace)?.to_string();
            let name = if template.name.is_empty() {
                key.to_string()
            } else {
                ctx.interpolate_string(&template.name)?.to_string()
            };
            let id = ResourceId::new(provider, rtype, namespace, name);

            let mut properties = IndexMap::with_capacity(template.properties.len());
            for (pkey, pvalue) in &template.properties {
                let pkey = if pkey.contains("${") || pkey.contains("{{") {
                    ctx.interpolate_string(pkey)?.to_string()
                } else {
                    pkey.clone()
                };
                properties.insert(pkey, ctx.interpolate(pvalue)?);
            }
            (id, properties)
        };

        match data.resources.get_mut(key) {
            Some(existing) => {
                if existing.id != id {
                    bail!(
                        "resource '{key}' identity changed from '{}' to '{id}'",
                        existing.id
                    );
                }
                merge_properties(&mut existing.properties, properties);
            }
            None => {
                data.resources.insert(key.to_string(), Resource { id, properties });
            }
        }
        Ok(())
    }

    /// Resolves an edge template into the scope's edge list, deduplicating
    /// by endpoints.
    pub(crate) fn resolve_edge(
        &self,
        data: &mut ScopeData,
        urn: &Urn,
        binding: Option<&BindingRefs<'_>>,
        template: &EdgeTemplate,
        rule: &RuleScope,
    ) -> Result<()> {
        let edge = {
            let ctx = self.rule_ctx(data, urn, binding, rule);
            let from = resolve_endpoint(&ctx, &template.from, urn)?;
            let to = resolve_endpoint(&ctx, &template.to, urn)?;
            let mut edge_data = IndexMap::with_capacity(template.data.len());
            for (k, v) in &template.data {
                edge_data.insert(k.clone(), ctx.interpolate(v)?);
            }
            Edge {
                from,
                to,
                data: edge_data,
            }
        };
        if !data.edges.iter().any(|e| e.same_endpoints(&edge)) {
            data.edges.push(edge);
        }
        Ok(())
    }

    /// Declares outputs in name order. A reference-shaped result becomes a
    /// property reference; anything else is a concrete value.
    pub(crate) fn evaluate_outputs(
        &self,
        data: &mut ScopeData,
        urn: &Urn,
        binding: Option<&BindingRefs<'_>>,
        outputs: &IndexMap<String, OutputTemplate>,
    ) -> Result<()> {
        let mut names: Vec<&String> = outputs.keys().collect();
        names.sort();
        for name in names {
            let template = &outputs[name];
            let value = {
                let ctx = self.ctx(data, urn, binding);
                ctx.interpolate(&template.value)
                    .with_context(|| format!("evaluating output '{name}'"))?
            };
            let declaration = match value {
                Value::Resource(r) => {
                    let id = self.resource_id_for(data, &r)?;
                    match &r.property {
                        Some(property) => OutputDeclaration {
                            name: name.clone(),
                            property_ref: Some(crate::model::PropertyRef {
                                resource: id,
                                property: property.clone(),
                            }),
                            value: None,
                        },
                        None => OutputDeclaration {
                            name: name.clone(),
                            property_ref: None,
                            value: Some(Value::String(id.to_string())),
                        },
                    }
                }
                Value::Ref(property_ref) => OutputDeclaration {
                    name: name.clone(),
                    property_ref: Some(property_ref),
                    value: None,
                },
                Value::Null => bail!("output '{name}' has no value"),
                other => OutputDeclaration {
                    name: name.clone(),
                    property_ref: None,
                    value: Some(other),
                },
            };
            data.output_declarations.insert(name.clone(), declaration);
        }
        Ok(())
    }

    /// Maps a resource reference to its concrete id, looking first in the
    /// local scope, then in the owning construct named by the reference.
    fn resource_id_for(&self, data: &ScopeData, r: &ResourceRef) -> Result<ResourceId> {
        if let Some(resource) = data.resources.get(&r.key) {
            return Ok(resource.id.clone());
        }
        if let Some(urn) = &r.urn {
            if let Some(construct) = self.registry.get(urn) {
                if let Some(resource) = construct.scope.resources.get(&r.key) {
                    return Ok(resource.id.clone());
                }
            }
        }
        bail!("unknown resource key '{}'", r.key)
    }
}

fn resolve_endpoint(
    ctx: &DynamicContext<'_>,
    endpoint: &ResourceRef,
    urn: &Urn,
) -> Result<ResourceRef> {
    match endpoint.kind {
        RefKind::Template => Ok(ResourceRef::template(endpoint.key.clone(), Some(urn.clone()))),
        RefKind::Iac => {
            let mut r = endpoint.clone();
            if r.urn.is_none() {
                r.urn = Some(urn.clone());
            }
            Ok(r)
        }
        RefKind::Interpolated => match ctx.interpolate_string(&endpoint.key)? {
            Value::Resource(r) => Ok(r),
            Value::String(s) => Ok(ResourceRef::template(s, Some(urn.clone()))),
            other => bail!(
                "edge endpoint '{}' resolved to {}, expected a resource",
                endpoint.key,
                other.type_name()
            ),
        },
    }
}

/// Property merge for re-resolved resources: maps merge per key
/// (recursively), lists append, scalars overwrite.
fn merge_properties(dst: &mut IndexMap<String, Value>, src: IndexMap<String, Value>) {
    for (key, value) in src {
        match (dst.get_mut(&key), value) {
            (Some(Value::Map(existing)), Value::Map(incoming)) => {
                merge_properties(existing, incoming);
            }
            (Some(Value::List(existing)), Value::List(incoming)) => {
                existing.extend(incoming);
            }
            (Some(slot), incoming) => *slot = incoming,
            (None, incoming) => {
                dst.insert(key, incoming);
            }
        }
    }
}
