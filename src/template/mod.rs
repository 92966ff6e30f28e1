//! Construct and binding template model
//!
//! Immutable, YAML-sourced descriptions of constructs: resources, edges,
//! outputs, typed input schemas, and input rules. Resource maps are
//! `IndexMap`s, so the authored key order survives deserialization; that
//! order drives deterministic resource-key generation during rule
//! expansion. Templates are read-only after load.

mod loader;

pub use loader::TemplateStore;

use indexmap::IndexMap;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};

use crate::interp::INTERP_RE;
use crate::model::{ConstructType, ResourceRef};
use crate::property::{build_properties, PropertyMap, PropertySchema};
use crate::value::Value;

/// A construct template: the reusable blueprint a `Construct` instantiates.
#[derive(Debug, Clone)]
pub struct ConstructTemplate {
    pub id: ConstructType,
    pub version: String,
    pub description: String,
    pub inputs: PropertyMap,
    pub resources: IndexMap<String, ResourceTemplate>,
    pub edges: Vec<EdgeTemplate>,
    pub outputs: IndexMap<String, OutputTemplate>,
    pub input_rules: Vec<InputRuleTemplate>,
}

#[derive(Debug, Deserialize)]
struct ConstructTemplateRaw {
    id: ConstructType,
    #[serde(default)]
    version: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    inputs: IndexMap<String, PropertySchema>,
    #[serde(default)]
    resources: IndexMap<String, ResourceTemplate>,
    #[serde(default)]
    edges: Vec<EdgeTemplate>,
    #[serde(default)]
    outputs: IndexMap<String, OutputTemplate>,
    #[serde(default)]
    input_rules: Vec<InputRuleTemplate>,
}

impl<'de> Deserialize<'de> for ConstructTemplate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = ConstructTemplateRaw::deserialize(deserializer)?;
        let inputs = build_properties(&raw.inputs, "").map_err(D::Error::custom)?;
        Ok(ConstructTemplate {
            id: raw.id,
            version: raw.version,
            description: raw.description,
            inputs,
            resources: raw.resources,
            edges: raw.edges,
            outputs: raw.outputs,
            input_rules: raw.input_rules,
        })
    }
}

/// A binding template: construct semantics scoped to a (from, to) pair.
///
/// `priority` orders evaluation among multiple bindings on the same owner
/// (ascending).
#[derive(Debug, Clone)]
pub struct BindingTemplate {
    pub from: ConstructType,
    pub to: ConstructType,
    pub priority: i32,
    pub description: String,
    pub inputs: PropertyMap,
    pub resources: IndexMap<String, ResourceTemplate>,
    pub edges: Vec<EdgeTemplate>,
    pub outputs: IndexMap<String, OutputTemplate>,
    pub input_rules: Vec<InputRuleTemplate>,
}

#[derive(Debug, Deserialize)]
struct BindingTemplateRaw {
    // from/to may be omitted in files discovered by path convention; the
    // loader fills them in.
    #[serde(default)]
    from: Option<ConstructType>,
    #[serde(default)]
    to: Option<ConstructType>,
    #[serde(default)]
    priority: i32,
    #[serde(default)]
    description: String,
    #[serde(default)]
    inputs: IndexMap<String, PropertySchema>,
    #[serde(default)]
    resources: IndexMap<String, ResourceTemplate>,
    #[serde(default)]
    edges: Vec<EdgeTemplate>,
    #[serde(default)]
    outputs: IndexMap<String, OutputTemplate>,
    #[serde(default)]
    input_rules: Vec<InputRuleTemplate>,
}

impl BindingTemplate {
    /// Parses a binding template, defaulting absent from/to fields.
    pub(crate) fn parse(
        yaml: &str,
        fallback_from: Option<&ConstructType>,
        fallback_to: Option<&ConstructType>,
    ) -> Result<BindingTemplate, crate::error::MasonryError> {
        let raw: BindingTemplateRaw = serde_yaml::from_str(yaml)?;
        let from = raw
            .from
            .or_else(|| fallback_from.cloned())
            .ok_or_else(|| crate::error::MasonryError::InvalidConstructType {
                input: String::new(),
                reason: "binding template missing 'from'".to_string(),
            })?;
        let to = raw
            .to
            .or_else(|| fallback_to.cloned())
            .ok_or_else(|| crate::error::MasonryError::InvalidConstructType {
                input: String::new(),
                reason: "binding template missing 'to'".to_string(),
            })?;
        let inputs = build_properties(&raw.inputs, "")?;
        Ok(BindingTemplate {
            from,
            to,
            priority: raw.priority,
            description: raw.description,
            inputs,
            resources: raw.resources,
            edges: raw.edges,
            outputs: raw.outputs,
            input_rules: raw.input_rules,
        })
    }
}

/// One resource entry of a template. `ty` is `provider:type`; namespace and
/// name may contain interpolation expressions.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceTemplate {
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub properties: IndexMap<String, Value>,
}

/// An edge entry. Endpoints are classified at parse time: a literal
/// resource key resolves immediately, anything containing `${...}` is
/// deferred to interpolation.
#[derive(Debug, Clone)]
pub struct EdgeTemplate {
    pub from: ResourceRef,
    pub to: ResourceRef,
    pub data: IndexMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct EdgeTemplateRaw {
    from: String,
    to: String,
    #[serde(default)]
    data: IndexMap<String, Value>,
}

fn classify_endpoint(raw: &str) -> ResourceRef {
    if INTERP_RE.is_match(raw) {
        ResourceRef::interpolated(raw)
    } else {
        ResourceRef::template(raw, None)
    }
}

impl<'de> Deserialize<'de> for EdgeTemplate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = EdgeTemplateRaw::deserialize(deserializer)?;
        Ok(EdgeTemplate {
            from: classify_endpoint(&raw.from),
            to: classify_endpoint(&raw.to),
            data: raw.data,
        })
    }
}

/// A declared output; `value` is interpolated at evaluation time.
#[derive(Debug, Clone, Deserialize)]
pub struct OutputTemplate {
    #[serde(default)]
    pub description: String,
    pub value: Value,
}

/// An input rule: either a conditional block or a for-each expansion.
/// The two forms are mutually exclusive; violating that is a load error.
#[derive(Debug, Clone)]
pub struct InputRuleTemplate {
    pub kind: RuleKind,
    /// Optional key prefix, itself interpolated, chained to parent
    /// prefixes with `.` across nested rule levels.
    pub prefix: Option<String>,
}

#[derive(Debug, Clone)]
pub enum RuleKind {
    Conditional {
        if_expr: String,
        then_block: Option<RuleBlock>,
        else_block: Option<RuleBlock>,
    },
    ForEach {
        selector: String,
        do_block: RuleBlock,
    },
}

/// The body of a rule branch.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuleBlock {
    #[serde(default)]
    pub resources: IndexMap<String, ResourceTemplate>,
    #[serde(default)]
    pub edges: Vec<EdgeTemplate>,
    #[serde(default)]
    pub rules: Vec<InputRuleTemplate>,
}

#[derive(Debug, Deserialize)]
struct InputRuleTemplateRaw {
    #[serde(default, rename = "if")]
    if_expr: Option<String>,
    #[serde(default)]
    then: Option<RuleBlock>,
    #[serde(default, rename = "else")]
    else_block: Option<RuleBlock>,
    #[serde(default)]
    for_each: Option<String>,
    #[serde(default, rename = "do")]
    do_block: Option<RuleBlock>,
    #[serde(default)]
    prefix: Option<String>,
}

impl<'de> Deserialize<'de> for InputRuleTemplate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = InputRuleTemplateRaw::deserialize(deserializer)?;
        let conditional = raw.if_expr.is_some() || raw.then.is_some() || raw.else_block.is_some();
        let iterative = raw.for_each.is_some() || raw.do_block.is_some();

        let kind = match (conditional, iterative) {
            (true, false) => {
                let if_expr = raw
                    .if_expr
                    .ok_or_else(|| D::Error::custom("input rule 'then'/'else' requires 'if'"))?;
                if raw.then.is_none() && raw.else_block.is_none() {
                    return Err(D::Error::custom("input rule 'if' requires 'then' or 'else'"));
                }
                RuleKind::Conditional {
                    if_expr,
                    then_block: raw.then,
                    else_block: raw.else_block,
                }
            }
            (false, true) => {
                let selector = raw
                    .for_each
                    .ok_or_else(|| D::Error::custom("input rule 'do' requires 'for_each'"))?;
                let do_block = raw
                    .do_block
                    .ok_or_else(|| D::Error::custom("input rule 'for_each' requires 'do'"))?;
                RuleKind::ForEach { selector, do_block }
            }
            _ => {
                return Err(D::Error::custom(
                    "input rule must set exactly one of if/then/else or for_each/do",
                ))
            }
        };
        Ok(InputRuleTemplate { kind, prefix: raw.prefix })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RefKind;
    use pretty_assertions::assert_eq;

    const BUCKET_YAML: &str = r#"
id: masonry.aws.Bucket
version: "1.0"
inputs:
  name:
    type: string
    required: true
resources:
  zeta:
    type: aws:s3_bucket
  alpha:
    type: aws:s3_bucket_policy
  mid:
    type: aws:s3_bucket_cors
edges:
  - from: zeta
    to: alpha
  - from: ${inputs:target}
    to: mid
outputs:
  BucketArn:
    value: ${resources:zeta#arn}
"#;

    #[test]
    fn construct_template_preserves_resource_order() {
        let t: ConstructTemplate = serde_yaml::from_str(BUCKET_YAML).unwrap();
        let keys: Vec<&String> = t.resources.keys().collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn edge_endpoints_are_classified_at_parse_time() {
        let t: ConstructTemplate = serde_yaml::from_str(BUCKET_YAML).unwrap();
        assert_eq!(t.edges[0].from.kind, RefKind::Template);
        assert_eq!(t.edges[1].from.kind, RefKind::Interpolated);
        assert_eq!(t.edges[1].from.key, "${inputs:target}");
    }

    #[test]
    fn construct_template_builds_input_properties() {
        let t: ConstructTemplate = serde_yaml::from_str(BUCKET_YAML).unwrap();
        let name = t.inputs.get("name").unwrap();
        assert!(name.required);
        assert_eq!(name.path, "name");
    }

    #[test]
    fn input_rule_conditional_parses() {
        let yaml = r#"
if: "{{ .Inputs.versioned }}"
then:
  resources:
    versioning:
      type: aws:s3_bucket_versioning
"#;
        let rule: InputRuleTemplate = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(rule.kind, RuleKind::Conditional { .. }));
    }

    #[test]
    fn input_rule_for_each_parses() {
        let yaml = r#"
for_each: "${inputs:subnets}"
prefix: "${key}"
do:
  resources:
    subnet:
      type: aws:subnet
"#;
        let rule: InputRuleTemplate = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(rule.kind, RuleKind::ForEach { .. }));
        assert_eq!(rule.prefix.as_deref(), Some("${key}"));
    }

    #[test]
    fn input_rule_rejects_mixed_forms() {
        let yaml = r#"
if: "{{ true }}"
then:
  resources: {}
for_each: "${inputs:list}"
do:
  resources: {}
"#;
        assert!(serde_yaml::from_str::<InputRuleTemplate>(yaml).is_err());
    }

    #[test]
    fn input_rule_rejects_if_without_branches() {
        assert!(serde_yaml::from_str::<InputRuleTemplate>("if: \"{{ true }}\"").is_err());
    }

    #[test]
    fn binding_template_uses_fallback_identity() {
        let yaml = "priority: 5\nresources: {}";
        let from = ConstructType::new("masonry.aws", "Function");
        let to = ConstructType::new("masonry.aws", "Bucket");
        let b = BindingTemplate::parse(yaml, Some(&from), Some(&to)).unwrap();
        assert_eq!(b.from, from);
        assert_eq!(b.to, to);
        assert_eq!(b.priority, 5);
    }

    #[test]
    fn binding_template_missing_identity_errors() {
        assert!(BindingTemplate::parse("priority: 1", None, None).is_err());
    }
}
