//! Input rule expansion
//!
//! Conditional (`if`/`then`/`else`) and iterative (`for_each`/`do`) rules
//! produce additional resources, edges, and nested rules. For-each over a
//! map iterates keys in lexicographic order so expansion is deterministic
//! regardless of input ordering. A rule's prefix is interpolated, chained
//! to the parent prefix with `.`, and applied to every resource key the
//! block produces; edges inside the block follow renamed keys.

use anyhow::{bail, Result};

use crate::evaluator::Evaluator;
use crate::interp::BindingRefs;
use crate::model::{RefKind, ScopeData, Urn};
use crate::template::{InputRuleTemplate, RuleBlock, RuleKind};
use crate::value::Value;

/// Selection state for the rule being expanded.
#[derive(Debug, Clone, Default)]
pub(crate) struct RuleScope {
    pub selected: Option<Value>,
    pub index: Option<usize>,
    pub key: Option<String>,
    pub prefix: Option<String>,
}

pub(crate) fn evaluate_rules(
    evaluator: &Evaluator,
    data: &mut ScopeData,
    urn: &Urn,
    binding: Option<&BindingRefs<'_>>,
    rules: &[InputRuleTemplate],
    scope: &RuleScope,
) -> Result<()> {
    for rule in rules {
        evaluate_rule(evaluator, data, urn, binding, rule, scope)?;
    }
    Ok(())
}

fn evaluate_rule(
    evaluator: &Evaluator,
    data: &mut ScopeData,
    urn: &Urn,
    binding: Option<&BindingRefs<'_>>,
    rule: &InputRuleTemplate,
    scope: &RuleScope,
) -> Result<()> {
    match &rule.kind {
        RuleKind::Conditional {
            if_expr,
            then_block,
            else_block,
        } => {
            let condition = {
                let ctx = evaluator.rule_ctx(data, urn, binding, scope);
                ctx.render_condition(if_expr)?
            };
            let block = if condition { then_block } else { else_block };
            if let Some(block) = block {
                execute_block(
                    evaluator,
                    data,
                    urn,
                    binding,
                    block,
                    rule.prefix.as_deref(),
                    scope,
                )?;
            }
        }
        RuleKind::ForEach { selector, do_block } => {
            let selected = {
                let ctx = evaluator.rule_ctx(data, urn, binding, scope);
                ctx.select_iterable(selector)?
            };
            match selected {
                Value::Map(entries) => {
                    let mut keys: Vec<String> = entries.keys().cloned().collect();
                    keys.sort();
                    for (index, key) in keys.iter().enumerate() {
                        let iteration = RuleScope {
                            selected: Some(entries[key].clone()),
                            index: Some(index),
                            key: Some(key.clone()),
                            prefix: scope.prefix.clone(),
                        };
                        execute_block(
                            evaluator,
                            data,
                            urn,
                            binding,
                            do_block,
                            rule.prefix.as_deref(),
                            &iteration,
                        )?;
                    }
                }
                Value::List(items) => {
                    for (index, item) in items.into_iter().enumerate() {
                        let iteration = RuleScope {
                            selected: Some(item),
                            index: Some(index),
                            key: None,
                            prefix: scope.prefix.clone(),
                        };
                        execute_block(
                            evaluator,
                            data,
                            urn,
                            binding,
                            do_block,
                            rule.prefix.as_deref(),
                            &iteration,
                        )?;
                    }
                }
                Value::Null => {}
                other => bail!(
                    "for_each selected a {}, expected a map or list",
                    other.type_name()
                ),
            }
        }
    }
    Ok(())
}

fn execute_block(
    evaluator: &Evaluator,
    data: &mut ScopeData,
    urn: &Urn,
    binding: Option<&BindingRefs<'_>>,
    block: &RuleBlock,
    rule_prefix: Option<&str>,
    scope: &RuleScope,
) -> Result<()> {
    let interpolated_prefix = match rule_prefix {
        Some(raw) => {
            let ctx = evaluator.rule_ctx(data, urn, binding, scope);
            Some(ctx.interpolate_string(raw)?.to_string())
        }
        None => None,
    };
    let prefix = join_prefix(scope.prefix.as_deref(), interpolated_prefix.as_deref());
    let keyed = |key: &str| match &prefix {
        Some(p) => format!("{p}.{key}"),
        None => key.to_string(),
    };

    for (key, template) in &block.resources {
        evaluator.resolve_resource(data, urn, binding, &keyed(key), template, scope)?;
    }

    for template in &block.edges {
        let mut template = template.clone();
        if prefix.is_some() {
            for endpoint in [&mut template.from, &mut template.to] {
                if endpoint.kind == RefKind::Template && block.resources.contains_key(&endpoint.key)
                {
                    endpoint.key = keyed(&endpoint.key);
                }
            }
        }
        evaluator.resolve_edge(data, urn, binding, &template, scope)?;
    }

    if !block.rules.is_empty() {
        let nested = RuleScope {
            selected: scope.selected.clone(),
            index: scope.index,
            key: scope.key.clone(),
            prefix: prefix.clone(),
        };
        evaluate_rules(evaluator, data, urn, binding, &block.rules, &nested)?;
    }
    Ok(())
}

fn join_prefix(parent: Option<&str>, child: Option<&str>) -> Option<String> {
    match (parent, child) {
        (Some(p), Some(c)) if !c.is_empty() => Some(format!("{p}.{c}")),
        (Some(p), _) => Some(p.to_string()),
        (None, Some(c)) if !c.is_empty() => Some(c.to_string()),
        (None, _) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn join_prefix_chains_with_dot() {
        assert_eq!(join_prefix(None, None), None);
        assert_eq!(join_prefix(None, Some("a")), Some("a".to_string()));
        assert_eq!(join_prefix(Some("a"), Some("b")), Some("a.b".to_string()));
        assert_eq!(join_prefix(Some("a"), None), Some("a".to_string()));
        assert_eq!(join_prefix(None, Some("")), None);
    }
}
