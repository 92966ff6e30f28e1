//! Expression blocks
//!
//! Renders `{{ ... }}` blocks embedded in template strings before group
//! interpolation runs. The language is small: context paths rooted at
//! `.Inputs`, `.Resources`, `.Edges`, `.Meta`, `.From`, `.To`, `.Selected`,
//! `.Index`, `.Key`; string/number/bool literals; and prefix-form function
//! calls like `eq`, `not`, `fieldRef`. Missing context paths evaluate to
//! null, which renders as `<no value>`.

use anyhow::{bail, Context, Result};
use indexmap::IndexMap;

use crate::interp::{edges_value, meta_value, truthy, DynamicContext};
use crate::model::{Construct, ResourceRef, Urn};
use crate::path::{self, Segment};
use crate::value::Value;

/// Renders every expression block in `raw`, splicing results as text.
pub(crate) fn render(raw: &str, ctx: &DynamicContext<'_>) -> Result<String> {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find("}}")
            .ok_or_else(|| anyhow::anyhow!("unterminated expression block in '{raw}'"))?;
        let inner = &after[..end];
        let value = eval(inner, ctx).with_context(|| format!("evaluating '{{{{{inner}}}}}'"))?;
        out.push_str(&stringify(&value));
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Evaluates one expression to a typed value.
pub(crate) fn eval(src: &str, ctx: &DynamicContext<'_>) -> Result<Value> {
    let tokens = tokenize(src)?;
    if tokens.is_empty() {
        return Ok(Value::Null);
    }
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        ctx,
    };
    let value = parser.expr()?;
    if parser.pos != tokens.len() {
        bail!("unexpected trailing tokens in '{src}'");
    }
    Ok(value)
}

fn stringify(value: &Value) -> String {
    match value {
        Value::Null => "<no value>".to_string(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Path(String),
    Str(String),
    Int(i64),
    Float(f64),
    LParen,
    RParen,
}

fn tokenize(src: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = src.chars().peekable();
    while let Some(&ch) = chars.peek() {
        match ch {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '"' => {
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some('n') => s.push('\n'),
                            Some('t') => s.push('\t'),
                            Some(other) => s.push(other),
                            None => bail!("unterminated string literal in '{src}'"),
                        },
                        Some(other) => s.push(other),
                        None => bail!("unterminated string literal in '{src}'"),
                    }
                }
                tokens.push(Token::Str(s));
            }
            '.' => {
                let mut p = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_alphanumeric() || matches!(c, '.' | '_' | '-' | '[' | ']') {
                        p.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Path(p));
            }
            c if c.is_ascii_digit() || c == '-' => {
                let mut n = String::new();
                n.push(c);
                chars.next();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        n.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if n.contains('.') {
                    tokens.push(Token::Float(n.parse().with_context(|| format!("bad number '{n}'"))?));
                } else {
                    tokens.push(Token::Int(n.parse().with_context(|| format!("bad number '{n}'"))?));
                }
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&i) = chars.peek() {
                    if i.is_alphanumeric() || i == '_' {
                        ident.push(i);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            other => bail!("unexpected character '{other}' in expression '{src}'"),
        }
    }
    Ok(tokens)
}

struct Parser<'p, 'a> {
    tokens: &'p [Token],
    pos: usize,
    ctx: &'p DynamicContext<'a>,
}

impl Parser<'_, '_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&Token> {
        let t = self.tokens.get(self.pos);
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    /// A full expression: a function call, or a single atom.
    fn expr(&mut self) -> Result<Value> {
        match self.peek() {
            Some(Token::Ident(name)) if !matches!(name.as_str(), "true" | "false") => {
                let name = name.clone();
                self.pos += 1;
                let mut args = Vec::new();
                while let Some(t) = self.peek() {
                    if *t == Token::RParen {
                        break;
                    }
                    args.push(self.atom()?);
                }
                apply(&name, args, self.ctx)
            }
            _ => self.atom(),
        }
    }

    fn atom(&mut self) -> Result<Value> {
        match self.next() {
            Some(Token::Str(s)) => Ok(Value::String(s.clone())),
            Some(Token::Int(i)) => Ok(Value::Int(*i)),
            Some(Token::Float(f)) => Ok(Value::Float(*f)),
            Some(Token::Ident(i)) if i == "true" => Ok(Value::Bool(true)),
            Some(Token::Ident(i)) if i == "false" => Ok(Value::Bool(false)),
            Some(Token::Path(p)) => {
                let p = p.clone();
                eval_path(&p, self.ctx)
            }
            Some(Token::LParen) => {
                let value = self.expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(value),
                    _ => bail!("missing closing parenthesis"),
                }
            }
            Some(Token::Ident(other)) => bail!("unexpected identifier '{other}'"),
            Some(Token::RParen) => bail!("unexpected ')'"),
            None => bail!("unexpected end of expression"),
        }
    }
}

/// Resolves a `.Root.rest` context path. Unknown leaf paths are null;
/// unknown roots are errors.
fn eval_path(p: &str, ctx: &DynamicContext<'_>) -> Result<Value> {
    let segments = path::parse(p)?;
    let (root, rest) = segments
        .split_first()
        .ok_or_else(|| anyhow::anyhow!("empty context path"))?;
    let root = root
        .as_field()
        .ok_or_else(|| anyhow::anyhow!("context path must start with a field"))?;

    let base = match root {
        "Inputs" => Value::Map(ctx.data.inputs.clone()),
        "Resources" => resources_value(ctx),
        "Edges" => edges_value(&ctx.data.edges),
        "Meta" => meta_value(ctx.urn),
        "Selected" => ctx.selected.cloned().unwrap_or(Value::Null),
        "Index" => ctx.index.map(|i| Value::Int(i as i64)).unwrap_or(Value::Null),
        "Key" => ctx
            .key
            .map(|k| Value::String(k.to_string()))
            .unwrap_or(Value::Null),
        "From" => {
            let refs = ctx
                .binding
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!(".From is only valid in a binding scope"))?;
            construct_value(refs.from)
        }
        "To" => {
            let refs = ctx
                .binding
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!(".To is only valid in a binding scope"))?;
            construct_value(&refs.to)
        }
        other => bail!("unknown context root '.{other}'"),
    };
    Ok(walk_value(base, rest))
}

fn resources_value(ctx: &DynamicContext<'_>) -> Value {
    refs_map(ctx.data.resources.keys(), ctx.urn)
}

fn refs_map<'k>(keys: impl Iterator<Item = &'k String>, urn: &Urn) -> Value {
    Value::Map(
        keys.map(|key| {
            (
                key.clone(),
                Value::Resource(ResourceRef::template(key.clone(), Some(urn.clone()))),
            )
        })
        .collect(),
    )
}

fn construct_value(construct: &Construct) -> Value {
    let mut map = IndexMap::new();
    map.insert("URN".to_string(), Value::Urn(construct.urn.clone()));
    map.insert(
        "Name".to_string(),
        Value::String(construct.urn.resource.clone()),
    );
    map.insert("Inputs".to_string(), Value::Map(construct.scope.inputs.clone()));
    map.insert(
        "Resources".to_string(),
        refs_map(construct.scope.resources.keys(), &construct.urn),
    );
    map.insert("Meta".to_string(), meta_value(&construct.urn));
    Value::Map(map)
}

/// Plain value descent; anything missing becomes null.
fn walk_value(mut current: Value, segments: &[Segment]) -> Value {
    for segment in segments {
        current = match (segment, current) {
            (Segment::Field(f), Value::Map(mut m)) => {
                m.shift_remove(f).unwrap_or(Value::Null)
            }
            (Segment::Index(i), Value::List(mut l)) => {
                if *i < l.len() {
                    l.swap_remove(*i)
                } else {
                    Value::Null
                }
            }
            _ => Value::Null,
        };
    }
    current
}

fn apply(name: &str, args: Vec<Value>, ctx: &DynamicContext<'_>) -> Result<Value> {
    let arity = |n: usize| -> Result<()> {
        if args.len() != n {
            bail!("function '{name}' expects {n} argument(s), got {}", args.len());
        }
        Ok(())
    };

    match name {
        "eq" => {
            arity(2)?;
            Ok(Value::Bool(loose_eq(&args[0], &args[1])))
        }
        "ne" => {
            arity(2)?;
            Ok(Value::Bool(!loose_eq(&args[0], &args[1])))
        }
        "not" => {
            arity(1)?;
            Ok(Value::Bool(!truthy_value(&args[0])))
        }
        "and" => Ok(Value::Bool(args.iter().all(truthy_value))),
        "or" => Ok(Value::Bool(args.iter().any(truthy_value))),
        "toJSON" => {
            arity(1)?;
            Ok(Value::String(serde_json::to_string(&args[0].to_json())?))
        }
        "fieldRef" => {
            arity(2)?;
            let property = args[0]
                .as_str()
                .ok_or_else(|| anyhow::anyhow!("fieldRef property must be a string"))?;
            match &args[1] {
                Value::Resource(r) => Ok(Value::Resource(ResourceRef::iac(
                    r.key.clone(),
                    property,
                    r.urn.clone(),
                ))),
                Value::String(key) => Ok(Value::Resource(ResourceRef::iac(
                    key.clone(),
                    property,
                    Some(ctx.urn.clone()),
                ))),
                other => bail!("fieldRef target must be a resource, got {}", other.type_name()),
            }
        }
        "pathAncestor" => {
            arity(2)?;
            let p = args[0]
                .as_str()
                .ok_or_else(|| anyhow::anyhow!("pathAncestor path must be a string"))?;
            let levels = args[1]
                .as_int()
                .ok_or_else(|| anyhow::anyhow!("pathAncestor levels must be an int"))?;
            let mut parts: Vec<&str> = p.split('.').collect();
            for _ in 0..levels {
                parts.pop();
            }
            Ok(Value::String(parts.join(".")))
        }
        "lower" => {
            arity(1)?;
            Ok(Value::String(args[0].to_string().to_lowercase()))
        }
        "upper" => {
            arity(1)?;
            Ok(Value::String(args[0].to_string().to_uppercase()))
        }
        "trim" => {
            arity(1)?;
            Ok(Value::String(args[0].to_string().trim().to_string()))
        }
        "replace" => {
            arity(3)?;
            let s = args[0].to_string();
            let from = args[1].to_string();
            let to = args[2].to_string();
            Ok(Value::String(s.replace(&from, &to)))
        }
        "split" => {
            arity(2)?;
            let s = args[0].to_string();
            let sep = args[1].to_string();
            Ok(Value::List(
                s.split(sep.as_str())
                    .map(|part| Value::String(part.to_string()))
                    .collect(),
            ))
        }
        "join" => {
            arity(2)?;
            let items = args[0]
                .as_list()
                .ok_or_else(|| anyhow::anyhow!("join expects a list"))?;
            let sep = args[1].to_string();
            Ok(Value::String(
                items
                    .iter()
                    .map(Value::to_string)
                    .collect::<Vec<_>>()
                    .join(&sep),
            ))
        }
        "contains" => {
            arity(2)?;
            let found = match &args[0] {
                Value::String(s) => s.contains(&args[1].to_string()),
                Value::List(items) => items.iter().any(|item| loose_eq(item, &args[1])),
                Value::Map(entries) => entries.contains_key(&args[1].to_string()),
                _ => false,
            };
            Ok(Value::Bool(found))
        }
        "default" => {
            arity(2)?;
            let empty = matches!(&args[0], Value::Null)
                || matches!(&args[0], Value::String(s) if s.is_empty());
            Ok(if empty { args[1].clone() } else { args[0].clone() })
        }
        other => bail!("unknown function '{other}'"),
    }
}

fn truthy_value(value: &Value) -> bool {
    truthy(&stringify(value)) && !value.is_null()
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int(i), Value::Float(f)) | (Value::Float(f), Value::Int(i)) => *i as f64 == *f,
        (x, y) if std::mem::discriminant(x) == std::mem::discriminant(y) => x == y,
        (x, y) => x.to_string() == y.to_string(),
    }
}
