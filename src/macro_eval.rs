//! Parameter templates and the `#MACRO#...` grammar.
//!
//! Parsing happens exactly once, at `SignalSource::connect` time (i.e.
//! during rule compilation); evaluation happens once per trigger: a
//! template is precompiled once and walked cheaply on every firing rather
//! than re-parsed.

use crate::event::Context;
use crate::value::Value;

/// A parsed macro expression. Evaluation is O(path length), never touching
/// the host event's schema again after parse time: `property_id` is looked
/// up once at rule-load time and the resulting id cached.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MacroExpr {
    /// `Context.Event.<prop>`: the context itself is a single event.
    EventProperty(i64),
    /// `Contexts[i][j]...`: the context is a (possibly nested) list;
    /// descend to the leaf named by `indices`.
    CollectionPath(Vec<usize>),
    /// `Contexts[i][j]....Event.<prop>`: descend, then read a property off
    /// the leaf event.
    CollectionPathThenEventProperty(Vec<usize>, i64),
}

const PREFIX: &str = "#MACRO#";

impl MacroExpr {
    /// Returns `Some(raw_expression)` if `s` is a macro literal, stripping
    /// the `#MACRO#` prefix.
    pub fn strip_prefix(s: &str) -> Option<&str> {
        s.strip_prefix(PREFIX)
    }

    pub fn is_macro_literal(s: &str) -> bool {
        s.starts_with(PREFIX)
    }

    /// Parses the expression after the `#MACRO#` prefix has been stripped.
    /// `resolve_prop` must be the rule-load-time property id lookup
    /// (typically `meta_event.property_id`); a negative result is treated
    /// as an unknown property and fails parsing.
    pub fn parse(expr: &str, resolve_prop: impl Fn(&str) -> i64) -> Result<Self, String> {
        if let Some(prop) = expr.strip_prefix("Context.Event.") {
            if prop.is_empty() {
                return Err("empty property name in Context.Event.<prop>".into());
            }
            let id = resolve_prop(prop);
            if id < 0 {
                return Err(format!("unknown event property '{prop}'"));
            }
            return Ok(MacroExpr::EventProperty(id));
        }

        if let Some(rest) = expr.strip_prefix("Contexts") {
            let (indices, tail) = parse_indices(rest)?;
            if indices.is_empty() {
                return Err("Contexts[...] macro requires at least one index".into());
            }
            if tail.is_empty() {
                return Ok(MacroExpr::CollectionPath(indices));
            }
            if let Some(prop) = tail.strip_prefix(".Event.") {
                if prop.is_empty() {
                    return Err("empty property name after Contexts[...].Event.".into());
                }
                let id = resolve_prop(prop);
                if id < 0 {
                    return Err(format!("unknown event property '{prop}'"));
                }
                return Ok(MacroExpr::CollectionPathThenEventProperty(indices, id));
            }
            return Err(format!("malformed macro tail '{tail}' after Contexts[...]"));
        }

        Err(format!("unrecognized macro expression '{expr}'"))
    }

    /// Evaluate against the context present at trigger time. Any failure is
    /// a `RuntimeWarning`; the caller skips only this target.
    pub fn evaluate(&self, ctx: &Context) -> Result<Value, String> {
        match self {
            MacroExpr::EventProperty(id) => {
                let event = ctx.as_event().ok_or("macro expected Context to be a single event")?;
                Ok(event.get(*id).unwrap_or(Value::Null))
            }
            MacroExpr::CollectionPath(indices) => {
                let leaf = ctx
                    .index_path(indices)
                    .ok_or_else(|| format!("index path {indices:?} out of range"))?;
                match leaf {
                    Context::Value(v) => Ok(v.clone()),
                    Context::Event(_) => {
                        Err("collection path leaf is an event; follow it with .Event.<prop>".into())
                    }
                    Context::List(_) => {
                        Err("collection path leaf is a list; index further before use".into())
                    }
                }
            }
            MacroExpr::CollectionPathThenEventProperty(indices, id) => {
                let leaf = ctx
                    .index_path(indices)
                    .ok_or_else(|| format!("index path {indices:?} out of range"))?;
                let event = leaf.as_event().ok_or("collection path leaf is not an event")?;
                Ok(event.get(*id).unwrap_or(Value::Null))
            }
        }
    }
}

fn parse_indices(mut rest: &str) -> Result<(Vec<usize>, &str), String> {
    let mut indices = Vec::new();
    while let Some(after_bracket) = rest.strip_prefix('[') {
        let close = after_bracket.find(']').ok_or("unterminated '[' in Contexts[...] macro")?;
        let digits = &after_bracket[..close];
        let idx: usize = digits
            .parse()
            .map_err(|_| format!("malformed index '{digits}' in Contexts[...] macro"))?;
        indices.push(idx);
        rest = &after_bracket[close + 1..];
    }
    Ok((indices, rest))
}

/// A per-edge parameter template attached to a `source -> target`
/// connection.
#[derive(Clone, Debug)]
pub enum ParamTemplate {
    Literal(Value),
    Macro(MacroExpr),
    List(Vec<ParamTemplate>),
}

impl ParamTemplate {
    /// Parses a raw config/parameter value into a template, resolving any
    /// embedded macros via `resolve_prop`. Fails at parse time for
    /// malformed macros.
    pub fn parse(raw: &Value, resolve_prop: &impl Fn(&str) -> i64) -> Result<Self, String> {
        match raw {
            Value::String(s) if MacroExpr::is_macro_literal(s) => {
                let expr = MacroExpr::strip_prefix(s).unwrap();
                Ok(ParamTemplate::Macro(MacroExpr::parse(expr, resolve_prop)?))
            }
            Value::Array(items) => {
                let mut parsed = Vec::with_capacity(items.len());
                for item in items {
                    parsed.push(ParamTemplate::parse(item, resolve_prop)?);
                }
                Ok(ParamTemplate::List(parsed))
            }
            other => Ok(ParamTemplate::Literal(other.clone())),
        }
    }

    /// Evaluates the template against the context present at trigger time.
    pub fn evaluate(&self, ctx: &Context) -> Result<Value, String> {
        match self {
            ParamTemplate::Literal(v) => Ok(v.clone()),
            ParamTemplate::Macro(m) => m.evaluate(ctx),
            ParamTemplate::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(item.evaluate(ctx)?);
                }
                Ok(Value::Array(out))
            }
        }
    }

    /// Equality used by the sharing detector: literal lists compare by
    /// value, compiled macros compare by structural equality
    /// (since two independently-parsed macros referencing the same
    /// property are functionally identical).
    pub fn same_as(&self, other: &ParamTemplate) -> bool {
        match (self, other) {
            (ParamTemplate::Literal(a), ParamTemplate::Literal(b)) => a == b,
            (ParamTemplate::Macro(a), ParamTemplate::Macro(b)) => a == b,
            (ParamTemplate::List(a), ParamTemplate::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_as(y))
            }
            _ => false,
        }
    }
}
