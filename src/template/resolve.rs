//! Template resolution
//!
//! Strings are resolved in two phases. A `{{ $name(args) }}` span is
//! treated as a function call: the call's result replaces the span, after
//! any calls inside the result have been expanded in turn. Anything else goes through plain
//! `{{ variable }}` interpolation, where unknown names become empty strings.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::{Map, Value};

use crate::common::{Error, Result};

use super::expr::{self, Expr};
use super::functions::Functions;
use super::stringify;

/// Function results may themselves contain templates; this bounds the chain
const MAX_EXPANSION_DEPTH: usize = 32;

/// Variable and function bindings a template is resolved against
#[derive(Debug, Clone, Copy)]
pub struct Bindings<'a> {
    pub vars: &'a Map<String, Value>,
    pub funcs: &'a Functions,
}

impl<'a> Bindings<'a> {
    pub fn new(vars: &'a Map<String, Value>, funcs: &'a Functions) -> Self {
        Self { vars, funcs }
    }
}

static CALL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*(\$[A-Za-z0-9_]+\s*\(.*?\))\s*\}\}").expect("CALL_RE should compile")
});
static VARIABLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([^{}]*?)\s*\}\}").expect("VARIABLE_RE should compile"));

/// Resolve a template value
///
/// Containers are resolved leaf by leaf; non-string leaves and object keys
/// are left as they are.
pub fn resolve(value: &Value, bindings: &Bindings<'_>) -> Result<Value> {
    match value {
        Value::String(s) => resolve_str(s, bindings).map(Value::String),
        Value::Array(items) => items
            .iter()
            .map(|item| resolve(item, bindings))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| Ok((k.clone(), resolve(v, bindings)?)))
            .collect::<Result<Map<_, _>>>()
            .map(Value::Object),
        other => Ok(other.clone()),
    }
}

/// Resolve a single template string
pub fn resolve_str(template: &str, bindings: &Bindings<'_>) -> Result<String> {
    Ok(match expand(template, bindings, 0)? {
        Expansion::Calls(text) => interpolate(&text, bindings.vars),
        Expansion::Verbatim(text) => text,
    })
}

/// Outcome of expanding the calls in a string
enum Expansion {
    /// Calls are spliced in; variables still need interpolating
    Calls(String),
    /// An unbound function was hit; the text is used exactly as is
    Verbatim(String),
}

/// Splice in every call result, left to right
///
/// `depth` counts how many function results this text is nested inside, so
/// sibling calls share a level and only results that themselves contain
/// calls go deeper.
fn expand(template: &str, bindings: &Bindings<'_>, depth: usize) -> Result<Expansion> {
    let mut done = String::with_capacity(template.len());
    let mut rest = template;

    loop {
        let Some(caps) = CALL_RE.captures(rest) else {
            done.push_str(rest);
            return Ok(Expansion::Calls(done));
        };
        let span = caps.get(0).map(|m| m.range()).unwrap_or_default();
        let source = caps.get(1).map(|m| m.as_str()).unwrap_or_default();

        let program = expr::parse_program(source)?;
        let call = match program.statements.as_slice() {
            [Expr::Call { callee, args }] => match callee.as_ref() {
                Expr::Ident(name) => Some((name, args)),
                _ => None,
            },
            _ => None,
        };
        let Some((name, args)) = call else {
            tracing::trace!(expression = source, "Not a single call, interpolating");
            done.push_str(rest);
            return Ok(Expansion::Calls(done));
        };

        let values = args
            .iter()
            .enumerate()
            .map(|(index, arg)| {
                arg.literal_value().ok_or_else(|| Error::TemplateArgument {
                    function: name.trim_start_matches('$').to_string(),
                    index,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let Some(result) = bindings.funcs.call(name, &values) else {
            tracing::debug!(function = %name, "Unbound template function, leaving template as is");
            done.push_str(rest);
            return Ok(Expansion::Verbatim(done));
        };
        let result = stringify(&result?);

        done.push_str(&rest[..span.start]);
        rest = &rest[span.end..];

        if !CALL_RE.is_match(&result) {
            done.push_str(&result);
            continue;
        }
        if depth >= MAX_EXPANSION_DEPTH {
            return Err(Error::function(
                name.trim_start_matches('$'),
                format!("template expansion exceeded {} levels", MAX_EXPANSION_DEPTH),
            ));
        }
        match expand(&result, bindings, depth + 1)? {
            Expansion::Calls(text) => done.push_str(&text),
            Expansion::Verbatim(text) => {
                done.push_str(&text);
                done.push_str(rest);
                return Ok(Expansion::Verbatim(done));
            }
        }
    }
}

/// Replace every `{{ name }}` marker with its value from `vars`
fn interpolate(template: &str, vars: &Map<String, Value>) -> String {
    if !template.contains("{{") {
        return template.to_string();
    }
    VARIABLE_RE
        .replace_all(template, |caps: &Captures<'_>| {
            lookup(vars, &caps[1]).map(display).unwrap_or_default()
        })
        .into_owned()
}

/// Look up a dotted path such as `user.tags.0`
fn lookup<'v>(vars: &'v Map<String, Value>, path: &str) -> Option<&'v Value> {
    if path.is_empty() {
        return None;
    }
    let mut segments = path.split('.');
    let mut current = vars.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Interpolated form of a variable; `null` renders as nothing
fn display(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        other => stringify(other),
    }
}
