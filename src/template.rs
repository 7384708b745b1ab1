//! `${...}` placeholder resolution
//!
//! A string that is exactly one placeholder resolves to the raw value it
//! points at (numbers stay numbers, objects stay objects). Placeholders
//! embedded in longer strings are replaced by the string form of their value.
//! Arrays and objects resolve element by element, other scalars pass through.
//!
//! Inside a placeholder, `state.`, `runtime.`, `params.` or `parameters.`
//! select the lookup root; without a prefix the root is `state`. The rest is
//! a plain field path, never an expression.

use crate::value::{coerce::to_display_string, path::{get_segments, parse_path}};
use regex::{Captures, Regex};
use serde_json::{Map, Value};
use std::sync::LazyLock;

static WHOLE_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\$\{([^{}]+)\}$").expect("whole placeholder pattern"));

static EMBEDDED_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^{}]+)\}").expect("embedded placeholder pattern"));

/// Which tree a placeholder reads from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Root {
    State,
    Runtime,
    Parameters,
}

fn split_root(expression: &str) -> (Root, &str) {
    const PREFIXES: [(&str, Root); 4] = [
        ("state", Root::State),
        ("runtime", Root::Runtime),
        ("parameters", Root::Parameters),
        ("params", Root::Parameters),
    ];

    for (prefix, root) in PREFIXES {
        if expression == prefix {
            return (root, "");
        }
        if let Some(path) = expression
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix('.'))
        {
            return (root, path);
        }
    }
    (Root::State, expression)
}

/// Lookup roots for one closure invocation.
#[derive(Debug, Clone, Copy)]
pub struct TemplateScope<'a> {
    pub state: &'a Value,
    pub runtime: &'a Map<String, Value>,
    pub parameters: &'a Map<String, Value>,
}

impl<'a> TemplateScope<'a> {
    pub fn new(
        state: &'a Value,
        runtime: &'a Map<String, Value>,
        parameters: &'a Map<String, Value>,
    ) -> Self {
        Self { state, runtime, parameters }
    }

    /// Resolve every placeholder inside `value`.
    pub fn resolve(&self, value: &Value) -> Value {
        match value {
            Value::String(text) => self.resolve_string(text),
            Value::Array(items) => {
                Value::Array(items.iter().map(|item| self.resolve(item)).collect())
            }
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(key, item)| (key.clone(), self.resolve(item)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Resolve a parameter map, passing the names in `functional` through untouched.
    pub fn resolve_parameters(
        &self,
        parameters: &Map<String, Value>,
        functional: &[String],
    ) -> Map<String, Value> {
        parameters
            .iter()
            .map(|(name, value)| {
                let resolved = if functional.iter().any(|f| f == name) {
                    value.clone()
                } else {
                    self.resolve(value)
                };
                (name.clone(), resolved)
            })
            .collect()
    }

    fn resolve_string(&self, text: &str) -> Value {
        if let Some(captures) = WHOLE_PLACEHOLDER.captures(text) {
            return self.lookup(&captures[1]);
        }
        if !text.contains("${") {
            return Value::String(text.to_string());
        }
        let rendered = EMBEDDED_PLACEHOLDER.replace_all(text, |captures: &Captures<'_>| {
            to_display_string(&self.lookup(&captures[1]))
        });
        Value::String(rendered.into_owned())
    }

    /// Value behind one placeholder expression, null when absent.
    pub fn lookup(&self, expression: &str) -> Value {
        let (root, path) = split_root(expression.trim());
        let found = match root {
            Root::State => get_segments(self.state, &parse_path(path)).cloned(),
            Root::Runtime => lookup_in_map(self.runtime, path),
            Root::Parameters => lookup_in_map(self.parameters, path),
        };
        found.unwrap_or(Value::Null)
    }
}

fn lookup_in_map(map: &Map<String, Value>, path: &str) -> Option<Value> {
    let segments = parse_path(path);
    match segments.split_first() {
        None => Some(Value::Object(map.clone())),
        Some((first, rest)) => map
            .get(&first.to_key())
            .and_then(|value| get_segments(value, rest))
            .cloned(),
    }
}
