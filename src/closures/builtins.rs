//! Built-in closures shipped with every engine
//!
//! - `assign`: write or merge a value at a state path
//! - `respond`: write a `{status, headers, body}` envelope to `state.response`
//! - `log`: emit a message through tracing
//! - `truthy`, `equals`, `greaterThan`, `lessThan`, `includes`, `length`: predicates and measures
//! - `forEach`: run a step sequence once per collection element

use crate::{
    closures::{ClosureContext, ClosureDefinition, ClosureHandler},
    error::ConfigurationError,
    registry::Registry,
    value::{
        deep_equal, delete_path, get_path, is_truthy, merge_at_path, set_path, to_display_string,
        to_number,
    },
    workflow::Step,
};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// Names of every built-in closure
pub const BUILTIN_CLOSURES: [&str; 10] = [
    "assign",
    "respond",
    "log",
    "truthy",
    "equals",
    "greaterThan",
    "lessThan",
    "includes",
    "length",
    "forEach",
];

/// Register every built-in closure into `registry`
pub fn register_builtins(registry: &Registry<ClosureDefinition>) -> Result<(), ConfigurationError> {
    let definitions = [
        ClosureDefinition::from_fn("assign", assign),
        ClosureDefinition::from_fn("respond", respond),
        ClosureDefinition::from_fn("log", log),
        ClosureDefinition::from_fn("truthy", truthy),
        ClosureDefinition::from_fn("equals", equals),
        ClosureDefinition::from_fn("greaterThan", greater_than),
        ClosureDefinition::from_fn("lessThan", less_than),
        ClosureDefinition::from_fn("includes", includes),
        ClosureDefinition::from_fn("length", length),
        ClosureDefinition::new("forEach", ForEach).with_functional_params(["steps"]),
    ];

    for definition in definitions {
        registry.register(definition.name.clone(), Arc::new(definition))?;
    }
    Ok(())
}

/// Write `value` at `path`; with `merge` set, deep-merge into an existing object.
/// Returns what ends up stored at the path.
fn assign(state: &mut Value, ctx: &ClosureContext<'_>) -> Result<Value> {
    let path = ctx
        .param("path")
        .as_str()
        .ok_or_else(|| anyhow!("assign requires a string 'path' parameter"))?;
    let value = ctx.param("value").clone();

    if is_truthy(ctx.param("merge")) {
        merge_at_path(state, path, value)?;
    } else {
        set_path(state, path, value)?;
    }
    Ok(get_path(state, path).cloned().unwrap_or(Value::Null))
}

fn respond(state: &mut Value, ctx: &ClosureContext<'_>) -> Result<Value> {
    let mut envelope = Map::new();
    let status = match ctx.param("status") {
        Value::Null => json!(200),
        status => status.clone(),
    };
    envelope.insert("status".to_string(), status);
    for field in ["headers", "body"] {
        let value = ctx.param(field);
        if !value.is_null() {
            envelope.insert(field.to_string(), value.clone());
        }
    }

    let envelope = Value::Object(envelope);
    set_path(state, "response", envelope.clone())?;
    Ok(envelope)
}

fn log(_state: &mut Value, ctx: &ClosureContext<'_>) -> Result<Value> {
    let message = to_display_string(ctx.param("message"));
    let level = ctx.param("level").as_str().unwrap_or("info");
    match level {
        "trace" => tracing::trace!(target: "ruleway::flow", "{}", message),
        "debug" => tracing::debug!(target: "ruleway::flow", "{}", message),
        "warn" => tracing::warn!(target: "ruleway::flow", "{}", message),
        "error" => tracing::error!(target: "ruleway::flow", "{}", message),
        _ => tracing::info!(target: "ruleway::flow", "{}", message),
    }
    Ok(Value::String(message))
}

fn truthy(_state: &mut Value, ctx: &ClosureContext<'_>) -> Result<Value> {
    Ok(Value::Bool(is_truthy(ctx.param("value"))))
}

fn equals(_state: &mut Value, ctx: &ClosureContext<'_>) -> Result<Value> {
    Ok(Value::Bool(deep_equal(ctx.param("left"), ctx.param("right"))))
}

// NaN on either side makes both comparisons false
fn greater_than(_state: &mut Value, ctx: &ClosureContext<'_>) -> Result<Value> {
    Ok(Value::Bool(to_number(ctx.param("left")) > to_number(ctx.param("right"))))
}

fn less_than(_state: &mut Value, ctx: &ClosureContext<'_>) -> Result<Value> {
    Ok(Value::Bool(to_number(ctx.param("left")) < to_number(ctx.param("right"))))
}

fn includes(_state: &mut Value, ctx: &ClosureContext<'_>) -> Result<Value> {
    let needle = ctx.param("value");
    let found = match ctx.param("collection") {
        Value::Array(items) => items.iter().any(|item| deep_equal(item, needle)),
        Value::String(haystack) => needle.as_str().is_some_and(|n| haystack.contains(n)),
        Value::Object(map) => map.values().any(|item| deep_equal(item, needle)),
        _ => false,
    };
    Ok(Value::Bool(found))
}

fn length(_state: &mut Value, ctx: &ClosureContext<'_>) -> Result<Value> {
    let length = match ctx.param("value") {
        Value::Array(items) => items.len(),
        Value::String(text) => text.chars().count(),
        Value::Object(map) => map.len(),
        _ => 0,
    };
    Ok(json!(length))
}

/// Iterates `collection`, exposing `currentItem` and `currentIndex` in state
/// while `steps` run. Both are removed once the loop ends, whatever happened.
struct ForEach;

#[async_trait]
impl ClosureHandler for ForEach {
    async fn call(&self, state: &mut Value, ctx: ClosureContext<'_>) -> Result<Value> {
        let Value::Array(items) = ctx.param("collection") else {
            return Ok(state.clone());
        };
        let steps: Vec<Step> = match ctx.param("steps") {
            Value::Null => Vec::new(),
            raw => serde_json::from_value(raw.clone())
                .context("forEach 'steps' must be a step sequence")?,
        };
        let engine = ctx.engine("forEach")?;

        let mut outcome: Result<()> = Ok(());
        for (index, item) in items.iter().enumerate() {
            let exposed = set_path(state, "currentItem", item.clone())
                .and_then(|()| set_path(state, "currentIndex", json!(index)));
            if let Err(err) = exposed {
                outcome = Err(err.into());
                break;
            }
            if let Err(err) = engine.run_steps(&steps, state, ctx.runtime).await {
                outcome = Err(err.into());
                break;
            }
        }

        delete_path(state, "currentItem");
        delete_path(state, "currentIndex");
        outcome?;
        Ok(state.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::context::Runtime;

    type Builtin = fn(&mut Value, &ClosureContext<'_>) -> Result<Value>;

    fn call(
        handler: Builtin,
        state: &mut Value,
        params: Value,
    ) -> Result<Value> {
        let runtime = Runtime::new();
        let Value::Object(parameters) = params else { panic!("params must be an object") };
        handler(state, &ClosureContext::new(&runtime, parameters))
    }

    #[test]
    fn test_assign_writes_and_merges() {
        let mut state = json!({"profile": {"name": "a"}});
        let params = json!({"path": "order.total", "value": 150});
        let stored = call(assign, &mut state, params).unwrap();
        assert_eq!(stored, json!(150));

        let params = json!({"path": "profile", "value": {"age": 3}, "merge": true});
        let merged = call(assign, &mut state, params).unwrap();
        assert_eq!(merged, json!({"name": "a", "age": 3}));
        assert_eq!(state["order"]["total"], 150);
    }

    #[test]
    fn test_assign_rejects_runaway_array_index() {
        let mut state = json!({"list": []});
        let params = json!({"path": "list.18446744073709551615", "value": 1});
        let err = call(assign, &mut state, params).unwrap_err();

        assert!(err.downcast_ref::<crate::error::PathError>().is_some(), "{err:#}");
        assert_eq!(state, json!({"list": []}));
    }

    #[test]
    fn test_assign_requires_path() {
        let mut state = json!({});
        assert!(call(assign, &mut state, json!({"value": 1})).is_err());
    }

    #[test]
    fn test_respond_envelope_omits_absent_fields() {
        let mut state = json!({});
        call(respond, &mut state, json!({"status": 202, "body": {"status": "queued"}})).unwrap();
        assert_eq!(state["response"], json!({"status": 202, "body": {"status": "queued"}}));

        call(respond, &mut state, json!({"headers": {"x-id": "1"}})).unwrap();
        assert_eq!(state["response"], json!({"status": 200, "headers": {"x-id": "1"}}));
    }

    #[test]
    fn test_comparisons_coerce_and_never_fail_on_nan() {
        let mut state = json!({});
        let mut compare =
            |handler: Builtin, params: Value| call(handler, &mut state, params).unwrap();
        assert_eq!(compare(greater_than, json!({"left": "150", "right": 100})), json!(true));
        assert_eq!(compare(less_than, json!({"left": 1, "right": "2"})), json!(true));
        assert_eq!(compare(greater_than, json!({"left": "abc", "right": 1})), json!(false));
        assert_eq!(compare(less_than, json!({"left": "abc", "right": 1})), json!(false));
        assert_eq!(compare(less_than, json!({"right": 1})), json!(false));
        assert_eq!(compare(greater_than, json!({"left": null, "right": -1})), json!(false));
        assert_eq!(compare(less_than, json!({"left": null, "right": 1})), json!(false));
    }

    #[test]
    fn test_equals_is_structural() {
        let mut state = json!({});
        let params = json!({"left": {"a": [1, 2]}, "right": {"a": [1, 2]}});
        assert_eq!(call(equals, &mut state, params).unwrap(), json!(true));
        let params = json!({"left": 1, "right": "1"});
        assert_eq!(call(equals, &mut state, params).unwrap(), json!(false));
    }

    #[test]
    fn test_includes_variants() {
        let mut state = json!({});
        let cases = [
            (json!({"collection": [{"id": 1}, {"id": 2}], "value": {"id": 2}}), true),
            (json!({"collection": "hello world", "value": "lo w"}), true),
            (json!({"collection": "123", "value": 2}), false),
            (json!({"collection": {"a": "x", "b": "y"}, "value": "y"}), true),
            (json!({"collection": {"a": "x"}, "value": "a"}), false),
            (json!({"collection": 5, "value": 5}), false),
        ];
        for (params, expected) in cases {
            let found = call(includes, &mut state, params.clone()).unwrap();
            assert_eq!(found, json!(expected), "{params}");
        }
    }

    #[test]
    fn test_length_variants() {
        let mut state = json!({});
        assert_eq!(call(length, &mut state, json!({"value": [1, 2, 3]})).unwrap(), json!(3));
        assert_eq!(call(length, &mut state, json!({"value": "héllo"})).unwrap(), json!(5));
        assert_eq!(call(length, &mut state, json!({"value": {"a": 1}})).unwrap(), json!(1));
        assert_eq!(call(length, &mut state, json!({"value": 42})).unwrap(), json!(0));
    }

    #[test]
    fn test_truthy_and_log() {
        let mut state = json!({});
        assert_eq!(call(truthy, &mut state, json!({"value": [1]})).unwrap(), json!(true));
        assert_eq!(call(truthy, &mut state, json!({})).unwrap(), json!(false));
        let params = json!({"message": "hi", "level": "debug"});
        assert_eq!(call(log, &mut state, params).unwrap(), json!("hi"));
    }

    #[tokio::test]
    async fn test_for_each_non_array_is_noop() {
        let runtime = Runtime::new();
        let mut state = json!({"keep": 1});
        let Value::Object(parameters) = json!({"collection": "nope", "steps": []}) else {
            unreachable!()
        };
        let result = ForEach
            .call(&mut state, ClosureContext::new(&runtime, parameters))
            .await
            .unwrap();
        assert_eq!(result, json!({"keep": 1}));
        assert_eq!(state, json!({"keep": 1}));
    }

    #[tokio::test]
    async fn test_for_each_without_engine_fails() {
        let runtime = Runtime::new();
        let mut state = json!({});
        let Value::Object(parameters) = json!({"collection": [1], "steps": []}) else {
            unreachable!()
        };
        let err = ForEach
            .call(&mut state, ClosureContext::new(&runtime, parameters))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigurationError>(),
            Some(ConfigurationError::MissingEngineReference(_))
        ));
    }
}
