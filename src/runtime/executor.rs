//! Step interpreter
//!
//! Runs step sequences against one run's state, strictly in order, awaiting
//! each step (and any nested steps it triggers) before starting the next:
//! - Invoke: check `when`, resolve parameters, call the closure, optionally assign
//! - Branch: first case whose condition holds runs, else `otherwise`
//!
//! Nested sequences (branch arms, `forEach` bodies, flow closures) share the
//! caller's state and runtime, and every executed step at any depth replaces
//! the run's last result.

use crate::{
    closures::ClosureContext,
    error::EngineError,
    runtime::{context::Runtime, engine::Engine},
    template::TemplateScope,
    value::{is_truthy, merge_at_path, set_path},
    workflow::{BranchStep, Condition, InvokeStep, Step},
};
use futures::future::BoxFuture;
use serde_json::{Map, Value};

impl Engine {
    /// Execute `steps` in order against `state`.
    ///
    /// Returns the result of the last step executed at any nesting depth, or
    /// `None` when every step was skipped. This is also how closures recurse:
    /// they call it with the engine handle found in `runtime`.
    pub fn run_steps<'a>(
        &'a self,
        steps: &'a [Step],
        state: &'a mut Value,
        runtime: &'a Runtime,
    ) -> BoxFuture<'a, Result<Option<Value>, EngineError>> {
        Box::pin(async move {
            let mut last_result = None;

            for (position, step) in steps.iter().enumerate() {
                if runtime.cancellation().is_cancelled() {
                    tracing::warn!("⏸️ Run cancelled before step {}", position + 1);
                    return Err(EngineError::Cancelled);
                }

                let outcome = match step {
                    Step::Invoke(invoke) => self.run_invoke(invoke, state, runtime).await?,
                    Step::Branch(branch) => self.run_branch(branch, state, runtime).await?,
                };
                if outcome.is_some() {
                    last_result = outcome;
                }
            }

            Ok(last_result)
        })
    }

    async fn run_invoke(
        &self,
        step: &InvokeStep,
        state: &mut Value,
        runtime: &Runtime,
    ) -> Result<Option<Value>, EngineError> {
        if let Some(when) = &step.when {
            if !self.conditions_hold(when.conditions(), state, runtime).await? {
                tracing::debug!("⏭️ Skipping '{}' - conditions not met", step.closure);
                return Ok(None);
            }
        }

        let result = self
            .call_closure(&step.closure, &step.parameters, state, runtime)
            .await?;

        if let Some(path) = &step.assign {
            let written = if step.merge_result {
                merge_at_path(state, path, result.clone())
            } else {
                set_path(state, path, result.clone())
            };
            written.map_err(|e| EngineError::from_closure(&step.closure, e.into()))?;
            tracing::debug!("📝 Assigned result of '{}' to '{}'", step.closure, path);
        }

        Ok(Some(result))
    }

    async fn run_branch(
        &self,
        step: &BranchStep,
        state: &mut Value,
        runtime: &Runtime,
    ) -> Result<Option<Value>, EngineError> {
        for (index, case) in step.cases.iter().enumerate() {
            if self.evaluate_condition(&case.when, state, runtime).await? {
                tracing::debug!("🔀 Branch case {} matched", index);
                return self.run_steps(&case.steps, state, runtime).await;
            }
        }

        match &step.otherwise {
            Some(steps) => {
                tracing::debug!("🔀 No branch case matched, running otherwise");
                self.run_steps(steps, state, runtime).await
            }
            None => Ok(None),
        }
    }

    /// AND over `conditions`, stopping at the first false one
    async fn conditions_hold(
        &self,
        conditions: &[Condition],
        state: &mut Value,
        runtime: &Runtime,
    ) -> Result<bool, EngineError> {
        for condition in conditions {
            if !self.evaluate_condition(condition, state, runtime).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn evaluate_condition(
        &self,
        condition: &Condition,
        state: &mut Value,
        runtime: &Runtime,
    ) -> Result<bool, EngineError> {
        let result = self
            .call_closure(&condition.closure, &condition.parameters, state, runtime)
            .await?;
        Ok(is_truthy(&result) != condition.negate)
    }

    /// Resolve parameters (skipping functional ones) and invoke the closure,
    /// racing it against the run's cancellation token.
    async fn call_closure(
        &self,
        name: &str,
        parameters: &Map<String, Value>,
        state: &mut Value,
        runtime: &Runtime,
    ) -> Result<Value, EngineError> {
        let closure = self.closure(name)?;
        let resolved = TemplateScope::new(state, runtime.values(), parameters)
            .resolve_parameters(parameters, &closure.functional_params);

        tracing::debug!("⚙️ Invoking closure '{}'", name);
        let ctx = ClosureContext::new(runtime, resolved);

        tokio::select! {
            biased;
            _ = runtime.cancellation().cancelled() => Err(EngineError::Cancelled),
            outcome = closure.handler.call(state, ctx) => {
                outcome.map_err(|e| EngineError::from_closure(name, e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{Condition, InvokeStep};
    use serde_json::json;

    fn runtime_for(engine: &Engine) -> Runtime {
        Runtime::new().with_engine(engine.clone())
    }

    #[tokio::test]
    async fn test_skipped_steps_do_not_touch_last_result() {
        let engine = Engine::new();
        let steps: Vec<Step> = vec![
            InvokeStep::new("assign")
                .param("path", json!("a"))
                .param("value", json!(1))
                .into(),
            InvokeStep::new("assign")
                .param("path", json!("b"))
                .param("value", json!(2))
                .when(Condition::new("truthy").param("value", json!("${missing}")))
                .into(),
        ];
        let mut state = json!({});
        let last = engine.run_steps(&steps, &mut state, &runtime_for(&engine)).await.unwrap();

        assert_eq!(last, Some(json!(1)));
        assert_eq!(state, json!({"a": 1}));
    }

    #[tokio::test]
    async fn test_negated_and_multiple_conditions() {
        let engine = Engine::new();
        let gated: Step = InvokeStep::new("assign")
            .param("path", json!("ran"))
            .param("value", json!(true))
            .when(Condition::new("truthy").param("value", json!("${flag}")))
            .when(Condition::new("truthy").param("value", json!("${blocked}")).negated())
            .into();

        let steps = std::slice::from_ref(&gated);
        let runtime = runtime_for(&engine);

        let mut state = json!({"flag": 1});
        engine.run_steps(steps, &mut state, &runtime).await.unwrap();
        assert_eq!(state["ran"], json!(true));

        let mut state = json!({"flag": 1, "blocked": "yes"});
        let last = engine.run_steps(steps, &mut state, &runtime).await.unwrap();
        assert_eq!(last, None);
        assert!(state.get("ran").is_none());
    }

    #[tokio::test]
    async fn test_empty_sequence_yields_none() {
        let engine = Engine::new();
        let mut state = json!({"x": 1});
        let last = engine.run_steps(&[], &mut state, &Runtime::new()).await.unwrap();
        assert_eq!(last, None);
        assert_eq!(state, json!({"x": 1}));
    }

    #[tokio::test]
    async fn test_cancelled_runtime_stops_before_first_step() {
        let engine = Engine::new();
        let runtime = runtime_for(&engine);
        runtime.cancellation().cancel();

        let steps: Vec<Step> =
            vec![InvokeStep::new("log").param("message", json!("never")).into()];
        let mut state = json!({});
        let err = engine.run_steps(&steps, &mut state, &runtime).await.unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
    }

    #[tokio::test]
    async fn test_oversized_assign_index_fails_the_run() {
        let engine = Engine::new();
        let steps: Vec<Step> = vec![InvokeStep::new("length")
            .param("value", json!("abc"))
            .assign("list.20000")
            .into()];
        let mut state = json!({"list": []});

        let err = engine
            .run_steps(&steps, &mut state, &runtime_for(&engine))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::ClosureExecution { ref closure, .. } if closure == "length"
        ));
        assert_eq!(state, json!({"list": []}));
    }
}
