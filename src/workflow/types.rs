//! Flow definition types
//!
//! Defines flows, steps and conditions in the JSON shape hosts load them
//! from. A flow is an ordered list of steps; a step either invokes a closure
//! or branches over conditional cases.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A named, ordered sequence of steps
///
/// Flows are immutable once registered with the engine and are looked up by
/// `name` when `execute` is called.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowDefinition {
    /// Unique flow name (e.g., "create-order")
    pub name: String,
    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Steps executed in declaration order
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl FlowDefinition {
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            description: None,
            steps,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A single node of a flow, tagged by `type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Step {
    /// Call a closure, optionally gated by conditions
    /// Shape: { "type": "invoke", "closure": "assign", "parameters": {...},
    ///          "assign": "order", "mergeResult": true, "when": {...} }
    Invoke(InvokeStep),

    /// First matching case wins, `otherwise` runs when none match
    /// Shape: { "type": "branch", "cases": [{ "when": {...}, "steps": [...] }],
    ///          "otherwise": [...] }
    Branch(BranchStep),
}

impl From<InvokeStep> for Step {
    fn from(step: InvokeStep) -> Self {
        Step::Invoke(step)
    }
}

impl From<BranchStep> for Step {
    fn from(step: BranchStep) -> Self {
        Step::Branch(step)
    }
}

/// Closure invocation step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeStep {
    /// Registered closure name
    pub closure: String,
    /// Parameters, template-resolved before the call except functional ones
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub parameters: Map<String, Value>,
    /// State path that receives the closure result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assign: Option<String>,
    /// Deep-merge the result into an existing object at `assign` instead of overwriting
    #[serde(default)]
    pub merge_result: bool,
    /// Gate: every condition must hold or the step is skipped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<When>,
}

impl InvokeStep {
    pub fn new(closure: impl Into<String>) -> Self {
        Self {
            closure: closure.into(),
            parameters: Map::new(),
            assign: None,
            merge_result: false,
            when: None,
        }
    }

    pub fn param(mut self, name: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }

    pub fn assign(mut self, path: impl Into<String>) -> Self {
        self.assign = Some(path.into());
        self
    }

    pub fn merge_result(mut self) -> Self {
        self.merge_result = true;
        self
    }

    /// Add a gating condition; several calls accumulate into an AND list.
    pub fn when(mut self, condition: Condition) -> Self {
        self.when = Some(match self.when.take() {
            None => When::One(condition),
            Some(When::One(first)) => When::All(vec![first, condition]),
            Some(When::All(mut all)) => {
                all.push(condition);
                When::All(all)
            }
        });
        self
    }
}

/// One condition or a list of conditions that must all hold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum When {
    One(Condition),
    All(Vec<Condition>),
}

impl When {
    pub fn conditions(&self) -> &[Condition] {
        match self {
            When::One(condition) => std::slice::from_ref(condition),
            When::All(conditions) => conditions,
        }
    }
}

/// Closure call whose result is read as a boolean
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub closure: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub parameters: Map<String, Value>,
    /// Flip the truthiness of the result
    #[serde(default)]
    pub negate: bool,
}

impl Condition {
    pub fn new(closure: impl Into<String>) -> Self {
        Self {
            closure: closure.into(),
            parameters: Map::new(),
            negate: false,
        }
    }

    pub fn param(mut self, name: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }

    pub fn negated(mut self) -> Self {
        self.negate = !self.negate;
        self
    }
}

/// Ordered if / else-if / else
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchStep {
    pub cases: Vec<BranchCase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otherwise: Option<Vec<Step>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchCase {
    pub when: Condition,
    pub steps: Vec<Step>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_invoke_step() {
        let step: Step = serde_json::from_value(json!({
            "type": "invoke",
            "closure": "assign",
            "parameters": {"path": "order.total", "value": "${state.request.body.total}"},
            "assign": "lastAssigned",
            "mergeResult": true,
            "when": {"closure": "truthy", "parameters": {"value": "${request}"}, "negate": true}
        }))
        .unwrap();

        let Step::Invoke(invoke) = step else { panic!("expected invoke step") };
        assert_eq!(invoke.closure, "assign");
        assert_eq!(invoke.assign.as_deref(), Some("lastAssigned"));
        assert!(invoke.merge_result);
        let conditions = invoke.when.as_ref().unwrap().conditions();
        assert_eq!(conditions.len(), 1);
        assert!(conditions[0].negate);
    }

    #[test]
    fn test_when_accepts_a_list() {
        let step: InvokeStep = serde_json::from_value(json!({
            "closure": "log",
            "when": [
                {"closure": "truthy"},
                {"closure": "equals", "parameters": {"left": 1, "right": 1}}
            ]
        }))
        .unwrap();
        assert_eq!(step.when.unwrap().conditions().len(), 2);
    }

    #[test]
    fn test_deserialize_branch_step() {
        let flow: FlowDefinition = serde_json::from_value(json!({
            "name": "route",
            "steps": [{
                "type": "branch",
                "cases": [
                    {
                        "when": {"closure": "truthy", "parameters": {"value": true}},
                        "steps": [
                            {"type": "invoke", "closure": "log", "parameters": {"message": "hi"}}
                        ]
                    }
                ],
                "otherwise": []
            }]
        }))
        .unwrap();

        let Step::Branch(branch) = &flow.steps[0] else { panic!("expected branch step") };
        assert_eq!(branch.cases.len(), 1);
        assert_eq!(branch.cases[0].steps.len(), 1);
        assert_eq!(branch.otherwise, Some(vec![]));
        assert!(flow.description.is_none());
    }

    #[test]
    fn test_builder_matches_wire_shape() {
        let built: Step = InvokeStep::new("assign")
            .param("path", json!("a"))
            .param("value", json!(1))
            .when(Condition::new("truthy").param("value", json!("${flag}")))
            .into();
        let parsed: Step = serde_json::from_value(json!({
            "type": "invoke",
            "closure": "assign",
            "parameters": {"path": "a", "value": 1},
            "when": {"closure": "truthy", "parameters": {"value": "${flag}"}}
        }))
        .unwrap();
        assert_eq!(built, parsed);
    }

    #[test]
    fn test_unknown_step_type_rejected() {
        let result = serde_json::from_value::<Step>(json!({"type": "loop", "closure": "x"}));
        assert!(result.is_err());
    }
}
