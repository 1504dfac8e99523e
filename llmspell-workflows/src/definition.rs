//! ABOUTME: Static workflow definition data model (spec §3, plus the
//! ABOUTME: description/version fields recovered from original_source)

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::HashMap;

/// A single input declared by a workflow or sub-agent task, with its
/// expected kind and whether the caller must supply it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputDefinition {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Json>,
    /// Binding source for a sub-agent task input: `"item"`, `"inputs.X"`,
    /// or `"state.X"` against the *parent's* tiers. Absent for a workflow's
    /// own top-level inputs (those come from the `start` caller directly).
    #[serde(default)]
    pub from: Option<String>,
}

/// What to do when a transform's `expression` fails to evaluate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnErrorPolicy {
    UseFallback,
    Propagate,
}

/// One entry of the computed-tier transform DAG (component B).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformDescriptor {
    /// Field name under `computed.*` this transform populates.
    pub field: String,
    /// One or more dotted paths this transform reads from. A single path
    /// binds as `input`; more than one binds as `inputs` (a list), per the
    /// worked example in spec §3.
    pub from: FromPaths,
    pub expression: String,
    /// `"use_fallback"` or `"propagate"`; absent is treated as `propagate`.
    #[serde(default)]
    pub on_error: Option<OnErrorPolicy>,
    /// The value substituted in when `on_error` is `use_fallback`.
    #[serde(default)]
    pub fallback: Option<Json>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FromPaths {
    Single(String),
    Many(Vec<String>),
}

impl FromPaths {
    pub fn as_slice(&self) -> Vec<&str> {
        match self {
            FromPaths::Single(s) => vec![s.as_str()],
            FromPaths::Many(v) => v.iter().map(|s| s.as_str()).collect(),
        }
    }
}

/// A single step in a workflow's (or sub-agent task's) step list. `kind`
/// dispatches to the registry (component D); `params` is the kind-specific
/// payload, validated lazily by the matching processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDescriptor {
    pub id: String,
    pub kind: String,
    #[serde(default)]
    pub params: Json,
    #[serde(default)]
    pub steps: Vec<StepDescriptor>,
    #[serde(default)]
    pub else_steps: Vec<StepDescriptor>,
}

impl StepDescriptor {
    pub fn new(id: impl Into<String>, kind: impl Into<String>, params: Json) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            params,
            steps: Vec::new(),
            else_steps: Vec::new(),
        }
    }

    pub fn with_nested(mut self, steps: Vec<StepDescriptor>) -> Self {
        self.steps = steps;
        self
    }

    pub fn with_else(mut self, else_steps: Vec<StepDescriptor>) -> Self {
        self.else_steps = else_steps;
        self
    }
}

/// A reusable, named procedure a `parallel_foreach` step spawns once per
/// input item (component H).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubAgentTaskTemplate {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub inputs: HashMap<String, InputDefinition>,
    #[serde(default)]
    pub state_defaults: HashMap<String, Json>,
    #[serde(default)]
    pub computed: Vec<TransformDescriptor>,
    pub steps: Vec<StepDescriptor>,
}

/// The full static definition of one workflow, as loaded at registration
/// time. Immutable for the lifetime of every instance spawned from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub inputs: HashMap<String, InputDefinition>,
    #[serde(default)]
    pub state_defaults: HashMap<String, Json>,
    #[serde(default)]
    pub computed: Vec<TransformDescriptor>,
    pub steps: Vec<StepDescriptor>,
    #[serde(default)]
    pub sub_agent_tasks: HashMap<String, SubAgentTaskTemplate>,
}

impl WorkflowDefinition {
    /// Look up a named sub-agent task template, surfacing the same error
    /// code a missing `parallel_foreach.task` reference produces at
    /// runtime (component H / spec §7 `UnknownSubAgentTask`).
    pub fn sub_agent_task(&self, name: &str) -> Option<&SubAgentTaskTemplate> {
        self.sub_agent_tasks.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_paths_single_vs_many() {
        let single = FromPaths::Single("inputs.items".to_string());
        assert_eq!(single.as_slice(), vec!["inputs.items"]);
        let many = FromPaths::Many(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(many.as_slice(), vec!["a", "b"]);
    }

    #[test]
    fn deserialize_minimal_definition() {
        let json = serde_json::json!({
            "name": "demo",
            "steps": [
                {"id": "s1", "kind": "user_message", "params": {"message": "hi"}}
            ]
        });
        let def: WorkflowDefinition = serde_json::from_value(json).unwrap();
        assert_eq!(def.name, "demo");
        assert_eq!(def.steps.len(), 1);
        assert!(def.computed.is_empty());
    }
}
