//! ABOUTME: Test fixtures and drive-to-completion helpers for workflow testing
//! ABOUTME: Sample WorkflowDefinition builders for the scenarios worked through in the test suite

use crate::definition::{InputDefinition, StepDescriptor, SubAgentTaskTemplate, WorkflowDefinition};
use crate::executor::{GetNextStepResponse, WorkflowEngine};
use crate::processors::ClientStep;
use serde_json::{json, Map, Value as Json};
use std::collections::HashMap;

/// A workflow with no steps at all: completes on the first `get_next_step`.
pub fn sample_empty_workflow() -> WorkflowDefinition {
    WorkflowDefinition {
        name: "empty".to_string(),
        description: None,
        version: None,
        inputs: HashMap::new(),
        state_defaults: HashMap::new(),
        computed: Vec::new(),
        steps: Vec::new(),
        sub_agent_tasks: HashMap::new(),
    }
}

/// One `user_message` step followed by one `mcp_call` step, sequentially.
pub fn sample_linear_workflow() -> WorkflowDefinition {
    WorkflowDefinition {
        name: "linear".to_string(),
        description: None,
        version: None,
        inputs: HashMap::new(),
        state_defaults: HashMap::new(),
        computed: Vec::new(),
        steps: vec![
            StepDescriptor::new("greet", "user_message", json!({"message": "Starting up."})),
            StepDescriptor::new("call", "mcp_call", json!({"tool": "run_linter", "args": {}})),
        ],
        sub_agent_tasks: HashMap::new(),
    }
}

/// A `conditional` gated on `inputs.flag`, with distinct then/else leaves.
pub fn sample_conditional_workflow() -> WorkflowDefinition {
    WorkflowDefinition {
        name: "conditional".to_string(),
        description: None,
        version: None,
        inputs: HashMap::from([(
            "flag".to_string(),
            InputDefinition {
                kind: "boolean".to_string(),
                description: None,
                required: false,
                default: Some(json!(false)),
                from: None,
            },
        )]),
        state_defaults: HashMap::new(),
        computed: Vec::new(),
        steps: vec![StepDescriptor::new("branch", "conditional", json!({"condition": "inputs.flag"}))
            .with_nested(vec![StepDescriptor::new("yes", "user_message", json!({"message": "flag was set"}))])
            .with_else(vec![StepDescriptor::new("no", "user_message", json!({"message": "flag was unset"}))])],
        sub_agent_tasks: HashMap::new(),
    }
}

/// A `while_loop` counting `state.count` up to `inputs.limit`, incrementing
/// via a nested `state_update` each iteration.
pub fn sample_loop_workflow() -> WorkflowDefinition {
    WorkflowDefinition {
        name: "counter".to_string(),
        description: None,
        version: None,
        inputs: HashMap::from([(
            "limit".to_string(),
            InputDefinition {
                kind: "integer".to_string(),
                description: None,
                required: false,
                default: Some(json!(3)),
                from: None,
            },
        )]),
        state_defaults: HashMap::from([("count".to_string(), json!(0))]),
        computed: Vec::new(),
        steps: vec![StepDescriptor::new(
            "loop",
            "while_loop",
            json!({"condition": "state.count < inputs.limit", "max_iterations": 10}),
        )
        .with_nested(vec![
            StepDescriptor::new("tick", "user_message", json!({"message": "tick {{state.count}}"})),
            StepDescriptor::new(
                "incr",
                "state_update",
                json!({"path": "state.count", "expression": "state.count + 1"}),
            ),
        ])],
        sub_agent_tasks: HashMap::new(),
    }
}

/// A `foreach` over `inputs.items`, surfacing one `user_message` per item.
pub fn sample_foreach_workflow() -> WorkflowDefinition {
    WorkflowDefinition {
        name: "foreach_demo".to_string(),
        description: None,
        version: None,
        inputs: HashMap::from([(
            "items".to_string(),
            InputDefinition {
                kind: "array".to_string(),
                description: None,
                required: true,
                default: None,
                from: None,
            },
        )]),
        state_defaults: HashMap::new(),
        computed: Vec::new(),
        steps: vec![StepDescriptor::new("fe", "foreach", json!({"items": "inputs.items"})).with_nested(vec![
            StepDescriptor::new("visit", "user_message", json!({"message": "visiting {{item}} ({{index}}/{{total}})"})),
        ])],
        sub_agent_tasks: HashMap::new(),
    }
}

/// A `parallel_foreach` fanning `inputs.files` out to a one-step sub-agent
/// task (`enforce`), matching the worked example in the spec's sub-agent
/// coordinator section.
pub fn sample_parallel_foreach_workflow() -> WorkflowDefinition {
    let mut sub_agent_tasks = HashMap::new();
    sub_agent_tasks.insert(
        "enforce".to_string(),
        SubAgentTaskTemplate {
            name: "enforce".to_string(),
            description: Some("Run the linter against one file.".to_string()),
            inputs: HashMap::from([(
                "file_path".to_string(),
                InputDefinition {
                    kind: "string".to_string(),
                    description: None,
                    required: true,
                    default: None,
                    from: None,
                },
            )]),
            state_defaults: HashMap::new(),
            computed: Vec::new(),
            steps: vec![StepDescriptor::new(
                "lint",
                "mcp_call",
                json!({"tool": "run_linter", "args": {"path": "{{inputs.file_path}}"}}),
            )],
        },
    );
    WorkflowDefinition {
        name: "lint_fanout".to_string(),
        description: None,
        version: None,
        inputs: HashMap::from([(
            "files".to_string(),
            InputDefinition {
                kind: "array".to_string(),
                description: None,
                required: true,
                default: None,
                from: None,
            },
        )]),
        state_defaults: HashMap::new(),
        computed: Vec::new(),
        steps: vec![StepDescriptor::new(
            "pf",
            "parallel_foreach",
            json!({"items": "inputs.files", "sub_agent_task": "enforce"}),
        )],
        sub_agent_tasks,
    }
}

/// Drive `workflow_id` via `get_next_step` until it surfaces no more steps,
/// collecting every client-visible step along the way. `respond` is called
/// once per returned batch and may call `update_state`/`submit_step_result`
/// on the engine before the next `get_next_step`; it should return `true` to
/// keep driving or `false` to stop early.
pub async fn drive_to_completion(
    engine: &WorkflowEngine,
    workflow_id: &str,
    mut respond: impl FnMut(&[ClientStep]) -> bool,
) -> Vec<ClientStep> {
    let mut collected = Vec::new();
    loop {
        match engine.get_next_step(workflow_id).await {
            Ok(GetNextStepResponse::Steps(steps)) if steps.is_empty() => break,
            Ok(GetNextStepResponse::Steps(steps)) => {
                let keep_going = respond(&steps);
                collected.extend(steps);
                if !keep_going {
                    break;
                }
            }
            Ok(GetNextStepResponse::Error(_)) => break,
            Err(_) => break,
        }
    }
    collected
}

/// Start `name` with `inputs` against a freshly built, non-debug engine
/// carrying only `name`'s definition, returning the engine and instance ID.
pub async fn start_standalone(name: &str, definition: WorkflowDefinition, inputs: Map<String, Json>) -> (WorkflowEngine, String) {
    let engine = WorkflowEngine::with_debug_mode(false);
    engine.register(definition).await.unwrap();
    let (id, _) = engine.start(name, inputs).await.unwrap();
    (engine, id)
}
