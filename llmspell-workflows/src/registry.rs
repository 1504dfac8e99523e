//! ABOUTME: Step kind registry (component D)
//! ABOUTME: Maps each step `kind` string to its queuing/execution metadata and validates params eagerly

use crate::error::WorkflowError;
use serde_json::Value as Json;

/// Who executes a step once it reaches the front of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Execution {
    /// The engine itself resolves the step without a round-trip to the agent.
    Server,
    /// The step is handed to the agent and waits for `update_state`/`submit_step_result`.
    Agent,
}

/// Whether a step can be batched with its neighbor in `get_next_step`'s response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Queuing {
    /// Resolved immediately server-side; never returned to the agent on its own.
    Immediate,
    /// Returned to the agent; only adjacent `user_message` steps may batch together.
    Batchable,
    /// Returned to the agent one at a time.
    Single,
}

#[derive(Debug, Clone)]
pub struct StepRegistration {
    pub kind: &'static str,
    pub execution: Execution,
    pub queuing: Queuing,
    pub required_fields: &'static [&'static str],
}

/// The fixed set of step kinds the engine understands (component D / spec
/// §4.3). `debug_task_completion` and `debug_step_advance` are server-side
/// markers the serial debug driver injects (component I); they are never
/// authored directly in a workflow definition but are registered here so
/// the same validation and dispatch path handles them.
pub const REGISTRY: &[StepRegistration] = &[
    StepRegistration {
        kind: "user_message",
        execution: Execution::Agent,
        queuing: Queuing::Batchable,
        required_fields: &["message"],
    },
    StepRegistration {
        kind: "mcp_call",
        execution: Execution::Agent,
        queuing: Queuing::Single,
        required_fields: &["tool"],
    },
    StepRegistration {
        kind: "state_update",
        execution: Execution::Server,
        queuing: Queuing::Immediate,
        // Either 'value' (literal) or 'expression' (evaluated) supplies the
        // write; process_state_update enforces that pairing, since the
        // registry only checks flat field presence, not either/or.
        required_fields: &["path"],
    },
    StepRegistration {
        kind: "conditional",
        execution: Execution::Server,
        queuing: Queuing::Immediate,
        required_fields: &["condition"],
    },
    StepRegistration {
        kind: "while_loop",
        execution: Execution::Server,
        queuing: Queuing::Immediate,
        required_fields: &["condition"],
    },
    StepRegistration {
        kind: "foreach",
        execution: Execution::Server,
        queuing: Queuing::Immediate,
        required_fields: &["items"],
    },
    StepRegistration {
        kind: "parallel_foreach",
        execution: Execution::Server,
        queuing: Queuing::Immediate,
        required_fields: &["items", "sub_agent_task"],
    },
    StepRegistration {
        kind: "debug_step_advance",
        execution: Execution::Server,
        queuing: Queuing::Immediate,
        required_fields: &[],
    },
    StepRegistration {
        kind: "debug_task_completion",
        execution: Execution::Server,
        queuing: Queuing::Immediate,
        required_fields: &["task_id", "total_tasks", "completed_task_index"],
    },
];

pub fn lookup(kind: &str) -> Result<&'static StepRegistration, WorkflowError> {
    REGISTRY
        .iter()
        .find(|r| r.kind == kind)
        .ok_or_else(|| WorkflowError::UnknownStepKind(kind.to_string()))
}

/// Validate that a step's `params` object carries every field its kind
/// requires. Called at workflow load time so malformed steps fail fast
/// (spec §4.9: definition errors are instance-fatal at spawn).
pub fn validate_params(step_id: &str, kind: &str, params: &Json) -> Result<(), WorkflowError> {
    let registration = lookup(kind)?;
    let obj = params.as_object();
    for field in registration.required_fields {
        let present = obj.map(|o| o.contains_key(*field)).unwrap_or(false);
        if !present {
            return Err(WorkflowError::MalformedStep {
                step: step_id.to_string(),
                message: format!("missing required field '{field}' for step kind '{kind}'"),
            });
        }
    }
    Ok(())
}
