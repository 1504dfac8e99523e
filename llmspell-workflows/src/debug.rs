//! ABOUTME: Serial debug driver (component I)
//! ABOUTME: Linearises a parallel_foreach into one deterministic, interleaved step stream

use crate::definition::{StepDescriptor, SubAgentTaskTemplate};
use crate::error::WorkflowError;
use crate::processors::{self, StepOutcome};
use crate::queue::{self, QueueEvent, WorkflowQueue};
use crate::state::{StateManager, StateSnapshot};
use crate::subagent;
use crate::value::Value;

/// Name of the environment variable that selects the serial debug driver
/// (spec §6). Read once at engine construction — never re-read mid-run,
/// so a running engine's mode is stable even if the environment changes.
pub const DEBUG_ENV_VAR: &str = "AROMCP_WORKFLOW_DEBUG";
pub const DEBUG_ENV_VALUE: &str = "serial";

pub fn debug_mode_from_env() -> bool {
    std::env::var(DEBUG_ENV_VAR)
        .map(|v| v == DEBUG_ENV_VALUE)
        .unwrap_or(false)
}

const MAX_FLATTEN_DRAIN_STEPS: usize = 10_000;

/// Eagerly drain one item's sub-agent body down to its actionable leaves
/// (`mcp_call`/`user_message`), evaluating conditionals/loops/state_update
/// against that item's own freshly initialised state exactly as if it
/// were running live (spec §4.8 point 3).
fn drain_to_leaves(state: &mut StateManager, queue: &mut WorkflowQueue) -> Result<Vec<StepDescriptor>, WorkflowError> {
    let mut leaves = Vec::new();
    let mut budget = 0usize;
    loop {
        budget += 1;
        if budget > MAX_FLATTEN_DRAIN_STEPS {
            return Err(WorkflowError::ServerDrainBudgetExhausted(budget));
        }
        match queue.pop_next() {
            QueueEvent::Step(step) if step.kind == "user_message" || step.kind == "mcp_call" => {
                leaves.push(step);
            }
            QueueEvent::Step(step) => match processors::process_step(&step, state, queue)? {
                StepOutcome::Continue => {}
                StepOutcome::Client(_) => {
                    unreachable!("user_message/mcp_call are intercepted above")
                }
                StepOutcome::ParallelForeach { .. } => {
                    return Err(WorkflowError::SubAgentFailed(format!(
                        "nested parallel_foreach is not supported inside a flattened sub-agent task ('{}')",
                        step.id
                    )));
                }
            },
            QueueEvent::FrameExhausted(kind) => {
                processors::resume_reentrant_frame(kind, state, queue)?;
            }
            QueueEvent::Empty => break,
        }
    }
    Ok(leaves)
}

/// Build the flattened, marker-interleaved step list for a whole
/// `parallel_foreach`, ready to push as a single frame onto the parent's
/// own queue. This is computed eagerly from each item's initial state; a
/// client's `update_state`/`submit_step_result` calls made while the
/// flattened run is in progress do not feed back into later branch
/// decisions within the same item (documented simplification, see
/// DESIGN.md).
pub fn expand(
    task_name: &str,
    items: &[Value],
    parent: &StateSnapshot,
    template: &SubAgentTaskTemplate,
) -> Result<Vec<StepDescriptor>, WorkflowError> {
    let mut flattened = Vec::new();
    let total = items.len();
    for (index, item) in items.iter().enumerate() {
        let task_id = format!("{task_name}.item{index}");
        let (mut state, mut body_queue) = subagent::build_item_state_and_queue(&task_id, template, item, parent)?;
        let leaves = drain_to_leaves(&mut state, &mut body_queue)?;
        for (j, leaf) in leaves.iter().enumerate() {
            if j > 0 {
                flattened.push(StepDescriptor::new(
                    format!("{task_id}.advance{j}"),
                    "debug_step_advance",
                    serde_json::json!({}),
                ));
            }
            flattened.push(StepDescriptor::new(
                queue::composite_step_id(&task_id, &leaf.id),
                leaf.kind.clone(),
                processors::strip_internal(leaf.params.clone()),
            ));
        }
        if index + 1 < total {
            flattened.push(StepDescriptor::new(
                format!("{task_id}.complete"),
                "debug_task_completion",
                serde_json::json!({
                    "task_id": task_id,
                    "total_tasks": total,
                    "completed_task_index": index,
                }),
            ));
        }
    }
    Ok(flattened)
}
