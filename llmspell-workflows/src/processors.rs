//! ABOUTME: Per-step-kind processors (component E)
//! ABOUTME: Folds one step descriptor into effects on the state manager and the queue

use crate::definition::StepDescriptor;
use crate::error::WorkflowError;
use crate::expr::{self, Scope};
use crate::queue::{Frame, FrameKind, WorkflowQueue};
use crate::registry;
use crate::state::StateManager;
use crate::value::Value;
use serde_json::Value as Json;

const DEFAULT_MAX_ITERATIONS: u32 = 100;

/// A step descriptor ready to hand to the driving client, `definition`
/// already stripped of anything a client must never see (spec §6:
/// no `_`-prefixed keys, `sub_agent_steps` forced to `[]`).
#[derive(Debug, Clone)]
pub struct ClientStep {
    pub id: String,
    pub kind: String,
    pub definition: Json,
}

#[derive(Debug, Clone)]
pub enum StepOutcome {
    /// Fully handled server-side; the executor's drain loop keeps going.
    Continue,
    /// Surfaced to the client as-is.
    Client(ClientStep),
    /// A `parallel_foreach` ready for the sub-agent coordinator to act on.
    ParallelForeach {
        task_name: String,
        items: Vec<Value>,
        continue_on_error: bool,
        client_step: ClientStep,
    },
}

fn eval_scope(state: &StateManager, queue: &WorkflowQueue) -> Scope {
    let mut scope = state.scope();
    for (name, value) in queue.active_locals() {
        scope.set(name, value);
    }
    scope
}

fn eval_guard(
    expression: &str,
    step_id: &str,
    on_condition_error_skip: bool,
    scope: &Scope,
) -> Result<bool, WorkflowError> {
    match expr::evaluate(expression, scope) {
        Ok(v) => Ok(v.is_truthy()),
        Err(e) => {
            if on_condition_error_skip {
                Ok(false)
            } else {
                Err(WorkflowError::ExpressionError {
                    step: step_id.to_string(),
                    message: e.to_string(),
                })
            }
        }
    }
}

fn on_condition_error_skip(params: &Json) -> bool {
    params.get("on_condition_error").and_then(Json::as_str) == Some("skip")
}

pub fn strip_internal(mut definition: Json) -> Json {
    if let Json::Object(map) = &mut definition {
        map.retain(|k, _| !k.starts_with('_'));
    }
    definition
}

/// Process one step. Control-flow kinds mutate `queue`'s frame stack and
/// `state` in place; leaf kinds return a client-visible descriptor.
pub fn process_step(
    step: &StepDescriptor,
    state: &mut StateManager,
    queue: &mut WorkflowQueue,
) -> Result<StepOutcome, WorkflowError> {
    registry::validate_params(&step.id, &step.kind, &step.params)?;

    match step.kind.as_str() {
        "state_update" => process_state_update(step, state, queue),
        "conditional" => process_conditional(step, state, queue),
        "while_loop" => process_while_loop(step, state, queue),
        "foreach" => process_foreach(step, state, queue),
        "user_message" => Ok(StepOutcome::Client(ClientStep {
            id: step.id.clone(),
            kind: step.kind.clone(),
            definition: strip_internal(step.params.clone()),
        })),
        "mcp_call" => Ok(StepOutcome::Client(ClientStep {
            id: step.id.clone(),
            kind: step.kind.clone(),
            definition: strip_internal(step.params.clone()),
        })),
        "parallel_foreach" => process_parallel_foreach(step, state, queue),
        "debug_step_advance" => {
            queue.advance_debug_step();
            Ok(StepOutcome::Continue)
        }
        "debug_task_completion" => {
            queue.complete_debug_task();
            Ok(StepOutcome::Continue)
        }
        other => Err(WorkflowError::UnknownStepKind(other.to_string())),
    }
}

fn process_state_update(
    step: &StepDescriptor,
    state: &mut StateManager,
    queue: &WorkflowQueue,
) -> Result<StepOutcome, WorkflowError> {
    let path = step
        .params
        .get("path")
        .and_then(Json::as_str)
        .ok_or_else(|| WorkflowError::MalformedStep {
            step: step.id.clone(),
            message: "state_update requires a string 'path'".to_string(),
        })?;
    let field = path.strip_prefix("state.").ok_or_else(|| WorkflowError::BadStatePath(path.to_string()))?;

    let value = if let Some(expression) = step.params.get("expression").and_then(Json::as_str) {
        let scope = eval_scope(state, queue);
        expr::evaluate(expression, &scope)
            .map_err(|e| WorkflowError::ExpressionError {
                step: step.id.clone(),
                message: e.to_string(),
            })?
            .into_json()
    } else {
        step.params.get("value").cloned().unwrap_or(Json::Null)
    };

    state.set_state(field, value)?;
    Ok(StepOutcome::Continue)
}

fn process_conditional(
    step: &StepDescriptor,
    state: &StateManager,
    queue: &mut WorkflowQueue,
) -> Result<StepOutcome, WorkflowError> {
    let condition = step
        .params
        .get("condition")
        .and_then(Json::as_str)
        .ok_or_else(|| WorkflowError::MalformedStep {
            step: step.id.clone(),
            message: "conditional requires a string 'condition'".to_string(),
        })?;
    let scope = eval_scope(state, queue);
    let truthy = eval_guard(condition, &step.id, on_condition_error_skip(&step.params), &scope)?;
    let body = if truthy { step.steps.clone() } else { step.else_steps.clone() };
    queue.push_frame(Frame::new(body, FrameKind::Sequential));
    Ok(StepOutcome::Continue)
}

fn process_while_loop(
    step: &StepDescriptor,
    state: &StateManager,
    queue: &mut WorkflowQueue,
) -> Result<StepOutcome, WorkflowError> {
    let condition = step
        .params
        .get("condition")
        .and_then(Json::as_str)
        .ok_or_else(|| WorkflowError::MalformedStep {
            step: step.id.clone(),
            message: "while_loop requires a string 'condition'".to_string(),
        })?
        .to_string();
    let max_iterations = step
        .params
        .get("max_iterations")
        .and_then(Json::as_u64)
        .map(|n| n as u32)
        .unwrap_or(DEFAULT_MAX_ITERATIONS);
    let skip_on_error = on_condition_error_skip(&step.params);

    let scope = eval_scope(state, queue);
    let truthy = eval_guard(&condition, &step.id, skip_on_error, &scope)?;
    if truthy {
        queue.push_frame(Frame::new(
            step.steps.clone(),
            FrameKind::Loop {
                step_id: step.id.clone(),
                condition,
                max_iterations,
                iteration: 1,
                on_condition_error_skip: skip_on_error,
            },
        ));
    }
    Ok(StepOutcome::Continue)
}

fn process_foreach(
    step: &StepDescriptor,
    state: &StateManager,
    queue: &mut WorkflowQueue,
) -> Result<StepOutcome, WorkflowError> {
    let items_expr = step
        .params
        .get("items")
        .and_then(Json::as_str)
        .ok_or_else(|| WorkflowError::MalformedStep {
            step: step.id.clone(),
            message: "foreach requires a string 'items' expression".to_string(),
        })?;
    let scope = eval_scope(state, queue);
    let resolved = expr::evaluate(items_expr, &scope).map_err(|e| WorkflowError::ExpressionError {
        step: step.id.clone(),
        message: e.to_string(),
    })?;
    let items = match resolved {
        Value::List(items) => items,
        Value::Undefined => Vec::new(),
        other => vec![other],
    };
    if !items.is_empty() {
        queue.push_frame(Frame::new(
            step.steps.clone(),
            FrameKind::Foreach {
                step_id: step.id.clone(),
                items,
                index: 0,
            },
        ));
    }
    Ok(StepOutcome::Continue)
}

/// Resumes a loop/foreach frame once its body is exhausted. Returns `true`
/// if the frame was restarted for another iteration, `false` if it was
/// popped because the loop/foreach is done.
pub fn resume_reentrant_frame(
    kind: FrameKind,
    state: &StateManager,
    queue: &mut WorkflowQueue,
) -> Result<bool, WorkflowError> {
    match kind {
        FrameKind::Loop {
            step_id,
            condition,
            max_iterations,
            iteration,
            on_condition_error_skip: skip,
        } => {
            let next_iteration = iteration + 1;
            let scope = eval_scope(state, queue);
            let truthy = eval_guard(&condition, &step_id, skip, &scope)?;
            if !truthy {
                queue.pop_frame();
                return Ok(false);
            }
            if next_iteration > max_iterations {
                return Err(WorkflowError::LoopBudgetExhausted {
                    step: step_id,
                    max: max_iterations,
                });
            }
            queue.restart_top_frame(FrameKind::Loop {
                step_id,
                condition,
                max_iterations,
                iteration: next_iteration,
                on_condition_error_skip: skip,
            });
            Ok(true)
        }
        FrameKind::Foreach { step_id, items, index } => {
            let next_index = index + 1;
            if next_index < items.len() {
                queue.restart_top_frame(FrameKind::Foreach {
                    step_id,
                    items,
                    index: next_index,
                });
                Ok(true)
            } else {
                queue.pop_frame();
                Ok(false)
            }
        }
        FrameKind::Sequential | FrameKind::SubAgentItem { .. } => {
            queue.pop_frame();
            Ok(false)
        }
    }
}

fn process_parallel_foreach(
    step: &StepDescriptor,
    state: &StateManager,
    queue: &WorkflowQueue,
) -> Result<StepOutcome, WorkflowError> {
    let items_expr = step
        .params
        .get("items")
        .and_then(Json::as_str)
        .ok_or_else(|| WorkflowError::MalformedStep {
            step: step.id.clone(),
            message: "parallel_foreach requires a string 'items' expression".to_string(),
        })?;
    let task_name = step
        .params
        .get("sub_agent_task")
        .and_then(Json::as_str)
        .ok_or_else(|| WorkflowError::MalformedStep {
            step: step.id.clone(),
            message: "parallel_foreach requires 'sub_agent_task'".to_string(),
        })?
        .to_string();
    let continue_on_error = step
        .params
        .get("continue_on_error")
        .and_then(Json::as_bool)
        .unwrap_or(false);

    let scope = eval_scope(state, queue);
    let resolved = expr::evaluate(items_expr, &scope).map_err(|e| WorkflowError::ExpressionError {
        step: step.id.clone(),
        message: e.to_string(),
    })?;
    let items = match resolved {
        Value::List(items) => items,
        other => vec![other],
    };

    let tasks: Vec<Json> = items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            serde_json::json!({
                "task_id": format!("{task_name}.item{index}"),
                "item": item.clone().into_json(),
                "index": index,
            })
        })
        .collect();

    let instructions = step
        .params
        .get("instructions")
        .and_then(Json::as_str)
        .unwrap_or("Execute the sub-agent task for each listed item.")
        .to_string();
    let subagent_prompt = step
        .params
        .get("subagent_prompt")
        .cloned()
        .unwrap_or_else(|| Json::String(format!("Run '{task_name}' for the assigned item.")));

    let definition = serde_json::json!({
        "instructions": instructions,
        "tasks": tasks,
        "subagent_prompt": subagent_prompt,
        "sub_agent_steps": [],
    });

    Ok(StepOutcome::ParallelForeach {
        task_name,
        items,
        continue_on_error,
        client_step: ClientStep {
            id: step.id.clone(),
            kind: step.kind.clone(),
            definition,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::StepDescriptor as SD;
    use serde_json::json;

    fn fresh_state() -> StateManager {
        StateManager::new(serde_json::Map::new(), serde_json::Map::new(), Vec::new()).unwrap()
    }

    #[test]
    fn user_message_is_client_visible_and_strips_underscore_keys() {
        let mut state = fresh_state();
        let mut queue = WorkflowQueue::new("wf_1", vec![]);
        let step = SD::new("m1", "user_message", json!({"message": "hi", "_internal": 1}));
        let outcome = process_step(&step, &mut state, &mut queue).unwrap();
        match outcome {
            StepOutcome::Client(c) => {
                assert_eq!(c.id, "m1");
                assert!(c.definition.get("_internal").is_none());
                assert_eq!(c.definition.get("message"), Some(&json!("hi")));
            }
            _ => panic!("expected client-visible outcome"),
        }
    }

    #[test]
    fn conditional_true_branch_pushes_then_steps() {
        let mut inputs = serde_json::Map::new();
        inputs.insert("x".to_string(), json!(5));
        let mut state = StateManager::new(inputs, serde_json::Map::new(), Vec::new()).unwrap();
        let mut queue = WorkflowQueue::new("wf_1", vec![]);
        let step = SD::new("c1", "conditional", json!({"condition": "inputs.x > 0"}))
            .with_nested(vec![SD::new("t", "user_message", json!({"message": "pos"}))])
            .with_else(vec![SD::new("e", "user_message", json!({"message": "neg"}))]);
        process_step(&step, &mut state, &mut queue).unwrap();
        match queue.pop_next() {
            crate::queue::QueueEvent::Step(s) => assert_eq!(s.id, "t"),
            _ => panic!("expected the then-branch step"),
        }
    }

    #[test]
    fn while_loop_with_false_condition_never_enters_body() {
        let mut state = fresh_state();
        let mut queue = WorkflowQueue::new("wf_1", vec![]);
        let step = SD::new("lp", "while_loop", json!({"condition": "false"}))
            .with_nested(vec![SD::new("body", "user_message", json!({"message": "x"}))]);
        process_step(&step, &mut state, &mut queue).unwrap();
        assert!(matches!(queue.pop_next(), crate::queue::QueueEvent::Empty));
    }

    #[test]
    fn loop_budget_exhaustion_is_fatal() {
        let state = fresh_state();
        let mut queue = WorkflowQueue::new("wf_1", vec![]);
        queue.push_frame(Frame::new(
            vec![],
            FrameKind::Loop {
                step_id: "lp".to_string(),
                condition: "true".to_string(),
                max_iterations: 1,
                iteration: 1,
                on_condition_error_skip: false,
            },
        ));
        let err = resume_reentrant_frame(
            FrameKind::Loop {
                step_id: "lp".to_string(),
                condition: "true".to_string(),
                max_iterations: 1,
                iteration: 1,
                on_condition_error_skip: false,
            },
            &state,
            &mut queue,
        )
        .unwrap_err();
        assert!(matches!(err, WorkflowError::LoopBudgetExhausted { .. }));
    }

    #[test]
    fn condition_going_false_on_the_budget_boundary_completes_instead_of_failing() {
        let mut state = fresh_state();
        state.set_state("count", json!(0)).unwrap();
        let mut queue = WorkflowQueue::new("wf_1", vec![]);
        queue.push_frame(Frame::new(
            vec![],
            FrameKind::Loop {
                step_id: "lp".to_string(),
                condition: "state.count < 1".to_string(),
                max_iterations: 1,
                iteration: 1,
                on_condition_error_skip: false,
            },
        ));
        let restarted = resume_reentrant_frame(
            FrameKind::Loop {
                step_id: "lp".to_string(),
                condition: "state.count < 1".to_string(),
                max_iterations: 1,
                iteration: 1,
                on_condition_error_skip: false,
            },
            &state,
            &mut queue,
        )
        .unwrap();
        assert!(!restarted);
    }

    #[test]
    fn parallel_foreach_descriptor_has_no_internal_keys_and_empty_sub_agent_steps() {
        let mut inputs = serde_json::Map::new();
        inputs.insert("files".to_string(), json!(["a.ts", "b.ts"]));
        let state = StateManager::new(inputs, serde_json::Map::new(), Vec::new()).unwrap();
        let queue = WorkflowQueue::new("wf_1", vec![]);
        let step = SD::new(
            "pf",
            "parallel_foreach",
            json!({"items": "inputs.files", "sub_agent_task": "enforce"}),
        );
        match process_parallel_foreach(&step, &state, &queue).unwrap() {
            StepOutcome::ParallelForeach { client_step, items, .. } => {
                assert_eq!(items.len(), 2);
                assert_eq!(client_step.definition["sub_agent_steps"], json!([]));
                assert_eq!(client_step.definition["tasks"].as_array().unwrap().len(), 2);
            }
            _ => panic!("expected ParallelForeach outcome"),
        }
    }
}
