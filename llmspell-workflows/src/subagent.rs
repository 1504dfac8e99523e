//! ABOUTME: Sub-agent coordinator (component H)
//! ABOUTME: Spawns isolated per-item workflow instances from a parallel_foreach's sub_agent_task template

use crate::definition::{SubAgentTaskTemplate, WorkflowDefinition};
use crate::error::WorkflowError;
use crate::executor::{TaskContext, WorkflowInstance, WorkflowStatus};
use crate::queue::WorkflowQueue;
use crate::state::{StateManager, StateSnapshot};
use crate::value::Value;
use serde_json::{Map, Value as Json};
use std::sync::Arc;

/// Resolve one sub-agent task's declared inputs against its assigned item
/// and the parent's tiers (spec §4.7 step 2).
fn resolve_inputs(
    template: &SubAgentTaskTemplate,
    item: &Value,
    parent: &StateSnapshot,
) -> Result<Map<String, Json>, WorkflowError> {
    let mut resolved = Map::new();
    for (name, def) in &template.inputs {
        let mut value = match def.from.as_deref() {
            Some("item") | None => match item {
                Value::Map(m) => m.get(name).map(Value::from_json).unwrap_or_else(|| item.clone()),
                other => other.clone(),
            },
            Some(path) if path.starts_with("inputs.") => {
                let field = &path["inputs.".len()..];
                parent.inputs.get(field).map(Value::from_json).unwrap_or(Value::Undefined)
            }
            Some(path) if path.starts_with("state.") => {
                let field = &path["state.".len()..];
                parent.state.get(field).map(Value::from_json).unwrap_or(Value::Undefined)
            }
            Some(_) => Value::Undefined,
        };
        if matches!(value, Value::Undefined) {
            if let Some(default) = &def.default {
                value = Value::from_json(default);
            }
        }
        if matches!(value, Value::Undefined) && def.required {
            return Err(WorkflowError::MalformedStep {
                step: template.name.clone(),
                message: format!("sub-agent task '{}' missing required input '{name}'", template.name),
            });
        }
        resolved.insert(name.clone(), value.into_json());
    }
    Ok(resolved)
}

/// Build the isolated state + queue for one task item, per spec §4.7 step
/// 3: resolve inputs, seed state from the template's defaults, then fully
/// recompute the computed DAG before anything downstream reads it.
pub fn build_item_state_and_queue(
    task_id: &str,
    template: &SubAgentTaskTemplate,
    item: &Value,
    parent: &StateSnapshot,
) -> Result<(StateManager, WorkflowQueue), WorkflowError> {
    let inputs = resolve_inputs(template, item, parent)?;
    let state_defaults: Map<String, Json> = template.state_defaults.clone().into_iter().collect();
    let state = StateManager::new(inputs, state_defaults, template.computed.clone())?;
    let queue = WorkflowQueue::new(task_id.to_string(), template.steps.clone());
    Ok((state, queue))
}

/// Spawn one fully addressable [`WorkflowInstance`] per item, for the
/// non-debug (real parallel) path. The caller is responsible for
/// registering the returned instances and recording the parent/child
/// relationship.
pub fn spawn_children(
    task_name: &str,
    items: &[Value],
    parent_name: &str,
    parent: &StateSnapshot,
    template: &SubAgentTaskTemplate,
) -> Result<Vec<WorkflowInstance>, WorkflowError> {
    let mut children = Vec::with_capacity(items.len());
    let synthetic_def = Arc::new(WorkflowDefinition {
        name: format!("{parent_name}::{task_name}"),
        description: template.description.clone(),
        version: None,
        inputs: template.inputs.clone(),
        state_defaults: template.state_defaults.clone(),
        computed: template.computed.clone(),
        steps: template.steps.clone(),
        sub_agent_tasks: Default::default(),
    });
    for (index, item) in items.iter().enumerate() {
        let task_id = format!("{task_name}.item{index}");
        let (state, queue) = build_item_state_and_queue(&task_id, template, item, parent)?;
        children.push(WorkflowInstance {
            id: task_id.clone(),
            definition: synthetic_def.clone(),
            state,
            queue,
            status: WorkflowStatus::Running,
            parent_id: Some(parent_name.to_string()),
            task_context: Some(TaskContext {
                item: item.clone().into_json(),
                index,
                total: items.len(),
                task_id,
            }),
            failure: None,
            pending_parallel_foreach: None,
            step_results: Default::default(),
        });
    }
    Ok(children)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::InputDefinition;
    use serde_json::json;
    use std::collections::HashMap;

    fn template_with_item_binding() -> SubAgentTaskTemplate {
        let mut inputs = HashMap::new();
        inputs.insert(
            "file_path".to_string(),
            InputDefinition {
                kind: "string".to_string(),
                description: None,
                required: true,
                default: None,
                from: None,
            },
        );
        SubAgentTaskTemplate {
            name: "enforce".to_string(),
            description: None,
            inputs,
            state_defaults: HashMap::new(),
            computed: Vec::new(),
            steps: vec![],
        }
    }

    #[test]
    fn item_binds_directly_when_no_from_declared() {
        let template = template_with_item_binding();
        let parent = StateSnapshot {
            inputs: Map::new(),
            state: Map::new(),
            computed: Map::new(),
        };
        let item = Value::Str("f1.ts".to_string());
        let resolved = resolve_inputs(&template, &item, &parent).unwrap();
        assert_eq!(resolved.get("file_path"), Some(&json!("f1.ts")));
    }

    #[test]
    fn spawn_children_produces_one_instance_per_item_with_composite_id() {
        let template = template_with_item_binding();
        let parent = StateSnapshot {
            inputs: Map::new(),
            state: Map::new(),
            computed: Map::new(),
        };
        let items = vec![Value::Str("f1.ts".to_string()), Value::Str("f2.ts".to_string())];
        let children = spawn_children("enforce", &items, "parent_wf", &parent, &template).unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].id, "enforce.item0");
        assert_eq!(children[1].id, "enforce.item1");
        assert_eq!(children[0].task_context.as_ref().unwrap().index, 0);
    }
}
