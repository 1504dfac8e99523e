//! ABOUTME: Queue-based executor (component G): the top-level start/get_next_step/
//! ABOUTME: update_state/submit_step_result/cancel state machine, grounded on the
//! ABOUTME: executor::{DefaultWorkflowExecutor, ExecutionContext} shape in the teacher crate

use crate::debug;
use crate::definition::WorkflowDefinition;
use crate::error::{FailureRecord, WorkflowError};
use crate::processors::{self, ClientStep, StepOutcome};
use crate::queue::{Frame, FrameKind, QueueEvent, WorkflowQueue};
use crate::registry;
use crate::state::StateManager;
use crate::subagent;
use crate::value::Value;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value as Json};
use std::collections::HashMap;
use std::sync::Arc;

const DEFAULT_DRAIN_BUDGET: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Running,
    PendingStep,
    Completed,
    Failed,
}

/// Copied, read-only context a sub-agent instance carries about its own
/// spawn (spec §3 `task_context`).
#[derive(Debug, Clone, Serialize)]
pub struct TaskContext {
    pub item: Json,
    pub index: usize,
    pub total: usize,
    pub task_id: String,
}

/// A `parallel_foreach` that has been surfaced to the client but not yet
/// acted upon. The coordinator spawns (or, in debug mode, flattens) it
/// once the client acknowledges by calling `get_next_step` again.
#[derive(Debug, Clone)]
pub struct PendingForeach {
    pub task_name: String,
    pub items: Vec<Value>,
    pub continue_on_error: bool,
}

pub struct WorkflowInstance {
    pub id: String,
    pub definition: Arc<WorkflowDefinition>,
    pub state: StateManager,
    pub queue: WorkflowQueue,
    pub status: WorkflowStatus,
    pub parent_id: Option<String>,
    pub task_context: Option<TaskContext>,
    pub failure: Option<FailureRecord>,
    pub pending_parallel_foreach: Option<PendingForeach>,
    pub step_results: HashMap<String, Json>,
}

impl WorkflowInstance {
    fn fail(&mut self, err: &WorkflowError, step_id: Option<String>) {
        self.status = WorkflowStatus::Failed;
        self.failure = Some(FailureRecord::from_error(err, step_id));
    }
}

pub enum GetNextStepResponse {
    Steps(Vec<ClientStep>),
    Error(FailureRecord),
}

/// `wf_` + 8 lowercase hex digits (spec §3 ID grammar). Truncating a v4
/// UUID's simple form keeps the teacher's `Uuid::new_v4()` id-generation
/// idiom (see e.g. `llmspell-repl/src/client.rs`) while meeting the exact
/// 11-character grammar the RPC surface commits to.
fn generate_workflow_id() -> String {
    let full = uuid::Uuid::new_v4().simple().to_string();
    format!("wf_{}", &full[..8])
}

struct Instances {
    instances: HashMap<String, WorkflowInstance>,
    /// Children still pending completion for a `parallel_foreach` the
    /// parent has spawned but not yet been allowed to complete past
    /// (spec §4.7: the parent does not finish until every child does).
    parent_to_children: HashMap<String, Vec<String>>,
    /// `continue_on_error` recorded at spawn time for each gated parent,
    /// consulted once a child fails.
    parent_continue_on_error: HashMap<String, bool>,
}

/// What to do about a `parallel_foreach` the client just acknowledged.
enum ForeachAction {
    None,
    Debug(Vec<crate::definition::StepDescriptor>),
    Spawn(Vec<WorkflowInstance>, String, bool),
}

/// Outcome of checking whether a parent's spawned children have all
/// resolved (spec §4.7).
enum ChildGate {
    /// No children were ever spawned for this parent, or it isn't gated.
    NoChildren,
    /// Every child reached `Completed` (or `Failed` under `continue_on_error`).
    AllDone,
    /// At least one child is still running.
    Waiting,
    /// A child failed and `continue_on_error` is false.
    ChildFailed(String),
}

/// Inspects (without mutating) whether all children spawned for `parent_id`
/// have resolved. Called only once the parent's own step list is drained.
fn check_children_gate(instances: &HashMap<String, WorkflowInstance>, child_ids: &[String], continue_on_error: bool) -> ChildGate {
    if child_ids.is_empty() {
        return ChildGate::NoChildren;
    }
    for child_id in child_ids {
        let Some(child) = instances.get(child_id) else {
            continue;
        };
        match child.status {
            WorkflowStatus::Completed => {}
            WorkflowStatus::Failed => {
                if !continue_on_error {
                    let message = child
                        .failure
                        .as_ref()
                        .map(|f| f.message.clone())
                        .unwrap_or_else(|| format!("sub-agent task '{child_id}' failed"));
                    return ChildGate::ChildFailed(message);
                }
            }
            WorkflowStatus::Running | WorkflowStatus::PendingStep => return ChildGate::Waiting,
        }
    }
    ChildGate::AllDone
}

/// Top-level engine. Owns every live instance behind a single lock, per
/// spec §5's shared-resource policy.
pub struct WorkflowEngine {
    definitions: Mutex<HashMap<String, Arc<WorkflowDefinition>>>,
    instances: Mutex<Instances>,
    debug_mode: bool,
    drain_budget: usize,
}

impl WorkflowEngine {
    /// Builds an engine with its debug mode locked in from the environment
    /// at construction time (spec §6: the variable is read once at engine
    /// start, never mid-run).
    pub fn new() -> Self {
        Self::with_debug_mode(debug::debug_mode_from_env())
    }

    pub fn with_debug_mode(debug_mode: bool) -> Self {
        Self {
            definitions: Mutex::new(HashMap::new()),
            instances: Mutex::new(Instances {
                instances: HashMap::new(),
                parent_to_children: HashMap::new(),
                parent_continue_on_error: HashMap::new(),
            }),
            debug_mode,
            drain_budget: DEFAULT_DRAIN_BUDGET,
        }
    }

    #[tracing::instrument(skip(self, definition))]
    pub async fn register(&self, definition: WorkflowDefinition) -> Result<(), WorkflowError> {
        validate_definition(&definition)?;
        self.definitions.lock().insert(definition.name.clone(), Arc::new(definition));
        Ok(())
    }

    #[tracing::instrument(skip(self, inputs))]
    pub async fn start(&self, name: &str, inputs: Map<String, Json>) -> Result<(String, WorkflowStatus), WorkflowError> {
        let definition = self
            .definitions
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| WorkflowError::UnknownWorkflow(name.to_string()))?;

        let state_defaults: Map<String, Json> = definition.state_defaults.clone().into_iter().collect();
        let state = StateManager::new(inputs, state_defaults, definition.computed.clone())?;
        let id = generate_workflow_id();
        let queue = WorkflowQueue::new(id.clone(), definition.steps.clone());
        let instance = WorkflowInstance {
            id: id.clone(),
            definition,
            state,
            queue,
            status: WorkflowStatus::Running,
            parent_id: None,
            task_context: None,
            failure: None,
            pending_parallel_foreach: None,
            step_results: HashMap::new(),
        };
        self.instances.lock().instances.insert(id.clone(), instance);
        tracing::info!(workflow_id = %id, "workflow started");
        Ok((id, WorkflowStatus::Running))
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_next_step(&self, workflow_id: &str) -> Result<GetNextStepResponse, WorkflowError> {
        let mut guard = self.instances.lock();
        let Instances { instances, parent_to_children, parent_continue_on_error } = &mut *guard;

        {
            let instance = instances
                .get(workflow_id)
                .ok_or_else(|| WorkflowError::UnknownWorkflow(workflow_id.to_string()))?;
            if instance.status == WorkflowStatus::Failed {
                return Ok(GetNextStepResponse::Error(instance.failure.clone().unwrap_or_else(no_recorded_error)));
            }
            if instance.status == WorkflowStatus::Completed {
                return Ok(GetNextStepResponse::Steps(Vec::new()));
            }
        }

        // Phase 1: decide what to do about a pending parallel_foreach, if
        // any, while only `instance` (not the whole map) is borrowed.
        let action = match plan_foreach_action(instances.get_mut(workflow_id).unwrap(), self.debug_mode) {
            Ok(action) => action,
            Err(e) => {
                let instance = instances.get_mut(workflow_id).unwrap();
                instance.fail(&e, None);
                return Ok(GetNextStepResponse::Error(instance.failure.clone().unwrap()));
            }
        };

        // Phase 2: apply it. `Spawn` needs to insert into the same map
        // `instance` was borrowed from, so it runs after that borrow ends.
        match action {
            ForeachAction::None => {}
            ForeachAction::Debug(flattened) => {
                let instance = instances.get_mut(workflow_id).unwrap();
                instance.queue.push_frame(Frame::new(flattened, FrameKind::Sequential));
            }
            ForeachAction::Spawn(children, parent_id, continue_on_error) => {
                let child_ids: Vec<String> = children.iter().map(|c| c.id.clone()).collect();
                parent_to_children.entry(parent_id.clone()).or_default().extend(child_ids);
                parent_continue_on_error.insert(parent_id, continue_on_error);
                for child in children {
                    instances.insert(child.id.clone(), child);
                }
            }
        }

        let drained = {
            let instance = instances.get_mut(workflow_id).unwrap();
            drain_and_surface(instance, self.drain_budget, self.debug_mode)
        };
        match drained {
            Ok(GetNextStepResponse::Steps(steps)) if steps.is_empty() => {
                let child_ids = parent_to_children.get(workflow_id).cloned().unwrap_or_default();
                let continue_on_error = parent_continue_on_error.get(workflow_id).copied().unwrap_or(false);
                match check_children_gate(instances, &child_ids, continue_on_error) {
                    ChildGate::NoChildren | ChildGate::AllDone => {
                        parent_to_children.remove(workflow_id);
                        parent_continue_on_error.remove(workflow_id);
                        let instance = instances.get_mut(workflow_id).unwrap();
                        instance.status = WorkflowStatus::Completed;
                        Ok(GetNextStepResponse::Steps(Vec::new()))
                    }
                    ChildGate::Waiting => Ok(GetNextStepResponse::Steps(Vec::new())),
                    ChildGate::ChildFailed(message) => {
                        parent_to_children.remove(workflow_id);
                        parent_continue_on_error.remove(workflow_id);
                        let instance = instances.get_mut(workflow_id).unwrap();
                        instance.fail(&WorkflowError::SubAgentFailed(message), None);
                        Ok(GetNextStepResponse::Error(instance.failure.clone().unwrap()))
                    }
                }
            }
            Ok(GetNextStepResponse::Steps(steps)) => {
                let instance = instances.get_mut(workflow_id).unwrap();
                instance.status = WorkflowStatus::PendingStep;
                Ok(GetNextStepResponse::Steps(stamp_child_ids(instance, steps)))
            }
            Err(e) => {
                let instance = instances.get_mut(workflow_id).unwrap();
                instance.fail(&e, None);
                Ok(GetNextStepResponse::Error(instance.failure.clone().unwrap()))
            }
        }
    }

    #[tracing::instrument(skip(self, updates))]
    pub async fn update_state(&self, workflow_id: &str, updates: Map<String, Json>) -> Result<(), WorkflowError> {
        let mut guard = self.instances.lock();
        let instance = guard
            .instances
            .get_mut(workflow_id)
            .ok_or_else(|| WorkflowError::UnknownWorkflow(workflow_id.to_string()))?;
        if instance.status == WorkflowStatus::Failed {
            return Err(instance.failure.clone().map(error_from_record).unwrap_or(WorkflowError::Cancelled));
        }
        // `update_state` may only touch `state.*`; callers pass bare field
        // names here (the `state.` prefix is implicit on this RPC, unlike
        // the `state_update` *step*, which carries an explicit dotted path).
        let result = instance.state.merge_state(&updates);
        if let Err(e) = &result {
            if e.is_fatal_to_instance() {
                instance.fail(e, None);
            }
        }
        result
    }

    #[tracing::instrument(skip(self, result))]
    pub async fn submit_step_result(&self, workflow_id: &str, step_id: &str, result: Json) -> Result<(), WorkflowError> {
        let mut guard = self.instances.lock();
        let instance = guard
            .instances
            .get_mut(workflow_id)
            .ok_or_else(|| WorkflowError::UnknownWorkflow(workflow_id.to_string()))?;
        if instance.status == WorkflowStatus::Failed {
            return Err(instance.failure.clone().map(error_from_record).unwrap_or(WorkflowError::Cancelled));
        }
        instance.step_results.insert(step_id.to_string(), result);
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, workflow_id: &str) -> Result<(), WorkflowError> {
        let mut guard = self.instances.lock();
        let instance = guard
            .instances
            .get_mut(workflow_id)
            .ok_or_else(|| WorkflowError::UnknownWorkflow(workflow_id.to_string()))?;
        instance.fail(&WorkflowError::Cancelled, None);
        Ok(())
    }
}

impl Default for WorkflowEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn no_recorded_error() -> FailureRecord {
    FailureRecord {
        code: "Internal".to_string(),
        message: "instance failed with no recorded error".to_string(),
        step_id: None,
        details: None,
    }
}

fn error_from_record(record: FailureRecord) -> WorkflowError {
    match record.code.as_str() {
        "Cancelled" => WorkflowError::Cancelled,
        _ => WorkflowError::SubAgentFailed(record.message),
    }
}

fn plan_foreach_action(instance: &mut WorkflowInstance, debug_mode: bool) -> Result<ForeachAction, WorkflowError> {
    let Some(pending) = instance.pending_parallel_foreach.take() else {
        return Ok(ForeachAction::None);
    };
    let template = instance
        .definition
        .sub_agent_task(&pending.task_name)
        .ok_or_else(|| WorkflowError::UnknownSubAgentTask(pending.task_name.clone()))?
        .clone();
    let snapshot = instance.state.snapshot();

    if debug_mode {
        let flattened = debug::expand(&pending.task_name, &pending.items, &snapshot, &template)?;
        Ok(ForeachAction::Debug(flattened))
    } else {
        let children = subagent::spawn_children(&pending.task_name, &pending.items, &instance.id, &snapshot, &template)?;
        Ok(ForeachAction::Spawn(children, instance.id.clone(), pending.continue_on_error))
    }
}

fn validate_definition(definition: &WorkflowDefinition) -> Result<(), WorkflowError> {
    fn walk(steps: &[crate::definition::StepDescriptor], def: &WorkflowDefinition) -> Result<(), WorkflowError> {
        for step in steps {
            registry::validate_params(&step.id, &step.kind, &step.params)?;
            if step.kind == "parallel_foreach" {
                let task = step
                    .params
                    .get("sub_agent_task")
                    .and_then(Json::as_str)
                    .ok_or_else(|| WorkflowError::MalformedStep {
                        step: step.id.clone(),
                        message: "parallel_foreach requires 'sub_agent_task'".to_string(),
                    })?;
                if def.sub_agent_task(task).is_none() {
                    return Err(WorkflowError::UnknownSubAgentTask(task.to_string()));
                }
            }
            walk(&step.steps, def)?;
            walk(&step.else_steps, def)?;
        }
        Ok(())
    }
    walk(&definition.steps, definition)?;
    // Cycle detection on the computed DAG runs as a side effect of
    // constructing a throwaway StateManager over the definition's defaults.
    let state_defaults: Map<String, Json> = definition.state_defaults.clone().into_iter().collect();
    StateManager::new(Map::new(), state_defaults, definition.computed.clone())?;
    Ok(())
}

/// Drains server-side steps until a client-visible batch is ready,
/// applying the batching rule (adjacent `user_message` steps only) and
/// the drain budget (spec §4.6).
fn drain_and_surface(
    instance: &mut WorkflowInstance,
    drain_budget: usize,
    debug_mode: bool,
) -> Result<GetNextStepResponse, WorkflowError> {
    let mut drained = 0usize;
    loop {
        match instance.queue.pop_next() {
            QueueEvent::Step(step) => {
                if step.kind == "parallel_foreach" {
                    match processors::process_step(&step, &mut instance.state, &mut instance.queue)? {
                        StepOutcome::ParallelForeach {
                            task_name,
                            items,
                            continue_on_error,
                            mut client_step,
                        } => {
                            if debug_mode {
                                client_step.definition = tag_debug_instructions(client_step.definition);
                            }
                            instance.pending_parallel_foreach = Some(PendingForeach {
                                task_name,
                                items,
                                continue_on_error,
                            });
                            return Ok(GetNextStepResponse::Steps(vec![client_step]));
                        }
                        other => return Err(unexpected_outcome(&step.id, other)),
                    }
                } else {
                    let registration = registry::lookup(&step.kind)?;
                    match registration.execution {
                        registry::Execution::Server => {
                            drained += 1;
                            if drained > drain_budget {
                                return Err(WorkflowError::ServerDrainBudgetExhausted(drained));
                            }
                            match processors::process_step(&step, &mut instance.state, &mut instance.queue)? {
                                StepOutcome::Continue => continue,
                                other => return Err(unexpected_outcome(&step.id, other)),
                            }
                        }
                        registry::Execution::Agent => {
                            let first = match processors::process_step(&step, &mut instance.state, &mut instance.queue)? {
                                StepOutcome::Client(cs) => cs,
                                other => return Err(unexpected_outcome(&step.id, other)),
                            };
                            let batch = collect_batch(instance, first)?;
                            return Ok(GetNextStepResponse::Steps(batch));
                        }
                    }
                }
            }
            QueueEvent::FrameExhausted(kind) => {
                processors::resume_reentrant_frame(kind, &instance.state, &mut instance.queue)?;
            }
            QueueEvent::Empty => return Ok(GetNextStepResponse::Steps(Vec::new())),
        }
    }
}

/// Rewrites every step id surfaced from a sub-agent child instance to the
/// `⟨task-id⟩.⟨step-id⟩` composite grammar (spec §4.7 / component H),
/// matching what the serial debug driver already produces in `debug.rs`.
/// No-op for top-level (non-child) instances.
fn stamp_child_ids(instance: &WorkflowInstance, steps: Vec<ClientStep>) -> Vec<ClientStep> {
    let Some(task_context) = &instance.task_context else {
        return steps;
    };
    steps
        .into_iter()
        .map(|mut step| {
            step.id = crate::queue::composite_step_id(&task_context.task_id, &step.id);
            step
        })
        .collect()
}

fn tag_debug_instructions(mut definition: Json) -> Json {
    if let Json::Object(map) = &mut definition {
        if let Some(Json::String(s)) = map.get("instructions").cloned().as_ref() {
            map.insert("instructions".to_string(), Json::String(format!("DEBUG MODE: {s}")));
        }
    }
    definition
}

fn unexpected_outcome(step_id: &str, outcome: StepOutcome) -> WorkflowError {
    let kind = match outcome {
        StepOutcome::Continue => "Continue",
        StepOutcome::Client(_) => "Client",
        StepOutcome::ParallelForeach { .. } => "ParallelForeach",
    };
    WorkflowError::MalformedStep {
        step: step_id.to_string(),
        message: format!("unexpected processor outcome '{kind}' for this step kind"),
    }
}

/// Only adjacent `user_message` steps batch together (spec §4.6 point 4 /
/// §9 open question (b)). "Adjacent" means: in the same scope, with no
/// frame push/pop between them — `peek_same_frame` checks this without
/// consuming the step, so a step that turns out not to qualify is left
/// untouched for the next call to pop and process on its own.
fn collect_batch(instance: &mut WorkflowInstance, first: ClientStep) -> Result<Vec<ClientStep>, WorkflowError> {
    let mut batch = vec![first];
    if batch[0].kind != "user_message" {
        return Ok(batch);
    }
    while let Some(peeked) = instance.queue.peek_same_frame() {
        if peeked.kind != "user_message" {
            break;
        }
        let step = peeked.clone();
        instance.queue.pop_next();
        match processors::process_step(&step, &mut instance.state, &mut instance.queue)? {
            StepOutcome::Client(cs) => batch.push(cs),
            other => return Err(unexpected_outcome(&step.id, other)),
        }
    }
    Ok(batch)
}
