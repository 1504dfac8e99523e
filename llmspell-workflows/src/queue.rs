//! ABOUTME: Step queue / scope-stack executor (component F)
//! ABOUTME: Flattens a workflow's nested step tree into a linear pull stream with loop/foreach re-entry

use crate::definition::StepDescriptor;
use crate::value::Value;

/// What a loop/foreach frame needs to re-enter its body, or to bind as
/// locals (`item`, `index`, `total`) while the body runs.
#[derive(Debug, Clone)]
pub enum FrameKind {
    /// The workflow's top-level step list, or a conditional branch body.
    /// Once exhausted it is simply popped.
    Sequential,
    Loop {
        step_id: String,
        condition: String,
        max_iterations: u32,
        iteration: u32,
        on_condition_error_skip: bool,
    },
    Foreach {
        step_id: String,
        items: Vec<Value>,
        index: usize,
    },
    /// One item of a `parallel_foreach`/serial-debug-flattened sub-agent
    /// task body; carries the locals a task body's steps may reference.
    SubAgentItem {
        task_id: String,
        item: Value,
        index: usize,
        total: usize,
    },
}

#[derive(Debug, Clone)]
pub struct Frame {
    pub steps: Vec<StepDescriptor>,
    pub index: usize,
    pub kind: FrameKind,
}

impl Frame {
    pub fn new(steps: Vec<StepDescriptor>, kind: FrameKind) -> Self {
        Self { steps, index: 0, kind }
    }

    /// Locals this frame contributes to the evaluation scope while its
    /// body is the active cursor (`loop`/`item`/`index`/`total`).
    pub fn locals(&self) -> Vec<(&'static str, Value)> {
        match &self.kind {
            FrameKind::Sequential => Vec::new(),
            FrameKind::Loop { iteration, .. } => {
                let mut loop_scope = serde_json::Map::new();
                loop_scope.insert("iteration".to_string(), serde_json::json!(*iteration));
                loop_scope.insert("index".to_string(), serde_json::json!(iteration.saturating_sub(1)));
                loop_scope.insert("item".to_string(), serde_json::Value::Null);
                vec![("loop", Value::Map(loop_scope))]
            }
            FrameKind::Foreach { items, index, .. } => {
                let item = items.get(*index).cloned().unwrap_or(Value::Undefined);
                vec![
                    ("item", item),
                    ("index", Value::Int(*index as i64)),
                    ("total", Value::Int(items.len() as i64)),
                ]
            }
            FrameKind::SubAgentItem { item, index, total, .. } => vec![
                ("item", item.clone()),
                ("index", Value::Int(*index as i64)),
                ("total", Value::Int(*total as i64)),
            ],
        }
    }
}

#[derive(Debug, Clone)]
pub enum QueueEvent {
    /// The next raw step descriptor in execution order. Control-flow kinds
    /// (`conditional`, `while_loop`, `foreach`, `parallel_foreach`) are
    /// handed back unresolved — the executor evaluates them and pushes a
    /// child frame via [`WorkflowQueue::push_frame`].
    Step(StepDescriptor),
    /// The top frame ran out of steps and is a re-entrant kind (loop or
    /// foreach): the executor must decide whether to restart it or pop it.
    FrameExhausted(FrameKind),
    /// Nothing left anywhere in the stack: the instance is complete.
    Empty,
}

/// Composite ID stamped on every leaf step surfaced from a sub-agent
/// instance, per spec component H (`⟨task-id⟩.⟨step-id⟩`, where `task_id`
/// is itself `⟨task-name⟩.item⟨N⟩`).
pub fn composite_step_id(task_id: &str, step_id: &str) -> String {
    format!("{task_id}.{step_id}")
}

pub struct WorkflowQueue {
    pub workflow_id: String,
    frames: Vec<Frame>,
    /// Serial debug cursor (component I), meaningful only when the engine
    /// is in debug mode (spec §4.4: `_debug_current_step_index`,
    /// `_debug_processed_tasks`).
    pub debug_current_step_index: usize,
    pub debug_processed_tasks: usize,
}

impl WorkflowQueue {
    pub fn new(workflow_id: impl Into<String>, steps: Vec<StepDescriptor>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            frames: vec![Frame::new(steps, FrameKind::Sequential)],
            debug_current_step_index: 0,
            debug_processed_tasks: 0,
        }
    }

    pub fn advance_debug_step(&mut self) {
        self.debug_current_step_index += 1;
    }

    pub fn complete_debug_task(&mut self) {
        self.debug_processed_tasks += 1;
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Pop the next step, transparently unwinding exhausted `Sequential`
    /// frames. Loop/foreach frames stop here and surface
    /// [`QueueEvent::FrameExhausted`] instead of auto-popping, since
    /// whether they repeat depends on state the queue doesn't own.
    pub fn pop_next(&mut self) -> QueueEvent {
        loop {
            let Some(frame) = self.frames.last_mut() else {
                return QueueEvent::Empty;
            };
            if frame.index < frame.steps.len() {
                let step = frame.steps[frame.index].clone();
                frame.index += 1;
                return QueueEvent::Step(step);
            }
            match &frame.kind {
                FrameKind::Sequential => {
                    self.frames.pop();
                    continue;
                }
                other => return QueueEvent::FrameExhausted(other.clone()),
            }
        }
    }

    /// Look at the next step without consuming it, but only if it sits in
    /// the active (top) frame at its current cursor — i.e. popping it would
    /// not unwind or exhaust any frame. Used to decide whether a step is
    /// adjacent, in scope, to the one just surfaced (for batching); `None`
    /// means the next `pop_next()` would cross a frame boundary.
    pub fn peek_same_frame(&self) -> Option<&StepDescriptor> {
        let frame = self.frames.last()?;
        frame.steps.get(frame.index)
    }

    pub fn push_frame(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    pub fn pop_frame(&mut self) -> Option<Frame> {
        self.frames.pop()
    }

    /// Reset the top frame's cursor to its first step and bump its
    /// iteration/index counter, for loop/foreach re-entry.
    pub fn restart_top_frame(&mut self, new_kind: FrameKind) {
        if let Some(frame) = self.frames.last_mut() {
            frame.index = 0;
            frame.kind = new_kind;
        }
    }

    /// All locals currently in scope, outermost frame first, so inner
    /// frames' bindings shadow outer ones when merged into an eval [`Scope`].
    pub fn active_locals(&self) -> Vec<(&'static str, Value)> {
        self.frames.iter().flat_map(Frame::locals).collect()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}
