//! ABOUTME: Error taxonomy for the workflow engine (see spec §7)
//! ABOUTME: Distinguishes call-level errors from instance-fatal ones

use serde::Serialize;
use thiserror::Error;

/// Engine-level error taxonomy. One variant per row of the error table.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum WorkflowError {
    #[error("unknown workflow: {0}")]
    UnknownWorkflow(String),

    #[error("unknown step kind: {0}")]
    UnknownStepKind(String),

    #[error("malformed step '{step}': {message}")]
    MalformedStep { step: String, message: String },

    #[error("expression error in step '{step}': {message}")]
    ExpressionError { step: String, message: String },

    #[error("transform error for computed field '{field}': {message}")]
    TransformError { field: String, message: String },

    #[error("state path '{0}' is not under state.*")]
    BadStatePath(String),

    #[error("while_loop '{step}' exceeded max_iterations ({max})")]
    LoopBudgetExhausted { step: String, max: u32 },

    #[error("server drain budget exhausted after {0} steps")]
    ServerDrainBudgetExhausted(usize),

    #[error("sub-agent task '{0}' failed")]
    SubAgentFailed(String),

    #[error("workflow cancelled")]
    Cancelled,

    #[error("computed dependency graph contains a cycle: {0}")]
    CyclicComputedDag(String),

    #[error("unknown sub-agent task '{0}'")]
    UnknownSubAgentTask(String),
}

impl WorkflowError {
    /// Stable string code surfaced in RPC responses (spec §7).
    pub fn code(&self) -> &'static str {
        match self {
            WorkflowError::UnknownWorkflow(_) => "UnknownWorkflow",
            WorkflowError::UnknownStepKind(_) => "UnknownStepKind",
            WorkflowError::MalformedStep { .. } => "MalformedStep",
            WorkflowError::ExpressionError { .. } => "ExpressionError",
            WorkflowError::TransformError { .. } => "TransformError",
            WorkflowError::BadStatePath(_) => "BadStatePath",
            WorkflowError::LoopBudgetExhausted { .. } => "LoopBudgetExhausted",
            WorkflowError::ServerDrainBudgetExhausted(_) => "ServerDrainBudgetExhausted",
            WorkflowError::SubAgentFailed(_) => "SubAgentFailed",
            WorkflowError::Cancelled => "Cancelled",
            WorkflowError::CyclicComputedDag(_) => "CyclicComputedDag",
            WorkflowError::UnknownSubAgentTask(_) => "UnknownSubAgentTask",
        }
    }

    /// Per spec §4.9/§7: definition errors, drain/loop budget exhaustion,
    /// computed-graph cycles and bad `state_update` *step* paths are fatal
    /// to the instance. `BadStatePath` arriving via the `update_state` RPC
    /// (a "call", not a step) is call-level only — the executor decides
    /// that distinction at the call site since this type can't see which
    /// channel produced the error.
    pub fn is_fatal_to_instance(&self) -> bool {
        !matches!(
            self,
            WorkflowError::UnknownWorkflow(_) | WorkflowError::BadStatePath(_)
        )
    }
}

impl From<WorkflowError> for llmspell_core::LLMSpellError {
    fn from(err: WorkflowError) -> Self {
        llmspell_core::LLMSpellError::Workflow {
            message: err.to_string(),
            step: None,
            source: Some(Box::new(err)),
        }
    }
}

/// Structured error record attached to a failed [`crate::executor::WorkflowInstance`]
/// and returned verbatim on every subsequent call, per spec §4.9.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FailureRecord {
    pub code: String,
    pub message: String,
    pub step_id: Option<String>,
    pub details: Option<serde_json::Value>,
}

impl FailureRecord {
    pub fn from_error(err: &WorkflowError, step_id: Option<String>) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
            step_id,
            details: None,
        }
    }
}
