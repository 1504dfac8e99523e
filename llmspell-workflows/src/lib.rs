//! ABOUTME: Pull-based workflow orchestration engine
//! ABOUTME: Drives an external AI agent through multi-step procedures via get_next_step/update_state

pub mod debug;
pub mod definition;
pub mod error;
pub mod executor;
pub mod expr;
pub mod processors;
pub mod queue;
pub mod registry;
pub mod state;
pub mod subagent;
pub mod transform;
pub mod value;

pub mod test_utils;

pub use definition::{
    FromPaths, InputDefinition, StepDescriptor, SubAgentTaskTemplate, TransformDescriptor, WorkflowDefinition,
};
pub use error::{FailureRecord, WorkflowError};
pub use executor::{GetNextStepResponse, TaskContext, WorkflowEngine, WorkflowInstance, WorkflowStatus};
pub use value::Value;
