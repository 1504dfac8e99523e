//! ABOUTME: Error types and handling for rs-llmspell
//! ABOUTME: Provides LLMSpellError enum and Result type alias

use thiserror::Error;

/// Comprehensive error enum shared across the workspace.
///
/// Individual crates (e.g. `llmspell-workflows`) generally define a more
/// focused error enum for their own domain and convert into this one at
/// the crate boundary, rather than matching on these variants directly.
#[derive(Debug, Error)]
pub enum LLMSpellError {
    #[error("Component error: {message}")]
    Component { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Workflow execution error: {message}")]
    Workflow {
        message: String,
        step: Option<String>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Storage error: {message}")]
    Storage {
        message: String,
        operation: Option<String>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Convenience Result type alias
pub type Result<T> = std::result::Result<T, LLMSpellError>;
