//! ABOUTME: Shared foundation types for rs-llmspell-style crates
//! ABOUTME: Currently just the workspace-wide error/result types

pub mod error;

pub use error::{LLMSpellError, Result};
