//! Error types for workflow evaluation.
//!
//! Defines the error enums shared across the pipeline:
//! - [`EvalError`] for item-level and pipeline-level failures
//! - [`LlmError`] for the LLM transport
//!
//! Item-level failures never escape a batch. They are captured as
//! [`ErrorDetails`] records and persisted alongside the layer results, with a
//! stable kind name and an expected/unexpected classification used for error
//! rate reporting.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ConfigError;
use crate::pipeline::checkpoint::CheckpointError;

/// Kind names classified as expected (bad input, missing keys, type mismatches).
pub const EXPECTED_ERROR_KINDS: &[&str] = &["ValueError", "KeyError", "AttributeError", "TypeError"];

/// Errors produced while evaluating workflows.
#[derive(Debug, Error)]
pub enum EvalError {
    /// Malformed or missing input value.
    #[error("{0}")]
    InvalidValue(String),

    /// A required key is absent from an input map.
    #[error("Missing key: {0}")]
    MissingKey(String),

    /// A value has the wrong shape or type.
    #[error("{0}")]
    TypeMismatch(String),

    /// A required field is absent from a structured record.
    #[error("Missing field: {0}")]
    MissingField(String),

    /// The workflow generator could not produce a graph.
    #[error("{0}")]
    GenerationFailed(String),

    /// The execution engine failed to run a workflow.
    #[error("Workflow execution failed: {0}")]
    ExecutionFailed(String),

    /// An operation exceeded its deadline.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A batch worker task panicked or was cancelled.
    #[error("Batch worker failed: {0}")]
    WorkerPanic(String),

    /// Pipeline-level failure that aborts a stage or the whole run.
    #[error("{0}")]
    Pipeline(String),
}

impl EvalError {
    /// Stable kind name persisted in error records.
    pub fn kind(&self) -> &'static str {
        match self {
            EvalError::InvalidValue(_) => "ValueError",
            EvalError::MissingKey(_) => "KeyError",
            EvalError::TypeMismatch(_) => "TypeError",
            EvalError::MissingField(_) => "AttributeError",
            EvalError::GenerationFailed(_) => "WorkflowGenerationFailed",
            EvalError::ExecutionFailed(_) => "WorkflowExecutionFailed",
            EvalError::Timeout(_) => "TimeoutError",
            EvalError::Llm(_) => "LlmError",
            EvalError::Io(_) => "IoError",
            EvalError::Json(_) => "JsonError",
            EvalError::Checkpoint(_) => "CheckpointError",
            EvalError::Config(_) => "ConfigError",
            EvalError::WorkerPanic(_) => "WorkerPanic",
            EvalError::Pipeline(_) => "InternalError",
        }
    }

    /// Whether this error belongs to the expected (input-quality) bucket.
    pub fn is_expected(&self) -> bool {
        EXPECTED_ERROR_KINDS.contains(&self.kind())
    }
}

/// Errors that can occur during LLM API interactions.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API base URL: LITELLM_API_BASE environment variable not set")]
    MissingApiBase,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },
}

/// Structured record of a captured failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetails {
    #[serde(rename = "type")]
    pub error_type: String,
    pub module: String,
    pub message: String,
    #[serde(default)]
    pub traceback: String,
    pub timestamp: String,
    pub is_expected: bool,
    /// Set when the error was captured at the batch boundary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_id: Option<String>,
}

impl ErrorDetails {
    /// Capture an error raised inside `module`.
    pub fn capture(err: &EvalError, module: &str) -> Self {
        let mut chain = vec![format!("{}: {}", err.kind(), err)];
        let mut source = std::error::Error::source(err);
        while let Some(cause) = source {
            chain.push(format!("caused by: {}", cause));
            source = cause.source();
        }

        Self {
            error_type: err.kind().to_string(),
            module: module.to_string(),
            message: err.to_string(),
            traceback: chain.join("\n"),
            timestamp: chrono::Utc::now().to_rfc3339(),
            is_expected: err.is_expected(),
            test_id: None,
        }
    }

    /// Prefix the message with context while keeping the original kind.
    pub fn with_context(mut self, context: impl AsRef<str>) -> Self {
        self.message = format!("{}: {}", context.as_ref(), self.message);
        self
    }

    pub fn with_test_id(mut self, test_id: impl Into<String>) -> Self {
        self.test_id = Some(test_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_kinds() {
        assert!(EvalError::InvalidValue("bad".into()).is_expected());
        assert!(EvalError::MissingKey("k".into()).is_expected());
        assert!(EvalError::TypeMismatch("t".into()).is_expected());
        assert!(EvalError::MissingField("f".into()).is_expected());

        assert!(!EvalError::ExecutionFailed("boom".into()).is_expected());
        assert!(!EvalError::Timeout(Duration::from_secs(1)).is_expected());
        assert!(!EvalError::WorkerPanic("panic".into()).is_expected());
    }

    #[test]
    fn test_capture_preserves_kind_and_message() {
        let err = EvalError::InvalidValue("No workflow JSON found in test data".into());
        let details = ErrorDetails::capture(&err, "workflow_eval::layers::execution");

        assert_eq!(details.error_type, "ValueError");
        assert_eq!(details.message, "No workflow JSON found in test data");
        assert_eq!(details.module, "workflow_eval::layers::execution");
        assert!(details.is_expected);
        assert!(details.test_id.is_none());
        assert!(details.traceback.starts_with("ValueError"));
    }

    #[test]
    fn test_capture_includes_source_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = EvalError::Checkpoint(CheckpointError::Io(io));
        let details = ErrorDetails::capture(&err, "test");

        assert_eq!(details.error_type, "CheckpointError");
        assert!(details.traceback.contains("caused by"));
    }

    #[test]
    fn test_with_context_and_test_id() {
        let err = EvalError::InvalidValue("goal is empty".into());
        let details = ErrorDetails::capture(&err, "test")
            .with_context("Failed to generate workflow for wf-1")
            .with_test_id("wf-1");

        assert_eq!(details.message, "Failed to generate workflow for wf-1: goal is empty");
        assert_eq!(details.error_type, "ValueError");
        assert_eq!(details.test_id.as_deref(), Some("wf-1"));
    }

    #[test]
    fn test_error_details_serializes_type_field() {
        let details = ErrorDetails::capture(&EvalError::MissingKey("x".into()), "m");
        let json = serde_json::to_value(&details).expect("serialize");
        assert_eq!(json["type"], "KeyError");
        assert!(json.get("test_id").is_none());
    }

    #[test]
    fn test_execution_failed_display() {
        let err = EvalError::ExecutionFailed("engine crashed".into());
        assert_eq!(err.to_string(), "Workflow execution failed: engine crashed");
    }
}
