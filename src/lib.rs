//! workflow_eval: checkpointed, parallel evaluation of generated agent workflows.
//!
//! Test items flow through three layers (structure, execution, output
//! quality). Each layer is driven in resumable batches over a bounded worker
//! pool, with periodic checkpoints and a persisted results file.

pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod layers;
pub mod llm;
pub mod metrics;
pub mod pipeline;
pub mod progress;
pub mod scoring;
pub mod workflow;

pub use config::{ConfigError, EvaluationConfig};
pub use data::{load_test_data, ParameterSpec, TestItem};
pub use error::{ErrorDetails, EvalError, LlmError};
pub use pipeline::{EvaluationPipeline, FinalReport, LayerReport};
