//! Checkpointed, parallel layer execution.
//!
//! - [`batch`]: contiguous batch splitting
//! - [`checkpoint`]: timestamped checkpoints and per-layer results files
//! - [`results`]: batch/layer result containers and the additive merge
//! - [`retry`]: bounded exponential backoff for sync and async calls
//! - [`driver`]: the resume/dispatch/checkpoint state machine shared by all layers
//! - [`coordinator`]: sequences the layers and builds the final report

pub mod batch;
pub mod checkpoint;
pub mod coordinator;
pub mod driver;
pub mod results;
pub mod retry;

pub use batch::split_batches;
pub use checkpoint::{file_stamp, results_file_name, CheckpointError, CheckpointStore};
pub use coordinator::{
    generate_recommendations, EvaluationMetadata, EvaluationPipeline, FinalReport, LayerResults,
    OverallSummary,
};
pub use driver::{evaluate_batch, LayerDriver, LayerEvaluator};
pub use results::{merge_results, BatchResult, LayerRecord, LayerReport, Summary};
pub use retry::RetryPolicy;
