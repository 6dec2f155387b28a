//! The three evaluation layers.
//!
//! Each layer implements [`LayerEvaluator`](crate::pipeline::LayerEvaluator)
//! and consumes the successful records of the layer before it:
//!
//! - [`StructureEvaluator`]: test item -> generated workflow + structure scores
//! - [`ExecutionEvaluator`]: structure record -> execution runs + statistics
//! - [`OutputQualityEvaluator`]: execution record -> aggregated quality scores

pub mod execution;
pub mod output_quality;
pub mod structure;

pub use execution::{
    analyze_errors, compute_statistics, generate_test_inputs, sample_value, ErrorAnalysis,
    ErrorTypeStats, ExecutionAttempt, ExecutionEvaluator, ExecutionRecord, ExecutionStatistics,
};
pub use output_quality::{
    aggregate_evaluations, AggregatedScore, OutputEvaluation, OutputQualityEvaluator,
    OutputRecord, OverallEvaluation,
};
pub use structure::{StructureEvaluator, StructureRecord};
