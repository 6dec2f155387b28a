//! Command-line interface for workflow-eval.
//!
//! Provides the evaluation run plus the dry-run, status, clean and
//! sample-config operations.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, GeneratorKind};
