//! Prometheus metrics for layer runs.
//!
//! # Example
//!
//! ```ignore
//! use workflow_eval::metrics::{export_metrics, init_metrics, MetricsCollector};
//!
//! init_metrics()?;
//! let collector = MetricsCollector::new();
//! collector.record_checkpoint(1);
//! let text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use self::collectors::MetricsCollector;
pub use self::prometheus::{export_metrics, init_metrics};
