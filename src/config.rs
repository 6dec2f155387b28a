//! Evaluation pipeline configuration.
//!
//! A single [`EvaluationConfig`] is constructed once (defaults, then
//! environment, then an optional JSON overrides file, then CLI flags) and
//! passed by reference into every component.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::pipeline::retry::RetryPolicy;

/// Memory budget assumed per worker when auto-sizing the pool.
const MEMORY_PER_WORKER_BYTES: u64 = 512 * 1024 * 1024;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable or override has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// IO error while reading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Overrides file is not valid JSON.
    #[error("Invalid overrides file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Configuration for a full evaluation run.
#[derive(Debug, Clone)]
pub struct EvaluationConfig {
    // Paths
    /// Directory holding the `*.json` test items.
    pub eval_data_dir: PathBuf,
    /// Directory for timestamped layer checkpoints.
    pub checkpoint_dir: PathBuf,
    /// Directory for layer results files and the final report.
    pub results_dir: PathBuf,

    // Parallelism
    /// Worker pool size per layer run. Zero means auto-size.
    pub max_processes: usize,
    /// Concurrent executions per workflow inside one batch (layer 2).
    pub max_threads_per_process: usize,
    /// Items per batch.
    pub batch_size: usize,

    // Retry and timeouts
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub retry_backoff_factor: f64,
    pub llm_request_timeout: Duration,
    pub workflow_execution_timeout: Duration,

    /// Layers to run, in ascending order.
    pub layers_to_run: Vec<u8>,

    // Evaluation LLM
    pub evaluation_llm_type: String,
    pub evaluation_llm_model: String,
    pub evaluation_llm_temperature: f64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            eval_data_dir: PathBuf::from("evaluation_pipeline/workflow_generation_eval_data"),
            checkpoint_dir: PathBuf::from("evaluation_pipeline/checkpoints"),
            results_dir: PathBuf::from("evaluation_pipeline/results"),

            max_processes: 4,
            max_threads_per_process: 2,
            batch_size: 10,

            max_retries: 3,
            retry_delay: Duration::from_secs(2),
            retry_backoff_factor: 2.0,
            llm_request_timeout: Duration::from_secs(60),
            workflow_execution_timeout: Duration::from_secs(300),

            layers_to_run: vec![1, 2, 3],

            evaluation_llm_type: "OpenAILLM".to_string(),
            evaluation_llm_model: "gpt-4o".to_string(),
            evaluation_llm_temperature: 0.7,
        }
    }
}

/// Partial configuration loaded from a JSON overrides file.
#[derive(Debug, Default, Deserialize)]
struct ConfigOverrides {
    eval_data_dir: Option<PathBuf>,
    checkpoint_dir: Option<PathBuf>,
    results_dir: Option<PathBuf>,
    max_processes: Option<usize>,
    max_threads_per_process: Option<usize>,
    batch_size: Option<usize>,
    max_retries: Option<u32>,
    retry_delay: Option<f64>,
    retry_backoff_factor: Option<f64>,
    llm_request_timeout: Option<f64>,
    workflow_execution_timeout: Option<f64>,
    layers_to_run: Option<Vec<u8>>,
    evaluation_llm_type: Option<String>,
    evaluation_llm_model: Option<String>,
    evaluation_llm_temperature: Option<f64>,
    #[serde(flatten)]
    unknown: serde_json::Map<String, Value>,
}

impl EvaluationConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables on top of defaults.
    ///
    /// # Environment Variables
    ///
    /// - `EVAL_MAX_PROCESSES`: Worker pool size (0 = auto)
    /// - `EVAL_MAX_THREADS`: Concurrent executions per workflow
    /// - `EVAL_BATCH_SIZE`: Items per batch
    /// - `EVAL_MAX_RETRIES`: Retry count for fallible operations
    /// - `EVAL_LAYERS`: Comma-separated layers, e.g. `1,2`
    /// - `EVAL_DATA_DIR`, `EVAL_CHECKPOINT_DIR`, `EVAL_RESULTS_DIR`: Paths
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("EVAL_MAX_PROCESSES") {
            config.max_processes = parse_env_value(&val, "EVAL_MAX_PROCESSES")?;
        }

        if let Ok(val) = std::env::var("EVAL_MAX_THREADS") {
            config.max_threads_per_process = parse_env_value(&val, "EVAL_MAX_THREADS")?;
        }

        if let Ok(val) = std::env::var("EVAL_BATCH_SIZE") {
            config.batch_size = parse_env_value(&val, "EVAL_BATCH_SIZE")?;
        }

        if let Ok(val) = std::env::var("EVAL_MAX_RETRIES") {
            config.max_retries = parse_env_value(&val, "EVAL_MAX_RETRIES")?;
        }

        if let Ok(val) = std::env::var("EVAL_LAYERS") {
            config.layers_to_run = parse_layers(&val)?;
        }

        if let Ok(val) = std::env::var("EVAL_DATA_DIR") {
            config.eval_data_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("EVAL_CHECKPOINT_DIR") {
            config.checkpoint_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("EVAL_RESULTS_DIR") {
            config.results_dir = PathBuf::from(val);
        }

        Ok(config)
    }

    /// Applies a JSON object of field overrides. Unknown keys are ignored.
    pub fn apply_overrides_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let content = std::fs::read_to_string(path)?;
        self.apply_overrides_json(&content)
    }

    fn apply_overrides_json(&mut self, content: &str) -> Result<(), ConfigError> {
        let overrides: ConfigOverrides = serde_json::from_str(content)?;

        for key in overrides.unknown.keys() {
            warn!(key = %key, "Ignoring unknown configuration key");
        }

        if let Some(v) = overrides.eval_data_dir {
            self.eval_data_dir = v;
        }
        if let Some(v) = overrides.checkpoint_dir {
            self.checkpoint_dir = v;
        }
        if let Some(v) = overrides.results_dir {
            self.results_dir = v;
        }
        if let Some(v) = overrides.max_processes {
            self.max_processes = v;
        }
        if let Some(v) = overrides.max_threads_per_process {
            self.max_threads_per_process = v;
        }
        if let Some(v) = overrides.batch_size {
            self.batch_size = v;
        }
        if let Some(v) = overrides.max_retries {
            self.max_retries = v;
        }
        if let Some(v) = overrides.retry_delay {
            self.retry_delay = seconds("retry_delay", v)?;
        }
        if let Some(v) = overrides.retry_backoff_factor {
            self.retry_backoff_factor = v;
        }
        if let Some(v) = overrides.llm_request_timeout {
            self.llm_request_timeout = seconds("llm_request_timeout", v)?;
        }
        if let Some(v) = overrides.workflow_execution_timeout {
            self.workflow_execution_timeout = seconds("workflow_execution_timeout", v)?;
        }
        if let Some(v) = overrides.layers_to_run {
            self.layers_to_run = v;
        }
        if let Some(v) = overrides.evaluation_llm_type {
            self.evaluation_llm_type = v;
        }
        if let Some(v) = overrides.evaluation_llm_model {
            self.evaluation_llm_model = v;
        }
        if let Some(v) = overrides.evaluation_llm_temperature {
            self.evaluation_llm_temperature = v;
        }

        Ok(())
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::ValidationFailed(
                "batch_size must be greater than 0".to_string(),
            ));
        }

        if self.max_threads_per_process == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_threads_per_process must be greater than 0".to_string(),
            ));
        }

        if self.layers_to_run.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "layers_to_run cannot be empty".to_string(),
            ));
        }

        if let Some(layer) = self.layers_to_run.iter().find(|l| !(1..=3).contains(*l)) {
            return Err(ConfigError::ValidationFailed(format!(
                "layers_to_run contains unknown layer {}",
                layer
            )));
        }

        if self.retry_backoff_factor < 1.0 {
            return Err(ConfigError::ValidationFailed(
                "retry_backoff_factor must be at least 1.0".to_string(),
            ));
        }

        if self.llm_request_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "llm_request_timeout must be greater than 0".to_string(),
            ));
        }

        if self.workflow_execution_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "workflow_execution_timeout must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=2.0).contains(&self.evaluation_llm_temperature) {
            return Err(ConfigError::ValidationFailed(
                "evaluation_llm_temperature must be between 0.0 and 2.0".to_string(),
            ));
        }

        if self.evaluation_llm_model.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "evaluation_llm_model cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Worker pool size for a layer run, auto-sizing when `max_processes` is 0.
    pub fn effective_workers(&self) -> usize {
        if self.max_processes == 0 {
            optimal_worker_count()
        } else {
            self.max_processes
        }
    }

    /// Default retry policy built from the configured base values.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.retry_delay)
            .with_backoff_factor(self.retry_backoff_factor)
    }

    /// JSON view of the configuration for report metadata.
    pub fn to_snapshot(&self) -> Value {
        json!({
            "eval_data_dir": self.eval_data_dir.display().to_string(),
            "checkpoint_dir": self.checkpoint_dir.display().to_string(),
            "results_dir": self.results_dir.display().to_string(),
            "max_processes": self.max_processes,
            "max_threads_per_process": self.max_threads_per_process,
            "batch_size": self.batch_size,
            "max_retries": self.max_retries,
            "retry_delay": self.retry_delay.as_secs_f64(),
            "retry_backoff_factor": self.retry_backoff_factor,
            "llm_request_timeout": self.llm_request_timeout.as_secs_f64(),
            "workflow_execution_timeout": self.workflow_execution_timeout.as_secs_f64(),
            "layers_to_run": self.layers_to_run,
            "evaluation_llm_type": self.evaluation_llm_type,
            "evaluation_llm_model": self.evaluation_llm_model,
            "evaluation_llm_temperature": self.evaluation_llm_temperature,
        })
    }

    /// Builder method to set the data directory.
    pub fn with_eval_data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.eval_data_dir = path.into();
        self
    }

    /// Builder method to set the checkpoint directory.
    pub fn with_checkpoint_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint_dir = path.into();
        self
    }

    /// Builder method to set the results directory.
    pub fn with_results_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.results_dir = path.into();
        self
    }

    /// Builder method to set the worker pool size.
    pub fn with_max_processes(mut self, max: usize) -> Self {
        self.max_processes = max;
        self
    }

    /// Builder method to set the per-workflow execution concurrency.
    pub fn with_max_threads_per_process(mut self, max: usize) -> Self {
        self.max_threads_per_process = max;
        self
    }

    /// Builder method to set the batch size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Builder method to set the retry count.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Builder method to set the retry base delay.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Builder method to set the layers to run.
    pub fn with_layers(mut self, layers: Vec<u8>) -> Self {
        self.layers_to_run = layers;
        self
    }

    /// Builder method to set the per-execution deadline.
    pub fn with_workflow_execution_timeout(mut self, timeout: Duration) -> Self {
        self.workflow_execution_timeout = timeout;
        self
    }

    /// Builder method to set the evaluation model.
    pub fn with_evaluation_llm_model(mut self, model: impl Into<String>) -> Self {
        self.evaluation_llm_model = model.into();
        self
    }
}

/// Parses a comma-separated layer list such as `"1,3"`.
pub fn parse_layers(value: &str) -> Result<Vec<u8>, ConfigError> {
    let mut layers = value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| parse_env_value::<u8>(s, "layers"))
        .collect::<Result<Vec<_>, _>>()?;
    layers.sort_unstable();
    layers.dedup();
    Ok(layers)
}

/// Worker count from 75% of the CPUs, capped by available memory.
pub fn optimal_worker_count() -> usize {
    let cpus = num_cpus::get().max(1);
    let by_cpu = (cpus * 3 / 4).max(1);
    let by_memory = available_memory_bytes()
        .map(|bytes| (bytes / MEMORY_PER_WORKER_BYTES) as usize)
        .unwrap_or(cpus);

    let workers = by_cpu.min(by_memory).min(cpus).max(1);
    debug!(cpus, by_cpu, by_memory, workers, "Auto-sized worker pool");
    workers
}

fn available_memory_bytes() -> Option<u64> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    parse_mem_available(&meminfo)
}

/// Extracts `MemAvailable` (in bytes) from `/proc/meminfo` content.
fn parse_mem_available(meminfo: &str) -> Option<u64> {
    meminfo
        .lines()
        .find(|line| line.starts_with("MemAvailable:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb * 1024)
}

fn seconds(key: &str, value: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(value).map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EvaluationConfig::default();
        assert_eq!(config.max_processes, 4);
        assert_eq!(config.max_threads_per_process, 2);
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay, Duration::from_secs(2));
        assert_eq!(config.llm_request_timeout, Duration::from_secs(60));
        assert_eq!(config.workflow_execution_timeout, Duration::from_secs(300));
        assert_eq!(config.layers_to_run, vec![1, 2, 3]);
        assert_eq!(config.evaluation_llm_model, "gpt-4o");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = EvaluationConfig::new()
            .with_eval_data_dir("/tmp/data")
            .with_checkpoint_dir("/tmp/ckpt")
            .with_results_dir("/tmp/results")
            .with_max_processes(8)
            .with_batch_size(5)
            .with_max_retries(1)
            .with_layers(vec![2]);

        assert_eq!(config.eval_data_dir, PathBuf::from("/tmp/data"));
        assert_eq!(config.checkpoint_dir, PathBuf::from("/tmp/ckpt"));
        assert_eq!(config.results_dir, PathBuf::from("/tmp/results"));
        assert_eq!(config.max_processes, 8);
        assert_eq!(config.batch_size, 5);
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.layers_to_run, vec![2]);
    }

    #[test]
    fn test_validation_zero_batch_size() {
        let result = EvaluationConfig::default().with_batch_size(0).validate();
        assert!(result.unwrap_err().to_string().contains("batch_size"));
    }

    #[test]
    fn test_validation_unknown_layer() {
        let result = EvaluationConfig::default().with_layers(vec![1, 4]).validate();
        assert!(result.unwrap_err().to_string().contains("unknown layer 4"));
    }

    #[test]
    fn test_validation_empty_layers() {
        let result = EvaluationConfig::default().with_layers(vec![]).validate();
        assert!(result.unwrap_err().to_string().contains("layers_to_run"));
    }

    #[test]
    fn test_validation_zero_execution_timeout() {
        let result = EvaluationConfig::default()
            .with_workflow_execution_timeout(Duration::ZERO)
            .validate();
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("workflow_execution_timeout"));
    }

    #[test]
    fn test_validation_empty_model() {
        let result = EvaluationConfig::default()
            .with_evaluation_llm_model("")
            .validate();
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_layers() {
        assert_eq!(parse_layers("1,2,3").unwrap(), vec![1, 2, 3]);
        assert_eq!(parse_layers(" 3, 1 ").unwrap(), vec![1, 3]);
        assert_eq!(parse_layers("2,2").unwrap(), vec![2]);
        assert!(parse_layers("1,x").is_err());
    }

    #[test]
    fn test_apply_overrides_json() {
        let mut config = EvaluationConfig::default();
        config
            .apply_overrides_json(
                r#"{"batch_size": 3, "retry_delay": 0.5, "layers_to_run": [1, 2], "bogus": true}"#,
            )
            .unwrap();

        assert_eq!(config.batch_size, 3);
        assert_eq!(config.retry_delay, Duration::from_millis(500));
        assert_eq!(config.layers_to_run, vec![1, 2]);
        assert_eq!(config.max_processes, 4);
    }

    #[test]
    fn test_apply_overrides_rejects_negative_duration() {
        let mut config = EvaluationConfig::default();
        let err = config
            .apply_overrides_json(r#"{"retry_delay": -1.0}"#)
            .unwrap_err();
        assert!(err.to_string().contains("retry_delay"));
    }

    #[test]
    fn test_apply_overrides_invalid_json() {
        let mut config = EvaluationConfig::default();
        assert!(matches!(
            config.apply_overrides_json("not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_parse_mem_available() {
        let meminfo = "MemTotal:       16318412 kB\nMemFree:         1234 kB\nMemAvailable:    2097152 kB\n";
        assert_eq!(parse_mem_available(meminfo), Some(2097152 * 1024));
        assert_eq!(parse_mem_available("MemTotal: 1 kB\n"), None);
    }

    #[test]
    fn test_effective_workers_auto() {
        let config = EvaluationConfig::default().with_max_processes(0);
        let workers = config.effective_workers();
        assert!(workers >= 1);
        assert!(workers <= num_cpus::get().max(1));

        let fixed = EvaluationConfig::default().with_max_processes(6);
        assert_eq!(fixed.effective_workers(), 6);
    }

    #[test]
    fn test_snapshot_contains_fields() {
        let snapshot = EvaluationConfig::default().to_snapshot();
        assert_eq!(snapshot["batch_size"], 10);
        assert_eq!(snapshot["layers_to_run"], json!([1, 2, 3]));
        assert_eq!(snapshot["evaluation_llm_type"], "OpenAILLM");
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::InvalidValue {
            key: "KEY".to_string(),
            message: "bad value".to_string(),
        };
        assert!(err.to_string().contains("KEY"));
        assert!(err.to_string().contains("bad value"));

        let err = ConfigError::ValidationFailed("test failure".to_string());
        assert!(err.to_string().contains("test failure"));
    }
}
