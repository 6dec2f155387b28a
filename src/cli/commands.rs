//! CLI definition and command handling for workflow-eval.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::config::{parse_layers, EvaluationConfig};
use crate::data::load_test_data;
use crate::llm::{LiteLlmClient, LlmProvider};
use crate::metrics::{export_metrics, init_metrics};
use crate::pipeline::EvaluationPipeline;
use crate::workflow::{
    LlmWorkflowGenerator, SimulatedExecutor, SkeletonWorkflowGenerator, WorkflowGenerator,
};

/// File written by `--create-config`.
const SAMPLE_CONFIG_FILE: &str = "sample_config.json";

/// Workflow generator backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GeneratorKind {
    /// Ask an OpenAI-compatible LLM endpoint for the workflow graph.
    Llm,
    /// Deterministic offline generator.
    Skeleton,
}

/// Checkpointed, parallel evaluation of generated agent workflows.
#[derive(Parser, Debug)]
#[command(name = "workflow-eval")]
#[command(about = "Evaluate generated workflows across structure, execution and output quality")]
#[command(version)]
#[command(
    long_about = "workflow-eval runs generated workflows through three evaluation layers:\n  1. structure (generation + structure scoring)\n  2. execution (runs against synthesized inputs)\n  3. output quality (scores successful outputs)\n\nEach layer resumes from its latest checkpoint.\n\nExample usage:\n  workflow-eval --layers 1,2 --batch-size 5 --data-dir ./eval_data"
)]
pub struct Cli {
    /// Comma-separated layers to run, e.g. "1,2" or "3" (default 1,2,3).
    #[arg(short = 'l', long)]
    pub layers: Option<String>,

    /// Worker pool size per layer (0 = auto).
    #[arg(short = 'p', long)]
    pub max_processes: Option<usize>,

    /// Items per batch.
    #[arg(short = 'b', long)]
    pub batch_size: Option<usize>,

    /// Directory containing the *.json test items.
    #[arg(short = 'd', long)]
    pub data_dir: Option<PathBuf>,

    /// JSON file of configuration overrides.
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Workflow generator backend.
    #[arg(long, value_enum, default_value = "llm")]
    pub generator: GeneratorKind,

    /// Write Prometheus metrics to this file after the run.
    #[arg(long)]
    pub metrics_out: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,

    /// Print the effective configuration and test data count, then exit.
    #[arg(long)]
    pub dry_run: bool,

    /// Delete results and checkpoint files, then exit.
    #[arg(long)]
    pub clean: bool,

    /// List results and checkpoint files, then exit.
    #[arg(long)]
    pub status: bool,

    /// Write sample_config.json with the default settings, then exit.
    #[arg(long)]
    pub create_config: bool,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to read `log_level` before running the command.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Parse arguments and run.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    if cli.create_config {
        write_sample_config(Path::new(SAMPLE_CONFIG_FILE))?;
        println!("Sample configuration written to {}", SAMPLE_CONFIG_FILE);
        return Ok(());
    }

    let config = build_config(&cli)?;

    if cli.clean {
        let removed = clean_outputs(&config)?;
        println!("Removed {} result and checkpoint files", removed);
        return Ok(());
    }

    if cli.status {
        print_status(&config);
        return Ok(());
    }

    if cli.dry_run {
        print_dry_run(&config)?;
        return Ok(());
    }

    init_metrics().context("Failed to initialize metrics")?;

    let generator = build_generator(cli.generator, &config)?;
    let pipeline = EvaluationPipeline::new(config, generator, Arc::new(SimulatedExecutor::new()));
    pipeline
        .run_full_evaluation(None)
        .await
        .context("Evaluation pipeline failed")?;

    if let Some(path) = &cli.metrics_out {
        std::fs::write(path, export_metrics())
            .with_context(|| format!("Failed to write metrics to {}", path.display()))?;
        info!(path = %path.display(), "Metrics written");
    }

    println!("Evaluation pipeline completed successfully!");
    Ok(())
}

/// Defaults, then environment, then the overrides file, then CLI flags.
fn build_config(cli: &Cli) -> anyhow::Result<EvaluationConfig> {
    let mut config = EvaluationConfig::from_env()?;

    if let Some(path) = &cli.config {
        if path.exists() {
            config
                .apply_overrides_file(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?;
        } else {
            warn!(path = %path.display(), "Config file not found, using defaults");
        }
    }

    if let Some(layers) = &cli.layers {
        config.layers_to_run = parse_layers(layers)?;
    }
    if let Some(max) = cli.max_processes {
        config.max_processes = max;
    }
    if let Some(size) = cli.batch_size {
        config.batch_size = size;
    }
    if let Some(dir) = &cli.data_dir {
        config.eval_data_dir = dir.clone();
    }

    config.validate()?;
    Ok(config)
}

fn build_generator(
    kind: GeneratorKind,
    config: &EvaluationConfig,
) -> anyhow::Result<Arc<dyn WorkflowGenerator>> {
    match kind {
        GeneratorKind::Skeleton => {
            info!("Using offline skeleton workflow generator");
            Ok(Arc::new(SkeletonWorkflowGenerator))
        }
        GeneratorKind::Llm => {
            let client = LiteLlmClient::from_env(
                &config.evaluation_llm_model,
                config.llm_request_timeout,
            )
            .map_err(|e| {
                anyhow::anyhow!(
                    "Failed to initialize LLM client: {}. Set LITELLM_API_BASE or use --generator skeleton.",
                    e
                )
            })?;
            info!(model = %config.evaluation_llm_model, "Using LLM workflow generator");
            let provider: Arc<dyn LlmProvider> = Arc::new(client);
            Ok(Arc::new(LlmWorkflowGenerator::new(
                provider,
                config.evaluation_llm_model.clone(),
                config.evaluation_llm_temperature,
            )))
        }
    }
}

fn write_sample_config(path: &Path) -> anyhow::Result<()> {
    let sample = serde_json::to_string_pretty(&EvaluationConfig::default().to_snapshot())?;
    std::fs::write(path, sample)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

fn is_results_file(name: &str) -> bool {
    name.ends_with(".json")
        && ((name.starts_with("layer_") && name.ends_with("_evaluation.json"))
            || name.starts_with("comprehensive_evaluation_report_"))
}

fn is_checkpoint_file(name: &str) -> bool {
    name.starts_with("layer_") && name.contains("_checkpoint_") && name.ends_with(".json")
}

/// Files produced by earlier runs, with their sizes in bytes.
fn output_files(config: &EvaluationConfig) -> Vec<(PathBuf, u64)> {
    let scan = |dir: &Path, keep: fn(&str) -> bool| -> Vec<(PathBuf, u64)> {
        let mut files: Vec<(PathBuf, u64)> = WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| keep(&entry.file_name().to_string_lossy()))
            .map(|entry| {
                let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
                (entry.into_path(), size)
            })
            .collect();
        files.sort();
        files
    };

    let mut files = scan(&config.results_dir, is_results_file);
    files.extend(scan(&config.checkpoint_dir, is_checkpoint_file));
    files
}

fn clean_outputs(config: &EvaluationConfig) -> anyhow::Result<usize> {
    let files = output_files(config);
    for (path, _) in &files {
        std::fs::remove_file(path)
            .with_context(|| format!("Failed to remove {}", path.display()))?;
        info!(path = %path.display(), "Removed");
    }
    Ok(files.len())
}

fn print_status(config: &EvaluationConfig) {
    let files = output_files(config);
    if files.is_empty() {
        println!("No results or checkpoint files found");
        return;
    }
    for (path, size) in files {
        println!("{:>10}  {}", size, path.display());
    }
}

fn print_dry_run(config: &EvaluationConfig) -> anyhow::Result<()> {
    println!("Effective configuration:");
    println!("{}", serde_json::to_string_pretty(&config.to_snapshot())?);
    println!("Worker pool size: {}", config.effective_workers());

    match load_test_data(&config.eval_data_dir) {
        Ok(items) => println!("Test items found: {}", items.len()),
        Err(e) => println!("Test data unavailable: {}", e),
    }
    Ok(())
}
