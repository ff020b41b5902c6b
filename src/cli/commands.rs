//! CLI command definitions for promptforge.
//!
//! Every command builds an orchestrator from environment configuration,
//! performs one operation, and prints the result as JSON. Business
//! logic lives in the library; this module is glue only.

use std::path::Path;
use std::time::Duration;

use clap::Parser;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::orchestrator::{Orchestrator, OptimizationRequest, RequestPriority};
use crate::template::{FsTemplateStore, Template, TemplateStore};
use crate::types::OptimizationConfig;

/// Default directory holding template JSON files.
const DEFAULT_TEMPLATES_DIR: &str = "./templates";

/// Prompt template optimization orchestrator.
#[derive(Parser)]
#[command(name = "promptforge")]
#[command(about = "Optimize prompt templates through a remote optimization engine")]
#[command(version)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Optimize a single template and print the result.
    #[command(alias = "opt")]
    Optimize(OptimizeArgs),

    /// Optimize every template in a directory.
    Batch(BatchArgs),

    /// Look up the status of an optimization job.
    Status(StatusArgs),

    /// Print cache and queue counters.
    Stats,

    /// Check whether the optimization engine is reachable.
    Health,
}

/// Arguments for `promptforge optimize`.
#[derive(Parser, Debug)]
pub struct OptimizeArgs {
    /// Template name (resolved to <name>.json under the templates dir).
    pub template: String,

    /// Directory containing template JSON files.
    #[arg(short = 'd', long, default_value = DEFAULT_TEMPLATES_DIR)]
    pub templates_dir: String,

    /// Optimization task description sent to the engine.
    #[arg(short, long)]
    pub task: String,

    /// Target model for the optimized template.
    #[arg(short, long)]
    pub model: Option<String>,

    /// Number of optimization iterations.
    #[arg(short, long)]
    pub iterations: Option<u32>,

    /// Request priority (low, normal, high, critical).
    #[arg(short, long, default_value = "normal")]
    pub priority: String,

    /// Bypass the result cache.
    #[arg(long)]
    pub skip_cache: bool,

    /// Per-request timeout in seconds.
    #[arg(long)]
    pub timeout_secs: Option<u64>,
}

/// Arguments for `promptforge batch`.
#[derive(Parser, Debug)]
pub struct BatchArgs {
    /// Directory containing template JSON files.
    #[arg(short = 'd', long, default_value = DEFAULT_TEMPLATES_DIR)]
    pub templates_dir: String,

    /// Optimization task description applied to every template.
    #[arg(short, long)]
    pub task: String,

    /// Target model for the optimized templates.
    #[arg(short, long)]
    pub model: Option<String>,

    /// Comma-separated template names; all templates when omitted.
    #[arg(long)]
    pub templates: Option<String>,

    /// Request priority (low, normal, high, critical).
    #[arg(short, long, default_value = "normal")]
    pub priority: String,
}

/// Arguments for `promptforge status`.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Job id to look up.
    pub job_id: Uuid,
}

/// Parse CLI arguments without executing commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Optimize(args) => run_optimize_command(args).await?,
        Commands::Batch(args) => run_batch_command(args).await?,
        Commands::Status(args) => run_status_command(args).await?,
        Commands::Stats => run_stats_command().await?,
        Commands::Health => run_health_command().await?,
    }
    Ok(())
}

fn parse_priority(value: &str) -> anyhow::Result<RequestPriority> {
    match value.to_lowercase().as_str() {
        "low" => Ok(RequestPriority::Low),
        "normal" => Ok(RequestPriority::Normal),
        "high" => Ok(RequestPriority::High),
        "critical" => Ok(RequestPriority::Critical),
        other => anyhow::bail!("unknown priority '{other}' (expected low, normal, high, critical)"),
    }
}

fn load_template(store: &FsTemplateStore, name: &str) -> anyhow::Result<Template> {
    let path = store
        .find_template(name)
        .ok_or_else(|| anyhow::anyhow!("template '{name}' not found in {:?}", store.root()))?;
    Ok(store.load_template(&path)?)
}

fn build_config(task: &str, model: Option<&str>, iterations: Option<u32>) -> OptimizationConfig {
    let mut config = OptimizationConfig::new(task);
    if let Some(model) = model {
        config = config.with_target_model(model);
    }
    if let Some(iterations) = iterations {
        config = config.with_iterations(iterations);
    }
    config
}

async fn run_optimize_command(args: OptimizeArgs) -> anyhow::Result<()> {
    let priority = parse_priority(&args.priority)?;
    let store = FsTemplateStore::new(Path::new(&args.templates_dir));
    let template = load_template(&store, &args.template)?;

    let orchestrator = Orchestrator::from_env()?;
    let config = build_config(&args.task, args.model.as_deref(), args.iterations);

    let mut request = OptimizationRequest::new(template, config).with_priority(priority);
    if args.skip_cache {
        request = request.skip_cache();
    }
    if let Some(secs) = args.timeout_secs {
        request = request.with_timeout(Duration::from_secs(secs));
    }

    info!(template = %args.template, "Submitting optimization request");
    let result = orchestrator.optimize_template(request).await;
    orchestrator.cleanup().await;

    let result = result?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn run_batch_command(args: BatchArgs) -> anyhow::Result<()> {
    let priority = parse_priority(&args.priority)?;
    let store = FsTemplateStore::new(Path::new(&args.templates_dir));

    let names: Vec<String> = match &args.templates {
        Some(list) => list.split(',').map(|s| s.trim().to_string()).collect(),
        None => store
            .list_templates()?
            .into_iter()
            .map(|info| info.id)
            .collect(),
    };
    anyhow::ensure!(!names.is_empty(), "no templates to optimize");

    let orchestrator = Orchestrator::from_env()?;
    let requests = names
        .iter()
        .map(|name| {
            let template = load_template(&store, name)?;
            let config = build_config(&args.task, args.model.as_deref(), None);
            Ok(OptimizationRequest::new(template, config).with_priority(priority))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    info!(count = requests.len(), "Submitting batch");
    let batch = orchestrator.batch_optimize(requests).await;
    orchestrator.cleanup().await;

    println!("{}", serde_json::to_string_pretty(&batch)?);
    Ok(())
}

async fn run_status_command(args: StatusArgs) -> anyhow::Result<()> {
    let orchestrator = Orchestrator::from_env()?;
    let status = orchestrator.get_optimization_status(args.job_id).await;
    orchestrator.cleanup().await;

    match status? {
        Some(status) => println!("{}", serde_json::to_string_pretty(&status)?),
        None => {
            println!("{}", json!({ "job_id": args.job_id, "found": false }));
        }
    }
    Ok(())
}

async fn run_stats_command() -> anyhow::Result<()> {
    let orchestrator = Orchestrator::from_env()?;
    let output = json!({
        "cache": orchestrator.cache_stats(),
        "queue": orchestrator.queue_stats(),
    });
    orchestrator.cleanup().await;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn run_health_command() -> anyhow::Result<()> {
    let orchestrator = Orchestrator::from_env()?;
    let healthy = orchestrator.engine_healthy().await;
    orchestrator.cleanup().await;

    println!("{}", json!({ "engine_healthy": healthy }));
    if !healthy {
        anyhow::bail!("optimization engine is not reachable");
    }
    Ok(())
}
