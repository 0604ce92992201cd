//! `waypoint` — run and inspect DOT-described pipelines.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};

use waypoint_engine::{
    validate, AutoApproveInterviewer, ConsoleInterviewer, Engine, EventEmitter, HandlerRegistry,
    Interviewer, PipelineEvent, Severity,
};

#[derive(Parser)]
#[command(name = "waypoint", version, about = "Graph-driven pipeline runner")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline from a .dot file
    Run {
        /// Path to the pipeline .dot file
        pipeline: PathBuf,

        /// Logs output directory (default: .waypoint/logs/run_<timestamp>)
        #[arg(short, long)]
        logs: Option<PathBuf>,

        /// Working directory exposed to tool nodes
        #[arg(short, long)]
        workdir: Option<PathBuf>,

        /// Answer human gates automatically with their default choice
        #[arg(long)]
        auto_approve: bool,
    },

    /// Validate a pipeline .dot file and print diagnostics
    Validate {
        /// Path to the pipeline .dot file
        pipeline: PathBuf,
    },

    /// Show a summary of a pipeline
    Info {
        /// Path to the pipeline .dot file
        pipeline: PathBuf,
    },
}

fn load_graph(path: &Path) -> anyhow::Result<waypoint_engine::Graph> {
    let source = std::fs::read_to_string(path)?;
    let ast = waypoint_dot::parse(&source)?;
    Ok(waypoint_engine::Graph::from_ast(ast))
}

fn default_logs_root() -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    PathBuf::from(".waypoint/logs").join(format!("run_{stamp}"))
}

fn describe_event(event: &PipelineEvent) {
    match event {
        PipelineEvent::PipelineStarted { name, .. } => println!("pipeline '{name}' started"),
        PipelineEvent::StageStarted { node_id, handler, .. } => {
            println!("  stage {node_id} [{handler}]")
        }
        PipelineEvent::StageRetrying { node_id, attempt, .. } => {
            println!("  stage {node_id} retrying (attempt {attempt})")
        }
        PipelineEvent::StageFailed { node_id, error, .. } => {
            println!("  stage {node_id} failed: {error}")
        }
        PipelineEvent::InterviewTimeout { node_id } => {
            println!("  interview at {node_id} timed out")
        }
        PipelineEvent::PipelineCompleted { duration_ms, stage_count } => {
            println!("pipeline completed: {stage_count} stages in {duration_ms}ms")
        }
        PipelineEvent::PipelineFailed { error, .. } => println!("pipeline failed: {error}"),
        _ => {}
    }
}

async fn cmd_run(
    pipeline: &Path,
    logs: Option<PathBuf>,
    workdir: Option<PathBuf>,
    auto_approve: bool,
) -> anyhow::Result<i32> {
    let graph = load_graph(pipeline)?;
    let logs_root = logs.unwrap_or_else(default_logs_root);

    println!("running pipeline: {}", graph.name);
    if !graph.goal().is_empty() {
        println!("goal: {}", graph.goal());
    }
    println!("logs: {}", logs_root.display());

    let emitter = EventEmitter::new();
    emitter.register(|event: &PipelineEvent| describe_event(event));

    let interviewer: Arc<dyn Interviewer> = if auto_approve {
        Arc::new(AutoApproveInterviewer)
    } else {
        Arc::new(ConsoleInterviewer)
    };
    let registry = Arc::new(HandlerRegistry::with_interviewer(&emitter, interviewer));
    let engine = Engine::new(registry, emitter, &logs_root);

    let context = waypoint_types::Context::new();
    if let Some(dir) = workdir {
        let abs = std::fs::canonicalize(&dir)?;
        context
            .set(
                "workdir",
                serde_json::Value::String(abs.to_string_lossy().into_owned()),
            )
            .await;
    }

    let report = engine.run_with_context(&graph, context).await?;

    println!("completed nodes: {:?}", report.completed_nodes);
    if let Some(reason) = &report.outcome.failure_reason {
        println!("failure reason: {reason}");
    }

    Ok(if report.succeeded() { 0 } else { 1 })
}

fn cmd_validate(pipeline: &Path) -> anyhow::Result<i32> {
    let graph = load_graph(pipeline)?;
    let diagnostics = validate(&graph);

    if diagnostics.is_empty() {
        println!("pipeline is valid");
        return Ok(0);
    }

    let mut has_error = false;
    for diag in &diagnostics {
        let tag = match diag.severity {
            Severity::Error => {
                has_error = true;
                "ERROR"
            }
            Severity::Warning => "WARN",
            Severity::Info => "INFO",
        };
        println!("[{tag}] {}: {}", diag.rule, diag.message);
    }

    Ok(if has_error { 1 } else { 0 })
}

fn cmd_info(pipeline: &Path) -> anyhow::Result<i32> {
    let graph = load_graph(pipeline)?;

    println!("pipeline: {}", graph.name);
    if !graph.goal().is_empty() {
        println!("goal: {}", graph.goal());
    }
    println!("nodes: {}", graph.nodes().count());
    println!("edges: {}", graph.edges().len());
    if let Some(start) = graph.start_node() {
        println!("start: {} ({})", start.id, start.label());
    }

    let mut ids: Vec<_> = graph.nodes().map(|n| n.id.clone()).collect();
    ids.sort_unstable();
    println!("\nnodes:");
    for id in ids {
        let node = graph.node(&id).unwrap();
        let kind = node.node_type().unwrap_or_else(|| {
            waypoint_engine::shape_handler_type(&node.shape())
                .unwrap_or("codergen")
                .to_string()
        });
        println!("  {id} [{}] shape={} handler={kind}", node.label(), node.shape());
    }

    Ok(0)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let code = match cli.command {
        Commands::Run {
            pipeline,
            logs,
            workdir,
            auto_approve,
        } => cmd_run(&pipeline, logs, workdir, auto_approve).await?,
        Commands::Validate { pipeline } => cmd_validate(&pipeline)?,
        Commands::Info { pipeline } => cmd_info(&pipeline)?,
    };

    std::process::exit(code);
}
