// crates/agentcli/src/main.rs

use agentcore::{BlockEvent, BlockRecord, Edge, ExecutionEvent, WorkflowRecord, WorkflowState};
use agentruntime::{AgentRuntime, BlockRegistry, ExecutionRequest, RuntimeConfig};
use agenttools::{FileWorkflowStore, StandardTools, UnconfiguredProvider};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "agentflow")]
#[command(about = "Agent workflow engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow file
    Run {
        /// Path to workflow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Workflow input as JSON
        #[arg(short, long)]
        input: Option<String>,

        /// Environment variable for `{{KEY}}` references, as KEY=VALUE
        #[arg(short, long = "env", value_parser = parse_key_value)]
        env: Vec<(String, String)>,

        /// Directory holding `{id}.json` files for nested workflows;
        /// defaults to the workflow file's directory
        #[arg(long)]
        workflows_dir: Option<PathBuf>,

        /// Show debug logging
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a workflow file
    Validate {
        /// Path to workflow JSON file
        file: PathBuf,
    },

    /// List available block types
    Blocks,

    /// Create a new example workflow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "workflow.json")]
        output: PathBuf,
    },
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim().to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            input,
            env,
            workflows_dir,
            verbose,
        } => {
            init_logging(verbose);
            run_workflow(file, input, env.into_iter().collect(), workflows_dir).await?;
        }

        Commands::Validate { file } => {
            init_logging(false);
            validate_workflow(&file)?;
        }

        Commands::Blocks => {
            list_blocks();
        }

        Commands::Init { output } => {
            create_example_workflow(&output)?;
        }
    }

    Ok(())
}

/// Reads either a full workflow record or a bare workflow state. A bare
/// state is named after the file.
fn load_workflow_file(file: &Path) -> Result<WorkflowRecord> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let json: serde_json::Value =
        serde_json::from_str(&content).with_context(|| format!("{} is not valid JSON", file.display()))?;

    if json.get("state").is_some() {
        return serde_json::from_value(json).with_context(|| format!("Invalid workflow in {}", file.display()));
    }

    let state: WorkflowState =
        serde_json::from_value(json).with_context(|| format!("Invalid workflow state in {}", file.display()))?;
    let id = file
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("workflow")
        .to_string();
    Ok(WorkflowRecord {
        name: id.clone(),
        id,
        description: None,
        state,
    })
}

async fn run_workflow(
    file: PathBuf,
    input: Option<String>,
    env: HashMap<String, String>,
    workflows_dir: Option<PathBuf>,
) -> Result<()> {
    println!("🚀 Loading workflow from: {}", file.display());

    let workflow = load_workflow_file(&file)?;

    println!("📋 Workflow: {}", workflow.name);
    println!("   Blocks: {}", workflow.state.blocks.len());
    println!("   Edges: {}", workflow.state.edges.len());
    println!();

    let input: serde_json::Value = match input {
        Some(raw) => serde_json::from_str(&raw).context("Input must be valid JSON")?,
        None => serde_json::json!({}),
    };

    let dir = workflows_dir.unwrap_or_else(|| {
        file.parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    });

    let runtime = AgentRuntime::with_config(
        Arc::new(UnconfiguredProvider),
        Arc::new(StandardTools::from_env()),
        Arc::new(FileWorkflowStore::new(dir)),
        RuntimeConfig::from_env(),
    );

    let mut events = runtime.subscribe_events();

    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ExecutionEvent::WorkflowStarted { execution_id, .. } => {
                    println!("▶️  Workflow started ({})", execution_id);
                }
                ExecutionEvent::BlockStarted { block_id, block_type, .. } => {
                    println!("  ⚡ Starting block: {} ({})", block_id, block_type);
                }
                ExecutionEvent::BlockCompleted { block_id, duration_ms, .. } => {
                    println!("  ✅ Block {} completed in {}ms", block_id, duration_ms);
                }
                ExecutionEvent::BlockFailed { block_id, error, .. } => {
                    println!("  ❌ Block {} failed: {}", block_id, error);
                }
                ExecutionEvent::BlockEvent { block_id, event, .. } => match event {
                    BlockEvent::Info { message } => {
                        println!("     ℹ️  [{}] {}", block_id, message);
                    }
                    BlockEvent::Warning { message } => {
                        println!("     ⚠️  [{}] {}", block_id, message);
                    }
                    BlockEvent::Chunk { content } => {
                        print!("{}", content);
                        let _ = std::io::stdout().flush();
                    }
                },
                ExecutionEvent::WorkflowCompleted {
                    execution_id,
                    success,
                    duration_ms,
                    ..
                } => {
                    if success {
                        println!("✨ Workflow {} completed successfully in {}ms", execution_id, duration_ms);
                    } else {
                        println!("💥 Workflow {} failed after {}ms", execution_id, duration_ms);
                    }
                }
            }
        }
    });

    let request = ExecutionRequest::generate()
        .with_input(input)
        .with_environment(env);
    let result = runtime
        .execute_state(Some(&workflow.id), &workflow.state, request)
        .await?;

    // Let the printer drain before the summary.
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    event_task.abort();

    println!();
    println!("📊 Execution Summary:");
    println!("   Execution ID: {}", result.metadata.execution_id);
    println!("   Duration: {}ms", result.metadata.duration_ms);
    println!("   Blocks run: {}", result.logs.len());

    println!();
    println!("📤 Output:");
    println!("{}", serde_json::to_string_pretty(&result.output)?);

    if !result.success {
        bail!(result.error.unwrap_or_else(|| "Workflow failed".to_string()));
    }
    Ok(())
}

fn validate_workflow(file: &Path) -> Result<()> {
    println!("🔍 Validating workflow: {}", file.display());

    let workflow = load_workflow_file(file)?;
    let runtime = AgentRuntime::new(
        Arc::new(UnconfiguredProvider),
        Arc::new(StandardTools::new()),
        Arc::new(FileWorkflowStore::new(".")),
    );
    let executor = runtime.executor(Some(&workflow.id), &workflow.state)?;
    executor.validate_workflow()?;
    let serialized = executor.workflow();

    println!("✅ Workflow is valid:");
    println!("   Name: {}", workflow.name);
    println!("   Blocks: {}", serialized.blocks.len());
    println!("   Connections: {}", serialized.connections.len());
    println!("   Loops: {}", serialized.loops.len());
    println!("   Parallels: {}", serialized.parallels.len());

    Ok(())
}

fn list_blocks() {
    println!("📦 Available Block Types:");
    println!();

    let registry = BlockRegistry::standard();
    for block_type in registry.list_block_types() {
        match registry.get(&block_type) {
            Ok(spec) => {
                let binding = match (&spec.tool, spec.uses_provider) {
                    (Some(tool), _) => format!(", tool: {}", tool),
                    (None, true) => ", model provider".to_string(),
                    (None, false) => String::new(),
                };
                println!("  • {} ({:?}{})", block_type, spec.category, binding);
                println!("    {}", spec.description);
                for param in &spec.inputs {
                    let marker = if param.required { "*" } else { " " };
                    println!("      {}{}: {} - {}", marker, param.name, param.ty, param.description);
                }
            }
            Err(_) => println!("  • {}", block_type),
        }
    }
}

fn create_example_workflow(output: &Path) -> Result<()> {
    let blocks = vec![
        BlockRecord::new("start", "starter", "Start"),
        BlockRecord::new("fetch", "api", "Fetch")
            .with_value("url", "<start.url>")
            .with_value("method", "GET"),
        BlockRecord::new("respond", "response", "Respond")
            .with_value("data", serde_json::json!({"status": "<fetch.status>", "body": "<fetch.data>"})),
    ];

    let workflow = WorkflowRecord {
        id: "example".to_string(),
        name: "Example HTTP Workflow".to_string(),
        description: Some("Fetches a URL and returns the response".to_string()),
        state: WorkflowState {
            blocks: blocks.into_iter().map(|b| (b.id.clone(), b)).collect(),
            edges: vec![Edge::new("start", "fetch"), Edge::new("fetch", "respond")],
            ..WorkflowState::default()
        },
    };

    let json = serde_json::to_string_pretty(&workflow)?;
    std::fs::write(output, json)?;

    println!("✨ Created example workflow: {}", output.display());
    println!();
    println!("Run it with:");
    println!(
        "  agentflow run --file {} --input '{{\"url\": \"https://api.github.com/zen\"}}'",
        output.display()
    );

    Ok(())
}
