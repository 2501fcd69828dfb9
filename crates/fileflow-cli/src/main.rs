mod node;

use anyhow::{anyhow, Result};
use chrono::{Local, NaiveDateTime};
use clap::{Parser, Subcommand};
use fileflow_core::{
    DetachedChannel, EventBus, Flow, FlowLogger, FlowPartSpec, ProgressHandle, Schedule,
    StatusEvent, Value,
};
use fileflow_runtime::{FlowRuntime, PartRegistry, RunContext, RunState, RuntimeConfig};
use node::NodeConfig;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "fileflow")]
#[command(about = "FileFlow node and flow tooling", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register with a server and process files
    Node {
        /// Node config TOML file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Server address, overrides the config
        #[arg(short, long)]
        server: Option<String>,

        /// Machine name, overrides the config
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Run a flow over a single file
    Run {
        /// Path to flow JSON file
        #[arg(short, long)]
        flow: PathBuf,

        /// File to process
        #[arg(short = 'i', long)]
        file: PathBuf,

        /// Extra variables as key=value, repeatable
        #[arg(long = "var")]
        vars: Vec<String>,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a flow file
    Validate {
        /// Path to flow JSON file
        file: PathBuf,
    },

    /// List available part types
    Parts,

    /// Check whether a schedule permits processing
    Schedule {
        /// 672 character string of 0/1, one per quarter hour from Sunday 00:00
        bits: String,

        /// Local time to check, e.g. 2024-03-05T22:30:00 (defaults to now)
        #[arg(long)]
        at: Option<NaiveDateTime>,
    },

    /// Create an example flow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "flow.json")]
        output: PathBuf,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn default_registry() -> PartRegistry {
    let mut registry = PartRegistry::new();
    fileflow_parts::register_all(&mut registry);
    registry
}

fn load_flow(file: &PathBuf) -> Result<Flow> {
    let flow_json = std::fs::read_to_string(file)?;
    Ok(serde_json::from_str(&flow_json)?)
}

/// Parse `key=value` pairs. Values that parse as JSON keep their type.
fn parse_vars(vars: &[String]) -> Result<HashMap<String, Value>> {
    let mut parsed = HashMap::new();
    for var in vars {
        let (key, raw) = var
            .split_once('=')
            .ok_or_else(|| anyhow!("Variable '{}' must be key=value", var))?;
        let value = serde_json::from_str::<serde_json::Value>(raw)
            .map(Value::from_plain_json)
            .unwrap_or_else(|_| Value::from(raw));
        parsed.insert(key.to_string(), value);
    }
    Ok(parsed)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Node { config, server, name } => {
            init_logging(false);
            let mut node_config = match config {
                Some(path) => NodeConfig::load_from(&path)?,
                None => NodeConfig::default(),
            };
            if let Some(server) = server {
                node_config.server = server;
            }
            if let Some(name) = name {
                node_config.name = name;
            }
            node::run_node(node_config).await?;
        }

        Commands::Run {
            flow,
            file,
            vars,
            verbose,
        } => {
            init_logging(verbose);
            run_flow(flow, file, parse_vars(&vars)?).await?;
        }

        Commands::Validate { file } => {
            validate_flow(file)?;
        }

        Commands::Parts => {
            list_parts();
        }

        Commands::Schedule { bits, at } => {
            check_schedule(&bits, at)?;
        }

        Commands::Init { output } => {
            create_example_flow(output)?;
        }
    }

    Ok(())
}

async fn run_flow(
    flow_file: PathBuf,
    file: PathBuf,
    mut variables: HashMap<String, Value>,
) -> Result<()> {
    println!("🚀 Loading flow from: {}", flow_file.display());

    let flow = load_flow(&flow_file)?;
    println!("📋 Flow: {}", flow.name);
    println!("   Parts: {}", flow.parts.len());
    println!();

    let runtime =
        FlowRuntime::with_registry(Arc::new(default_registry()), RuntimeConfig::default());
    let graph = runtime.build_graph(&flow, &HashMap::new())?;

    let working_file = file.to_string_lossy().to_string();
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    variables.entry("file.Name".to_string()).or_insert_with(|| Value::from(name));
    variables
        .entry("file.FullName".to_string())
        .or_insert_with(|| Value::from(working_file.as_str()));

    let mut events = runtime.subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                StatusEvent::PartStarted { part_type, step, .. } => {
                    println!("  ⚡ Step {}: {}", step, part_type);
                }
                StatusEvent::PartCompleted { output, duration_ms, .. } => {
                    println!("  ✅ Output {} in {}ms", output, duration_ms);
                }
                _ => {}
            }
        }
    });

    let logger = FlowLogger::new();
    let cancellation = CancellationToken::new();
    let ctrl_c = cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let report = runtime
        .executor()
        .execute(
            &graph,
            RunContext {
                runner_uid: Uuid::new_v4(),
                working_file,
                variables,
                logger: logger.clone(),
                progress: ProgressHandle::default(),
                channel: Arc::new(DetachedChannel),
                cancellation,
            },
            runtime.event_bus(),
        )
        .await;

    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    event_task.abort();

    println!();
    println!("📜 Log:");
    for line in logger.lines() {
        println!("   {}", line);
    }

    println!();
    println!("📊 Run Summary:");
    println!("   Steps: {}", report.steps);
    println!("   Duration: {}ms", report.duration_ms);
    println!("   Working file: {}", report.working_file);
    match report.state {
        RunState::Completed { at } => println!("✨ Completed at part {}", at),
        RunState::Failed { at, error } => {
            println!("💥 Failed at part {}: {}", at, error);
            return Err(anyhow!("flow failed"));
        }
        RunState::Cancelled { .. } => println!("🛑 Cancelled"),
        other => println!("   State: {:?}", other),
    }

    Ok(())
}

fn validate_flow(file: PathBuf) -> Result<()> {
    println!("🔍 Validating flow: {}", file.display());

    let flow = load_flow(&file)?;
    let registry = default_registry();
    let runtime = FlowRuntime::with_event_bus(
        Arc::new(registry),
        Arc::new(EventBus::default()),
        RuntimeConfig::default(),
    );
    let graph = runtime.build_graph(&flow, &HashMap::new())?;

    println!("✅ Flow is valid:");
    println!("   Name: {}", flow.name);
    println!("   Parts: {}", graph.len());

    let unreachable = graph.unreachable_parts();
    if !unreachable.is_empty() {
        println!("⚠️  {} part(s) can never run:", unreachable.len());
        for uid in unreachable {
            let name = flow.find_part(uid).map(|p| p.display_name()).unwrap_or("?");
            println!("   • {} ({})", name, uid);
        }
    }

    Ok(())
}

fn list_parts() {
    println!("📦 Available Part Types:");
    println!();

    let registry = default_registry();

    for part_type in registry.list_part_types() {
        if let Some(metadata) = registry.get_metadata(&part_type) {
            println!("  • {} ({})", part_type, metadata.category);
            println!("    {}", metadata.description);
            for property in &metadata.properties {
                let marker = if property.required { "*" } else { " " };
                println!("     {} {} [{:?}]", marker, property.name, property.kind);
            }
            for output in &metadata.outputs {
                println!("     → {}: {}", output.index, output.description);
            }
        } else {
            println!("  • {}", part_type);
        }
    }
}

fn check_schedule(bits: &str, at: Option<NaiveDateTime>) -> Result<()> {
    let schedule = Schedule::from_bits(bits.trim());
    if !schedule.is_valid() {
        return Err(anyhow!(
            "Schedule must be {} characters of 0 or 1, got {}",
            fileflow_core::SCHEDULE_SLOTS,
            bits.trim().len()
        ));
    }

    let at = at.unwrap_or_else(|| Local::now().naive_local());
    let slot = Schedule::slot_index(at);
    if schedule.allows(at) {
        println!("✅ {} (slot {}) is inside the schedule", at, slot);
    } else {
        println!("⏸️  {} (slot {}) is outside the schedule", at, slot);
    }
    Ok(())
}

fn create_example_flow(output: PathBuf) -> Result<()> {
    let mut flow = Flow::new("Example Copy Flow");
    flow.description = Some("Copies large files to a backup folder and logs the rest".to_string());

    let input = flow.add_part(FlowPartSpec::input("input.file").with_name("Input File"));
    let size = flow.add_part(
        FlowPartSpec::new("logic.file_size")
            .with_name("Larger than 100MB")
            .with_property("size_mb", 100.0),
    );
    let copy = flow.add_part(
        FlowPartSpec::new("file.copy")
            .with_name("Backup")
            .with_property("destination", "/backup/"),
    );
    let log = flow.add_part(
        FlowPartSpec::new("debug.log")
            .with_name("Log Small File")
            .with_property("message", "Skipping small file {file.Name}"),
    );

    flow.connect(input, 1, size);
    flow.connect(size, 1, copy);
    flow.connect(size, 2, log);

    let json = serde_json::to_string_pretty(&flow)?;
    std::fs::write(&output, json)?;

    println!("✨ Created example flow: {}", output.display());
    println!();
    println!("Run it with:");
    println!("  fileflow run --flow {} --file /path/to/movie.mkv", output.display());

    Ok(())
}
