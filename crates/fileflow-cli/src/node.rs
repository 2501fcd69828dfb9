use anyhow::{anyhow, Context, Result};
use fileflow_core::{PathMapping, RunnerChannel, WorkSource};
use fileflow_runtime::{
    FileRunner, FlowRuntime, HostClient, HttpRunnerChannel, HttpWorkSource, NodeWorker,
    PartRegistry, RuntimeConfig,
};
use fileflow_scheduler::{register, HttpRegistrationTransport};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Settings of a remote processing node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Server address; a missing scheme or port is filled in by trying candidates
    pub server: String,
    /// Machine name the node registers under
    pub name: String,
    pub temp_path: Option<String>,
    pub path_mappings: Vec<PathMapping>,
    pub runtime: RuntimeConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            server: "localhost".to_string(),
            name: std::env::var("HOSTNAME").unwrap_or_else(|_| "fileflow-node".to_string()),
            temp_path: None,
            path_mappings: Vec::new(),
            runtime: RuntimeConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        Ok(config)
    }
}

/// Register with the server, then claim and process files until Ctrl+C
pub async fn run_node(config: NodeConfig) -> Result<()> {
    let temp_path = config
        .temp_path
        .clone()
        .unwrap_or_else(|| config.runtime.temp_path.clone());

    tracing::debug!(temp_path = %temp_path, mappings = config.path_mappings.len(), "Node settings");
    println!("🔌 Registering '{}' with {}", config.name, config.server);
    let transport = HttpRegistrationTransport::new();
    let result = register(
        &config.server,
        &config.name,
        &temp_path,
        config.path_mappings.clone(),
        &transport,
    )
    .await;
    let (Some(base_url), Some(node)) = (result.resolved_base_url, result.node) else {
        return Err(anyhow!("Could not register with server '{}'", config.server));
    };
    println!("✅ Registered as {} ({} runner(s)) at {}", node.uid, node.max_runners, base_url);

    let mut registry = PartRegistry::new();
    fileflow_parts::register_all(&mut registry);
    let runtime = Arc::new(FlowRuntime::with_registry(Arc::new(registry), config.runtime.clone()));

    let host_url = base_url.clone();
    let host = HostClient::new(base_url);
    let channel: Arc<dyn RunnerChannel> = Arc::new(HttpRunnerChannel::new(host.clone()));
    let source: Arc<dyn WorkSource> = Arc::new(HttpWorkSource::new(host));
    let runner = Arc::new(FileRunner::new(runtime.clone(), node, channel, source.clone()));
    let worker = NodeWorker::new(runner, source, runtime.config().poll_interval());

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("🛑 Stopping, releasing running files...");
            signal.cancel();
        }
    });

    tracing::info!(base_url = %host_url, "Node worker started");
    worker.run(shutdown).await?;
    println!("👋 Node stopped");
    Ok(())
}
