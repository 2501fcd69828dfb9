use crate::config::{InternalNodeConfig, ServerConfig};
use fileflow_core::{
    EventBus, FileStore, InMemoryFileStore, RegisterRequest, RunnerChannel, StoreError, WorkSource,
};
use fileflow_runtime::{FileRunner, FlowRuntime, NodeWorker, PartRegistry};
use fileflow_scheduler::{ClaimScheduler, LivenessMonitor, LocalWorkSource, NodeRegistry};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Application state shared across handlers
pub struct AppState {
    pub store: Arc<dyn FileStore>,
    pub events: Arc<EventBus>,
    pub scheduler: Arc<ClaimScheduler>,
    pub liveness: Arc<LivenessMonitor>,
    pub nodes: Arc<NodeRegistry>,
    pub runtime: Arc<FlowRuntime>,
}

impl AppState {
    pub fn new(config: &ServerConfig, registry: Arc<PartRegistry>) -> Self {
        Self::with_store(Arc::new(InMemoryFileStore::new()), config, registry)
    }

    pub fn with_store(
        store: Arc<dyn FileStore>,
        config: &ServerConfig,
        registry: Arc<PartRegistry>,
    ) -> Self {
        let events = Arc::new(EventBus::new(config.server.event_buffer_size));
        let scheduler = Arc::new(ClaimScheduler::new(
            store.clone(),
            events.clone(),
            config.scheduler.clone(),
        ));
        let liveness = Arc::new(LivenessMonitor::new(
            scheduler.clone(),
            config.scheduler.heartbeat_grace(),
        ));
        let nodes = Arc::new(NodeRegistry::new(
            store.clone(),
            events.clone(),
            config.scheduler.default_max_runners,
        ));
        let runtime = Arc::new(FlowRuntime::with_event_bus(
            registry,
            events.clone(),
            config.runtime.clone(),
        ));

        Self {
            store,
            events,
            scheduler,
            liveness,
            nodes,
            runtime,
        }
    }

    /// Register the in-process node and start its worker loop
    pub async fn start_internal_node(
        &self,
        config: &InternalNodeConfig,
        shutdown: CancellationToken,
    ) -> Result<JoinHandle<()>, StoreError> {
        let temp_path = config
            .temp_path
            .clone()
            .unwrap_or_else(|| self.runtime.config().temp_path.clone());
        let node = self
            .nodes
            .register(RegisterRequest {
                machine_name: config.name.clone(),
                address: "localhost".to_string(),
                temp_path,
                path_mappings: Vec::new(),
                max_runners: Some(config.max_runners),
            })
            .await?;

        let source: Arc<dyn WorkSource> = Arc::new(LocalWorkSource::new(self.scheduler.clone()));
        let channel: Arc<dyn RunnerChannel> = self.liveness.clone();
        let runner = Arc::new(FileRunner::new(
            self.runtime.clone(),
            node,
            channel,
            source.clone(),
        ));
        let worker = NodeWorker::new(runner, source, self.runtime.config().poll_interval());

        Ok(tokio::spawn(async move {
            if let Err(e) = worker.run(shutdown).await {
                tracing::error!("Internal node stopped: {}", e);
            }
        }))
    }
}
