use crate::executor::{FlowExecutor, FlowGraph};
use crate::registry::PartRegistry;
use fileflow_core::{EventBus, Flow, GraphError, StatusEvent, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Holds the part registry, executor and event bus shared by every run
pub struct FlowRuntime {
    registry: Arc<PartRegistry>,
    executor: Arc<FlowExecutor>,
    event_bus: Arc<EventBus>,
    config: RuntimeConfig,
}

impl FlowRuntime {
    /// Create a new runtime with default settings
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a new runtime with custom configuration
    pub fn with_config(config: RuntimeConfig) -> Self {
        let registry = Arc::new(PartRegistry::new());
        Self::with_registry(registry, config)
    }

    /// Create a new runtime with a pre-configured registry
    pub fn with_registry(registry: Arc<PartRegistry>, config: RuntimeConfig) -> Self {
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        Self::with_event_bus(registry, event_bus, config)
    }

    /// Create a runtime that publishes on an existing event bus
    pub fn with_event_bus(
        registry: Arc<PartRegistry>,
        event_bus: Arc<EventBus>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            registry,
            executor: Arc::new(FlowExecutor::new()),
            event_bus,
            config,
        }
    }

    /// Get access to the part registry
    pub fn registry(&self) -> &Arc<PartRegistry> {
        &self.registry
    }

    pub fn executor(&self) -> &Arc<FlowExecutor> {
        &self.executor
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Build a flow's graph without running it
    pub fn build_graph(
        &self,
        flow: &Flow,
        overrides: &HashMap<String, Value>,
    ) -> Result<FlowGraph, GraphError> {
        FlowGraph::build(flow, &self.registry, overrides)
    }

    /// Subscribe to status events
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<StatusEvent> {
        self.event_bus.subscribe()
    }

    /// Get the event bus for direct access
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }
}

impl Default for FlowRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for a processing node's runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Seconds between heartbeats while a file is processing
    pub heartbeat_interval_secs: u64,
    /// Seconds between claim attempts when no work was found
    pub poll_interval_secs: u64,
    /// Root for per-runner scratch folders when the node sets none
    pub temp_path: String,
    pub event_buffer_size: usize,
}

impl RuntimeConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 10,
            poll_interval_secs: 10,
            temp_path: std::env::temp_dir()
                .join("fileflow")
                .to_string_lossy()
                .into_owned(),
            event_buffer_size: 1000,
        }
    }
}
