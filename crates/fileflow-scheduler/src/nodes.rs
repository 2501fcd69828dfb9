use chrono::Utc;
use fileflow_core::{
    EventBus, NodeUid, ProcessingNode, RegisterRequest, StatusEvent, StoreError, FileStore,
};
use std::sync::Arc;

/// Host-side registry of processing nodes, keyed by machine name
pub struct NodeRegistry {
    store: Arc<dyn FileStore>,
    events: Arc<EventBus>,
    default_max_runners: usize,
}

impl NodeRegistry {
    pub fn new(
        store: Arc<dyn FileStore>,
        events: Arc<EventBus>,
        default_max_runners: usize,
    ) -> Self {
        Self {
            store,
            events,
            default_max_runners,
        }
    }

    /// Create or refresh the node record for `request.machine_name`.
    ///
    /// An existing record keeps its uid, runner budget, schedule and library
    /// scope; address, temp path and path mappings come from the request.
    pub async fn register(&self, request: RegisterRequest) -> Result<ProcessingNode, StoreError> {
        let existing = self.store.find_node_by_name(&request.machine_name).await?;
        let is_new = existing.is_none();
        let mut node = existing.unwrap_or_else(|| {
            ProcessingNode::new(
                request.machine_name.clone(),
                request.address.clone(),
                request.max_runners.unwrap_or(self.default_max_runners),
            )
        });

        node.address = request.address;
        node.temp_path = request.temp_path;
        node.path_mappings = request.path_mappings;
        node.last_seen = Some(Utc::now());
        self.store.upsert_node(node.clone()).await?;

        if is_new {
            tracing::info!("Registered new node '{}' ({})", node.name, node.uid);
        } else {
            tracing::info!("Node '{}' re-registered from {}", node.name, node.address);
        }
        self.events.emit(StatusEvent::NodeRegistered {
            node_uid: node.uid,
            name: node.name.clone(),
            address: node.address.clone(),
            timestamp: Utc::now(),
        });
        Ok(node)
    }

    pub async fn get(&self, uid: NodeUid) -> Result<Option<ProcessingNode>, StoreError> {
        self.store.get_node(uid).await
    }

    pub async fn nodes(&self) -> Result<Vec<ProcessingNode>, StoreError> {
        self.store.nodes().await
    }

    /// Add or replace a node record as-is
    pub async fn upsert(&self, node: ProcessingNode) -> Result<(), StoreError> {
        self.store.upsert_node(node).await
    }
}
