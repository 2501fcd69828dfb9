use crate::{
    matcher, ClaimTicket, FileFilter, FileStatus, FileUid, Flow, FlowUid, Library, LibraryFile,
    LibraryUid, NodeUid, ProcessingNode, StoreError, SystemInfo,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Change to an optional field: leave it, overwrite it, or empty it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum Patch<T> {
    #[default]
    Keep,
    Set(T),
    Clear,
}

impl<T> Patch<T> {
    pub fn apply(self, slot: &mut Option<T>) {
        match self {
            Patch::Keep => {}
            Patch::Set(value) => *slot = Some(value),
            Patch::Clear => *slot = None,
        }
    }

    pub fn is_keep(&self) -> bool {
        matches!(self, Patch::Keep)
    }
}

/// Partial update written to a file record
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileUpdate {
    #[serde(default)]
    pub status: Option<FileStatus>,
    #[serde(default, skip_serializing_if = "Patch::is_keep")]
    pub node_uid: Patch<NodeUid>,
    #[serde(default, skip_serializing_if = "Patch::is_keep")]
    pub processing_started: Patch<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Patch::is_keep")]
    pub processing_ended: Patch<DateTime<Utc>>,
    #[serde(default)]
    pub final_size: Option<u64>,
    #[serde(default)]
    pub reclaim_count: Option<u32>,
    #[serde(default)]
    pub force: Option<bool>,
    #[serde(default, skip_serializing_if = "Patch::is_keep")]
    pub hold_until: Patch<DateTime<Utc>>,
}

impl FileUpdate {
    pub fn status(status: FileStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn on_node(mut self, node_uid: NodeUid) -> Self {
        self.node_uid = Patch::Set(node_uid);
        self
    }

    pub fn clear_node(mut self) -> Self {
        self.node_uid = Patch::Clear;
        self
    }

    pub fn started_at(mut self, at: DateTime<Utc>) -> Self {
        self.processing_started = Patch::Set(at);
        self
    }

    pub fn ended_at(mut self, at: DateTime<Utc>) -> Self {
        self.processing_ended = Patch::Set(at);
        self
    }

    pub fn clear_ended(mut self) -> Self {
        self.processing_ended = Patch::Clear;
        self
    }

    pub fn clear_timestamps(mut self) -> Self {
        self.processing_started = Patch::Clear;
        self.processing_ended = Patch::Clear;
        self
    }

    pub fn with_final_size(mut self, size: u64) -> Self {
        self.final_size = Some(size);
        self
    }

    pub fn with_reclaim_count(mut self, count: u32) -> Self {
        self.reclaim_count = Some(count);
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = Some(force);
        self
    }

    pub fn clear_hold(mut self) -> Self {
        self.hold_until = Patch::Clear;
        self
    }

    pub fn apply(self, file: &mut LibraryFile) {
        if let Some(status) = self.status {
            file.status = status;
        }
        self.node_uid.apply(&mut file.node_uid);
        self.processing_started.apply(&mut file.processing_started);
        self.processing_ended.apply(&mut file.processing_ended);
        if let Some(size) = self.final_size {
            file.final_size = size;
        }
        if let Some(count) = self.reclaim_count {
            file.reclaim_count = count;
        }
        if let Some(force) = self.force {
            file.flags.set(crate::FileFlags::FORCE_PROCESSING, force);
        }
        self.hold_until.apply(&mut file.hold_until);
        file.version += 1;
    }
}

/// Precondition checked atomically with a conditional update
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FileCondition {
    /// Persisted status the record must still have
    pub status: Option<FileStatus>,
    /// Node the record must still be assigned to
    pub node_uid: Option<NodeUid>,
    /// Exact record version
    pub version: Option<u64>,
    /// Claim start the record must still carry
    pub started: Option<DateTime<Utc>>,
}

impl FileCondition {
    pub fn status(status: FileStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn on_node(mut self, node_uid: NodeUid) -> Self {
        self.node_uid = Some(node_uid);
        self
    }

    pub fn at_version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }

    /// Still processing under exactly this claim
    pub fn claim(ticket: &ClaimTicket) -> Self {
        Self {
            status: Some(FileStatus::Processing),
            node_uid: Some(ticket.node_uid),
            version: None,
            started: ticket.started,
        }
    }

    pub fn holds(&self, file: &LibraryFile) -> bool {
        self.status.map_or(true, |s| file.status == s)
            && self.node_uid.map_or(true, |n| file.node_uid == Some(n))
            && self.version.map_or(true, |v| file.version == v)
            && self.started.map_or(true, |t| file.processing_started == Some(t))
    }
}

/// Persistence for files, libraries, nodes and per-file logs
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn insert_file(&self, file: LibraryFile) -> Result<(), StoreError>;

    async fn get_file(&self, uid: FileUid) -> Result<Option<LibraryFile>, StoreError>;

    /// Files matching `filter`, in store order
    async fn query_files(
        &self,
        filter: &FileFilter,
        system: &SystemInfo,
    ) -> Result<Vec<LibraryFile>, StoreError>;

    async fn update_file(
        &self,
        uid: FileUid,
        update: FileUpdate,
    ) -> Result<LibraryFile, StoreError>;

    /// Apply `update` only if `condition` still holds. `Ok(None)` means another
    /// writer got there first.
    async fn update_if(
        &self,
        uid: FileUid,
        condition: FileCondition,
        update: FileUpdate,
    ) -> Result<Option<LibraryFile>, StoreError>;

    async fn count_processing_on_node(&self, node_uid: NodeUid) -> Result<usize, StoreError>;

    async fn count_processing_in_library(
        &self,
        library_uid: LibraryUid,
    ) -> Result<usize, StoreError>;

    async fn upsert_library(&self, library: Library) -> Result<(), StoreError>;

    async fn get_library(&self, uid: LibraryUid) -> Result<Option<Library>, StoreError>;

    async fn libraries(&self) -> Result<Vec<Library>, StoreError>;

    async fn upsert_flow(&self, flow: Flow) -> Result<(), StoreError>;

    async fn get_flow(&self, uid: FlowUid) -> Result<Option<Flow>, StoreError>;

    async fn flows(&self) -> Result<Vec<Flow>, StoreError>;

    async fn upsert_node(&self, node: ProcessingNode) -> Result<(), StoreError>;

    async fn get_node(&self, uid: NodeUid) -> Result<Option<ProcessingNode>, StoreError>;

    async fn find_node_by_name(&self, name: &str) -> Result<Option<ProcessingNode>, StoreError>;

    async fn nodes(&self) -> Result<Vec<ProcessingNode>, StoreError>;

    async fn append_log(&self, file_uid: FileUid, line: String) -> Result<(), StoreError>;

    async fn read_log(&self, file_uid: FileUid) -> Result<Vec<String>, StoreError>;
}

#[derive(Default)]
struct Tables {
    files: HashMap<FileUid, LibraryFile>,
    order: Vec<FileUid>,
    libraries: HashMap<LibraryUid, Library>,
    library_order: Vec<LibraryUid>,
    flows: HashMap<FlowUid, Flow>,
    nodes: HashMap<NodeUid, ProcessingNode>,
    logs: HashMap<FileUid, Vec<String>>,
}

/// Store kept entirely in memory. Conditional updates hold the write lock for
/// the check and the write, so they are atomic with respect to each other.
#[derive(Clone, Default)]
pub struct InMemoryFileStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FileStore for InMemoryFileStore {
    async fn insert_file(&self, file: LibraryFile) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.files.contains_key(&file.uid) {
            tables.order.push(file.uid);
        }
        tables.files.insert(file.uid, file);
        Ok(())
    }

    async fn get_file(&self, uid: FileUid) -> Result<Option<LibraryFile>, StoreError> {
        Ok(self.tables.read().await.files.get(&uid).cloned())
    }

    async fn query_files(
        &self,
        filter: &FileFilter,
        system: &SystemInfo,
    ) -> Result<Vec<LibraryFile>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .order
            .iter()
            .filter_map(|uid| tables.files.get(uid))
            .filter(|file| matcher::matches(file, filter, &tables.libraries, system))
            .cloned()
            .collect())
    }

    async fn update_file(
        &self,
        uid: FileUid,
        update: FileUpdate,
    ) -> Result<LibraryFile, StoreError> {
        let mut tables = self.tables.write().await;
        let file = tables
            .files
            .get_mut(&uid)
            .ok_or_else(|| StoreError::file_not_found(uid))?;
        update.apply(file);
        Ok(file.clone())
    }

    async fn update_if(
        &self,
        uid: FileUid,
        condition: FileCondition,
        update: FileUpdate,
    ) -> Result<Option<LibraryFile>, StoreError> {
        let mut tables = self.tables.write().await;
        let file = tables
            .files
            .get_mut(&uid)
            .ok_or_else(|| StoreError::file_not_found(uid))?;
        if !condition.holds(file) {
            return Ok(None);
        }
        update.apply(file);
        Ok(Some(file.clone()))
    }

    async fn count_processing_on_node(&self, node_uid: NodeUid) -> Result<usize, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .files
            .values()
            .filter(|f| f.status == FileStatus::Processing && f.node_uid == Some(node_uid))
            .count())
    }

    async fn count_processing_in_library(
        &self,
        library_uid: LibraryUid,
    ) -> Result<usize, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .files
            .values()
            .filter(|f| f.status == FileStatus::Processing && f.library_uid == library_uid)
            .count())
    }

    async fn upsert_library(&self, library: Library) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.libraries.contains_key(&library.uid) {
            tables.library_order.push(library.uid);
        }
        tables.libraries.insert(library.uid, library);
        Ok(())
    }

    async fn get_library(&self, uid: LibraryUid) -> Result<Option<Library>, StoreError> {
        Ok(self.tables.read().await.libraries.get(&uid).cloned())
    }

    async fn libraries(&self) -> Result<Vec<Library>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .library_order
            .iter()
            .filter_map(|uid| tables.libraries.get(uid).cloned())
            .collect())
    }

    async fn upsert_flow(&self, flow: Flow) -> Result<(), StoreError> {
        self.tables.write().await.flows.insert(flow.uid, flow);
        Ok(())
    }

    async fn get_flow(&self, uid: FlowUid) -> Result<Option<Flow>, StoreError> {
        Ok(self.tables.read().await.flows.get(&uid).cloned())
    }

    async fn flows(&self) -> Result<Vec<Flow>, StoreError> {
        let mut flows: Vec<_> = self.tables.read().await.flows.values().cloned().collect();
        flows.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(flows)
    }

    async fn upsert_node(&self, node: ProcessingNode) -> Result<(), StoreError> {
        self.tables.write().await.nodes.insert(node.uid, node);
        Ok(())
    }

    async fn get_node(&self, uid: NodeUid) -> Result<Option<ProcessingNode>, StoreError> {
        Ok(self.tables.read().await.nodes.get(&uid).cloned())
    }

    async fn find_node_by_name(&self, name: &str) -> Result<Option<ProcessingNode>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .nodes
            .values()
            .find(|n| n.name.eq_ignore_ascii_case(name))
            .cloned())
    }

    async fn nodes(&self) -> Result<Vec<ProcessingNode>, StoreError> {
        let mut nodes: Vec<_> = self.tables.read().await.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(nodes)
    }

    async fn append_log(&self, file_uid: FileUid, line: String) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .logs
            .entry(file_uid)
            .or_default()
            .push(line);
        Ok(())
    }

    async fn read_log(&self, file_uid: FileUid) -> Result<Vec<String>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .logs
            .get(&file_uid)
            .cloned()
            .unwrap_or_default())
    }
}
