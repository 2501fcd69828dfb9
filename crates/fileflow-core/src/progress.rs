use crate::{
    ChannelError, ClaimTicket, FileUid, FileUpdate, Flow, FlowUid, Library, LibraryFile,
    LibraryUid, NodeUid,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

pub type RunnerUid = Uuid;

/// Runner uid used by connectivity checks; accepted but never tracked.
pub const PING_RUNNER: RunnerUid = Uuid::nil();

/// Progress payload carried by heartbeats and status broadcasts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressInfo {
    pub runner_uid: RunnerUid,
    pub file_uid: FileUid,
    pub node_uid: NodeUid,
    pub library_uid: Option<LibraryUid>,
    pub file_name: String,
    /// 1-based count of part executions so far
    pub current_part: usize,
    pub total_parts: usize,
    pub current_part_name: Option<String>,
    /// Percent complete of the current part
    pub percent: f32,
    pub started_at: DateTime<Utc>,
    /// Start of the claim the runner is working under
    #[serde(default)]
    pub claimed_at: Option<DateTime<Utc>>,
}

impl ProgressInfo {
    pub fn new(runner_uid: RunnerUid, file: &LibraryFile, node_uid: NodeUid) -> Self {
        Self {
            runner_uid,
            file_uid: file.uid,
            node_uid,
            library_uid: Some(file.library_uid),
            file_name: file.name.clone(),
            current_part: 0,
            total_parts: 0,
            current_part_name: None,
            percent: 0.0,
            started_at: Utc::now(),
            claimed_at: file.processing_started,
        }
    }

    /// The claim this runner reports for
    pub fn ticket(&self) -> ClaimTicket {
        ClaimTicket {
            file_uid: self.file_uid,
            node_uid: self.node_uid,
            started: self.claimed_at,
        }
    }

    /// A heartbeat payload that only checks connectivity.
    pub fn ping(node_uid: NodeUid) -> Self {
        Self {
            runner_uid: PING_RUNNER,
            file_uid: Uuid::nil(),
            node_uid,
            library_uid: None,
            file_name: String::new(),
            current_part: 0,
            total_parts: 0,
            current_part_name: None,
            percent: 0.0,
            started_at: Utc::now(),
            claimed_at: None,
        }
    }
}

/// Shared, live view of a run's progress
#[derive(Clone)]
pub struct ProgressHandle {
    inner: Arc<Mutex<Option<ProgressInfo>>>,
}

impl Default for ProgressHandle {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(None)),
        }
    }
}

impl ProgressHandle {
    pub fn new(info: ProgressInfo) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(info))),
        }
    }

    pub fn snapshot(&self) -> Option<ProgressInfo> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Report percent complete of the current part, clamped to 0..=100.
    pub fn set_percent(&self, percent: f32) {
        self.update(|info| info.percent = percent.clamp(0.0, 100.0));
    }

    pub fn update(&self, f: impl FnOnce(&mut ProgressInfo)) {
        if let Some(info) = self.inner.lock().unwrap_or_else(|e| e.into_inner()).as_mut() {
            f(info);
        }
    }
}

/// Channel from a running engine instance to the coordinating host
#[async_trait]
pub trait RunnerChannel: Send + Sync {
    /// Heartbeat carrying current progress. Returns whether the host acknowledged it.
    async fn hello(&self, runner_uid: RunnerUid, info: ProgressInfo) -> Result<bool, ChannelError>;

    /// Append one line to the file's log
    async fn log_message(
        &self,
        runner_uid: RunnerUid,
        file_uid: FileUid,
        text: String,
    ) -> Result<(), ChannelError>;

    /// The runner ended gracefully and its record can be dropped
    async fn finished(&self, runner_uid: RunnerUid) -> Result<(), ChannelError>;
}

/// Where a node gets work from and reports terminal results to
#[async_trait]
pub trait WorkSource: Send + Sync {
    async fn claim_next(&self, node_uid: NodeUid) -> Result<Option<LibraryFile>, ChannelError>;

    async fn library(&self, uid: LibraryUid) -> Result<Option<Library>, ChannelError>;

    async fn flow(&self, uid: FlowUid) -> Result<Option<Flow>, ChannelError>;

    /// Write the run's terminal status for a file. `Ok(false)` when the
    /// claim no longer holds and the result was dropped.
    async fn complete(
        &self,
        ticket: &ClaimTicket,
        update: FileUpdate,
    ) -> Result<bool, ChannelError>;
}

/// Channel that accepts everything and tracks nothing, for standalone runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedChannel;

#[async_trait]
impl RunnerChannel for DetachedChannel {
    async fn hello(
        &self,
        _runner_uid: RunnerUid,
        _info: ProgressInfo,
    ) -> Result<bool, ChannelError> {
        Ok(true)
    }

    async fn log_message(
        &self,
        _runner_uid: RunnerUid,
        _file_uid: FileUid,
        _text: String,
    ) -> Result<(), ChannelError> {
        Ok(())
    }

    async fn finished(&self, _runner_uid: RunnerUid) -> Result<(), ChannelError> {
        Ok(())
    }
}
