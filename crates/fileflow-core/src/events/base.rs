use crate::{FileStatus, FileUid, FlowUid, NodeUid, PartUid, ProgressInfo, RunnerUid};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// State changes pushed outward to dashboards and other listeners
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StatusEvent {
    FileClaimed {
        file_uid: FileUid,
        node_uid: NodeUid,
        timestamp: DateTime<Utc>,
    },
    RunStarted {
        runner_uid: RunnerUid,
        file_uid: FileUid,
        flow_uid: FlowUid,
        timestamp: DateTime<Utc>,
    },
    PartStarted {
        runner_uid: RunnerUid,
        part_uid: PartUid,
        part_type: String,
        step: usize,
        timestamp: DateTime<Utc>,
    },
    PartCompleted {
        runner_uid: RunnerUid,
        part_uid: PartUid,
        output: i32,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    RunFinished {
        runner_uid: RunnerUid,
        file_uid: FileUid,
        status: FileStatus,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    Progress {
        info: ProgressInfo,
    },
    /// A runner stopped heartbeating and its file was released
    RunnerTimedOut {
        runner_uid: RunnerUid,
        file_uid: FileUid,
        status: FileStatus,
        timestamp: DateTime<Utc>,
    },
    FileStatusChanged {
        file_uid: FileUid,
        status: FileStatus,
        timestamp: DateTime<Utc>,
    },
    NodeRegistered {
        node_uid: NodeUid,
        name: String,
        address: String,
        timestamp: DateTime<Utc>,
    },
    ProcessingPaused {
        paused: bool,
        timestamp: DateTime<Utc>,
    },
}

/// In-process broadcast bus for status events
pub struct EventBus {
    sender: broadcast::Sender<StatusEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.sender.subscribe()
    }

    /// Publish an event; having no subscribers is not an error.
    pub fn emit(&self, event: StatusEvent) {
        let _ = self.sender.send(event);
    }

    pub fn file_status(&self, file_uid: FileUid, status: FileStatus) {
        self.emit(StatusEvent::FileStatusChanged {
            file_uid,
            status,
            timestamp: Utc::now(),
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}
