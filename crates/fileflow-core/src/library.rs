use crate::Schedule;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type LibraryUid = Uuid;

/// Scheduling priority of a library. Higher priorities are offered first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ProcessingPriority {
    Lowest,
    Low,
    #[default]
    Normal,
    High,
    Highest,
}

/// Order in which files of one library are offered to nodes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessingOrder {
    #[default]
    AsFound,
    LargestFirst,
    SmallestFirst,
    NewestFirst,
    Random,
}

/// A watched root folder and its processing policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Library {
    pub uid: LibraryUid,
    pub name: String,
    pub path: String,
    pub flow_uid: Option<Uuid>,
    #[serde(default)]
    pub priority: ProcessingPriority,
    #[serde(default)]
    pub processing_order: ProcessingOrder,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub schedule: Schedule,
    /// Cap on files of this library processing at once, across all nodes
    #[serde(default)]
    pub max_runners: Option<usize>,
    /// Minutes a newly found file is held back before it may be processed
    #[serde(default)]
    pub hold_minutes: u32,
    #[serde(default)]
    pub filters: Vec<String>,
    #[serde(default)]
    pub exclusion_filters: Vec<String>,
    #[serde(default)]
    pub use_fingerprinting: bool,
}

fn default_enabled() -> bool {
    true
}

impl Library {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            uid: Uuid::new_v4(),
            name: name.into(),
            path: path.into(),
            flow_uid: None,
            priority: ProcessingPriority::Normal,
            processing_order: ProcessingOrder::AsFound,
            enabled: true,
            schedule: Schedule::always(),
            max_runners: None,
            hold_minutes: 0,
            filters: Vec::new(),
            exclusion_filters: Vec::new(),
            use_fingerprinting: false,
        }
    }

    pub fn with_flow(mut self, flow_uid: Uuid) -> Self {
        self.flow_uid = Some(flow_uid);
        self
    }

    pub fn with_priority(mut self, priority: ProcessingPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_order(mut self, order: ProcessingOrder) -> Self {
        self.processing_order = order;
        self
    }

    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn with_max_runners(mut self, max_runners: usize) -> Self {
        self.max_runners = Some(max_runners);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}
