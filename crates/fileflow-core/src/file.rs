use crate::{LibraryUid, NodeUid, Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

pub type FileUid = Uuid;

/// Lifecycle status of a library file.
///
/// The integer codes are part of the external contract (reports query
/// `Processed = 1`), so they must never be renumbered. Negative codes are
/// derived at query time and never persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum FileStatus {
    OnHold,
    Disabled,
    OutOfSchedule,
    #[default]
    Unprocessed,
    Processed,
    Processing,
    FlowNotFound,
    ProcessingFailed,
    Duplicate,
    MappingIssue,
    MissingLibrary,
    ReprocessByFlow,
}

impl FileStatus {
    pub fn code(self) -> i32 {
        match self {
            FileStatus::OnHold => -3,
            FileStatus::Disabled => -2,
            FileStatus::OutOfSchedule => -1,
            FileStatus::Unprocessed => 0,
            FileStatus::Processed => 1,
            FileStatus::Processing => 2,
            FileStatus::FlowNotFound => 3,
            FileStatus::ProcessingFailed => 4,
            FileStatus::Duplicate => 5,
            FileStatus::MappingIssue => 6,
            FileStatus::MissingLibrary => 7,
            FileStatus::ReprocessByFlow => 8,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            -3 => FileStatus::OnHold,
            -2 => FileStatus::Disabled,
            -1 => FileStatus::OutOfSchedule,
            0 => FileStatus::Unprocessed,
            1 => FileStatus::Processed,
            2 => FileStatus::Processing,
            3 => FileStatus::FlowNotFound,
            4 => FileStatus::ProcessingFailed,
            5 => FileStatus::Duplicate,
            6 => FileStatus::MappingIssue,
            7 => FileStatus::MissingLibrary,
            8 => FileStatus::ReprocessByFlow,
            _ => return None,
        })
    }

    /// Statuses computed from library/hold state rather than stored.
    pub fn is_synthetic(self) -> bool {
        self.code() < 0
    }
}

impl From<FileStatus> for i32 {
    fn from(status: FileStatus) -> Self {
        status.code()
    }
}

impl TryFrom<i32> for FileStatus {
    type Error = String;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        FileStatus::from_code(code).ok_or_else(|| format!("unknown file status code {}", code))
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Per-file flag bitset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileFlags(u32);

impl FileFlags {
    pub const NONE: FileFlags = FileFlags(0);
    /// Bypass disabled library, schedule and hold gating.
    pub const FORCE_PROCESSING: FileFlags = FileFlags(1);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: FileFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: FileFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: FileFlags) {
        self.0 &= !other.0;
    }

    pub fn set(&mut self, other: FileFlags, on: bool) {
        if on {
            self.insert(other);
        } else {
            self.remove(other);
        }
    }
}

/// One file tracked through its processing lifecycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryFile {
    pub uid: FileUid,
    pub name: String,
    pub relative_path: String,
    #[serde(default)]
    pub status: FileStatus,
    pub library_uid: LibraryUid,
    #[serde(default)]
    pub flow_uid: Option<Uuid>,
    #[serde(default)]
    pub node_uid: Option<NodeUid>,
    #[serde(default)]
    pub process_on_node_uid: Option<NodeUid>,
    #[serde(default)]
    pub original_size: u64,
    #[serde(default)]
    pub final_size: u64,
    #[serde(default)]
    pub hold_until: Option<DateTime<Utc>>,
    pub date_created: DateTime<Utc>,
    #[serde(default)]
    pub processing_started: Option<DateTime<Utc>>,
    #[serde(default)]
    pub processing_ended: Option<DateTime<Utc>>,
    #[serde(default)]
    pub flags: FileFlags,
    #[serde(default)]
    pub duplicate_of: Option<FileUid>,
    #[serde(default)]
    pub custom_variables: HashMap<String, Value>,
    #[serde(default)]
    pub tags: Vec<Uuid>,
    /// Times the file was taken back from a runner that stopped heartbeating
    #[serde(default)]
    pub reclaim_count: u32,
    /// Incremented by the store on every write
    #[serde(default)]
    pub version: u64,
}

impl LibraryFile {
    pub fn new(library_uid: LibraryUid, relative_path: impl Into<String>, size: u64) -> Self {
        let relative_path = relative_path.into();
        let name = relative_path
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(relative_path.as_str())
            .to_string();
        Self {
            uid: Uuid::new_v4(),
            name,
            relative_path,
            status: FileStatus::Unprocessed,
            library_uid,
            flow_uid: None,
            node_uid: None,
            process_on_node_uid: None,
            original_size: size,
            final_size: 0,
            hold_until: None,
            date_created: Utc::now(),
            processing_started: None,
            processing_ended: None,
            flags: FileFlags::NONE,
            duplicate_of: None,
            custom_variables: HashMap::new(),
            tags: Vec::new(),
            reclaim_count: 0,
            version: 0,
        }
    }

    pub fn with_status(mut self, status: FileStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_created(mut self, created: DateTime<Utc>) -> Self {
        self.date_created = created;
        self
    }

    pub fn with_hold_until(mut self, until: DateTime<Utc>) -> Self {
        self.hold_until = Some(until);
        self
    }

    pub fn pinned_to(mut self, node_uid: NodeUid) -> Self {
        self.process_on_node_uid = Some(node_uid);
        self
    }

    pub fn forced(mut self) -> Self {
        self.flags.insert(FileFlags::FORCE_PROCESSING);
        self
    }

    pub fn is_forced(&self) -> bool {
        self.flags.contains(FileFlags::FORCE_PROCESSING)
    }

    /// Whether the hold window is still open at `now`.
    pub fn is_held(&self, now: DateTime<Utc>) -> bool {
        self.hold_until.map(|until| until > now).unwrap_or(false)
    }
}

/// Identifies one claim of a file.
///
/// A file can be claimed again after its runner is declared dead, so the
/// node alone does not tell two runs apart; the claim start time does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimTicket {
    pub file_uid: FileUid,
    pub node_uid: NodeUid,
    #[serde(default)]
    pub started: Option<DateTime<Utc>>,
}

impl ClaimTicket {
    /// Ticket for `file` as claimed by `node_uid`
    pub fn of(file: &LibraryFile, node_uid: NodeUid) -> Self {
        Self {
            file_uid: file.uid,
            node_uid,
            started: file.processing_started,
        }
    }

    /// Whether `file` is still held by this claim
    pub fn holds(&self, file: &LibraryFile) -> bool {
        file.uid == self.file_uid
            && file.status == FileStatus::Processing
            && file.node_uid == Some(self.node_uid)
            && file.processing_started == self.started
    }
}
