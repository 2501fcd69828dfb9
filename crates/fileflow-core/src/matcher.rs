//! Eligibility matching and ranking of library files.
//!
//! Everything here is a pure function of its inputs: a file, the filter a
//! caller asked for, a snapshot of libraries and the system clock. Missing
//! data is treated as the most permissive choice and nothing here can fail.

use crate::{
    FileStatus, FileUid, FlowUid, Library, LibraryFile, LibraryUid, NodeUid, ProcessingOrder,
    ProcessingPriority,
};
use chrono::{DateTime, Local, NaiveDateTime, Utc};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};

pub type LibraryIndex = HashMap<LibraryUid, Library>;

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Clock and entitlements the matcher evaluates against
#[derive(Debug, Clone, Copy)]
pub struct SystemInfo {
    pub now: DateTime<Utc>,
    /// Wall clock used for schedule slots
    pub local_now: NaiveDateTime,
    /// Processing orders other than `AsFound` are honoured only when set
    pub ordering_entitled: bool,
}

impl SystemInfo {
    pub fn current(ordering_entitled: bool) -> Self {
        Self {
            now: Utc::now(),
            local_now: Local::now().naive_local(),
            ordering_entitled,
        }
    }

    /// Evaluate at a fixed instant, using UTC as the schedule clock.
    pub fn at(now: DateTime<Utc>, ordering_entitled: bool) -> Self {
        Self {
            now,
            local_now: now.naive_utc(),
            ordering_entitled,
        }
    }
}

/// Predicate fields shared by store queries and claim requests
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileFilter {
    pub status: Option<FileStatus>,
    pub allowed_libraries: Option<Vec<LibraryUid>>,
    pub max_size_mbs: Option<u64>,
    #[serde(default)]
    pub exclusion_uids: HashSet<FileUid>,
    #[serde(default)]
    pub forced_only: bool,
    pub name_contains: Option<String>,
    pub processing_node_uid: Option<NodeUid>,
    pub library_uid: Option<LibraryUid>,
    pub flow_uid: Option<FlowUid>,
}

impl FileFilter {
    pub fn status(status: FileStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn for_node(mut self, node_uid: NodeUid) -> Self {
        self.processing_node_uid = Some(node_uid);
        self
    }

    pub fn excluding(mut self, uids: impl IntoIterator<Item = FileUid>) -> Self {
        self.exclusion_uids.extend(uids);
        self
    }
}

fn library_enabled(library: Option<&Library>) -> bool {
    library.map(|l| l.enabled).unwrap_or(true)
}

fn library_in_schedule(library: Option<&Library>, system: &SystemInfo) -> bool {
    library
        .map(|l| l.schedule.allows(system.local_now))
        .unwrap_or(true)
}

/// Status a file shows once library and hold gating are taken into account.
pub fn effective_status(
    file: &LibraryFile,
    library: Option<&Library>,
    system: &SystemInfo,
) -> FileStatus {
    if file.status != FileStatus::Unprocessed || file.is_forced() {
        return file.status;
    }
    if !library_enabled(library) {
        FileStatus::Disabled
    } else if !library_in_schedule(library, system) {
        FileStatus::OutOfSchedule
    } else if file.is_held(system.now) {
        FileStatus::OnHold
    } else {
        FileStatus::Unprocessed
    }
}

fn status_gate(
    file: &LibraryFile,
    wanted: FileStatus,
    library: Option<&Library>,
    system: &SystemInfo,
) -> bool {
    let unprocessed = file.status == FileStatus::Unprocessed;
    let forced = file.is_forced();
    match wanted {
        FileStatus::Unprocessed => {
            unprocessed
                && (forced
                    || (library_enabled(library)
                        && library_in_schedule(library, system)
                        && !file.is_held(system.now)))
        }
        FileStatus::Disabled => unprocessed && !forced && !library_enabled(library),
        FileStatus::OutOfSchedule => {
            unprocessed
                && !forced
                && library_enabled(library)
                && !library_in_schedule(library, system)
        }
        FileStatus::OnHold => unprocessed && !forced && file.is_held(system.now),
        other => file.status == other,
    }
}

/// Whether `file` satisfies every constraint in `filter`.
pub fn matches(
    file: &LibraryFile,
    filter: &FileFilter,
    libraries: &LibraryIndex,
    system: &SystemInfo,
) -> bool {
    let library = libraries.get(&file.library_uid);

    if let Some(wanted) = filter.status {
        if !status_gate(file, wanted, library, system) {
            return false;
        }
    }

    if let Some(allowed) = &filter.allowed_libraries {
        if !allowed.contains(&file.library_uid) {
            return false;
        }
    }

    if let Some(max_mb) = filter.max_size_mbs {
        if file.original_size > max_mb.saturating_mul(BYTES_PER_MB) {
            return false;
        }
    }

    if filter.exclusion_uids.contains(&file.uid) {
        return false;
    }

    if filter.forced_only && !file.is_forced() {
        return false;
    }

    if let Some(needle) = filter.name_contains.as_deref().filter(|n| !n.is_empty()) {
        let needle = needle.to_lowercase();
        if !file.name.to_lowercase().contains(&needle)
            && !file.relative_path.to_lowercase().contains(&needle)
        {
            return false;
        }
    }

    if let (Some(requesting), Some(pinned)) =
        (filter.processing_node_uid, file.process_on_node_uid)
    {
        if requesting != pinned {
            return false;
        }
    }

    if let Some(library_uid) = filter.library_uid {
        if file.library_uid != library_uid {
            return false;
        }
    }

    if let Some(flow_uid) = filter.flow_uid {
        let file_flow = file.flow_uid.or_else(|| library.and_then(|l| l.flow_uid));
        if file_flow != Some(flow_uid) {
            return false;
        }
    }

    true
}

/// Order eligible files the way they should be offered to a node.
///
/// Files are sorted by library priority (highest first). Each library's files
/// are then arranged by that library's processing order within the positions
/// the library already holds, so libraries sharing a priority stay
/// interleaved in store order.
pub fn rank(
    candidates: Vec<LibraryFile>,
    libraries: &LibraryIndex,
    system: &SystemInfo,
) -> Vec<LibraryFile> {
    let priority_of = |file: &LibraryFile| {
        libraries
            .get(&file.library_uid)
            .map(|l| l.priority)
            .unwrap_or(ProcessingPriority::Normal)
    };

    let mut ranked = candidates;
    // stable, so store order survives within a priority band
    ranked.sort_by_key(|f| Reverse(priority_of(f)));

    let mut slots: HashMap<LibraryUid, Vec<usize>> = HashMap::new();
    for (index, file) in ranked.iter().enumerate() {
        slots.entry(file.library_uid).or_default().push(index);
    }

    let mut rng = rand::thread_rng();
    for (library_uid, positions) in slots {
        let order = if system.ordering_entitled {
            libraries
                .get(&library_uid)
                .map(|l| l.processing_order)
                .unwrap_or_default()
        } else {
            ProcessingOrder::AsFound
        };
        if order == ProcessingOrder::AsFound || positions.len() < 2 {
            continue;
        }

        let mut group: Vec<LibraryFile> = positions.iter().map(|&i| ranked[i].clone()).collect();
        match order {
            ProcessingOrder::AsFound => {}
            ProcessingOrder::LargestFirst => group.sort_by_key(|f| Reverse(f.original_size)),
            ProcessingOrder::SmallestFirst => group.sort_by_key(|f| f.original_size),
            ProcessingOrder::NewestFirst => group.sort_by_key(|f| Reverse(f.date_created)),
            ProcessingOrder::Random => group.shuffle(&mut rng),
        }
        for (slot, file) in positions.into_iter().zip(group) {
            ranked[slot] = file;
        }
    }

    ranked
}
