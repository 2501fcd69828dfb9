use crate::config::SchedulerConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fileflow_core::{
    matcher, ChannelError, ClaimTicket, EventBus, FileCondition, FileFilter, FileStatus, FileStore,
    FileUid, FileUpdate, Flow, FlowUid, Library, LibraryFile, LibraryIndex, LibraryScope,
    LibraryUid, NodeUid, StatusEvent, StoreError, SystemInfo, WorkSource,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Hands each eligible file to exactly one node.
///
/// Nodes poll concurrently; the only atomic step is the conditional store
/// update that moves a file from Unprocessed to Processing, so a losing
/// claimer simply moves on to its next candidate.
pub struct ClaimScheduler {
    store: Arc<dyn FileStore>,
    events: Arc<EventBus>,
    config: SchedulerConfig,
    paused: AtomicBool,
    /// Files some claimer in this process is currently trying to take
    in_flight: Mutex<HashSet<FileUid>>,
}

impl ClaimScheduler {
    pub fn new(store: Arc<dyn FileStore>, events: Arc<EventBus>, config: SchedulerConfig) -> Self {
        Self {
            store,
            events,
            config,
            paused: AtomicBool::new(false),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn FileStore> {
        &self.store
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn system(&self) -> SystemInfo {
        SystemInfo::current(self.config.ordering_entitled)
    }

    /// Stop handing out new work. Running files are not interrupted.
    pub fn pause(&self) {
        if !self.paused.swap(true, Ordering::SeqCst) {
            tracing::info!("Processing paused");
            self.events.emit(StatusEvent::ProcessingPaused {
                paused: true,
                timestamp: Utc::now(),
            });
        }
    }

    pub fn resume(&self) {
        if self.paused.swap(false, Ordering::SeqCst) {
            tracing::info!("Processing resumed");
            self.events.emit(StatusEvent::ProcessingPaused {
                paused: false,
                timestamp: Utc::now(),
            });
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    async fn library_index(&self) -> Result<LibraryIndex, StoreError> {
        Ok(self
            .store
            .libraries()
            .await?
            .into_iter()
            .map(|l| (l.uid, l))
            .collect())
    }

    /// Files matching `filter`, ranked the way they would be offered to nodes
    pub async fn ranked_files(&self, filter: &FileFilter) -> Result<Vec<LibraryFile>, StoreError> {
        let system = self.system();
        let candidates = self.store.query_files(filter, &system).await?;
        let libraries = self.library_index().await?;
        Ok(matcher::rank(candidates, &libraries, &system))
    }

    /// Claim the next file for `node_uid`, or `None` when there is nothing it
    /// may take right now.
    pub async fn claim_next(&self, node_uid: NodeUid) -> Result<Option<LibraryFile>, StoreError> {
        self.claim_next_at(node_uid, self.system()).await
    }

    pub async fn claim_next_at(
        &self,
        node_uid: NodeUid,
        system: SystemInfo,
    ) -> Result<Option<LibraryFile>, StoreError> {
        if self.is_paused() {
            tracing::debug!("Claim from {} refused: processing is paused", node_uid);
            return Ok(None);
        }

        let Some(node) = self.store.get_node(node_uid).await? else {
            tracing::debug!("Claim from unknown node {}", node_uid);
            return Ok(None);
        };
        if !node.enabled {
            tracing::debug!("Claim from disabled node '{}'", node.name);
            return Ok(None);
        }
        if !node.schedule.allows(system.local_now) {
            tracing::debug!("Node '{}' is outside its schedule", node.name);
            return Ok(None);
        }

        let running = self.store.count_processing_on_node(node_uid).await?;
        if running >= node.max_runners {
            tracing::debug!(
                "Node '{}' at capacity ({}/{})",
                node.name,
                running,
                node.max_runners
            );
            return Ok(None);
        }

        let libraries = self.library_index().await?;
        let allowed_libraries = match &node.libraries {
            LibraryScope::All => None,
            LibraryScope::Only(list) => Some(list.clone()),
            LibraryScope::AllExcept(_) => Some(
                libraries
                    .keys()
                    .filter(|uid| node.libraries.permits(**uid))
                    .copied()
                    .collect(),
            ),
        };
        let exclusions: Vec<FileUid> = self
            .in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .copied()
            .collect();

        let filter = FileFilter {
            allowed_libraries,
            max_size_mbs: node.max_file_size_mb,
            ..FileFilter::status(FileStatus::Unprocessed)
                .for_node(node_uid)
                .excluding(exclusions)
        };

        let candidates = self.store.query_files(&filter, &system).await?;
        let ranked = matcher::rank(candidates, &libraries, &system);
        tracing::debug!("Node '{}' has {} candidate(s)", node.name, ranked.len());

        let mut full_libraries: HashMap<LibraryUid, bool> = HashMap::new();
        for file in ranked {
            if let Some(max) = libraries.get(&file.library_uid).and_then(|l| l.max_runners) {
                let full = match full_libraries.get(&file.library_uid) {
                    Some(full) => *full,
                    None => {
                        let count = self.store.count_processing_in_library(file.library_uid).await?;
                        let full = count >= max;
                        full_libraries.insert(file.library_uid, full);
                        full
                    }
                };
                if full {
                    continue;
                }
            }

            if !self.begin_claim(file.uid) {
                continue;
            }
            let now = Utc::now();
            let update = FileUpdate::status(FileStatus::Processing)
                .on_node(node_uid)
                .started_at(now)
                .clear_ended();
            let result = self
                .store
                .update_if(file.uid, FileCondition::status(FileStatus::Unprocessed), update)
                .await;
            self.end_claim(file.uid);

            match result? {
                Some(claimed) => {
                    tracing::info!(
                        "Node '{}' claimed '{}' ({})",
                        node.name,
                        claimed.name,
                        claimed.uid
                    );
                    self.events.emit(StatusEvent::FileClaimed {
                        file_uid: claimed.uid,
                        node_uid,
                        timestamp: now,
                    });
                    return Ok(Some(claimed));
                }
                None => {
                    tracing::debug!("Lost claim race for {}", file.uid);
                }
            }
        }

        Ok(None)
    }

    fn begin_claim(&self, file_uid: FileUid) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(file_uid)
    }

    fn end_claim(&self, file_uid: FileUid) {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&file_uid);
    }

    /// Take a file back from a runner that stopped heartbeating.
    ///
    /// Only applies while the file is still held by `ticket`. The file is
    /// requeued, or failed once it has been reclaimed `max_reclaims` times.
    /// Either way it no longer counts against the node's runner budget.
    pub async fn release_dead(
        &self,
        ticket: &ClaimTicket,
    ) -> Result<Option<LibraryFile>, StoreError> {
        let Some(file) = self.store.get_file(ticket.file_uid).await? else {
            return Ok(None);
        };
        let exhausted = self
            .config
            .max_reclaims
            .map(|max| file.reclaim_count >= max)
            .unwrap_or(false);

        let update = if exhausted {
            FileUpdate::status(FileStatus::ProcessingFailed)
                .clear_node()
                .ended_at(Utc::now())
        } else {
            FileUpdate::status(FileStatus::Unprocessed)
                .clear_node()
                .clear_timestamps()
                .with_reclaim_count(file.reclaim_count + 1)
        };
        let released = self
            .store
            .update_if(ticket.file_uid, FileCondition::claim(ticket), update)
            .await?;

        if let Some(file) = &released {
            tracing::warn!(
                "Released '{}' from dead runner on node {} as {}",
                file.name,
                ticket.node_uid,
                file.status
            );
            self.events.file_status(file.uid, file.status);
        }
        Ok(released)
    }

    /// Write a run's terminal status for a file.
    ///
    /// Only applies while the file is still held by `ticket`. A late result
    /// from a run whose file was reclaimed, requeued or claimed again is
    /// dropped and `None` returned.
    pub async fn complete(
        &self,
        ticket: &ClaimTicket,
        update: FileUpdate,
    ) -> Result<Option<LibraryFile>, StoreError> {
        let written = self
            .store
            .update_if(ticket.file_uid, FileCondition::claim(ticket), update)
            .await?;
        match &written {
            Some(file) => {
                tracing::info!("File '{}' is now {}", file.name, file.status);
                self.events.file_status(file.uid, file.status);
            }
            None => {
                tracing::warn!(
                    "Dropping late result for {} from node {}, the claim no longer holds",
                    ticket.file_uid,
                    ticket.node_uid
                );
            }
        }
        Ok(written)
    }

    /// Files in Processing whose claim started before `cutoff`
    pub async fn processing_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<LibraryFile>, StoreError> {
        let files = self
            .store
            .query_files(&FileFilter::status(FileStatus::Processing), &self.system())
            .await?;
        Ok(files
            .into_iter()
            .filter(|f| f.processing_started.map_or(true, |t| t < cutoff))
            .collect())
    }

    /// Send a file back to the queue. Refused (`None`) while it is processing.
    pub async fn reprocess(&self, file_uid: FileUid) -> Result<Option<LibraryFile>, StoreError> {
        let file = self
            .store
            .get_file(file_uid)
            .await?
            .ok_or_else(|| StoreError::file_not_found(file_uid))?;
        if file.status == FileStatus::Processing {
            return Ok(None);
        }
        let update = FileUpdate::status(FileStatus::Unprocessed)
            .clear_node()
            .clear_timestamps()
            .clear_hold()
            .with_reclaim_count(0);
        let updated = self
            .store
            .update_if(file_uid, FileCondition::default().at_version(file.version), update)
            .await?;
        if let Some(file) = &updated {
            tracing::info!("File '{}' queued for reprocessing", file.name);
            self.events.file_status(file.uid, file.status);
        }
        Ok(updated)
    }

    /// Set or clear the force flag, which bypasses library and hold gating
    pub async fn force(&self, file_uid: FileUid, force: bool) -> Result<LibraryFile, StoreError> {
        let file = self
            .store
            .update_file(file_uid, FileUpdate::default().with_force(force))
            .await?;
        tracing::info!(
            "File '{}' force processing {}",
            file.name,
            if force { "on" } else { "off" }
        );
        Ok(file)
    }
}

/// Work source for a node running in the host process
pub struct LocalWorkSource {
    scheduler: Arc<ClaimScheduler>,
}

impl LocalWorkSource {
    pub fn new(scheduler: Arc<ClaimScheduler>) -> Self {
        Self { scheduler }
    }
}

fn channel_error(e: StoreError) -> ChannelError {
    ChannelError::Transport(e.to_string())
}

#[async_trait]
impl WorkSource for LocalWorkSource {
    async fn claim_next(&self, node_uid: NodeUid) -> Result<Option<LibraryFile>, ChannelError> {
        self.scheduler.claim_next(node_uid).await.map_err(channel_error)
    }

    async fn library(&self, uid: LibraryUid) -> Result<Option<Library>, ChannelError> {
        self.scheduler.store().get_library(uid).await.map_err(channel_error)
    }

    async fn flow(&self, uid: FlowUid) -> Result<Option<Flow>, ChannelError> {
        self.scheduler.store().get_flow(uid).await.map_err(channel_error)
    }

    async fn complete(
        &self,
        ticket: &ClaimTicket,
        update: FileUpdate,
    ) -> Result<bool, ChannelError> {
        self.scheduler
            .complete(ticket, update)
            .await
            .map(|written| written.is_some())
            .map_err(channel_error)
    }
}
