use crate::claim::ClaimScheduler;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fileflow_core::{
    ChannelError, ClaimTicket, EventBus, FileUid, ProgressInfo, RunnerChannel, RunnerUid,
    StatusEvent, PING_RUNNER,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Dead runners are remembered this many grace periods after they are
/// declared dead, long enough to refuse their late heartbeats.
const TIMED_OUT_RETENTION: i32 = 4;

#[derive(Debug, Clone)]
struct RunnerRecord {
    ticket: ClaimTicket,
    info: ProgressInfo,
    last_heartbeat: DateTime<Utc>,
}

#[derive(Default)]
struct Runners {
    live: HashMap<RunnerUid, RunnerRecord>,
    /// Runners already declared dead and when; their late heartbeats are refused
    timed_out: HashMap<RunnerUid, DateTime<Utc>>,
}

/// Host-side record of active runners.
///
/// Runners report through [`RunnerChannel`]; a runner silent for longer than
/// the grace period is declared dead by [`LivenessMonitor::sweep`] and its
/// file is released through the claim scheduler. Files left in Processing
/// that no runner ever reported for are released the same way. Liveness
/// never limits how long a run may take, only how long it may stay silent.
pub struct LivenessMonitor {
    scheduler: Arc<ClaimScheduler>,
    events: Arc<EventBus>,
    grace: chrono::Duration,
    /// Orphaned claims are released only once a grace period has passed since this
    watching_since: DateTime<Utc>,
    runners: RwLock<Runners>,
}

impl LivenessMonitor {
    pub fn new(scheduler: Arc<ClaimScheduler>, grace: Duration) -> Self {
        let events = scheduler.events().clone();
        Self {
            scheduler,
            events,
            grace: chrono::Duration::seconds(grace.as_secs().min(u32::MAX as u64) as i64),
            watching_since: Utc::now(),
            runners: RwLock::new(Runners::default()),
        }
    }

    /// Record a heartbeat received at `now`.
    pub async fn hello_at(
        &self,
        runner_uid: RunnerUid,
        info: ProgressInfo,
        now: DateTime<Utc>,
    ) -> bool {
        if runner_uid == PING_RUNNER {
            return true;
        }

        let mut runners = self.runners.write().await;
        if runners.timed_out.contains_key(&runner_uid) {
            tracing::warn!("Heartbeat from runner {} after it was declared dead", runner_uid);
            return false;
        }
        if !runners.live.contains_key(&runner_uid) {
            tracing::info!(
                "Runner {} started '{}' on node {}",
                runner_uid,
                info.file_name,
                info.node_uid
            );
        }
        runners.live.insert(
            runner_uid,
            RunnerRecord {
                ticket: info.ticket(),
                info: info.clone(),
                last_heartbeat: now,
            },
        );
        drop(runners);

        self.events.emit(StatusEvent::Progress { info });
        true
    }

    /// Progress of every live runner
    pub async fn runners(&self) -> Vec<ProgressInfo> {
        let runners = self.runners.read().await;
        let mut infos: Vec<ProgressInfo> = runners.live.values().map(|r| r.info.clone()).collect();
        infos.sort_by_key(|i| i.started_at);
        infos
    }

    pub async fn is_tracking(&self, runner_uid: RunnerUid) -> bool {
        self.runners.read().await.live.contains_key(&runner_uid)
    }

    /// Number of dead runners whose late heartbeats are still refused
    pub async fn timed_out_count(&self) -> usize {
        self.runners.read().await.timed_out.len()
    }

    /// Declare runners silent since before `now - grace` dead and release
    /// their files, then release files stuck in Processing with no runner.
    /// Returns the runners removed.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Vec<RunnerUid> {
        let (expired, claimed): (Vec<(RunnerUid, RunnerRecord)>, HashSet<FileUid>) = {
            let mut runners = self.runners.write().await;
            let retention = self.grace * TIMED_OUT_RETENTION;
            runners.timed_out.retain(|_, at| now - *at <= retention);

            let dead: Vec<RunnerUid> = runners
                .live
                .iter()
                .filter(|(_, r)| now - r.last_heartbeat > self.grace)
                .map(|(uid, _)| *uid)
                .collect();
            let mut expired = Vec::with_capacity(dead.len());
            for uid in dead {
                if let Some(record) = runners.live.remove(&uid) {
                    runners.timed_out.insert(uid, now);
                    expired.push((uid, record));
                }
            }
            let claimed = runners.live.values().map(|r| r.ticket.file_uid).collect();
            (expired, claimed)
        };

        let mut removed = Vec::with_capacity(expired.len());
        for (runner_uid, record) in expired {
            tracing::warn!(
                "Runner {} on node {} missed its heartbeat (last seen {})",
                runner_uid,
                record.ticket.node_uid,
                record.last_heartbeat
            );
            match self.scheduler.release_dead(&record.ticket).await {
                Ok(Some(file)) => {
                    self.events.emit(StatusEvent::RunnerTimedOut {
                        runner_uid,
                        file_uid: file.uid,
                        status: file.status,
                        timestamp: now,
                    });
                }
                Ok(None) => {
                    tracing::debug!("File {} already left that claim", record.ticket.file_uid);
                }
                Err(e) => {
                    tracing::error!("Failed to release file {}: {}", record.ticket.file_uid, e);
                }
            }
            removed.push(runner_uid);
        }

        self.release_orphans(now, &claimed).await;
        removed
    }

    /// Release files claimed more than a grace period ago that no live
    /// runner reports for, e.g. when the runner died before its first
    /// heartbeat.
    async fn release_orphans(&self, now: DateTime<Utc>, claimed: &HashSet<FileUid>) {
        if now - self.watching_since <= self.grace {
            return;
        }
        let orphans = match self.scheduler.processing_before(now - self.grace).await {
            Ok(files) => files,
            Err(e) => {
                tracing::error!("Failed to list processing files: {}", e);
                return;
            }
        };
        for file in orphans.into_iter().filter(|f| !claimed.contains(&f.uid)) {
            let Some(node_uid) = file.node_uid else {
                continue;
            };
            let ticket = ClaimTicket::of(&file, node_uid);
            match self.scheduler.release_dead(&ticket).await {
                Ok(Some(released)) => {
                    tracing::warn!(
                        "Released '{}' from node {}: no runner reported for it",
                        released.name,
                        node_uid
                    );
                }
                Ok(None) => {}
                Err(e) => tracing::error!("Failed to release file {}: {}", file.uid, e),
            }
        }
    }

    /// Sweep every `every` until `shutdown` is cancelled
    pub fn spawn_sweeper(
        self: Arc<Self>,
        every: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = self.sweep(Utc::now()).await;
                        if !removed.is_empty() {
                            tracing::info!("Liveness sweep removed {} runner(s)", removed.len());
                        }
                    }
                }
            }
            tracing::debug!("Liveness sweeper stopped");
        })
    }
}

#[async_trait]
impl RunnerChannel for LivenessMonitor {
    async fn hello(&self, runner_uid: RunnerUid, info: ProgressInfo) -> Result<bool, ChannelError> {
        Ok(self.hello_at(runner_uid, info, Utc::now()).await)
    }

    async fn log_message(
        &self,
        runner_uid: RunnerUid,
        file_uid: FileUid,
        text: String,
    ) -> Result<(), ChannelError> {
        if runner_uid == PING_RUNNER {
            return Ok(());
        }
        self.scheduler
            .store()
            .append_log(file_uid, text)
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))
    }

    async fn finished(&self, runner_uid: RunnerUid) -> Result<(), ChannelError> {
        if self.runners.write().await.live.remove(&runner_uid).is_some() {
            tracing::debug!("Runner {} finished", runner_uid);
        }
        Ok(())
    }
}
