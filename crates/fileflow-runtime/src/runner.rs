use crate::executor::{RunContext, RunState};
use crate::runtime::FlowRuntime;
use chrono::Utc;
use fileflow_core::{
    ClaimTicket, FileStatus, FileUid, FileUpdate, FlowError, FlowLogger, Library, LibraryFile,
    ProcessingNode, ProgressHandle, ProgressInfo, RunnerChannel, RunnerUid, StatusEvent, Value,
    WorkSource,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Runs one claimed file through its flow on behalf of a node and reports
/// progress, log lines and the final status back to the host.
pub struct FileRunner {
    runtime: Arc<FlowRuntime>,
    node: ProcessingNode,
    channel: Arc<dyn RunnerChannel>,
    source: Arc<dyn WorkSource>,
}

impl FileRunner {
    pub fn new(
        runtime: Arc<FlowRuntime>,
        node: ProcessingNode,
        channel: Arc<dyn RunnerChannel>,
        source: Arc<dyn WorkSource>,
    ) -> Self {
        Self {
            runtime,
            node,
            channel,
            source,
        }
    }

    pub fn node(&self) -> &ProcessingNode {
        &self.node
    }

    /// Process `file` to a terminal status.
    ///
    /// Only a failure to write that status back is returned as an error; the
    /// runner is then left unfinished so the host reclaims the file.
    pub async fn run(
        &self,
        file: LibraryFile,
        extra_variables: HashMap<String, Value>,
        cancellation: CancellationToken,
    ) -> Result<FileStatus, FlowError> {
        let runner_uid = Uuid::new_v4();
        let started = Instant::now();
        tracing::info!("Runner {} processing '{}' ({})", runner_uid, file.name, file.uid);

        let (tx, rx) = mpsc::unbounded_channel();
        let logger = FlowLogger::with_sink(tx);
        let forwarder = tokio::spawn(forward_logs(self.channel.clone(), runner_uid, file.uid, rx));

        let progress = ProgressHandle::new(ProgressInfo::new(runner_uid, &file, self.node.uid));
        let ticket = ClaimTicket::of(&file, self.node.uid);
        // cancelled by the caller, or by a heartbeat the host refuses
        let run_token = cancellation.child_token();
        if let Some(info) = progress.snapshot() {
            match self.channel.hello(runner_uid, info).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::warn!("Host refused runner {} for '{}'", runner_uid, file.name);
                    run_token.cancel();
                }
                Err(e) => {
                    tracing::warn!("Initial heartbeat for runner {} failed: {}", runner_uid, e)
                }
            }
        }

        let stop_heartbeat = CancellationToken::new();
        let heartbeat = spawn_heartbeat(
            self.channel.clone(),
            runner_uid,
            progress.clone(),
            self.runtime.config().heartbeat_interval(),
            stop_heartbeat.clone(),
            run_token.clone(),
        );

        let (status, update) = self
            .process(runner_uid, &file, logger.clone(), progress, extra_variables, run_token)
            .await;

        stop_heartbeat.cancel();
        let _ = heartbeat.await;
        drop(logger);
        let _ = forwarder.await;

        match self.source.complete(&ticket, update).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(
                    "Result {} for '{}' was dropped, the file was taken back",
                    status,
                    file.name
                );
            }
            Err(e) => {
                tracing::error!("Failed to record status {} for file {}: {}", status, file.uid, e);
                return Err(e.into());
            }
        }
        if let Err(e) = self.channel.finished(runner_uid).await {
            tracing::warn!("Runner {} could not report finish: {}", runner_uid, e);
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            "Runner {} finished '{}' as {} in {}ms",
            runner_uid,
            file.name,
            status,
            duration_ms
        );
        self.runtime.event_bus().emit(StatusEvent::RunFinished {
            runner_uid,
            file_uid: file.uid,
            status,
            duration_ms,
            timestamp: Utc::now(),
        });
        Ok(status)
    }

    async fn process(
        &self,
        runner_uid: RunnerUid,
        file: &LibraryFile,
        logger: FlowLogger,
        progress: ProgressHandle,
        extra_variables: HashMap<String, Value>,
        cancellation: CancellationToken,
    ) -> (FileStatus, FileUpdate) {
        let library = match self.source.library(file.library_uid).await {
            Ok(Some(library)) => library,
            Ok(None) => {
                logger.error(format!("Library {} not found", file.library_uid));
                return terminal(FileStatus::MissingLibrary);
            }
            Err(e) => {
                logger.error(format!("Could not load library {}: {}", file.library_uid, e));
                return released();
            }
        };

        let flow = match file.flow_uid.or(library.flow_uid) {
            Some(uid) => match self.source.flow(uid).await {
                Ok(flow) => flow.filter(|f| f.enabled),
                Err(e) => {
                    logger.error(format!("Could not load flow {}: {}", uid, e));
                    return released();
                }
            },
            None => None,
        };
        let Some(flow) = flow else {
            logger.error(format!("No enabled flow found for library '{}'", library.name));
            return terminal(FileStatus::FlowNotFound);
        };

        let working_file = self.node.map_path(&join_path(&library.path, &file.relative_path));
        let temp_root = if self.node.temp_path.is_empty() {
            self.runtime.config().temp_path.clone()
        } else {
            self.node.temp_path.clone()
        };
        let temp_dir = Path::new(&temp_root).join(format!("Runner-{}", runner_uid));
        if let Err(e) = tokio::fs::create_dir_all(&temp_dir).await {
            logger.warn(format!("Could not create temp folder {}: {}", temp_dir.display(), e));
        }

        let mut variables =
            run_variables(file, &library, &working_file, &temp_dir.to_string_lossy());
        variables.extend(file.custom_variables.clone());
        variables.extend(extra_variables);

        logger.info(format!("Flow: {}", flow.name));
        logger.info(format!("File: {}", working_file));

        let graph = match self.runtime.build_graph(&flow, &variables) {
            Ok(graph) => graph,
            Err(e) => {
                logger.error(format!("Flow '{}' is invalid: {}", flow.name, e));
                cleanup_temp(&temp_dir).await;
                return terminal(FileStatus::ProcessingFailed);
            }
        };

        self.runtime.event_bus().emit(StatusEvent::RunStarted {
            runner_uid,
            file_uid: file.uid,
            flow_uid: flow.uid,
            timestamp: Utc::now(),
        });

        let report = self
            .runtime
            .executor()
            .execute(
                &graph,
                RunContext {
                    runner_uid,
                    working_file,
                    variables,
                    logger: logger.clone(),
                    progress,
                    channel: self.channel.clone(),
                    cancellation,
                },
                self.runtime.event_bus(),
            )
            .await;
        cleanup_temp(&temp_dir).await;

        match report.state {
            RunState::Completed { .. } => {
                let final_size = report
                    .variables
                    .get("file.Size")
                    .and_then(Value::as_i64)
                    .map(|size| size.max(0) as u64)
                    .unwrap_or(file.original_size);
                let (status, update) = terminal(FileStatus::Processed);
                (status, update.with_final_size(final_size))
            }
            RunState::Cancelled { .. } => {
                logger.warn("Processing was cancelled, file returned to the queue");
                released()
            }
            RunState::Failed { error, .. } => {
                tracing::warn!("Flow '{}' failed for {}: {}", flow.name, file.uid, error);
                terminal(FileStatus::ProcessingFailed)
            }
            RunState::NotStarted | RunState::Running(_) => terminal(FileStatus::ProcessingFailed),
        }
    }
}

fn terminal(status: FileStatus) -> (FileStatus, FileUpdate) {
    (status, FileUpdate::status(status).ended_at(Utc::now()))
}

/// Put the file back for another node to pick up
fn released() -> (FileStatus, FileUpdate) {
    let update = FileUpdate::status(FileStatus::Unprocessed)
        .clear_node()
        .clear_timestamps();
    (FileStatus::Unprocessed, update)
}

/// Variables every run starts with
pub fn run_variables(
    file: &LibraryFile,
    library: &Library,
    working_file: &str,
    temp_path: &str,
) -> HashMap<String, Value> {
    let mut variables = HashMap::new();
    variables.insert("file.Name".to_string(), Value::from(file.name.as_str()));
    variables.insert("file.FullName".to_string(), Value::from(working_file));
    variables.insert("file.Size".to_string(), Value::from(file.original_size));
    variables.insert("file.Uid".to_string(), Value::from(file.uid.to_string()));
    variables.insert("library.Name".to_string(), Value::from(library.name.as_str()));
    variables.insert("library.Path".to_string(), Value::from(library.path.as_str()));
    variables.insert("temp.Path".to_string(), Value::from(temp_path));
    variables
}

/// Join a library root and a path relative to it. Absolute paths are kept.
pub fn join_path(root: &str, relative: &str) -> String {
    let is_absolute = relative.starts_with('/') || relative.get(1..2) == Some(":");
    if root.is_empty() || is_absolute {
        return relative.to_string();
    }
    let sep = if root.contains('\\') && !root.contains('/') { '\\' } else { '/' };
    format!(
        "{}{}{}",
        root.trim_end_matches(['/', '\\']),
        sep,
        relative.trim_start_matches(['/', '\\'])
    )
}

async fn cleanup_temp(dir: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(dir).await {
        tracing::debug!("Temp folder {} not removed: {}", dir.display(), e);
    }
}

async fn forward_logs(
    channel: Arc<dyn RunnerChannel>,
    runner_uid: RunnerUid,
    file_uid: FileUid,
    mut lines: mpsc::UnboundedReceiver<String>,
) {
    while let Some(line) = lines.recv().await {
        if let Err(e) = channel.log_message(runner_uid, file_uid, line).await {
            tracing::debug!("Dropped log line for {}: {}", file_uid, e);
        }
    }
}

/// Heartbeat every `every` until `stop`. A heartbeat the host refuses
/// cancels `run`.
fn spawn_heartbeat(
    channel: Arc<dyn RunnerChannel>,
    runner_uid: RunnerUid,
    progress: ProgressHandle,
    every: Duration,
    stop: CancellationToken,
    run: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {
                    let Some(info) = progress.snapshot() else { continue };
                    match channel.hello(runner_uid, info).await {
                        Ok(true) => {}
                        Ok(false) => {
                            tracing::warn!("Host refused heartbeat for runner {}", runner_uid);
                            run.cancel();
                            break;
                        }
                        Err(e) => {
                            tracing::warn!("Heartbeat for runner {} failed: {}", runner_uid, e)
                        }
                    }
                }
            }
        }
    })
}
