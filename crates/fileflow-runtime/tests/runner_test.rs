use async_trait::async_trait;
use fileflow_core::{
    ChannelError, ClaimTicket, FileStatus, FileUid, FileUpdate, Flow, FlowPartSpec, FlowUid,
    Library,
    LibraryFile, LibraryUid, NodeUid, Part, PartContext, PartError, PartKind, PartOutput, Patch,
    ProcessingNode, ProgressInfo, RunnerChannel, RunnerUid, Value, WorkSource,
};
use fileflow_runtime::{
    FileRunner, FlowRuntime, NodeWorker, PartFactory, PartRegistry, RuntimeConfig,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("fileflow_runtime=debug")
        .with_test_writer()
        .try_init();
}

struct Shrink;

#[async_trait]
impl Part for Shrink {
    fn part_type(&self) -> &str {
        "test.shrink"
    }

    async fn execute(&self, ctx: PartContext) -> Result<PartOutput, PartError> {
        ctx.logger.info(format!("shrinking {}", ctx.working_file));
        Ok(PartOutput::next(1).with_variable("file.Size", 5_i64))
    }
}

struct Wait;

#[async_trait]
impl Part for Wait {
    fn part_type(&self) -> &str {
        "test.wait"
    }

    async fn execute(&self, ctx: PartContext) -> Result<PartOutput, PartError> {
        tokio::select! {
            _ = ctx.cancellation.cancelled() => Err(PartError::Cancelled),
            _ = tokio::time::sleep(Duration::from_secs(30)) => Ok(PartOutput::next(1)),
        }
    }
}

struct Factory(&'static str);

impl PartFactory for Factory {
    fn create(&self, _properties: &HashMap<String, Value>) -> Result<Box<dyn Part>, PartError> {
        match self.0 {
            "test.wait" => Ok(Box::new(Wait)),
            _ => Ok(Box::new(Shrink)),
        }
    }

    fn part_type(&self) -> &str {
        self.0
    }
}

#[derive(Default)]
struct RecordingChannel {
    hellos: Mutex<Vec<ProgressInfo>>,
    lines: Mutex<Vec<String>>,
    finished: Mutex<Vec<RunnerUid>>,
    /// Acknowledge only this many heartbeats
    ack_limit: Option<usize>,
}

impl RecordingChannel {
    fn acknowledging(limit: usize) -> Self {
        Self {
            ack_limit: Some(limit),
            ..Self::default()
        }
    }
}

#[async_trait]
impl RunnerChannel for RecordingChannel {
    async fn hello(
        &self,
        _runner_uid: RunnerUid,
        info: ProgressInfo,
    ) -> Result<bool, ChannelError> {
        let mut hellos = self.hellos.lock().unwrap();
        hellos.push(info);
        Ok(self.ack_limit.map_or(true, |limit| hellos.len() <= limit))
    }

    async fn log_message(
        &self,
        _runner_uid: RunnerUid,
        _file_uid: FileUid,
        text: String,
    ) -> Result<(), ChannelError> {
        self.lines.lock().unwrap().push(text);
        Ok(())
    }

    async fn finished(&self, runner_uid: RunnerUid) -> Result<(), ChannelError> {
        self.finished.lock().unwrap().push(runner_uid);
        Ok(())
    }
}

struct QueueSource {
    library: Library,
    flow: Flow,
    queue: Mutex<VecDeque<LibraryFile>>,
    completed: Mutex<Vec<(FileUid, FileUpdate)>>,
    /// Whether results are still accepted, i.e. the claims hold
    claims_hold: bool,
}

impl QueueSource {
    fn new(library: Library, flow: Flow, files: Vec<LibraryFile>) -> Self {
        Self {
            library,
            flow,
            queue: Mutex::new(files.into()),
            completed: Mutex::new(Vec::new()),
            claims_hold: true,
        }
    }

    fn reclaimed(mut self) -> Self {
        self.claims_hold = false;
        self
    }

    fn completed(&self) -> Vec<(FileUid, FileUpdate)> {
        self.completed.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkSource for QueueSource {
    async fn claim_next(&self, _node_uid: NodeUid) -> Result<Option<LibraryFile>, ChannelError> {
        Ok(self.queue.lock().unwrap().pop_front())
    }

    async fn library(&self, uid: LibraryUid) -> Result<Option<Library>, ChannelError> {
        Ok((uid == self.library.uid).then(|| self.library.clone()))
    }

    async fn flow(&self, uid: FlowUid) -> Result<Option<Flow>, ChannelError> {
        Ok((uid == self.flow.uid).then(|| self.flow.clone()))
    }

    async fn complete(
        &self,
        ticket: &ClaimTicket,
        update: FileUpdate,
    ) -> Result<bool, ChannelError> {
        if self.claims_hold {
            self.completed.lock().unwrap().push((ticket.file_uid, update));
        }
        Ok(self.claims_hold)
    }
}

fn test_config() -> RuntimeConfig {
    RuntimeConfig {
        heartbeat_interval_secs: 1,
        poll_interval_secs: 1,
        temp_path: std::env::temp_dir()
            .join("fileflow-runner-test")
            .to_string_lossy()
            .into_owned(),
        event_buffer_size: 100,
    }
}

fn create_runtime(second_part: &str) -> (Arc<FlowRuntime>, Flow) {
    let mut registry = PartRegistry::new();
    registry.register(Arc::new(Factory("test.shrink")));
    registry.register(Arc::new(Factory("test.wait")));
    let runtime = Arc::new(FlowRuntime::with_registry(Arc::new(registry), test_config()));

    let mut flow = Flow::new("test flow");
    let input = flow.add_part(FlowPartSpec::new("test.shrink").with_kind(PartKind::Input));
    let next = flow.add_part(FlowPartSpec::new(second_part));
    flow.connect(input, 1, next);
    (runtime, flow)
}

#[tokio::test]
async fn completed_run_records_processed_with_final_size() {
    let (runtime, flow) = create_runtime("test.shrink");
    let library = Library::new("tv", "/media/tv").with_flow(flow.uid);
    let file = LibraryFile::new(library.uid, "show/e01.mkv", 1000);
    let node = ProcessingNode::new("node-1", "http://node-1:5000/", 1)
        .with_mapping("/media", "/mnt/media");

    let channel = Arc::new(RecordingChannel::default());
    let source = Arc::new(QueueSource::new(library, flow, vec![]));
    let runner = FileRunner::new(runtime, node, channel.clone(), source.clone());

    let status = runner
        .run(file.clone(), HashMap::new(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(status, FileStatus::Processed);
    let completed = source.completed();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].0, file.uid);
    assert_eq!(completed[0].1.status, Some(FileStatus::Processed));
    assert_eq!(completed[0].1.final_size, Some(5));

    let lines = channel.lines.lock().unwrap().clone();
    assert!(lines.iter().any(|l| l.contains("shrinking /mnt/media/tv/show/e01.mkv")));
    assert_eq!(channel.finished.lock().unwrap().len(), 1);

    let hellos = channel.hellos.lock().unwrap().clone();
    assert!(hellos.iter().any(|h| h.current_part == 2 && h.total_parts == 2));
}

#[tokio::test]
async fn missing_flow_marks_file_flow_not_found() {
    let (runtime, flow) = create_runtime("test.shrink");
    let library = Library::new("tv", "/media/tv").with_flow(uuid::Uuid::new_v4());
    let file = LibraryFile::new(library.uid, "a.mkv", 10);
    let source = Arc::new(QueueSource::new(library, flow, vec![]));
    let runner = FileRunner::new(
        runtime,
        ProcessingNode::new("n", "http://n:5000/", 1),
        Arc::new(RecordingChannel::default()),
        source.clone(),
    );

    let status = runner.run(file, HashMap::new(), CancellationToken::new()).await.unwrap();
    assert_eq!(status, FileStatus::FlowNotFound);
    assert_eq!(source.completed()[0].1.status, Some(FileStatus::FlowNotFound));
}

#[tokio::test]
async fn cancelled_run_releases_the_file() {
    let (runtime, flow) = create_runtime("test.wait");
    let library = Library::new("tv", "/media/tv").with_flow(flow.uid);
    let file = LibraryFile::new(library.uid, "a.mkv", 10);
    let source = Arc::new(QueueSource::new(library, flow, vec![]));
    let runner = FileRunner::new(
        runtime,
        ProcessingNode::new("n", "http://n:5000/", 1),
        Arc::new(RecordingChannel::default()),
        source.clone(),
    );

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        canceller.cancel();
    });

    let status = runner.run(file, HashMap::new(), token).await.unwrap();
    assert_eq!(status, FileStatus::Unprocessed);
    let update = &source.completed()[0].1;
    assert_eq!(update.status, Some(FileStatus::Unprocessed));
    assert_eq!(update.node_uid, Patch::Clear);
}

#[tokio::test]
async fn worker_drains_the_queue_and_stops() {
    init_tracing();
    let (runtime, flow) = create_runtime("test.shrink");
    let library = Library::new("tv", "/media/tv").with_flow(flow.uid);
    let files: Vec<_> = (0..3)
        .map(|i| LibraryFile::new(library.uid, format!("f{}.mkv", i), 10))
        .collect();
    let source = Arc::new(QueueSource::new(library, flow, files));
    let runner = Arc::new(FileRunner::new(
        runtime,
        ProcessingNode::new("n", "http://n:5000/", 2),
        Arc::new(RecordingChannel::default()),
        source.clone(),
    ));
    let worker = NodeWorker::new(runner, source.clone(), Duration::from_millis(20));

    let shutdown = CancellationToken::new();
    let stopper = shutdown.clone();
    let observed = source.clone();
    tokio::spawn(async move {
        for _ in 0..200 {
            if observed.completed().len() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        stopper.cancel();
    });

    worker.run(shutdown).await.unwrap();
    let completed = source.completed();
    assert_eq!(completed.len(), 3);
    assert!(completed
        .iter()
        .all(|(_, u)| u.status == Some(FileStatus::Processed)));
}

#[tokio::test]
async fn refused_heartbeat_stops_the_run() {
    let (runtime, flow) = create_runtime("test.wait");
    let library = Library::new("tv", "/media/tv").with_flow(flow.uid);
    let file = LibraryFile::new(library.uid, "a.mkv", 10);
    let source = Arc::new(QueueSource::new(library, flow, vec![]));
    let channel = Arc::new(RecordingChannel::acknowledging(1));
    let runner = FileRunner::new(
        runtime,
        ProcessingNode::new("n", "http://n:5000/", 1),
        channel.clone(),
        source.clone(),
    );

    let started = std::time::Instant::now();
    let status = runner
        .run(file, HashMap::new(), CancellationToken::new())
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(status, FileStatus::Unprocessed);
    assert_eq!(source.completed()[0].1.status, Some(FileStatus::Unprocessed));
    assert!(channel.hellos.lock().unwrap().len() >= 2);
}

#[tokio::test]
async fn dropped_result_still_finishes_the_runner() {
    let (runtime, flow) = create_runtime("test.shrink");
    let library = Library::new("tv", "/media/tv").with_flow(flow.uid);
    let file = LibraryFile::new(library.uid, "a.mkv", 10);
    let source = Arc::new(QueueSource::new(library, flow, vec![]).reclaimed());
    let channel = Arc::new(RecordingChannel::default());
    let runner = FileRunner::new(
        runtime,
        ProcessingNode::new("n", "http://n:5000/", 1),
        channel.clone(),
        source.clone(),
    );

    let status = runner
        .run(file, HashMap::new(), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(status, FileStatus::Processed);
    assert!(source.completed().is_empty());
    assert_eq!(channel.finished.lock().unwrap().len(), 1);
}
