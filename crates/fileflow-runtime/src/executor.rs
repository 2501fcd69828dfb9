use crate::registry::PartRegistry;
use chrono::Utc;
use fileflow_core::{
    EventBus, Flow, FlowLogger, FlowPartSpec, FlowUid, GraphError, Part, PartContext, PartError,
    PartUid, ProgressHandle, RunnerChannel, RunnerUid, StatusEvent, Value,
};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, EdgeRef};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// A part ready to run: its definition, instance and bound properties
struct BoundPart {
    spec: FlowPartSpec,
    part: Arc<dyn Part>,
    /// Descriptor defaults, then the model, then external overrides
    properties: HashMap<String, Value>,
}

/// A validated flow with every part instantiated and its properties bound
pub struct FlowGraph {
    flow_uid: FlowUid,
    name: String,
    graph: DiGraph<PartUid, i32>,
    index: HashMap<PartUid, NodeIndex>,
    parts: HashMap<PartUid, BoundPart>,
    input: PartUid,
}

impl FlowGraph {
    /// Build the graph for `flow`.
    ///
    /// `overrides` are external variables; a key `"{part_uid}.{property}"`
    /// replaces that property of that part whatever its type. Every required
    /// property must be resolved here, so a broken flow fails before any part
    /// runs.
    pub fn build(
        flow: &Flow,
        registry: &PartRegistry,
        overrides: &HashMap<String, Value>,
    ) -> Result<Self, GraphError> {
        flow.validate()?;
        let input = flow.input_part()?.uid;

        let mut graph = DiGraph::new();
        let mut index = HashMap::new();
        for spec in &flow.parts {
            let idx = graph.add_node(spec.uid);
            index.insert(spec.uid, idx);
        }

        for spec in &flow.parts {
            let from = index[&spec.uid];
            for conn in &spec.outputs {
                let to = index
                    .get(&conn.target)
                    .ok_or(GraphError::PartNotFound(conn.target))?;
                graph.add_edge(from, *to, conn.output);
            }
        }

        let mut parts = HashMap::new();
        for spec in &flow.parts {
            let metadata = registry
                .get_metadata(&spec.part_type)
                .ok_or_else(|| GraphError::UnknownPartType(spec.part_type.clone()))?;

            let mut properties: HashMap<String, Value> = metadata
                .properties
                .iter()
                .filter_map(|d| d.default.clone().map(|v| (d.name.clone(), v)))
                .collect();
            properties.extend(spec.model.iter().map(|(k, v)| (k.clone(), v.clone())));

            let prefix = format!("{}.", spec.uid);
            for (key, value) in overrides {
                if let Some(property) = key.strip_prefix(&prefix) {
                    properties.insert(property.to_string(), value.clone());
                }
            }

            for descriptor in metadata.properties.iter().filter(|d| d.required) {
                let resolved = properties
                    .get(&descriptor.name)
                    .map(|v| !v.is_null())
                    .unwrap_or(false);
                if !resolved {
                    return Err(GraphError::MissingRequiredProperty {
                        part: spec.uid,
                        property: descriptor.name.clone(),
                    });
                }
            }

            let part = registry.create_part(spec.uid, &spec.part_type, &properties)?;
            parts.insert(
                spec.uid,
                BoundPart {
                    spec: spec.clone(),
                    part,
                    properties,
                },
            );
        }

        let built = Self {
            flow_uid: flow.uid,
            name: flow.name.clone(),
            graph,
            index,
            parts,
            input,
        };
        let unreachable = built.unreachable_parts();
        if !unreachable.is_empty() {
            tracing::debug!(
                "Flow {} has {} part(s) not reachable from its input",
                flow.uid,
                unreachable.len()
            );
        }
        Ok(built)
    }

    pub fn flow_uid(&self) -> FlowUid {
        self.flow_uid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn input(&self) -> PartUid {
        self.input
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Part that follows `from` when it returns `output`
    pub fn next_part(&self, from: PartUid, output: i32) -> Option<PartUid> {
        let idx = *self.index.get(&from)?;
        self.graph
            .edges(idx)
            .find(|edge| *edge.weight() == output)
            .map(|edge| self.graph[edge.target()])
    }

    /// Properties bound to a part before it runs
    pub fn bound_properties(&self, part: PartUid) -> Option<&HashMap<String, Value>> {
        self.parts.get(&part).map(|p| &p.properties)
    }

    /// Parts no path from the input part leads to
    pub fn unreachable_parts(&self) -> Vec<PartUid> {
        let mut seen = HashSet::new();
        if let Some(start) = self.index.get(&self.input) {
            let mut dfs = Dfs::new(&self.graph, *start);
            while let Some(idx) = dfs.next(&self.graph) {
                seen.insert(self.graph[idx]);
            }
        }
        let mut unreachable: Vec<PartUid> = self
            .parts
            .keys()
            .filter(|uid| !seen.contains(*uid))
            .copied()
            .collect();
        unreachable.sort();
        unreachable
    }
}

/// Lifecycle of one run through a flow graph
#[derive(Debug, Clone, PartialEq)]
pub enum RunState {
    NotStarted,
    /// Executing the n-th part visit, 1-based
    Running(usize),
    /// Ended at `at` because it had no connection for the output it returned
    Completed { at: PartUid },
    Failed { at: PartUid, error: String },
    Cancelled { at: Option<PartUid> },
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Completed { .. } | RunState::Failed { .. } | RunState::Cancelled { .. }
        )
    }
}

/// Everything a single run needs besides the graph
pub struct RunContext {
    pub runner_uid: RunnerUid,
    pub working_file: String,
    pub variables: HashMap<String, Value>,
    pub logger: FlowLogger,
    pub progress: ProgressHandle,
    pub channel: Arc<dyn RunnerChannel>,
    pub cancellation: CancellationToken,
}

/// Outcome of a run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub state: RunState,
    pub variables: HashMap<String, Value>,
    pub working_file: String,
    /// Number of part executions, counting repeat visits
    pub steps: usize,
    pub duration_ms: u64,
}

/// Walks a flow graph one part at a time
pub struct FlowExecutor;

impl FlowExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Execute the graph from its input part until it completes, fails or is
    /// cancelled.
    pub async fn execute(
        &self,
        graph: &FlowGraph,
        run: RunContext,
        events: &EventBus,
    ) -> RunReport {
        let RunContext {
            runner_uid,
            mut working_file,
            mut variables,
            logger,
            progress,
            channel,
            cancellation,
        } = run;

        let start_time = Instant::now();
        let mut self_set: HashMap<PartUid, HashMap<String, Value>> = HashMap::new();
        let mut current = graph.input();
        let mut steps = 0;
        let mut state = RunState::NotStarted;

        progress.update(|info| info.total_parts = graph.len());
        tracing::info!("Starting flow {} ({})", graph.name(), graph.flow_uid());

        while !state.is_terminal() {
            if cancellation.is_cancelled() {
                logger.warn("Flow cancelled");
                state = RunState::Cancelled { at: Some(current) };
                break;
            }

            let Some(bound) = graph.parts.get(&current) else {
                state = RunState::Failed {
                    at: current,
                    error: format!("part {} not found", current),
                };
                break;
            };

            steps += 1;
            state = RunState::Running(steps);
            let part_name = bound.spec.display_name().to_string();

            let mut properties = bound.properties.clone();
            if let Some(own) = self_set.get(&current) {
                properties.extend(own.iter().map(|(k, v)| (k.clone(), v.clone())));
            }

            let ctx = PartContext {
                part_uid: current,
                properties,
                variables: variables.clone(),
                working_file: working_file.clone(),
                logger: logger.clone(),
                progress: progress.clone(),
                cancellation: cancellation.child_token(),
            };

            progress.update(|info| {
                info.current_part = steps;
                info.current_part_name = Some(part_name.clone());
                info.percent = 0.0;
            });
            logger.info(format!(
                "Executing part {}: {} [{}]",
                steps, part_name, bound.spec.part_type
            ));
            events.emit(StatusEvent::PartStarted {
                runner_uid,
                part_uid: current,
                part_type: bound.spec.part_type.clone(),
                step: steps,
                timestamp: Utc::now(),
            });

            let part = bound.part.clone();
            let part_start = Instant::now();
            let mut task = tokio::spawn(async move { part.execute(ctx).await });

            let result = tokio::select! {
                joined = &mut task => match joined {
                    Ok(result) => result,
                    Err(e) if e.is_panic() => {
                        Err(PartError::ExecutionFailed(format!("part panicked: {}", e)))
                    }
                    Err(_) => Err(PartError::Cancelled),
                },
                _ = cancellation.cancelled() => {
                    task.abort();
                    Err(PartError::Cancelled)
                }
            };
            let duration_ms = part_start.elapsed().as_millis() as u64;

            match result {
                Ok(output) => {
                    logger.info(format!(
                        "Part '{}' completed with output {} in {}ms",
                        part_name, output.output, duration_ms
                    ));
                    events.emit(StatusEvent::PartCompleted {
                        runner_uid,
                        part_uid: current,
                        output: output.output,
                        duration_ms,
                        timestamp: Utc::now(),
                    });

                    variables.extend(output.variables);
                    if !output.properties.is_empty() {
                        self_set.entry(current).or_default().extend(output.properties);
                    }
                    if let Some(path) = output.working_file {
                        working_file = path;
                    }

                    progress.set_percent(100.0);
                    if let Some(info) = progress.snapshot() {
                        match channel.hello(runner_uid, info).await {
                            Ok(true) => {}
                            Ok(false) => {
                                // the host no longer tracks this run; its claim is gone
                                logger.warn("Host refused the heartbeat, stopping the run");
                                tracing::warn!("Host did not acknowledge runner {}", runner_uid);
                                cancellation.cancel();
                            }
                            Err(e) => {
                                tracing::warn!("Heartbeat for runner {} failed: {}", runner_uid, e)
                            }
                        }
                    }

                    match graph.next_part(current, output.output) {
                        Some(next) => current = next,
                        None => {
                            logger.info(format!("Flow completed at '{}'", part_name));
                            state = RunState::Completed { at: current };
                        }
                    }
                }
                Err(PartError::Cancelled) => {
                    logger.warn(format!("Part '{}' cancelled", part_name));
                    state = RunState::Cancelled { at: Some(current) };
                }
                Err(e) => {
                    logger.error(format!("Part '{}' failed: {}", part_name, e));
                    tracing::error!("Part {} failed: {}", current, e);
                    state = RunState::Failed {
                        at: current,
                        error: e.to_string(),
                    };
                }
            }
        }

        RunReport {
            state,
            variables,
            working_file,
            steps,
            duration_ms: start_time.elapsed().as_millis() as u64,
        }
    }
}

impl Default for FlowExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{PartFactory, PartMetadata};
    use async_trait::async_trait;
    use fileflow_core::{
        ChannelError, DetachedChannel, FileUid, PartKind, PartOutput, ProgressInfo,
        PropertyDescriptor, PropertyKind,
    };
    use std::time::Duration;

    /// Host that no longer knows the runner
    struct RefusingChannel;

    #[async_trait]
    impl RunnerChannel for RefusingChannel {
        async fn hello(
            &self,
            _runner_uid: RunnerUid,
            _info: ProgressInfo,
        ) -> Result<bool, ChannelError> {
            Ok(false)
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

    /// Logs its `label`, counts its own visits and leaves by output 2 on the third
    struct Echo;

    #[async_trait]
    impl Part for Echo {
        fn part_type(&self) -> &str {
            "test.echo"
        }

        async fn execute(&self, ctx: PartContext) -> Result<PartOutput, PartError> {
            let label = ctx.require_property("label")?.to_display_string();
            ctx.logger.info(format!("echo {}", label));
            let visits = ctx.property_f64("visits", 0.0) + 1.0;
            let output = if visits >= 3.0 {
                2
            } else {
                ctx.property_f64("output", 1.0) as i32
            };
            Ok(PartOutput::next(output)
                .with_variable("last", label)
                .with_own_property("visits", visits))
        }
    }

    struct EchoFactory;

    impl PartFactory for EchoFactory {
        fn create(&self, _properties: &HashMap<String, Value>) -> Result<Box<dyn Part>, PartError> {
            Ok(Box::new(Echo))
        }

        fn part_type(&self) -> &str {
            "test.echo"
        }

        fn metadata(&self) -> PartMetadata {
            PartMetadata {
                properties: vec![
                    PropertyDescriptor::required("label", PropertyKind::String),
                    PropertyDescriptor::optional("output", PropertyKind::Number, 1.0),
                ],
                ..PartMetadata::default()
            }
        }
    }

    struct Explode;

    #[async_trait]
    impl Part for Explode {
        fn part_type(&self) -> &str {
            "test.explode"
        }

        async fn execute(&self, _ctx: PartContext) -> Result<PartOutput, PartError> {
            panic!("boom");
        }
    }

    struct Sleep;

    #[async_trait]
    impl Part for Sleep {
        fn part_type(&self) -> &str {
            "test.sleep"
        }

        async fn execute(&self, _ctx: PartContext) -> Result<PartOutput, PartError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(PartOutput::next(1))
        }
    }

    struct Simple(&'static str, fn() -> Box<dyn Part>);

    impl PartFactory for Simple {
        fn create(&self, _properties: &HashMap<String, Value>) -> Result<Box<dyn Part>, PartError> {
            Ok((self.1)())
        }

        fn part_type(&self) -> &str {
            self.0
        }
    }

    fn registry() -> PartRegistry {
        let mut registry = PartRegistry::new();
        registry.register(Arc::new(EchoFactory));
        registry.register(Arc::new(Simple("test.explode", || Box::new(Explode))));
        registry.register(Arc::new(Simple("test.sleep", || Box::new(Sleep))));
        registry
    }

    fn run_context(cancellation: CancellationToken) -> RunContext {
        RunContext {
            runner_uid: uuid::Uuid::new_v4(),
            working_file: "/media/a.mkv".to_string(),
            variables: HashMap::new(),
            logger: FlowLogger::new(),
            progress: ProgressHandle::default(),
            channel: Arc::new(DetachedChannel),
            cancellation,
        }
    }

    fn echo(label: &str) -> FlowPartSpec {
        FlowPartSpec::new("test.echo").with_property("label", label)
    }

    #[tokio::test]
    async fn linear_flow_completes_at_last_part() {
        let mut flow = Flow::new("linear");
        let input = flow.add_part(echo("input").with_kind(PartKind::Input));
        let a = flow.add_part(echo("a"));
        let b = flow.add_part(echo("b"));
        flow.connect(input, 1, a);
        flow.connect(a, 1, b);

        let graph = FlowGraph::build(&flow, &registry(), &HashMap::new()).unwrap();
        let run = run_context(CancellationToken::new());
        let logger = run.logger.clone();
        let report = FlowExecutor::new().execute(&graph, run, &EventBus::default()).await;

        assert_eq!(report.state, RunState::Completed { at: b });
        assert_eq!(report.steps, 3);
        assert_eq!(report.variables.get("last"), Some(&Value::from("b")));
        let lines = logger.lines();
        assert!(lines.iter().any(|l| l.contains("echo a")));
        let a_pos = lines.iter().position(|l| l.contains("echo a")).unwrap();
        let b_pos = lines.iter().position(|l| l.contains("echo b")).unwrap();
        assert!(a_pos < b_pos);
    }

    #[tokio::test]
    async fn external_override_beats_model() {
        let mut flow = Flow::new("override");
        let input = flow.add_part(echo("model").with_kind(PartKind::Input));

        let mut overrides = HashMap::new();
        overrides.insert(format!("{}.label", input), Value::from(42_i64));
        let graph = FlowGraph::build(&flow, &registry(), &overrides).unwrap();

        assert_eq!(
            graph.bound_properties(input).unwrap().get("label"),
            Some(&Value::from(42_i64))
        );
        let report = FlowExecutor::new()
            .execute(&graph, run_context(CancellationToken::new()), &EventBus::default())
            .await;
        assert_eq!(report.variables.get("last"), Some(&Value::from("42")));
    }

    #[test]
    fn missing_required_property_fails_at_build() {
        let mut flow = Flow::new("broken");
        let input = flow.add_part(FlowPartSpec::input("test.echo"));
        let err = FlowGraph::build(&flow, &registry(), &HashMap::new()).err();
        assert_eq!(
            err,
            Some(GraphError::MissingRequiredProperty {
                part: input,
                property: "label".to_string()
            })
        );
    }

    #[test]
    fn unknown_part_type_fails_at_build() {
        let mut flow = Flow::new("unknown");
        flow.add_part(FlowPartSpec::input("nope"));
        let err = FlowGraph::build(&flow, &registry(), &HashMap::new()).err();
        assert_eq!(err, Some(GraphError::UnknownPartType("nope".to_string())));
    }

    #[tokio::test]
    async fn self_set_properties_drive_a_loop() {
        let mut flow = Flow::new("loop");
        let input = flow.add_part(echo("input").with_kind(PartKind::Input));
        let looper = flow.add_part(echo("loop"));
        flow.connect(input, 1, looper);
        flow.connect(looper, 1, looper);

        let graph = FlowGraph::build(&flow, &registry(), &HashMap::new()).unwrap();
        let report = FlowExecutor::new()
            .execute(&graph, run_context(CancellationToken::new()), &EventBus::default())
            .await;

        // input, then the loop part three times until it switches to output 2
        assert_eq!(report.steps, 4);
        assert_eq!(report.state, RunState::Completed { at: looper });
    }

    #[tokio::test]
    async fn panicking_part_fails_the_run() {
        let mut flow = Flow::new("panic");
        let input = flow.add_part(echo("input").with_kind(PartKind::Input));
        let bad = flow.add_part(FlowPartSpec::new("test.explode"));
        let after = flow.add_part(echo("after"));
        flow.connect(input, 1, bad);
        flow.connect(bad, 1, after);

        let graph = FlowGraph::build(&flow, &registry(), &HashMap::new()).unwrap();
        let run = run_context(CancellationToken::new());
        let logger = run.logger.clone();
        let report = FlowExecutor::new().execute(&graph, run, &EventBus::default()).await;

        assert!(matches!(report.state, RunState::Failed { at, .. } if at == bad));
        assert!(!logger.lines().iter().any(|l| l.contains("echo after")));
    }

    #[tokio::test]
    async fn refused_heartbeat_cancels_before_the_next_part() {
        let mut flow = Flow::new("linear");
        let input = flow.add_part(echo("input").with_kind(PartKind::Input));
        let a = flow.add_part(echo("a"));
        flow.connect(input, 1, a);

        let graph = FlowGraph::build(&flow, &registry(), &HashMap::new()).unwrap();
        let token = CancellationToken::new();
        let mut run = run_context(token.clone());
        run.progress = ProgressHandle::new(ProgressInfo::ping(uuid::Uuid::new_v4()));
        run.channel = Arc::new(RefusingChannel);
        let logger = run.logger.clone();
        let report = FlowExecutor::new().execute(&graph, run, &EventBus::default()).await;

        assert_eq!(report.state, RunState::Cancelled { at: Some(a) });
        assert!(token.is_cancelled());
        assert!(!logger.lines().iter().any(|l| l.contains("echo a")));
    }

    #[tokio::test]
    async fn cancellation_stops_a_running_part() {
        let mut flow = Flow::new("slow");
        let input = flow.add_part(echo("input").with_kind(PartKind::Input));
        let slow = flow.add_part(FlowPartSpec::new("test.sleep"));
        flow.connect(input, 1, slow);

        let graph = FlowGraph::build(&flow, &registry(), &HashMap::new()).unwrap();
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let started = Instant::now();
        let report = FlowExecutor::new()
            .execute(&graph, run_context(token), &EventBus::default())
            .await;
        assert_eq!(report.state, RunState::Cancelled { at: Some(slow) });
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn unreachable_parts_are_reported() {
        let mut flow = Flow::new("island");
        flow.add_part(echo("input").with_kind(PartKind::Input));
        let island = flow.add_part(echo("island"));
        let graph = FlowGraph::build(&flow, &registry(), &HashMap::new()).unwrap();
        assert_eq!(graph.unreachable_parts(), vec![island]);
    }
}
