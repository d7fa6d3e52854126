//! Flow runner: executes a workflow graph over a fresh transcript per run.
//!
//! [`Flow::run_stream`] seeds the transcript with the task, walks the stages
//! in topological order, and yields every appended message as soon as it
//! exists. After each message the termination predicate is checked; a match
//! ends the run on the spot, even in the middle of a stage. Dropping the
//! stream cancels the run and frees its transcript.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::pin::Pin;

use async_stream::stream;
use dossier_shared::{
    DossierError, GraphError, Message, MessageKind, PipelineConfig, Result, StageId,
};
use futures::{Stream, StreamExt};
use tracing::{Instrument, debug, info, info_span, instrument, warn};
use uuid::Uuid;

use crate::graph::WorkflowGraph;
use crate::stage::CapabilityUnit;
use crate::transcript::Transcript;

/// Text returned by [`FinalAnswer::NoResponse`].
pub const NO_RESPONSE: &str = "no response generated";

pub type FlowStream<'a> = Pin<Box<dyn Stream<Item = Result<FlowEvent>> + Send + 'a>>;

// ---------------------------------------------------------------------------
// Settings and events
// ---------------------------------------------------------------------------

/// Termination and answer-selection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowSettings {
    /// Case-sensitive phrase whose appearance in a message stops the run.
    pub sentinel: String,
    /// Only messages from this stage can stop the run. `None` means any.
    pub sentinel_stage: Option<StageId>,
    /// Stage whose last text message becomes the final answer.
    pub synthesis_stage: StageId,
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

impl From<&PipelineConfig> for FlowSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            sentinel: config.sentinel.clone(),
            sentinel_stage: config.sentinel_stage.as_deref().map(StageId::new),
            synthesis_stage: StageId::new(&config.synthesis_stage),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FlowEvent {
    /// A stage is about to run.
    StageStarted { stage: StageId },
    /// A message was appended to the transcript.
    Message(Message),
    /// The run is over. Always the last event of a successful run.
    Completed(RunOutcome),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub stop: StopReason,
    /// Transcript length at the end of the run, seed included.
    pub messages: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The sentinel appeared in the message at `sequence`.
    Sentinel { stage: StageId, sequence: u64 },
    /// Every stage ran without the sentinel appearing.
    Exhausted,
}

/// Result of [`Flow::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalAnswer {
    Answer(String),
    NoResponse,
}

impl fmt::Display for FinalAnswer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Answer(text) => f.write_str(text),
            Self::NoResponse => f.write_str(NO_RESPONSE),
        }
    }
}

// ---------------------------------------------------------------------------
// Flow
// ---------------------------------------------------------------------------

/// A validated graph bound to one capability unit per stage.
///
/// A `Flow` holds no per-run state, so one instance can serve concurrent runs.
pub struct Flow {
    graph: WorkflowGraph,
    units: HashMap<StageId, CapabilityUnit>,
    settings: FlowSettings,
}

impl Flow {
    pub fn new(
        graph: WorkflowGraph,
        units: Vec<CapabilityUnit>,
        settings: FlowSettings,
    ) -> Result<Self> {
        if settings.sentinel.is_empty() {
            return Err(DossierError::validation("sentinel phrase must not be empty"));
        }

        let mut bound = HashMap::with_capacity(units.len());
        for unit in units {
            if !graph.contains(unit.id()) {
                return Err(DossierError::validation(format!(
                    "unit `{}` has no stage in the graph",
                    unit.id()
                )));
            }
            let id = unit.id().clone();
            if bound.insert(id.clone(), unit).is_some() {
                return Err(GraphError::DuplicateNode(id).into());
            }
        }

        if let Some(missing) = graph.participants().iter().find(|s| !bound.contains_key(*s)) {
            return Err(GraphError::UnboundStage(missing.clone()).into());
        }

        let referenced = std::iter::once(&settings.synthesis_stage).chain(&settings.sentinel_stage);
        for stage in referenced {
            if !graph.contains(stage) {
                return Err(DossierError::config(format!(
                    "pipeline setting names unknown stage `{stage}`"
                )));
            }
        }

        Ok(Self {
            graph,
            units: bound,
            settings,
        })
    }

    pub fn graph(&self) -> &WorkflowGraph {
        &self.graph
    }

    pub fn settings(&self) -> &FlowSettings {
        &self.settings
    }

    /// Start a run and stream its events. Each call gets its own transcript.
    pub fn run_stream(&self, task: impl Into<String>) -> FlowStream<'_> {
        let task = task.into();
        let run_id = Uuid::now_v7();

        Box::pin(stream! {
            info!(%run_id, stages = self.graph.participants().len(), "run started");

            let mut transcript = Transcript::new();
            let seed = transcript.append(&StageId::user(), MessageKind::Text, task.into());
            let stop = self.stops_run(&seed);
            yield Ok(FlowEvent::Message(seed));
            if let Some(stop) = stop {
                info!(%run_id, "sentinel found in task");
                yield Ok(FlowEvent::Completed(RunOutcome { run_id, stop, messages: transcript.len() }));
                return;
            }

            for stage in self.graph.participants() {
                let unit = &self.units[stage];
                let view = self.view_for(stage, &transcript);
                let span = info_span!("stage", %run_id, stage = %stage);
                debug!(%run_id, stage = %stage, view = view.len(), "invoking stage");
                yield Ok(FlowEvent::StageStarted { stage: stage.clone() });

                let mut turn = unit.start_turn(view);
                loop {
                    let output = match turn.next().instrument(span.clone()).await {
                        Ok(Some(output)) => output,
                        Ok(None) => break,
                        Err(e) => {
                            warn!(%run_id, stage = %stage, error = %e, "run aborted");
                            yield Err(e);
                            return;
                        }
                    };

                    let message = transcript.append(stage, output.kind, output.content);
                    let stop = self.stops_run(&message);
                    yield Ok(FlowEvent::Message(message));
                    if let Some(stop) = stop {
                        info!(%run_id, stage = %stage, messages = transcript.len(), "sentinel observed");
                        yield Ok(FlowEvent::Completed(RunOutcome { run_id, stop, messages: transcript.len() }));
                        return;
                    }
                }
            }

            info!(%run_id, messages = transcript.len(), "run exhausted without sentinel");
            yield Ok(FlowEvent::Completed(RunOutcome {
                run_id,
                stop: StopReason::Exhausted,
                messages: transcript.len(),
            }));
        })
    }

    /// Run to completion and return the synthesis stage's answer.
    ///
    /// The answer is the last text message of the synthesis stage, provided
    /// the run stopped on the sentinel. Exhausted runs and runs where the
    /// synthesis stage said nothing give [`FinalAnswer::NoResponse`]; aborted
    /// runs return the error.
    #[instrument(skip_all)]
    pub async fn run(&self, task: impl Into<String>) -> Result<FinalAnswer> {
        self.run_observed(task, |_| {}).await
    }

    /// [`run`](Self::run), handing every event to `observe` as it arrives.
    pub async fn run_observed(
        &self,
        task: impl Into<String>,
        mut observe: impl FnMut(&FlowEvent),
    ) -> Result<FinalAnswer> {
        let mut events = self.run_stream(task);
        let mut last_synthesis = None;

        while let Some(event) = events.next().await {
            let event = event?;
            observe(&event);
            match event {
                FlowEvent::Message(message)
                    if message.is_text() && message.source == self.settings.synthesis_stage =>
                {
                    last_synthesis = Some(message.content.to_text());
                }
                FlowEvent::Completed(outcome) => {
                    return Ok(match (outcome.stop, last_synthesis) {
                        (StopReason::Sentinel { .. }, Some(answer)) => FinalAnswer::Answer(answer),
                        _ => FinalAnswer::NoResponse,
                    });
                }
                _ => {}
            }
        }

        Ok(FinalAnswer::NoResponse)
    }

    /// Union of what every incoming edge lets `stage` see, in transcript
    /// order. The entry stage and unfiltered edges see everything.
    fn view_for(&self, stage: &StageId, transcript: &Transcript) -> Vec<Message> {
        let all = transcript.messages();
        if stage == self.graph.entry() {
            return all.to_vec();
        }

        let mut selected: BTreeMap<u64, &Message> = BTreeMap::new();
        for edge in self.graph.incoming(stage) {
            match &edge.filter {
                None => return all.to_vec(),
                Some(filter) => {
                    for message in filter.select(all) {
                        selected.insert(message.sequence, message);
                    }
                }
            }
        }
        selected.into_values().cloned().collect()
    }

    fn stops_run(&self, message: &Message) -> Option<StopReason> {
        let from_allowed_stage = self
            .settings
            .sentinel_stage
            .as_ref()
            .is_none_or(|stage| stage == &message.source);

        (from_allowed_stage && message.content.contains(&self.settings.sentinel)).then(|| {
            StopReason::Sentinel {
                stage: message.source.clone(),
                sequence: message.sequence,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use serde_json::{Value, json};

    use super::*;
    use crate::completion::{Completion, CompletionRequest, CompletionService};
    use crate::filter::{EdgeFilter, MessageFilter};
    use crate::tools::Tool;

    /// Per-stage scripted replies; also records the view each stage received.
    #[derive(Default)]
    struct Script {
        replies: Mutex<HashMap<String, Vec<Completion>>>,
        views: Mutex<Vec<(String, Vec<u64>)>>,
        calls: AtomicUsize,
    }

    impl Script {
        fn with(replies: &[(&str, Completion)]) -> Arc<Self> {
            let script = Self::default();
            {
                let mut map = script.replies.lock().unwrap();
                for (stage, reply) in replies {
                    map.entry(stage.to_string()).or_default().push(reply.clone());
                }
            }
            Arc::new(script)
        }

        fn view_of(&self, stage: &str) -> Vec<u64> {
            self.views
                .lock()
                .unwrap()
                .iter()
                .find(|(s, _)| s == stage)
                .map(|(_, v)| v.clone())
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl CompletionService for Script {
        async fn complete(&self, request: CompletionRequest<'_>) -> Result<Completion> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.views.lock().unwrap().push((
                request.stage.to_string(),
                request.history.iter().map(|m| m.sequence).collect(),
            ));
            let mut replies = self.replies.lock().unwrap();
            match replies.get_mut(request.stage.as_str()) {
                Some(queue) if !queue.is_empty() => Ok(queue.remove(0)),
                _ => Err(DossierError::Network(format!("no reply for {}", request.stage))),
            }
        }
    }

    #[derive(Default)]
    struct CountingTool {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Tool for CountingTool {
        fn name(&self) -> &str {
            "count"
        }
        fn description(&self) -> &str {
            "counts calls"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object"})
        }
        async fn call(&self, _arguments: Value) -> Result<Value> {
            Ok(json!(self.calls.fetch_add(1, Ordering::SeqCst) + 1))
        }
    }

    fn chain(script: &Arc<Script>, settings: FlowSettings) -> Flow {
        let graph = WorkflowGraph::builder()
            .add_node("a")
            .add_node("b")
            .add_node("c")
            .add_edge("a", "b")
            .add_edge("b", "c")
            .build()
            .unwrap();
        let units = ["a", "b", "c"]
            .into_iter()
            .map(|id| CapabilityUnit::responder(id, format!("you are {id}"), script.clone()))
            .collect();
        Flow::new(graph, units, settings).unwrap()
    }

    fn settings(synthesis: &str) -> FlowSettings {
        FlowSettings {
            sentinel: "Goodbye".into(),
            sentinel_stage: None,
            synthesis_stage: synthesis.into(),
        }
    }

    async fn collect(flow: &Flow, task: &str) -> Vec<Result<FlowEvent>> {
        flow.run_stream(task).collect().await
    }

    fn messages(events: &[Result<FlowEvent>]) -> Vec<&Message> {
        events
            .iter()
            .filter_map(|e| match e {
                Ok(FlowEvent::Message(m)) => Some(m),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn stages_run_in_order_and_stop_on_sentinel() {
        let script = Script::with(&[
            ("a", Completion::text("intent")),
            ("b", Completion::text("answer")),
            ("c", Completion::text("Goodbye")),
        ]);
        let flow = chain(&script, settings("b"));

        let events = collect(&flow, "task").await;
        let msgs = messages(&events);
        let sources: Vec<_> = msgs.iter().map(|m| m.source.as_str()).collect();
        assert_eq!(sources, ["user", "a", "b", "c"]);
        let seqs: Vec<_> = msgs.iter().map(|m| m.sequence).collect();
        assert_eq!(seqs, [0, 1, 2, 3]);

        match events.last().unwrap() {
            Ok(FlowEvent::Completed(outcome)) => {
                assert_eq!(
                    outcome.stop,
                    StopReason::Sentinel {
                        stage: "c".into(),
                        sequence: 3
                    }
                );
                assert_eq!(outcome.messages, 4);
            }
            other => panic!("unexpected last event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn run_returns_synthesis_text() {
        let script = Script::with(&[
            ("a", Completion::text("intent")),
            ("b", Completion::text("the answer")),
            ("c", Completion::text("Goodbye")),
        ]);
        let answer = chain(&script, settings("b")).run("task").await.unwrap();
        assert_eq!(answer, FinalAnswer::Answer("the answer".into()));
    }

    #[tokio::test]
    async fn observed_run_sees_every_event_and_same_answer() {
        let script = Script::with(&[
            ("a", Completion::text("intent")),
            ("b", Completion::text("the answer")),
            ("c", Completion::text("Goodbye")),
        ]);
        let flow = chain(&script, settings("b"));

        let mut seen = Vec::new();
        let answer = flow
            .run_observed("task", |event| seen.push(event.clone()))
            .await
            .unwrap();

        assert_eq!(answer, FinalAnswer::Answer("the answer".into()));
        // seed, then (started, message) for each of the three stages, then completion
        assert_eq!(seen.len(), 8);
        assert!(matches!(seen.last(), Some(FlowEvent::Completed(_))));
    }

    #[tokio::test]
    async fn exhaustion_is_no_response() {
        let script = Script::with(&[
            ("a", Completion::text("intent")),
            ("b", Completion::text("the answer")),
            ("c", Completion::text("see you later")),
        ]);
        let flow = chain(&script, settings("b"));

        let answer = flow.run("task").await.unwrap();
        assert_eq!(answer, FinalAnswer::NoResponse);
        assert_eq!(answer.to_string(), "no response generated");
    }

    #[tokio::test]
    async fn exhausted_stream_ends_with_exhausted_outcome() {
        let script = Script::with(&[
            ("a", Completion::text("1")),
            ("b", Completion::text("2")),
            ("c", Completion::text("3")),
        ]);
        let events = collect(&chain(&script, settings("b")), "task").await;
        assert!(matches!(
            events.last(),
            Some(Ok(FlowEvent::Completed(RunOutcome {
                stop: StopReason::Exhausted,
                ..
            })))
        ));
    }

    #[tokio::test]
    async fn sentinel_mid_stage_skips_pending_tool() {
        let script = Script::with(&[
            ("a", Completion::tool_call("1", "count", json!({"note": "Goodbye"}))),
        ]);
        let tool = Arc::new(CountingTool::default());
        let graph = WorkflowGraph::builder()
            .add_node("a")
            .add_node("b")
            .add_edge("a", "b")
            .build()
            .unwrap();
        let flow = Flow::new(
            graph,
            vec![
                CapabilityUnit::tool_caller("a", "x", script.clone(), vec![tool.clone() as Arc<dyn Tool>]),
                CapabilityUnit::responder("b", "y", script.clone()),
            ],
            settings("b"),
        )
        .unwrap();

        let events = collect(&flow, "task").await;
        let last = messages(&events).last().unwrap().kind;
        assert_eq!(last, MessageKind::ToolCall);
        assert_eq!(tool.calls.load(Ordering::SeqCst), 0);
        assert_eq!(script.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sentinel_in_task_stops_before_any_stage() {
        let script = Script::with(&[]);
        let flow = chain(&script, settings("b"));

        let answer = flow.run("Goodbye everyone").await.unwrap();
        assert_eq!(answer, FinalAnswer::NoResponse);
        assert_eq!(script.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn sentinel_can_be_restricted_to_one_stage() {
        let script = Script::with(&[
            ("a", Completion::text("intent")),
            ("b", Completion::text("Goodbye is a word in this answer")),
            ("c", Completion::text("Goodbye")),
        ]);
        let flow = chain(
            &script,
            FlowSettings {
                sentinel_stage: Some("c".into()),
                ..settings("b")
            },
        );

        let answer = flow.run("task").await.unwrap();
        assert_eq!(
            answer,
            FinalAnswer::Answer("Goodbye is a word in this answer".into())
        );
        assert_eq!(script.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stage_failure_aborts_run_after_earlier_messages() {
        let script = Script::with(&[("a", Completion::text("intent"))]);
        let flow = chain(&script, settings("b"));

        let events = collect(&flow, "task").await;
        assert_eq!(messages(&events).len(), 2);
        match events.last().unwrap() {
            Err(DossierError::StageInvocation { stage, .. }) => assert_eq!(stage.as_str(), "b"),
            other => panic!("expected stage error, got {other:?}"),
        }

        let err = flow.run("task").await.unwrap_err();
        assert!(matches!(err, DossierError::StageInvocation { .. }));
    }

    #[tokio::test]
    async fn filtered_edge_narrows_view() {
        let script = Script::with(&[
            ("a", Completion::text("intent")),
            ("b", Completion::text("answer")),
            ("c", Completion::text("Goodbye")),
        ]);
        let graph = WorkflowGraph::builder()
            .add_node("a")
            .add_node("b")
            .add_node("c")
            .add_edge("a", "b")
            .add_filtered_edge("b", "c", EdgeFilter::single(MessageFilter::last("b", 0)))
            .build()
            .unwrap();
        let units = ["a", "b", "c"]
            .into_iter()
            .map(|id| CapabilityUnit::responder(id, "x", script.clone()))
            .collect();
        let flow = Flow::new(graph, units, settings("b")).unwrap();

        flow.run("task").await.unwrap();
        assert_eq!(script.view_of("a"), [0]);
        assert_eq!(script.view_of("b"), [0, 1]);
        assert!(script.view_of("c").is_empty());
    }

    #[tokio::test]
    async fn merged_views_from_several_edges() {
        let script = Script::with(&[
            ("a", Completion::text("intent")),
            ("b", Completion::text("left")),
            ("c", Completion::text("right")),
            ("d", Completion::text("Goodbye")),
        ]);
        let graph = WorkflowGraph::builder()
            .add_node("a")
            .add_node("b")
            .add_node("c")
            .add_node("d")
            .add_edge("a", "b")
            .add_edge("a", "c")
            .add_filtered_edge("b", "d", EdgeFilter::single(MessageFilter::last("b", 1)))
            .add_filtered_edge(
                "c",
                "d",
                EdgeFilter::new(vec![MessageFilter::last("c", 1), MessageFilter::last("b", 1)]),
            )
            .build()
            .unwrap();
        let units = ["a", "b", "c", "d"]
            .into_iter()
            .map(|id| CapabilityUnit::responder(id, "x", script.clone()))
            .collect();
        let flow = Flow::new(graph, units, settings("b")).unwrap();

        flow.run("task").await.unwrap();
        assert_eq!(script.view_of("d"), [2, 3]);
    }

    #[tokio::test]
    async fn dropping_stream_stops_the_run() {
        let script = Script::with(&[
            ("a", Completion::text("intent")),
            ("b", Completion::text("answer")),
            ("c", Completion::text("Goodbye")),
        ]);
        let flow = chain(&script, settings("b"));

        {
            let mut events = flow.run_stream("task");
            // seed, stage a started, a's message
            for _ in 0..3 {
                events.next().await.unwrap().unwrap();
            }
        }
        assert_eq!(script.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_runs_have_independent_transcripts() {
        let script = Script::with(&[
            ("a", Completion::text("one")),
            ("a", Completion::text("two")),
            ("b", Completion::text("x")),
            ("b", Completion::text("y")),
            ("c", Completion::text("Goodbye")),
            ("c", Completion::text("Goodbye")),
        ]);
        let flow = chain(&script, settings("b"));

        let (left, right) = tokio::join!(collect(&flow, "left"), collect(&flow, "right"));
        for events in [&left, &right] {
            let seqs: Vec<_> = messages(events).iter().map(|m| m.sequence).collect();
            assert_eq!(seqs, [0, 1, 2, 3]);
        }
    }

    #[test]
    fn missing_unit_is_unbound_stage() {
        let script = Script::with(&[]);
        let graph = WorkflowGraph::builder()
            .add_node("a")
            .add_node("b")
            .add_edge("a", "b")
            .build()
            .unwrap();
        let err = Flow::new(
            graph,
            vec![CapabilityUnit::responder("a", "x", script)],
            FlowSettings::default(),
        )
        .err()
        .unwrap();
        assert!(matches!(
            err,
            DossierError::Graph(GraphError::UnboundStage(ref s)) if s.as_str() == "b"
        ));
    }

    #[test]
    fn settings_must_name_graph_stages() {
        let script = Script::with(&[]);
        let graph = WorkflowGraph::builder().add_node("a").build().unwrap();
        let err = Flow::new(
            graph,
            vec![CapabilityUnit::responder("a", "x", script)],
            FlowSettings {
                sentinel_stage: Some("ghost".into()),
                ..settings("a")
            },
        )
        .err()
        .unwrap();
        assert!(err.to_string().contains("unknown stage `ghost`"));
    }

    #[test]
    fn empty_sentinel_is_rejected() {
        let script = Script::with(&[]);
        let graph = WorkflowGraph::builder().add_node("a").build().unwrap();
        let result = Flow::new(
            graph,
            vec![CapabilityUnit::responder("a", "x", script)],
            FlowSettings {
                sentinel: String::new(),
                ..FlowSettings::default()
            },
        );
        assert!(result.is_err());
    }

    #[test]
    fn settings_follow_pipeline_config() {
        let config = PipelineConfig {
            sentinel: "SAY GOODBYE".into(),
            sentinel_stage: Some("closer".into()),
            synthesis_stage: "writer".into(),
        };
        let settings = FlowSettings::from(&config);
        assert_eq!(settings.sentinel, "SAY GOODBYE");
        assert_eq!(settings.sentinel_stage, Some(StageId::new("closer")));
        assert_eq!(settings.synthesis_stage.as_str(), "writer");
    }
}
