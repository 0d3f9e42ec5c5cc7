//! The tool-call loop: model, tools, model again, until a final answer.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};

use crate::error::AppError;
use crate::llm::invoker::{ModelInvoker, ModelResponse, EMPTY_RESPONSE_TEXT};
use crate::orchestration::conversation::{ConversationState, PendingToolResults, Turn};
use crate::orchestration::prompt::build_system_prompt;
use crate::orchestration::trace::{TraceRecorder, TraceView};
use crate::session::Session;
use crate::tools::definition::{ToolCall, ToolContext, ToolResult, ToolSpec};
use crate::tools::executor::ToolExecutor;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Model invocations allowed per turn.
    pub max_round_trips: u32,
    /// Dispatch the calls of one tool-calls turn concurrently.
    pub parallel_tool_calls: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_round_trips: 10,
            parallel_tool_calls: true,
        }
    }
}

#[derive(Debug)]
pub enum LoopState {
    AwaitingModel,
    DispatchingTools {
        calls: Vec<ToolCall>,
        last_permitted: bool,
    },
    Done(String),
    Failed(AppError),
}

impl LoopState {
    pub fn name(&self) -> &'static str {
        match self {
            LoopState::AwaitingModel => "awaiting_model",
            LoopState::DispatchingTools { .. } => "dispatching_tools",
            LoopState::Done(_) => "done",
            LoopState::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TurnReply {
    pub final_text: String,
    /// Everything the session has recorded so far, this turn included.
    pub trace: TraceView,
}

#[derive(Debug, Clone)]
pub struct TurnFailure {
    pub reason: AppError,
    pub trace: TraceView,
}

impl TurnFailure {
    pub fn without_trace(reason: AppError) -> Self {
        Self {
            reason,
            trace: TraceView::default(),
        }
    }
}

impl fmt::Display for TurnFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} trace entries)", self.reason, self.trace.len())
    }
}

impl std::error::Error for TurnFailure {}

pub struct Orchestrator {
    model: Arc<dyn ModelInvoker>,
    executor: ToolExecutor,
    tool_specs: Vec<ToolSpec>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(model: Arc<dyn ModelInvoker>, executor: ToolExecutor, config: OrchestratorConfig) -> Self {
        let tool_specs = executor.registry().specs();
        Self {
            model,
            executor,
            tool_specs,
            config,
        }
    }

    pub fn tool_specs(&self) -> &[ToolSpec] {
        &self.tool_specs
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Runs one user turn to completion. On failure the reason comes back
    /// together with whatever the session traced.
    pub async fn run_turn(&self, session: &Session, user_message: &str) -> Result<TurnReply, TurnFailure> {
        let failure = |reason: AppError| TurnFailure {
            reason,
            trace: session.trace().snapshot(),
        };

        let mut conversation = session.try_begin_turn().map_err(failure)?;
        if session.is_cancelled() {
            return Err(failure(AppError::Cancelled));
        }

        let system_prompt = build_system_prompt(session.environment());
        let tool_ctx = session.tool_context();
        conversation.append(Turn::User {
            content: user_message.to_string(),
        });

        let mut state = LoopState::AwaitingModel;
        let mut round_trips: u32 = 0;

        loop {
            tracing::debug!(session = %session.id(), state = state.name(), round_trips, "loop state");
            state = match state {
                LoopState::AwaitingModel => {
                    round_trips += 1;
                    let response = self.invoke_model(session, &system_prompt, conversation.history()).await;
                    match response {
                        Ok(response) => {
                            self.accept_response(&mut conversation, response, round_trips)
                        }
                        Err(reason) => LoopState::Failed(reason),
                    }
                }
                LoopState::DispatchingTools {
                    calls,
                    last_permitted,
                } => match self.dispatch(session, &mut conversation, calls, &tool_ctx).await {
                    Err(reason) => LoopState::Failed(reason),
                    Ok(()) if session.is_cancelled() => LoopState::Failed(AppError::Cancelled),
                    Ok(()) if last_permitted => {
                        LoopState::Failed(AppError::IterationLimitExceeded(self.config.max_round_trips))
                    }
                    Ok(()) => LoopState::AwaitingModel,
                },
                LoopState::Done(final_text) => {
                    tracing::info!(session = %session.id(), round_trips, "turn completed");
                    return Ok(TurnReply {
                        final_text,
                        trace: session.trace().snapshot(),
                    });
                }
                LoopState::Failed(reason) => {
                    tracing::warn!(
                        session = %session.id(),
                        round_trips,
                        code = reason.code(),
                        error = %reason,
                        "turn failed"
                    );
                    return Err(failure(reason));
                }
            };
        }
    }

    async fn invoke_model(
        &self,
        session: &Session,
        system_prompt: &str,
        history: &[Turn],
    ) -> Result<ModelResponse, AppError> {
        let invoke = self.model.invoke(system_prompt, &self.tool_specs, history);
        let outcome = tokio::select! {
            biased;
            _ = session.cancel_token().cancelled() => Err(AppError::Cancelled),
            outcome = invoke => outcome,
        };
        outcome.map_err(|e| {
            if e.is_loop_fatal() {
                e
            } else {
                AppError::ModelUnavailable(e.to_string())
            }
        })
    }

    fn accept_response(
        &self,
        conversation: &mut ConversationState,
        response: ModelResponse,
        round_trips: u32,
    ) -> LoopState {
        match response {
            ModelResponse::ToolCalls { content, calls } if !calls.is_empty() => {
                tracing::debug!(count = calls.len(), round_trips, "model requested tools");
                conversation.append(Turn::AssistantToolCalls {
                    content,
                    calls: calls.clone(),
                });
                LoopState::DispatchingTools {
                    calls,
                    last_permitted: round_trips >= self.config.max_round_trips,
                }
            }
            ModelResponse::ToolCalls { content, .. } => {
                let text = content
                    .filter(|c| !c.trim().is_empty())
                    .unwrap_or_else(|| EMPTY_RESPONSE_TEXT.to_string());
                conversation.append(Turn::AssistantText { content: text.clone() });
                LoopState::Done(text)
            }
            ModelResponse::Text(text) => {
                conversation.append(Turn::AssistantText { content: text.clone() });
                LoopState::Done(text)
            }
        }
    }

    /// Executes every call and appends the results in request order. The
    /// trace sees them in completion order.
    async fn dispatch(
        &self,
        session: &Session,
        conversation: &mut ConversationState,
        calls: Vec<ToolCall>,
        tool_ctx: &ToolContext,
    ) -> Result<(), AppError> {
        let trace = session.trace();
        let cancel = session.cancel_token();
        let mut open = OpenToolCalls::new(conversation, trace, calls.clone());

        if self.config.parallel_tool_calls && calls.len() > 1 {
            let mut runs: FuturesUnordered<_> = calls
                .iter()
                .enumerate()
                .map(|(slot, call)| {
                    let turn_index = open.turn_index_for(slot);
                    async move {
                        let result = self
                            .executor
                            .execute_cancellable(call, tool_ctx, trace, turn_index, cancel)
                            .await;
                        (slot, result)
                    }
                })
                .collect();
            while let Some((slot, result)) = runs.next().await {
                open.fill(slot, result);
            }
        } else {
            for (slot, call) in calls.iter().enumerate() {
                let turn_index = open.turn_index_for(slot);
                let result = self
                    .executor
                    .execute_cancellable(call, tool_ctx, trace, turn_index, cancel)
                    .await;
                open.fill(slot, result);
            }
        }

        open.commit()
    }
}

/// A tool-calls turn whose results are still being collected.
///
/// Dropped before [`commit`](Self::commit) (the turn future went away), it
/// pairs every call still in flight with a traced `cancelled` result and
/// commits them. History never ends on an unanswered tool-calls turn.
struct OpenToolCalls<'a> {
    conversation: &'a mut ConversationState,
    trace: &'a TraceRecorder,
    base_index: usize,
    pending: Option<PendingToolResults>,
}

impl<'a> OpenToolCalls<'a> {
    fn new(conversation: &'a mut ConversationState, trace: &'a TraceRecorder, calls: Vec<ToolCall>) -> Self {
        let base_index = conversation.len();
        Self {
            conversation,
            trace,
            base_index,
            pending: Some(PendingToolResults::new(base_index, calls)),
        }
    }

    fn turn_index_for(&self, slot: usize) -> usize {
        self.base_index + slot
    }

    fn fill(&mut self, slot: usize, result: Arc<ToolResult>) {
        if let Some(pending) = self.pending.as_mut() {
            pending.fill(slot, result);
        }
    }

    fn commit(mut self) -> Result<(), AppError> {
        match self.pending.take() {
            Some(pending) => pending.commit(&mut *self.conversation),
            None => Ok(()),
        }
    }
}

impl Drop for OpenToolCalls<'_> {
    fn drop(&mut self) {
        let Some(mut pending) = self.pending.take() else {
            return;
        };
        let missing: Vec<(usize, ToolCall)> = pending
            .unfilled()
            .map(|(slot, call)| (slot, call.clone()))
            .collect();
        tracing::warn!(
            session = %self.trace.session_id(),
            in_flight = missing.len(),
            "turn dropped during tool dispatch"
        );
        let now = Utc::now();
        for (slot, call) in missing {
            let result = Arc::new(ToolResult::failure(
                &call,
                call.arguments.clone(),
                &AppError::Cancelled,
                now,
                now,
            ));
            self.trace.record(result.clone(), pending.turn_index_for(slot));
            pending.fill(slot, result);
        }
        if let Err(e) = pending.commit(&mut *self.conversation) {
            tracing::error!(error = %e, "could not pair abandoned tool calls");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::definition::{handler_fn, ToolDefinition, ToolStatus};
    use crate::tools::executor::ToolLimits;
    use crate::tools::registry::ToolRegistry;
    use crate::tools::schema::{ParamField, ParamKind, ParamSchema};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Replays canned responses and keeps a copy of every history it saw.
    struct ScriptedModel {
        script: Mutex<VecDeque<Result<ModelResponse, AppError>>>,
        seen: Mutex<Vec<Vec<Turn>>>,
    }

    impl ScriptedModel {
        fn new(script: Vec<Result<ModelResponse, AppError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn invocations(&self) -> usize {
            self.seen.lock().len()
        }
    }

    #[async_trait]
    impl ModelInvoker for ScriptedModel {
        async fn invoke(
            &self,
            _system_prompt: &str,
            _tools: &[ToolSpec],
            history: &[Turn],
        ) -> Result<ModelResponse, AppError> {
            self.seen.lock().push(history.to_vec());
            self.script
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(ModelResponse::Text("done".into())))
        }
    }

    /// Requests one tool on every invocation.
    #[derive(Default)]
    struct AlwaysTools {
        invocations: AtomicU32,
    }

    #[async_trait]
    impl ModelInvoker for AlwaysTools {
        async fn invoke(
            &self,
            _system_prompt: &str,
            _tools: &[ToolSpec],
            _history: &[Turn],
        ) -> Result<ModelResponse, AppError> {
            let n = self.invocations.fetch_add(1, Ordering::SeqCst);
            Ok(ModelResponse::ToolCalls {
                content: None,
                calls: vec![ToolCall::new(format!("c{n}"), "get_pipeline_status", json!({ "pipeline_name": "X" }))],
            })
        }
    }

    fn tool_calls(calls: Vec<ToolCall>) -> Result<ModelResponse, AppError> {
        Ok(ModelResponse::ToolCalls { content: None, calls })
    }

    fn text(t: &str) -> Result<ModelResponse, AppError> {
        Ok(ModelResponse::Text(t.to_string()))
    }

    fn sleeping_tool(name: &str, millis: u64) -> ToolDefinition {
        let tag = name.to_string();
        ToolDefinition::new(
            name,
            "sleeps then answers",
            ParamSchema::empty(),
            handler_fn(move |_args, _ctx| {
                let tag = tag.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(millis)).await;
                    Ok(json!({ "tool": tag }))
                }
            }),
        )
    }

    fn pipeline_status_tool() -> ToolDefinition {
        ToolDefinition::new(
            "get_pipeline_status",
            "Current status of a pipeline",
            ParamSchema::new(vec![ParamField::required("pipeline_name", ParamKind::String)]),
            handler_fn(|_args, _ctx| async { Ok(json!({ "status": "Succeeded" })) }),
        )
    }

    fn orchestrator(
        model: Arc<dyn ModelInvoker>,
        tools: Vec<ToolDefinition>,
        config: OrchestratorConfig,
        timeout_ms: u64,
    ) -> Orchestrator {
        let mut registry = ToolRegistry::new();
        for t in tools {
            registry.register(t).unwrap();
        }
        let executor = ToolExecutor::new(Arc::new(registry)).with_limits(ToolLimits { timeout_ms });
        Orchestrator::new(model, executor, config)
    }

    fn assert_paired(session: &Session) {
        let history = session.history();
        let mut state = ConversationState::new();
        for turn in history {
            state.append(turn);
        }
        assert_eq!(state.tool_call_count(), state.tool_result_count());
        assert!(state.unresolved_calls().is_empty());
    }

    #[tokio::test]
    async fn pipeline_status_question_gets_one_traced_call() {
        let model = ScriptedModel::new(vec![
            tool_calls(vec![ToolCall::new("c1", "get_pipeline_status", json!({ "pipeline_name": "X" }))]),
            text("Pipeline X succeeded."),
        ]);
        let orch = orchestrator(model.clone(), vec![pipeline_status_tool()], OrchestratorConfig::default(), 1_000);
        let session = Session::new("s1", "dev");

        let reply = orch.run_turn(&session, "What is the status of pipeline X?").await.unwrap();

        assert_eq!(reply.final_text, "Pipeline X succeeded.");
        assert_eq!(reply.trace.len(), 1);
        let entry = reply.trace.get(0).unwrap();
        assert_eq!(entry.result.tool_name, "get_pipeline_status");
        assert_eq!(entry.result.output, json!({ "status": "Succeeded" }));
        assert_eq!(entry.turn_index, 2);

        // The second invocation saw the tool result.
        assert_eq!(model.invocations(), 2);
        {
            let seen = model.seen.lock();
            assert!(matches!(seen[1].last(), Some(Turn::ToolResult { result }) if result.call_id == "c1"));
        }
        assert_paired(&session);
    }

    #[tokio::test]
    async fn trace_entry_and_history_share_the_result() {
        let model = ScriptedModel::new(vec![
            tool_calls(vec![ToolCall::new("c1", "get_pipeline_status", json!({ "pipeline_name": "X" }))]),
            text("ok"),
        ]);
        let orch = orchestrator(model, vec![pipeline_status_tool()], OrchestratorConfig::default(), 1_000);
        let session = Session::new("s1", "dev");
        let reply = orch.run_turn(&session, "q").await.unwrap();

        let history = session.history();
        let Turn::ToolResult { result } = &history[2] else {
            panic!("expected tool result at index 2");
        };
        assert!(Arc::ptr_eq(result, &reply.trace.get(0).unwrap().result));
    }

    #[tokio::test]
    async fn model_that_never_stops_fails_after_round_trip_limit() {
        let model = Arc::new(AlwaysTools::default());
        let config = OrchestratorConfig {
            max_round_trips: 3,
            parallel_tool_calls: true,
        };
        let orch = orchestrator(model.clone(), vec![pipeline_status_tool()], config, 1_000);
        let session = Session::new("s1", "dev");

        let failure = orch.run_turn(&session, "loop forever").await.unwrap_err();

        assert!(matches!(failure.reason, AppError::IterationLimitExceeded(3)));
        assert_eq!(model.invocations.load(Ordering::SeqCst), 3);
        assert_eq!(failure.trace.len(), 3);
        assert_paired(&session);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_results_are_appended_in_request_order() {
        let model = ScriptedModel::new(vec![
            tool_calls(vec![
                ToolCall::new("a", "slow", json!({})),
                ToolCall::new("b", "fast", json!({})),
            ]),
            text("both done"),
        ]);
        let orch = orchestrator(
            model,
            vec![sleeping_tool("slow", 50), sleeping_tool("fast", 0)],
            OrchestratorConfig::default(),
            1_000,
        );
        let session = Session::new("s1", "dev");

        let reply = orch.run_turn(&session, "check both").await.unwrap();

        let history = session.history();
        let result_ids: Vec<String> = history
            .iter()
            .filter_map(|t| match t {
                Turn::ToolResult { result } => Some(result.call_id.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(result_ids, vec!["a", "b"]);

        let trace_ids: Vec<&str> = reply.trace.iter().map(|e| e.result.call_id.as_str()).collect();
        assert_eq!(trace_ids, vec!["b", "a"]);
        // Turn indexes still follow request order.
        assert_eq!(reply.trace.get(0).unwrap().turn_index, 3);
        assert_eq!(reply.trace.get(1).unwrap().turn_index, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn sequential_dispatch_runs_in_request_order() {
        let model = ScriptedModel::new(vec![
            tool_calls(vec![
                ToolCall::new("a", "slow", json!({})),
                ToolCall::new("b", "fast", json!({})),
            ]),
            text("both done"),
        ]);
        let config = OrchestratorConfig {
            max_round_trips: 10,
            parallel_tool_calls: false,
        };
        let orch = orchestrator(model, vec![sleeping_tool("slow", 50), sleeping_tool("fast", 0)], config, 1_000);
        let session = Session::new("s1", "dev");

        let reply = orch.run_turn(&session, "check both").await.unwrap();

        let trace_ids: Vec<&str> = reply.trace.iter().map(|e| e.result.call_id.as_str()).collect();
        assert_eq!(trace_ids, vec!["a", "b"]);
        assert_paired(&session);
    }

    #[tokio::test(start_paused = true)]
    async fn handler_timeout_is_reported_to_the_model() {
        let model = ScriptedModel::new(vec![
            tool_calls(vec![ToolCall::new("c1", "slow", json!({}))]),
            text("The log query timed out."),
        ]);
        let orch = orchestrator(
            model.clone(),
            vec![sleeping_tool("slow", 60_000)],
            OrchestratorConfig::default(),
            100,
        );
        let session = Session::new("s1", "dev");

        let reply = orch.run_turn(&session, "fetch logs").await.unwrap();

        let entry = reply.trace.get(0).unwrap();
        assert_eq!(entry.result.status, ToolStatus::Error);
        assert!(entry.result.error_detail.as_deref().unwrap().contains("timed out"));
        assert_eq!(model.invocations(), 2);
    }

    #[tokio::test]
    async fn unknown_tool_is_fed_back_not_fatal() {
        let model = ScriptedModel::new(vec![
            tool_calls(vec![ToolCall::new("c1", "drop_database", json!({}))]),
            text("That tool does not exist."),
        ]);
        let orch = orchestrator(model, vec![pipeline_status_tool()], OrchestratorConfig::default(), 1_000);
        let session = Session::new("s1", "dev");

        let reply = orch.run_turn(&session, "drop it").await.unwrap();

        assert_eq!(reply.trace.get(0).unwrap().result.error_code.as_deref(), Some("unknown_tool"));
        assert_eq!(orch.tool_specs().len(), 1);
        assert_paired(&session);
    }

    #[tokio::test]
    async fn model_failure_fails_turn_with_partial_trace() {
        let model = ScriptedModel::new(vec![
            tool_calls(vec![ToolCall::new("c1", "get_pipeline_status", json!({ "pipeline_name": "X" }))]),
            Err(AppError::ModelUnavailable("connection refused".into())),
        ]);
        let orch = orchestrator(model, vec![pipeline_status_tool()], OrchestratorConfig::default(), 1_000);
        let session = Session::new("s1", "dev");

        let failure = orch.run_turn(&session, "status?").await.unwrap_err();

        assert!(matches!(failure.reason, AppError::ModelUnavailable(_)));
        assert_eq!(failure.trace.len(), 1);
        assert_paired(&session);
    }

    #[tokio::test]
    async fn non_transport_model_errors_are_reported_as_unavailable() {
        let model = ScriptedModel::new(vec![Err(AppError::Message("bad payload".into()))]);
        let orch = orchestrator(model, vec![], OrchestratorConfig::default(), 1_000);
        let session = Session::new("s1", "dev");

        let failure = orch.run_turn(&session, "hi").await.unwrap_err();
        assert!(matches!(failure.reason, AppError::ModelUnavailable(ref m) if m.contains("bad payload")));
        assert!(failure.trace.is_empty());
    }

    #[tokio::test]
    async fn empty_tool_call_list_counts_as_text() {
        let model = ScriptedModel::new(vec![Ok(ModelResponse::ToolCalls {
            content: Some("Nothing to check.".into()),
            calls: vec![],
        })]);
        let orch = orchestrator(model, vec![], OrchestratorConfig::default(), 1_000);
        let session = Session::new("s1", "dev");

        let reply = orch.run_turn(&session, "hi").await.unwrap();
        assert_eq!(reply.final_text, "Nothing to check.");
    }

    #[tokio::test]
    async fn busy_session_is_rejected() {
        let model = ScriptedModel::new(vec![]);
        let orch = orchestrator(model.clone(), vec![], OrchestratorConfig::default(), 1_000);
        let session = Session::new("s1", "dev");

        let _guard = session.try_begin_turn().unwrap();
        let failure = orch.run_turn(&session, "hi").await.unwrap_err();

        assert!(matches!(failure.reason, AppError::SessionBusy(_)));
        assert_eq!(model.invocations(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_dispatch_pairs_calls_and_fails() {
        let model = ScriptedModel::new(vec![
            tool_calls(vec![
                ToolCall::new("a", "slow", json!({})),
                ToolCall::new("b", "fast", json!({})),
            ]),
            text("never reached"),
        ]);
        let orch = orchestrator(
            model.clone(),
            vec![sleeping_tool("slow", 10_000), sleeping_tool("fast", 0)],
            OrchestratorConfig::default(),
            60_000,
        );
        let session = Arc::new(Session::new("s1", "dev"));
        let canceller = session.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let failure = orch.run_turn(&session, "check both").await.unwrap_err();

        assert!(matches!(failure.reason, AppError::Cancelled));
        assert_eq!(model.invocations(), 1);
        assert_eq!(failure.trace.len(), 2);
        let codes: Vec<Option<String>> = failure
            .trace
            .iter()
            .map(|e| e.result.error_code.clone())
            .collect();
        assert!(codes.contains(&None));
        assert!(codes.contains(&Some("cancelled".to_string())));
        assert_paired(&session);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_turn_pairs_in_flight_calls_and_session_recovers() {
        let finished = Arc::new(AtomicU32::new(0));
        let done = finished.clone();
        let slow = ToolDefinition::new(
            "slow",
            "sleeps then answers",
            ParamSchema::empty(),
            handler_fn(move |_args, _ctx| {
                let done = done.clone();
                async move {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    done.fetch_add(1, Ordering::SeqCst);
                    Ok(json!({ "tool": "slow" }))
                }
            }),
        );
        let model = ScriptedModel::new(vec![
            tool_calls(vec![
                ToolCall::new("a", "slow", json!({})),
                ToolCall::new("b", "fast", json!({})),
            ]),
            text("second answer"),
        ]);
        let orch = orchestrator(
            model.clone(),
            vec![slow, sleeping_tool("fast", 0)],
            OrchestratorConfig::default(),
            60_000,
        );
        let session = Session::new("s1", "dev");

        // The caller gives up while "a" is still running.
        let abandoned = tokio::time::timeout(Duration::from_secs(1), orch.run_turn(&session, "q")).await;
        assert!(abandoned.is_err());

        let history = session.history();
        assert_eq!(history.len(), 4);
        let results: Vec<(String, Option<String>)> = history
            .iter()
            .filter_map(|t| match t {
                Turn::ToolResult { result } => Some((result.call_id.clone(), result.error_code.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(
            results,
            vec![("a".to_string(), Some("cancelled".to_string())), ("b".to_string(), None)]
        );
        assert_paired(&session);

        let trace = session.trace().snapshot();
        assert_eq!(trace.len(), 2);
        let slow_entry = trace.iter().find(|e| e.result.call_id == "a").unwrap();
        assert_eq!(slow_entry.turn_index, 2);

        // The session is usable again and the model sees a well-formed history.
        let reply = orch.run_turn(&session, "again").await.unwrap();
        assert_eq!(reply.final_text, "second answer");
        {
            let seen = model.seen.lock();
            assert_eq!(seen[1].len(), 5);
            assert!(matches!(seen[1][3], Turn::ToolResult { .. }));
            assert_eq!(seen[1][4], Turn::User { content: "again".into() });
        }

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn each_turn_sees_prior_history() {
        let model = ScriptedModel::new(vec![text("first"), text("second")]);
        let orch = orchestrator(model.clone(), vec![], OrchestratorConfig::default(), 1_000);
        let session = Session::new("s1", "dev");

        orch.run_turn(&session, "one").await.unwrap();
        orch.run_turn(&session, "two").await.unwrap();

        let seen = model.seen.lock();
        assert_eq!(seen[1].len(), 3);
        assert_eq!(seen[1][2], Turn::User { content: "two".into() });
    }
}
