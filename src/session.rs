use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::error::AppError;
use crate::orchestration::conversation::{ConversationState, HistoryReader, Turn};
use crate::orchestration::engine::{Orchestrator, TurnFailure, TurnReply};
use crate::orchestration::trace::{TraceRecorder, TraceView};
use crate::tools::definition::ToolContext;

/// One chat session: its conversation, its trace and the environment the
/// tools are pointed at.
#[derive(Debug)]
pub struct Session {
    id: String,
    environment: String,
    created_at: DateTime<Utc>,
    last_active: RwLock<DateTime<Utc>>,
    conversation: Mutex<ConversationState>,
    history: HistoryReader,
    trace: TraceRecorder,
    cancel: CancellationToken,
}

impl Session {
    pub fn new(id: impl Into<String>, environment: impl Into<String>) -> Self {
        let id = id.into();
        let conversation = ConversationState::new();
        let now = Utc::now();
        Self {
            trace: TraceRecorder::new(id.clone()),
            id,
            environment: environment.into(),
            created_at: now,
            last_active: RwLock::new(now),
            history: conversation.reader(),
            conversation: Mutex::new(conversation),
            cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn trace(&self) -> &TraceRecorder {
        &self.trace
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Stops the running turn at its next suspension point. Sticky: later
    /// turns are refused.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn tool_context(&self) -> ToolContext {
        ToolContext {
            session_id: self.id.clone(),
            environment: self.environment.clone(),
        }
    }

    /// Turns appended so far, including those of a turn still running.
    pub fn history(&self) -> Vec<Turn> {
        self.history.snapshot()
    }

    pub fn last_active(&self) -> DateTime<Utc> {
        *self.last_active.read()
    }

    fn touch(&self) {
        *self.last_active.write() = Utc::now();
    }

    /// True while a turn holds the conversation.
    pub fn is_busy(&self) -> bool {
        self.conversation.try_lock().is_err()
    }

    /// Exclusive write access to the conversation for one turn.
    pub(crate) fn try_begin_turn(&self) -> Result<MutexGuard<'_, ConversationState>, AppError> {
        self.conversation
            .try_lock()
            .map_err(|_| AppError::SessionBusy(self.id.clone()))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub environment: String,
    pub created_at: DateTime<Utc>,
}

impl From<&Session> for SessionInfo {
    fn from(session: &Session) -> Self {
        Self {
            session_id: session.id.clone(),
            environment: session.environment.clone(),
            created_at: session.created_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionLimits {
    /// Sessions untouched for this long are dropped by [`SessionManager::evict_idle`].
    pub idle_ttl: chrono::Duration,
    pub max_sessions: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            idle_ttl: chrono::Duration::hours(1),
            max_sessions: 1_000,
        }
    }
}

/// Owns every live session and routes turns to the orchestrator.
pub struct SessionManager {
    orchestrator: Arc<Orchestrator>,
    default_environment: String,
    limits: SessionLimits,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionManager {
    pub fn new(orchestrator: Arc<Orchestrator>, default_environment: impl Into<String>) -> Self {
        Self {
            orchestrator,
            default_environment: default_environment.into(),
            limits: SessionLimits::default(),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_limits(mut self, limits: SessionLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn default_environment(&self) -> &str {
        &self.default_environment
    }

    /// Expired sessions are swept first. Fails with `TooManySessions` when
    /// the cap is still reached after that.
    pub fn create(&self, environment: Option<String>) -> Result<SessionInfo, AppError> {
        let environment = environment
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| self.default_environment.clone());

        self.evict_idle();
        let id = uuid::Uuid::new_v4().to_string();
        let session = Arc::new(Session::new(id.clone(), environment));
        let info = SessionInfo::from(session.as_ref());
        {
            let mut sessions = self.sessions.write();
            if sessions.len() >= self.limits.max_sessions {
                tracing::warn!(max = self.limits.max_sessions, "session limit reached");
                return Err(AppError::TooManySessions(self.limits.max_sessions));
            }
            sessions.insert(id, session);
        }
        tracing::info!(session = %info.session_id, environment = %info.environment, "session created");
        Ok(info)
    }

    /// Looks a session up and marks it active.
    pub fn get(&self, session_id: &str) -> Result<Arc<Session>, AppError> {
        let session = self
            .sessions
            .read()
            .get(session_id)
            .cloned()
            .ok_or_else(|| AppError::SessionNotFound(session_id.to_string()))?;
        session.touch();
        Ok(session)
    }

    pub fn list(&self) -> Vec<SessionInfo> {
        let mut out: Vec<SessionInfo> = self
            .sessions
            .read()
            .values()
            .map(|s| SessionInfo::from(s.as_ref()))
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        out
    }

    pub async fn run_turn(&self, session_id: &str, user_message: &str) -> Result<TurnReply, TurnFailure> {
        let session = self.get(session_id).map_err(TurnFailure::without_trace)?;
        self.orchestrator.run_turn(&session, user_message).await
    }

    pub fn get_trace(&self, session_id: &str) -> Result<TraceView, AppError> {
        Ok(self.get(session_id)?.trace().snapshot())
    }

    pub fn get_history(&self, session_id: &str) -> Result<Vec<Turn>, AppError> {
        Ok(self.get(session_id)?.history())
    }

    pub fn cancel(&self, session_id: &str) -> Result<(), AppError> {
        self.get(session_id)?.cancel();
        tracing::info!(session = %session_id, "session cancelled");
        Ok(())
    }

    /// Cancels and drops the session. A turn still running keeps its own
    /// handle until it unwinds.
    pub fn end(&self, session_id: &str) -> Result<(), AppError> {
        let session = self
            .sessions
            .write()
            .remove(session_id)
            .ok_or_else(|| AppError::SessionNotFound(session_id.to_string()))?;
        session.cancel();
        tracing::info!(session = %session_id, "session ended");
        Ok(())
    }

    /// Ends every session idle for longer than the configured TTL. Returns
    /// how many were removed.
    pub fn evict_idle(&self) -> usize {
        self.evict_inactive_since(Utc::now() - self.limits.idle_ttl)
    }

    /// Ends every session last touched before `cutoff`. A session with a
    /// turn in progress is kept.
    pub fn evict_inactive_since(&self, cutoff: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|id, session| {
            let keep = session.is_busy() || session.last_active() >= cutoff;
            if !keep {
                session.cancel();
                tracing::info!(session = %id, "session expired");
            }
            keep
        });
        before - sessions.len()
    }

    /// Sweeps idle sessions every `every` until the runtime shuts down.
    pub fn spawn_expiry(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                let removed = self.evict_idle();
                if removed > 0 {
                    tracing::debug!(removed, remaining = self.len(), "expired idle sessions");
                }
            }
        })
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::invoker::{ModelInvoker, ModelResponse};
    use crate::orchestration::engine::OrchestratorConfig;
    use crate::tools::definition::{handler_fn, ToolCall, ToolDefinition, ToolSpec};
    use crate::tools::executor::ToolExecutor;
    use crate::tools::registry::ToolRegistry;
    use crate::tools::schema::{ParamField, ParamKind, ParamSchema};
    use async_trait::async_trait;
    use serde_json::json;

    /// Asks for the pipeline status once, then answers.
    struct StatusModel;

    #[async_trait]
    impl ModelInvoker for StatusModel {
        async fn invoke(
            &self,
            _system_prompt: &str,
            _tools: &[ToolSpec],
            history: &[Turn],
        ) -> Result<ModelResponse, AppError> {
            match history.last() {
                Some(Turn::ToolResult { result }) => Ok(ModelResponse::Text(format!(
                    "Pipeline is {} in {}.",
                    result.output["status"].as_str().unwrap_or("?"),
                    result.output["environment"].as_str().unwrap_or("?")
                ))),
                _ => Ok(ModelResponse::ToolCalls {
                    content: None,
                    calls: vec![ToolCall::new("c1", "get_pipeline_status", json!({ "pipeline_name": "X" }))],
                }),
            }
        }
    }

    fn manager() -> SessionManager {
        let mut registry = ToolRegistry::new();
        registry
            .register(ToolDefinition::new(
                "get_pipeline_status",
                "status",
                ParamSchema::new(vec![
                    ParamField::required("pipeline_name", ParamKind::String),
                    ParamField::optional("environment", ParamKind::String),
                ]),
                handler_fn(|args, _ctx| async move {
                    Ok(json!({ "status": "Succeeded", "environment": args["environment"].clone() }))
                }),
            ))
            .unwrap();
        let executor = ToolExecutor::new(Arc::new(registry));
        let orchestrator = Orchestrator::new(Arc::new(StatusModel), executor, OrchestratorConfig::default());
        SessionManager::new(Arc::new(orchestrator), "dev")
    }

    #[tokio::test]
    async fn sessions_are_independent_and_use_their_environment() {
        let mgr = manager();
        let a = mgr.create(Some("prod".into())).unwrap();
        let b = mgr.create(None).unwrap();
        assert_eq!(b.environment, "dev");
        assert_eq!(mgr.len(), 2);

        let reply = mgr.run_turn(&a.session_id, "status of X?").await.unwrap();
        assert_eq!(reply.final_text, "Pipeline is Succeeded in prod.");

        assert_eq!(mgr.get_trace(&a.session_id).unwrap().len(), 1);
        assert!(mgr.get_trace(&b.session_id).unwrap().is_empty());
        assert_eq!(mgr.get_history(&a.session_id).unwrap().len(), 4);
    }

    #[tokio::test]
    async fn trace_reads_are_stable_between_turns() {
        let mgr = manager();
        let s = mgr.create(None).unwrap();
        mgr.run_turn(&s.session_id, "status of X?").await.unwrap();

        let first = mgr.get_trace(&s.session_id).unwrap();
        let second = mgr.get_trace(&s.session_id).unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn unknown_session_is_reported() {
        let mgr = manager();
        let failure = mgr.run_turn("missing", "hi").await.unwrap_err();
        assert!(matches!(failure.reason, AppError::SessionNotFound(_)));
        assert!(matches!(mgr.get_trace("missing"), Err(AppError::SessionNotFound(_))));
        assert!(mgr.cancel("missing").is_err());
    }

    #[tokio::test]
    async fn ended_session_is_gone() {
        let mgr = manager();
        let s = mgr.create(None).unwrap();
        let handle = mgr.get(&s.session_id).unwrap();
        mgr.end(&s.session_id).unwrap();
        assert!(mgr.is_empty());
        assert!(handle.is_cancelled());
        assert!(mgr.end(&s.session_id).is_err());
    }

    #[tokio::test]
    async fn cancelled_session_refuses_new_turns_but_keeps_trace() {
        let mgr = manager();
        let s = mgr.create(None).unwrap();
        mgr.run_turn(&s.session_id, "status of X?").await.unwrap();
        mgr.cancel(&s.session_id).unwrap();

        let failure = mgr.run_turn(&s.session_id, "again").await.unwrap_err();
        assert!(matches!(failure.reason, AppError::Cancelled));
        assert_eq!(failure.trace.len(), 1);
        assert_eq!(mgr.get_history(&s.session_id).unwrap().len(), 4);
    }

    #[tokio::test]
    async fn history_is_readable_while_a_turn_holds_the_conversation() {
        let mgr = manager();
        let s = mgr.create(None).unwrap();
        mgr.run_turn(&s.session_id, "status of X?").await.unwrap();

        let session = mgr.get(&s.session_id).unwrap();
        let _turn = session.try_begin_turn().unwrap();
        assert!(session.is_busy());
        assert_eq!(mgr.get_history(&s.session_id).unwrap().len(), 4);
    }

    #[tokio::test]
    async fn idle_sessions_expire_but_busy_ones_stay() {
        let mgr = manager();
        let idle = mgr.create(None).unwrap();
        let busy = mgr.create(None).unwrap();
        let handle = mgr.get(&idle.session_id).unwrap();
        let running = mgr.get(&busy.session_id).unwrap();
        let _turn = running.try_begin_turn().unwrap();

        assert_eq!(mgr.evict_idle(), 0);
        let removed = mgr.evict_inactive_since(Utc::now() + chrono::Duration::minutes(5));

        assert_eq!(removed, 1);
        assert!(handle.is_cancelled());
        assert!(matches!(mgr.get(&idle.session_id), Err(AppError::SessionNotFound(_))));
        assert!(mgr.get(&busy.session_id).is_ok());
    }

    #[tokio::test]
    async fn session_cap_is_enforced() {
        let mgr = manager().with_limits(SessionLimits {
            idle_ttl: chrono::Duration::hours(1),
            max_sessions: 2,
        });
        mgr.create(None).unwrap();
        let second = mgr.create(None).unwrap();

        let err = mgr.create(None).unwrap_err();
        assert!(matches!(err, AppError::TooManySessions(2)));

        mgr.end(&second.session_id).unwrap();
        assert!(mgr.create(Some("prod".into())).is_ok());
    }
}
