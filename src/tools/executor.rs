use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;

use crate::error::AppError;
use crate::orchestration::trace::TraceRecorder;
use crate::tools::definition::{ToolCall, ToolContext, ToolDefinition, ToolResult};
use crate::tools::registry::ToolRegistry;

#[derive(Debug, Clone)]
pub struct ToolLimits {
    pub timeout_ms: u64,
}

impl Default for ToolLimits {
    fn default() -> Self {
        Self { timeout_ms: 30_000 }
    }
}

/// Resolves, validates and runs tool calls. Never fails: every outcome,
/// including unknown tools and handler faults, comes back as a [`ToolResult`].
#[derive(Debug, Clone)]
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    limits: ToolLimits,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            limits: ToolLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: ToolLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Runs `call` and records the result in `trace` under `turn_index`
    /// before handing it back.
    pub async fn execute(
        &self,
        call: &ToolCall,
        ctx: &ToolContext,
        trace: &TraceRecorder,
        turn_index: usize,
    ) -> Arc<ToolResult> {
        self.execute_cancellable(call, ctx, trace, turn_index, &CancellationToken::new())
            .await
    }

    /// Like [`execute`](Self::execute), but a cancelled `cancel` token turns
    /// the call into a `cancelled` error result. A handler already running is
    /// aborted, as it is when this future is dropped.
    pub async fn execute_cancellable(
        &self,
        call: &ToolCall,
        ctx: &ToolContext,
        trace: &TraceRecorder,
        turn_index: usize,
        cancel: &CancellationToken,
    ) -> Arc<ToolResult> {
        let started_at = Utc::now();
        let (arguments, outcome) = match self.prepare(call, ctx, cancel) {
            Ok((definition, args)) => (
                Value::Object(args.clone()),
                self.run(call, definition, args, ctx, cancel).await,
            ),
            Err(e) => (call.arguments.clone(), Err(e)),
        };
        let ended_at = Utc::now();

        let result = match outcome {
            Ok(output) => ToolResult::success(call, arguments, output, started_at, ended_at),
            Err(e) => ToolResult::failure(call, arguments, &e, started_at, ended_at),
        };
        let result = Arc::new(result);
        trace.record(result.clone(), turn_index);
        result
    }

    /// Resolves the tool and produces the arguments its handler will see.
    fn prepare(
        &self,
        call: &ToolCall,
        ctx: &ToolContext,
        cancel: &CancellationToken,
    ) -> Result<(&ToolDefinition, Map<String, Value>), AppError> {
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        let definition = self.registry.lookup(&call.tool_name)?;
        let args = with_environment(&call.arguments, definition, ctx);
        let args = definition.parameters.validate(&args)?;
        Ok((definition, args))
    }

    async fn run(
        &self,
        call: &ToolCall,
        definition: &ToolDefinition,
        args: Map<String, Value>,
        ctx: &ToolContext,
        cancel: &CancellationToken,
    ) -> Result<Value, AppError> {
        let handler = definition.handler.clone();
        let handler_ctx = ctx.clone();
        let task = AbortOnDropHandle::new(tokio::spawn(async move { handler.call(args, handler_ctx).await }));

        let timeout_ms = self.limits.timeout_ms;
        let timed = tokio::time::timeout(Duration::from_millis(timeout_ms), task);
        // Leaving the select drops `timed`, which aborts the handler task.
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AppError::Cancelled),
            outcome = timed => outcome,
        };
        match outcome {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(e))) => Err(match e {
                AppError::HandlerExecution(msg) => AppError::HandlerExecution(msg),
                other => AppError::HandlerExecution(other.to_string()),
            }),
            Ok(Err(join_err)) => {
                let msg = if join_err.is_panic() {
                    "tool handler panicked".to_string()
                } else {
                    join_err.to_string()
                };
                Err(AppError::HandlerExecution(msg))
            }
            Err(_) => Err(AppError::HandlerExecution(format!(
                "tool '{}' timed out after {timeout_ms} ms",
                call.tool_name
            ))),
        }
    }
}

/// Fills `environment` from the session when the tool declares it and the
/// model left it out.
fn with_environment(arguments: &Value, definition: &ToolDefinition, ctx: &ToolContext) -> Value {
    if definition.parameters.field("environment").is_none() {
        return arguments.clone();
    }
    let mut map = match arguments {
        Value::Object(m) => m.clone(),
        Value::Null => Map::new(),
        other => return other.clone(),
    };
    let missing = map.get("environment").map(Value::is_null).unwrap_or(true);
    if missing {
        map.insert("environment".to_string(), Value::String(ctx.environment.clone()));
    }
    Value::Object(map)
}
