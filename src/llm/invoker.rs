//! The model side of the orchestration loop.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::AppError;
use crate::llm::provider::{ChatRequest, LLMProvider, Message};
use crate::orchestration::conversation::Turn;
use crate::tools::definition::{ToolCall, ToolSpec};

pub const EMPTY_RESPONSE_TEXT: &str = "No response generated";

#[derive(Debug, Clone, PartialEq)]
pub enum ModelResponse {
    Text(String),
    ToolCalls {
        content: Option<String>,
        calls: Vec<ToolCall>,
    },
}

#[async_trait]
pub trait ModelInvoker: Send + Sync {
    /// Any failure is loop-fatal and should be reported as
    /// [`AppError::ModelUnavailable`].
    async fn invoke(
        &self,
        system_prompt: &str,
        tools: &[ToolSpec],
        history: &[Turn],
    ) -> Result<ModelResponse, AppError>;
}

/// Drives a chat [`LLMProvider`] as the loop's model.
pub struct ProviderInvoker {
    provider: Arc<dyn LLMProvider>,
    temperature: f64,
    max_tokens: u32,
}

impl ProviderInvoker {
    pub fn new(provider: Arc<dyn LLMProvider>, temperature: f64, max_tokens: u32) -> Self {
        Self {
            provider,
            temperature,
            max_tokens,
        }
    }
}

#[async_trait]
impl ModelInvoker for ProviderInvoker {
    async fn invoke(
        &self,
        system_prompt: &str,
        tools: &[ToolSpec],
        history: &[Turn],
    ) -> Result<ModelResponse, AppError> {
        let request = ChatRequest {
            messages: to_messages(system_prompt, history),
            tools: tools.to_vec(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let resp = self.provider.complete(request).await.map_err(|e| match e {
            AppError::ModelUnavailable(msg) => AppError::ModelUnavailable(msg),
            other => AppError::ModelUnavailable(other.to_string()),
        })?;

        tracing::debug!(
            provider = self.provider.provider_name(),
            model = %resp.model,
            input_tokens = resp.usage.input_tokens,
            output_tokens = resp.usage.output_tokens,
            tool_calls = resp.tool_calls.len(),
            "model responded"
        );

        if !resp.tool_calls.is_empty() {
            let content = Some(resp.content).filter(|c| !c.trim().is_empty());
            return Ok(ModelResponse::ToolCalls {
                content,
                calls: unique_call_ids(resp.tool_calls),
            });
        }

        if resp.content.trim().is_empty() {
            Ok(ModelResponse::Text(EMPTY_RESPONSE_TEXT.to_string()))
        } else {
            Ok(ModelResponse::Text(resp.content))
        }
    }
}

pub fn to_messages(system_prompt: &str, history: &[Turn]) -> Vec<Message> {
    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.push(Message::system(system_prompt));
    for turn in history {
        messages.push(match turn {
            Turn::User { content } => Message::user(content.clone()),
            Turn::AssistantText { content } => Message::assistant(content.clone()),
            Turn::AssistantToolCalls { content, calls } => {
                Message::assistant_tool_calls(content.clone(), calls.clone())
            }
            Turn::ToolResult { result } => {
                Message::tool(result.call_id.clone(), result.tool_name.clone(), result.model_content())
            }
        });
    }
    messages
}

/// Call ids tie results back to requests, so blanks and repeats within one
/// turn are replaced.
fn unique_call_ids(calls: Vec<ToolCall>) -> Vec<ToolCall> {
    let mut seen = HashSet::new();
    calls
        .into_iter()
        .enumerate()
        .map(|(i, mut call)| {
            if call.call_id.trim().is_empty() || !seen.insert(call.call_id.clone()) {
                call.call_id = format!("call_{i}_{}", uuid::Uuid::new_v4().simple());
                seen.insert(call.call_id.clone());
            }
            call
        })
        .collect()
}
