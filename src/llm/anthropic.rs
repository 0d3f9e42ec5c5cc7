use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::Value;

use crate::error::AppError;
use crate::llm::provider::{
    estimate_tokens, output_estimate_text, send_json, ChatRequest, LLMProvider, LLMResponse, Message,
    MessageRole, TokenUsage,
};
use crate::tools::definition::ToolCall;

#[derive(Clone)]
pub struct AnthropicProvider {
    client: reqwest::Client,
    model: String,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: String, model: String, base_url: Option<String>) -> Result<Self, AppError> {
        let base_url = base_url
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "https://api.anthropic.com".to_string())
            .trim_end_matches('/')
            .to_string();

        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&api_key).map_err(|e| AppError::Config(e.to_string()))?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static("2023-06-01"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(|e| AppError::Config(e.to_string()))?;

        Ok(Self {
            client,
            model,
            base_url,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/messages", self.base_url)
    }
}

/// Splits system text out and maps tool traffic onto `tool_use` /
/// `tool_result` content blocks. Consecutive tool results are merged into a
/// single user message, which the messages API requires.
fn convert_messages(messages: Vec<Message>) -> (Option<String>, Vec<Value>) {
    let mut system_parts: Vec<String> = Vec::new();
    let mut out: Vec<Value> = Vec::new();

    for msg in messages {
        match msg.role {
            MessageRole::System => {
                if let Some(text) = msg.content {
                    if !text.trim().is_empty() {
                        system_parts.push(text);
                    }
                }
            }
            MessageRole::User => {
                out.push(serde_json::json!({
                    "role": "user",
                    "content": [{ "type": "text", "text": msg.content.unwrap_or_default() }]
                }));
            }
            MessageRole::Assistant => {
                let mut blocks = Vec::new();
                if let Some(text) = msg.content {
                    if !text.trim().is_empty() {
                        blocks.push(serde_json::json!({ "type": "text", "text": text }));
                    }
                }
                for tc in msg.tool_calls.unwrap_or_default() {
                    blocks.push(serde_json::json!({
                        "type": "tool_use",
                        "id": tc.call_id,
                        "name": tc.tool_name,
                        "input": tc.arguments
                    }));
                }
                if blocks.is_empty() {
                    blocks.push(serde_json::json!({ "type": "text", "text": "" }));
                }
                out.push(serde_json::json!({ "role": "assistant", "content": blocks }));
            }
            MessageRole::Tool => {
                let block = serde_json::json!({
                    "type": "tool_result",
                    "tool_use_id": msg.tool_call_id.unwrap_or_default(),
                    "content": msg.content.unwrap_or_default()
                });
                let merged = out.last_mut().and_then(|last| {
                    let is_tool_results = last["role"] == "user"
                        && last["content"]
                            .as_array()
                            .map(|blocks| blocks.iter().all(|b| b["type"] == "tool_result"))
                            .unwrap_or(false);
                    if is_tool_results {
                        last["content"].as_array_mut()
                    } else {
                        None
                    }
                });
                match merged {
                    Some(blocks) => blocks.push(block),
                    None => out.push(serde_json::json!({ "role": "user", "content": [block] })),
                }
            }
        }
    }

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };
    (system, out)
}

fn build_request_body(model: &str, request: ChatRequest) -> Value {
    let (system, converted) = convert_messages(request.messages);
    let mut body = serde_json::json!({
        "model": model,
        "messages": converted,
        "max_tokens": request.max_tokens,
        "temperature": request.temperature
    });
    if let Some(system) = system {
        body["system"] = Value::String(system);
    }
    if !request.tools.is_empty() {
        let tool_defs = request
            .tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.parameters
                })
            })
            .collect::<Vec<_>>();
        body["tools"] = Value::Array(tool_defs);
    }
    body
}

fn into_llm_response(parsed: AnthropicMessageResponse, model: &str, body: &Value) -> LLMResponse {
    let mut content = String::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();
    for block in parsed.content {
        match block.r#type.as_str() {
            "text" => {
                if let Some(text) = block.text {
                    content.push_str(&text);
                }
            }
            "tool_use" => {
                if let (Some(id), Some(name)) = (block.id, block.name) {
                    let input = block.input.unwrap_or_else(|| Value::Object(Default::default()));
                    tool_calls.push(ToolCall::new(id, name, input));
                }
            }
            _ => {}
        }
    }

    let prompt_tokens = parsed.usage.input_tokens;
    let completion_tokens = parsed.usage.output_tokens;
    let estimated = prompt_tokens.is_none() || completion_tokens.is_none();

    LLMResponse {
        usage: TokenUsage {
            input_tokens: prompt_tokens.unwrap_or_else(|| estimate_tokens(&body.to_string())),
            output_tokens: completion_tokens
                .unwrap_or_else(|| estimate_tokens(&output_estimate_text(&content, &tool_calls))),
            estimated,
        },
        content,
        model: parsed.model.unwrap_or_else(|| model.to_string()),
        finish_reason: parsed.stop_reason,
        tool_calls,
    }
}

#[async_trait]
impl LLMProvider for AnthropicProvider {
    fn provider_name(&self) -> &'static str {
        "anthropic"
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: ChatRequest) -> Result<LLMResponse, AppError> {
        let body = build_request_body(&self.model, request);
        let parsed: AnthropicMessageResponse =
            send_json(self.client.post(self.endpoint()).json(&body), "Anthropic").await?;
        Ok(into_llm_response(parsed, &self.model, &body))
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicMessageResponse {
    pub model: Option<String>,
    pub content: Vec<AnthropicContentBlock>,
    pub stop_reason: Option<String>,
    pub usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct AnthropicContentBlock {
    pub r#type: String,
    pub text: Option<String>,
    pub id: Option<String>,
    pub name: Option<String>,
    pub input: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
}
