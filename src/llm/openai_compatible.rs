use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::Value;

use crate::error::AppError;
use crate::llm::provider::{
    estimate_tokens, output_estimate_text, send_json, ChatRequest, LLMProvider, LLMResponse, Message,
    MessageRole, TokenUsage,
};
use crate::tools::definition::ToolCall;

/// Chat-completions client for OpenAI and API-compatible servers, including
/// Azure OpenAI deployments.
#[derive(Clone)]
pub struct OpenAICompatibleProvider {
    client: reqwest::Client,
    model: String,
    endpoint: String,
    label: &'static str,
}

impl OpenAICompatibleProvider {
    pub fn new(api_key: String, model: String, base_url: Option<String>) -> Result<Self, AppError> {
        let base_url = normalize_openai_compatible_base_url(base_url);
        let auth = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|e| AppError::Config(e.to_string()))?;
        Ok(Self {
            client: build_client(AUTHORIZATION, auth)?,
            model,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            label: "OpenAI-compatible",
        })
    }

    pub fn azure(
        api_key: String,
        endpoint: String,
        deployment: String,
        api_version: String,
    ) -> Result<Self, AppError> {
        let key = HeaderValue::from_str(&api_key).map_err(|e| AppError::Config(e.to_string()))?;
        Ok(Self {
            client: build_client(HeaderName::from_static("api-key"), key)?,
            endpoint: azure_endpoint(&endpoint, &deployment, &api_version),
            model: deployment,
            label: "Azure OpenAI",
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn build_client(auth_header: HeaderName, auth_value: HeaderValue) -> Result<reqwest::Client, AppError> {
    let mut headers = HeaderMap::new();
    headers.insert(auth_header, auth_value);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    reqwest::Client::builder()
        .default_headers(headers)
        .timeout(std::time::Duration::from_secs(60))
        .build()
        .map_err(|e| AppError::Config(e.to_string()))
}

fn azure_endpoint(endpoint: &str, deployment: &str, api_version: &str) -> String {
    format!(
        "{}/openai/deployments/{deployment}/chat/completions?api-version={api_version}",
        endpoint.trim().trim_end_matches('/')
    )
}

#[async_trait]
impl LLMProvider for OpenAICompatibleProvider {
    fn provider_name(&self) -> &'static str {
        "openai_compatible"
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: ChatRequest) -> Result<LLMResponse, AppError> {
        let body = build_request_body(&self.model, request)?;
        let parsed: ChatResponse = send_json(self.client.post(&self.endpoint).json(&body), self.label).await?;
        into_llm_response(parsed, &self.model, &body)
    }
}

fn build_request_body(model: &str, request: ChatRequest) -> Result<Value, AppError> {
    let messages = request
        .messages
        .into_iter()
        .map(to_openai_message)
        .collect::<Result<Vec<_>, AppError>>()?;

    let mut body = serde_json::json!({
        "model": model,
        "messages": messages,
        "temperature": request.temperature,
        "max_tokens": request.max_tokens
    });

    if !request.tools.is_empty() {
        let tool_defs = request
            .tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters
                    }
                })
            })
            .collect::<Vec<_>>();
        body["tools"] = Value::Array(tool_defs);
        body["tool_choice"] = Value::String("auto".to_string());
    }
    Ok(body)
}

fn into_llm_response(parsed: ChatResponse, model: &str, body: &Value) -> Result<LLMResponse, AppError> {
    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| AppError::ModelUnavailable("model returned no choices".to_string()))?;

    let content = choice.message.content.unwrap_or_default();
    let tool_calls: Vec<ToolCall> = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| {
            let arguments = if tc.function.arguments.trim().is_empty() {
                Value::Object(Default::default())
            } else {
                serde_json::from_str(&tc.function.arguments)
                    .unwrap_or_else(|_| Value::String(tc.function.arguments))
            };
            ToolCall::new(tc.id, tc.function.name, arguments)
        })
        .collect();

    let prompt_tokens = parsed.usage.as_ref().and_then(|u| u.prompt_tokens);
    let completion_tokens = parsed.usage.as_ref().and_then(|u| u.completion_tokens);
    let estimated = prompt_tokens.is_none() || completion_tokens.is_none();

    Ok(LLMResponse {
        usage: TokenUsage {
            input_tokens: prompt_tokens.unwrap_or_else(|| estimate_tokens(&body.to_string())),
            output_tokens: completion_tokens
                .unwrap_or_else(|| estimate_tokens(&output_estimate_text(&content, &tool_calls))),
            estimated,
        },
        content,
        model: parsed.model.unwrap_or_else(|| model.to_string()),
        finish_reason: choice.finish_reason,
        tool_calls,
    })
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    pub choices: Vec<ChatChoice>,
    pub model: Option<String>,
    pub usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    pub message: ChatMessage,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    pub content: Option<String>,
    pub tool_calls: Option<Vec<OpenAIToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAIToolCall {
    pub id: String,
    pub function: OpenAIFunctionCall,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAIFunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

fn to_openai_message(msg: Message) -> Result<Value, AppError> {
    let role = match msg.role {
        MessageRole::System => "system",
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
        MessageRole::Tool => "tool",
    };

    let mut out = serde_json::Map::new();
    out.insert("role".to_string(), Value::String(role.to_string()));
    out.insert(
        "content".to_string(),
        msg.content.map(Value::String).unwrap_or(Value::Null),
    );

    if let Some(name) = msg.name {
        out.insert("name".to_string(), Value::String(name));
    }

    if let Some(tool_call_id) = msg.tool_call_id {
        out.insert("tool_call_id".to_string(), Value::String(tool_call_id));
    }

    if let Some(tool_calls) = msg.tool_calls {
        let mapped = tool_calls
            .into_iter()
            .map(|tc| -> Result<Value, AppError> {
                let args = serde_json::to_string(&tc.arguments)?;
                Ok(serde_json::json!({
                    "id": tc.call_id,
                    "type": "function",
                    "function": { "name": tc.tool_name, "arguments": args }
                }))
            })
            .collect::<Result<Vec<_>, AppError>>()?;
        out.insert("tool_calls".to_string(), Value::Array(mapped));
    }

    Ok(Value::Object(out))
}

pub fn normalize_openai_compatible_base_url(base_url: Option<String>) -> String {
    let default_url = "https://api.openai.com/v1".to_string();
    let Some(mut base) = base_url else {
        return default_url;
    };
    base = base.trim().to_string();
    if base.is_empty() {
        return default_url;
    }

    // Users sometimes paste the full endpoint.
    let trimmed = base.trim_end_matches('/');
    if let Some(stripped) = trimmed.strip_suffix("/chat/completions") {
        base = stripped.to_string();
    }

    // Only append /v1 when no path provided.
    match url::Url::parse(&base) {
        Ok(url) => {
            let path = url.path();
            if path.is_empty() || path == "/" {
                return format!("{}/v1", base.trim_end_matches('/'));
            }
            base.trim_end_matches('/').to_string()
        }
        Err(_) => base.trim_end_matches('/').to_string(),
    }
}
