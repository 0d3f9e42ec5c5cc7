//! Client for the remote tool server that implements the inspection tools.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::AppError;
use crate::tools::definition::{ToolContext, ToolDefinition, ToolHandler};
use crate::tools::schema::ParamSchema;

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub input_schema: Value,
}

#[derive(Debug, Deserialize)]
struct ToolListing {
    #[serde(default)]
    tools: Vec<RemoteToolInfo>,
}

#[derive(Debug, Serialize)]
struct ExecuteRequest<'a> {
    tool_name: &'a str,
    input_data: &'a Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct ExecuteResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct McpClient {
    client: reqwest::Client,
    base_url: String,
}

impl McpClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, AppError> {
        let base_url = base_url.into().trim().trim_end_matches('/').to_string();
        url::Url::parse(&base_url)
            .map_err(|e| AppError::Config(format!("invalid tool server url '{base_url}': {e}")))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Config(e.to_string()))?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn list_tools(&self) -> Result<Vec<RemoteToolInfo>, AppError> {
        let resp = self.client.get(format!("{}/tools", self.base_url)).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(AppError::Message(format!("tool listing failed: {status} {text}")));
        }
        let listing: ToolListing = resp.json().await?;
        Ok(listing.tools)
    }

    pub async fn execute(&self, tool_name: &str, input: &Map<String, Value>) -> Result<Value, AppError> {
        tracing::debug!(tool = %tool_name, server = %self.base_url, "forwarding tool call");
        let resp = self
            .client
            .post(format!("{}/execute", self.base_url))
            .json(&ExecuteRequest {
                tool_name,
                input_data: input,
            })
            .send()
            .await
            .map_err(|e| AppError::HandlerExecution(format!("tool server unreachable: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(AppError::HandlerExecution(format!("tool server error: {status} {text}")));
        }

        let body: ExecuteResponse = resp
            .json()
            .await
            .map_err(|e| AppError::HandlerExecution(format!("unreadable tool server reply: {e}")))?;
        if !body.success {
            return Err(AppError::HandlerExecution(
                body.error.unwrap_or_else(|| "tool reported failure".to_string()),
            ));
        }
        Ok(body.result.unwrap_or(Value::Null))
    }
}

/// Forwards a call for one named tool to the tool server.
pub struct RemoteToolHandler {
    client: Arc<McpClient>,
    tool_name: String,
}

impl RemoteToolHandler {
    pub fn new(client: Arc<McpClient>, tool_name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            client,
            tool_name: tool_name.into(),
        })
    }
}

#[async_trait]
impl ToolHandler for RemoteToolHandler {
    async fn call(&self, args: Map<String, Value>, _ctx: ToolContext) -> Result<Value, AppError> {
        self.client.execute(&self.tool_name, &args).await
    }
}

/// Builds definitions from whatever the server advertises, deriving each
/// parameter schema from the published JSON Schema.
pub async fn discover_tools(client: Arc<McpClient>) -> Result<Vec<ToolDefinition>, AppError> {
    let listing = client.list_tools().await?;
    tracing::info!(count = listing.len(), server = %client.base_url(), "discovered remote tools");
    Ok(listing
        .into_iter()
        .map(|info| {
            let parameters = ParamSchema::from_json_schema(&info.input_schema);
            let handler = RemoteToolHandler::new(client.clone(), info.name.clone());
            ToolDefinition::new(info.name, info.description, parameters, handler)
        })
        .collect())
}

#[cfg(test)]
pub(crate) mod test_server {
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{json, Value};

    /// Minimal stand-in for the tool server, bound to an ephemeral port.
    pub async fn spawn() -> String {
        let app = Router::new()
            .route(
                "/tools",
                get(|| async {
                    Json(json!({
                        "tools": [{
                            "name": "get_secret_usage",
                            "description": "Find which pipelines use a secret",
                            "input_schema": {
                                "type": "object",
                                "properties": { "secret_name": { "type": "string" } },
                                "required": ["secret_name"]
                            }
                        }],
                        "count": 1
                    }))
                }),
            )
            .route(
                "/execute",
                post(|Json(body): Json<Value>| async move {
                    let name = body["tool_name"].as_str().unwrap_or_default().to_string();
                    if name == "get_secret_usage" {
                        Json(json!({
                            "tool_name": name,
                            "success": true,
                            "result": { "secret_name": body["input_data"]["secret_name"], "usage_count": 2 }
                        }))
                    } else {
                        Json(json!({ "tool_name": name, "success": false, "error": format!("Tool {name} not found") }))
                    }
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }
}
