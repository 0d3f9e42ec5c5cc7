//! The DataOps inspection tools, with their argument schemas.

use std::sync::Arc;

use serde_json::json;

use crate::error::AppError;
use crate::tools::definition::{ToolDefinition, ToolHandler};
use crate::tools::registry::ToolRegistry;
use crate::tools::remote::{discover_tools, McpClient, RemoteToolHandler};
use crate::tools::schema::{ParamField, ParamKind, ParamSchema};

fn log_source() -> ParamKind {
    ParamKind::Enum(vec!["adf".into(), "app".into()])
}

fn log_level() -> ParamKind {
    ParamKind::Enum(vec!["Error".into(), "Warning".into(), "Info".into()])
}

fn environment() -> ParamField {
    ParamField::optional("environment", ParamKind::String)
        .describe("Environment (dev/prod)")
        .with_default(json!("dev"))
}

fn pipeline_name() -> ParamField {
    ParamField::required("pipeline_name", ParamKind::String).describe("Name of the ADF pipeline")
}

fn time_window() -> ParamField {
    ParamField::optional("time_window_hours", ParamKind::Integer)
        .describe("Time window in hours")
        .with_default(json!(24))
}

/// Name, description and parameters of every catalogue tool.
pub fn catalog_schemas() -> Vec<(&'static str, &'static str, ParamSchema)> {
    vec![
        (
            "get_pipeline_status",
            "Get current status and recent run history of an ADF pipeline",
            ParamSchema::new(vec![pipeline_name(), environment()]),
        ),
        (
            "get_pipeline_dependencies",
            "Analyze pipeline dependencies including upstream/downstream pipelines, datasets, and linked services",
            ParamSchema::new(vec![pipeline_name(), environment()]),
        ),
        (
            "get_failed_tasks_summary",
            "Summarize failed activities across pipeline runs within a time window",
            ParamSchema::new(vec![pipeline_name(), time_window()]),
        ),
        (
            "get_keyvault_secrets",
            "List secrets from Key Vault with metadata and risk levels",
            ParamSchema::new(vec![
                ParamField::optional("prefix", ParamKind::String).describe("Filter secrets by name prefix"),
                ParamField::optional("include_high_risk", ParamKind::Boolean)
                    .describe("Include high-risk secrets")
                    .with_default(json!(true)),
            ]),
        ),
        (
            "get_secret_usage",
            "Find which pipelines and linked services use a specific secret",
            ParamSchema::new(vec![ParamField::required("secret_name", ParamKind::String)]),
        ),
        (
            "fetch_logs",
            "Fetch logs from ADF or application sources with filtering",
            ParamSchema::new(vec![
                ParamField::required("source", log_source()),
                ParamField::optional("pipeline_name", ParamKind::String),
                ParamField::optional("run_id", ParamKind::String),
                ParamField::optional("time_start", ParamKind::String).describe("ISO-8601 timestamp"),
                ParamField::optional("time_end", ParamKind::String).describe("ISO-8601 timestamp"),
                ParamField::optional("level", log_level()),
            ]),
        ),
        (
            "summarize_error_logs",
            "Cluster and summarize error logs to identify patterns and anomalies",
            ParamSchema::new(vec![
                ParamField::optional("logs", ParamKind::Array).describe("Log entries to summarize instead of fetching"),
                ParamField::optional("source", log_source()),
                ParamField::optional("pipeline_name", ParamKind::String),
                ParamField::optional("time_window_hours", ParamKind::Integer).with_default(json!(24)),
            ]),
        ),
        (
            "parse_terraform_plan",
            "Parse Terraform plan JSON and categorize resource changes with risk analysis",
            ParamSchema::new(vec![
                ParamField::required("plan_path", ParamKind::String).describe("Path to terraform plan JSON file"),
            ]),
        ),
        (
            "detect_infra_drift",
            "Detect drift between Terraform plan and actual Azure resources",
            ParamSchema::new(vec![
                ParamField::required("resource_group_name", ParamKind::String),
                ParamField::optional("plan_path", ParamKind::String),
            ]),
        ),
        (
            "list_resources_by_tag",
            "List Azure resources filtered by tag key and value",
            ParamSchema::new(vec![
                ParamField::required("tag_key", ParamKind::String),
                ParamField::required("tag_value", ParamKind::String),
                ParamField::optional("resource_group", ParamKind::String),
            ]),
        ),
    ]
}

/// Catalogue tools bound to handlers produced by `handler_for`.
pub fn dataops_tools<F>(mut handler_for: F) -> Vec<ToolDefinition>
where
    F: FnMut(&str) -> Arc<dyn ToolHandler>,
{
    catalog_schemas()
        .into_iter()
        .map(|(name, description, parameters)| {
            ToolDefinition::new(name, description, parameters, handler_for(name))
        })
        .collect()
}

/// Registry used by the service. With `discover` the tool server's own
/// listing is used; otherwise the built-in catalogue forwards to it.
pub async fn build_registry(client: Arc<McpClient>, discover: bool) -> Result<ToolRegistry, AppError> {
    let definitions = if discover {
        discover_tools(client).await?
    } else {
        dataops_tools(|name| -> Arc<dyn ToolHandler> { RemoteToolHandler::new(client.clone(), name) })
    };

    let mut registry = ToolRegistry::new();
    for definition in definitions {
        registry.register(definition)?;
    }
    tracing::info!(count = registry.len(), discover, "tool registry ready");
    Ok(registry)
}
