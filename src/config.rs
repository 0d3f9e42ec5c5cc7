use std::path::Path;

use serde::Deserialize;

use crate::error::AppError;
use crate::models::llm::{LLMRuntimeConfig, ProviderKind};
use crate::orchestration::engine::OrchestratorConfig;
use crate::session::SessionLimits;
use crate::tools::executor::ToolLimits;

pub const CONFIG_PATH_VAR: &str = "DATAOPS_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "dataops.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LLMRuntimeConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorSettings,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default = "default_environment")]
    pub default_environment: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorSettings {
    #[serde(default = "default_max_round_trips")]
    pub max_round_trips: u32,
    #[serde(default = "default_tool_timeout_ms")]
    pub tool_timeout_ms: u64,
    #[serde(default = "default_true")]
    pub parallel_tool_calls: bool,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_mcp_server_url")]
    pub mcp_server_url: String,
    /// Build the registry from the tool server's listing instead of the
    /// built-in catalogue.
    #[serde(default)]
    pub discover: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionsConfig {
    /// Seconds without a request before a session is dropped.
    #[serde(default = "default_idle_ttl_secs")]
    pub idle_ttl_secs: u64,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            llm: LLMRuntimeConfig::default(),
            orchestrator: OrchestratorSettings::default(),
            tools: ToolsConfig::default(),
            sessions: SessionsConfig::default(),
            default_environment: default_environment(),
            log_level: default_log_level(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_round_trips: default_max_round_trips(),
            tool_timeout_ms: default_tool_timeout_ms(),
            parallel_tool_calls: true,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            mcp_server_url: default_mcp_server_url(),
            discover: false,
        }
    }
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            idle_ttl_secs: default_idle_ttl_secs(),
            max_sessions: default_max_sessions(),
        }
    }
}

fn default_environment() -> String {
    "dev".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_max_round_trips() -> u32 {
    10
}

fn default_tool_timeout_ms() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}

fn default_temperature() -> f64 {
    0.7
}

fn default_max_tokens() -> u32 {
    2000
}

fn default_idle_ttl_secs() -> u64 {
    3600
}

fn default_max_sessions() -> usize {
    1000
}

fn default_mcp_server_url() -> String {
    "http://localhost:8001".to_string()
}

impl AppConfig {
    /// File (if any), then `.env`, then the process environment.
    pub fn load() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        let explicit = std::env::var(CONFIG_PATH_VAR).ok();
        let path = explicit.clone().unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
        let mut cfg = if Path::new(&path).exists() {
            Self::from_file(&path)?
        } else if explicit.is_some() {
            return Err(AppError::Config(format!("config file '{path}' does not exist")));
        } else {
            Self::default()
        };

        cfg.apply_env(|key| std::env::var(key).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: &str) -> Result<Self, AppError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("cannot read '{path}': {e}")))?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, AppError> {
        Ok(toml::from_str(raw)?)
    }

    /// Applies environment overrides read through `lookup`. Blank values are
    /// ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(provider) = get("LLM_PROVIDER") {
            self.llm.provider = ProviderKind::parse(&provider)
                .ok_or_else(|| AppError::Config(format!("unknown LLM_PROVIDER '{provider}'")))?;
        }
        if let Some(v) = get("LLM_API_KEY") {
            self.llm.api_key = v;
        }
        if let Some(v) = get("LLM_MODEL") {
            self.llm.model_id = v;
        }
        if let Some(v) = get("LLM_BASE_URL") {
            self.llm.base_url = Some(v);
        }

        if self.llm.provider == ProviderKind::AzureOpenai {
            if let Some(v) = get("AZURE_OPENAI_ENDPOINT") {
                self.llm.base_url = Some(v);
            }
            if let Some(v) = get("AZURE_OPENAI_API_KEY") {
                self.llm.api_key = v;
            }
            if let Some(v) = get("AZURE_OPENAI_DEPLOYMENT_NAME") {
                self.llm.model_id = v;
            }
            if let Some(v) = get("AZURE_OPENAI_API_VERSION") {
                self.llm.api_version = v;
            }
        }

        if let Some(v) = get("MCP_SERVER_URL") {
            self.tools.mcp_server_url = v;
        }
        if let Some(v) = get("ENVIRONMENT") {
            self.default_environment = v;
        }
        if let Some(v) = get("LOG_LEVEL") {
            self.log_level = v.to_ascii_lowercase();
        }
        if let Some(v) = get("BIND_ADDR") {
            self.server.bind_addr = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.orchestrator.max_round_trips == 0 {
            return Err(AppError::Config("orchestrator.max_round_trips must be at least 1".to_string()));
        }
        if self.orchestrator.tool_timeout_ms == 0 {
            return Err(AppError::Config("orchestrator.tool_timeout_ms must be positive".to_string()));
        }
        if self.sessions.idle_ttl_secs == 0 || self.sessions.idle_ttl_secs > i64::MAX as u64 / 1000 {
            return Err(AppError::Config("sessions.idle_ttl_secs is out of range".to_string()));
        }
        if self.sessions.max_sessions == 0 {
            return Err(AppError::Config("sessions.max_sessions must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            max_round_trips: self.orchestrator.max_round_trips,
            parallel_tool_calls: self.orchestrator.parallel_tool_calls,
        }
    }

    pub fn session_limits(&self) -> SessionLimits {
        SessionLimits {
            idle_ttl: chrono::Duration::seconds(self.sessions.idle_ttl_secs as i64),
            max_sessions: self.sessions.max_sessions,
        }
    }

    /// How often idle sessions are swept: the TTL, at most once a minute.
    pub fn session_sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sessions.idle_ttl_secs.clamp(1, 60))
    }

    pub fn tool_limits(&self) -> ToolLimits {
        ToolLimits {
            timeout_ms: self.orchestrator.tool_timeout_ms,
        }
    }
}
