use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::error::AppError;
use crate::llm::factory::provider_from_runtime_config;
use crate::llm::invoker::ProviderInvoker;
use crate::orchestration::engine::Orchestrator;
use crate::session::SessionManager;
use crate::tools::catalog::build_registry;
use crate::tools::executor::ToolExecutor;
use crate::tools::remote::McpClient;

#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionManager>,
}

impl AppState {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self { sessions }
    }

    /// Wires provider, tool server and orchestrator from configuration.
    pub async fn init(cfg: &AppConfig) -> Result<Self, AppError> {
        let provider = provider_from_runtime_config(&cfg.llm)?;
        let model = ProviderInvoker::new(provider, cfg.orchestrator.temperature, cfg.orchestrator.max_tokens);

        let client = Arc::new(McpClient::new(
            cfg.tools.mcp_server_url.clone(),
            Duration::from_millis(cfg.orchestrator.tool_timeout_ms),
        )?);
        let registry = build_registry(client, cfg.tools.discover).await?;
        let executor = ToolExecutor::new(Arc::new(registry)).with_limits(cfg.tool_limits());

        let orchestrator = Orchestrator::new(Arc::new(model), executor, cfg.orchestrator_config());
        let sessions = SessionManager::new(Arc::new(orchestrator), cfg.default_environment.clone())
            .with_limits(cfg.session_limits());
        Ok(Self::new(Arc::new(sessions)))
    }
}
