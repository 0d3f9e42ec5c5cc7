use anyhow::Context;
use tracing_subscriber::EnvFilter;

use dataops_assistant::config::AppConfig;
use dataops_assistant::server::router;
use dataops_assistant::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = AppConfig::load().context("loading configuration")?;

    // RUST_LOG wins over the configured level.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!(
        environment = %cfg.default_environment,
        tool_server = %cfg.tools.mcp_server_url,
        provider = ?cfg.llm.provider,
        "starting dataops-assistant"
    );

    let state = AppState::init(&cfg).await.context("initialising services")?;
    let _expiry = state.sessions.clone().spawn_expiry(cfg.session_sweep_interval());
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&cfg.server.bind_addr)
        .await
        .with_context(|| format!("binding {}", cfg.server.bind_addr))?;
    tracing::info!(addr = %cfg.server.bind_addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving http")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
