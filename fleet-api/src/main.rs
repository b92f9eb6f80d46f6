use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use fleet_api::{create_app, AppState, Config, RequestAuthenticator};
use fleet_core::TokioCommandRunner;
use fleet_orchestrator::InstanceOrchestrator;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Keep the guard alive so buffered file logs are flushed on exit.
    let _log_guard = fleet_logging::init_subscriber();

    info!("Starting fleet-manager service...");

    let config = Config::from_env()?;
    info!(
        "Configuration loaded: bind_addr={}, instances_root={}",
        config.bind_addr,
        config.orchestrator.instances_root.display()
    );

    let mut runner = TokioCommandRunner::new(Duration::from_secs(config.command_timeout_secs));
    if let Some(dir) = &config.tool_path {
        runner = runner.with_path_prefix(dir);
    }

    let orchestrator_config = &config.orchestrator;
    fleet_core::preflight(
        [
            "git",
            orchestrator_config.python.as_str(),
            orchestrator_config.pm2.as_str(),
            "docker",
        ],
        runner.search_path().as_deref(),
    );

    tokio::fs::create_dir_all(&orchestrator_config.instances_root)
        .await
        .with_context(|| {
            format!(
                "Failed to create instances root {}",
                orchestrator_config.instances_root.display()
            )
        })?;

    let orchestrator = InstanceOrchestrator::new(config.orchestrator.clone(), Arc::new(runner));
    let authenticator = RequestAuthenticator::new(&config.api_key, config.signature_window_secs);
    let app = create_app(AppState::new(orchestrator, authenticator));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!("Listening on http://{}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("fleet-manager stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
