mod action_schema;
mod api_server;
mod cli_llm;
mod config_manager;
mod error;
mod json_extract;
mod orchestrator;
mod prompts;
mod request_normalizer;
mod schema;

use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = config_manager::GatewayConfig::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("decision_gateway=info,tower_http=info")),
        )
        .init();

    tracing::info!(
        scratch_dir = %config.scratch_dir.display(),
        engine_timeout_secs = config.engine_timeout.as_secs(),
        min_confidence = ?config.guard.min_confidence,
        "configuration loaded"
    );

    api_server::start_api_server(config).await
}
