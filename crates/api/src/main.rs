use anyhow::{Context, Result};
use relay_api::{build_router, build_state, spawn_session_purge, SESSION_PURGE_INTERVAL};
use relay_core::RelayConfig;
use relay_observability::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("relay_api");

    let config = RelayConfig::from_env().context("invalid relay configuration")?;
    tracing::debug!(config = ?config, "configuration loaded");

    let state = build_state(&config).await?;
    spawn_session_purge(state.dispatcher.clone(), SESSION_PURGE_INTERVAL);

    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    tracing::info!(bind = %config.bind, model = %config.openai_model, "care relay webhook started");

    axum::serve(listener, build_router(state)).await?;
    Ok(())
}
