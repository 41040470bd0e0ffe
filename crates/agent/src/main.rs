//! Telemetry Agent - edge collector for one cluster
//!
//! This binary runs beside the workloads of an edge cluster, tags and buffers
//! their telemetry, and pushes batches to the hub gateway.

use anyhow::{Context, Result};
use std::sync::Arc;
use telemetry_lib::{
    agent::{AgentCollector, HttpHubTransport, HubTransport},
    api::agent::AgentState,
    health::{components, HealthRegistry},
    observability::StructuredLogger,
    tagger::ResourceTagger,
};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting telemetry-agent");

    // Missing cluster identity stops the agent here
    let settings = config::AgentSettings::load(config::config_path().as_deref())?;
    let identity = settings
        .cluster
        .identity()
        .context("cluster identity is required")?;
    info!(
        agent_id = %settings.agent_id,
        cluster = %identity.name(),
        hub = %settings.hub.endpoint,
        "Agent configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::INGEST).await;
    health_registry.register(components::BUFFER).await;
    health_registry.register(components::HUB_LINK).await;

    let logger = StructuredLogger::new(&settings.agent_id);
    logger.log_startup(AGENT_VERSION, identity.name());

    let transport: Arc<dyn HubTransport> =
        Arc::new(HttpHubTransport::new(settings.hub.to_client_config())?);
    let collector = Arc::new(
        AgentCollector::new(settings.to_agent_config(), ResourceTagger::new(identity))
            .with_health(health_registry.clone()),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let flush_handle = tokio::spawn(Arc::clone(&collector).run(transport, shutdown_rx.clone()));

    let app_state = AgentState::new(collector, health_registry.clone());
    let api_handle = tokio::spawn(api::serve(settings.api_port, app_state, shutdown_rx));

    // Mark agent as ready after initialization
    health_registry.set_ready(true).await;

    shutdown_signal().await?;
    logger.log_shutdown("termination signal received");
    health_registry.set_ready(false).await;
    let _ = shutdown_tx.send(true);

    let stats = flush_handle.await?;
    info!(
        records_sent = stats.records_sent,
        records_discarded = stats.records_discarded_on_shutdown,
        dropped_overflow = stats.dropped_overflow,
        "Agent stopped"
    );
    api_handle.await??;

    Ok(())
}

/// Resolves on SIGINT or, on Unix, SIGTERM
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;

    Ok(())
}
