//! Telemetry Gateway - hub pipeline for all edge clusters
//!
//! This binary accepts batches pushed by edge agents, admits them against a
//! byte ceiling and fans them out to every configured storage backend.

use anyhow::Result;
use std::sync::Arc;
use telemetry_lib::{
    api::gateway::GatewayState,
    backpressure::BackpressureController,
    gateway::GatewayPipeline,
    health::{components, HealthRegistry},
    observability::StructuredLogger,
    sink::build_sink,
};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const GATEWAY_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting telemetry-gateway");

    let settings = config::GatewaySettings::load(config::config_path().as_deref())?;
    info!(
        ceiling_bytes = settings.backpressure.ceiling_bytes,
        sinks = settings.enabled_sinks().count(),
        "Gateway configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::PIPELINE).await;
    health_registry.register(components::BACKPRESSURE).await;

    let logger = StructuredLogger::new("gateway");
    logger.log_startup(GATEWAY_VERSION, "hub");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // One isolated delivery loop per enabled sink
    let mut sinks = Vec::new();
    let mut sink_handles = Vec::new();
    for definition in settings.enabled_sinks() {
        let (sink, worker) = build_sink(definition)?;
        health_registry
            .register(&components::sink(&definition.name))
            .await;
        info!(
            sink = %definition.name,
            kind = %definition.kind,
            endpoint = definition.endpoint.as_deref().unwrap_or("-"),
            "Sink configured"
        );
        let worker = worker.with_health(health_registry.clone());
        sink_handles.push(tokio::spawn(worker.run(shutdown_rx.clone())));
        sinks.push(sink);
    }

    let controller = Arc::new(BackpressureController::new(
        settings.backpressure.ceiling_bytes,
    ));
    let pipeline = Arc::new(
        GatewayPipeline::new(controller, sinks, settings.pipeline_options())
            .with_health(health_registry.clone()),
    );
    let reaper_handle = tokio::spawn(Arc::clone(&pipeline).run_reaper(shutdown_rx.clone()));

    let app_state = GatewayState::new(Arc::clone(&pipeline), health_registry.clone());
    let api_handle = tokio::spawn(api::serve(settings.api_port, app_state, shutdown_rx));

    // Mark gateway as ready after initialization
    health_registry.set_ready(true).await;

    shutdown_signal().await?;
    logger.log_shutdown("termination signal received");
    health_registry.set_ready(false).await;
    let _ = shutdown_tx.send(true);

    api_handle.await??;
    reaper_handle.await?;
    for handle in sink_handles {
        let stats = handle.await?;
        info!(
            sink = %stats.name,
            delivered = stats.delivered,
            dropped = stats.dropped(),
            "Sink drained"
        );
    }

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
