//! HTTP server for batch push, health checks and Prometheus metrics

use telemetry_lib::api::gateway::{create_router, GatewayState};
use tokio::sync::watch;
use tracing::info;

/// Serve the gateway API until shutdown is signalled
pub async fn serve(
    port: u16,
    state: GatewayState,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await?;

    Ok(())
}
