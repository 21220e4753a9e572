//! Health and metrics endpoints.

use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::WorkerResult;

/// Liveness probe.
pub async fn health() -> &'static str {
    "OK"
}

/// Build the router; `/metrics` is only mounted when a recorder is installed.
pub fn create_router(metrics_handle: Option<PrometheusHandle>) -> Router {
    let health_routes = Router::new()
        .route("/", get(health))
        .route("/health", get(health));

    let metrics_routes = if let Some(handle) = metrics_handle {
        Router::new().route("/metrics", get(move || async move { handle.render() }))
    } else {
        Router::new()
    };

    health_routes
        .merge(metrics_routes)
        .layer(TraceLayer::new_for_http())
}

/// Serve until `shutdown` turns true.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    mut shutdown: watch::Receiver<bool>,
) -> WorkerResult<()> {
    info!("Health server listening on {}", listener.local_addr()?);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await?;

    Ok(())
}
