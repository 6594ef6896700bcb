use axum::{routing::get, Router};
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use crate::config::WebConfig;
use crate::pipeline::QueryHandle;

use super::api::{count_logs, get_stats, health_check, list_logs, AppState};

/// Read-only query routes over the pipeline's storage.
pub fn create_router(handle: QueryHandle) -> Router {
    let app_state = AppState { handle };

    Router::new()
        .route("/health", get(health_check))
        .route("/api/logs", get(list_logs))
        .route("/api/logs/count", get(count_logs))
        .route("/api/stats", get(get_stats))
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
}

/// Serve the query API until `shutdown_rx` turns true.
pub async fn run_server(
    handle: QueryHandle,
    web_config: WebConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let app = create_router(handle);

    let listener = tokio::net::TcpListener::bind(&web_config.listen).await?;
    tracing::info!("Web server listening on {}", web_config.listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.wait_for(|&v| v).await;
            tracing::info!("Web server shutting down gracefully");
        })
        .await?;

    Ok(())
}
