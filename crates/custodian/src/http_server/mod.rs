use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tower_http::trace::{DefaultOnFailure, DefaultOnResponse};
use tower_http::LatencyUnit;

pub mod api;
mod config;
mod handlers;
mod response;

pub use config::Config;
pub use handlers::not_found_handler;
pub use response::{ApiResponse, ErrorPayload, HandlerError};

use crate::State;

const STATUS_PREFIX: &str = "/_status";

/// Maximum request body size in bytes (1 MB)
pub const MAX_BODY_SIZE_BYTES: usize = 1024 * 1024;

async fn healthz() -> ApiResponse<serde_json::Value> {
    ApiResponse::ok(serde_json::json!({"status": "ok"}))
}

/// The full custodian router: `/_status`, `/auth` and `/user` routes
pub fn router(config: Config, state: State) -> Router {
    let log_level = config.log_level;
    let trace_layer = TraceLayer::new_for_http()
        .on_response(
            DefaultOnResponse::new()
                .include_headers(false)
                .level(log_level)
                .latency_unit(LatencyUnit::Micros),
        )
        .on_failure(DefaultOnFailure::new().latency_unit(LatencyUnit::Micros));

    Router::new()
        .route(&format!("{}/healthz", STATUS_PREFIX), get(healthz))
        .merge(api::router(state.clone()))
        .fallback(handlers::not_found_handler)
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE_BYTES))
        .with_state(state)
        .layer(trace_layer)
}

/// Serve the API on an already bound listener until shutdown is signalled
pub async fn serve(
    listener: TcpListener,
    config: Config,
    state: State,
    mut shutdown_rx: watch::Receiver<()>,
) -> Result<(), HttpServerError> {
    let router = router(config, state);
    tracing::info!(addr = ?listener.local_addr()?, "API server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        })
        .await?;

    Ok(())
}

/// Run the custodian API HTTP server.
pub async fn run_api(
    config: Config,
    state: State,
    shutdown_rx: watch::Receiver<()>,
) -> Result<(), HttpServerError> {
    let listener = TcpListener::bind(config.listen_addr).await?;
    serve(listener, config, state, shutdown_rx).await
}

#[derive(Debug, thiserror::Error)]
pub enum HttpServerError {
    #[error("an error occurred running the HTTP server: {0}")]
    ServingFailed(#[from] std::io::Error),
}
