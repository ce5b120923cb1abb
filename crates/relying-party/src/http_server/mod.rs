use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use http::header::{ACCEPT, CONTENT_TYPE, ORIGIN};
use http::Method;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultOnFailure, DefaultOnResponse, TraceLayer};
use tower_http::LatencyUnit;

use custodian::http_server::{not_found_handler, ApiResponse, Config};

mod handlers;

pub use handlers::{ConsumedResponse, DataQuery, DataResponse, SessionQuery, StatusResponse};

use crate::State;

/// Maximum callback body size in bytes (1 MB)
pub const MAX_BODY_SIZE_BYTES: usize = 1024 * 1024;

async fn healthz() -> ApiResponse<serde_json::Value> {
    ApiResponse::ok(serde_json::json!({"status": "ok"}))
}

pub fn router(config: Config, state: State) -> Router {
    let cors_layer = CorsLayer::new()
        .allow_methods(vec![Method::GET, Method::POST])
        .allow_headers(vec![ACCEPT, CONTENT_TYPE, ORIGIN])
        .allow_origin(Any)
        .allow_credentials(false);

    let trace_layer = TraceLayer::new_for_http()
        .on_response(
            DefaultOnResponse::new()
                .include_headers(false)
                .level(config.log_level)
                .latency_unit(LatencyUnit::Micros),
        )
        .on_failure(DefaultOnFailure::new().latency_unit(LatencyUnit::Micros));

    Router::new()
        .route("/_status/healthz", get(healthz))
        .route("/appInfo", get(handlers::app_info))
        .route("/data", get(handlers::data))
        .route("/status", get(handlers::status))
        .route("/logout", post(handlers::logout))
        .route("/decrypt/:token", post(handlers::decrypt))
        .fallback(not_found_handler)
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE_BYTES))
        .with_state(state)
        .layer(cors_layer)
        .layer(trace_layer)
}

pub async fn serve(
    listener: TcpListener,
    config: Config,
    state: State,
    mut shutdown_rx: watch::Receiver<()>,
) -> Result<(), HttpServerError> {
    let router = router(config, state);
    tracing::info!(addr = ?listener.local_addr()?, "relying party listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        })
        .await?;

    Ok(())
}

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
