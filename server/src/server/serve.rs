//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::app::options::ServerOptions;
use crate::errors::DeployError;
use crate::server::handlers::{
    delete_handler, deploy_handler, get_handler, health_handler, list_handler, logs_handler,
};
use crate::server::state::ServerState;
use crate::server::ws::logs_ws_handler;

/// Build the router with every route and middleware layer
pub fn router(options: &ServerOptions, state: Arc<ServerState>) -> Router {
    Router::new()
        // Health
        .route("/api/health", get(health_handler))
        // Submission
        .route(
            "/api/deploy",
            post(deploy_handler).layer(DefaultBodyLimit::max(options.max_upload_bytes)),
        )
        // Queries
        .route("/api/deployments", get(list_handler))
        .route(
            "/api/deployments/{id}",
            get(get_handler).delete(delete_handler),
        )
        .route("/api/deployments/{id}/logs", get(logs_handler))
        // Live logs
        .route("/ws/logs/{id}", get(logs_ws_handler))
        // State and middleware
        .with_state(state)
        .layer(cors_layer(&options.cors_origins))
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();
    layer.allow_origin(allowed)
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), DeployError>>, DeployError> {
    let app = router(options, state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| DeployError::ServerError(e.to_string()))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| DeployError::ServerError(e.to_string()))
    });

    Ok(handle)
}
