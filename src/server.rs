//! HTTP surface: routing, request parsing, CORS.
//!
//! A thin wrapper over [`ExecutionService`]; every completed execution is
//! an HTTP 200, success or not. The service handle is passed in explicitly
//! and held as immutable router state.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tracing::info;

use crate::config::ServerConfig;
use crate::service::{ExecutionService, ServiceError};
use crate::types::ExecutionRequest;

/// Build the service router.
pub fn router(service: Arc<ExecutionService>) -> Router {
    // Permissive CORS for trusted deployment environments. Credentials are
    // allowed, so the origin is mirrored rather than wildcarded.
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true);

    Router::new()
        .route("/execute", post(execute))
        .route("/health", get(health))
        .route("/", get(root))
        .layer(cors)
        .with_state(service)
}

/// Bind and serve until the process is stopped.
///
/// # Errors
///
/// Returns an error when the address cannot be bound or the server fails.
pub async fn serve(service: Arc<ExecutionService>, config: &ServerConfig) -> anyhow::Result<()> {
    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    info!(host = %config.host, port = config.port, "listening");
    axum::serve(listener, router(service)).await?;
    Ok(())
}

async fn execute(
    State(service): State<Arc<ExecutionService>>,
    Json(request): Json<ExecutionRequest>,
) -> Response {
    match service.execute(request).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e @ ServiceError::BadRequest(_)) => error_response(StatusCode::BAD_REQUEST, &e),
        Err(e @ ServiceError::ImageUnavailable) => {
            error_response(StatusCode::SERVICE_UNAVAILABLE, &e)
        }
    }
}

async fn health(State(service): State<Arc<ExecutionService>>) -> Response {
    Json(service.health().await).into_response()
}

async fn root() -> Response {
    Json(serde_json::json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "health": "/health",
    }))
    .into_response()
}

fn error_response(status: StatusCode, error: &ServiceError) -> Response {
    (status, Json(serde_json::json!({ "detail": error.to_string() }))).into_response()
}
