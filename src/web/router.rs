//! Router configuration for the connector endpoints.

use axum::{extract::DefaultBodyLimit, routing::get, Router};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use super::handlers::{connector_get, connector_post, thumbnail, AppState};
use super::middleware::create_cors_layer;
use crate::config::ServerConfig;

/// Path of the command endpoint.
pub const CONNECTOR_PATH: &str = "/connector";

/// Create the connector router.
pub fn create_router(app_state: Arc<AppState>, config: &ServerConfig) -> Router {
    let body_limit = config.max_body_mb.saturating_mul(1024 * 1024);

    Router::new()
        .route(CONNECTOR_PATH, get(connector_get).post(connector_post))
        .route("/connector/thumb/:target", get(thumbnail))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(create_cors_layer(&config.cors_origins))
                .layer(DefaultBodyLimit::max(body_limit)),
        )
        .with_state(app_state)
}

/// Create a health check router.
pub fn create_health_router() -> Router {
    Router::new().route("/health", get(health_check))
}

/// Health check handler.
async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;

    #[tokio::test]
    async fn test_health_router() {
        let response = create_health_router()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"OK");
    }
}
