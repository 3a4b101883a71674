//! HTTP Endpoints
//!
//! Health, Prometheus scrape and the media-stream WebSocket upgrade.

use std::time::Duration;

use axum::{
    extract::{Json, State},
    http::{HeaderValue, Method, StatusCode},
    routing::get,
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::metrics::metrics_handler;
use crate::state::AppState;
use crate::websocket::MediaStreamHandler;

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let server = &state.settings.server;
    let cors_layer = build_cors_layer(&server.cors_origins, server.cors_enabled);
    let timeout = Duration::from_secs(server.timeout_seconds);
    let media_path = server.media_path.clone();

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .route(&media_path, get(MediaStreamHandler::handle))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(timeout))
        .layer(cors_layer)
        .with_state(state)
}

/// Build CORS layer from configured origins
///
/// Disabled means permissive. With no origins configured any origin is
/// allowed for GET only.
fn build_cors_layer(origins: &[String], enabled: bool) -> CorsLayer {
    if !enabled {
        tracing::warn!("CORS is disabled - allowing all origins");
        return CorsLayer::permissive();
    }

    let parsed_origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| {
            origin.parse::<HeaderValue>().ok().or_else(|| {
                tracing::warn!("Invalid CORS origin: {}", origin);
                None
            })
        })
        .collect();

    if parsed_origins.is_empty() {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET])
            .allow_headers(Any);
    }

    tracing::info!("CORS configured with {} origins", parsed_origins.len());
    CorsLayer::new()
        .allow_origin(parsed_origins)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any)
}

/// Liveness plus a count of calls in progress
async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let active = state.active_calls();
    let max_calls = state.settings.server.max_calls;
    let status = if active < max_calls { "healthy" } else { "saturated" };

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": status,
            "version": env!("CARGO_PKG_VERSION"),
            "environment": state.settings.environment,
            "active_calls": active,
            "max_calls": max_calls,
        })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::state;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    async fn get_json(router: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null))
    }

    #[tokio::test]
    async fn test_health_reports_calls() {
        let state = state(1);
        let router = create_router(state.clone());

        let (status, body) = get_json(router.clone(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["active_calls"], 0);

        let _guard = state.register_call("MZ1", "CA1").unwrap();
        let (_, body) = get_json(router, "/health").await;
        assert_eq!(body["status"], "saturated");
        assert_eq!(body["active_calls"], 1);
    }

    #[tokio::test]
    async fn test_metrics_unavailable_without_recorder() {
        let router = create_router(state(4));
        let (status, _) = get_json(router, "/metrics").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_media_path_requires_upgrade() {
        let router = create_router(state(4));
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/media-stream")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(response.status().is_client_error());
        assert_ne!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_cors_variants_build() {
        let _ = build_cors_layer(&[], false);
        let _ = build_cors_layer(&[], true);
        let _ = build_cors_layer(&["https://ops.example.com".to_string()], true);
    }
}
