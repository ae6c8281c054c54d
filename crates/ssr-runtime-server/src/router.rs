//! HTTP router configuration.
//!
//! This module provides functions to build the Axum router with all
//! necessary routes and middleware.

use std::time::Duration;

use axum::Router;
use axum::routing::get;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::handler::{
    handle_render, health_check, metrics_handler, readiness_check, reload_probe,
};
use crate::state::AppState;

const RESERVED_PATHS: [&str; 3] = ["/health", "/ready", "/metrics"];

/// Build the main application router.
///
/// Routes:
/// - `GET /health` - Health check
/// - `GET /ready` - Pool readiness
/// - `GET /metrics` - Prometheus metrics
/// - `GET <dev.reload_probe_path>` - Live-reload probe (dev auto reload only)
/// - everything else - Rendered page, or the dev asset proxy
///
/// `request_timeout` applies to the fixed routes only. Page renders are
/// bounded by the acquire and render timeouts and always answer through the
/// orchestrator.
pub fn build_router(state: AppState, request_timeout: Duration) -> Router {
    let mut service_routes = Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_handler));

    let validated = state.config();
    if validated.dev_mode && validated.dev_auto_reload {
        let probe_path = validated.config.dev.reload_probe_path.as_str();
        if RESERVED_PATHS.contains(&probe_path) {
            warn!(path = probe_path, "Reload probe path collides with a built-in route; probe disabled");
        } else {
            service_routes = service_routes.route(probe_path, get(reload_probe));
        }
    }

    Router::new()
        .merge(service_routes.layer(TimeoutLayer::new(request_timeout)))
        .fallback(handle_render)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use ssr_runtime_common::{SsrConfig, ValidatedConfig};
    use tower::util::ServiceExt;

    const BUNDLE: &str = r#"(module
        (memory (export "memory") 1)
        (func (export "ssr_alloc") (param i32) (result i32) (i32.const 1024))
        (data (i32.const 16) "<p>hi</p>")
        (func (export "render") (param i32 i32 i32 i32 i32 i32) (result i64)
            (i64.or (i64.shl (i64.const 16) (i64.const 32)) (i64.const 9))))"#;

    const LOOPING_BUNDLE: &str = r#"(module
        (memory (export "memory") 1)
        (func (export "ssr_alloc") (param i32) (result i32) (i32.const 1024))
        (func (export "render") (param i32 i32 i32 i32 i32 i32) (result i64)
            (loop $spin (br $spin))
            (i64.const 0)))"#;

    fn setup_router(tweak: impl FnOnce(&mut SsrConfig)) -> Router {
        setup_router_with(BUNDLE, tweak, Duration::from_secs(30))
    }

    fn setup_router_with(
        bundle: &str,
        tweak: impl FnOnce(&mut SsrConfig),
        request_timeout: Duration,
    ) -> Router {
        let path = std::env::temp_dir().join(format!("ssr-router-{}.wat", uuid::Uuid::new_v4()));
        std::fs::write(&path, bundle).unwrap();

        let mut config = SsrConfig::default();
        config.dev.enabled = true;
        config.dev.proxy_assets = Some(false);
        config.runtime.pool_size = 1;
        config.runtime.bundle_path = path.display().to_string();
        tweak(&mut config);
        let validated: ValidatedConfig = config.validate().unwrap();

        let state = AppState::new(&validated).unwrap();
        std::fs::remove_file(path).ok();
        build_router(state, request_timeout)
    }

    async fn get_status(app: Router, uri: &str) -> StatusCode {
        app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = setup_router(|_| {});
        assert_eq!(get_status(app, "/health").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_readiness_check() {
        let app = setup_router(|_| {});
        assert_eq!(get_status(app, "/ready").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_page_falls_through_to_render() {
        let app = setup_router(|_| {});
        assert_eq!(get_status(app, "/anything/here").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_post_not_allowed() {
        let app = setup_router(|_| {});

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()["allow"], "GET, HEAD");
        assert_eq!(response.headers()["x-request-id"], "ssr-1");
    }

    #[tokio::test]
    async fn test_post_not_allowed_keeps_request_id() {
        let app = setup_router(|_| {});

        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/posts/1")
                    .header("x-request-id", "abc")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()["x-request-id"], "abc");
    }

    #[tokio::test]
    async fn test_slow_render_answers_through_orchestrator() {
        // The render deadline is longer than the router timeout.
        let app = setup_router_with(
            LOOPING_BUNDLE,
            |config| config.runtime.render_timeout_ms = 300,
            Duration::from_millis(50),
        );

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header("x-request-id", "abc")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers()["x-request-id"], "abc");
        assert_eq!(response.headers()["x-content-type-options"], "nosniff");

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&body).contains("Render exceeded timeout of 300ms"));
    }

    #[tokio::test]
    async fn test_reload_probe_is_stable() {
        let app = setup_router(|_| {});

        let first = app
            .clone()
            .oneshot(Request::builder().uri("/__ssr/test").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(first.headers()["cache-control"], "no-store");
        let first = axum::body::to_bytes(first.into_body(), usize::MAX).await.unwrap();

        let second = app
            .oneshot(Request::builder().uri("/__ssr/test").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let second = axum::body::to_bytes(second.into_body(), usize::MAX).await.unwrap();

        assert!(!first.is_empty());
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_reload_probe_off_renders_page() {
        let app = setup_router(|config| config.dev.auto_reload = Some(false));

        let response = app
            .oneshot(Request::builder().uri("/__ssr/test").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&body).contains("<p>hi</p>"));
    }
}
