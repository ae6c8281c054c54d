//! Request handlers.
//!
//! Page requests fall through to [`handle_render`]; the remaining handlers
//! serve health, readiness, metrics and the dev reload probe.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use tracing::debug;

use crate::dev_proxy::DevProxy;
use crate::orchestrator::RenderOptions;
use crate::request::InboundRequest;
use crate::response::RenderResponse;
use crate::state::AppState;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Render a page through the orchestrator.
///
/// In dev mode, dev-server asset paths are proxied instead.
pub async fn handle_render(State(state): State<AppState>, request: Request) -> Response {
    let (parts, _body) = request.into_parts();
    let req = InboundRequest::from_parts(&parts);

    let proxy = state
        .dev_proxy()
        .filter(|_| DevProxy::should_proxy(req.route_path()));
    if let Some(proxy) = proxy {
        return proxy.forward(&req).await.into_axum_response();
    }

    if parts.method != Method::GET && parts.method != Method::HEAD {
        debug!(method = %parts.method, path = %req.route_path(), "Method not allowed");
        let request_id = state.orchestrator().request_id(&req);
        return RenderResponse::error(405, "Method not allowed")
            .with_header("Allow", "GET, HEAD")
            .with_header("X-Request-Id", &request_id)
            .into_axum_response();
    }

    let props = page_props(req.route_path());
    state
        .orchestrator()
        .render(&req, &props, &RenderOptions::default())
        .await
        .into_axum_response()
}

/// Default page props: `{"page": <first segment or "home">, "path": <path>}`.
pub fn page_props(path: &str) -> String {
    let page = path
        .split('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or("home");

    serde_json::json!({
        "page": page,
        "path": path,
    })
    .to_string()
}

/// Health check handler.
///
/// Returns 200 OK if the server is running.
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Readiness check handler.
///
/// Returns 503 once every pool slot has been retired.
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.orchestrator().pool().stats();
    let ready = stats.retired < stats.size;

    let body = serde_json::json!({
        "status": if ready { "ready" } else { "degraded" },
        "mode": state.config().resolved_mode(),
        "pool": {
            "size": stats.size,
            "available": stats.available,
            "in_use": stats.in_use,
            "retired": stats.retired,
            "recycles": stats.recycles,
            "recycle_failures": stats.recycle_failures,
        },
    });

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, axum::Json(body))
}

/// Prometheus exposition of render metrics and pool gauges.
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let orchestrator = state.orchestrator();
    let text = orchestrator.metrics().prometheus_text(&orchestrator.pool().stats());

    ([(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], text)
}

/// Live-reload probe. The body changes only when the process restarts.
pub async fn reload_probe(State(state): State<AppState>) -> Response {
    let mut response = Response::new(Body::from(state.boot_token().to_string()));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers.insert(header::CACHE_CONTROL, header::HeaderValue::from_static("no-store"));
    response
}
