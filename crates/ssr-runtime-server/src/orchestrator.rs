//! Render orchestrator.
//!
//! The only path from HTTP handling to the runtime pool. One call:
//!
//! ```text
//!  request id ─► route url ─► context ─► props
//!                                          │
//!  acquire (async) ─► render (blocking thread) ─► envelope
//!                                                    │
//!  shell wrap ─► X-Request-Id ─► security headers ─► metrics + logs
//! ```
//!
//! Every failure is turned into a templated 500 error page here; nothing
//! below this layer reaches the HTTP response directly.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tracing::{error, info, instrument, warn};

use ssr_runtime_common::{RenderError, ValidatedConfig};
use ssr_runtime_core::RuntimePool;

use crate::assets::resolve_shell_assets;
use crate::context::{RequestContextBuilder, attach_to_props};
use crate::envelope::RenderEnvelope;
use crate::metrics::{RenderMetrics, Timings, micros_to_ms as ms};
use crate::request::InboundRequest;
use crate::response::RenderResponse;
use crate::security::{RequestIds, apply_security_headers, generate_nonce};
use crate::shell::{self, ShellAssets};

/// Per-call render options.
#[derive(Debug, Clone, Default)]
pub struct RenderOptions {
    /// Route URL handed to the guest instead of the request's path and query.
    pub url_override: Option<String>,
}

impl RenderOptions {
    /// Options with a route URL override.
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url_override: Some(url.into()),
        }
    }
}

// Why a render request failed.
enum Failure {
    Render { error: RenderError, recycled: bool },
    Unexpected(String),
}

impl Failure {
    fn message(&self) -> String {
        match self {
            Failure::Render { error, .. } => error.to_string(),
            Failure::Unexpected(reason) => format!("unexpected failure: {reason}"),
        }
    }
}

// Identity of one request, shared by the success and failure paths.
struct Call<'a> {
    req: &'a InboundRequest,
    route_url: &'a str,
    request_id: &'a str,
    page_id: Option<&'a str>,
    started: Instant,
}

/// Drives one render request from inbound request to HTTP response.
pub struct RenderOrchestrator {
    pool: RuntimePool,
    contexts: RequestContextBuilder,
    assets: ShellAssets,
    metrics: Arc<RenderMetrics>,
    request_ids: RequestIds,
    acquire_timeout_ms: u64,
    wrap_fragment: bool,
    dev_mode: bool,
    log_render_metrics: bool,
    log_request_routes: bool,
    warned_unwrapped: AtomicBool,
}

impl RenderOrchestrator {
    /// Create an orchestrator over `pool`.
    pub fn new(pool: RuntimePool, validated: &ValidatedConfig) -> Self {
        let config = &validated.config;
        Self {
            pool,
            contexts: RequestContextBuilder::from_config(validated),
            assets: resolve_shell_assets(validated),
            metrics: Arc::new(RenderMetrics::new()),
            request_ids: RequestIds::new(),
            acquire_timeout_ms: config.runtime.acquire_timeout_ms,
            wrap_fragment: config.assets.wrap_fragment,
            dev_mode: validated.dev_mode,
            log_render_metrics: config.logging.render_metrics,
            log_request_routes: validated.log_request_routes,
            warned_unwrapped: AtomicBool::new(false),
        }
    }

    /// The runtime pool.
    pub fn pool(&self) -> &RuntimePool {
        &self.pool
    }

    /// Render metrics.
    pub fn metrics(&self) -> &Arc<RenderMetrics> {
        &self.metrics
    }

    /// Shell assets resolved at start-up.
    pub fn assets(&self) -> &ShellAssets {
        &self.assets
    }

    /// The inbound `x-request-id` when usable, otherwise the next generated id.
    pub fn request_id(&self, req: &InboundRequest) -> String {
        self.request_ids.resolve(req)
    }

    /// Render `req` with caller-supplied props.
    ///
    /// Always produces a response; render failures become a 500 error page.
    #[instrument(skip_all, fields(method = %req.method, path = %req.route_path()))]
    pub async fn render(
        &self,
        req: &InboundRequest,
        props_json: &str,
        options: &RenderOptions,
    ) -> RenderResponse {
        let started = Instant::now();
        let request_id = self.request_ids.resolve(req);
        let route_url = options
            .url_override
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map_or_else(|| req.path_with_query(), ToString::to_string);

        let context = self.contexts.build(req, &route_url, &request_id);
        let context_json = serde_json::to_string(&context).unwrap_or_else(|_| "{}".to_string());
        let (props, page_id) = attach_to_props(props_json, &context);

        let call = Call {
            req,
            route_url: &route_url,
            request_id: &request_id,
            page_id: page_id.as_deref(),
            started,
        };

        let acquire_started = Instant::now();
        let acquired = self.pool.acquire(self.acquire_timeout_ms).await;
        let acquire_us = elapsed_us(acquire_started);

        let mut lease = match acquired {
            Ok(lease) => lease,
            Err(error) => {
                let failure = Failure::Render {
                    error,
                    recycled: false,
                };
                return self.fail(&call, &failure, acquire_us);
            }
        };

        let render_url = route_url.clone();
        let render_props = props.clone();
        let rendered = tokio::task::spawn_blocking(move || {
            let render_started = Instant::now();
            let result = lease.render(&render_url, &render_props, &context_json);
            let render_us = elapsed_us(render_started);

            let recycled = matches!(&result, Err(e) if e.is_terminal());
            if recycled {
                lease.mark_for_recycle();
            }
            // Release on this thread; a recycle rebuilds the runtime synchronously.
            drop(lease);

            (result, render_us, recycled)
        })
        .await;

        match rendered {
            Ok((Ok(output), render_us, _)) => {
                self.succeed(&call, output, &props, acquire_us, render_us)
            }
            Ok((Err(error), _, recycled)) => {
                self.fail(&call, &Failure::Render { error, recycled }, acquire_us)
            }
            Err(join_error) => {
                self.fail(&call, &Failure::Unexpected(join_error.to_string()), acquire_us)
            }
        }
    }

    fn succeed(
        &self,
        call: &Call<'_>,
        output: String,
        props: &str,
        acquire_us: u64,
        render_us: u64,
    ) -> RenderResponse {
        let envelope = RenderEnvelope::from_output(output);
        let needs_shell = envelope.needs_shell();
        let wrapped = needs_shell && self.wrap_fragment;

        if needs_shell && !self.wrap_fragment && !self.warned_unwrapped.swap(true, Ordering::Relaxed) {
            warn!("wrap_fragment is off but the render returned an HTML fragment; css and js are not injected");
        }

        let nonce = (wrapped && !self.dev_mode).then(generate_nonce);
        let wrap_started = Instant::now();
        let body = if wrapped {
            let assets = ShellAssets {
                nonce: nonce.clone(),
                ..self.assets.clone()
            };
            shell::wrap(&envelope.html, props, &assets)
        } else {
            envelope.html.clone()
        };
        let wrap_us = if wrapped { elapsed_us(wrap_started) } else { 0 };

        let mut response = RenderResponse::from_envelope(envelope, body);
        response.set_header_if_absent("X-Request-Id", call.request_id);
        apply_security_headers(&mut response, wrapped, nonce.as_deref(), self.dev_mode);

        let timings = Timings {
            acquire_us,
            render_us,
            wrap_us,
            total_us: elapsed_us(call.started),
        };
        let render_index = self.metrics.record_success(response.status, timings);
        let snapshot = self.metrics.snapshot();

        if self.log_render_metrics {
            info!(
                render_index,
                route = call.route_url,
                request_id = call.request_id,
                http_status = response.status,
                acquire_ms = ms(timings.acquire_us),
                render_ms = ms(timings.render_us),
                wrap_ms = ms(timings.wrap_us),
                pool_timeouts = snapshot.pool_timeouts,
                render_timeouts = snapshot.render_timeouts,
                recycles = snapshot.recycles,
                "render ok"
            );
        }
        if self.log_request_routes {
            info!(
                method = %call.req.method,
                route = call.route_url,
                request_id = call.request_id,
                http_status = response.status,
                page = call.page_id.unwrap_or("-"),
                total_ms = ms(timings.total_us),
                "request"
            );
        }

        response
    }

    fn fail(&self, call: &Call<'_>, failure: &Failure, acquire_us: u64) -> RenderResponse {
        const STATUS: u16 = 500;

        if let Failure::Render { error, recycled } = failure {
            if error.is_pool_exhausted() {
                self.metrics.note_pool_timeout();
            }
            if error.is_timeout() {
                self.metrics.note_render_timeout();
            }
            if *recycled {
                self.metrics.note_recycle();
            }
        }

        let timings = Timings {
            acquire_us,
            total_us: elapsed_us(call.started),
            ..Timings::default()
        };
        self.metrics.record_failure(STATUS, timings);

        let message = failure.message();
        let snapshot = self.metrics.snapshot();

        if self.log_render_metrics {
            warn!(
                route = call.route_url,
                request_id = call.request_id,
                http_status = STATUS,
                acquire_ms = ms(timings.acquire_us),
                pool_timeouts = snapshot.pool_timeouts,
                render_timeouts = snapshot.render_timeouts,
                recycles = snapshot.recycles,
                error = %message,
                "render failed"
            );
        }
        if self.log_request_routes {
            warn!(
                method = %call.req.method,
                route = call.route_url,
                request_id = call.request_id,
                http_status = STATUS,
                total_ms = ms(timings.total_us),
                error = %message,
                "request"
            );
        }
        error!(
            route = call.route_url,
            request_id = call.request_id,
            error = %message,
            "Render failed"
        );

        let mut response = RenderResponse::html(STATUS, &shell::error_page(&message))
            .with_header("X-Request-Id", call.request_id);
        apply_security_headers(&mut response, false, None, self.dev_mode);
        response
    }
}

impl std::fmt::Debug for RenderOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderOrchestrator")
            .field("pool", &self.pool)
            .field("acquire_timeout_ms", &self.acquire_timeout_ms)
            .field("wrap_fragment", &self.wrap_fragment)
            .field("dev_mode", &self.dev_mode)
            .finish_non_exhaustive()
    }
}

fn elapsed_us(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_micros()).unwrap_or(u64::MAX)
}
