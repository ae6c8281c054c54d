//! Same-origin proxy to the frontend dev server.
//!
//! With `dev.proxy_assets` on, the shell references dev assets by path on the
//! app origin; requests for those paths are forwarded here.

use std::time::Duration;

use reqwest::Client;
use tracing::{debug, warn};

use crate::request::InboundRequest;
use crate::response::RenderResponse;

/// Paths forwarded as-is.
const EXACT_ROUTES: [&str; 2] = ["/@vite/client", "/@react-refresh"];

/// Path prefixes forwarded to the dev server.
const PREFIX_ROUTES: [&str; 9] = [
    "/assets/",
    "/@vite/",
    "/%40vite/",
    "/@id/",
    "/@fs/",
    "/%40id/",
    "/%40fs/",
    "/src/",
    "/node_modules/",
];

const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

const DEFAULT_PROXY_TIMEOUT: Duration = Duration::from_secs(10);

/// Forwards dev asset requests to the dev server origin.
#[derive(Debug, Clone)]
pub struct DevProxy {
    client: Client,
    origin: String,
}

impl DevProxy {
    /// Create a proxy for `origin` with a per-request timeout in seconds.
    pub fn new(origin: &str, timeout_sec: f64) -> Result<Self, reqwest::Error> {
        let timeout = Duration::try_from_secs_f64(timeout_sec).unwrap_or(DEFAULT_PROXY_TIMEOUT);
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("ssr-runtime/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            origin: origin.trim_end_matches('/').to_string(),
        })
    }

    /// Dev server origin, without a trailing `/`.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Whether `path` belongs to the dev server.
    pub fn should_proxy(path: &str) -> bool {
        EXACT_ROUTES.contains(&path) || PREFIX_ROUTES.iter().any(|prefix| path.starts_with(prefix))
    }

    /// Forward a request. Upstream failures become a 502.
    pub async fn forward(&self, req: &InboundRequest) -> RenderResponse {
        let target = format!("{}{}", self.origin, req.path_with_query());
        let method = reqwest::Method::from_bytes(req.method.as_bytes()).unwrap_or(reqwest::Method::GET);

        let mut builder = self.client.request(method, &target);
        for (name, value) in &req.headers {
            if name == "host" || HOP_BY_HOP_HEADERS.contains(&name.as_str()) {
                continue;
            }
            builder = builder.header(name, value);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(url = %target, error = %e, "Dev proxy request failed");
                return RenderResponse::text(502, "Dev server unavailable");
            }
        };

        let status = response.status().as_u16();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter(|(name, _)| {
                name.as_str() != "content-length" && !HOP_BY_HOP_HEADERS.contains(&name.as_str())
            })
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let body = match response.bytes().await {
            Ok(body) => body.to_vec(),
            Err(e) => {
                warn!(url = %target, error = %e, "Dev proxy body read failed");
                return RenderResponse::text(502, "Dev server unavailable");
            }
        };

        debug!(url = %target, status, body_size = body.len(), "Dev proxy request completed");

        RenderResponse {
            status,
            headers,
            body,
        }
    }
}
