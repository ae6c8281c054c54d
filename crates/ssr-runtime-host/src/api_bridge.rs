//! Policy-checked dispatch of guest bridge requests.
//!
//! [`ApiBridge`] is the production [`HostBridge`]. Requests are checked in a
//! fixed order and the first failed check decides the status:
//!
//! | check                          | status |
//! |--------------------------------|--------|
//! | bridge disabled                | 503    |
//! | no handler installed           | 404    |
//! | method not allowed             | 405    |
//! | path outside allowed prefixes  | 403    |
//! | body over `max_body_bytes`     | 413    |
//! | handler panicked               | 500    |

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tracing::{debug, warn};

use ssr_runtime_common::{ApiBridgeConfig, BridgeRequest, BridgeResponse};
use ssr_runtime_core::HostBridge;

use crate::policy::BridgePolicy;

/// A request handler behind the bridge.
pub type BridgeHandler = Arc<dyn Fn(&BridgeRequest) -> BridgeResponse + Send + Sync>;

/// The policy-enforcing bridge dispatcher.
#[derive(Clone)]
pub struct ApiBridge {
    policy: BridgePolicy,
    handler: Option<BridgeHandler>,
}

impl ApiBridge {
    /// Create a bridge with an optional handler.
    pub fn new(policy: BridgePolicy, handler: Option<BridgeHandler>) -> Self {
        Self { policy, handler }
    }

    /// Create a bridge serving the built-in internal endpoints.
    pub fn with_default_handler(policy: BridgePolicy) -> Self {
        Self::new(policy, Some(Arc::new(default_handler)))
    }

    /// Create a bridge from configuration with the built-in handler.
    pub fn from_config(config: &ApiBridgeConfig, enabled: bool) -> Self {
        Self::with_default_handler(BridgePolicy::from_config(config, enabled))
    }

    /// The active policy.
    pub fn policy(&self) -> &BridgePolicy {
        &self.policy
    }
}

impl HostBridge for ApiBridge {
    fn dispatch(&self, mut request: BridgeRequest) -> BridgeResponse {
        if !self.policy.enabled {
            return BridgeResponse::new(503, "API bridge disabled");
        }

        let Some(handler) = self.handler.as_ref() else {
            return BridgeResponse::new(404, "No API bridge handler installed");
        };

        request.method = BridgePolicy::normalize_method(&request.method);
        if !self.policy.is_method_allowed(&request.method) {
            return BridgeResponse::new(405, format!("Method {} not allowed", request.method));
        }

        let Some(path) = self.policy.allowed_path(&request.path) else {
            return BridgeResponse::new(403, format!("Path {} not allowed", request.path));
        };
        request.path = path;

        if !self.policy.is_body_allowed(request.body.len()) {
            return BridgeResponse::new(413, "Request body too large");
        }

        debug!(method = %request.method, path = %request.path, "Bridge request");

        match catch_unwind(AssertUnwindSafe(|| handler(&request))) {
            Ok(response) => response,
            Err(_) => {
                warn!(method = %request.method, path = %request.path, "Bridge handler panicked");
                BridgeResponse::new(500, "API bridge handler failed")
            }
        }
    }
}

impl std::fmt::Debug for ApiBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiBridge")
            .field("policy", &self.policy)
            .field("has_handler", &self.handler.is_some())
            .finish()
    }
}

/// Built-in handler for the internal endpoints.
///
/// - `/ssr/internal/health` answers `ok`
/// - `/ssr/internal/echo` echoes the request body
pub fn default_handler(request: &BridgeRequest) -> BridgeResponse {
    match request.path.as_str() {
        "/ssr/internal/health" => BridgeResponse::ok("ok").with_header("content-type", "text/plain"),
        "/ssr/internal/echo" => BridgeResponse::ok(request.body.clone()),
        other => BridgeResponse::new(404, format!("No internal handler for {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled_policy() -> BridgePolicy {
        BridgePolicy::from_config(&ApiBridgeConfig::default(), true)
    }

    fn request(method: &str, path: &str) -> BridgeRequest {
        BridgeRequest::new(method, path)
    }

    #[test]
    fn test_disabled() {
        let bridge = ApiBridge::with_default_handler(BridgePolicy::disabled());
        let resp = bridge.dispatch(request("GET", "/ssr/internal/health"));
        assert_eq!(resp.status, 503);
        assert_eq!(resp.body, "API bridge disabled");
    }

    #[test]
    fn test_no_handler() {
        let bridge = ApiBridge::new(enabled_policy(), None);
        assert_eq!(bridge.dispatch(request("GET", "/ssr/internal/health")).status, 404);
    }

    #[test]
    fn test_method_not_allowed() {
        let bridge = ApiBridge::with_default_handler(enabled_policy());
        assert_eq!(bridge.dispatch(request("DELETE", "/ssr/internal/health")).status, 405);
    }

    #[test]
    fn test_empty_method_is_get() {
        let bridge = ApiBridge::with_default_handler(enabled_policy());
        let resp = bridge.dispatch(request("", "/ssr/internal/health"));
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, "ok");
    }

    #[test]
    fn test_path_not_allowed() {
        let bridge = ApiBridge::with_default_handler(enabled_policy());
        assert_eq!(bridge.dispatch(request("GET", "/admin/users")).status, 403);
        assert_eq!(bridge.dispatch(request("GET", "//x/ssr/internal/health")).status, 403);
    }

    #[test]
    fn test_handler_sees_normalized_path() {
        let bridge = ApiBridge::with_default_handler(enabled_policy());
        let resp = bridge.dispatch(request("GET", "/ssr/./internal/health"));
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, "ok");
    }

    #[test]
    fn test_body_too_large() {
        let config = ApiBridgeConfig {
            max_body_bytes: 4,
            ..Default::default()
        };
        let bridge = ApiBridge::from_config(&config, true);
        let resp = bridge.dispatch(request("POST", "/ssr/internal/echo").with_body("12345"));
        assert_eq!(resp.status, 413);

        let resp = bridge.dispatch(request("POST", "/ssr/internal/echo").with_body("1234"));
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, "1234");
    }

    #[test]
    fn test_check_order() {
        // Disabled wins over every other failure
        let bridge = ApiBridge::new(BridgePolicy::disabled(), None);
        assert_eq!(bridge.dispatch(request("DELETE", "/admin")).status, 503);

        // Method is checked before path
        let bridge = ApiBridge::with_default_handler(enabled_policy());
        assert_eq!(bridge.dispatch(request("DELETE", "/admin")).status, 405);
    }

    #[test]
    fn test_handler_panic() {
        let handler: BridgeHandler = Arc::new(|_req: &BridgeRequest| -> BridgeResponse {
            panic!("handler bug")
        });
        let bridge = ApiBridge::new(enabled_policy(), Some(handler));
        let resp = bridge.dispatch(request("GET", "/ssr/internal/health"));
        assert_eq!(resp.status, 500);
    }

    #[test]
    fn test_default_handler_unknown_path() {
        let resp = default_handler(&request("GET", "/ssr/internal/missing"));
        assert_eq!(resp.status, 404);
        assert_eq!(resp.body, "No internal handler for /ssr/internal/missing");
    }
}
