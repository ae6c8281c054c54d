//! The host side of the guest bridge.
//!
//! Guests call `ssr.bridge` with a JSON request. The runtime parses it and
//! hands it to a [`HostBridge`]. Whatever happens in between, the guest gets
//! a well-formed JSON response back and never observes a host fault.

use std::panic::{AssertUnwindSafe, catch_unwind};

use tracing::warn;

use ssr_runtime_common::{BridgeRequest, BridgeResponse};

/// Synchronous dispatcher for guest bridge requests.
///
/// Called on the render thread while the guest is suspended in the import,
/// so implementations must not block on the async runtime.
pub trait HostBridge: Send + Sync {
    /// Handle one request.
    fn dispatch(&self, request: BridgeRequest) -> BridgeResponse;
}

/// A bridge that answers every request with `503`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledBridge;

impl HostBridge for DisabledBridge {
    fn dispatch(&self, _request: BridgeRequest) -> BridgeResponse {
        BridgeResponse::new(503, "API bridge disabled")
    }
}

/// Parse a guest request, dispatch it, and turn every failure into a response.
///
/// Malformed JSON becomes `400`. A panicking dispatcher becomes `500`.
pub fn dispatch_json(bridge: &dyn HostBridge, request_json: &str) -> BridgeResponse {
    let request = match BridgeRequest::from_json(request_json) {
        Ok(request) => request,
        Err(e) => {
            return BridgeResponse::new(400, format!("Malformed bridge request: {e}"));
        }
    };

    let path = request.path.clone();
    match catch_unwind(AssertUnwindSafe(|| bridge.dispatch(request))) {
        Ok(response) => response,
        Err(_) => {
            warn!(path = %path, "Bridge dispatcher panicked");
            BridgeResponse::new(500, "Bridge dispatch failed")
        }
    }
}
