//! Request ids, script nonces and security headers.

use std::sync::atomic::{AtomicU64, Ordering};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::request::InboundRequest;
use crate::response::RenderResponse;

/// Longest accepted inbound request id.
pub const MAX_REQUEST_ID_LEN: usize = 64;

/// Policy for responses that carry no inline scripts.
pub const STRICT_CSP: &str =
    "default-src 'self'; object-src 'none'; base-uri 'self'; frame-ancestors 'none'";

/// Policy for shell-wrapped responses whose scripts carry `nonce`.
pub fn nonce_csp(nonce: &str) -> String {
    format!(
        "default-src 'self'; script-src 'self' 'nonce-{nonce}'; \
         style-src 'self' 'unsafe-inline'; connect-src 'self'; img-src 'self' data:; \
         object-src 'none'; base-uri 'self'; frame-ancestors 'none'"
    )
}

/// A fresh 24-character script nonce.
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; 18];
    bytes[..16].copy_from_slice(uuid::Uuid::new_v4().as_bytes());
    bytes[16..].copy_from_slice(&uuid::Uuid::new_v4().as_bytes()[..2]);
    STANDARD.encode(bytes)
}

/// Keep `[A-Za-z0-9._-]`, truncate to [`MAX_REQUEST_ID_LEN`]. Empty results are `None`.
pub fn sanitize_request_id(raw: &str) -> Option<String> {
    let sanitized: String = raw
        .trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .take(MAX_REQUEST_ID_LEN)
        .collect();
    (!sanitized.is_empty()).then_some(sanitized)
}

/// Issues `ssr-<n>` ids for requests without a usable `x-request-id`.
#[derive(Debug, Default)]
pub struct RequestIds {
    issued: AtomicU64,
}

impl RequestIds {
    /// Create a generator starting at `ssr-1`.
    pub fn new() -> Self {
        Self::default()
    }

    /// The inbound id when usable, otherwise the next generated one.
    pub fn resolve(&self, req: &InboundRequest) -> String {
        req.first_header_token("x-request-id")
            .and_then(sanitize_request_id)
            .unwrap_or_else(|| self.next_id())
    }

    fn next_id(&self) -> String {
        format!("ssr-{}", self.issued.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

/// Add baseline security headers the response does not already set.
///
/// A `Content-Security-Policy` is added outside dev mode: the nonce policy
/// for shell-wrapped output, [`STRICT_CSP`] otherwise.
pub fn apply_security_headers(
    response: &mut RenderResponse,
    wrapped: bool,
    nonce: Option<&str>,
    dev_mode: bool,
) {
    response.set_header_if_absent("X-Content-Type-Options", "nosniff");
    response.set_header_if_absent("Referrer-Policy", "strict-origin-when-cross-origin");
    response.set_header_if_absent("X-Frame-Options", "DENY");

    if dev_mode || response.header("Content-Security-Policy").is_some() {
        return;
    }

    match nonce {
        Some(nonce) if wrapped => {
            response.set_header_if_absent("Content-Security-Policy", &nonce_csp(nonce));
        }
        _ => response.set_header_if_absent("Content-Security-Policy", STRICT_CSP),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nonce_shape() {
        let a = generate_nonce();
        let b = generate_nonce();
        assert_eq!(a.len(), 24);
        assert!(
            a.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '/')
        );
        assert_ne!(a, b);
    }

    #[test]
    fn test_sanitize_request_id() {
        assert_eq!(sanitize_request_id(" abc-1.2_x ").as_deref(), Some("abc-1.2_x"));
        assert_eq!(sanitize_request_id("a b<c>").as_deref(), Some("abc"));
        assert_eq!(sanitize_request_id("<>!"), None);
        assert_eq!(sanitize_request_id(&"x".repeat(100)).unwrap().len(), 64);
    }

    #[test]
    fn test_request_ids() {
        let ids = RequestIds::new();
        let plain = InboundRequest::new("GET", "/");
        assert_eq!(ids.resolve(&plain), "ssr-1");
        assert_eq!(ids.resolve(&plain), "ssr-2");

        let tagged = InboundRequest::new("GET", "/").with_header("x-request-id", "up-7, other");
        assert_eq!(ids.resolve(&tagged), "up-7");

        let junk = InboundRequest::new("GET", "/").with_header("x-request-id", "%%%");
        assert_eq!(ids.resolve(&junk), "ssr-3");
    }

    #[test]
    fn test_headers_wrapped_with_nonce() {
        let mut resp = RenderResponse::html(200, "<p/>");
        apply_security_headers(&mut resp, true, Some("n0nce"), false);

        assert_eq!(resp.header("x-content-type-options"), Some("nosniff"));
        assert_eq!(resp.header("referrer-policy"), Some("strict-origin-when-cross-origin"));
        assert_eq!(resp.header("x-frame-options"), Some("DENY"));
        assert!(
            resp.header("content-security-policy")
                .unwrap()
                .contains("'nonce-n0nce'")
        );
    }

    #[test]
    fn test_headers_unwrapped_strict() {
        let mut resp = RenderResponse::html(200, "<p/>");
        apply_security_headers(&mut resp, false, Some("n0nce"), false);
        assert_eq!(resp.header("content-security-policy"), Some(STRICT_CSP));
    }

    #[test]
    fn test_producer_headers_kept() {
        let mut resp = RenderResponse::html(200, "<p/>")
            .with_header("Content-Security-Policy", "default-src *")
            .with_header("X-Frame-Options", "SAMEORIGIN");
        apply_security_headers(&mut resp, true, Some("n"), false);

        assert_eq!(resp.header("content-security-policy"), Some("default-src *"));
        assert_eq!(resp.header("x-frame-options"), Some("SAMEORIGIN"));
    }

    #[test]
    fn test_dev_mode_skips_csp() {
        let mut resp = RenderResponse::html(200, "<p/>");
        apply_security_headers(&mut resp, true, None, true);

        assert!(resp.header("content-security-policy").is_none());
        assert_eq!(resp.header("x-content-type-options"), Some("nosniff"));
    }
}
