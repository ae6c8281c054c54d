//! HTTP responses produced by the render path.
//!
//! [`RenderResponse`] is assembled by the orchestrator (status, headers and
//! body) and converted into an Axum response by the handlers.

use axum::body::Body;
use axum::http::{HeaderName, HeaderValue, Response, StatusCode};

use crate::envelope::RenderEnvelope;

const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";

/// Response assembled by the render path.
#[derive(Debug, Clone)]
pub struct RenderResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers as name/value pairs, in insertion order
    pub headers: Vec<(String, String)>,
    /// Response body
    pub body: Vec<u8>,
}

impl RenderResponse {
    /// Create a simple text response.
    pub fn text(status: u16, body: &str) -> Self {
        Self::with_content_type(status, "text/plain; charset=utf-8", body)
    }

    /// Create a JSON response.
    pub fn json(status: u16, body: &str) -> Self {
        Self::with_content_type(status, "application/json", body)
    }

    /// Create an HTML response.
    pub fn html(status: u16, body: &str) -> Self {
        Self::with_content_type(status, HTML_CONTENT_TYPE, body)
    }

    /// Create an error response with JSON body.
    pub fn error(status: u16, message: &str) -> Self {
        let body = serde_json::json!({
            "error": message
        })
        .to_string();
        Self::json(status, &body)
    }

    /// Build a response from a render envelope and the final body.
    ///
    /// Producer headers are kept as-is. `Content-Type` defaults to HTML.
    pub fn from_envelope(envelope: RenderEnvelope, body: String) -> Self {
        let mut response = Self {
            status: envelope.status,
            headers: envelope.headers,
            body: body.into_bytes(),
        };
        response.set_header_if_absent("Content-Type", HTML_CONTENT_TYPE);
        response
    }

    fn with_content_type(status: u16, content_type: &str, body: &str) -> Self {
        Self {
            status,
            headers: vec![("content-type".to_string(), content_type.to_string())],
            body: body.as_bytes().to_vec(),
        }
    }

    /// Add a header to the response.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// A header value, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Add a header unless one with the same name is already set.
    pub fn set_header_if_absent(&mut self, name: &str, value: &str) {
        if self.header(name).is_none() {
            self.headers.push((name.to_string(), value.to_string()));
        }
    }

    /// Body as text, lossily decoded.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Convert to Axum response.
    ///
    /// Headers with invalid names or values are skipped.
    pub fn into_axum_response(self) -> Response<Body> {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = status;

        let headers = response.headers_mut();
        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                headers.append(name, value);
            }
        }

        response
    }
}

impl Default for RenderResponse {
    fn default() -> Self {
        Self::text(200, "OK")
    }
}
