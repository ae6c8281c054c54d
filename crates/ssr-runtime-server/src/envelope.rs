//! Render result envelope.
//!
//! A render returns either bare HTML or a JSON object
//! `{html, status?, headers?, redirect?}`. Both normalize to [`RenderEnvelope`].

use serde_json::Value;

/// Normalized render output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderEnvelope {
    /// Body HTML.
    pub html: String,
    /// HTTP status, within `100..=599`.
    pub status: u16,
    /// Headers set by the render producer.
    pub headers: Vec<(String, String)>,
}

impl RenderEnvelope {
    /// Bare HTML with status 200.
    pub fn bare(html: impl Into<String>) -> Self {
        Self {
            html: html.into(),
            status: 200,
            headers: Vec::new(),
        }
    }

    /// Normalize raw render output.
    pub fn from_output(raw: String) -> Self {
        Self::parse(&raw).unwrap_or_else(|| Self::bare(raw))
    }

    /// Parse an envelope object.
    ///
    /// Returns `None` unless the output starts with `{`, parses as a JSON
    /// object and has an `html` member.
    pub fn parse(raw: &str) -> Option<Self> {
        if !raw.trim_start().starts_with('{') {
            return None;
        }
        let Ok(Value::Object(payload)) = serde_json::from_str::<Value>(raw) else {
            return None;
        };
        let html = payload.get("html")?;

        let mut envelope = Self {
            html: html.as_str().unwrap_or_default().to_string(),
            status: payload
                .get("status")
                .and_then(status_code)
                .and_then(|s| u16::try_from(s).ok())
                .filter(|s| (100..=599).contains(s))
                .unwrap_or(200),
            headers: Vec::new(),
        };

        if let Some(Value::Object(headers)) = payload.get("headers") {
            for (name, value) in headers {
                let value = match value {
                    Value::String(s) => s.clone(),
                    Value::Bool(b) => b.to_string(),
                    Value::Number(n) => n.to_string(),
                    _ => continue,
                };
                envelope.headers.push((name.clone(), value));
            }
        }

        let redirect = payload
            .get("redirect")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|target| !target.is_empty());
        if let Some(target) = redirect {
            envelope.headers.retain(|(name, _)| !name.eq_ignore_ascii_case("location"));
            envelope.headers.push(("Location".to_string(), target.to_string()));
            if !is_redirect_status(envelope.status) {
                envelope.status = 302;
            }
        } else if envelope.header("location").is_some() && !is_redirect_status(envelope.status) {
            envelope.status = 302;
        }

        Some(envelope)
    }

    /// A header value, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// A 3xx status with a `Location` header.
    pub fn is_redirect(&self) -> bool {
        is_redirect_status(self.status) && self.header("location").is_some()
    }

    /// Whether the HTML should get the document shell.
    pub fn needs_shell(&self) -> bool {
        !self.is_redirect() && !self.html.is_empty() && !looks_like_full_document(&self.html)
    }
}

// Integers, or floats with no fractional part.
#[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
fn status_code(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.fract() == 0.0 && (0.0..=999.0).contains(f))
            .map(|f| f as i64)
    })
}

fn is_redirect_status(status: u16) -> bool {
    (300..=399).contains(&status)
}

/// Whether HTML already carries top-level document markers.
pub fn looks_like_full_document(html: &str) -> bool {
    html.contains("<html") || html.contains("<!doctype") || html.contains("<!DOCTYPE")
}
