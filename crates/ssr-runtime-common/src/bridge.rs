//! Host bridge wire types.
//!
//! The guest sends a JSON [`BridgeRequest`] through the `ssr.bridge` import
//! and receives a JSON [`BridgeResponse`] back. Parsing is lenient: missing
//! fields take defaults and non-string bodies are re-encoded as compact JSON.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// A request issued by guest code to the host.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BridgeRequest {
    /// HTTP method. Missing or null means `GET`.
    #[serde(default = "default_method", deserialize_with = "method_from_value")]
    pub method: String,

    /// Request path (e.g. `/ssr/internal/health`).
    #[serde(default, deserialize_with = "string_from_value")]
    pub path: String,

    /// Raw query string without the leading `?`.
    #[serde(default, deserialize_with = "string_from_value")]
    pub query: String,

    /// Request body. Objects and arrays are carried as compact JSON.
    #[serde(default, deserialize_with = "string_from_value")]
    pub body: String,

    /// Request headers.
    #[serde(default, deserialize_with = "headers_from_value")]
    pub headers: BTreeMap<String, String>,
}

impl Default for BridgeRequest {
    fn default() -> Self {
        Self {
            method: default_method(),
            path: String::new(),
            query: String::new(),
            body: String::new(),
            headers: BTreeMap::new(),
        }
    }
}

impl BridgeRequest {
    /// Create a request for the given method and path.
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Self::default()
        }
    }

    /// Set the request body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Parse a request from the JSON text written by the guest.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// The host's answer to a [`BridgeRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BridgeResponse {
    /// HTTP status code.
    pub status: u16,

    /// Response body.
    #[serde(default)]
    pub body: String,

    /// Response headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl BridgeResponse {
    /// Create a response with the given status and body.
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            headers: BTreeMap::new(),
        }
    }

    /// Create a `200 OK` response.
    pub fn ok(body: impl Into<String>) -> Self {
        Self::new(200, body)
    }

    /// Add a header to the response.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Serialize to the JSON text handed back to the guest.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"status":500,"body":"bridge response serialization failed","headers":{}}"#
                .to_string()
        })
    }
}

fn default_method() -> String {
    "GET".to_string()
}

fn method_from_value<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Null => default_method(),
        other => value_to_string(other),
    })
}

fn string_from_value<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value_to_string(value))
}

fn headers_from_value<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let Value::Object(map) = value else {
        return Ok(BTreeMap::new());
    };

    Ok(map
        .into_iter()
        .filter_map(|(name, value)| match value {
            Value::String(s) => Some((name, s)),
            Value::Bool(_) | Value::Number(_) => Some((name, value.to_string())),
            _ => None,
        })
        .collect())
}

fn value_to_string(value: Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_defaults() {
        let req = BridgeRequest::from_json(r#"{"path":"/ssr/internal/health"}"#).unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/ssr/internal/health");
        assert!(req.query.is_empty());
        assert!(req.body.is_empty());
        assert!(req.headers.is_empty());
    }

    #[test]
    fn test_parse_object_body_as_compact_json() {
        let req = BridgeRequest::from_json(
            r#"{"method":"post","path":"/x","body":{"a": 1, "b": [true]}}"#,
        )
        .unwrap();
        assert_eq!(req.method, "post");
        assert_eq!(req.body, r#"{"a":1,"b":[true]}"#);
    }

    #[test]
    fn test_parse_headers_lenient() {
        let req = BridgeRequest::from_json(
            r#"{"headers":{"x-a":"1","x-b":2,"x-c":true,"x-d":{"nested":1},"x-e":null}}"#,
        )
        .unwrap();
        assert_eq!(req.headers.get("x-a").map(String::as_str), Some("1"));
        assert_eq!(req.headers.get("x-b").map(String::as_str), Some("2"));
        assert_eq!(req.headers.get("x-c").map(String::as_str), Some("true"));
        assert!(!req.headers.contains_key("x-d"));
        assert!(!req.headers.contains_key("x-e"));
    }

    #[test]
    fn test_null_method_defaults_to_get() {
        let req = BridgeRequest::from_json(r#"{"method":null,"path":"/"}"#).unwrap();
        assert_eq!(req.method, "GET");
    }

    #[test]
    fn test_parse_invalid_json() {
        assert!(BridgeRequest::from_json("not json").is_err());
    }

    #[test]
    fn test_response_json() {
        let resp = BridgeResponse::ok("hi").with_header("x-k", "v");
        let json: Value = serde_json::from_str(&resp.to_json()).unwrap();
        assert_eq!(json["status"], 200);
        assert_eq!(json["body"], "hi");
        assert_eq!(json["headers"]["x-k"], "v");
    }
}
