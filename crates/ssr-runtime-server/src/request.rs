//! Inbound request view used by the render orchestrator.
//!
//! [`InboundRequest`] carries only what rendering needs: method, path,
//! raw query and headers. It is built from axum request parts or by hand.

use axum::http::header::{COOKIE, HeaderMap, HeaderName, HeaderValue};
use axum::http::request::Parts;
use axum_extra::extract::cookie::Cookie;

/// A request as seen by the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct InboundRequest {
    /// HTTP method.
    pub method: String,
    /// Request path without the query.
    pub path: String,
    /// Raw query string without the leading `?`.
    pub query: String,
    /// Request headers.
    pub headers: HeaderMap,
}

impl InboundRequest {
    /// Create a request. A `?` in `target` splits off the query.
    pub fn new(method: &str, target: &str) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, query),
            None => (target, ""),
        };
        Self {
            method: method.to_string(),
            path: path.to_string(),
            query: query.to_string(),
            headers: HeaderMap::new(),
        }
    }

    /// Add a header. Invalid names or values are ignored.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    /// Convert from axum request parts.
    pub fn from_parts(parts: &Parts) -> Self {
        Self {
            method: parts.method.to_string(),
            path: parts.uri.path().to_string(),
            query: parts.uri.query().unwrap_or_default().to_string(),
            headers: parts.headers.clone(),
        }
    }

    /// The path, or `/` when empty.
    pub fn route_path(&self) -> &str {
        if self.path.is_empty() { "/" } else { &self.path }
    }

    /// The path followed by `?query` when a query is present.
    pub fn path_with_query(&self) -> String {
        if self.query.is_empty() {
            self.route_path().to_string()
        } else {
            format!("{}?{}", self.route_path(), self.query)
        }
    }

    /// First value of a header, if it is valid text.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// First comma-separated token of a header, trimmed and non-empty.
    pub fn first_header_token(&self, name: &str) -> Option<&str> {
        let value = self.header(name)?;
        let token = value.split(',').next().unwrap_or_default().trim();
        (!token.is_empty()).then_some(token)
    }

    /// First non-empty value of a query parameter, percent-decoded.
    pub fn query_param(&self, name: &str) -> Option<String> {
        url::form_urlencoded::parse(self.query.as_bytes())
            .find(|(key, value)| key == name && !value.is_empty())
            .map(|(_, value)| value.into_owned())
    }

    /// All cookies in header order.
    pub fn cookies(&self) -> Vec<(String, String)> {
        self.headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(Cookie::split_parse)
            .filter_map(Result::ok)
            .map(|cookie| (cookie.name().to_string(), cookie.value().to_string()))
            .collect()
    }

    /// Value of a named cookie, if present and non-empty.
    pub fn cookie(&self, name: &str) -> Option<String> {
        self.cookies()
            .into_iter()
            .find(|(key, value)| key == name && !value.is_empty())
            .map(|(_, value)| value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    #[test]
    fn test_new_splits_query() {
        let req = InboundRequest::new("GET", "/docs?lang=fr&x=1");
        assert_eq!(req.path, "/docs");
        assert_eq!(req.query, "lang=fr&x=1");
        assert_eq!(req.path_with_query(), "/docs?lang=fr&x=1");
    }

    #[test]
    fn test_empty_path_is_root() {
        let req = InboundRequest::new("GET", "");
        assert_eq!(req.route_path(), "/");
        assert_eq!(req.path_with_query(), "/");
    }

    #[test]
    fn test_from_parts() {
        let (parts, ()) = Request::builder()
            .method("POST")
            .uri("/about?theme=dark")
            .header("X-Request-Id", "abc")
            .body(())
            .unwrap()
            .into_parts();

        let req = InboundRequest::from_parts(&parts);
        assert_eq!(req.method, "POST");
        assert_eq!(req.path, "/about");
        assert_eq!(req.query, "theme=dark");
        assert_eq!(req.header("x-request-id"), Some("abc"));
    }

    #[test]
    fn test_first_header_token() {
        let req = InboundRequest::new("GET", "/")
            .with_header("x-forwarded-host", " a.example , b.example")
            .with_header("x-empty", " , b");
        assert_eq!(req.first_header_token("x-forwarded-host"), Some("a.example"));
        assert_eq!(req.first_header_token("x-empty"), None);
        assert_eq!(req.first_header_token("missing"), None);
    }

    #[test]
    fn test_query_param_decoding() {
        let req = InboundRequest::new("GET", "/?lang=&lang=pt%2DBR&q=a+b");
        assert_eq!(req.query_param("lang").as_deref(), Some("pt-BR"));
        assert_eq!(req.query_param("q").as_deref(), Some("a b"));
        assert_eq!(req.query_param("missing"), None);
    }

    #[test]
    fn test_cookies_in_order() {
        let req = InboundRequest::new("GET", "/")
            .with_header("cookie", "b=2; a=1")
            .with_header("cookie", "c=3");

        assert_eq!(
            req.cookies(),
            vec![
                ("b".to_string(), "2".to_string()),
                ("a".to_string(), "1".to_string()),
                ("c".to_string(), "3".to_string()),
            ]
        );
        assert_eq!(req.cookie("a").as_deref(), Some("1"));
        assert_eq!(req.cookie("z"), None);
    }
}
