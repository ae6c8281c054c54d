//! Per-request render context.
//!
//! The context is built once per render and handed to the guest twice: as
//! the third render argument and embedded in the props under `__ssr_request`.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;
use serde_json::Value;

use ssr_runtime_common::ValidatedConfig;

use crate::locale::{LocaleResolver, ThemeResolver};
use crate::request::InboundRequest;

/// Props key the request context is attached under.
pub const PROPS_CONTEXT_KEY: &str = "__ssr_request";

/// Props key holding route metadata (`pageId`).
pub const PROPS_ROUTE_KEY: &str = "__ssr_route";

/// Headers never exposed to the guest.
const ALWAYS_DROPPED_HEADERS: [&str; 5] = [
    "authorization",
    "proxy-authorization",
    "cookie",
    "set-cookie",
    "x-api-key",
];

/// Read-only context describing the request being rendered.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    pub route_url: String,
    pub request_id: String,
    pub locale: String,
    pub theme: String,
    pub theme_cookie_name: String,
    pub theme_query_param: String,
    pub theme_supported_themes: Vec<String>,
    pub route_path: String,
    pub path_with_query: String,
    pub url: String,
    pub path: String,
    pub query: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale_candidates: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub theme_candidates: Option<Vec<String>>,
    pub headers: BTreeMap<String, String>,
    pub cookies: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cookie_map: Option<BTreeMap<String, String>>,
}

/// Builds [`RequestContext`] values from inbound requests.
#[derive(Debug, Clone)]
pub struct RequestContextBuilder {
    locales: LocaleResolver,
    themes: ThemeResolver,
    locale_cookie: String,
    locale_query_param: String,
    include_locale_candidates: bool,
    theme_cookie: String,
    theme_query_param: String,
    include_theme_candidates: bool,
    include_cookies: bool,
    include_cookie_map: bool,
    allowed_cookies: HashSet<String>,
    header_allowlist: HashSet<String>,
    header_denylist: HashSet<String>,
}

impl RequestContextBuilder {
    /// Create a builder from validated configuration.
    pub fn from_config(validated: &ValidatedConfig) -> Self {
        let config = &validated.config;
        let lowercase = |values: &[String]| -> HashSet<String> {
            values
                .iter()
                .map(|v| v.trim().to_ascii_lowercase())
                .filter(|v| !v.is_empty())
                .collect()
        };

        let mut header_denylist = lowercase(&config.request_context.exclude_headers);
        header_denylist.extend(ALWAYS_DROPPED_HEADERS.iter().map(ToString::to_string));

        Self {
            locales: LocaleResolver::from_config(&config.i18n),
            themes: ThemeResolver::from_config(&config.theme),
            locale_cookie: config.i18n.cookie_name.trim().to_string(),
            locale_query_param: config.i18n.query_param.trim().to_string(),
            include_locale_candidates: config.i18n.include_locale_candidates,
            theme_cookie: config.theme.cookie_name.trim().to_string(),
            theme_query_param: config.theme.query_param.trim().to_string(),
            include_theme_candidates: config.theme.include_theme_candidates,
            include_cookies: config.request_context.include_cookies,
            include_cookie_map: validated.include_cookie_map,
            allowed_cookies: lowercase(&config.request_context.allowed_cookies),
            header_allowlist: lowercase(&config.request_context.include_headers),
            header_denylist,
        }
    }

    /// Build the context for one request.
    pub fn build(&self, req: &InboundRequest, route_url: &str, request_id: &str) -> RequestContext {
        let route_path = req.route_path().to_string();
        let path_with_query = req.path_with_query();

        let locale = self.locales.resolve(
            self.lookup_cookie(req, &self.locale_cookie).as_deref(),
            self.lookup_query(req, &self.locale_query_param).as_deref(),
            req.header("accept-language"),
        );
        let theme = self.themes.resolve(
            self.lookup_cookie(req, &self.theme_cookie).as_deref(),
            self.lookup_query(req, &self.theme_query_param).as_deref(),
        );

        let (cookies, cookie_map) = self.collect_cookies(req);

        RequestContext {
            route_url: route_url.to_string(),
            request_id: request_id.to_string(),
            locale: locale.value,
            theme: theme.value,
            theme_cookie_name: self.theme_cookie.clone(),
            theme_query_param: self.theme_query_param.clone(),
            theme_supported_themes: self.themes.supported().to_vec(),
            url: absolute_url(req, &path_with_query),
            route_path: route_path.clone(),
            path_with_query,
            path: route_path,
            query: req.query.clone(),
            method: req.method.clone(),
            locale_candidates: self.include_locale_candidates.then_some(locale.candidates),
            theme_candidates: self.include_theme_candidates.then_some(theme.candidates),
            headers: self.collect_headers(req),
            cookies,
            cookie_map,
        }
    }

    fn lookup_cookie(&self, req: &InboundRequest, name: &str) -> Option<String> {
        if name.is_empty() { None } else { req.cookie(name) }
    }

    fn lookup_query(&self, req: &InboundRequest, name: &str) -> Option<String> {
        if name.is_empty() { None } else { req.query_param(name) }
    }

    fn include_header(&self, name: &str) -> bool {
        if name.starts_with("x-forwarded-") || self.header_denylist.contains(name) {
            return false;
        }
        self.header_allowlist.is_empty() || self.header_allowlist.contains(name)
    }

    fn collect_headers(&self, req: &InboundRequest) -> BTreeMap<String, String> {
        let mut headers = BTreeMap::new();
        for (name, value) in &req.headers {
            let name = name.as_str();
            if !self.include_header(name) {
                continue;
            }
            if let Ok(value) = value.to_str() {
                headers
                    .entry(name.to_string())
                    .or_insert_with(|| value.to_string());
            }
        }
        headers
    }

    fn collect_cookies(&self, req: &InboundRequest) -> (String, Option<BTreeMap<String, String>>) {
        if !self.include_cookies && !self.include_cookie_map {
            return (String::new(), None);
        }

        let mut joined = Vec::new();
        let mut map = BTreeMap::new();
        for (name, value) in req.cookies() {
            if !self.allowed_cookies.is_empty()
                && !self.allowed_cookies.contains(&name.to_ascii_lowercase())
            {
                continue;
            }
            if self.include_cookies {
                joined.push(format!("{name}={value}"));
            }
            if self.include_cookie_map {
                map.insert(name, value);
            }
        }

        let mut cookies = joined.join("; ");
        if self.include_cookies && cookies.is_empty() && self.allowed_cookies.is_empty() {
            cookies = req.header("cookie").unwrap_or_default().to_string();
        }
        if !self.include_cookies {
            cookies.clear();
        }

        (cookies, self.include_cookie_map.then_some(map))
    }
}

fn absolute_url(req: &InboundRequest, path_with_query: &str) -> String {
    let host = req
        .first_header_token("x-forwarded-host")
        .or_else(|| req.first_header_token("host"));
    let Some(host) = host else {
        return path_with_query.to_string();
    };

    let proto = match req.first_header_token("x-forwarded-proto") {
        Some(p) if p.eq_ignore_ascii_case("https") => "https",
        _ => "http",
    };
    format!("{proto}://{host}{path_with_query}")
}

/// Attach the context to the props when they are a JSON object.
///
/// Returns the props to render and the page id found under
/// `__ssr_route.pageId` or `page`. Props that are not an object pass through
/// unchanged.
pub fn attach_to_props(props_json: &str, context: &RequestContext) -> (String, Option<String>) {
    let Ok(Value::Object(mut props)) = serde_json::from_str::<Value>(props_json) else {
        return (props_json.to_string(), None);
    };

    let page_id = props
        .get(PROPS_ROUTE_KEY)
        .and_then(|route| route.get("pageId"))
        .and_then(Value::as_str)
        .or_else(|| props.get("page").and_then(Value::as_str))
        .map(ToString::to_string);

    match serde_json::to_value(context) {
        Ok(value) => {
            props.insert(PROPS_CONTEXT_KEY.to_string(), value);
            (Value::Object(props).to_string(), page_id)
        }
        Err(_) => (props_json.to_string(), page_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ssr_runtime_common::SsrConfig;

    fn validated(edit: impl FnOnce(&mut SsrConfig)) -> ValidatedConfig {
        let mut config = SsrConfig::default();
        config.assets.mode = "dev".to_string();
        config.i18n.supported_locales = vec!["en".into(), "fr".into()];
        edit(&mut config);
        config.validate().unwrap()
    }

    fn build(edit: impl FnOnce(&mut SsrConfig), req: &InboundRequest) -> RequestContext {
        RequestContextBuilder::from_config(&validated(edit)).build(req, &req.path_with_query(), "req-1")
    }

    #[test]
    fn test_basic_fields() {
        let req = InboundRequest::new("GET", "/docs?x=1").with_header("host", "example.com");
        let ctx = build(|_| {}, &req);

        assert_eq!(ctx.route_url, "/docs?x=1");
        assert_eq!(ctx.request_id, "req-1");
        assert_eq!(ctx.route_path, "/docs");
        assert_eq!(ctx.path, "/docs");
        assert_eq!(ctx.query, "x=1");
        assert_eq!(ctx.method, "GET");
        assert_eq!(ctx.url, "http://example.com/docs?x=1");
        assert_eq!(ctx.locale, "en");
        assert_eq!(ctx.theme, "ocean");
        assert_eq!(ctx.theme_supported_themes, vec!["ocean"]);
        assert!(ctx.locale_candidates.is_none());
        assert!(ctx.cookie_map.is_none());
        assert_eq!(ctx.cookies, "");
    }

    #[test]
    fn test_forwarded_url() {
        let req = InboundRequest::new("GET", "/a")
            .with_header("host", "internal:8080")
            .with_header("x-forwarded-host", "public.example, proxy")
            .with_header("x-forwarded-proto", "HTTPS");
        assert_eq!(build(|_| {}, &req).url, "https://public.example/a");

        let req = InboundRequest::new("GET", "/a")
            .with_header("host", "h")
            .with_header("x-forwarded-proto", "gopher");
        assert_eq!(build(|_| {}, &req).url, "http://h/a");

        let req = InboundRequest::new("GET", "/a");
        assert_eq!(build(|_| {}, &req).url, "/a");
    }

    #[test]
    fn test_locale_sources() {
        let req = InboundRequest::new("GET", "/?lang=fr");
        assert_eq!(build(|_| {}, &req).locale, "fr");

        let req = InboundRequest::new("GET", "/").with_header("cookie", "ssr_lang=fr_CA");
        let ctx = build(|c| c.i18n.include_locale_candidates = true, &req);
        assert_eq!(ctx.locale, "fr");
        assert_eq!(ctx.locale_candidates.unwrap(), vec!["fr-ca", "fr", "en"]);
    }

    #[test]
    fn test_theme_sources() {
        let req = InboundRequest::new("GET", "/?theme=Forest");
        let ctx = build(
            |c| {
                c.theme.supported_themes = vec!["forest".into()];
                c.theme.include_theme_candidates = true;
            },
            &req,
        );
        assert_eq!(ctx.theme, "forest");
        assert_eq!(ctx.theme_candidates.unwrap(), vec!["forest", "ocean"]);
        assert_eq!(ctx.theme_supported_themes, vec!["forest", "ocean"]);
    }

    #[test]
    fn test_sensitive_headers_dropped() {
        let req = InboundRequest::new("GET", "/")
            .with_header("authorization", "Bearer x")
            .with_header("proxy-authorization", "x")
            .with_header("cookie", "a=1")
            .with_header("x-api-key", "k")
            .with_header("x-forwarded-for", "1.2.3.4")
            .with_header("accept", "text/html")
            .with_header("x-trace", "t");
        let ctx = build(|_| {}, &req);

        assert_eq!(ctx.headers.len(), 2);
        assert_eq!(ctx.headers["accept"], "text/html");
        assert_eq!(ctx.headers["x-trace"], "t");
    }

    #[test]
    fn test_sensitive_headers_dropped_even_when_allowed() {
        let req = InboundRequest::new("GET", "/")
            .with_header("authorization", "Bearer x")
            .with_header("accept", "text/html")
            .with_header("user-agent", "test");
        let ctx = build(
            |c| c.request_context.include_headers = vec!["Authorization".into(), "Accept".into()],
            &req,
        );

        assert_eq!(ctx.headers.keys().collect::<Vec<_>>(), vec!["accept"]);
    }

    #[test]
    fn test_header_denylist() {
        let req = InboundRequest::new("GET", "/")
            .with_header("accept", "text/html")
            .with_header("user-agent", "test");
        let ctx = build(|c| c.request_context.exclude_headers = vec!["User-Agent".into()], &req);

        assert_eq!(ctx.headers.keys().collect::<Vec<_>>(), vec!["accept"]);
    }

    #[test]
    fn test_cookies_included() {
        let req = InboundRequest::new("GET", "/").with_header("cookie", "b=2; a=1");
        let ctx = build(|c| c.request_context.include_cookies = true, &req);

        assert_eq!(ctx.cookies, "b=2; a=1");
        let map = ctx.cookie_map.unwrap();
        assert_eq!(map["a"], "1");
        assert_eq!(map["b"], "2");
    }

    #[test]
    fn test_cookie_allowlist() {
        let req = InboundRequest::new("GET", "/").with_header("cookie", "session=s; Theme=dark");
        let ctx = build(
            |c| {
                c.request_context.include_cookies = true;
                c.request_context.include_cookie_map = Some(false);
                c.request_context.allowed_cookies = vec!["theme".into()];
            },
            &req,
        );

        assert_eq!(ctx.cookies, "Theme=dark");
        assert!(ctx.cookie_map.is_none());
    }

    #[test]
    fn test_cookie_map_only() {
        let req = InboundRequest::new("GET", "/").with_header("cookie", "a=1");
        let ctx = build(|c| c.request_context.include_cookie_map = Some(true), &req);

        assert_eq!(ctx.cookies, "");
        assert_eq!(ctx.cookie_map.unwrap()["a"], "1");
    }

    #[test]
    fn test_serialized_shape() {
        let req = InboundRequest::new("GET", "/");
        let value = serde_json::to_value(build(|_| {}, &req)).unwrap();

        assert_eq!(value["routeUrl"], "/");
        assert_eq!(value["themeCookieName"], "ssr_theme");
        assert_eq!(value["pathWithQuery"], "/");
        assert!(value.get("localeCandidates").is_none());
        assert!(value.get("cookieMap").is_none());
    }

    #[test]
    fn test_attach_to_props() {
        let req = InboundRequest::new("GET", "/");
        let ctx = build(|_| {}, &req);

        let (props, page) = attach_to_props(r#"{"page":"home","n":1}"#, &ctx);
        let value: Value = serde_json::from_str(&props).unwrap();
        assert_eq!(page.as_deref(), Some("home"));
        assert_eq!(value["n"], 1);
        assert_eq!(value["__ssr_request"]["requestId"], "req-1");

        let (_, page) = attach_to_props(r#"{"__ssr_route":{"pageId":"about"},"page":"x"}"#, &ctx);
        assert_eq!(page.as_deref(), Some("about"));

        let (props, page) = attach_to_props("[1,2]", &ctx);
        assert_eq!(props, "[1,2]");
        assert!(page.is_none());
    }
}
