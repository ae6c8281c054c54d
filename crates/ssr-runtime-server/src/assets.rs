//! Client asset resolution for the document shell.
//!
//! Production mode reads a Vite-style `manifest.json`; dev mode points at the
//! frontend dev server, either directly or through same-origin proxy paths.

use std::path::Path;

use serde_json::{Map, Value};
use tracing::warn;

use ssr_runtime_common::ValidatedConfig;

use crate::shell::{ReloadProbe, ShellAssets};

const DEFAULT_PUBLIC_PREFIX: &str = "/assets";
const FALLBACK_CSS_PATH: &str = "/assets/app.css";
const FALLBACK_CLIENT_JS_PATH: &str = "/assets/client.js";

/// Paths resolved from a build manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestAssets {
    /// Stylesheet, when the manifest names one.
    pub css_path: Option<String>,
    /// Client entry script.
    pub client_js_path: String,
}

/// Resolve the shell assets for the configured mode. The nonce is left unset.
pub fn resolve_shell_assets(validated: &ValidatedConfig) -> ShellAssets {
    let config = &validated.config;
    let assets = &config.assets;

    if validated.dev_mode {
        let dev = &config.dev;
        let locate = |path: &str| {
            if validated.dev_proxy_assets {
                normalize_browser_path(path)
            } else {
                join_origin_and_path(&dev.vite_origin, path)
            }
        };

        return ShellAssets {
            css_path: Some(locate(&dev.css_path)),
            client_js_path: Some(locate(&dev.client_entry_path)),
            client_js_module: true,
            hmr_client_path: validated
                .dev_inject_hmr_client
                .then(|| locate(&dev.hmr_client_path)),
            nonce: None,
            reload_probe: validated.dev_auto_reload.then(|| ReloadProbe {
                path: normalize_browser_path(&dev.reload_probe_path),
                interval_ms: dev.reload_interval_ms,
            }),
        };
    }

    let explicit = |value: &Option<String>| {
        value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(ToString::to_string)
    };
    let mut css_path = explicit(&assets.css_path);
    let mut client_js_path = explicit(&assets.client_js_path);

    if let Some(manifest) = resolve_from_manifest(
        Path::new(&assets.manifest_path),
        &assets.public_prefix,
        &assets.client_manifest_entry,
    ) {
        css_path = css_path.or(manifest.css_path);
        client_js_path = client_js_path.or(Some(manifest.client_js_path));
    }

    let css_path = css_path.unwrap_or_else(|| {
        warn!(path = FALLBACK_CSS_PATH, "Falling back to default css path");
        FALLBACK_CSS_PATH.to_string()
    });
    let client_js_path = client_js_path.unwrap_or_else(|| {
        warn!(path = FALLBACK_CLIENT_JS_PATH, "Falling back to default client path");
        FALLBACK_CLIENT_JS_PATH.to_string()
    });

    ShellAssets {
        css_path: Some(css_path),
        client_js_path: Some(client_js_path),
        ..ShellAssets::default()
    }
}

/// Read a manifest and resolve the client entry and its stylesheet.
///
/// Returns `None`, with a warning, when the file is unreadable, is not a JSON
/// object, or has no usable client entry.
pub fn resolve_from_manifest(
    path: &Path,
    public_prefix: &str,
    entry_key: &str,
) -> Option<ManifestAssets> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Asset manifest not readable");
            return None;
        }
    };
    let manifest = match serde_json::from_str::<Value>(&content) {
        Ok(Value::Object(manifest)) => manifest,
        Ok(_) => {
            warn!(path = %path.display(), "Asset manifest is not a JSON object");
            return None;
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Asset manifest parse failed");
            return None;
        }
    };

    manifest_assets(&manifest, public_prefix, entry_key)
}

/// Resolve assets from a parsed manifest.
pub fn manifest_assets(
    manifest: &Map<String, Value>,
    public_prefix: &str,
    entry_key: &str,
) -> Option<ManifestAssets> {
    let Some(entry) = find_client_entry(manifest, entry_key) else {
        warn!(entry = entry_key, "Asset manifest has no client entry");
        return None;
    };

    let client_js_path = to_public_asset_path(file_of(entry), public_prefix);
    if client_js_path.is_empty() {
        warn!(entry = entry_key, "Asset manifest client entry has no file");
        return None;
    }

    let css = first_css(entry)
        .or_else(|| {
            entry
                .get("imports")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter_map(Value::as_str)
                .filter_map(|key| manifest.get(key))
                .find_map(first_css)
        })
        .or_else(|| {
            manifest
                .get("style.css")
                .map(file_of)
                .filter(|file| !file.is_empty())
        })
        .or_else(|| {
            manifest
                .values()
                .map(file_of)
                .find(|file| file.ends_with(".css"))
        });

    Some(ManifestAssets {
        css_path: css
            .map(|file| to_public_asset_path(file, public_prefix))
            .filter(|path| !path.is_empty()),
        client_js_path,
    })
}

fn file_of(entry: &Value) -> &str {
    entry.get("file").and_then(Value::as_str).unwrap_or_default()
}

fn first_css(entry: &Value) -> Option<&str> {
    entry
        .get("css")
        .and_then(Value::as_array)
        .and_then(|css| css.first())
        .and_then(Value::as_str)
}

/// The configured entry, else an `isEntry` client-looking entry, else the first `.js` entry.
fn find_client_entry<'a>(manifest: &'a Map<String, Value>, entry_key: &str) -> Option<&'a Value> {
    if let Some(entry) = manifest.get(entry_key).filter(|e| e.is_object()) {
        return Some(entry);
    }

    let mut fallback = None;
    for (key, entry) in manifest {
        let is_entry = entry.get("isEntry").and_then(Value::as_bool).unwrap_or(false);
        let file = file_of(entry);
        if !entry.is_object() || !is_entry || file.is_empty() {
            continue;
        }
        if key.contains("entry-client") || file.contains("client") {
            return Some(entry);
        }
        if fallback.is_none() && file.ends_with(".js") {
            fallback = Some(entry);
        }
    }
    fallback
}

/// Normalize the public prefix: leading `/`, no trailing `/`, `/assets` when empty.
pub fn normalize_public_prefix(prefix: &str) -> String {
    let mut prefix = prefix.replace('\\', "/");
    if prefix.is_empty() {
        return DEFAULT_PUBLIC_PREFIX.to_string();
    }
    if !prefix.starts_with('/') {
        prefix.insert(0, '/');
    }
    while prefix.len() > 1 && prefix.ends_with('/') {
        prefix.pop();
    }
    prefix
}

/// Map a manifest file to the URL it is served under.
pub fn to_public_asset_path(file: &str, public_prefix: &str) -> String {
    let file = file.replace('\\', "/");
    let mut file = file.as_str();
    while let Some(rest) = file.strip_prefix("./") {
        file = rest;
    }

    if file.is_empty() {
        String::new()
    } else if file.starts_with('/') {
        file.to_string()
    } else if file.starts_with("assets/") {
        format!("/{file}")
    } else {
        format!("{}/{file}", normalize_public_prefix(public_prefix))
    }
}

/// Give a relative path a leading `/`. Absolute URLs pass through.
pub fn normalize_browser_path(path: &str) -> String {
    if path.is_empty() || has_http_scheme(path) || path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

/// Join an origin and a path without doubling the `/`.
pub fn join_origin_and_path(origin: &str, path: &str) -> String {
    let path = normalize_browser_path(path);
    let origin = origin.trim_end_matches('/');
    if origin.is_empty() {
        path
    } else {
        format!("{origin}{path}")
    }
}

fn has_http_scheme(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use super::*;
    use ssr_runtime_common::SsrConfig;

    fn manifest(json: &str) -> Map<String, Value> {
        match serde_json::from_str(json).unwrap() {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    fn write_manifest(json: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("ssr-assets-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("manifest.json");
        std::fs::write(&path, json).unwrap();
        path
    }

    #[test]
    fn test_public_asset_path() {
        assert_eq!(to_public_asset_path("client-abc.js", "/assets"), "/assets/client-abc.js");
        assert_eq!(to_public_asset_path("./assets/a.css", "/static"), "/assets/a.css");
        assert_eq!(to_public_asset_path("/x/y.js", "/static"), "/x/y.js");
        assert_eq!(to_public_asset_path("js\\c.js", "static/"), "/static/js/c.js");
        assert_eq!(to_public_asset_path("./", "/assets"), "");
    }

    #[test]
    fn test_normalize_public_prefix() {
        assert_eq!(normalize_public_prefix(""), "/assets");
        assert_eq!(normalize_public_prefix("static//"), "/static");
        assert_eq!(normalize_public_prefix("/"), "/");
    }

    #[test]
    fn test_browser_paths() {
        assert_eq!(normalize_browser_path("src/main.tsx"), "/src/main.tsx");
        assert_eq!(normalize_browser_path("http://h/x"), "http://h/x");
        assert_eq!(join_origin_and_path("http://127.0.0.1:5174/", "@vite/client"), "http://127.0.0.1:5174/@vite/client");
        assert_eq!(join_origin_and_path("", "/a"), "/a");
    }

    #[test]
    fn test_configured_entry_with_css() {
        let m = manifest(
            r#"{"src/entry-client.tsx":{"file":"assets/entry-client-1.js","css":["assets/entry-2.css"],"isEntry":true}}"#,
        );
        let assets = manifest_assets(&m, "/assets", "src/entry-client.tsx").unwrap();
        assert_eq!(assets.client_js_path, "/assets/entry-client-1.js");
        assert_eq!(assets.css_path.as_deref(), Some("/assets/entry-2.css"));
    }

    #[test]
    fn test_entry_discovery_and_css_from_imports() {
        let m = manifest(
            r#"{
                "_shared.js": {"file": "shared.js", "css": ["shared.css"]},
                "src/main.tsx": {"file": "main.js", "isEntry": true, "imports": ["_missing", "_shared.js"]}
            }"#,
        );
        let assets = manifest_assets(&m, "/static", "nope").unwrap();
        assert_eq!(assets.client_js_path, "/static/main.js");
        assert_eq!(assets.css_path.as_deref(), Some("/static/shared.css"));
    }

    #[test]
    fn test_client_named_entry_preferred() {
        let m = manifest(
            r#"{
                "a.tsx": {"file": "a.js", "isEntry": true},
                "b.tsx": {"file": "client-b.js", "isEntry": true},
                "style.css": {"file": "style-1.css"}
            }"#,
        );
        let assets = manifest_assets(&m, "/assets", "nope").unwrap();
        assert_eq!(assets.client_js_path, "/assets/client-b.js");
        assert_eq!(assets.css_path.as_deref(), Some("/assets/style-1.css"));
    }

    #[test]
    fn test_any_css_fallback() {
        let m = manifest(
            r#"{
                "main.tsx": {"file": "main.js", "isEntry": true},
                "theme": {"file": "theme-9.css"}
            }"#,
        );
        let assets = manifest_assets(&m, "/assets", "main.tsx").unwrap();
        assert_eq!(assets.css_path.as_deref(), Some("/assets/theme-9.css"));
    }

    #[test]
    fn test_no_entry() {
        let m = manifest(r#"{"lib.ts": {"file": "lib.js"}}"#);
        assert!(manifest_assets(&m, "/assets", "main.tsx").is_none());
    }

    #[test]
    fn test_prod_assets_from_manifest() {
        let path = write_manifest(
            r#"{"src/entry-client.tsx":{"file":"client-1.js","css":["app-1.css"],"isEntry":true}}"#,
        );
        let mut config = SsrConfig::default();
        config.assets.manifest_path = path.display().to_string();
        let assets = resolve_shell_assets(&config.validate().unwrap());

        assert_eq!(assets.css_path.as_deref(), Some("/assets/app-1.css"));
        assert_eq!(assets.client_js_path.as_deref(), Some("/assets/client-1.js"));
        assert!(!assets.client_js_module);
        assert!(assets.hmr_client_path.is_none());
        assert!(assets.reload_probe.is_none());
    }

    #[test]
    fn test_prod_explicit_paths_and_fallbacks() {
        let path = write_manifest("{}");
        let mut config = SsrConfig::default();
        config.assets.manifest_path = path.display().to_string();
        config.assets.css_path = Some("/static/site.css".into());
        let assets = resolve_shell_assets(&config.validate().unwrap());

        assert_eq!(assets.css_path.as_deref(), Some("/static/site.css"));
        assert_eq!(assets.client_js_path.as_deref(), Some("/assets/client.js"));
    }

    #[test]
    fn test_dev_proxied_assets() {
        let mut config = SsrConfig::default();
        config.dev.enabled = true;
        let assets = resolve_shell_assets(&config.validate().unwrap());

        assert_eq!(assets.css_path.as_deref(), Some("/src/styles.css"));
        assert_eq!(assets.client_js_path.as_deref(), Some("/src/entry-client.tsx"));
        assert!(assets.client_js_module);
        assert_eq!(assets.hmr_client_path.as_deref(), Some("/@vite/client"));
        assert_eq!(
            assets.reload_probe,
            Some(ReloadProbe {
                path: "/__ssr/test".into(),
                interval_ms: 1000
            })
        );
    }

    #[test]
    fn test_dev_direct_origin() {
        let mut config = SsrConfig::default();
        config.dev.enabled = true;
        config.dev.proxy_assets = Some(false);
        config.dev.inject_hmr_client = Some(false);
        config.dev.auto_reload = Some(false);
        let assets = resolve_shell_assets(&config.validate().unwrap());

        assert_eq!(assets.css_path.as_deref(), Some("http://127.0.0.1:5174/src/styles.css"));
        assert_eq!(
            assets.client_js_path.as_deref(),
            Some("http://127.0.0.1:5174/src/entry-client.tsx")
        );
        assert!(assets.hmr_client_path.is_none());
        assert!(assets.reload_probe.is_none());
    }
}
