//! Configuration structures for the ssr-runtime.
//!
//! This module defines configuration options for each component:
//! - [`SsrConfig`]: Top-level configuration containing all sections
//! - [`RuntimeConfig`]: Bundle, pool size and timeouts
//! - [`EngineConfig`]: Wasmtime engine settings
//! - [`AssetsConfig`] and [`DevConfig`]: Asset resolution for the document shell
//! - [`I18nConfig`] and [`ThemeConfig`]: Locale and theme resolution inputs
//! - [`RequestContextConfig`]: Header and cookie exposure to the guest
//! - [`ApiBridgeConfig`]: Host bridge policy
//! - [`LoggingConfig`]: Diagnostic log lines
//!
//! Values are only parsed here. Range checks live in [`crate::validate`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level render runtime configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SsrConfig {
    /// Bundle, pool and timeout settings.
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Wasmtime engine configuration.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Asset resolution for the document shell.
    #[serde(default)]
    pub assets: AssetsConfig,

    /// Development mode settings.
    #[serde(default)]
    pub dev: DevConfig,

    /// Locale resolution settings.
    #[serde(default)]
    pub i18n: I18nConfig,

    /// Theme resolution settings.
    #[serde(default)]
    pub theme: ThemeConfig,

    /// What parts of the inbound request are exposed to the guest.
    #[serde(default)]
    pub request_context: RequestContextConfig,

    /// Host bridge policy.
    #[serde(default)]
    pub api_bridge: ApiBridgeConfig,

    /// Diagnostic logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// What the pool does when a replacement runtime cannot be built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecyclePolicy {
    /// Keep the old, possibly corrupted runtime in its slot.
    #[default]
    KeepOnFailure,
    /// Take the slot out of rotation, shrinking the effective pool size.
    Retire,
}

impl std::fmt::Display for RecyclePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecyclePolicy::KeepOnFailure => write!(f, "keep-on-failure"),
            RecyclePolicy::Retire => write!(f, "retire"),
        }
    }
}

/// Bundle, pool and timeout settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuntimeConfig {
    /// Path to the render bundle (`.wasm`, `.wat` or precompiled `.cwasm`).
    #[serde(default = "defaults::bundle_path")]
    pub bundle_path: String,

    /// Number of runtimes in the pool. `0` uses the host's available parallelism.
    #[serde(default)]
    pub pool_size: usize,

    /// How long a request may wait for a runtime. `0` waits indefinitely.
    #[serde(default)]
    pub acquire_timeout_ms: u64,

    /// Render deadline enforced by the watchdog.
    #[serde(default = "defaults::render_timeout_ms")]
    pub render_timeout_ms: u64,

    /// Behaviour when a replacement runtime cannot be built.
    #[serde(default)]
    pub recycle_policy: RecyclePolicy,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            bundle_path: defaults::bundle_path(),
            pool_size: 0,
            acquire_timeout_ms: 0,
            render_timeout_ms: defaults::render_timeout_ms(),
            recycle_policy: RecyclePolicy::default(),
        }
    }
}

impl RuntimeConfig {
    /// Get the render timeout as a `Duration`.
    pub fn render_timeout(&self) -> Duration {
        Duration::from_millis(self.render_timeout_ms)
    }

    /// Get the acquire timeout as a `Duration`.
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    /// Effective pool size: the configured value, or the host's parallelism.
    pub fn resolved_pool_size(&self) -> usize {
        if self.pool_size > 0 {
            return self.pool_size;
        }
        std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(1)
    }
}

/// Wasmtime engine configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Enable the pooling allocator.
    ///
    /// Slots are sized for twice the pool so a replacement can be built
    /// while the runtime it replaces is still alive.
    #[serde(default)]
    pub pooling_allocator: bool,

    /// Linear memory per instance slot in megabytes.
    #[serde(default = "defaults::instance_memory_mb")]
    pub instance_memory_mb: u32,

    /// Let WASI preview1 guests write to the host's stdout/stderr.
    #[serde(default = "defaults::wasi_stdio")]
    pub wasi_stdio: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pooling_allocator: false,
            instance_memory_mb: defaults::instance_memory_mb(),
            wasi_stdio: defaults::wasi_stdio(),
        }
    }
}

/// Asset resolution for the document shell.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssetsConfig {
    /// `auto`, `dev` or `prod`. `auto` follows `dev.enabled`.
    #[serde(default = "defaults::asset_mode")]
    pub mode: String,

    /// Vite-style manifest, required in production mode.
    #[serde(default = "defaults::manifest_path")]
    pub manifest_path: String,

    /// URL prefix the manifest's files are served under.
    #[serde(default = "defaults::public_prefix")]
    pub public_prefix: String,

    /// Manifest key of the client entry.
    #[serde(default = "defaults::client_manifest_entry")]
    pub client_manifest_entry: String,

    /// Explicit stylesheet path; wins over the manifest.
    #[serde(default)]
    pub css_path: Option<String>,

    /// Explicit client script path; wins over the manifest.
    #[serde(default)]
    pub client_js_path: Option<String>,

    /// Wrap fragment output in the document shell.
    #[serde(default = "defaults::enabled")]
    pub wrap_fragment: bool,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            mode: defaults::asset_mode(),
            manifest_path: defaults::manifest_path(),
            public_prefix: defaults::public_prefix(),
            client_manifest_entry: defaults::client_manifest_entry(),
            css_path: None,
            client_js_path: None,
            wrap_fragment: true,
        }
    }
}

/// Development mode settings.
///
/// Unknown keys are rejected so typos fail at start-up.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DevConfig {
    /// Enable dev mode when `assets.mode` is `auto`.
    #[serde(default)]
    pub enabled: bool,

    /// Serve dev assets from the app origin instead of the dev server origin.
    #[serde(default)]
    pub proxy_assets: Option<bool>,

    /// Inject the HMR client script.
    #[serde(default)]
    pub inject_hmr_client: Option<bool>,

    /// Origin of the frontend dev server.
    #[serde(default = "defaults::vite_origin")]
    pub vite_origin: String,

    /// Client entry module path on the dev server.
    #[serde(default = "defaults::dev_client_entry_path")]
    pub client_entry_path: String,

    /// HMR client path on the dev server.
    #[serde(default = "defaults::dev_hmr_client_path")]
    pub hmr_client_path: String,

    /// Stylesheet path on the dev server.
    #[serde(default = "defaults::dev_css_path")]
    pub css_path: String,

    /// Upstream timeout for a dev asset proxy in front of the dev server.
    #[serde(default = "defaults::proxy_timeout_sec")]
    pub proxy_timeout_sec: f64,

    /// Inject the live-reload probe script.
    #[serde(default)]
    pub auto_reload: Option<bool>,

    /// Path polled by the live-reload probe.
    #[serde(default = "defaults::reload_probe_path")]
    pub reload_probe_path: String,

    /// Live-reload poll interval.
    #[serde(default = "defaults::reload_interval_ms")]
    pub reload_interval_ms: u64,
}

impl Default for DevConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            proxy_assets: None,
            inject_hmr_client: None,
            vite_origin: defaults::vite_origin(),
            client_entry_path: defaults::dev_client_entry_path(),
            hmr_client_path: defaults::dev_hmr_client_path(),
            css_path: defaults::dev_css_path(),
            proxy_timeout_sec: defaults::proxy_timeout_sec(),
            auto_reload: None,
            reload_probe_path: defaults::reload_probe_path(),
            reload_interval_ms: defaults::reload_interval_ms(),
        }
    }
}

/// Locale resolution settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct I18nConfig {
    /// Locale used when no candidate matches. Always part of the supported set.
    #[serde(default = "defaults::default_locale")]
    pub default_locale: String,

    /// Supported locales in preference order.
    #[serde(default)]
    pub supported_locales: Vec<String>,

    /// Query parameter carrying a locale override.
    #[serde(default = "defaults::locale_query_param")]
    pub query_param: String,

    /// Cookie carrying a locale preference.
    #[serde(default = "defaults::locale_cookie_name")]
    pub cookie_name: String,

    /// Expose the candidate chain to the guest.
    #[serde(default)]
    pub include_locale_candidates: bool,
}

impl Default for I18nConfig {
    fn default() -> Self {
        Self {
            default_locale: defaults::default_locale(),
            supported_locales: Vec::new(),
            query_param: defaults::locale_query_param(),
            cookie_name: defaults::locale_cookie_name(),
            include_locale_candidates: false,
        }
    }
}

/// Theme resolution settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ThemeConfig {
    /// Theme used when no candidate matches. Always part of the supported set.
    #[serde(default = "defaults::default_theme")]
    pub default_theme: String,

    /// Supported themes in preference order.
    #[serde(default)]
    pub supported_themes: Vec<String>,

    /// Query parameter carrying a theme override.
    #[serde(default = "defaults::theme_query_param")]
    pub query_param: String,

    /// Cookie carrying a theme preference.
    #[serde(default = "defaults::theme_cookie_name")]
    pub cookie_name: String,

    /// Expose the candidate list to the guest.
    #[serde(default)]
    pub include_theme_candidates: bool,
}

impl Default for ThemeConfig {
    fn default() -> Self {
        Self {
            default_theme: defaults::default_theme(),
            supported_themes: Vec::new(),
            query_param: defaults::theme_query_param(),
            cookie_name: defaults::theme_cookie_name(),
            include_theme_candidates: false,
        }
    }
}

/// What parts of the inbound request are exposed to the guest.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RequestContextConfig {
    /// Include cookies as a `name=value; ...` string.
    #[serde(default)]
    pub include_cookies: bool,

    /// Include cookies as a map. Defaults to `include_cookies`.
    #[serde(default)]
    pub include_cookie_map: Option<bool>,

    /// Restrict exposed cookies to these names (case-insensitive).
    #[serde(default)]
    pub allowed_cookies: Vec<String>,

    /// Only expose these headers (case-insensitive). Empty means all.
    #[serde(default)]
    pub include_headers: Vec<String>,

    /// Never expose these headers, on top of the built-in sensitive set.
    #[serde(default)]
    pub exclude_headers: Vec<String>,
}

/// Host bridge policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiBridgeConfig {
    /// Enable the bridge. Defaults to dev mode.
    #[serde(default)]
    pub enabled: Option<bool>,

    /// Allowed HTTP methods (case-insensitive).
    #[serde(default = "defaults::bridge_methods")]
    pub allowed_methods: Vec<String>,

    /// Allowed path prefixes.
    #[serde(default = "defaults::bridge_path_prefixes")]
    pub allowed_path_prefixes: Vec<String>,

    /// Largest accepted request body.
    #[serde(default = "defaults::bridge_max_body_bytes")]
    pub max_body_bytes: u64,
}

impl Default for ApiBridgeConfig {
    fn default() -> Self {
        Self {
            enabled: None,
            allowed_methods: defaults::bridge_methods(),
            allowed_path_prefixes: defaults::bridge_path_prefixes(),
            max_body_bytes: defaults::bridge_max_body_bytes(),
        }
    }
}

/// Output format of the process log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Diagnostic logging settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Emit a metrics line per render.
    #[serde(default = "defaults::enabled")]
    pub render_metrics: bool,

    /// Emit a route line per request. Defaults to dev mode.
    #[serde(default)]
    pub request_routes: Option<bool>,

    /// Process log format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            render_metrics: true,
            request_routes: None,
            format: LogFormat::default(),
        }
    }
}

/// Default value functions for serde.
mod defaults {
    pub fn bundle_path() -> String {
        "./public/assets/ssr-bundle.wasm".to_string()
    }

    pub const fn render_timeout_ms() -> u64 {
        50
    }

    pub const fn instance_memory_mb() -> u32 {
        64
    }

    pub const fn wasi_stdio() -> bool {
        true
    }

    pub const fn enabled() -> bool {
        true
    }

    pub fn asset_mode() -> String {
        "auto".to_string()
    }

    pub fn manifest_path() -> String {
        "./public/assets/manifest.json".to_string()
    }

    pub fn public_prefix() -> String {
        "/assets".to_string()
    }

    pub fn client_manifest_entry() -> String {
        "src/entry-client.tsx".to_string()
    }

    pub fn vite_origin() -> String {
        "http://127.0.0.1:5174".to_string()
    }

    pub fn dev_client_entry_path() -> String {
        "/src/entry-client.tsx".to_string()
    }

    pub fn dev_hmr_client_path() -> String {
        "/@vite/client".to_string()
    }

    pub fn dev_css_path() -> String {
        "/src/styles.css".to_string()
    }

    pub const fn proxy_timeout_sec() -> f64 {
        10.0
    }

    pub fn reload_probe_path() -> String {
        "/__ssr/test".to_string()
    }

    pub const fn reload_interval_ms() -> u64 {
        1000
    }

    pub fn default_locale() -> String {
        "en".to_string()
    }

    pub fn locale_query_param() -> String {
        "lang".to_string()
    }

    pub fn locale_cookie_name() -> String {
        "ssr_lang".to_string()
    }

    pub fn default_theme() -> String {
        "ocean".to_string()
    }

    pub fn theme_query_param() -> String {
        "theme".to_string()
    }

    pub fn theme_cookie_name() -> String {
        "ssr_theme".to_string()
    }

    pub fn bridge_methods() -> Vec<String> {
        vec!["GET".to_string(), "POST".to_string()]
    }

    pub fn bridge_path_prefixes() -> Vec<String> {
        vec!["/ssr/internal/".to_string()]
    }

    pub const fn bridge_max_body_bytes() -> u64 {
        64 * 1024
    }
}
