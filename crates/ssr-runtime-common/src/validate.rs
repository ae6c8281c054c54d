//! Start-up validation of [`SsrConfig`].
//!
//! [`SsrConfig::validate`] checks ranges, resolves the asset mode and the
//! mode-dependent defaults, and returns a [`ValidatedConfig`]. Nothing is
//! constructed from a config that has not passed through here.

use std::path::Path;

use crate::config::SsrConfig;
use crate::error::ConfigError;

const MAX_ACQUIRE_TIMEOUT_MS: u64 = 300_000;
const MAX_RENDER_TIMEOUT_MS: u64 = 120_000;
const MAX_BRIDGE_BODY_BYTES: u64 = 16 * 1024 * 1024;
const MAX_POOL_SIZE: usize = 1024;
const MAX_PROXY_TIMEOUT_SEC: f64 = 300.0;
const MAX_RELOAD_INTERVAL_MS: u64 = 600_000;

/// Asset mode as written in the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetMode {
    /// Follow `dev.enabled`.
    Auto,
    /// Serve assets from the dev server.
    Dev,
    /// Serve assets from the build manifest.
    Prod,
}

impl AssetMode {
    /// Parse a mode string. Surrounding whitespace and case are ignored; empty means `auto`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Some(Self::Auto),
            "dev" => Some(Self::Dev),
            "prod" => Some(Self::Prod),
            _ => None,
        }
    }

    /// Canonical name of the mode.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Dev => "dev",
            Self::Prod => "prod",
        }
    }
}

impl std::fmt::Display for AssetMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configuration that passed validation, with every mode-dependent default resolved.
#[derive(Debug, Clone)]
pub struct ValidatedConfig {
    /// The validated configuration.
    pub config: SsrConfig,
    /// Mode as configured.
    pub configured_mode: AssetMode,
    /// Effective mode after resolving `auto`.
    pub dev_mode: bool,
    /// Effective pool size.
    pub pool_size: usize,
    /// Host bridge enabled.
    pub api_bridge_enabled: bool,
    /// Per-request route logging enabled.
    pub log_request_routes: bool,
    /// Dev assets served from the app origin.
    pub dev_proxy_assets: bool,
    /// HMR client injected into the shell.
    pub dev_inject_hmr_client: bool,
    /// Live-reload probe injected into the shell.
    pub dev_auto_reload: bool,
    /// Cookie map exposed in the request context.
    pub include_cookie_map: bool,
}

impl ValidatedConfig {
    /// Name of the effective asset mode.
    pub fn resolved_mode(&self) -> &'static str {
        if self.dev_mode { "dev" } else { "prod" }
    }

    /// One-line description logged at start-up.
    pub fn summary(&self) -> String {
        let runtime = &self.config.runtime;
        let assets = &self.config.assets;
        let dev = &self.config.dev;
        format!(
            "runtime{{bundle={}, pool_size={}, recycle={}, timeout_ms{{acquire={}, render={}}}}} \
             | assets{{mode={}, configured={}, manifest={}}} \
             | dev{{enabled={}, origin={}, proxy_assets={}}}",
            runtime.bundle_path,
            self.pool_size,
            runtime.recycle_policy,
            runtime.acquire_timeout_ms,
            runtime.render_timeout_ms,
            self.resolved_mode(),
            self.configured_mode,
            assets.manifest_path,
            on_off(self.dev_mode),
            dev.vite_origin,
            on_off(self.dev_proxy_assets),
        )
    }
}

fn on_off(value: bool) -> &'static str {
    if value { "on" } else { "off" }
}

impl SsrConfig {
    /// Validate the configuration and resolve mode-dependent defaults.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found. In production mode the asset
    /// manifest is read and must parse as a JSON object.
    pub fn validate(&self) -> Result<ValidatedConfig, ConfigError> {
        let runtime = &self.runtime;

        if runtime.acquire_timeout_ms > MAX_ACQUIRE_TIMEOUT_MS {
            return Err(ConfigError::invalid(
                "runtime.acquire_timeout_ms",
                format!("must be <= {MAX_ACQUIRE_TIMEOUT_MS}"),
            ));
        }
        if runtime.render_timeout_ms == 0 || runtime.render_timeout_ms > MAX_RENDER_TIMEOUT_MS {
            return Err(ConfigError::invalid(
                "runtime.render_timeout_ms",
                format!("must be in range 1..{MAX_RENDER_TIMEOUT_MS}"),
            ));
        }
        if runtime.pool_size > MAX_POOL_SIZE {
            return Err(ConfigError::invalid(
                "runtime.pool_size",
                format!("must be <= {MAX_POOL_SIZE}"),
            ));
        }
        if runtime.bundle_path.trim().is_empty() {
            return Err(ConfigError::invalid("runtime.bundle_path", "must not be empty"));
        }

        let configured_mode = AssetMode::parse(&self.assets.mode).ok_or_else(|| {
            ConfigError::invalid("assets.mode", "must be one of: auto|dev|prod")
        })?;
        let dev_mode = match configured_mode {
            AssetMode::Auto => self.dev.enabled,
            AssetMode::Dev => true,
            AssetMode::Prod => false,
        };

        let bridge = &self.api_bridge;
        if bridge.max_body_bytes == 0 || bridge.max_body_bytes > MAX_BRIDGE_BODY_BYTES {
            return Err(ConfigError::invalid(
                "api_bridge.max_body_bytes",
                format!("must be in range 1..{MAX_BRIDGE_BODY_BYTES}"),
            ));
        }

        let dev_inject_hmr_client = self.dev.inject_hmr_client.unwrap_or(dev_mode);
        let dev_auto_reload = self.dev.auto_reload.unwrap_or(dev_mode);
        if dev_mode {
            self.validate_dev(dev_inject_hmr_client, dev_auto_reload)?;
        } else {
            validate_manifest(&self.assets.manifest_path)?;
        }

        Ok(ValidatedConfig {
            config: self.clone(),
            configured_mode,
            dev_mode,
            pool_size: runtime.resolved_pool_size(),
            api_bridge_enabled: bridge.enabled.unwrap_or(dev_mode),
            log_request_routes: self.logging.request_routes.unwrap_or(dev_mode),
            dev_proxy_assets: self.dev.proxy_assets.unwrap_or(dev_mode),
            dev_inject_hmr_client,
            dev_auto_reload,
            include_cookie_map: self
                .request_context
                .include_cookie_map
                .unwrap_or(self.request_context.include_cookies),
        })
    }

    fn validate_dev(&self, inject_hmr_client: bool, auto_reload: bool) -> Result<(), ConfigError> {
        let dev = &self.dev;
        let origin = dev.vite_origin.trim();
        if !origin.starts_with("http://") && !origin.starts_with("https://") {
            return Err(ConfigError::invalid(
                "dev.vite_origin",
                "must start with http:// or https://",
            ));
        }
        if dev.client_entry_path.trim().is_empty() {
            return Err(ConfigError::invalid("dev.client_entry_path", "must not be empty"));
        }
        if dev.css_path.trim().is_empty() {
            return Err(ConfigError::invalid("dev.css_path", "must not be empty"));
        }
        if inject_hmr_client && dev.hmr_client_path.trim().is_empty() {
            return Err(ConfigError::invalid(
                "dev.hmr_client_path",
                "must not be empty when HMR injection is enabled",
            ));
        }
        if !(dev.proxy_timeout_sec > 0.0 && dev.proxy_timeout_sec <= MAX_PROXY_TIMEOUT_SEC) {
            return Err(ConfigError::invalid(
                "dev.proxy_timeout_sec",
                format!("must be in range (0, {MAX_PROXY_TIMEOUT_SEC}]"),
            ));
        }
        if auto_reload && !dev.reload_probe_path.starts_with('/') {
            return Err(ConfigError::invalid(
                "dev.reload_probe_path",
                "must start with '/' when auto reload is enabled",
            ));
        }
        if dev.reload_interval_ms == 0 || dev.reload_interval_ms > MAX_RELOAD_INTERVAL_MS {
            return Err(ConfigError::invalid(
                "dev.reload_interval_ms",
                format!("must be in range 1..{MAX_RELOAD_INTERVAL_MS}"),
            ));
        }
        Ok(())
    }
}

fn validate_manifest(path: &str) -> Result<(), ConfigError> {
    if !Path::new(path).is_file() {
        return Err(ConfigError::ManifestMissing {
            path: path.to_string(),
        });
    }

    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ManifestParse {
        path: path.to_string(),
        reason: e.to_string(),
    })?;
    let value: serde_json::Value =
        serde_json::from_str(&content).map_err(|e| ConfigError::ManifestParse {
            path: path.to_string(),
            reason: e.to_string(),
        })?;

    if !value.is_object() {
        return Err(ConfigError::ManifestParse {
            path: path.to_string(),
            reason: "manifest root must be a JSON object".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dev_config() -> SsrConfig {
        let mut config = SsrConfig::default();
        config.dev.enabled = true;
        config
    }

    fn invalid_field(err: ConfigError) -> String {
        match err {
            ConfigError::Invalid { field, .. } => field,
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn test_dev_defaults_resolve() {
        let validated = dev_config().validate().unwrap();

        assert!(validated.dev_mode);
        assert_eq!(validated.configured_mode, AssetMode::Auto);
        assert!(validated.api_bridge_enabled);
        assert!(validated.log_request_routes);
        assert!(validated.dev_proxy_assets);
        assert!(validated.dev_inject_hmr_client);
        assert!(validated.dev_auto_reload);
        assert!(!validated.include_cookie_map);
        assert!(validated.pool_size >= 1);
    }

    #[test]
    fn test_explicit_flags_override_mode() {
        let mut config = dev_config();
        config.api_bridge.enabled = Some(false);
        config.dev.auto_reload = Some(false);
        config.request_context.include_cookies = true;

        let validated = config.validate().unwrap();
        assert!(!validated.api_bridge_enabled);
        assert!(!validated.dev_auto_reload);
        assert!(validated.include_cookie_map);
    }

    #[test]
    fn test_render_timeout_range() {
        let mut config = dev_config();
        config.runtime.render_timeout_ms = 0;
        let err = config.validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "config 'runtime.render_timeout_ms' must be in range 1..120000"
        );

        config.runtime.render_timeout_ms = 120_001;
        assert!(config.validate().is_err());

        config.runtime.render_timeout_ms = 120_000;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_acquire_timeout_limit() {
        let mut config = dev_config();
        config.runtime.acquire_timeout_ms = 300_001;
        assert_eq!(
            invalid_field(config.validate().unwrap_err()),
            "runtime.acquire_timeout_ms"
        );
    }

    #[test]
    fn test_pool_size_limit() {
        let mut config = dev_config();
        config.runtime.pool_size = 1025;
        assert_eq!(invalid_field(config.validate().unwrap_err()), "runtime.pool_size");
    }

    #[test]
    fn test_unknown_asset_mode() {
        let mut config = dev_config();
        config.assets.mode = "staging".to_string();
        assert_eq!(invalid_field(config.validate().unwrap_err()), "assets.mode");

        config.assets.mode = "  DEV ".to_string();
        assert!(config.validate().unwrap().dev_mode);
    }

    #[test]
    fn test_bridge_body_limit() {
        let mut config = dev_config();
        config.api_bridge.max_body_bytes = 0;
        assert_eq!(
            invalid_field(config.validate().unwrap_err()),
            "api_bridge.max_body_bytes"
        );

        config.api_bridge.max_body_bytes = 16 * 1024 * 1024 + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_dev_checks() {
        let mut config = dev_config();
        config.dev.vite_origin = "ws://localhost:5174".to_string();
        assert_eq!(invalid_field(config.validate().unwrap_err()), "dev.vite_origin");

        let mut config = dev_config();
        config.dev.css_path = "  ".to_string();
        assert_eq!(invalid_field(config.validate().unwrap_err()), "dev.css_path");

        let mut config = dev_config();
        config.dev.hmr_client_path = String::new();
        assert_eq!(invalid_field(config.validate().unwrap_err()), "dev.hmr_client_path");
        config.dev.inject_hmr_client = Some(false);
        assert!(config.validate().is_ok());

        let mut config = dev_config();
        config.dev.proxy_timeout_sec = 0.0;
        assert_eq!(
            invalid_field(config.validate().unwrap_err()),
            "dev.proxy_timeout_sec"
        );

        let mut config = dev_config();
        config.dev.reload_interval_ms = 600_001;
        assert_eq!(
            invalid_field(config.validate().unwrap_err()),
            "dev.reload_interval_ms"
        );

        let mut config = dev_config();
        config.dev.reload_probe_path = "__ssr/test".to_string();
        assert_eq!(
            invalid_field(config.validate().unwrap_err()),
            "dev.reload_probe_path"
        );
        config.dev.auto_reload = Some(false);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_prod_requires_manifest() {
        let mut config = SsrConfig::default();
        config.assets.manifest_path = "/nonexistent/manifest.json".to_string();
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::ManifestMissing { .. }
        ));
    }

    #[test]
    fn test_prod_manifest_must_be_object() {
        let dir = std::env::temp_dir().join(format!("ssr-validate-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let manifest = dir.join("array.json");
        std::fs::write(&manifest, "[1, 2]").unwrap();
        let mut config = SsrConfig::default();
        config.assets.manifest_path = manifest.display().to_string();
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::ManifestParse { .. }
        ));

        std::fs::write(&manifest, r#"{"src/entry-client.tsx": {"file": "client.js"}}"#).unwrap();
        let validated = config.validate().unwrap();
        assert!(!validated.dev_mode);
        assert!(!validated.api_bridge_enabled);
        assert_eq!(validated.resolved_mode(), "prod");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_summary() {
        let validated = dev_config().validate().unwrap();
        let summary = validated.summary();

        assert!(summary.starts_with("runtime{bundle=./public/assets/ssr-bundle.wasm"));
        assert!(summary.contains("timeout_ms{acquire=0, render=50}"));
        assert!(summary.contains("assets{mode=dev, configured=auto"));
        assert!(summary.contains("dev{enabled=on, origin=http://127.0.0.1:5174, proxy_assets=on}"));
    }

    #[test]
    fn test_asset_mode_parse() {
        assert_eq!(AssetMode::parse(""), Some(AssetMode::Auto));
        assert_eq!(AssetMode::parse(" Prod "), Some(AssetMode::Prod));
        assert_eq!(AssetMode::parse("nope"), None);
    }
}
