//! Access policy for the guest-to-host bridge.
//!
//! This module provides the [`BridgePolicy`] struct, which decides which
//! bridge requests reach a handler.

use std::collections::HashSet;

use ssr_runtime_common::ApiBridgeConfig;

// Base used only to resolve dot segments in request paths.
const PATH_BASE: &str = "http://bridge.invalid/";

/// Which bridge requests are allowed through.
///
/// By default nothing is allowed: the bridge is disabled and no method or
/// path prefix is granted.
#[derive(Debug, Clone, Default)]
pub struct BridgePolicy {
    /// Master switch.
    pub enabled: bool,

    /// Allowed methods, uppercased.
    pub allowed_methods: HashSet<String>,

    /// Allowed path prefixes.
    pub allowed_path_prefixes: Vec<String>,

    /// Largest accepted request body in bytes.
    pub max_body_bytes: u64,
}

impl BridgePolicy {
    /// A disabled policy.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Create a builder for constructing a policy.
    pub fn builder() -> BridgePolicyBuilder {
        BridgePolicyBuilder::default()
    }

    /// Build a policy from configuration.
    ///
    /// `enabled` is the resolved switch; the config's own `enabled` may be
    /// unset and default to dev mode.
    pub fn from_config(config: &ApiBridgeConfig, enabled: bool) -> Self {
        let mut builder = Self::builder()
            .allow_methods(&config.allowed_methods)
            .allow_path_prefixes(&config.allowed_path_prefixes)
            .max_body_bytes(config.max_body_bytes);
        if enabled {
            builder = builder.enable();
        }
        builder.build()
    }

    /// Normalize a method: trimmed, uppercased, empty means `GET`.
    pub fn normalize_method(method: &str) -> String {
        let method = method.trim();
        if method.is_empty() {
            "GET".to_string()
        } else {
            method.to_ascii_uppercase()
        }
    }

    /// Check a method against the allow-list.
    pub fn is_method_allowed(&self, method: &str) -> bool {
        self.allowed_methods
            .contains(&Self::normalize_method(method))
    }

    /// Check a path against the allowed prefixes.
    ///
    /// Dot segments are resolved first, so `/ssr/internal/../admin` does
    /// not match `/ssr/internal/`.
    pub fn is_path_allowed(&self, path: &str) -> bool {
        self.allowed_path(path).is_some()
    }

    /// The normalized path, if it falls under an allowed prefix.
    ///
    /// Paths that do not start with a single `/` are rejected.
    pub fn allowed_path(&self, path: &str) -> Option<String> {
        let path = Self::normalize_path(path)?;
        self.allowed_path_prefixes
            .iter()
            .any(|prefix| !prefix.is_empty() && path.starts_with(prefix.as_str()))
            .then_some(path)
    }

    /// Check a body length against the limit.
    pub fn is_body_allowed(&self, len: usize) -> bool {
        u64::try_from(len).is_ok_and(|len| len <= self.max_body_bytes)
    }

    fn normalize_path(path: &str) -> Option<String> {
        // `//host/...` would be read as a network-path reference.
        if !path.starts_with('/') || path.starts_with("//") {
            return None;
        }
        let base = url::Url::parse(PATH_BASE).ok()?;
        let resolved = base.join(path).ok()?;
        Some(resolved.path().to_string())
    }
}

/// Builder for [`BridgePolicy`].
#[derive(Debug, Default)]
pub struct BridgePolicyBuilder {
    inner: BridgePolicy,
}

impl BridgePolicyBuilder {
    /// Turn the bridge on.
    #[must_use]
    pub fn enable(mut self) -> Self {
        self.inner.enabled = true;
        self
    }

    /// Allow these methods (case-insensitive).
    #[must_use]
    pub fn allow_methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.inner.allowed_methods = methods
            .into_iter()
            .map(|m| m.as_ref().trim().to_ascii_uppercase())
            .filter(|m| !m.is_empty())
            .collect();
        self
    }

    /// Allow paths under these prefixes.
    #[must_use]
    pub fn allow_path_prefixes<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.inner.allowed_path_prefixes = prefixes
            .into_iter()
            .map(|p| p.as_ref().to_string())
            .collect();
        self
    }

    /// Set the body size limit.
    #[must_use]
    pub fn max_body_bytes(mut self, max: u64) -> Self {
        self.inner.max_body_bytes = max;
        self
    }

    /// Build the policy.
    #[must_use]
    pub fn build(self) -> BridgePolicy {
        self.inner
    }
}
