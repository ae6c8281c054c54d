//! Shared application state.
//!
//! This module provides [`AppState`], which holds shared resources
//! across all HTTP request handlers.

use std::io;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::info;

use ssr_runtime_common::{StartupError, ValidatedConfig};
use ssr_runtime_core::{HostBridge, RenderBundle, RenderEngine, RuntimeFactory, RuntimePool};
use ssr_runtime_host::{ApiBridge, create_linker};

use crate::dev_proxy::DevProxy;
use crate::orchestrator::RenderOrchestrator;

/// Shared state across all request handlers.
///
/// This struct is cloned for each request, so it uses `Arc` for shared data.
#[derive(Clone)]
pub struct AppState {
    /// The render path (owns the runtime pool).
    orchestrator: Arc<RenderOrchestrator>,

    /// Validated configuration.
    validated: Arc<ValidatedConfig>,

    /// Dev asset proxy, only in dev mode with `proxy_assets` on.
    dev_proxy: Option<Arc<DevProxy>>,

    /// Served at the reload probe path; changes when the process restarts.
    boot_token: Arc<str>,
}

impl AppState {
    /// Build the full render stack from configuration.
    ///
    /// The bridge is the built-in [`ApiBridge`] under the configured policy.
    ///
    /// # Errors
    ///
    /// Returns an error if the bundle cannot be loaded or a runtime fails to
    /// initialize.
    pub fn new(validated: &ValidatedConfig) -> Result<Self, StartupError> {
        let bridge = ApiBridge::from_config(
            &validated.config.api_bridge,
            validated.api_bridge_enabled,
        );
        Self::with_bridge(validated, Arc::new(bridge))
    }

    /// Build the render stack with a custom host bridge.
    ///
    /// # Errors
    ///
    /// Same as [`AppState::new`].
    pub fn with_bridge(
        validated: &ValidatedConfig,
        bridge: Arc<dyn HostBridge>,
    ) -> Result<Self, StartupError> {
        let config = &validated.config;

        let max_instances = u32::try_from(validated.pool_size.saturating_mul(2)).unwrap_or(u32::MAX);
        let engine = RenderEngine::new(&config.engine, max_instances)?;
        let bundle = RenderBundle::from_file(engine.inner(), &config.runtime.bundle_path)?;
        let linker = create_linker(&engine)?;
        let factory = RuntimeFactory::new(engine, bundle, linker, bridge);

        let pool = RuntimePool::new(
            factory,
            validated.pool_size,
            config.runtime.render_timeout_ms,
            config.runtime.recycle_policy,
        )?;

        Self::from_pool(pool, validated)
    }

    /// Wrap an already constructed pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the dev proxy client cannot be built.
    pub fn from_pool(pool: RuntimePool, validated: &ValidatedConfig) -> Result<Self, StartupError> {
        let dev_proxy = if validated.dev_mode && validated.dev_proxy_assets {
            let dev = &validated.config.dev;
            let proxy = DevProxy::new(&dev.vite_origin, dev.proxy_timeout_sec)
                .map_err(|e| StartupError::Io(io::Error::other(e)))?;
            info!(origin = %proxy.origin(), "Dev asset proxy enabled");
            Some(Arc::new(proxy))
        } else {
            None
        };

        let started_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();

        Ok(Self {
            orchestrator: Arc::new(RenderOrchestrator::new(pool, validated)),
            validated: Arc::new(validated.clone()),
            dev_proxy,
            boot_token: Arc::from(started_ms.to_string()),
        })
    }

    /// The render orchestrator.
    pub fn orchestrator(&self) -> &RenderOrchestrator {
        &self.orchestrator
    }

    /// The validated configuration.
    pub fn config(&self) -> &ValidatedConfig {
        &self.validated
    }

    /// The dev asset proxy, if enabled.
    pub fn dev_proxy(&self) -> Option<&DevProxy> {
        self.dev_proxy.as_deref()
    }

    /// Token served at the reload probe path.
    pub fn boot_token(&self) -> &str {
        &self.boot_token
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("orchestrator", &self.orchestrator)
            .field("mode", &self.validated.resolved_mode())
            .field("dev_proxy", &self.dev_proxy.is_some())
            .finish_non_exhaustive()
    }
}
