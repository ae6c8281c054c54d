//! Wasmtime engine configuration and creation.
//!
//! The [`RenderEngine`] is shared by every runtime in the pool. It is:
//! - Synchronous: renders run on blocking threads, not on the async executor
//! - Set up with epoch interruption so the watchdog can abort a render
//! - Optionally backed by the pooling allocator

use std::sync::Arc;

use tracing::info;
use wasmtime::{Config, Engine, InstanceAllocationStrategy, PoolingAllocationConfig};

use ssr_runtime_common::{EngineConfig, RenderError};

/// Thread-safe WebAssembly engine wrapper.
///
/// Holds no per-render state. Incrementing the epoch is harmless for stores
/// whose abort flag is clear, so the watchdog of one runtime never interrupts
/// another.
///
/// # Example
///
/// ```ignore
/// use ssr_runtime_common::EngineConfig;
/// use ssr_runtime_core::RenderEngine;
///
/// let engine = RenderEngine::new(&EngineConfig::default(), 8)?;
/// ```
#[derive(Clone)]
pub struct RenderEngine {
    engine: Arc<Engine>,
    config: EngineConfig,
    max_instances: u32,
}

impl RenderEngine {
    /// Create a new engine.
    ///
    /// `max_instances` sizes the pooling allocator and is ignored when pooling
    /// is disabled.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::RuntimeInit`] if the Wasmtime configuration is rejected.
    pub fn new(config: &EngineConfig, max_instances: u32) -> Result<Self, RenderError> {
        let mut wasmtime_config = Config::new();

        wasmtime_config.async_support(false);
        wasmtime_config.epoch_interruption(true);
        wasmtime_config.cranelift_opt_level(wasmtime::OptLevel::Speed);

        if config.pooling_allocator {
            let pooling_config = Self::create_pooling_config(config, max_instances);

            wasmtime_config
                .allocation_strategy(InstanceAllocationStrategy::Pooling(pooling_config));

            info!(
                max_instances,
                instance_memory_mb = config.instance_memory_mb,
                "Pooling allocator enabled"
            );
        }

        let engine = Engine::new(&wasmtime_config).map_err(|e| {
            RenderError::runtime_init(format!("Failed to create Wasmtime engine: {e}"))
        })?;

        info!("Wasmtime engine initialized");

        Ok(Self {
            engine: Arc::new(engine),
            config: config.clone(),
            max_instances,
        })
    }

    fn create_pooling_config(config: &EngineConfig, max_instances: u32) -> PoolingAllocationConfig {
        let mut pooling = PoolingAllocationConfig::default();

        pooling.total_core_instances(max_instances);
        pooling.total_memories(max_instances);
        pooling.total_tables(max_instances);

        let max_memory_bytes = (config.instance_memory_mb as usize) * 1024 * 1024;
        pooling.max_memory_size(max_memory_bytes);

        pooling
    }

    /// Get a reference to the inner Wasmtime engine.
    pub fn inner(&self) -> &Engine {
        &self.engine
    }

    /// Get the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Increment the epoch counter, waking every store's deadline callback.
    pub fn increment_epoch(&self) {
        self.engine.increment_epoch();
    }

    /// Check if the pooling allocator is enabled.
    pub fn is_pooling_enabled(&self) -> bool {
        self.config.pooling_allocator
    }
}

impl std::fmt::Debug for RenderEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderEngine")
            .field("pooling_allocator", &self.config.pooling_allocator)
            .field("max_instances", &self.max_instances)
            .field("instance_memory_mb", &self.config.instance_memory_mb)
            .finish_non_exhaustive()
    }
}
