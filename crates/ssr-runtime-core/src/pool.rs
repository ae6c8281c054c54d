//! Bounded pool of render runtimes.
//!
//! This module provides:
//! - [`RuntimeFactory`]: Builds runtimes that all evaluate the same bundle
//! - [`RuntimePool`]: A fixed set of runtimes handed out one at a time
//! - [`Lease`]: Exclusive use of one runtime, returned on drop
//! - [`PoolStats`]: A point-in-time view of the pool
//!
//! # Concurrency
//!
//! A tokio semaphore holds one permit per usable slot. Acquiring suspends the
//! calling task, never a thread. The slot index queue and the slots
//! themselves sit behind `parking_lot` mutexes held only for a push or pop.
//!
//! ```text
//!  acquire ──► permit ──► pop index ──► take runtime ──► Lease
//!                                                          │
//!  release ◄── drop permit ◄── push index ◄── put runtime ◄┘ (drop)
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, instrument, warn};
use wasmtime::Linker;

use ssr_runtime_common::{RecyclePolicy, RenderError};

use crate::bridge::HostBridge;
use crate::store::RuntimeState;
use crate::{RenderBundle, RenderEngine, RenderRuntime};

/// Builds runtimes for the pool.
///
/// Every runtime shares the engine, the compiled bundle, the linker and the
/// bridge; each gets its own store and guest state.
pub struct RuntimeFactory {
    engine: RenderEngine,
    bundle: RenderBundle,
    linker: Arc<Linker<RuntimeState>>,
    bridge: Arc<dyn HostBridge>,
    wasi_stdio: bool,
    next_id: AtomicU64,
}

impl RuntimeFactory {
    /// Create a factory.
    pub fn new(
        engine: RenderEngine,
        bundle: RenderBundle,
        linker: Linker<RuntimeState>,
        bridge: Arc<dyn HostBridge>,
    ) -> Self {
        let wasi_stdio = engine.config().wasi_stdio;
        Self {
            engine,
            bundle,
            linker: Arc::new(linker),
            bridge,
            wasi_stdio,
            next_id: AtomicU64::new(1),
        }
    }

    /// Build one runtime.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::RuntimeInit`] if the bundle fails to instantiate or initialize.
    pub fn create(&self) -> Result<RenderRuntime, RenderError> {
        let id = format!("rt-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let state = RuntimeState::new(id, Arc::clone(&self.bridge), self.wasi_stdio);
        RenderRuntime::new(&self.engine, &self.bundle, &self.linker, state)
    }

    /// The shared bundle.
    pub fn bundle(&self) -> &RenderBundle {
        &self.bundle
    }
}

impl std::fmt::Debug for RuntimeFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeFactory")
            .field("bundle", &self.bundle)
            .field("wasi_stdio", &self.wasi_stdio)
            .finish_non_exhaustive()
    }
}

/// A point-in-time view of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Configured number of slots.
    pub size: usize,
    /// Runtimes waiting in the queue.
    pub available: usize,
    /// Runtimes currently leased.
    pub in_use: usize,
    /// Slots withdrawn after a failed replacement.
    pub retired: usize,
    /// Successful replacements.
    pub recycles: u64,
    /// Failed replacements.
    pub recycle_failures: u64,
}

struct PoolShared {
    factory: RuntimeFactory,
    slots: Vec<Mutex<Option<RenderRuntime>>>,
    available: Mutex<VecDeque<usize>>,
    permits: Arc<Semaphore>,
    render_timeout_ms: u64,
    recycle_policy: RecyclePolicy,
    leased: AtomicUsize,
    retired: AtomicUsize,
    recycles: AtomicU64,
    recycle_failures: AtomicU64,
}

/// A fixed-size pool of render runtimes.
///
/// Cheap to clone; clones share the same slots.
#[derive(Clone)]
pub struct RuntimePool {
    shared: Arc<PoolShared>,
}

impl RuntimePool {
    /// Build `size` runtimes up front. A size of zero is treated as one.
    ///
    /// # Errors
    ///
    /// The first runtime that fails to build aborts construction.
    #[instrument(skip(factory), fields(bundle = %factory.bundle().source()))]
    pub fn new(
        factory: RuntimeFactory,
        size: usize,
        render_timeout_ms: u64,
        recycle_policy: RecyclePolicy,
    ) -> Result<Self, RenderError> {
        let size = size.max(1);

        let mut slots = Vec::with_capacity(size);
        for _ in 0..size {
            slots.push(Mutex::new(Some(factory.create()?)));
        }

        info!(size, render_timeout_ms, %recycle_policy, "Runtime pool ready");

        Ok(Self {
            shared: Arc::new(PoolShared {
                factory,
                slots,
                available: Mutex::new((0..size).collect()),
                permits: Arc::new(Semaphore::new(size)),
                render_timeout_ms,
                recycle_policy,
                leased: AtomicUsize::new(0),
                retired: AtomicUsize::new(0),
                recycles: AtomicU64::new(0),
                recycle_failures: AtomicU64::new(0),
            }),
        })
    }

    /// Wait for a runtime.
    ///
    /// A timeout of zero waits indefinitely.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::PoolExhausted`] if no runtime became free in time.
    pub async fn acquire(&self, acquire_timeout_ms: u64) -> Result<Lease, RenderError> {
        let permits = Arc::clone(&self.shared.permits);

        let permit = if acquire_timeout_ms == 0 {
            permits.acquire_owned().await.ok()
        } else {
            tokio::time::timeout(
                Duration::from_millis(acquire_timeout_ms),
                permits.acquire_owned(),
            )
            .await
            .ok()
            .and_then(Result::ok)
        };

        let permit = permit.ok_or_else(|| {
            debug!(acquire_timeout_ms, "Runtime acquire timed out");
            RenderError::pool_exhausted(acquire_timeout_ms)
        })?;

        self.checkout(permit)
    }

    /// Take a runtime only if one is free right now.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::PoolExhausted`] if every runtime is leased.
    pub fn try_acquire(&self) -> Result<Lease, RenderError> {
        let permit = Arc::clone(&self.shared.permits)
            .try_acquire_owned()
            .map_err(|_| RenderError::pool_exhausted(0))?;
        self.checkout(permit)
    }

    fn checkout(&self, permit: OwnedSemaphorePermit) -> Result<Lease, RenderError> {
        let index = self
            .shared
            .available
            .lock()
            .pop_front()
            .ok_or_else(|| RenderError::runtime_init("permit granted with no available slot"))?;

        let runtime = self.shared.slots[index].lock().take().ok_or_else(|| {
            RenderError::runtime_init(format!("slot {index} was queued without a runtime"))
        })?;

        self.shared.leased.fetch_add(1, Ordering::AcqRel);

        Ok(Lease {
            shared: Arc::clone(&self.shared),
            index,
            runtime: Some(runtime),
            recycle: false,
            permit: Some(permit),
        })
    }

    /// Configured number of slots.
    pub fn size(&self) -> usize {
        self.shared.slots.len()
    }

    /// Render deadline applied to every lease.
    pub fn render_timeout_ms(&self) -> u64 {
        self.shared.render_timeout_ms
    }

    /// Current statistics.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            size: self.size(),
            available: self.shared.available.lock().len(),
            in_use: self.shared.leased.load(Ordering::Acquire),
            retired: self.shared.retired.load(Ordering::Acquire),
            recycles: self.shared.recycles.load(Ordering::Relaxed),
            recycle_failures: self.shared.recycle_failures.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for RuntimePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimePool")
            .field("stats", &self.stats())
            .field("recycle_policy", &self.shared.recycle_policy)
            .finish_non_exhaustive()
    }
}

/// Exclusive use of one runtime.
///
/// Dropping the lease returns the runtime to the pool, or replaces it first
/// if it was marked for recycling. A lease is released exactly once.
pub struct Lease {
    shared: Arc<PoolShared>,
    index: usize,
    runtime: Option<RenderRuntime>,
    recycle: bool,
    // Dropped after the slot index is pushed back.
    permit: Option<OwnedSemaphorePermit>,
}

impl Lease {
    /// Render with the pool's render timeout.
    ///
    /// # Errors
    ///
    /// See [`RenderRuntime::render`].
    pub fn render(
        &mut self,
        url: &str,
        props_json: &str,
        context_json: &str,
    ) -> Result<String, RenderError> {
        let timeout_ms = self.shared.render_timeout_ms;
        self.runtime_mut()?
            .render(url, props_json, context_json, timeout_ms)
    }

    /// Replace the runtime instead of returning it when the lease is released.
    pub fn mark_for_recycle(&mut self) {
        self.recycle = true;
    }

    /// Returns `true` if the runtime will be replaced on release.
    pub fn is_marked_for_recycle(&self) -> bool {
        self.recycle
    }

    /// Slot index in the pool.
    pub fn index(&self) -> usize {
        self.index
    }

    /// The leased runtime.
    pub fn runtime(&self) -> Option<&RenderRuntime> {
        self.runtime.as_ref()
    }

    fn runtime_mut(&mut self) -> Result<&mut RenderRuntime, RenderError> {
        self.runtime
            .as_mut()
            .ok_or_else(|| RenderError::runtime_init("lease has no runtime"))
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        let Some(mut runtime) = self.runtime.take() else {
            return;
        };
        let shared = &self.shared;
        shared.leased.fetch_sub(1, Ordering::AcqRel);

        if self.recycle {
            match shared.factory.create() {
                Ok(fresh) => {
                    shared.recycles.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        slot = self.index,
                        old = %runtime.id(),
                        new = %fresh.id(),
                        "Runtime recycled"
                    );
                    runtime = fresh;
                }
                Err(e) => {
                    shared.recycle_failures.fetch_add(1, Ordering::Relaxed);
                    match shared.recycle_policy {
                        RecyclePolicy::KeepOnFailure => {
                            warn!(
                                slot = self.index,
                                runtime_id = %runtime.id(),
                                error = %e,
                                "Runtime replacement failed; keeping old runtime"
                            );
                        }
                        RecyclePolicy::Retire => {
                            let retired = shared.retired.fetch_add(1, Ordering::AcqRel) + 1;
                            error!(
                                slot = self.index,
                                retired,
                                size = shared.slots.len(),
                                error = %e,
                                "Runtime replacement failed; slot retired"
                            );
                            if let Some(permit) = self.permit.take() {
                                permit.forget();
                            }
                            return;
                        }
                    }
                }
            }
        }

        *shared.slots[self.index].lock() = Some(runtime);
        shared.available.lock().push_back(self.index);
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("index", &self.index)
            .field("runtime", &self.runtime)
            .field("recycle", &self.recycle)
            .finish_non_exhaustive()
    }
}
