//! A single isolated render context.
//!
//! A [`RenderRuntime`] owns one store and one instance of the render bundle.
//! Guest globals live in that instance and persist across renders, so a
//! runtime must only ever be used by one render at a time; the pool
//! enforces that.
//!
//! Render call sequence:
//!
//! 1. Copy url, props and context JSON into guest memory
//! 2. Call the `render` export with the watchdog armed
//! 3. Drain timers and microtasks queued by the guest
//! 4. Decode the packed result string

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use tracing::{debug, instrument, warn};
use wasmtime::{Instance, Linker, Memory, Store, TypedFunc};

use ssr_runtime_common::RenderError;

use crate::abi::{self, AllocFunc, RenderFunc};
use crate::store::{LogEntry, RuntimeState, create_store};
use crate::watchdog::Watchdog;
use crate::{RenderBundle, RenderEngine};

/// Upper bound on scheduled tasks run after a single guest call.
pub const MAX_TASK_ITERATIONS: usize = 1024;

/// Lifecycle of a runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeStatus {
    /// Instantiation or `ssr_init` in progress.
    Constructing,
    /// Ready to render.
    Ready,
    /// A render timed out or trapped. Still callable, but guest state may be corrupt.
    Faulted,
}

/// One store plus one instantiated render bundle.
pub struct RenderRuntime {
    id: String,
    engine: RenderEngine,
    store: Store<RuntimeState>,
    instance: Instance,
    memory: Memory,
    alloc: AllocFunc,
    run_task: Option<TypedFunc<i32, ()>>,
    status: RuntimeStatus,
    renders: u64,
}

impl RenderRuntime {
    /// Instantiate the bundle and run its initializer.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::RuntimeInit`] if instantiation fails, the
    /// `memory` or `ssr_alloc` export is missing, or `ssr_init` traps.
    #[instrument(skip_all, fields(runtime_id = %state.runtime_id()))]
    pub fn new(
        engine: &RenderEngine,
        bundle: &RenderBundle,
        linker: &Linker<RuntimeState>,
        state: RuntimeState,
    ) -> Result<Self, RenderError> {
        let start = Instant::now();
        let id = state.runtime_id().to_string();
        let mut store = create_store(engine, state);

        let instance = linker
            .instantiate(&mut store, bundle.module())
            .map_err(|e| RenderError::runtime_init(format!("instantiation failed: {e:#}")))?;

        let memory = instance
            .get_memory(&mut store, abi::MEMORY_EXPORT)
            .ok_or_else(|| {
                RenderError::runtime_init(format!("bundle does not export '{}'", abi::MEMORY_EXPORT))
            })?;

        let alloc = instance
            .get_typed_func::<i32, i32>(&mut store, abi::ALLOC_EXPORT)
            .map_err(|e| {
                RenderError::runtime_init(format!("bundle export '{}': {e}", abi::ALLOC_EXPORT))
            })?;

        let run_task = instance
            .get_typed_func::<i32, ()>(&mut store, abi::RUN_TASK_EXPORT)
            .ok();

        let mut runtime = Self {
            id,
            engine: engine.clone(),
            store,
            instance,
            memory,
            alloc,
            run_task,
            status: RuntimeStatus::Constructing,
            renders: 0,
        };

        runtime.initialize()?;
        runtime.status = RuntimeStatus::Ready;

        debug!(
            runtime_id = %runtime.id,
            duration_us = start.elapsed().as_micros(),
            "Runtime ready"
        );

        Ok(runtime)
    }

    fn initialize(&mut self) -> Result<(), RenderError> {
        let Some(init) = self.instance.get_func(&mut self.store, abi::INIT_EXPORT) else {
            return Ok(());
        };

        let init = init.typed::<(), ()>(&self.store).map_err(|e| {
            RenderError::runtime_init(format!("bundle export '{}': {e}", abi::INIT_EXPORT))
        })?;

        init.call(&mut self.store, ())
            .and_then(|()| self.drain_tasks())
            .map_err(|e| {
                RenderError::runtime_init(format!("bundle evaluation failed: {}", e.root_cause()))
            })
    }

    /// Render a URL.
    ///
    /// A `timeout_ms` of zero disables the watchdog.
    ///
    /// # Errors
    ///
    /// - [`RenderError::Timeout`] if the watchdog aborted the call
    /// - [`RenderError::Script`] if the guest trapped
    /// - [`RenderError::Protocol`] if `render` is missing, has the wrong
    ///   signature, or returned something that is not a valid string
    ///
    /// Timeout and Script leave the runtime [`RuntimeStatus::Faulted`].
    #[instrument(skip(self, props_json, context_json), fields(runtime_id = %self.id))]
    pub fn render(
        &mut self,
        url: &str,
        props_json: &str,
        context_json: &str,
        timeout_ms: u64,
    ) -> Result<String, RenderError> {
        let render = self.render_export()?;
        self.renders += 1;

        let watchdog = (timeout_ms > 0).then(|| {
            Watchdog::arm(
                &self.engine,
                Arc::clone(self.store.data().abort_flag()),
                Duration::from_millis(timeout_ms),
            )
        });

        let result = self.call_render(&render, url, props_json, context_json);

        let fired = watchdog.is_some_and(Watchdog::disarm);
        self.store
            .data()
            .abort_flag()
            .store(false, Ordering::Release);

        let packed = match result {
            Ok(packed) => packed,
            Err(_) if fired => {
                self.status = RuntimeStatus::Faulted;
                warn!(runtime_id = %self.id, timeout_ms, "Render aborted by watchdog");
                return Err(RenderError::timeout(timeout_ms));
            }
            Err(e) => {
                self.status = RuntimeStatus::Faulted;
                let message = e.root_cause().to_string();
                warn!(runtime_id = %self.id, error = %message, "Render trapped");
                return Err(RenderError::script(message));
            }
        };

        let (ptr, len) = abi::unpack(packed);
        abi::read_string(&self.store, &self.memory, ptr, len).map_err(|e| match e {
            RenderError::Protocol { reason } => {
                RenderError::protocol(format!("render did not return a string: {reason}"))
            }
            other => other,
        })
    }

    fn render_export(&mut self) -> Result<RenderFunc, RenderError> {
        let func = self
            .instance
            .get_func(&mut self.store, abi::RENDER_EXPORT)
            .ok_or_else(|| {
                RenderError::protocol(format!("bundle does not export '{}'", abi::RENDER_EXPORT))
            })?;

        func.typed(&self.store).map_err(|e| {
            RenderError::protocol(format!("'{}' has the wrong signature: {e}", abi::RENDER_EXPORT))
        })
    }

    #[allow(clippy::cast_possible_wrap)]
    fn call_render(
        &mut self,
        render: &RenderFunc,
        url: &str,
        props_json: &str,
        context_json: &str,
    ) -> wasmtime::Result<i64> {
        let (url_ptr, url_len) =
            abi::write_bytes(&mut self.store, &self.memory, &self.alloc, url.as_bytes())?;
        let (props_ptr, props_len) =
            abi::write_bytes(&mut self.store, &self.memory, &self.alloc, props_json.as_bytes())?;
        let (ctx_ptr, ctx_len) =
            abi::write_bytes(&mut self.store, &self.memory, &self.alloc, context_json.as_bytes())?;

        let packed = render.call(
            &mut self.store,
            (
                url_ptr as i32,
                url_len as i32,
                props_ptr as i32,
                props_len as i32,
                ctx_ptr as i32,
                ctx_len as i32,
            ),
        )?;

        self.drain_tasks()?;
        Ok(packed)
    }

    fn drain_tasks(&mut self) -> wasmtime::Result<()> {
        let Some(run_task) = self.run_task.as_ref() else {
            let pending = self.store.data_mut().tasks().len();
            if pending > 0 {
                debug!(runtime_id = %self.id, pending, "Bundle has no task runner; dropping tasks");
                self.store.data_mut().tasks().clear();
            }
            return Ok(());
        };

        for _ in 0..MAX_TASK_ITERATIONS {
            let Some(task) = self.store.data_mut().tasks().pop() else {
                return Ok(());
            };
            run_task.call(&mut self.store, task)?;
        }

        let dropped = self.store.data_mut().tasks().len();
        if dropped > 0 {
            warn!(runtime_id = %self.id, dropped, "Task drain limit reached; dropping tasks");
            self.store.data_mut().tasks().clear();
        }
        Ok(())
    }

    /// Identifier used in logs.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current lifecycle state.
    pub fn status(&self) -> RuntimeStatus {
        self.status
    }

    /// Returns `true` after a render timed out or trapped.
    pub fn is_faulted(&self) -> bool {
        self.status == RuntimeStatus::Faulted
    }

    /// Number of render calls made on this runtime.
    pub fn render_count(&self) -> u64 {
        self.renders
    }

    /// Recent guest log entries, oldest first.
    pub fn logs(&self) -> impl Iterator<Item = &LogEntry> {
        self.store.data().logs()
    }
}

impl std::fmt::Debug for RenderRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderRuntime")
            .field("id", &self.id)
            .field("status", &self.status)
            .field("renders", &self.renders)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::DisabledBridge;
    use ssr_runtime_common::EngineConfig;

    // "hello" at offset 16; render returns pack(16, 5).
    // A non-empty props argument spins forever.
    const HELLO_WAT: &str = r#"
        (module
          (memory (export "memory") 1)
          (global $heap (mut i32) (i32.const 1024))
          (data (i32.const 16) "hello")
          (func (export "ssr_alloc") (param $len i32) (result i32)
            (local $ptr i32)
            (local.set $ptr (global.get $heap))
            (global.set $heap (i32.add (global.get $heap) (local.get $len)))
            (local.get $ptr))
          (func (export "render")
            (param i32 i32 i32 i32 i32 i32) (result i64)
            (if (i32.gt_u (local.get 3) (i32.const 0))
              (then (loop $spin (br $spin))))
            (i64.const 68719476741)))
    "#;

    fn engine() -> RenderEngine {
        RenderEngine::new(&EngineConfig::default(), 1).unwrap()
    }

    fn build(engine: &RenderEngine, wat: &str) -> Result<RenderRuntime, RenderError> {
        let bundle = RenderBundle::from_wat(engine.inner(), wat)?;
        let linker = Linker::new(engine.inner());
        let state = RuntimeState::new("rt-unit".into(), Arc::new(DisabledBridge), false);
        RenderRuntime::new(engine, &bundle, &linker, state)
    }

    #[test]
    fn test_render_constant() {
        let engine = engine();
        let mut runtime = build(&engine, HELLO_WAT).unwrap();

        assert_eq!(runtime.status(), RuntimeStatus::Ready);
        assert_eq!(runtime.render("/", "", "{}", 1000).unwrap(), "hello");
        assert_eq!(runtime.render_count(), 1);
    }

    #[test]
    fn test_timeout_then_recover() {
        let engine = engine();
        let mut runtime = build(&engine, HELLO_WAT).unwrap();

        let err = runtime.render("/", "x", "{}", 20).unwrap_err();
        assert_eq!(err, RenderError::timeout(20));
        assert!(runtime.is_faulted());

        // The abort flag does not leak into the next call
        assert_eq!(runtime.render("/", "", "{}", 1000).unwrap(), "hello");
    }

    #[test]
    fn test_missing_memory_is_init_error() {
        let engine = engine();
        let err = build(
            &engine,
            r#"(module (func (export "ssr_alloc") (param i32) (result i32) (i32.const 0)))"#,
        )
        .unwrap_err();
        assert!(matches!(err, RenderError::RuntimeInit { .. }));
    }

    #[test]
    fn test_missing_render_is_protocol_error() {
        let engine = engine();
        let mut runtime = build(
            &engine,
            r#"(module
                 (memory (export "memory") 1)
                 (func (export "ssr_alloc") (param i32) (result i32) (i32.const 1024)))"#,
        )
        .unwrap();

        let err = runtime.render("/", "{}", "{}", 100).unwrap_err();
        assert!(matches!(err, RenderError::Protocol { .. }));
        assert!(!runtime.is_faulted());
    }

    #[test]
    fn test_invalid_utf8_is_protocol_error() {
        let engine = engine();
        let mut runtime = build(
            &engine,
            r#"(module
                 (memory (export "memory") 1)
                 (data (i32.const 16) "\ff\fe")
                 (func (export "ssr_alloc") (param i32) (result i32) (i32.const 1024))
                 (func (export "render") (param i32 i32 i32 i32 i32 i32) (result i64)
                   (i64.const 68719476738)))"#,
        )
        .unwrap();

        let err = runtime.render("/", "", "", 100).unwrap_err();
        assert!(err.to_string().contains("did not return a string"));
    }

    #[test]
    fn test_trap_is_script_error() {
        let engine = engine();
        let mut runtime = build(
            &engine,
            r#"(module
                 (memory (export "memory") 1)
                 (func (export "ssr_alloc") (param i32) (result i32) (i32.const 1024))
                 (func (export "render") (param i32 i32 i32 i32 i32 i32) (result i64)
                   unreachable))"#,
        )
        .unwrap();

        let err = runtime.render("/", "", "", 100).unwrap_err();
        assert!(matches!(err, RenderError::Script { .. }));
        assert!(runtime.is_faulted());
    }

    #[test]
    fn test_trapping_init_is_init_error() {
        let engine = engine();
        let err = build(
            &engine,
            r#"(module
                 (memory (export "memory") 1)
                 (func (export "ssr_alloc") (param i32) (result i32) (i32.const 1024))
                 (func (export "ssr_init") unreachable))"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("bundle evaluation failed"));
    }
}
