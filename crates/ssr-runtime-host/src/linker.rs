//! Host function registration for Wasmtime linkers.
//!
//! The render bundle may import:
//! - `ssr::bridge(ptr, len) -> i64` - JSON request in, packed JSON response out
//! - `ssr::log(level, ptr, len)` - structured guest logging
//! - `env::set_timeout(task, delay) -> i32`, `env::clear_timeout(id)`,
//!   `env::queue_microtask(task)` - deferred guest tasks
//! - `wasi_snapshot_preview1::*` - WASI preview1

use std::sync::Arc;

use tracing::warn;
use wasmtime::{Caller, Extern, Linker, Memory};

use ssr_runtime_common::{BridgeResponse, RenderError};
use ssr_runtime_core::abi::{self, AllocFunc};
use ssr_runtime_core::store::{LogLevel, RuntimeState};
use ssr_runtime_core::{RenderEngine, dispatch_json};

use crate::logging::LoggingHost;

/// Create a linker with every host function registered.
///
/// # Errors
///
/// Returns an error if function registration fails.
pub fn create_linker(engine: &RenderEngine) -> Result<Linker<RuntimeState>, RenderError> {
    let mut linker = Linker::new(engine.inner());
    register_all(&mut linker)?;
    Ok(linker)
}

/// Register all host functions on a linker.
///
/// # Errors
///
/// Returns an error if function registration fails.
pub fn register_all(linker: &mut Linker<RuntimeState>) -> Result<(), RenderError> {
    register_bridge(linker)?;
    register_logging(linker)?;
    register_scheduler(linker)?;
    register_wasi(linker)?;
    Ok(())
}

/// Register `ssr::bridge`.
///
/// The response is written into a buffer from the guest's `ssr_alloc`.
/// A request that cannot be read from guest memory gets a `400` response.
#[allow(clippy::cast_sign_loss)]
pub fn register_bridge(linker: &mut Linker<RuntimeState>) -> Result<(), RenderError> {
    linker
        .func_wrap(
            abi::HOST_MODULE,
            "bridge",
            |mut caller: Caller<'_, RuntimeState>, ptr: i32, len: i32| -> wasmtime::Result<i64> {
                let memory = guest_memory(&mut caller)?;
                let alloc = guest_alloc(&mut caller)?;

                let response = match abi::read_string(&caller, &memory, ptr as u32, len as u32) {
                    Ok(request) => {
                        let bridge = Arc::clone(caller.data().bridge());
                        dispatch_json(bridge.as_ref(), &request)
                    }
                    Err(e) => BridgeResponse::new(400, format!("Unreadable bridge request: {e}")),
                };

                let (out_ptr, out_len) =
                    abi::write_bytes(&mut caller, &memory, &alloc, response.to_json().as_bytes())?;
                Ok(abi::pack(out_ptr, out_len))
            },
        )
        .map_err(|e| RenderError::runtime_init(format!("Failed to register bridge function: {e}")))?;

    Ok(())
}

/// Register `ssr::log`.
///
/// Levels: 0=debug, 1=info, 2=warn, 3=error. Unreadable messages are dropped
/// with a host-side warning.
#[allow(clippy::cast_sign_loss)]
pub fn register_logging(linker: &mut Linker<RuntimeState>) -> Result<(), RenderError> {
    linker
        .func_wrap(
            abi::HOST_MODULE,
            "log",
            |mut caller: Caller<'_, RuntimeState>, level: i32, ptr: i32, len: i32| {
                let Ok(memory) = guest_memory(&mut caller) else {
                    warn!("Memory export not found in guest module");
                    return;
                };

                let message = match abi::read_string(&caller, &memory, ptr as u32, len as u32) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!(ptr, len, error = %e, "Unreadable guest log message");
                        return;
                    }
                };

                LoggingHost::log(caller.data_mut(), LogLevel::from_i32(level), &message);
            },
        )
        .map_err(|e| RenderError::runtime_init(format!("Failed to register log function: {e}")))?;

    Ok(())
}

/// Register the timer and microtask shims.
///
/// Tasks are opaque guest handles; the runtime hands them back through
/// `ssr_run_task` once the current guest call returns.
pub fn register_scheduler(linker: &mut Linker<RuntimeState>) -> Result<(), RenderError> {
    let map_err =
        |e: wasmtime::Error| RenderError::runtime_init(format!("Failed to register scheduler: {e}"));

    linker
        .func_wrap(
            abi::ENV_MODULE,
            "set_timeout",
            |mut caller: Caller<'_, RuntimeState>, task: i32, delay_ms: i32| -> i32 {
                caller.data_mut().tasks().set_timeout(task, delay_ms)
            },
        )
        .map_err(map_err)?;

    linker
        .func_wrap(
            abi::ENV_MODULE,
            "clear_timeout",
            |mut caller: Caller<'_, RuntimeState>, id: i32| {
                caller.data_mut().tasks().clear_timeout(id);
            },
        )
        .map_err(map_err)?;

    linker
        .func_wrap(
            abi::ENV_MODULE,
            "queue_microtask",
            |mut caller: Caller<'_, RuntimeState>, task: i32| {
                caller.data_mut().tasks().queue_microtask(task);
            },
        )
        .map_err(map_err)?;

    Ok(())
}

/// Register WASI preview1 so bundles built for `wasm32-wasip1` link.
pub fn register_wasi(linker: &mut Linker<RuntimeState>) -> Result<(), RenderError> {
    wasmtime_wasi::preview1::add_to_linker_sync(linker, RuntimeState::wasi)
        .map_err(|e| RenderError::runtime_init(format!("Failed to register WASI: {e}")))
}

fn guest_memory(caller: &mut Caller<'_, RuntimeState>) -> wasmtime::Result<Memory> {
    caller
        .get_export(abi::MEMORY_EXPORT)
        .and_then(Extern::into_memory)
        .ok_or_else(|| wasmtime::Error::msg("guest does not export memory"))
}

fn guest_alloc(caller: &mut Caller<'_, RuntimeState>) -> wasmtime::Result<AllocFunc> {
    caller
        .get_export(abi::ALLOC_EXPORT)
        .and_then(Extern::into_func)
        .ok_or_else(|| wasmtime::Error::msg("guest does not export ssr_alloc"))?
        .typed::<i32, i32>(&*caller)
}
