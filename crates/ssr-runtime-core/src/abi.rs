//! Guest ABI shared by the runtime and the host functions.
//!
//! Strings cross the boundary as UTF-8 bytes in guest linear memory. The
//! host obtains guest buffers through the exported allocator and the guest
//! returns strings as a packed `i64` holding `ptr << 32 | len`.

use wasmtime::{AsContext, AsContextMut, Memory, TypedFunc};

use ssr_runtime_common::RenderError;

/// Exported linear memory.
pub const MEMORY_EXPORT: &str = "memory";
/// Exported allocator: `(len: i32) -> ptr: i32`.
pub const ALLOC_EXPORT: &str = "ssr_alloc";
/// Exported render entry point.
pub const RENDER_EXPORT: &str = "render";
/// Optional one-time initializer, called after instantiation.
pub const INIT_EXPORT: &str = "ssr_init";
/// Optional scheduled-task runner: `(task: i32) -> ()`.
pub const RUN_TASK_EXPORT: &str = "ssr_run_task";

/// Import module for the bridge and log functions.
pub const HOST_MODULE: &str = "ssr";
/// Import module for the timer and microtask shims.
pub const ENV_MODULE: &str = "env";

/// Typed signature of the render export.
pub type RenderFunc = TypedFunc<(i32, i32, i32, i32, i32, i32), i64>;
/// Typed signature of the allocator export.
pub type AllocFunc = TypedFunc<i32, i32>;

/// Pack a guest pointer and length into the `i64` return convention.
pub fn pack(ptr: u32, len: u32) -> i64 {
    (i64::from(ptr) << 32) | i64::from(len)
}

/// Split a packed `i64` into pointer and length.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn unpack(packed: i64) -> (u32, u32) {
    let bits = packed as u64;
    ((bits >> 32) as u32, bits as u32)
}

/// Read a UTF-8 string out of guest memory.
///
/// # Errors
///
/// Returns [`RenderError::Protocol`] if the range is out of bounds or the
/// bytes are not valid UTF-8.
pub fn read_string(
    store: impl AsContext,
    memory: &Memory,
    ptr: u32,
    len: u32,
) -> Result<String, RenderError> {
    let data = memory.data(&store);
    let start = ptr as usize;
    let bytes = start
        .checked_add(len as usize)
        .and_then(|end| data.get(start..end))
        .ok_or_else(|| {
            RenderError::protocol(format!(
                "string at {ptr}+{len} is outside guest memory ({} bytes)",
                data.len()
            ))
        })?;

    String::from_utf8(bytes.to_vec())
        .map_err(|e| RenderError::protocol(format!("string is not valid UTF-8: {e}")))
}

/// Copy bytes into a fresh guest buffer obtained from the allocator export.
///
/// Returns the guest pointer and length.
///
/// # Errors
///
/// Fails if the buffer is too large for the 32-bit ABI, the allocator traps,
/// or the returned range is outside guest memory.
#[allow(clippy::cast_sign_loss)]
pub fn write_bytes(
    mut store: impl AsContextMut,
    memory: &Memory,
    alloc: &AllocFunc,
    bytes: &[u8],
) -> wasmtime::Result<(u32, u32)> {
    let len = i32::try_from(bytes.len())?;
    let ptr = alloc.call(&mut store, len)?;
    memory.write(&mut store, ptr as u32 as usize, bytes)?;
    Ok((ptr as u32, len as u32))
}
