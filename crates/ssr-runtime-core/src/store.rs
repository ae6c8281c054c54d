//! Per-runtime guest state and store creation.
//!
//! This module provides:
//! - [`RuntimeState`]: Everything host functions can reach through the `Caller`
//! - [`TaskQueue`]: Timers and microtasks scheduled by the guest
//! - [`LogEntry`] and [`LogLevel`]: Structured logging from guest code
//!
//! A `RuntimeState` belongs to exactly one runtime. Nothing in it is shared
//! between runtimes except the bridge handle.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use wasmtime::{Store, Trap, UpdateDeadline};
use wasmtime_wasi::WasiCtxBuilder;
use wasmtime_wasi::preview1::WasiP1Ctx;

use crate::RenderEngine;
use crate::bridge::HostBridge;

/// Recent guest log entries kept per runtime.
pub const MAX_GUEST_LOGS: usize = 64;

/// State owned by one runtime's store.
pub struct RuntimeState {
    runtime_id: String,
    bridge: Arc<dyn HostBridge>,
    abort: Arc<AtomicBool>,
    tasks: TaskQueue,
    logs: VecDeque<LogEntry>,
    wasi: WasiP1Ctx,
}

impl RuntimeState {
    /// Create the state for a new runtime.
    ///
    /// With `wasi_stdio` the guest's stdout and stderr go to the host's.
    pub fn new(runtime_id: String, bridge: Arc<dyn HostBridge>, wasi_stdio: bool) -> Self {
        let mut builder = WasiCtxBuilder::new();
        if wasi_stdio {
            builder.inherit_stdout().inherit_stderr();
        }

        Self {
            runtime_id,
            bridge,
            abort: Arc::new(AtomicBool::new(false)),
            tasks: TaskQueue::default(),
            logs: VecDeque::with_capacity(MAX_GUEST_LOGS),
            wasi: builder.build_p1(),
        }
    }

    /// Identifier used in logs.
    pub fn runtime_id(&self) -> &str {
        &self.runtime_id
    }

    /// Bridge used by the `ssr.bridge` import.
    pub fn bridge(&self) -> &Arc<dyn HostBridge> {
        &self.bridge
    }

    /// Abort flag raised by the watchdog.
    pub fn abort_flag(&self) -> &Arc<AtomicBool> {
        &self.abort
    }

    /// Returns `true` if the watchdog asked this runtime to stop.
    pub fn abort_requested(&self) -> bool {
        self.abort.load(Ordering::Acquire)
    }

    /// Scheduled guest tasks.
    pub fn tasks(&mut self) -> &mut TaskQueue {
        &mut self.tasks
    }

    /// Record a guest log entry, dropping the oldest when full.
    pub fn push_log(&mut self, level: LogLevel, message: String) {
        if self.logs.len() == MAX_GUEST_LOGS {
            self.logs.pop_front();
        }
        self.logs.push_back(LogEntry { level, message });
    }

    /// Recent guest log entries, oldest first.
    pub fn logs(&self) -> impl Iterator<Item = &LogEntry> {
        self.logs.iter()
    }

    /// WASI preview1 context.
    pub fn wasi(&mut self) -> &mut WasiP1Ctx {
        &mut self.wasi
    }
}

impl std::fmt::Debug for RuntimeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeState")
            .field("runtime_id", &self.runtime_id)
            .field("abort", &self.abort_requested())
            .field("pending_tasks", &self.tasks.len())
            .field("logs", &self.logs.len())
            .finish_non_exhaustive()
    }
}

/// A single log entry from guest code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Log level.
    pub level: LogLevel,
    /// Log message content.
    pub message: String,
}

/// Log level for guest logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug-level messages.
    Debug,
    /// Informational messages.
    Info,
    /// Warning messages.
    Warn,
    /// Error messages.
    Error,
}

impl LogLevel {
    /// Map the level argument of `ssr.log`. Unknown values are `Info`.
    pub fn from_i32(level: i32) -> Self {
        match level {
            0 => Self::Debug,
            2 => Self::Warn,
            3 => Self::Error,
            _ => Self::Info,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// Guest tasks queued through the timer and microtask shims.
///
/// Microtasks run before timers. Timers run in order of delay, then in
/// order of scheduling. Delays are only used for ordering; nothing waits.
#[derive(Debug, Default)]
pub struct TaskQueue {
    microtasks: VecDeque<i32>,
    timers: Vec<Timer>,
    next_id: i32,
}

#[derive(Debug, Clone, Copy)]
struct Timer {
    id: i32,
    task: i32,
    delay_ms: i32,
}

impl TaskQueue {
    /// Queue a timer task and return its id. Ids start at 1.
    pub fn set_timeout(&mut self, task: i32, delay_ms: i32) -> i32 {
        self.next_id = self.next_id.wrapping_add(1).max(1);
        let id = self.next_id;
        self.timers.push(Timer {
            id,
            task,
            delay_ms: delay_ms.max(0),
        });
        id
    }

    /// Cancel a pending timer. Unknown ids are ignored.
    pub fn clear_timeout(&mut self, id: i32) {
        self.timers.retain(|timer| timer.id != id);
    }

    /// Queue a microtask.
    pub fn queue_microtask(&mut self, task: i32) {
        self.microtasks.push_back(task);
    }

    /// Take the next task to run.
    pub fn pop(&mut self) -> Option<i32> {
        if let Some(task) = self.microtasks.pop_front() {
            return Some(task);
        }

        let (index, _) = self
            .timers
            .iter()
            .enumerate()
            .min_by_key(|(index, timer)| (timer.delay_ms, *index))?;
        Some(self.timers.remove(index).task)
    }

    /// Number of pending tasks.
    pub fn len(&self) -> usize {
        self.microtasks.len() + self.timers.len()
    }

    /// Returns `true` if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every pending task.
    pub fn clear(&mut self) {
        self.microtasks.clear();
        self.timers.clear();
    }
}

/// Create a store for one runtime.
///
/// The epoch deadline callback traps only when this runtime's own abort flag
/// is set; any other epoch bump just extends the deadline by one tick.
pub fn create_store(engine: &RenderEngine, state: RuntimeState) -> Store<RuntimeState> {
    let mut store = Store::new(engine.inner(), state);

    store.set_epoch_deadline(1);
    store.epoch_deadline_callback(|ctx| {
        if ctx.data().abort_requested() {
            Err(Trap::Interrupt.into())
        } else {
            Ok(UpdateDeadline::Continue(1))
        }
    });

    store
}
