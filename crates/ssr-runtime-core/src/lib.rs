//! Core Wasmtime runtime for ssr-runtime.
//!
//! This crate provides the render execution machinery:
//! - [`RenderEngine`]: Shared Wasmtime engine with epoch interruption
//! - [`RenderBundle`]: The compiled render bundle
//! - [`RenderRuntime`]: One store plus one bundle instance
//! - [`RuntimePool`] and [`Lease`]: Bounded, recyclable runtime pool
//! - [`HostBridge`]: Seam for the guest-to-host bridge
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     RenderEngine                        │
//! │  (Shared, thread-safe, epoch interruption)              │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                     RenderBundle                        │
//! │  (Compiled once, instantiated per runtime)              │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │          RuntimePool ─► Lease ─► RenderRuntime          │
//! │  (N isolated stores, one render at a time each)         │
//! │  - Guest globals persist across renders                 │
//! │  - Watchdog aborts renders past their deadline          │
//! │  - Faulted runtimes are replaced on release             │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod abi;
pub mod bridge;
pub mod bundle;
pub mod engine;
pub mod pool;
pub mod runtime;
pub mod store;
pub mod watchdog;

pub use bridge::{DisabledBridge, HostBridge, dispatch_json};
pub use bundle::RenderBundle;
pub use engine::RenderEngine;
pub use pool::{Lease, PoolStats, RuntimeFactory, RuntimePool};
pub use runtime::{RenderRuntime, RuntimeStatus};
pub use store::{LogEntry, LogLevel, RuntimeState, TaskQueue};
pub use watchdog::Watchdog;
