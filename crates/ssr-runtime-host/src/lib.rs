//! Host functions implementation for ssr-runtime.
//!
//! This crate provides the host side of the render bundle's imports.
//!
//! # Interfaces
//!
//! - [`linker`]: Registers the bridge, logging, scheduler and WASI imports
//! - [`api_bridge`]: Policy-checked dispatch of guest bridge requests
//! - [`policy`]: Method, path and body-size rules for the bridge
//! - [`logging`]: Structured logging from guest code
//!
//! # Security Model
//!
//! The bridge is the guest's only way to reach the host. It is disabled
//! unless configured, and every request is checked against the method and
//! path allow-lists and the body size limit before a handler sees it.

pub mod api_bridge;
pub mod linker;
pub mod logging;
pub mod policy;

pub use api_bridge::{ApiBridge, BridgeHandler, default_handler};
pub use linker::create_linker;
pub use logging::LoggingHost;
pub use policy::BridgePolicy;
