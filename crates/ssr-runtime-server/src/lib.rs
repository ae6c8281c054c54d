//! Render orchestrator and HTTP server for ssr-runtime.
//!
//! This crate turns pooled wasm render runtimes into HTML responses. It
//! handles:
//!
//! - Request context (locale, theme, cookies, headers) for the guest
//! - Render envelopes, document shell wrapping and asset resolution
//! - Request ids, CSP nonces and security headers
//! - Render metrics with a Prometheus exposition
//! - HTTP routing, the dev asset proxy and health checks
//!
//! # Quick Start
//!
//! ```ignore
//! use ssr_runtime_common::ConfigFile;
//! use ssr_runtime_server::{ServerConfig, SsrServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let file = ConfigFile::from_file("ssr.toml")?;
//!     let validated = file.ssr.validate()?;
//!
//!     let server = SsrServer::new(&validated, ServerConfig::from_file(&file.server)?)?;
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod assets;
pub mod context;
pub mod dev_proxy;
pub mod envelope;
pub mod handler;
pub mod locale;
pub mod metrics;
pub mod orchestrator;
pub mod request;
pub mod response;
pub mod router;
pub mod security;
pub mod server;
pub mod shell;
pub mod state;

pub use metrics::{MetricsSnapshot, RenderMetrics};
pub use orchestrator::{RenderOptions, RenderOrchestrator};
pub use request::InboundRequest;
pub use response::RenderResponse;
pub use server::{ServerConfig, SsrServer, TestHandle};
pub use state::AppState;
