//! Common types, errors, and configuration for ssr-runtime.
//!
//! This crate provides shared functionality used across the ssr-runtime workspace:
//! - Error types using `thiserror` for type-safe error handling
//! - Configuration structures and their start-up validation
//! - Host bridge wire types shared by the runtime and the bridge dispatcher

pub mod bridge;
pub mod config;
pub mod config_file;
pub mod error;
pub mod validate;

pub use bridge::{BridgeRequest, BridgeResponse};
pub use config::{
    ApiBridgeConfig, AssetsConfig, DevConfig, EngineConfig, I18nConfig, LogFormat,
    LoggingConfig, RecyclePolicy, RequestContextConfig, RuntimeConfig, SsrConfig, ThemeConfig,
};
pub use config_file::{ConfigFile, ConfigFileError, ServerConfigFile};
pub use error::{ConfigError, RenderError, StartupError};
pub use validate::{AssetMode, ValidatedConfig};
