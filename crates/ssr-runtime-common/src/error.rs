//! Error types for the ssr-runtime.
//!
//! This module defines the error hierarchy using `thiserror`:
//! - [`RenderError`]: Failures on the render path (pool, runtime, guest)
//! - [`ConfigError`]: Startup validation failures
//! - [`StartupError`]: Everything that can abort process start-up

use std::io;

use thiserror::Error;

use crate::config_file::ConfigFileError;

/// Errors raised while constructing runtimes or rendering.
///
/// `RuntimeInit` is fatal at pool construction. Every other variant is
/// recoverable and is converted into an error page by the orchestrator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// A runtime could not be created or its bundle could not be evaluated.
    #[error("Runtime initialization failed: {reason}")]
    RuntimeInit {
        /// Description of the failed step.
        reason: String,
    },

    /// No runtime became available before the acquire timeout elapsed.
    #[error("Timed out waiting for an available runtime after {waited_ms}ms")]
    PoolExhausted {
        /// The acquire timeout in milliseconds.
        waited_ms: u64,
    },

    /// The render call exceeded its deadline and was aborted by the watchdog.
    #[error("Render exceeded timeout of {timeout_ms}ms")]
    Timeout {
        /// The render deadline in milliseconds.
        timeout_ms: u64,
    },

    /// The guest trapped while rendering.
    #[error("Render threw: {message}")]
    Script {
        /// Description of the trap.
        message: String,
    },

    /// The bundle broke the render contract.
    ///
    /// Raised when the render export is missing or has the wrong signature,
    /// or when its return value is not a valid string.
    #[error("Render protocol violation: {reason}")]
    Protocol {
        /// Description of the violation.
        reason: String,
    },
}

impl RenderError {
    /// Create a new `RuntimeInit` error.
    pub fn runtime_init(reason: impl Into<String>) -> Self {
        Self::RuntimeInit {
            reason: reason.into(),
        }
    }

    /// Create a new `PoolExhausted` error.
    pub fn pool_exhausted(waited_ms: u64) -> Self {
        Self::PoolExhausted { waited_ms }
    }

    /// Create a new `Timeout` error.
    pub fn timeout(timeout_ms: u64) -> Self {
        Self::Timeout { timeout_ms }
    }

    /// Create a new `Script` error.
    pub fn script(message: impl Into<String>) -> Self {
        Self::Script {
            message: message.into(),
        }
    }

    /// Create a new `Protocol` error.
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol {
            reason: reason.into(),
        }
    }

    /// Returns `true` if the runtime that produced this error must not be reused.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Script { .. })
    }

    /// Returns `true` if this error is a render deadline abort.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns `true` if this error came from an acquire timeout.
    pub fn is_pool_exhausted(&self) -> bool {
        matches!(self, Self::PoolExhausted { .. })
    }
}

/// Configuration validation errors.
///
/// Raised by [`SsrConfig::validate`](crate::SsrConfig::validate) before the
/// pool is constructed.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A configuration value is out of range or malformed.
    #[error("config '{field}' {reason}")]
    Invalid {
        /// Dotted path of the offending key.
        field: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The asset manifest required by production mode does not exist.
    #[error("asset manifest not found: {path}")]
    ManifestMissing {
        /// Manifest path as configured.
        path: String,
    },

    /// The asset manifest could not be parsed as a JSON object.
    #[error("asset manifest parse failed ({path}): {reason}")]
    ManifestParse {
        /// Manifest path as configured.
        path: String,
        /// Parser error text.
        reason: String,
    },
}

impl ConfigError {
    /// Create a new `Invalid` error.
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Errors that abort start-up.
#[derive(Error, Debug)]
pub enum StartupError {
    /// The configuration file could not be loaded.
    #[error(transparent)]
    ConfigFile(#[from] ConfigFileError),

    /// The configuration failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The runtime pool could not be constructed.
    #[error(transparent)]
    Render(#[from] RenderError),

    /// The listener could not be bound.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Address that failed to bind.
        addr: String,
        #[source]
        source: io::Error,
    },

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RenderError::timeout(50);
        assert_eq!(err.to_string(), "Render exceeded timeout of 50ms");

        let err = RenderError::pool_exhausted(10);
        assert_eq!(
            err.to_string(),
            "Timed out waiting for an available runtime after 10ms"
        );

        let err = ConfigError::invalid("runtime.render_timeout_ms", "must be in range 1..120000");
        assert_eq!(
            err.to_string(),
            "config 'runtime.render_timeout_ms' must be in range 1..120000"
        );
    }

    #[test]
    fn test_is_terminal() {
        assert!(RenderError::timeout(50).is_terminal());
        assert!(RenderError::script("unreachable").is_terminal());
        assert!(!RenderError::protocol("missing render").is_terminal());
        assert!(!RenderError::pool_exhausted(5).is_terminal());
        assert!(!RenderError::runtime_init("bad bundle").is_terminal());
    }

    #[test]
    fn test_predicates() {
        assert!(RenderError::timeout(1).is_timeout());
        assert!(!RenderError::script("x").is_timeout());
        assert!(RenderError::pool_exhausted(1).is_pool_exhausted());
        assert!(!RenderError::timeout(1).is_pool_exhausted());
    }

    #[test]
    fn test_startup_error_from_render() {
        let err: StartupError = RenderError::runtime_init("missing memory export").into();
        assert!(matches!(err, StartupError::Render(_)));
        assert!(err.to_string().contains("missing memory export"));
    }
}
