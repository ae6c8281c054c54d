//! Logging host function implementation.
//!
//! Guest log lines are both:
//! 1. Kept in the runtime's bounded log ring for later inspection
//! 2. Emitted via `tracing` with `guest_log = true`

use ssr_runtime_core::store::{LogLevel, RuntimeState};
use tracing::{debug, error, info, warn};

/// Host implementation for the `ssr.log` import.
pub struct LoggingHost;

impl LoggingHost {
    /// Record and emit a guest log line.
    pub fn log(state: &mut RuntimeState, level: LogLevel, message: &str) {
        let runtime_id = state.runtime_id();
        match level {
            LogLevel::Debug => debug!(runtime_id, guest_log = true, "{}", message),
            LogLevel::Info => info!(runtime_id, guest_log = true, "{}", message),
            LogLevel::Warn => warn!(runtime_id, guest_log = true, "{}", message),
            LogLevel::Error => error!(runtime_id, guest_log = true, "{}", message),
        }

        state.push_log(level, message.to_string());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use ssr_runtime_core::DisabledBridge;

    #[test]
    fn test_logging_stores_in_state() {
        let mut state = RuntimeState::new("rt-log".into(), Arc::new(DisabledBridge), false);

        LoggingHost::log(&mut state, LogLevel::Info, "Hello");
        LoggingHost::log(&mut state, LogLevel::Error, "World");

        let logs: Vec<_> = state.logs().collect();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].message, "Hello");
        assert_eq!(logs[0].level, LogLevel::Info);
        assert_eq!(logs[1].message, "World");
        assert_eq!(logs[1].level, LogLevel::Error);
    }
}
