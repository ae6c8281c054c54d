//! Render deadline enforcement.
//!
//! A [`Watchdog`] is armed for one render call. If the call outlives its
//! deadline the watchdog raises the runtime's abort flag and bumps the engine
//! epoch, which makes the store's deadline callback trap the guest.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::warn;

use crate::RenderEngine;

#[derive(Default)]
struct Signal {
    done: Mutex<bool>,
    wake: Condvar,
}

/// A one-shot deadline guard for a single render call.
///
/// Disarming joins the watchdog thread, so once [`Watchdog::disarm`]
/// returns the flag can no longer be raised for this call.
pub struct Watchdog {
    signal: Arc<Signal>,
    fired: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Watchdog {
    /// Arm a watchdog that aborts the guest after `timeout`.
    pub fn arm(engine: &RenderEngine, abort: Arc<AtomicBool>, timeout: Duration) -> Self {
        let signal = Arc::new(Signal::default());
        let fired = Arc::new(AtomicBool::new(false));
        let deadline = Instant::now() + timeout;

        let thread_signal = Arc::clone(&signal);
        let thread_fired = Arc::clone(&fired);
        let engine = engine.clone();

        let spawned = std::thread::Builder::new()
            .name("ssr-watchdog".to_string())
            .spawn(move || {
                let mut done = thread_signal.done.lock();
                while !*done {
                    if thread_signal.wake.wait_until(&mut done, deadline).timed_out() {
                        if !*done {
                            abort.store(true, Ordering::Release);
                            thread_fired.store(true, Ordering::Release);
                            engine.increment_epoch();
                        }
                        break;
                    }
                }
            });

        let handle = match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(error = %e, "Failed to spawn render watchdog; render runs unguarded");
                None
            }
        };

        Self {
            signal,
            fired,
            handle,
        }
    }

    /// Stop the watchdog and wait for its thread to exit.
    ///
    /// Returns `true` if the deadline had already fired.
    pub fn disarm(mut self) -> bool {
        self.stop();
        self.fired.load(Ordering::Acquire)
    }

    fn stop(&mut self) {
        {
            let mut done = self.signal.done.lock();
            *done = true;
        }
        self.signal.wake.notify_all();

        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Watchdog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watchdog")
            .field("armed", &self.handle.is_some())
            .field("fired", &self.fired.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ssr_runtime_common::EngineConfig;

    fn engine() -> RenderEngine {
        RenderEngine::new(&EngineConfig::default(), 1).unwrap()
    }

    #[test]
    fn test_disarm_before_deadline() {
        let abort = Arc::new(AtomicBool::new(false));
        let watchdog = Watchdog::arm(&engine(), Arc::clone(&abort), Duration::from_secs(5));

        let started = Instant::now();
        assert!(!watchdog.disarm());
        assert!(!abort.load(Ordering::Acquire));
        // Disarm wakes the thread instead of waiting out the deadline
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_fires_after_deadline() {
        let abort = Arc::new(AtomicBool::new(false));
        let watchdog = Watchdog::arm(&engine(), Arc::clone(&abort), Duration::from_millis(10));

        std::thread::sleep(Duration::from_millis(100));

        assert!(abort.load(Ordering::Acquire));
        assert!(watchdog.disarm());
    }

    #[test]
    fn test_drop_disarms() {
        let abort = Arc::new(AtomicBool::new(false));
        {
            let _watchdog = Watchdog::arm(&engine(), Arc::clone(&abort), Duration::from_millis(50));
        }
        std::thread::sleep(Duration::from_millis(100));
        assert!(!abort.load(Ordering::Acquire));
    }
}
