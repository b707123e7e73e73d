//! Cooperative cancellation
//!
//! The spooler stops a job by signalling the backend process. The signal
//! handler only flips a shared atomic flag; every long-running operation
//! samples a [`StopToken`] between blocking calls and terminates cleanly at
//! the next transition boundary.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use signal_hook::consts::{SIGINT, SIGPIPE, SIGTERM};
use signal_hook::{flag, low_level};

/// Owner of the cancellation flag
///
/// Created once by the orchestrator; [`StopToken`]s are handed to
/// controllers and the signal handler. Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct StopSource {
    flag: Arc<AtomicBool>,
}

impl StopSource {
    /// Create a new, unsignalled stop source
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn request_stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Get a token observing this source
    #[must_use]
    pub fn token(&self) -> StopToken {
        StopToken {
            flag: Arc::clone(&self.flag),
        }
    }
}

/// Shared view of a cancellation flag
#[derive(Debug, Clone)]
pub struct StopToken {
    flag: Arc<AtomicBool>,
}

impl StopToken {
    /// Whether cancellation has been requested
    #[must_use]
    pub fn stop_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleep for `duration`, returning early once cancellation is observed
    pub fn sleep_for(&self, duration: Duration) {
        const SLICE: Duration = Duration::from_millis(50);
        let deadline = Instant::now() + duration;
        while !self.stop_requested() {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                break;
            };
            thread::sleep(remaining.min(SLICE));
        }
    }
}

/// Register the spooler signal contract against `source`
///
/// SIGTERM and SIGINT flip the cancellation flag. SIGPIPE gets a no-op
/// handler so a dying spooler pipe surfaces as `EPIPE` on the next write
/// instead of killing the process.
///
/// # Errors
/// Returns an error if a handler cannot be registered.
pub fn install_signal_handlers(source: &StopSource) -> io::Result<()> {
    flag::register(SIGTERM, Arc::clone(&source.flag))?;
    flag::register(SIGINT, Arc::clone(&source.flag))?;
    unsafe { low_level::register(SIGPIPE, || {}) }?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_observes_source() {
        let source = StopSource::new();
        let token = source.token();
        assert!(!token.stop_requested());
        source.request_stop();
        assert!(token.stop_requested());
        assert!(token.clone().stop_requested());
    }

    #[test]
    fn cancelled_sleep_returns_immediately() {
        let source = StopSource::new();
        source.request_stop();
        let started = Instant::now();
        source.token().sleep_for(Duration::from_secs(10));
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
