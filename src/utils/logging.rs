//! Gated logging macros with a per-module log target.
//!
//! Every module that uses them declares two constants:
//! ```ignore
//! const ENABLE_LOGS: bool = true;
//! const LOG_TARGET: &str = "tracker";
//! ```
//! The target lets operators narrow output with `RUST_LOG=plc=debug` without
//! knowing the module path, and `ENABLE_LOGS = false` silences a chatty
//! module entirely at compile time.

/// Info-level record on the calling module's `LOG_TARGET`.
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!(target: LOG_TARGET, $($arg)*);
        }
    };
}

/// Warn-level record on the calling module's `LOG_TARGET`.
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!(target: LOG_TARGET, $($arg)*);
        }
    };
}

/// Error-level record on the calling module's `LOG_TARGET`.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::error!(target: LOG_TARGET, $($arg)*);
        }
    };
}

/// Debug-level record on the calling module's `LOG_TARGET`.
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::debug!(target: LOG_TARGET, $($arg)*);
        }
    };
}

/// Emits only on the first occurrence and then every `every`-th one.
///
/// Used for per-cycle failures (PLC reads at poll rate) so a broken link
/// produces a readable log instead of thousands of identical lines.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    every: u64,
    count: u64,
}

impl RateLimiter {
    pub fn new(every: u64) -> Self {
        Self {
            every: every.max(1),
            count: 0,
        }
    }

    /// Counts one occurrence and reports whether it should be logged.
    pub fn hit(&mut self) -> bool {
        self.count += 1;
        self.count == 1 || self.count % self.every == 0
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }
}
