//! The sink a loader reports contained batch failures to.

use tracing::Level;

/// Receives reports of failures that the loader contained on its own, such
/// as a panicking batch function. Callers still see these failures as
/// errors on their thunks; the logger is for the operator.
pub trait Logger: Send + Sync {
    fn log(&self, level: Level, message: &str);
}

/// The default logger. Emits `tracing` events with the `thunkloader`
/// target, so they're filtered and formatted by whatever subscriber the
/// application installs.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, level: Level, message: &str) {
        match level {
            Level::ERROR => tracing::error!(target: "thunkloader", "{}", message),
            Level::WARN => tracing::warn!(target: "thunkloader", "{}", message),
            Level::INFO => tracing::info!(target: "thunkloader", "{}", message),
            Level::DEBUG => tracing::debug!(target: "thunkloader", "{}", message),
            _ => tracing::trace!(target: "thunkloader", "{}", message),
        }
    }
}

/// A logger that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentLogger;

impl Logger for SilentLogger {
    fn log(&self, _level: Level, _message: &str) {}
}
