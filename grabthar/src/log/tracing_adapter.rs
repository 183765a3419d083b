//! Tracing library adapter implementation.

use crate::log::{LogLevel, Logger};
use std::fmt::Arguments;

/// Logger implementation that forwards events to the `tracing` crate.
///
/// The event name is attached as a structured `event` field so subscribers
/// (JSON, file, stdout) can filter on it.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl TracingLogger {
    /// Create a new tracing logger adapter.
    pub fn new() -> Self {
        Self
    }
}

impl Logger for TracingLogger {
    fn log(&self, level: LogLevel, event: &str, args: Arguments<'_>) {
        match level {
            LogLevel::Debug => tracing::debug!(event = event, "{}", args),
            LogLevel::Info => tracing::info!(event = event, "{}", args),
            LogLevel::Warn => tracing::warn!(event = event, "{}", args),
            LogLevel::Error => tracing::error!(event = event, "{}", args),
        }
    }
}
