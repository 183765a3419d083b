//! Logger trait definition.

use std::fmt::Arguments;

/// Log level for filtering messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Debugging information
    Debug,
    /// General information
    Info,
    /// Warning messages
    Warn,
    /// Error messages
    Error,
}

impl LogLevel {
    /// Lower-case name of the level, as it appears in recorded output.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Logging interface for watcher components.
///
/// Every message carries a stable event name (for example
/// `grabthar_poll_error`) so hosts can route or count events without parsing
/// free-form text, plus a formatted human-readable message.
///
/// Implementations must be `Send + Sync`; a single logger is shared by every
/// poller, installer and registry client of a watcher.
///
/// # Example
///
/// ```
/// use grabthar::log::{Logger, NoOpLogger};
/// use grabthar::log_info;
/// use std::sync::Arc;
///
/// let logger: Arc<dyn Logger> = Arc::new(NoOpLogger);
/// log_info!(logger, "grabthar_example", "installed {}@{}", "my-module", "1.0.0");
/// ```
pub trait Logger: Send + Sync {
    /// Log an event at the specified level.
    fn log(&self, level: LogLevel, event: &str, args: Arguments<'_>);

    /// Log a debug-level event.
    fn debug(&self, event: &str, args: Arguments<'_>) {
        self.log(LogLevel::Debug, event, args);
    }

    /// Log an info-level event.
    fn info(&self, event: &str, args: Arguments<'_>) {
        self.log(LogLevel::Info, event, args);
    }

    /// Log a warning-level event.
    fn warn(&self, event: &str, args: Arguments<'_>) {
        self.log(LogLevel::Warn, event, args);
    }

    /// Log an error-level event.
    fn error(&self, event: &str, args: Arguments<'_>) {
        self.log(LogLevel::Error, event, args);
    }
}

#[macro_export]
macro_rules! log_debug {
    ($logger:expr, $event:expr, $($arg:tt)*) => {
        $logger.debug($event, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_info {
    ($logger:expr, $event:expr, $($arg:tt)*) => {
        $logger.info($event, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_warn {
    ($logger:expr, $event:expr, $($arg:tt)*) => {
        $logger.warn($event, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_error {
    ($logger:expr, $event:expr, $($arg:tt)*) => {
        $logger.error($event, format_args!($($arg)*))
    };
}
