//! Recording logger, mostly for tests and embedding hosts that ship logs
//! elsewhere themselves.

use std::fmt::Arguments;
use std::sync::Mutex;

use crate::log::{LogLevel, Logger};

/// A single recorded log event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub level: LogLevel,
    pub event: String,
    pub message: String,
}

/// Logger that keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemoryLogger {
    records: Mutex<Vec<LogRecord>>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all records logged so far.
    pub fn records(&self) -> Vec<LogRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Whether an event with the given name has been logged.
    pub fn contains(&self, event: &str) -> bool {
        self.count(event) > 0
    }

    /// Number of times an event with the given name has been logged.
    pub fn count(&self, event: &str) -> usize {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|r| r.event == event)
            .count()
    }
}

impl Logger for MemoryLogger {
    fn log(&self, level: LogLevel, event: &str, args: Arguments<'_>) {
        let record = LogRecord {
            level,
            event: event.to_string(),
            message: args.to_string(),
        };
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_warn;

    #[test]
    fn test_records_events_in_order() {
        let logger = MemoryLogger::new();
        log_warn!(logger, "grabthar_first", "a={}", 1);
        logger.info("grabthar_second", format_args!("b"));

        let records = logger.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].level, LogLevel::Warn);
        assert_eq!(records[0].message, "a=1");
        assert_eq!(records[1].event, "grabthar_second");
        assert!(logger.contains("grabthar_first"));
        assert_eq!(logger.count("grabthar_missing"), 0);
    }
}
