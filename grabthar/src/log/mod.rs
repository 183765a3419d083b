//! Logging abstraction layer.
//!
//! Components never call a logging backend directly; they hold an
//! `Arc<dyn Logger>` supplied by the host. This keeps the engine usable from
//! hosts that have their own log pipeline.
//!
//! - [`Logger`]: the interface (`log(level, event, args)` plus level helpers)
//! - [`TracingLogger`]: forwards to `tracing`
//! - [`NoOpLogger`]: discards everything
//! - [`MemoryLogger`]: records events for inspection
//!
//! ```
//! use grabthar::log::{Logger, MemoryLogger};
//! use grabthar::log_info;
//!
//! let logger = MemoryLogger::new();
//! log_info!(logger, "grabthar_install_complete", "installed {}", "my-module@1.0.0");
//! assert!(logger.contains("grabthar_install_complete"));
//! ```

mod memory;
mod noop;
mod tracing_adapter;
mod r#trait;

pub use memory::{LogRecord, MemoryLogger};
pub use noop::NoOpLogger;
pub use r#trait::{LogLevel, Logger};
pub use tracing_adapter::TracingLogger;
