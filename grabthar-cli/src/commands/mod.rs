//! CLI command implementations.
//!
//! Each subcommand has its own module with argument definitions and handlers.
//!
//! # Command Modules
//!
//! - [`info`] - Show a package's registry metadata
//! - [`install`] - Install one version into the live module tree
//! - [`resolve`] - Show which version would be live for a tag
//! - [`watch`] - Keep a package's live version installed until Ctrl-C

pub mod info;
pub mod install;
pub mod resolve;
pub mod watch;
