//! Sublaunch starts a configured set of external processes next to a long-running host
//! application, records their output into per-run log files, and kills the flagged ones
//! (descendants included) when the host shuts down.

/// CLI interface.
pub mod cli;

/// Configuration management.
pub mod config;

/// Error handling.
pub mod error;

/// Per-run log files.
pub mod logs;

/// Process tree enumeration and termination.
pub mod process_tree;

/// Runtime directory layout.
pub mod runtime;

/// Host shutdown hook.
pub mod shutdown;

/// Launch and teardown of supervised processes.
pub mod supervisor;

#[doc(hidden)]
pub mod test_utils;
