//! Error handling for sublaunch.
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while starting a configured process.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// The argument string could not be split into words (e.g. an unclosed quote).
    #[error("Invalid arguments for '{name}': {source}")]
    InvalidArguments {
        /// The entry whose arguments failed to parse.
        name: String,
        /// The underlying parse error.
        #[source]
        source: shell_words::ParseError,
    },

    /// The entry has no executable path configured.
    #[error("Entry '{name}' has no executable path")]
    MissingPath {
        /// The entry name.
        name: String,
    },

    /// The OS refused to spawn the process.
    #[error("Failed to launch '{name}' ({path}): {source}")]
    Spawn {
        /// The entry name.
        name: String,
        /// The executable that failed to start.
        path: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },
}

/// Error creating a per-run log file.
#[derive(Debug, Error)]
#[error("Failed to open log file {path:?}: {source}")]
pub struct LogOpenError {
    /// The log file that could not be created.
    pub path: PathBuf,
    /// The underlying error that occurred.
    #[source]
    pub source: std::io::Error,
}

/// Errors raised while killing a process tree.
#[derive(Debug, Error)]
pub enum TerminationError {
    /// Not allowed to signal the process.
    #[error("Insufficient permissions to terminate PID {pid}")]
    PermissionDenied {
        /// Target process.
        pid: u32,
    },

    /// Any other failure to deliver the signal.
    #[error("Failed to terminate PID {pid}: {source}")]
    Signal {
        /// Target process.
        pid: u32,
        /// The errno reported by the kernel.
        #[source]
        source: nix::errno::Errno,
    },

    /// Waiting on the root process failed.
    #[error("Failed to reap PID {pid}: {source}")]
    Reap {
        /// Target process.
        pid: u32,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },
}

/// Errors reading or writing the persisted configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Error reading the configuration file.
    #[error("Failed to read config file {path:?}: {source}")]
    Read {
        /// Path that was read.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// Error parsing the JSON document.
    #[error("Invalid JSON in {path:?}: {source}")]
    Parse {
        /// Path that was parsed.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: serde_json::Error,
    },

    /// Error writing the sample configuration.
    #[error("Failed to write config file {path:?}: {source}")]
    Write {
        /// Path that was written.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// Error serializing the configuration.
    #[error("Failed to serialize config: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// Top-level error surfaced by the `sublaunch` binary.
#[derive(Debug, Error)]
pub enum LauncherError {
    /// Configuration error.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Plain I/O error (directories, diagnostics file, log tailing).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error installing the shutdown signal handler.
    #[error("Failed to install shutdown handler: {0}")]
    SignalHandler(#[from] ctrlc::Error),
}
