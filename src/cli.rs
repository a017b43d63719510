//! Command-line interface for sublaunch.
use std::{path::PathBuf, str::FromStr};

use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;

/// Log verbosity given by name ("info", "warning", ...) or number (0 = off .. 5 = trace).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LogLevelArg(pub LevelFilter);

const LEVELS_BY_NUMBER: [LevelFilter; 6] = [
    LevelFilter::OFF,
    LevelFilter::ERROR,
    LevelFilter::WARN,
    LevelFilter::INFO,
    LevelFilter::DEBUG,
    LevelFilter::TRACE,
];

impl LogLevelArg {
    /// Directive string accepted by `EnvFilter`.
    pub fn as_str(&self) -> &'static str {
        match self.0 {
            LevelFilter::OFF => "off",
            LevelFilter::ERROR => "error",
            LevelFilter::WARN => "warn",
            LevelFilter::INFO => "info",
            LevelFilter::DEBUG => "debug",
            LevelFilter::TRACE => "trace",
        }
    }
}

impl FromStr for LogLevelArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err("log level cannot be empty".into());
        }

        if let Ok(number) = trimmed.parse::<usize>() {
            return LEVELS_BY_NUMBER
                .get(number)
                .copied()
                .map(LogLevelArg)
                .ok_or_else(|| {
                    format!("unsupported log level number '{number}' (expected 0-5)")
                });
        }

        let normalized = match trimmed.to_ascii_lowercase().as_str() {
            "err" => "error".to_string(),
            "warning" => "warn".to_string(),
            "information" => "info".to_string(),
            other => other.to_string(),
        };

        LevelFilter::from_str(&normalized)
            .map(LogLevelArg)
            .map_err(|_| format!("invalid log level '{trimmed}'"))
    }
}

/// Command-line interface for sublaunch.
#[derive(Parser, Debug)]
#[command(name = "sublaunch", version, author)]
#[command(
    about = "Launches configured processes next to a host and kills them when it exits",
    long_about = None
)]
pub struct Cli {
    /// Override the logging verbosity for this invocation only.
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevelArg>,

    /// Host application directory; sublaunch keeps its files in `<DIR>/sublaunch`.
    /// Defaults to `$SUBLAUNCH_HOME`, then the current directory.
    #[arg(long, value_name = "DIR", global = true)]
    pub app_dir: Option<PathBuf>,

    /// The command to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for sublaunch.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Launch every enabled entry, then wait for SIGINT/SIGTERM and tear them down.
    Run {
        /// Write sublaunch's own diagnostics to this file instead of stderr.
        #[arg(long, value_name = "FILE")]
        log_file: Option<PathBuf>,
    },

    /// Write the sample configuration.
    Init {
        /// Overwrite an existing configuration file.
        #[arg(long)]
        force: bool,
    },

    /// Show the newest captured log of an entry.
    Logs {
        /// Entry name (the configured name, or the executable name).
        #[arg(short, long)]
        name: String,

        /// Number of lines to show.
        #[arg(short, long, default_value = "50")]
        lines: usize,
    },
}

/// Parses command-line arguments and returns a `Cli` struct.
pub fn parse_args() -> Cli {
    Cli::parse()
}
