//! Runtime paths for configuration and per-run logs.
use std::{
    env, fs, io,
    path::{Path, PathBuf},
};

use tracing::{debug, error};

/// Environment variable naming the host application directory.
pub const HOME_ENV: &str = "SUBLAUNCH_HOME";

/// Name of the directory created under the host application directory.
const BASE_DIR_NAME: &str = "sublaunch";

/// Where sublaunch keeps its config and logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LauncherPaths {
    /// `<app dir>/sublaunch`.
    pub base_dir: PathBuf,
    /// `<base dir>/logs`.
    pub log_dir: PathBuf,
    /// `<base dir>/config.json`.
    pub config_path: PathBuf,
}

impl LauncherPaths {
    /// Lays out the directories under the given host application directory.
    pub fn under(app_dir: &Path) -> Self {
        let base_dir = app_dir.join(BASE_DIR_NAME);
        Self {
            log_dir: base_dir.join("logs"),
            config_path: base_dir.join("config.json"),
            base_dir,
        }
    }

    /// Resolves the host application directory: explicit override, then
    /// `$SUBLAUNCH_HOME`, then the current directory.
    pub fn resolve(app_dir: Option<&Path>) -> io::Result<Self> {
        let app_dir = match app_dir {
            Some(dir) => dir.to_path_buf(),
            None => match env::var_os(HOME_ENV) {
                Some(dir) if !dir.is_empty() => PathBuf::from(dir),
                _ => env::current_dir()?,
            },
        };
        Ok(Self::under(&app_dir))
    }

    /// Creates the log directory (and the base directory with it).
    ///
    /// Failures are reported and swallowed; launching continues without logs.
    pub fn ensure_directories(&self) -> bool {
        match fs::create_dir_all(&self.log_dir) {
            Ok(()) => {
                debug!("Using log directory {}", self.log_dir.display());
                true
            }
            Err(err) => {
                error!(
                    "Failed to create directory {}: {err}",
                    self.log_dir.display()
                );
                false
            }
        }
    }
}
