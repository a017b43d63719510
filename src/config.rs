//! Configuration management for sublaunch.
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::OnceLock,
};
use tracing::{debug, error, info, warn};

use crate::error::ConfigError;

/// Represents the structure of the configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LauncherConfig {
    /// Processes to launch, in launch order.
    #[serde(default)]
    pub entries: Vec<ProcessEntry>,
}

/// Configuration for one process launched next to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessEntry {
    /// Whether the entry is launched at all.
    #[serde(rename = "IsEnabled")]
    pub enabled: bool,
    /// Display name, also used for the log file. Empty means the executable name.
    #[serde(rename = "Name")]
    pub name: String,
    /// Executable to start.
    #[serde(rename = "Path")]
    pub path: String,
    /// Shell-style argument string.
    #[serde(rename = "Arguments")]
    pub arguments: String,
    /// Working directory; `None` or empty uses the host's directory.
    #[serde(rename = "WorkingDirectory")]
    pub working_directory: Option<String>,
    /// Start GUI programs minimized.
    #[serde(rename = "Minimized")]
    pub minimized: bool,
    /// Run console programs without a window (no terminal input on Unix).
    #[serde(rename = "NoGUI")]
    pub hide_window: bool,
    /// Record stdout/stderr into a per-run log file.
    #[serde(rename = "UseLog")]
    pub capture_output: bool,
    /// Kill the process tree when the host exits.
    #[serde(rename = "KillOnQuit")]
    pub kill_on_shutdown: bool,
}

impl Default for ProcessEntry {
    fn default() -> Self {
        Self {
            enabled: true,
            name: String::new(),
            path: String::new(),
            arguments: String::new(),
            working_directory: None,
            minimized: false,
            hide_window: false,
            capture_output: false,
            kill_on_shutdown: false,
        }
    }
}

impl ProcessEntry {
    /// Name used for diagnostics and log files: `name`, or the executable's file stem.
    pub fn resolved_name(&self) -> String {
        let trimmed = self.name.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }

        Path::new(self.path.trim())
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .filter(|stem| !stem.is_empty())
            .unwrap_or_else(|| "process".to_string())
    }

    /// Working directory override, ignoring blank values.
    pub fn working_dir(&self) -> Option<PathBuf> {
        self.working_directory
            .as_deref()
            .map(str::trim)
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from)
    }

    fn expand_env(&mut self) {
        self.path = expand_env_vars(&self.path);
        self.arguments = expand_env_vars(&self.arguments);
        if let Some(dir) = self.working_directory.as_mut() {
            *dir = expand_env_vars(dir);
        }
    }
}

impl LauncherConfig {
    /// Sample written on first run: one short console job and one long-running program.
    pub fn sample(base_dir: &Path) -> Self {
        Self {
            entries: vec![
                ProcessEntry {
                    name: "CUI Sample".into(),
                    path: "/bin/ls".into(),
                    arguments: "-la".into(),
                    working_directory: Some(base_dir.to_string_lossy().into_owned()),
                    hide_window: true,
                    capture_output: true,
                    kill_on_shutdown: true,
                    ..ProcessEntry::default()
                },
                ProcessEntry {
                    name: "GUI Sample".into(),
                    path: "/bin/sleep".into(),
                    arguments: "3600".into(),
                    minimized: true,
                    ..ProcessEntry::default()
                },
            ],
        }
    }

    /// Iterates the entries that should be launched.
    pub fn enabled_entries(&self) -> impl Iterator<Item = &ProcessEntry> {
        self.entries.iter().filter(|entry| entry.enabled)
    }

    /// Serializes the configuration as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Writes the configuration to `path`, replacing any existing file.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let json = self.to_json()?;
        fs::write(path, json).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn env_var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var pattern")
    })
}

/// Expands `${VAR}` references. Unknown variables are left untouched.
fn expand_env_vars(input: &str) -> String {
    env_var_pattern()
        .replace_all(input, |caps: &regex::Captures| {
            let var_name = &caps[1];
            match env::var(var_name) {
                Ok(value) => value,
                Err(_) => {
                    warn!("Missing environment variable: {var_name}");
                    caps[0].to_string()
                }
            }
        })
        .into_owned()
}

/// Loads and parses the configuration file, expanding environment variables.
pub fn load_config(path: &Path) -> Result<LauncherConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let mut config: LauncherConfig =
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

    for entry in &mut config.entries {
        entry.expand_env();
    }

    debug!(
        "Loaded {} entries from {}",
        config.entries.len(),
        path.display()
    );
    Ok(config)
}

/// Loads the configuration, writing a sample first if none exists.
///
/// Errors never escape: a missing file yields the sample (persisted when possible) and an
/// unreadable or malformed file yields an empty configuration.
pub fn load_config_or_default(path: &Path, base_dir: &Path) -> LauncherConfig {
    if !path.exists() {
        let sample = LauncherConfig::sample(base_dir);
        match sample.save(path) {
            Ok(()) => info!("Wrote sample config to {}", path.display()),
            Err(err) => error!("Failed to save default config: {err}"),
        }
        return sample;
    }

    match load_config(path) {
        Ok(config) => config,
        Err(err) => {
            error!("Failed to load config: {err}");
            LauncherConfig::default()
        }
    }
}
