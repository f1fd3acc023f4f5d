//! TOML-based configuration for tether.
//!
//! Supports a config file (tether.toml) with environment variable expansion.
//!
//! Example configuration:
//! ```toml
//! [worker]
//! program = "python3"
//! args = ["python-services/vector_daemon.py"]
//! timeout_seconds = 30
//!
//! [worker.restart]
//! max_restarts = 5
//! window_seconds = 60
//! delay_ms = 2000
//!
//! [cache]
//! enabled = true
//! ttl_seconds = 3600
//! max_entries = 100
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Worker process configuration.
    pub worker: WorkerSettings,

    /// Answer cache configuration.
    pub cache: CacheSettings,
}

/// Worker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Program to run (supports ${ENV_VAR} expansion via
    /// [`WorkerSettings::resolved_program`]).
    pub program: String,

    /// Program arguments.
    pub args: Vec<String>,

    /// Per-call timeout in seconds.
    pub timeout_seconds: u64,

    /// Restart policy.
    pub restart: RestartSettings,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            args: vec!["python-services/vector_daemon.py".to_string()],
            timeout_seconds: 30,
            restart: RestartSettings::default(),
        }
    }
}

impl WorkerSettings {
    /// Get the program with environment variables expanded.
    pub fn resolved_program(&self) -> Result<String, SettingsError> {
        expand_env_vars(&self.program)
    }
}

/// Restart budget settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RestartSettings {
    /// Restarts permitted within one window before giving up.
    pub max_restarts: u32,

    /// Rolling budget window in seconds.
    pub window_seconds: u64,

    /// Delay between a crash and the next spawn attempt, in milliseconds.
    pub delay_ms: u64,
}

impl Default for RestartSettings {
    fn default() -> Self {
        Self {
            max_restarts: 5,
            window_seconds: 60,
            delay_ms: 2000,
        }
    }
}

/// Answer cache settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Enable answer caching.
    pub enabled: bool,

    /// Cache TTL in seconds.
    pub ttl_seconds: u64,

    /// Maximum number of cached answers.
    pub max_entries: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_seconds: 3600,
            max_entries: 100,
        }
    }
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        Ok(settings)
    }

    /// Load settings from the default config file locations.
    ///
    /// Searches in order:
    /// 1. Environment variable `TETHER_CONFIG`
    /// 2. `./tether.toml`
    /// 3. `~/.config/tether/config.toml`
    pub fn load() -> Result<Self, SettingsError> {
        if let Ok(path) = env::var("TETHER_CONFIG") {
            return Self::from_file(&path);
        }

        let local_config = PathBuf::from("tether.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("tether").join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        Ok(Settings::default())
    }
}

/// Expand environment variables in a string.
///
/// Supports `${VAR}` and `$VAR` syntax.
pub fn expand_env_vars(s: &str) -> Result<String, SettingsError> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' {
            if chars.peek() == Some(&'{') {
                chars.next(); // consume '{'
                let mut var_name = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch == '}' {
                        chars.next(); // consume '}'
                        break;
                    }
                    var_name.push(chars.next().unwrap());
                }
                let value = env::var(&var_name)
                    .map_err(|_| SettingsError::MissingEnvVar(var_name.clone()))?;
                result.push_str(&value);
            } else {
                // $VAR (ends at non-alphanumeric/underscore)
                let mut var_name = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_alphanumeric() || ch == '_' {
                        var_name.push(chars.next().unwrap());
                    } else {
                        break;
                    }
                }
                if var_name.is_empty() {
                    // Just a lone $, keep it
                    result.push('$');
                } else {
                    let value = env::var(&var_name)
                        .map_err(|_| SettingsError::MissingEnvVar(var_name.clone()))?;
                    result.push_str(&value);
                }
            }
        } else {
            result.push(c);
        }
    }

    Ok(result)
}
