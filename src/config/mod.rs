//! Configuration module for tether.
//!
//! Handles the worker process command line, restart policy, call timeouts,
//! and answer cache sizing.

mod settings;

pub use settings::{
    expand_env_vars, CacheSettings, RestartSettings, Settings, SettingsError, WorkerSettings,
};
