//! Configuration module for tessera.
//!
//! Settings file loading with environment variable expansion.

mod settings;

pub use settings::{
    expand_env_vars, BackendSettings, LoggingSettings, QuerySettings, Settings, SettingsError,
};
