//! TOML-based configuration for tessera.
//!
//! Supports a config file (tessera.toml) with environment variable expansion.
//!
//! Example configuration:
//! ```toml
//! [backend]
//! version = "6.8.2"
//! index_prefix = "${TESSERA_INDEX_PREFIX}"
//! timeout_seconds = 30
//!
//! [query]
//! default_limit = 10
//! max_limit = 10000
//! overflow = "other"
//!
//! [logging]
//! level = "tessera=debug"
//! json = false
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::aggs::CompileOptions;
use crate::decoder::OverflowPolicy;
use crate::query::DEFAULT_LIMIT;

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

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub backend: BackendSettings,
    pub query: QuerySettings,
    pub logging: LoggingSettings,
}

/// The search backend queries are compiled for.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendSettings {
    /// Version the backend reports; picks the compiler.
    pub version: String,

    /// Prepended to every table name (supports ${ENV_VAR} expansion).
    pub index_prefix: String,

    /// Seconds to wait for one search; no limit when absent.
    pub timeout_seconds: Option<u64>,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            version: "6.8.2".to_string(),
            index_prefix: String::new(),
            timeout_seconds: None,
        }
    }
}

impl BackendSettings {
    /// The index prefix with environment variables expanded.
    pub fn prefix(&self) -> Result<String, SettingsError> {
        expand_env_vars(&self.index_prefix)
    }

    /// Index name for `table`, with the prefix expanded.
    pub fn index_for(&self, table: &str) -> Result<String, SettingsError> {
        Ok(format!("{}{}", self.prefix()?, table))
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_seconds.map(Duration::from_secs)
    }
}

/// Query compilation defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QuerySettings {
    /// Rows, or partitions per discovered edge, when a query does not say.
    pub default_limit: usize,

    /// Upper bound on any requested limit.
    pub max_limit: Option<usize>,

    /// What happens to discovered values beyond an edge's limit.
    pub overflow: OverflowPolicy,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_LIMIT,
            max_limit: None,
            overflow: OverflowPolicy::Drop,
        }
    }
}

/// Logging output.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Filter directives, overridden by `RUST_LOG`.
    pub level: String,

    /// One JSON object per event.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
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
        Self::from_toml(&content)
    }

    /// Parse and check settings.
    pub fn from_toml(content: &str) -> Result<Self, SettingsError> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from the default config file locations.
    ///
    /// Searches in order:
    /// 1. Environment variable `TESSERA_CONFIG`
    /// 2. `./tessera.toml`
    /// 3. `~/.config/tessera/config.toml`
    pub fn load() -> Result<Self, SettingsError> {
        if let Ok(path) = env::var("TESSERA_CONFIG") {
            return Self::from_file(&path);
        }

        let local_config = PathBuf::from("tessera.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("tessera").join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        Ok(Settings::default())
    }

    fn validate(&self) -> Result<(), SettingsError> {
        if self.query.default_limit == 0 {
            return Err(SettingsError::InvalidConfig(
                "query.default_limit must be positive".to_string(),
            ));
        }
        if let Some(max) = self.query.max_limit {
            if max < self.query.default_limit {
                return Err(SettingsError::InvalidConfig(format!(
                    "query.max_limit {} is below query.default_limit {}",
                    max, self.query.default_limit
                )));
            }
        }
        Ok(())
    }

    /// Compiler options from the `[query]` table.
    pub fn to_compile_options(&self) -> CompileOptions {
        let options = CompileOptions::default()
            .with_default_limit(self.query.default_limit)
            .with_overflow(self.query.overflow);
        match self.query.max_limit {
            Some(max) => options.with_max_limit(max),
            None => options,
        }
    }
}

/// Expand environment variables in a string.
///
/// Supports `${VAR}` and `$VAR` syntax.
pub fn expand_env_vars(s: &str) -> Result<String, SettingsError> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }
        let var_name: String = if chars.peek() == Some(&'{') {
            chars.next();
            chars.by_ref().take_while(|&ch| ch != '}').collect()
        } else {
            let mut name = String::new();
            while let Some(ch) = chars.next_if(|ch| ch.is_alphanumeric() || *ch == '_') {
                name.push(ch);
            }
            if name.is_empty() {
                // lone $
                result.push('$');
                continue;
            }
            name
        };
        let value = env::var(&var_name).map_err(|_| SettingsError::MissingEnvVar(var_name.clone()))?;
        result.push_str(&value);
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars_braces() {
        env::set_var("TESSERA_TEST_VAR", "hello");
        assert_eq!(expand_env_vars("${TESSERA_TEST_VAR}").unwrap(), "hello");
        assert_eq!(
            expand_env_vars("prefix_${TESSERA_TEST_VAR}_suffix").unwrap(),
            "prefix_hello_suffix"
        );
        env::remove_var("TESSERA_TEST_VAR");
    }

    #[test]
    fn test_expand_env_vars_no_braces() {
        env::set_var("TESSERA_TEST_VAR2", "world");
        assert_eq!(expand_env_vars("$TESSERA_TEST_VAR2").unwrap(), "world");
        assert_eq!(expand_env_vars("$TESSERA_TEST_VAR2!").unwrap(), "world!");
        assert_eq!(expand_env_vars("cost $ 5").unwrap(), "cost $ 5");
        env::remove_var("TESSERA_TEST_VAR2");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("${NONEXISTENT_VAR_12345}");
        assert!(matches!(result, Err(SettingsError::MissingEnvVar(_))));
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
[backend]
version = "7.10.2"
index_prefix = "prod-"
timeout_seconds = 5

[query]
default_limit = 20
max_limit = 500
overflow = "other"

[logging]
json = true
"#;

        let settings = Settings::from_toml(toml).unwrap();

        assert_eq!(settings.backend.version, "7.10.2");
        assert_eq!(settings.backend.index_for("bugs").unwrap(), "prod-bugs");
        assert_eq!(settings.backend.timeout(), Some(Duration::from_secs(5)));
        assert_eq!(settings.query.overflow, OverflowPolicy::Other);
        assert!(settings.logging.json);
        assert_eq!(settings.logging.level, "info");

        let options = settings.to_compile_options();
        assert_eq!(options.limit(None), 20);
        assert_eq!(options.limit(Some(1000)), 500);
        assert_eq!(options.overflow, OverflowPolicy::Other);
    }

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();

        assert_eq!(settings.query.default_limit, 10);
        assert_eq!(settings.query.overflow, OverflowPolicy::Drop);
        assert!(settings.backend.timeout().is_none());
        assert!(!settings.logging.json);
    }

    #[test]
    fn test_invalid_limits() {
        let toml = "[query]\ndefault_limit = 50\nmax_limit = 10\n";
        assert!(matches!(
            Settings::from_toml(toml),
            Err(SettingsError::InvalidConfig(_))
        ));
    }
}
