//! TOML settings for sieve.
//!
//! ```toml
//! [connections.warehouse]
//! driver = "mssql"
//! connection_string = "${WAREHOUSE_CONNECTION_STRING}"
//!
//! [connections.local]
//! driver = "sqlite"
//! connection_string = "./data/cohorts.db"
//!
//! [worker]
//! path = "./sieve-worker"
//! timeout_seconds = 30
//!
//! [compiler]
//! timeout_seconds = 300
//! include_cumulative_totals = true
//! cache_hit_policy = "when_identical"
//!
//! [cache]
//! enabled = true
//! path = "~/.sieve/results.db"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::compiler::{CacheHitPolicy, CompilerOptions};
use crate::sql::Dialect;
use crate::worker::protocol::ConnectionParams;

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

    #[error("Connection not found: {0}")]
    ConnectionNotFound(String),

    #[error("Unsupported driver: {0}")]
    UnsupportedDriver(String),
}

/// Root of `sieve.toml`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub connections: HashMap<String, ConnectionSettings>,
    pub worker: WorkerSettings,
    pub compiler: CompilerSettings,
    pub cache: CacheSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionSettings {
    /// Driver name understood by the worker, or `sqlite` for the built-in
    /// executor.
    pub driver: String,

    /// Supports `${ENV_VAR}` expansion.
    pub connection_string: String,
}

impl ConnectionSettings {
    pub fn resolved_connection_string(&self) -> Result<String, SettingsError> {
        expand_env_vars(&self.connection_string)
    }

    /// The SQL dialect spoken by this connection's engine.
    pub fn dialect(&self) -> Result<Dialect, SettingsError> {
        match self.driver.to_lowercase().as_str() {
            "mssql" | "sqlserver" | "sql_server" => Ok(Dialect::TSql),
            "mysql" | "mariadb" => Ok(Dialect::MySql),
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            "duckdb" => Ok(Dialect::DuckDb),
            "sqlite" | "sqlite3" => Ok(Dialect::Sqlite),
            other => Err(SettingsError::UnsupportedDriver(other.to_string())),
        }
    }

    /// Whether queries run in-process rather than through the worker.
    pub fn is_native(&self) -> bool {
        matches!(self.dialect(), Ok(Dialect::Sqlite))
    }

    pub fn connection_params(&self) -> Result<ConnectionParams, SettingsError> {
        Ok(ConnectionParams {
            driver: self.driver.clone(),
            connection_string: self.resolved_connection_string()?,
        })
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerSettings {
    pub path: Option<String>,

    /// How long the client waits for any single response.
    pub timeout_seconds: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            path: None,
            timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CompilerSettings {
    /// Per-query timeout.
    pub timeout_seconds: u64,

    /// Also execute every sub-container, not only the root.
    pub include_cumulative_totals: bool,

    pub cache_hit_policy: CacheHitPolicy,
}

impl Default for CompilerSettings {
    fn default() -> Self {
        Self {
            timeout_seconds: 300,
            include_cumulative_totals: false,
            cache_hit_policy: CacheHitPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheSettings {
    pub enabled: bool,

    /// Defaults to `~/.sieve/results.db`.
    pub path: Option<String>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

impl Settings {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load from the first config file found.
    ///
    /// Searches in order:
    /// 1. Environment variable `SIEVE_CONFIG`
    /// 2. `./sieve.toml`
    /// 3. `~/.config/sieve/config.toml`
    ///
    /// Falls back to defaults when none exists.
    pub fn discover() -> Result<Self, SettingsError> {
        if let Ok(path) = env::var("SIEVE_CONFIG") {
            return Self::from_file(&path);
        }

        let local_config = PathBuf::from("sieve.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("sieve").join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        Ok(Settings::default())
    }

    /// Settings from an explicit file if given, otherwise [`discover`](Self::discover).
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        match path {
            Some(path) => Self::from_file(path),
            None => Self::discover(),
        }
    }

    pub fn get_connection(&self, name: &str) -> Result<&ConnectionSettings, SettingsError> {
        self.connections
            .get(name)
            .ok_or_else(|| SettingsError::ConnectionNotFound(name.to_string()))
    }

    /// Configured worker binary, with environment variables expanded.
    pub fn worker_path(&self) -> Option<PathBuf> {
        let path = self.worker.path.as_ref()?;
        expand_env_vars(path).ok().map(PathBuf::from)
    }

    /// Configured cache file, with `~` and environment variables expanded.
    pub fn cache_path(&self) -> Result<Option<PathBuf>, SettingsError> {
        let Some(path) = &self.cache.path else {
            return Ok(None);
        };
        let expanded = expand_env_vars(path)?;
        match expanded.strip_prefix("~/") {
            Some(rest) => Ok(dirs::home_dir().map(|home| home.join(rest))),
            None => Ok(Some(PathBuf::from(expanded))),
        }
    }

    pub fn compiler_options(&self) -> CompilerOptions {
        CompilerOptions {
            timeout: Duration::from_secs(self.compiler.timeout_seconds),
            include_cumulative_totals: self.compiler.include_cumulative_totals,
            cache_hit_policy: self.compiler.cache_hit_policy,
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
        if c == '$' {
            if chars.peek() == Some(&'{') {
                chars.next();
                let mut var_name = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch == '}' {
                        chars.next();
                        break;
                    }
                    var_name.push(ch);
                    chars.next();
                }
                let value = env::var(&var_name)
                    .map_err(|_| SettingsError::MissingEnvVar(var_name.clone()))?;
                result.push_str(&value);
            } else {
                let mut var_name = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_alphanumeric() || ch == '_' {
                        var_name.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if var_name.is_empty() {
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
