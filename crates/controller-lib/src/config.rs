//! Typed controller configuration
//!
//! Every task kind has its own metadata schema. Unknown metadata keys are
//! rejected at deserialisation time and the remaining invariants are checked
//! by [`ControllerConfig::validate`], so task constructors only ever see a
//! well-formed value.

use serde::Deserialize;
use thiserror::Error;

/// Default retention for OOM events in days
pub const DEFAULT_RETENTION_DAYS: u32 = 7;

/// Configuration validation failures
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("cluster_id must not be empty")]
    MissingClusterId,

    #[error("database.{field} is required for the {engine} engine")]
    MissingDatabaseField {
        engine: &'static str,
        field: &'static str,
    },

    #[error("database.max_connections must be greater than zero")]
    ZeroConnections,

    #[error("oom.channel_capacity must be greater than zero")]
    ZeroChannelCapacity,
}

/// Top-level controller configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    /// Cluster this controller instance is responsible for
    #[serde(default)]
    pub cluster_id: String,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub oom: OomConfig,

    #[serde(default)]
    pub tasks: TasksConfig,
}

impl ControllerConfig {
    /// Check invariants serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cluster_id.trim().is_empty() {
            return Err(ConfigError::MissingClusterId);
        }
        self.database.validate()?;
        if self.oom.channel_capacity == 0 {
            return Err(ConfigError::ZeroChannelCapacity);
        }
        Ok(())
    }
}

/// Backing engine for the stat store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseEngine {
    #[default]
    Sqlite,
    Postgres,
}

impl DatabaseEngine {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseEngine::Sqlite => "sqlite",
            DatabaseEngine::Postgres => "postgres",
        }
    }
}

/// Connection settings for the stat store
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub engine: DatabaseEngine,

    /// SQLite file path, or `:memory:`
    #[serde(default = "default_sqlite_path")]
    pub path: String,

    #[serde(default)]
    pub host: String,

    #[serde(default = "default_postgres_port")]
    pub port: u16,

    /// Postgres database name
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub user: String,

    #[serde(default)]
    pub password: String,

    #[serde(default = "default_ssl_mode")]
    pub ssl_mode: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            engine: DatabaseEngine::default(),
            path: default_sqlite_path(),
            host: String::new(),
            port: default_postgres_port(),
            name: String::new(),
            user: String::new(),
            password: String::new(),
            ssl_mode: default_ssl_mode(),
            max_connections: default_max_connections(),
        }
    }
}

impl DatabaseConfig {
    /// SQLite configuration for a file path or `:memory:`
    pub fn sqlite(path: impl Into<String>) -> Self {
        Self {
            engine: DatabaseEngine::Sqlite,
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::ZeroConnections);
        }

        let engine = self.engine.as_str();
        let required: Vec<(&'static str, &str)> = match self.engine {
            DatabaseEngine::Sqlite => vec![("path", self.path.as_str())],
            DatabaseEngine::Postgres => vec![
                ("host", self.host.as_str()),
                ("name", self.name.as_str()),
                ("user", self.user.as_str()),
            ],
        };

        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingDatabaseField { engine, field });
            }
        }
        Ok(())
    }
}

fn default_sqlite_path() -> String {
    "cruise.db".to_string()
}

fn default_postgres_port() -> u16 {
    5432
}

fn default_ssl_mode() -> String {
    "disable".to_string()
}

fn default_max_connections() -> u32 {
    5
}

/// OOM pipeline settings
#[derive(Debug, Clone, Deserialize)]
pub struct OomConfig {
    /// Capacity of the observer's notification stream
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for OomConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

fn default_channel_capacity() -> usize {
    1024
}

/// Scheduling settings shared by every task kind, with kind-specific metadata
#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig<M> {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Duration literal, e.g. `"1h"` or `"30m"`
    #[serde(default = "default_schedule")]
    pub schedule: String,

    #[serde(default)]
    pub metadata: M,
}

impl<M: Default> Default for TaskConfig<M> {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            schedule: default_schedule(),
            metadata: M::default(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_schedule() -> String {
    "1h".to_string()
}

/// Metadata for the OOM event retention task
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CleanupOomEventsMetadata {
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

impl Default for CleanupOomEventsMetadata {
    fn default() -> Self {
        Self {
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }
}

impl CleanupOomEventsMetadata {
    /// Retention to apply; zero falls back to the default
    pub fn effective_retention_days(&self) -> u32 {
        if self.retention_days == 0 {
            DEFAULT_RETENTION_DAYS
        } else {
            self.retention_days
        }
    }
}

fn default_retention_days() -> u32 {
    DEFAULT_RETENTION_DAYS
}

/// Per-kind task configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TasksConfig {
    #[serde(default)]
    pub cleanup_oom_events: TaskConfig<CleanupOomEventsMetadata>,
}
