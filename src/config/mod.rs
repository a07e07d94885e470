//! Configuration management for api-guard
//!
//! This module handles loading, parsing, and validating application configuration
//! from YAML files and environment variables.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// API authentication defaults
    #[serde(default)]
    pub auth: AuthConfig,

    /// OpenTelemetry configuration
    #[serde(default)]
    pub otel: OtelConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileRead(format!("Failed to read config file: {}", e)))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(yaml);
        let config: Config = serde_yaml::from_str(&expanded)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables with prefix API_GUARD_
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Ok(host) = std::env::var("API_GUARD_SERVER_HOST") {
            config.server.host = host;
        }
        if let Ok(port) = std::env::var("API_GUARD_SERVER_PORT") {
            config.server.port = port
                .parse()
                .map_err(|_| ConfigError::Parse("Invalid port number".to_string()))?;
        }

        if let Ok(path) = std::env::var("API_GUARD_DATABASE_PATH") {
            config.database.path = path;
        }

        if let Ok(token_only) = std::env::var("API_GUARD_AUTH_TOKEN_ONLY") {
            config.auth.token_only = token_only.parse().unwrap_or(true);
        }
        if let Ok(quota) = std::env::var("API_GUARD_AUTH_DEFAULT_QUOTA") {
            config.auth.default_quota_per_minute = quota
                .parse()
                .map_err(|_| ConfigError::Parse("Invalid default quota".to_string()))?;
        }

        if let Ok(enabled) = std::env::var("API_GUARD_OTEL_ENABLED") {
            config.otel.enabled = enabled.parse().unwrap_or(false);
        }
        if let Ok(endpoint) = std::env::var("API_GUARD_OTEL_ENDPOINT") {
            config.otel.endpoint = Some(endpoint);
        }

        if let Ok(level) = std::env::var("API_GUARD_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(format) = std::env::var("API_GUARD_LOG_FORMAT") {
            config.logging.format = format;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would silently misbehave at runtime
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.default_quota_per_minute < 0 {
            return Err(ConfigError::InvalidValue(
                "auth.default_quota_per_minute must not be negative".to_string(),
            ));
        }
        if self.database.path.trim().is_empty() {
            return Err(ConfigError::MissingRequired("database.path".to_string()));
        }
        Ok(())
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Host address to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    "/data/db/api-guard.db".to_string()
}

/// Defaults used while the settings table has no stored value
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthConfig {
    /// Require an API token on every protected request
    #[serde(default = "default_token_only")]
    pub token_only: bool,

    /// Quota for identities without their own (0 = unlimited)
    #[serde(default = "default_quota_per_minute")]
    pub default_quota_per_minute: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_only: default_token_only(),
            default_quota_per_minute: default_quota_per_minute(),
        }
    }
}

fn default_token_only() -> bool {
    true
}

fn default_quota_per_minute() -> i64 {
    120
}

/// OpenTelemetry configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OtelConfig {
    /// Whether OpenTelemetry is enabled
    #[serde(default)]
    pub enabled: bool,

    /// OTLP endpoint URL
    pub endpoint: Option<String>,

    /// Whether to use insecure connection
    #[serde(default)]
    pub insecure: bool,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            insecure: false,
            service_name: default_service_name(),
        }
    }
}

fn default_service_name() -> String {
    "api-guard".to_string()
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format ("json" or "pretty")
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

/// Configuration error types
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ConfigError {
    /// Error reading configuration file
    #[error("Failed to read configuration file: {0}")]
    FileRead(String),

    /// Error parsing configuration
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    /// Invalid configuration value
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// Missing required configuration
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

/// Expand environment variables in a string
///
/// Supports `${VAR_NAME}` syntax. Unset variables are left as written.
fn expand_env_vars(input: &str) -> String {
    let re = regex_lite::Regex::new(r"\$\{([^}]+)\}")
        .expect("Invalid regex pattern for environment variable expansion");

    re.replace_all(input, |caps: &regex_lite::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_else(|_| caps[0].to_string())
    })
    .into_owned()
}
