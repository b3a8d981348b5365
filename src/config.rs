//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub hub: HubSection,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub sampler: SamplerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Broadcast hub configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HubSection {
    #[serde(default = "default_queue_capacity")]
    pub outbound_queue_capacity: usize,

    #[serde(default)]
    pub max_connections: Option<usize>,

    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,
}

fn default_queue_capacity() -> usize {
    256
}

impl Default for HubSection {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: default_queue_capacity(),
            max_connections: None,
            idle_timeout_secs: None,
        }
    }
}

impl From<&HubSection> for crate::websocket::HubConfig {
    fn from(config: &HubSection) -> Self {
        Self {
            outbound_queue_capacity: config.outbound_queue_capacity.max(1),
            max_connections: config.max_connections,
            idle_timeout: config.idle_timeout_secs.map(Duration::from_secs),
        }
    }
}

/// API server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_max_body_bytes() -> usize {
    1024 * 1024 // 1 MiB
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl ApiConfig {
    /// Get the socket address string
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Dashboard sampler configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SamplerConfig {
    #[serde(default = "default_sampler_enabled")]
    pub enabled: bool,

    #[serde(default = "default_sampler_interval")]
    pub interval_secs: u64,

    #[serde(default = "default_sampler_event_type")]
    pub event_type: String,
}

fn default_sampler_enabled() -> bool {
    true
}

fn default_sampler_interval() -> u64 {
    5
}

fn default_sampler_event_type() -> String {
    "dashboard_update".to_string()
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            enabled: default_sampler_enabled(),
            interval_secs: default_sampler_interval(),
            event_type: default_sampler_event_type(),
        }
    }
}

impl SamplerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::parse(&content).map_err(|error| ConfigError::Parse {
            path: path.to_path_buf(),
            error,
        })
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    ///
    /// Nothing is logged here since this runs before logging is set up;
    /// call [`LoadedConfig::log_outcome`] once it is.
    pub fn load_default() -> LoadedConfig {
        let config_paths: Vec<PathBuf> = [
            dirs::config_dir().map(|p| p.join("pulsecast").join("config.toml")),
            Some(PathBuf::from("/etc/pulsecast/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ]
        .into_iter()
        .flatten()
        .collect();

        Self::load_first(&config_paths)
    }

    /// Load the first of `paths` that exists and parses
    ///
    /// Files that exist but fail to load are recorded in
    /// [`LoadedConfig::errors`] and skipped.
    pub fn load_first(paths: &[PathBuf]) -> LoadedConfig {
        let mut errors = Vec::new();

        for path in paths.iter().filter(|p| p.exists()) {
            match Self::load_with_env(path) {
                Ok(config) => {
                    return LoadedConfig {
                        config,
                        source: Some(path.clone()),
                        errors,
                    }
                }
                Err(e) => errors.push(e),
            }
        }

        LoadedConfig {
            config: Self::from_env(),
            source: None,
            errors,
        }
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        // Hub overrides
        if let Some(capacity) = var("PULSECAST_QUEUE_CAPACITY").and_then(|s| s.parse().ok()) {
            self.hub.outbound_queue_capacity = capacity;
        }
        if let Some(limit) = var("PULSECAST_MAX_CONNECTIONS").and_then(|s| s.parse().ok()) {
            self.hub.max_connections = Some(limit);
        }
        if let Some(secs) = var("PULSECAST_IDLE_TIMEOUT_SECS").and_then(|s| s.parse().ok()) {
            self.hub.idle_timeout_secs = Some(secs);
        }

        // API overrides
        if let Some(host) = var("PULSECAST_API_HOST") {
            self.api.host = host;
        }
        if let Some(port) = var("PULSECAST_API_PORT").and_then(|s| s.parse().ok()) {
            self.api.port = port;
        }

        // Sampler overrides
        if let Some(enabled) = var("PULSECAST_SAMPLER_ENABLED") {
            match parse_flag(&enabled) {
                Some(enabled) => self.sampler.enabled = enabled,
                None => tracing::warn!(
                    value = %enabled,
                    "Ignoring unrecognised PULSECAST_SAMPLER_ENABLED value"
                ),
            }
        }
        if let Some(secs) = var("PULSECAST_SAMPLER_INTERVAL_SECS").and_then(|s| s.parse().ok()) {
            self.sampler.interval_secs = secs;
        }

        // Logging overrides
        if let Some(level) = var("PULSECAST_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = var("PULSECAST_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Result of searching for a config file
#[derive(Debug)]
pub struct LoadedConfig {
    pub config: Config,
    /// File the config came from, `None` for defaults plus environment
    pub source: Option<PathBuf>,
    /// Files that were found but could not be loaded
    pub errors: Vec<ConfigError>,
}

impl LoadedConfig {
    /// Wrap a config loaded from an explicit path
    pub fn from_file(config: Config, path: PathBuf) -> Self {
        Self {
            config,
            source: Some(path),
            errors: Vec::new(),
        }
    }

    /// Report where the config came from and any files that were skipped
    pub fn log_outcome(&self) {
        for error in &self.errors {
            tracing::warn!("Skipping config file: {}", error);
        }
        match &self.source {
            Some(path) => tracing::info!("Loaded config from {:?}", path),
            None => tracing::info!("Using default config with environment overrides"),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Pulsecast Configuration
#
# Environment variables override these settings:
# - PULSECAST_QUEUE_CAPACITY
# - PULSECAST_MAX_CONNECTIONS
# - PULSECAST_IDLE_TIMEOUT_SECS
# - PULSECAST_API_HOST
# - PULSECAST_API_PORT
# - PULSECAST_SAMPLER_ENABLED
# - PULSECAST_SAMPLER_INTERVAL_SECS
# - PULSECAST_LOG_LEVEL
# - PULSECAST_LOG_FORMAT

[hub]
# Frames buffered per client before it is dropped as a slow consumer
outbound_queue_capacity = 256

# Maximum concurrent connections (unbounded when unset)
# max_connections = 10000

# Close clients that send nothing for this many seconds (disabled when unset)
# idle_timeout_secs = 300

[api]
# API server host
host = "0.0.0.0"

# API server port
port = 8080

# Maximum request body size for published events (bytes)
max_body_bytes = 1048576

[sampler]
# Publish periodic dashboard snapshots
enabled = true

# Seconds between snapshots
interval_secs = 5

# Event type tag of each snapshot
event_type = "dashboard_update"

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}
