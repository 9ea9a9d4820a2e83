//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

pub const DEFAULT_CONFIG_PATH: &str = "config/dev.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct DirectoryConfig {
    pub base_url: String,
    /// Per-request timeout, also bounds each snapshot fetch
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    pub url: String,
    /// Reconnect with exponential backoff after the peer drops the stream
    #[serde(default = "default_reconnect")]
    pub reconnect: bool,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_reconnect() -> bool {
    true
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SessionConfig {
    /// Bearer token obtained from `login`
    #[serde(default)]
    pub token: Option<String>,
    /// Sensor to focus on start; absent means broadcast mode
    #[serde(default)]
    pub target_sensor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub interval_secs: u64,
    /// Prometheus metrics HTTP port (0 to disable)
    #[serde(default)]
    pub prometheus_port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: 30, prometheus_port: 0 }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    pub directory: DirectoryConfig,
    pub stream: StreamConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    directory_url: String,
    directory_timeout_ms: u64,
    stream_url: String,
    stream_reconnect: bool,
    stream_initial_backoff_ms: u64,
    stream_max_backoff_ms: u64,
    token: Option<String>,
    target_sensor: Option<String>,
    metrics_interval_secs: u64,
    prometheus_port: u16,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            directory_url: "http://localhost:8000".to_string(),
            directory_timeout_ms: default_timeout_ms(),
            stream_url: "ws://localhost:8000/ws/alerts".to_string(),
            stream_reconnect: default_reconnect(),
            stream_initial_backoff_ms: default_initial_backoff_ms(),
            stream_max_backoff_ms: default_max_backoff_ms(),
            token: None,
            target_sensor: None,
            metrics_interval_secs: 30,
            prometheus_port: 0,
            config_file: "default".to_string(),
        }
    }
}

impl Config {
    /// Determine config file path from the CLI value or environment
    pub fn resolve_config_path(cli: Option<&str>) -> String {
        if let Some(path) = cli {
            return path.to_string();
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            if !path.is_empty() {
                return path;
            }
        }

        DEFAULT_CONFIG_PATH.to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        let initial_backoff_ms = toml_config.stream.initial_backoff_ms.max(1);

        Ok(Self {
            directory_url: toml_config.directory.base_url.trim_end_matches('/').to_string(),
            directory_timeout_ms: toml_config.directory.timeout_ms,
            stream_url: toml_config.stream.url,
            stream_reconnect: toml_config.stream.reconnect,
            stream_initial_backoff_ms: initial_backoff_ms,
            stream_max_backoff_ms: toml_config.stream.max_backoff_ms.max(initial_backoff_ms),
            token: toml_config.session.token.filter(|t| !t.is_empty()),
            target_sensor: toml_config.session.target_sensor.filter(|s| !s.is_empty()),
            metrics_interval_secs: toml_config.metrics.interval_secs.max(1),
            prometheus_port: toml_config.metrics.prometheus_port,
            config_file: path.display().to_string(),
        })
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load(cli: Option<&str>) -> Self {
        Self::load_from_path(&Self::resolve_config_path(cli))
    }

    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {:#}. Using defaults.", e);
                Self::default()
            }
        }
    }

    /// Command line / environment overrides take precedence over the file
    pub fn with_overrides(mut self, token: Option<String>, target_sensor: Option<String>) -> Self {
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            self.token = Some(token);
        }
        if let Some(sensor) = target_sensor.filter(|s| !s.is_empty()) {
            self.target_sensor = Some(sensor);
        }
        self
    }

    pub fn directory_url(&self) -> &str {
        &self.directory_url
    }

    pub fn directory_timeout_ms(&self) -> u64 {
        self.directory_timeout_ms
    }

    pub fn stream_url(&self) -> &str {
        &self.stream_url
    }

    pub fn stream_reconnect(&self) -> bool {
        self.stream_reconnect
    }

    pub fn stream_initial_backoff_ms(&self) -> u64 {
        self.stream_initial_backoff_ms
    }

    pub fn stream_max_backoff_ms(&self) -> u64 {
        self.stream_max_backoff_ms
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn target_sensor(&self) -> Option<&str> {
        self.target_sensor.as_deref()
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn prometheus_port(&self) -> u16 {
        self.prometheus_port
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }
}
