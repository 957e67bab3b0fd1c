//! Configuration loading and validation for Toolweave.
//!
//! Loads configuration from `~/.toolweave/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use toolweave_telemetry::{LoggingOptions, RotationPolicy};

/// The root configuration structure.
///
/// Maps directly to `~/.toolweave/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Conversation loop settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// Tool execution settings
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Trace store and logging settings
    #[serde(default)]
    pub tracing: TracingConfig,
}

/// How tool calls are exchanged with the model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolKind {
    /// Native function-calling fields on the provider API.
    #[default]
    Structured,
    /// Tool calls embedded in plain assistant text.
    Text,
}

impl std::str::FromStr for ProtocolKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "structured" => Ok(Self::Structured),
            "text" => Ok(Self::Text),
            other => Err(ConfigError::ValidationError(format!(
                "unknown protocol '{other}' (expected 'structured' or 'text')"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Model calls allowed per conversation turn
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Limit on a single model call plus its tool round
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration_timeout_secs: Option<u64>,

    /// Limit on a whole `run`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_timeout_secs: Option<u64>,

    #[serde(default)]
    pub protocol: ProtocolKind,
}

fn default_model() -> String {
    "gpt-4o-mini".into()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_iterations() -> u32 {
    5
}

impl AgentConfig {
    pub fn iteration_timeout(&self) -> Option<Duration> {
        self.iteration_timeout_secs.map(Duration::from_secs)
    }

    pub fn conversation_timeout(&self) -> Option<Duration> {
        self.conversation_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: None,
            max_iterations: default_max_iterations(),
            iteration_timeout_secs: None,
            conversation_timeout_secs: None,
            protocol: ProtocolKind::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Per-call execution limit
    #[serde(default = "default_tool_timeout")]
    pub timeout_secs: u64,

    /// Run the calls of one turn concurrently
    #[serde(default = "default_true")]
    pub parallel: bool,

    /// Upper bound on concurrently running calls; unbounded when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,
}

fn default_tool_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

impl ToolsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_tool_timeout(),
            parallel: true,
            max_concurrency: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    /// No events are persisted.
    #[default]
    None,
    Memory,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracingConfig {
    #[serde(default)]
    pub store: StoreKind,

    /// Base path of the JSON-lines store (required for `store = "file"`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_file_bytes: Option<u64>,

    #[serde(default)]
    pub rotate_daily: bool,

    /// Default log filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub json_logs: bool,
}

fn default_log_level() -> String {
    "info".into()
}

impl TracingConfig {
    pub fn rotation_policy(&self) -> RotationPolicy {
        RotationPolicy {
            max_bytes: self.max_file_bytes,
            daily: self.rotate_daily,
        }
    }

    pub fn logging_options(&self) -> LoggingOptions {
        LoggingOptions {
            level: self.log_level.clone(),
            json: self.json_logs,
            capture_to_trace: self.store != StoreKind::None,
        }
    }
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            store: StoreKind::None,
            path: None,
            max_file_bytes: None,
            rotate_daily: false,
            log_level: default_log_level(),
            json_logs: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default location.
    ///
    /// Environment variables override file values:
    /// - `TOOLWEAVE_MODEL`
    /// - `TOOLWEAVE_MAX_ITERATIONS`
    /// - `TOOLWEAVE_PROTOCOL`
    /// - `TOOLWEAVE_TRACE_PATH` (also switches the store to `file`)
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(model) = lookup("TOOLWEAVE_MODEL") {
            self.agent.model = model;
        }

        if let Some(raw) = lookup("TOOLWEAVE_MAX_ITERATIONS") {
            self.agent.max_iterations = raw.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!("TOOLWEAVE_MAX_ITERATIONS is not a number: {raw}"))
            })?;
        }

        if let Some(raw) = lookup("TOOLWEAVE_PROTOCOL") {
            self.agent.protocol = raw.parse()?;
        }

        if let Some(path) = lookup("TOOLWEAVE_TRACE_PATH") {
            self.tracing.store = StoreKind::File;
            self.tracing.path = Some(PathBuf::from(path));
        }

        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".toolweave")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.max_iterations == 0 {
            return Err(ConfigError::ValidationError("agent.max_iterations must be at least 1".into()));
        }

        if !(0.0..=2.0).contains(&self.agent.temperature) {
            return Err(ConfigError::ValidationError(
                "agent.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.tools.max_concurrency == Some(0) {
            return Err(ConfigError::ValidationError("tools.max_concurrency must be at least 1".into()));
        }

        if self.tracing.store == StoreKind::File && self.tracing.path.is_none() {
            return Err(ConfigError::ValidationError(
                "tracing.path is required when tracing.store = \"file\"".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
