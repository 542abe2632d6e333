//! Configuration system for Chatgate.

use std::collections::BTreeMap;
use std::path::PathBuf;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Model used when none is configured.
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

/// Main configuration struct for Chatgate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,
    /// Per-turn request limits
    pub limits: LimitsConfig,
    /// Completion API settings
    pub provider: ProviderConfig,
    /// Conversation storage
    pub storage: StorageConfig,
    /// History retention
    pub history: HistoryConfig,
    /// Extra model context sizes (model id -> tokens)
    pub models: BTreeMap<String, u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Default model to use
    pub model: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Reply token budget per request
    pub max_tokens: u32,
    /// Sampling temperature
    pub temperature: f32,
    /// Tokens held back from the window for protocol overhead
    pub safety_margin: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_tokens: 50,
            temperature: 1.0,
            safety_margin: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// API key (can be set directly or via environment)
    pub api_key: Option<String>,
    /// Environment variable name for API key
    pub api_key_env: Option<String>,
    /// Base URL (optional, for compatible endpoints)
    pub base_url: Option<String>,
    /// Blocking request timeout
    pub timeout_secs: u64,
    /// Time allowed for a streaming response to start
    pub stream_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_env: Some("OPENAI_API_KEY".to_string()),
            base_url: None,
            timeout_secs: 60,
            stream_timeout_secs: 30,
        }
    }
}

impl ProviderConfig {
    /// Resolve the API key from either direct value or environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(ref key) = self.api_key {
            return Some(key.clone());
        }
        if let Some(ref env_var) = self.api_key_env {
            if let Ok(key) = std::env::var(env_var) {
                return Some(key);
            }
        }
        None
    }
}

/// Storage backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// SQLite database file
    Sqlite,
    /// Process memory (lost on exit)
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend to use
    pub backend: StorageBackend,
    /// Database path (defaults to the data directory)
    pub path: Option<PathBuf>,
    /// Table holding conversation records
    pub table: String,
    /// Interval between table status checks while provisioning
    pub poll_interval_ms: u64,
    /// Maximum time to wait for the table to become active
    pub provision_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            path: None,
            table: "chat".to_string(),
            poll_interval_ms: 1000,
            provision_timeout_ms: 6000,
        }
    }
}

impl StorageConfig {
    /// Database file to open.
    pub fn database_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| Config::data_dir().join("conversations.db"))
    }
}

/// What happens to messages that no longer fit the context window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryRetention {
    /// Keep every message in the store; only the request is trimmed
    #[default]
    Full,
    /// Also drop evicted messages from the stored log
    Window,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub retention: HistoryRetention,
}

/// Validation result with multiple issues.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// List of validation issues
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Create a new empty validation result.
    pub fn new() -> Self {
        Self { issues: Vec::new() }
    }

    /// Check if validation passed (no errors).
    pub fn is_ok(&self) -> bool {
        !self.issues.iter().any(|i| i.severity == IssueSeverity::Error)
    }

    /// Get only error-level issues.
    pub fn errors(&self) -> Vec<&ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == IssueSeverity::Error).collect()
    }

    /// Get only warning-level issues.
    pub fn warnings(&self) -> Vec<&ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == IssueSeverity::Warning).collect()
    }

    /// Add an error.
    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: IssueSeverity::Error,
            field: field.into(),
            message: message.into(),
        });
    }

    /// Add a warning.
    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: IssueSeverity::Warning,
            field: field.into(),
            message: message.into(),
        });
    }
}

/// A single validation issue.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Severity of the issue
    pub severity: IssueSeverity,
    /// Field path (e.g., "limits.max_tokens")
    pub field: String,
    /// Human-readable message
    pub message: String,
}

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueSeverity {
    /// Warnings don't prevent loading
    Warning,
    /// Errors prevent loading
    Error,
}

impl Config {
    /// Base figment with every configuration source merged.
    pub fn figment() -> Figment {
        let config_dir = Self::config_dir();

        Figment::new()
            .merge(figment::providers::Serialized::defaults(Config::default()))
            .merge(Toml::file(config_dir.join("config.toml")))
            .merge(Toml::file(".chatgate/config.toml"))
            .merge(Env::prefixed("CHATGATE_").split("__"))
    }

    /// Load configuration from all sources.
    pub fn load() -> Result<Self, figment::Error> {
        Self::figment().extract()
    }

    /// Load and validate configuration.
    pub fn load_validated() -> Result<Self, Error> {
        let config = Self::load().map_err(|e| Error::Config(e.to_string()))?;
        config.check()
    }

    /// Validate, logging warnings and turning errors into a config error.
    pub fn check(self) -> Result<Self, Error> {
        let result = self.validate();

        if !result.is_ok() {
            let errors: Vec<String> = result
                .errors()
                .iter()
                .map(|e| format!("{}: {}", e.field, e.message))
                .collect();
            return Err(Error::Config(format!(
                "Configuration validation failed:\n  {}",
                errors.join("\n  ")
            )));
        }

        for warning in result.warnings() {
            tracing::warn!("Config warning - {}: {}", warning.field, warning.message);
        }

        Ok(self)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();

        if self.general.model.is_empty() {
            result.add_error("general.model", "Model name cannot be empty");
        }

        if self.limits.max_tokens == 0 {
            result.add_error("limits.max_tokens", "max_tokens must be greater than 0");
        }

        if !(0.0..=2.0).contains(&self.limits.temperature) {
            result.add_error("limits.temperature", "temperature must be between 0.0 and 2.0");
        }

        if self.limits.safety_margin > 4096 {
            result.add_warning(
                "limits.safety_margin",
                "safety_margin is larger than the smallest supported context window",
            );
        }

        if self.provider.api_key.as_ref().map(|k| k.is_empty()).unwrap_or(false) {
            result.add_warning("provider.api_key", "API key is empty string");
        }

        if let Some(ref base_url) = self.provider.base_url {
            if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
                result.add_error("provider.base_url", "base_url must start with http:// or https://");
            }
        }

        if self.provider.timeout_secs == 0 {
            result.add_error("provider.timeout_secs", "timeout_secs must be greater than 0");
        }

        if self.provider.stream_timeout_secs == 0 {
            result.add_error(
                "provider.stream_timeout_secs",
                "stream_timeout_secs must be greater than 0",
            );
        }

        if !is_valid_table_name(&self.storage.table) {
            result.add_error(
                "storage.table",
                format!(
                    "Invalid table name '{}'. Use letters, digits and underscores",
                    self.storage.table
                ),
            );
        }

        if self.storage.poll_interval_ms == 0 {
            result.add_error("storage.poll_interval_ms", "poll_interval_ms must be greater than 0");
        }

        if self.storage.provision_timeout_ms < self.storage.poll_interval_ms {
            result.add_warning(
                "storage.provision_timeout_ms",
                "provision timeout is shorter than one poll interval",
            );
        }

        for (model, size) in &self.models {
            if *size == 0 {
                result.add_error(format!("models.{}", model), "context window must be greater than 0");
            }
        }

        result
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, Error> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Get the configuration directory.
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|p| p.join("chatgate"))
            .unwrap_or_else(|| PathBuf::from("~/.config/chatgate"))
    }

    /// Get the data directory (for the conversation database).
    pub fn data_dir() -> PathBuf {
        dirs::data_dir()
            .map(|p| p.join("chatgate"))
            .unwrap_or_else(|| PathBuf::from("~/.local/share/chatgate"))
    }
}

/// SQL-safe identifier check used for table names.
pub fn is_valid_table_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 64 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
