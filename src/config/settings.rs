//! Application configuration
//!
//! Loaded once at startup from a TOML file. Any read, parse or validation
//! failure is fatal; there is no fallback to defaults for required sections.

use crate::ai::backends::DEFAULT_AZURE_API_VERSION;
use crate::collectors::{ReconnectPolicy, TailOptions};
use crate::error::ConfigError;
use log::{info, warn};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Longest accepted dedup window (30 days)
pub const MAX_DEDUP_WINDOW_SECS: u64 = 30 * 24 * 60 * 60;

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    pub docker: DockerConfig,

    #[serde(default)]
    pub error_detection: ErrorDetectionConfig,

    #[serde(default)]
    pub notification: NotificationConfig,

    #[serde(default)]
    pub analysis: AnalysisConfig,

    pub feishu: FeishuConfig,

    /// Dashboard recording is disabled when absent
    #[serde(default)]
    pub dashboard: Option<DashboardConfig>,

    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

/// Which containers to tail and how
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DockerConfig {
    /// Docker CLI binary (default: "docker")
    #[serde(default = "default_docker_binary")]
    pub binary: String,

    /// Container names or ids
    pub containers: Vec<String>,

    #[serde(default)]
    pub log_settings: TailOptions,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ErrorDetectionConfig {
    #[serde(default = "default_keywords")]
    pub keywords: Vec<String>,

    #[serde(default)]
    pub case_sensitive: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NotificationConfig {
    /// Seconds during which a repeated error is not notified again
    /// (default: 300, at most `MAX_DEDUP_WINDOW_SECS`)
    #[serde(default = "default_dedup_window")]
    pub dedup_window: u64,

    /// Notifications per container per minute (default: 10)
    #[serde(default = "default_max_rate")]
    pub max_rate_per_minute: usize,
}

/// Supported analysis backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum AnalysisBackendKind {
    #[default]
    #[serde(rename = "azure_openai")]
    AzureOpenAI,
    #[serde(rename = "openai")]
    OpenAI,
    #[serde(rename = "mock")]
    Mock,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default)]
    pub backend: AnalysisBackendKind,

    /// Azure resource endpoint, or an OpenAI-compatible base URL
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub api_key: Option<String>,

    /// Azure deployment name, or the model name for OpenAI
    #[serde(default)]
    pub deployment_name: Option<String>,

    #[serde(default = "default_api_version")]
    pub api_version: String,

    #[serde(default = "default_analysis_timeout")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FeishuConfig {
    pub webhook_url: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DashboardConfig {
    /// Endpoint that accepts error records as JSON
    pub record_url: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SupervisorConfig {
    /// Seconds each collector gets to stop on shutdown (default: 5)
    #[serde(default = "default_join_timeout")]
    pub join_timeout_seconds: u64,

    /// Consecutive stream failures before a collector gives up (default: 5)
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Seconds between pipeline statistics log lines (default: 300)
    #[serde(default = "default_stats_interval")]
    pub stats_interval_seconds: u64,
}

fn default_docker_binary() -> String {
    "docker".to_string()
}

fn default_keywords() -> Vec<String> {
    vec![
        "error".to_string(),
        "exception".to_string(),
        "fatal".to_string(),
    ]
}

fn default_dedup_window() -> u64 {
    300
}

fn default_max_rate() -> usize {
    10
}

fn default_api_version() -> String {
    DEFAULT_AZURE_API_VERSION.to_string()
}

fn default_analysis_timeout() -> u64 {
    30
}

fn default_join_timeout() -> u64 {
    5
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_stats_interval() -> u64 {
    300
}

impl Default for ErrorDetectionConfig {
    fn default() -> Self {
        Self {
            keywords: default_keywords(),
            case_sensitive: false,
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            dedup_window: default_dedup_window(),
            max_rate_per_minute: default_max_rate(),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            backend: AnalysisBackendKind::default(),
            endpoint: None,
            api_key: None,
            deployment_name: None,
            api_version: default_api_version(),
            timeout_seconds: default_analysis_timeout(),
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            join_timeout_seconds: default_join_timeout(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            stats_interval_seconds: default_stats_interval(),
        }
    }
}

impl AnalysisConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// A required string setting, rejected when missing or blank
    pub fn require<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str, ConfigError> {
        match value.as_deref().map(str::trim) {
            Some(v) if !v.is_empty() => Ok(v),
            _ => Err(ConfigError::ValidationError(format!(
                "analysis.{} is required for the selected backend",
                name
            ))),
        }
    }
}

impl SupervisorConfig {
    pub fn join_timeout(&self) -> Duration {
        Duration::from_secs(self.join_timeout_seconds)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_seconds)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.max_reconnect_attempts,
            ..ReconnectPolicy::default()
        }
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    /// Parse and validate TOML text
    fn from_str(content: &str) -> Result<Self, Self::Err> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }
}

impl Config {
    /// Load and validate a configuration file
    ///
    /// # Errors
    ///
    /// * `ConfigError::ReadError` if the file cannot be read
    /// * `ConfigError::TomlError` if it is not valid TOML for this schema
    /// * `ConfigError::ValidationError` if a value is out of range
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;

        let config: Config = content.parse()?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Check value ranges and cross-field requirements
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.docker.containers.is_empty() {
            return Err(ConfigError::ValidationError(
                "docker.containers must list at least one container".to_string(),
            ));
        }
        if self.docker.containers.iter().any(|c| c.trim().is_empty()) {
            return Err(ConfigError::ValidationError(
                "docker.containers contains an empty name".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = self
            .docker
            .containers
            .iter()
            .map(|c| c.trim())
            .find(|c| !seen.insert(*c))
        {
            return Err(ConfigError::ValidationError(format!(
                "docker.containers lists '{}' more than once",
                dup
            )));
        }
        if self.docker.binary.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "docker.binary must not be empty".to_string(),
            ));
        }

        if self.error_detection.keywords.iter().all(|k| k.trim().is_empty()) {
            warn!("No error keywords configured, no line will ever be reported");
        }

        if self.notification.dedup_window == 0 {
            return Err(ConfigError::ValidationError(
                "notification.dedup_window must be greater than 0".to_string(),
            ));
        }
        if self.notification.dedup_window > MAX_DEDUP_WINDOW_SECS {
            return Err(ConfigError::ValidationError(format!(
                "notification.dedup_window must be at most {} seconds",
                MAX_DEDUP_WINDOW_SECS
            )));
        }
        if self.notification.max_rate_per_minute == 0 {
            return Err(ConfigError::ValidationError(
                "notification.max_rate_per_minute must be greater than 0".to_string(),
            ));
        }

        match self.analysis.backend {
            AnalysisBackendKind::AzureOpenAI => {
                AnalysisConfig::require(&self.analysis.endpoint, "endpoint")?;
                AnalysisConfig::require(&self.analysis.api_key, "api_key")?;
                AnalysisConfig::require(&self.analysis.deployment_name, "deployment_name")?;
            }
            AnalysisBackendKind::OpenAI => {
                AnalysisConfig::require(&self.analysis.api_key, "api_key")?;
                AnalysisConfig::require(&self.analysis.deployment_name, "deployment_name")?;
            }
            AnalysisBackendKind::Mock => {}
        }
        if self.analysis.timeout_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "analysis.timeout_seconds must be greater than 0".to_string(),
            ));
        }

        if !is_http_url(&self.feishu.webhook_url) {
            return Err(ConfigError::ValidationError(
                "feishu.webhook_url must be an http(s) URL".to_string(),
            ));
        }

        if let Some(dashboard) = &self.dashboard {
            if !is_http_url(&dashboard.record_url) {
                return Err(ConfigError::ValidationError(
                    "dashboard.record_url must be an http(s) URL".to_string(),
                ));
            }
        }

        if self.supervisor.join_timeout_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "supervisor.join_timeout_seconds must be greater than 0".to_string(),
            ));
        }
        if self.supervisor.max_reconnect_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "supervisor.max_reconnect_attempts must be greater than 0".to_string(),
            ));
        }
        if self.supervisor.stats_interval_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "supervisor.stats_interval_seconds must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn is_http_url(value: &str) -> bool {
    let value = value.trim();
    value.starts_with("http://") || value.starts_with("https://")
}
