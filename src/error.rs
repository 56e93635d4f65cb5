use thiserror::Error;

/// Errors that can occur while tailing container logs
#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    #[error("Failed to spawn subprocess: {0}")]
    SubprocessSpawn(String),

    #[error("Subprocess terminated unexpectedly: {0}")]
    SubprocessTerminated(String),

    #[error("Failed to parse output: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Errors that can occur during error-text analysis
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    #[error("Backend communication failed: {0}")]
    BackendError(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),

    #[error("HTTP error: {0}")]
    HttpError(String),
}

/// Errors that can occur when dispatching notifications
#[derive(Error, Debug)]
pub enum AlertError {
    #[error("Failed to send notification: {0}")]
    NotificationFailed(String),

    #[error("Webhook rejected message (code {code}): {message}")]
    Rejected { code: i64, message: String },

    #[error("HTTP error: {0}")]
    HttpError(String),
}

/// Errors that can occur when recording errors in the dashboard store
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Dashboard request failed: {0}")]
    RequestFailed(String),

    #[error("Dashboard returned status {0}")]
    Status(u16),
}

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Invalid configuration value: {0}")]
    ValidationError(String),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}

impl CollectorError {
    /// Whether the adapter should give up instead of reconnecting
    pub fn is_terminal(&self) -> bool {
        matches!(self, CollectorError::ContainerNotFound(_))
    }
}
