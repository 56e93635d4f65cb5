/// Error types for the log monitor
pub mod error;

/// Core event types
pub mod events;

/// Error line classification
pub mod detection;

/// Container log sources and per-container collectors
pub mod collectors;

/// Dedup, rate limiting and notification delivery
pub mod alerts;

/// Analysis backends and the analyzer
pub mod ai;

/// Configuration management
pub mod config;

/// Pipeline self-monitoring
pub mod monitoring;

/// The per-line alert pipeline
pub mod orchestrator;

/// Dashboard error recording
pub mod persistence;

/// Collector lifecycle
pub mod supervisor;

// Re-export commonly used types
pub use error::{AlertError, AnalysisError, CollectorError, ConfigError, PersistenceError};
pub use orchestrator::{AlertOrchestrator, AlertState, PipelineOutcome, PipelineSink};
pub use supervisor::{ShutdownReport, Supervisor};
