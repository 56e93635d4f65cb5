//! Core event types shared across the pipeline
//!
//! This module defines the data structures that flow from the container log
//! adapters through the alert pipeline: log lines, container identity and
//! severity levels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Timestamp type for consistent time handling across the application
pub type Timestamp = DateTime<Utc>;

/// A single non-blank line read from a container's log stream
///
/// Produced by a log adapter and consumed exactly once by the alert pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogLine {
    /// Human-readable container name (no leading slash)
    pub container_name: String,
    /// Short container id
    pub container_id: String,
    /// Decoded line content, timestamp prefix removed
    pub text: String,
    /// When the line was written, or when it was read if the runtime gave no timestamp
    pub observed_at: Timestamp,
}

/// Identity of a monitored container as reported by the runtime
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ContainerInfo {
    pub name: String,
    /// First 12 hex characters of the full id
    pub id: String,
    /// Image reference, e.g. `nginx:1.27`
    pub image: String,
}

/// Severity of a classified error line
///
/// Ordered `Warning < Error < Critical`; the ordering is only used for display.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// No escalation keyword found
    Warning,
    /// Ordinary failure
    Error,
    /// Crash, panic, out-of-memory and similar
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
