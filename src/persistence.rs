//! One-way error recording into the dashboard store
//!
//! The dashboard keeps its own history of errors. The pipeline only pushes a
//! record per dispatched error and never reads anything back; a failed push
//! is logged and otherwise ignored.

use crate::error::PersistenceError;
use crate::events::Severity;
use log::{debug, error};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tokio::runtime::Handle;

/// Maximum number of characters kept in `error_message`
pub const MAX_ERROR_MESSAGE_CHARS: usize = 500;

/// Error record as stored by the dashboard
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRecord {
    pub container_name: String,
    /// First 500 characters of the line
    pub error_message: String,
    pub error_type: String,
    /// Full line
    pub log_content: String,
    pub severity: Severity,
    pub ai_analysis: Option<String>,
    pub ai_solution: Option<String>,
}

impl ErrorRecord {
    /// Build a record, truncating the message summary
    pub fn new(
        container_name: &str,
        line: &str,
        error_type: String,
        severity: Severity,
        ai_analysis: Option<String>,
        ai_solution: Option<String>,
    ) -> Self {
        Self {
            container_name: container_name.to_string(),
            error_message: line.chars().take(MAX_ERROR_MESSAGE_CHARS).collect(),
            error_type,
            log_content: line.to_string(),
            severity,
            ai_analysis,
            ai_solution,
        }
    }
}

/// Sink for error records
///
/// Implementations must not block the caller on I/O.
#[cfg_attr(test, mockall::automock)]
pub trait ErrorRecorder: Send + Sync {
    fn record(&self, record: ErrorRecord);
}

/// Recorder used when no dashboard is configured
#[derive(Debug, Default)]
pub struct NoopRecorder;

impl ErrorRecorder for NoopRecorder {
    fn record(&self, record: ErrorRecord) {
        debug!(
            "No dashboard configured, dropping record for {}",
            record.container_name
        );
    }
}

/// Posts records as JSON to the dashboard's error endpoint
///
/// Each post runs as its own task on the given runtime so the worker that
/// produced the record continues immediately.
pub struct HttpErrorRecorder {
    client: Client,
    url: String,
    runtime: Handle,
}

impl HttpErrorRecorder {
    pub fn new(url: String, runtime: Handle) -> Result<Self, PersistenceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .no_proxy()
            .build()
            .map_err(|e| PersistenceError::RequestFailed(e.to_string()))?;

        Ok(Self {
            client,
            url,
            runtime,
        })
    }

    async fn post(client: Client, url: String, record: ErrorRecord) -> Result<(), PersistenceError> {
        let response = client
            .post(&url)
            .json(&record)
            .send()
            .await
            .map_err(|e| PersistenceError::RequestFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PersistenceError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

impl ErrorRecorder for HttpErrorRecorder {
    fn record(&self, record: ErrorRecord) {
        let client = self.client.clone();
        let url = self.url.clone();
        let container = record.container_name.clone();

        self.runtime.spawn(async move {
            match Self::post(client, url, record).await {
                Ok(()) => debug!("Recorded error for container {} in dashboard", container),
                Err(e) => error!(
                    "Failed to record error for container {} in dashboard: {}",
                    container, e
                ),
            }
        });
    }
}
