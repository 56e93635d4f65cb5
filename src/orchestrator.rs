//! Per-line alert pipeline
//!
//! Every line read from a container goes through the same sequence:
//! classify, dedup check, rate check, enrich, record, dispatch. Only a
//! confirmed dispatch commits the line's fingerprint to the dedup cache, so a
//! failed notification never hides the next occurrence of the same error.

use crate::ai::{split_analysis, AnalysisRequest, ErrorAnalyzer};
use crate::alerts::{Alert, DedupCache, ErrorFingerprint, Notifier, RateLimiter};
use crate::collectors::{ContainerMetadata, LineSink};
use crate::detection::{extract_error_type, severity, ErrorDetector};
use crate::events::{LogLine, Timestamp};
use crate::monitoring::PipelineMonitor;
use crate::persistence::{ErrorRecord, ErrorRecorder};
use chrono::Utc;
use log::{debug, error, info, warn};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::runtime::Handle;

/// Image reported when the metadata lookup fails
pub const UNKNOWN_IMAGE: &str = "unknown";

/// Where a line left the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    NotAnError,
    /// Same fingerprint dispatched within the dedup window
    Duplicate,
    /// Container already used its notifications for this minute
    RateLimited,
    /// Transport confirmed delivery
    Dispatched,
    /// Transport did not confirm delivery
    DispatchFailed,
}

/// Mutable state shared by every container worker
#[derive(Debug)]
pub struct AlertState {
    dedup: Mutex<DedupCache>,
    rate: Mutex<RateLimiter>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl AlertState {
    pub fn new(dedup: DedupCache, rate: RateLimiter) -> Self {
        Self {
            dedup: Mutex::new(dedup),
            rate: Mutex::new(rate),
        }
    }

    /// State with a dedup window in seconds and a per-minute limit
    pub fn with_limits(dedup_window_secs: u64, max_rate_per_minute: usize) -> Self {
        Self::new(
            DedupCache::with_window_secs(dedup_window_secs),
            RateLimiter::new(max_rate_per_minute),
        )
    }

    pub fn is_duplicate(&self, fingerprint: &ErrorFingerprint, now: Timestamp) -> bool {
        lock(&self.dedup).is_duplicate(fingerprint, now)
    }

    pub fn commit(&self, fingerprint: ErrorFingerprint, now: Timestamp) {
        lock(&self.dedup).commit(fingerprint, now);
    }

    pub fn allow(&self, container_name: &str, now: Timestamp) -> bool {
        lock(&self.rate).allow_at(container_name, now)
    }

    pub fn dedup_entries(&self) -> usize {
        lock(&self.dedup).len()
    }
}

/// Runs the alert pipeline for lines from any container
pub struct AlertOrchestrator {
    detector: ErrorDetector,
    state: Arc<AlertState>,
    metadata: Arc<dyn ContainerMetadata>,
    analyzer: ErrorAnalyzer,
    notifier: Arc<dyn Notifier>,
    recorder: Arc<dyn ErrorRecorder>,
    monitor: Arc<PipelineMonitor>,
}

impl AlertOrchestrator {
    pub fn new(
        detector: ErrorDetector,
        state: Arc<AlertState>,
        metadata: Arc<dyn ContainerMetadata>,
        analyzer: ErrorAnalyzer,
        notifier: Arc<dyn Notifier>,
        recorder: Arc<dyn ErrorRecorder>,
        monitor: Arc<PipelineMonitor>,
    ) -> Self {
        Self {
            detector,
            state,
            metadata,
            analyzer,
            notifier,
            recorder,
            monitor,
        }
    }

    pub fn state(&self) -> &Arc<AlertState> {
        &self.state
    }

    pub fn monitor(&self) -> &Arc<PipelineMonitor> {
        &self.monitor
    }

    /// Process one line using the current wall-clock time
    pub async fn process_line(&self, line: &LogLine) -> PipelineOutcome {
        self.process_line_at(line, Utc::now()).await
    }

    /// Process one line as if it arrived at `now`
    ///
    /// `now` drives the dedup and rate decisions; the line's own
    /// `observed_at` is only reported in the alert.
    pub async fn process_line_at(&self, line: &LogLine, now: Timestamp) -> PipelineOutcome {
        let outcome = self.run_pipeline(line, now).await;
        self.monitor.record_outcome(outcome);
        outcome
    }

    async fn run_pipeline(&self, line: &LogLine, now: Timestamp) -> PipelineOutcome {
        if !self.detector.is_error(&line.text) {
            return PipelineOutcome::NotAnError;
        }

        let fingerprint = ErrorFingerprint::new(&line.container_name, &line.text);
        if self.state.is_duplicate(&fingerprint, now) {
            debug!("Suppressing duplicate error from {}", line.container_name);
            return PipelineOutcome::Duplicate;
        }

        if !self.state.allow(&line.container_name, now) {
            warn!(
                "Notification rate limit reached for container {}, dropping alert",
                line.container_name
            );
            return PipelineOutcome::RateLimited;
        }

        info!(
            "Error detected in {}: {}",
            line.container_name,
            line.text.chars().take(100).collect::<String>()
        );

        let image = match self.metadata.image(&line.container_name) {
            Ok(image) => image,
            Err(e) => {
                warn!("Could not look up image of {}: {}", line.container_name, e);
                UNKNOWN_IMAGE.to_string()
            }
        };

        let request = AnalysisRequest {
            error_text: line.text.clone(),
            container_name: line.container_name.clone(),
            container_image: image.clone(),
        };
        let (analysis, analyzed) = self.analyzer.analyze_or_placeholder(&request).await;

        let level = severity(&line.text);
        let error_type = extract_error_type(&line.text);

        let (ai_analysis, ai_solution) = if analyzed {
            let parts = split_analysis(&analysis);
            (Some(parts.cause), parts.remedy)
        } else {
            (None, None)
        };
        self.recorder.record(ErrorRecord::new(
            &line.container_name,
            &line.text,
            error_type.clone(),
            level,
            ai_analysis,
            ai_solution,
        ));

        let alert = Alert {
            container_name: line.container_name.clone(),
            container_id: line.container_id.clone(),
            container_image: image,
            error_log: line.text.clone(),
            analysis,
            observed_at: line.observed_at,
            severity: level,
            error_type,
        };

        match self.notifier.send_alert(&alert).await {
            Ok(()) => {
                self.state.commit(fingerprint, now);
                self.monitor.record_notification_result(true);
                info!(
                    "Alert sent for {} ({} {})",
                    alert.container_name, alert.severity, alert.error_type
                );
                PipelineOutcome::Dispatched
            }
            Err(e) => {
                self.monitor.record_notification_result(false);
                error!("Failed to send alert for {}: {}", alert.container_name, e);
                PipelineOutcome::DispatchFailed
            }
        }
    }
}

/// Feeds adapter lines into the orchestrator from a worker thread
///
/// Each call drives the async pipeline to completion on the shared runtime,
/// so the adapter reads its next line only after the current one is done.
pub struct PipelineSink {
    orchestrator: Arc<AlertOrchestrator>,
    runtime: Handle,
}

impl PipelineSink {
    pub fn new(orchestrator: Arc<AlertOrchestrator>, runtime: Handle) -> Self {
        Self {
            orchestrator,
            runtime,
        }
    }
}

impl LineSink for PipelineSink {
    fn deliver(&self, line: LogLine) {
        self.runtime.block_on(self.orchestrator.process_line(&line));
    }
}
