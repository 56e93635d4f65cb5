//! Self-monitoring for the alert pipeline
//!
//! Tracks how lines move through the pipeline (how many were errors, how many
//! were suppressed and why, how many alerts went out), plus analysis latency,
//! notification success rate and the process's own memory use.

use crate::orchestrator::PipelineOutcome;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Point-in-time view of pipeline health
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineStats {
    /// Lines handed to the pipeline since start
    pub lines_processed: u64,
    /// Lines classified as errors
    pub errors_detected: u64,
    /// Errors suppressed as duplicates
    pub duplicates_suppressed: u64,
    /// Errors dropped by the per-container rate limit
    pub rate_limited: u64,
    /// Alerts confirmed delivered
    pub alerts_dispatched: u64,
    /// Alerts the transport did not confirm
    pub dispatch_failures: u64,
    /// Average analysis latency in milliseconds over recent calls
    pub avg_analysis_latency_ms: f64,
    /// Notification success rate over the last minute (0-100)
    pub notification_success_rate: f64,
    /// Resident memory in bytes, 0 when unknown
    pub memory_usage_bytes: u64,
    pub timestamp: DateTime<Utc>,
}

/// Notification delivery result
#[derive(Debug, Clone)]
struct NotificationResult {
    success: bool,
    timestamp: DateTime<Utc>,
}

/// Collects pipeline counters shared by every container worker
#[derive(Debug)]
pub struct PipelineMonitor {
    lines_processed: AtomicU64,
    errors_detected: AtomicU64,
    duplicates_suppressed: AtomicU64,
    rate_limited: AtomicU64,
    alerts_dispatched: AtomicU64,
    dispatch_failures: AtomicU64,
    /// Recent analysis latencies (last 100 calls)
    analysis_latencies: Mutex<VecDeque<Duration>>,
    /// Recent notification results (last 1000 attempts)
    notification_results: Mutex<VecDeque<NotificationResult>>,
    max_latency_samples: usize,
    max_notification_samples: usize,
}

impl Default for PipelineMonitor {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl PipelineMonitor {
    pub fn new() -> Self {
        Self {
            lines_processed: AtomicU64::new(0),
            errors_detected: AtomicU64::new(0),
            duplicates_suppressed: AtomicU64::new(0),
            rate_limited: AtomicU64::new(0),
            alerts_dispatched: AtomicU64::new(0),
            dispatch_failures: AtomicU64::new(0),
            analysis_latencies: Mutex::new(VecDeque::new()),
            notification_results: Mutex::new(VecDeque::new()),
            max_latency_samples: 100,
            max_notification_samples: 1000,
        }
    }

    /// Count one line according to where it left the pipeline
    pub fn record_outcome(&self, outcome: PipelineOutcome) {
        self.lines_processed.fetch_add(1, Ordering::Relaxed);

        let counter = match outcome {
            PipelineOutcome::NotAnError => return,
            PipelineOutcome::Duplicate => &self.duplicates_suppressed,
            PipelineOutcome::RateLimited => &self.rate_limited,
            PipelineOutcome::Dispatched => &self.alerts_dispatched,
            PipelineOutcome::DispatchFailed => &self.dispatch_failures,
        };
        self.errors_detected.fetch_add(1, Ordering::Relaxed);
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the latency of one analysis call
    pub fn record_analysis_latency(&self, duration: Duration) {
        debug!("Recording analysis latency: {:?}", duration);

        let mut latencies = lock(&self.analysis_latencies);
        latencies.push_back(duration);
        while latencies.len() > self.max_latency_samples {
            latencies.pop_front();
        }
    }

    /// Record the result of a notification delivery attempt
    pub fn record_notification_result(&self, success: bool) {
        self.record_notification_result_at(success, Utc::now());
    }

    fn record_notification_result_at(&self, success: bool, timestamp: DateTime<Utc>) {
        let mut results = lock(&self.notification_results);
        results.push_back(NotificationResult { success, timestamp });
        while results.len() > self.max_notification_samples {
            results.pop_front();
        }
    }

    fn avg_analysis_latency_ms(&self) -> f64 {
        let latencies = lock(&self.analysis_latencies);
        if latencies.is_empty() {
            return 0.0;
        }

        let total_ms: f64 = latencies.iter().map(|d| d.as_millis() as f64).sum();
        total_ms / latencies.len() as f64
    }

    fn notification_success_rate(&self, now: DateTime<Utc>) -> f64 {
        let one_minute_ago = now - chrono::Duration::minutes(1);
        let results = lock(&self.notification_results);

        let recent: Vec<_> = results
            .iter()
            .filter(|r| r.timestamp >= one_minute_ago)
            .collect();

        if recent.is_empty() {
            return 100.0; // Nothing sent recently counts as healthy
        }

        let successful = recent.iter().filter(|r| r.success).count();
        successful as f64 / recent.len() as f64 * 100.0
    }

    /// Take a snapshot of the counters
    pub fn snapshot(&self) -> PipelineStats {
        let now = Utc::now();
        PipelineStats {
            lines_processed: self.lines_processed.load(Ordering::Relaxed),
            errors_detected: self.errors_detected.load(Ordering::Relaxed),
            duplicates_suppressed: self.duplicates_suppressed.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            alerts_dispatched: self.alerts_dispatched.load(Ordering::Relaxed),
            dispatch_failures: self.dispatch_failures.load(Ordering::Relaxed),
            avg_analysis_latency_ms: self.avg_analysis_latency_ms(),
            notification_success_rate: self.notification_success_rate(now),
            memory_usage_bytes: memory_usage_bytes(),
            timestamp: now,
        }
    }

    /// Log a snapshot, warning about unhealthy values
    pub fn log_summary(&self) -> PipelineStats {
        let stats = self.snapshot();

        info!(
            "Pipeline stats: lines={}, errors={}, duplicates={}, rate_limited={}, dispatched={}, failed={}, analysis_latency={:.1}ms, notification_success={:.1}%, memory={}MB",
            stats.lines_processed,
            stats.errors_detected,
            stats.duplicates_suppressed,
            stats.rate_limited,
            stats.alerts_dispatched,
            stats.dispatch_failures,
            stats.avg_analysis_latency_ms,
            stats.notification_success_rate,
            stats.memory_usage_bytes / 1024 / 1024
        );

        if stats.avg_analysis_latency_ms > 30_000.0 {
            warn!(
                "High analysis latency detected: {:.1}ms",
                stats.avg_analysis_latency_ms
            );
        }

        if stats.notification_success_rate < 90.0 {
            warn!(
                "Low notification success rate: {:.1}%",
                stats.notification_success_rate
            );
        }

        stats
    }
}

/// Resident memory of this process
fn memory_usage_bytes() -> u64 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            for line in status.lines() {
                if let Some(rest) = line.strip_prefix("VmRSS:") {
                    if let Some(Ok(kb)) = rest.split_whitespace().next().map(str::parse::<u64>) {
                        return kb * 1024;
                    }
                }
            }
        }
    }

    #[cfg(unix)]
    {
        // Peak rather than current usage, but better than nothing
        unsafe {
            let mut usage: libc::rusage = std::mem::zeroed();
            if libc::getrusage(libc::RUSAGE_SELF, &mut usage) == 0 {
                #[cfg(target_os = "macos")]
                return usage.ru_maxrss as u64;

                #[cfg(not(target_os = "macos"))]
                return (usage.ru_maxrss as u64) * 1024;
            }
        }
    }

    0
}

/// Measures one analysis call; `finish` records the elapsed time
pub struct AnalysisTimer {
    start_time: Instant,
    monitor: Arc<PipelineMonitor>,
}

impl AnalysisTimer {
    pub fn start(monitor: Arc<PipelineMonitor>) -> Self {
        Self {
            start_time: Instant::now(),
            monitor,
        }
    }

    pub fn finish(self) {
        self.monitor
            .record_analysis_latency(self.start_time.elapsed());
    }
}
