use crate::collectors::{
    AdapterExit, ContainerLogCollector, LineSink, LogSource, ReconnectPolicy, TailOptions,
};
use crate::error::CollectorError;
use log::{info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Default time each adapter gets to stop before it is abandoned
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// What happened to the adapters during shutdown
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Adapters that exited, with how they exited
    pub stopped: Vec<(String, AdapterExit)>,
    /// Adapters still running when their timeout elapsed
    pub abandoned: Vec<String>,
}

/// Owns one log collector per configured container
///
/// All collectors share a single stop signal. Starting a collector for a
/// container that does not exist only ends that collector; the others keep
/// running.
pub struct Supervisor {
    collectors: Vec<ContainerLogCollector>,
    running: Arc<AtomicBool>,
    join_timeout: Duration,
}

impl Supervisor {
    pub fn new(
        references: &[String],
        source: Arc<dyn LogSource>,
        sink: Arc<dyn LineSink>,
        options: TailOptions,
        policy: ReconnectPolicy,
    ) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let collectors = references
            .iter()
            .map(|reference| {
                ContainerLogCollector::new(
                    reference.clone(),
                    Arc::clone(&source),
                    Arc::clone(&sink),
                    Arc::clone(&running),
                )
                .with_options(options)
                .with_reconnect_policy(policy)
            })
            .collect();

        Self {
            collectors,
            running,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
        }
    }

    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    /// Spawn every collector
    ///
    /// # Errors
    ///
    /// Returns the first thread-spawn failure. Collectors started before the
    /// failure keep running until `stop` is called.
    pub fn start(&mut self) -> Result<(), CollectorError> {
        for collector in &mut self.collectors {
            collector.start()?;
        }
        info!("Monitoring {} container(s)", self.collectors.len());
        Ok(())
    }

    /// Number of collectors whose thread is still alive
    pub fn active_count(&self) -> usize {
        self.collectors.iter().filter(|c| !c.is_finished()).count()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Signal every collector to stop and wait for each in turn
    pub fn stop(&mut self) -> ShutdownReport {
        info!("Stopping {} log collector(s)...", self.collectors.len());
        self.running.store(false, Ordering::SeqCst);

        let mut report = ShutdownReport::default();
        for collector in &mut self.collectors {
            let reference = collector.reference().to_string();
            match collector.join_with_timeout(self.join_timeout) {
                Some(exit) => report.stopped.push((reference, exit)),
                None if collector.is_finished() => {
                    // Never started or panicked; nothing left to wait for
                }
                None => report.abandoned.push(reference),
            }
        }

        if report.abandoned.is_empty() {
            info!("All log collectors stopped");
        } else {
            warn!(
                "Abandoned {} log collector(s): {}",
                report.abandoned.len(),
                report.abandoned.join(", ")
            );
        }
        report
    }
}
