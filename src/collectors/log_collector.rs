use crate::collectors::docker::{split_timestamp, LogSource, LogStream, StreamEvent, TailMode, TailOptions};
use crate::error::CollectorError;
use crate::events::{ContainerInfo, LogLine};
use chrono::Utc;
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Receiver of decoded log lines
///
/// Called synchronously on the adapter's own thread; the next line is not
/// read until `deliver` returns.
pub trait LineSink: Send + Sync {
    fn deliver(&self, line: LogLine);
}

/// How an adapter retries after its stream fails or ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Consecutive failed attempts before giving up
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

/// Why an adapter thread finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterExit {
    /// The stop signal was observed
    Stopped,
    /// A non-following stream reached its end
    Finished,
    /// The container reference does not exist
    NotFound,
    /// Too many consecutive stream failures
    GaveUp,
}

/// Tails one container's logs on a dedicated thread
///
/// Resolves the container reference, opens its log stream and hands every
/// non-blank decoded line to the sink. When a following stream fails or
/// ends, the adapter reconnects with exponential backoff, reading only new
/// lines from then on.
pub struct ContainerLogCollector {
    reference: String,
    source: Arc<dyn LogSource>,
    sink: Arc<dyn LineSink>,
    options: TailOptions,
    policy: ReconnectPolicy,
    /// Shared stop signal; `false` means stop
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<AdapterExit>>,
}

impl ContainerLogCollector {
    /// Create a collector for a container name or id
    ///
    /// # Arguments
    ///
    /// * `reference` - Container name or id as configured
    /// * `source` - Runtime access used to resolve and tail the container
    /// * `sink` - Receiver of decoded lines
    /// * `running` - Stop signal shared with the supervisor
    pub fn new(
        reference: String,
        source: Arc<dyn LogSource>,
        sink: Arc<dyn LineSink>,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            reference,
            source,
            sink,
            options: TailOptions::default(),
            policy: ReconnectPolicy::default(),
            running,
            thread_handle: None,
        }
    }

    pub fn with_options(mut self, options: TailOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// Spawn the tailing thread
    ///
    /// # Errors
    ///
    /// Returns `CollectorError::IoError` if the thread cannot be spawned.
    pub fn start(&mut self) -> Result<(), CollectorError> {
        if self.thread_handle.is_some() {
            return Ok(()); // Already running
        }

        let worker = TailWorker {
            reference: self.reference.clone(),
            source: Arc::clone(&self.source),
            sink: Arc::clone(&self.sink),
            options: self.options,
            policy: self.policy,
            running: Arc::clone(&self.running),
        };

        let handle = thread::Builder::new()
            .name(format!("tail-{}", self.reference))
            .spawn(move || worker.run())?;

        self.thread_handle = Some(handle);
        info!("Started log collector for container '{}'", self.reference);
        Ok(())
    }

    /// Whether the tailing thread has exited (or was never started)
    pub fn is_finished(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map_or(true, |handle| handle.is_finished())
    }

    /// Wait up to `timeout` for the thread to exit
    ///
    /// Returns `None` if the thread is still running when the timeout
    /// elapses (it keeps its handle and `is_finished` stays false), if it
    /// panicked, or if it was never started.
    pub fn join_with_timeout(&mut self, timeout: Duration) -> Option<AdapterExit> {
        let deadline = Instant::now() + timeout;

        loop {
            let finished = self.thread_handle.as_ref()?.is_finished();
            if finished {
                break;
            }
            if Instant::now() >= deadline {
                warn!(
                    "Log collector for '{}' did not stop within {:?}, abandoning it",
                    self.reference, timeout
                );
                return None;
            }
            thread::sleep(Duration::from_millis(10));
        }

        let handle = self.thread_handle.take()?;
        match handle.join() {
            Ok(exit) => Some(exit),
            Err(_) => {
                error!("Log collector thread for '{}' panicked", self.reference);
                None
            }
        }
    }
}

/// State owned by a running adapter thread
struct TailWorker {
    reference: String,
    source: Arc<dyn LogSource>,
    sink: Arc<dyn LineSink>,
    options: TailOptions,
    policy: ReconnectPolicy,
    running: Arc<AtomicBool>,
}

/// How a single stream ended
enum StreamEnd {
    Stopped,
    Eof,
    Failed(CollectorError),
}

impl TailWorker {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn run(self) -> AdapterExit {
        let mut options = self.options;
        let mut restart_delay = self.policy.initial_delay;
        let mut consecutive_failures = 0;

        let exit = loop {
            if !self.is_running() {
                break AdapterExit::Stopped;
            }

            let opened = self.source.inspect(&self.reference).and_then(|container| {
                let stream = self.source.open(&container, &options)?;
                Ok((container, stream))
            });

            match opened {
                Ok((container, mut stream)) => {
                    info!(
                        "Tailing container {} ({}) with tail={}",
                        container.name, container.id, options.tail
                    );

                    let (delivered, end) = self.process_stream(&mut stream, &container, &options);

                    // Only reset failure count and delay after a healthy run
                    if delivered > 0 {
                        consecutive_failures = 0;
                        restart_delay = self.policy.initial_delay;
                    }

                    match end {
                        StreamEnd::Stopped => break AdapterExit::Stopped,
                        StreamEnd::Eof if !options.follow => {
                            info!("Log stream for {} finished", container.name);
                            break AdapterExit::Finished;
                        }
                        StreamEnd::Eof => {
                            warn!(
                                "Log stream for {} ended (exit status: {:?})",
                                container.name,
                                stream.exit_status()
                            );
                            consecutive_failures += 1;
                        }
                        StreamEnd::Failed(e) => {
                            error!("Error reading log stream for {}: {}", container.name, e);
                            consecutive_failures += 1;
                        }
                    }
                }
                Err(e) if e.is_terminal() => {
                    error!("Container not found: {}", self.reference);
                    break AdapterExit::NotFound;
                }
                Err(e) => {
                    error!("Failed to open logs for '{}': {}", self.reference, e);
                    consecutive_failures += 1;
                }
            }

            if consecutive_failures >= self.policy.max_attempts {
                error!(
                    "Giving up on container '{}' after {} consecutive failures",
                    self.reference, consecutive_failures
                );
                break AdapterExit::GaveUp;
            }

            // Reconnects only pick up new lines
            options.tail = TailMode::Latest;

            warn!(
                "Reconnecting to '{}' in {:?} (failure #{}/{})",
                self.reference, restart_delay, consecutive_failures, self.policy.max_attempts
            );
            self.sleep_while_running(restart_delay);
            restart_delay = std::cmp::min(restart_delay * 2, self.policy.max_delay);
        };

        info!("Log collector for '{}' exited: {:?}", self.reference, exit);
        exit
    }

    /// Deliver lines until the stream ends, fails or the stop signal is seen
    fn process_stream(
        &self,
        stream: &mut LogStream,
        container: &ContainerInfo,
        options: &TailOptions,
    ) -> (usize, StreamEnd) {
        let mut delivered = 0;

        loop {
            // Check between lines as well as while waiting for data
            if !self.is_running() {
                debug!("Stopping log processing for {} due to shutdown signal", container.name);
                return (delivered, StreamEnd::Stopped);
            }

            let raw = match stream.next_line(&self.running) {
                Ok(StreamEvent::Line(raw)) => raw,
                Ok(StreamEvent::Eof) => return (delivered, StreamEnd::Eof),
                Ok(StreamEvent::Stopped) => return (delivered, StreamEnd::Stopped),
                Err(e) => return (delivered, StreamEnd::Failed(e)),
            };

            let text = match String::from_utf8(raw) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Skipping undecodable line from {}: {}", container.name, e);
                    continue;
                }
            };

            if let Some(line) = to_log_line(container, &text, options.timestamps) {
                delivered += 1;
                self.sink.deliver(line);
            }
        }
    }

    /// Sleep in short slices so shutdown stays responsive
    fn sleep_while_running(&self, duration: Duration) {
        let slice = Duration::from_millis(100);
        let mut remaining = duration;
        while remaining > Duration::ZERO && self.is_running() {
            let step = std::cmp::min(remaining, slice);
            thread::sleep(step);
            remaining = remaining.saturating_sub(step);
        }
    }
}

/// Turn one decoded line into a `LogLine`, or `None` if it is blank
fn to_log_line(container: &ContainerInfo, text: &str, timestamps: bool) -> Option<LogLine> {
    let (observed_at, body) = if timestamps {
        split_timestamp(text)
    } else {
        (None, text)
    };

    let body = body.trim();
    if body.is_empty() {
        return None;
    }

    Some(LogLine {
        container_name: container.name.clone(),
        container_id: container.id.clone(),
        text: body.to_string(),
        observed_at: observed_at.unwrap_or_else(Utc::now),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Cursor, Read};
    use std::sync::Mutex;

    /// Records every delivered line
    #[derive(Default)]
    struct RecordingSink {
        lines: Mutex<Vec<LogLine>>,
    }

    impl RecordingSink {
        fn texts(&self) -> Vec<String> {
            self.lines
                .lock()
                .unwrap()
                .iter()
                .map(|l| l.text.clone())
                .collect()
        }
    }

    impl LineSink for RecordingSink {
        fn deliver(&self, line: LogLine) {
            self.lines.lock().unwrap().push(line);
        }
    }

    /// Never has data and never ends
    struct SilentReader;

    impl Read for SilentReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::WouldBlock, "no data"))
        }
    }

    /// Scripted log source: one stream payload per open, then empty streams
    struct FakeSource {
        exists: bool,
        payloads: Mutex<Vec<Vec<u8>>>,
        silent: bool,
        opened_with: Mutex<Vec<TailOptions>>,
    }

    impl FakeSource {
        fn with_payloads(payloads: Vec<&[u8]>) -> Self {
            Self {
                exists: true,
                payloads: Mutex::new(payloads.into_iter().rev().map(|p| p.to_vec()).collect()),
                silent: false,
                opened_with: Mutex::new(Vec::new()),
            }
        }

        fn missing() -> Self {
            Self {
                exists: false,
                ..Self::with_payloads(vec![])
            }
        }

        fn silent() -> Self {
            Self {
                silent: true,
                ..Self::with_payloads(vec![])
            }
        }

        fn open_count(&self) -> usize {
            self.opened_with.lock().unwrap().len()
        }
    }

    impl LogSource for FakeSource {
        fn inspect(&self, reference: &str) -> Result<ContainerInfo, CollectorError> {
            if !self.exists {
                return Err(CollectorError::ContainerNotFound(reference.to_string()));
            }
            Ok(ContainerInfo {
                name: reference.to_string(),
                id: "0123456789ab".to_string(),
                image: "app:1.0".to_string(),
            })
        }

        fn open(
            &self,
            _container: &ContainerInfo,
            options: &TailOptions,
        ) -> Result<LogStream, CollectorError> {
            self.opened_with.lock().unwrap().push(*options);
            if self.silent {
                return Ok(LogStream::from_reader(SilentReader));
            }
            let payload = self.payloads.lock().unwrap().pop().unwrap_or_default();
            Ok(LogStream::from_reader(Cursor::new(payload)))
        }
    }

    fn fast_policy(max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    fn run_collector(
        source: Arc<FakeSource>,
        sink: Arc<RecordingSink>,
        options: TailOptions,
        policy: ReconnectPolicy,
    ) -> Option<AdapterExit> {
        let running = Arc::new(AtomicBool::new(true));
        let mut collector =
            ContainerLogCollector::new("web".to_string(), source, sink, running)
                .with_options(options)
                .with_reconnect_policy(policy);
        collector.start().unwrap();
        collector.join_with_timeout(Duration::from_secs(5))
    }

    #[test]
    fn test_delivers_decoded_non_blank_lines() {
        let source = Arc::new(FakeSource::with_payloads(vec![
            &b"2024-12-09T10:30:45.000000000Z ERROR first\n\n   \n\xff\xfe bad\nplain second\n"[..],
        ]));
        let sink = Arc::new(RecordingSink::default());
        let options = TailOptions {
            tail: TailMode::Lines(10),
            follow: false,
            timestamps: true,
        };

        let exit = run_collector(Arc::clone(&source), Arc::clone(&sink), options, fast_policy(3));

        assert_eq!(exit, Some(AdapterExit::Finished));
        assert_eq!(sink.texts(), vec!["ERROR first", "plain second"]);

        let lines = sink.lines.lock().unwrap();
        assert_eq!(lines[0].container_name, "web");
        assert_eq!(lines[0].container_id, "0123456789ab");
        assert_eq!(
            lines[0].observed_at.to_rfc3339(),
            "2024-12-09T10:30:45+00:00"
        );
    }

    #[test]
    fn test_timestamps_disabled_keeps_text_intact() {
        let source = Arc::new(FakeSource::with_payloads(vec![
            &b"2024-12-09T10:30:45Z ERROR kept\n"[..],
        ]));
        let sink = Arc::new(RecordingSink::default());
        let options = TailOptions {
            tail: TailMode::Latest,
            follow: false,
            timestamps: false,
        };

        run_collector(source, Arc::clone(&sink), options, fast_policy(3));
        assert_eq!(sink.texts(), vec!["2024-12-09T10:30:45Z ERROR kept"]);
    }

    #[test]
    fn test_missing_container_is_terminal() {
        let source = Arc::new(FakeSource::missing());
        let sink = Arc::new(RecordingSink::default());

        let exit = run_collector(
            Arc::clone(&source),
            Arc::clone(&sink),
            TailOptions::default(),
            fast_policy(5),
        );

        assert_eq!(exit, Some(AdapterExit::NotFound));
        assert_eq!(source.open_count(), 0);
        assert!(sink.texts().is_empty());
    }

    #[test]
    fn test_follow_reconnects_with_latest_tail_then_gives_up() {
        let source = Arc::new(FakeSource::with_payloads(vec![&b"ERROR one\n"[..], &b"ERROR two\n"[..]]));
        let sink = Arc::new(RecordingSink::default());
        let options = TailOptions {
            tail: TailMode::Lines(100),
            follow: true,
            timestamps: false,
        };

        let exit = run_collector(Arc::clone(&source), Arc::clone(&sink), options, fast_policy(2));

        assert_eq!(exit, Some(AdapterExit::GaveUp));
        assert_eq!(sink.texts(), vec!["ERROR one", "ERROR two"]);

        // Two healthy streams, then two empty ones exhaust the attempts
        let opened = source.opened_with.lock().unwrap();
        assert_eq!(opened.len(), 4);
        assert_eq!(opened[0].tail, TailMode::Lines(100));
        assert!(opened[1..].iter().all(|o| o.tail == TailMode::Latest));
    }

    #[test]
    fn test_stop_signal_ends_idle_stream() {
        let source = Arc::new(FakeSource::silent());
        let sink = Arc::new(RecordingSink::default());
        let running = Arc::new(AtomicBool::new(true));

        let mut collector = ContainerLogCollector::new(
            "web".to_string(),
            source,
            sink,
            Arc::clone(&running),
        );
        collector.start().unwrap();
        assert!(!collector.is_finished());

        thread::sleep(Duration::from_millis(50));
        running.store(false, Ordering::SeqCst);

        assert_eq!(
            collector.join_with_timeout(Duration::from_secs(1)),
            Some(AdapterExit::Stopped)
        );
        assert!(collector.is_finished());
    }

    #[test]
    fn test_join_without_start() {
        let running = Arc::new(AtomicBool::new(true));
        let mut collector = ContainerLogCollector::new(
            "web".to_string(),
            Arc::new(FakeSource::silent()),
            Arc::new(RecordingSink::default()),
            running,
        );
        assert!(collector.is_finished());
        assert_eq!(collector.join_with_timeout(Duration::from_millis(10)), None);
    }

    #[test]
    fn test_to_log_line_blank_after_timestamp() {
        let container = ContainerInfo {
            name: "web".to_string(),
            id: "abc".to_string(),
            image: "x".to_string(),
        };
        assert!(to_log_line(&container, "2024-12-09T10:30:45Z    ", true).is_none());
        assert!(to_log_line(&container, "  ", false).is_none());
    }
}
