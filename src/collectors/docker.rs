use crate::error::CollectorError;
use crate::events::{ContainerInfo, Timestamp};
use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Deserializer};
use std::collections::VecDeque;
use std::fmt;
use std::io::{ErrorKind, Read};
use std::process::{Child, Command, Stdio};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// Where a log tail starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TailMode {
    /// Only lines written after the stream opens
    #[default]
    Latest,
    /// The whole retained history
    All,
    /// The last N lines, then continue
    Lines(u64),
}

impl TailMode {
    /// Value for the runtime's `--tail` flag
    pub fn as_arg(&self) -> String {
        match self {
            TailMode::Latest => "0".to_string(),
            TailMode::All => "all".to_string(),
            TailMode::Lines(n) => n.to_string(),
        }
    }
}

impl fmt::Display for TailMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TailMode::Latest => f.write_str("latest"),
            TailMode::All => f.write_str("all"),
            TailMode::Lines(n) => write!(f, "{}", n),
        }
    }
}

impl FromStr for TailMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "latest" => Ok(TailMode::Latest),
            "all" => Ok(TailMode::All),
            other => other
                .parse::<u64>()
                .map(TailMode::Lines)
                .map_err(|_| format!("tail must be \"latest\", \"all\" or a line count, got {:?}", s)),
        }
    }
}

impl<'de> Deserialize<'de> for TailMode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawTail {
            Count(u64),
            Text(String),
        }

        match RawTail::deserialize(deserializer)? {
            RawTail::Count(n) => Ok(TailMode::Lines(n)),
            RawTail::Text(text) => text.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// How to open a container's log stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TailOptions {
    pub tail: TailMode,
    /// Keep the stream open for new lines
    pub follow: bool,
    /// Ask the runtime to prefix each line with its RFC 3339 timestamp
    pub timestamps: bool,
}

impl Default for TailOptions {
    fn default() -> Self {
        Self {
            tail: TailMode::Latest,
            follow: true,
            timestamps: true,
        }
    }
}

/// Result of polling a log stream
#[derive(Debug, PartialEq, Eq)]
pub enum StreamEvent {
    /// One complete raw line, without its terminator
    Line(Vec<u8>),
    /// Every source reached end of file
    Eof,
    /// The running flag was cleared while waiting
    Stopped,
}

/// Prefix the docker CLI puts on errors reported by the daemon
pub const DAEMON_ERROR_PREFIX: &str = "Error response from daemon:";

/// A cancellable stream of raw log lines
///
/// Reads from one or more byte sources (stdout and stderr of the runtime
/// process), splitting each on `\n`. Sources opened by the runtime are put in
/// non-blocking mode so the running flag is observed within ~10ms even when no
/// output arrives. Dropping the stream kills the runtime process.
///
/// Daemon errors printed on the CLI's stderr are held back until the process
/// exits: a non-zero exit turns them into a stream error, a clean exit
/// releases them as ordinary lines.
pub struct LogStream {
    sources: Vec<StreamSource>,
    pending: VecDeque<Vec<u8>>,
    held: Vec<Vec<u8>>,
    child: Option<Child>,
}

struct StreamSource {
    reader: Box<dyn Read + Send>,
    buffer: Vec<u8>,
    open: bool,
    /// Carries the runtime CLI's own diagnostics as well as container output
    diagnostics: bool,
}

impl StreamSource {
    fn new(reader: Box<dyn Read + Send>, diagnostics: bool) -> Self {
        Self {
            reader,
            buffer: Vec::new(),
            open: true,
            diagnostics,
        }
    }

    /// Queue a complete line, holding back daemon errors from the CLI
    fn route(&self, line: Vec<u8>, pending: &mut VecDeque<Vec<u8>>, held: &mut Vec<Vec<u8>>) {
        if self.diagnostics && line.starts_with(DAEMON_ERROR_PREFIX.as_bytes()) {
            held.push(line);
        } else {
            pending.push_back(line);
        }
    }
}

impl LogStream {
    /// Wrap arbitrary readers, mainly for tests
    pub fn from_readers(readers: Vec<Box<dyn Read + Send>>) -> Self {
        Self::from_sources(
            readers
                .into_iter()
                .map(|reader| StreamSource::new(reader, false))
                .collect(),
        )
    }

    fn from_sources(sources: Vec<StreamSource>) -> Self {
        Self {
            sources,
            pending: VecDeque::new(),
            held: Vec::new(),
            child: None,
        }
    }

    /// Wrap a single reader
    pub fn from_reader<R: Read + Send + 'static>(reader: R) -> Self {
        Self::from_readers(vec![Box::new(reader)])
    }

    /// Take ownership of a spawned runtime process and read both its pipes
    fn from_child(mut child: Child) -> Result<Self, CollectorError> {
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CollectorError::ParseError("No stdout available".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| CollectorError::ParseError("No stderr available".to_string()))?;

        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            set_nonblocking(stdout.as_raw_fd());
            set_nonblocking(stderr.as_raw_fd());
        }

        let mut stream = Self::from_sources(vec![
            StreamSource::new(Box::new(stdout), false),
            StreamSource::new(Box::new(stderr), true),
        ]);
        stream.child = Some(child);
        Ok(stream)
    }

    /// Wait for the next complete line
    ///
    /// Checks `running` before every read pass and sleeps 10ms when no source
    /// had data. A trailing partial line is delivered when its source closes.
    ///
    /// # Errors
    ///
    /// Returns `CollectorError::SubprocessTerminated` when the runtime process
    /// exits unsuccessfully, carrying any daemon errors it printed.
    pub fn next_line(&mut self, running: &AtomicBool) -> Result<StreamEvent, CollectorError> {
        let mut buf = [0u8; 4096];

        loop {
            if let Some(line) = self.pending.pop_front() {
                return Ok(StreamEvent::Line(line));
            }

            if !running.load(Ordering::SeqCst) {
                return Ok(StreamEvent::Stopped);
            }

            if self.sources.iter().all(|s| !s.open) {
                self.finish()?;
                if self.pending.is_empty() {
                    return Ok(StreamEvent::Eof);
                }
                continue;
            }

            let mut progressed = false;
            for source in self.sources.iter_mut().filter(|s| s.open) {
                match source.reader.read(&mut buf) {
                    Ok(0) => {
                        source.open = false;
                        progressed = true;
                        if !source.buffer.is_empty() {
                            let line = std::mem::take(&mut source.buffer);
                            source.route(line, &mut self.pending, &mut self.held);
                        }
                    }
                    Ok(n) => {
                        progressed = true;
                        source.buffer.extend_from_slice(&buf[..n]);
                        while let Some(pos) = source.buffer.iter().position(|b| *b == b'\n') {
                            let mut line: Vec<u8> = source.buffer.drain(..=pos).collect();
                            line.pop();
                            if line.last() == Some(&b'\r') {
                                line.pop();
                            }
                            source.route(line, &mut self.pending, &mut self.held);
                        }
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                    Err(e) if e.kind() == ErrorKind::Interrupted => {
                        progressed = true;
                    }
                    Err(e) => return Err(CollectorError::IoError(e)),
                }
            }

            if !progressed {
                thread::sleep(Duration::from_millis(10));
            }
        }
    }

    /// Settle held lines once every source is closed
    ///
    /// Waits for the runtime process, whose pipes are already at end of file.
    fn finish(&mut self) -> Result<(), CollectorError> {
        if let Some(child) = self.child.as_mut() {
            let status = child.wait()?;
            if !status.success() {
                let diagnostics: Vec<String> = self
                    .held
                    .drain(..)
                    .map(|line| String::from_utf8_lossy(&line).into_owned())
                    .collect();
                return Err(CollectorError::SubprocessTerminated(if diagnostics.is_empty() {
                    format!("log process exited with {}", status)
                } else {
                    format!("log process exited with {}: {}", status, diagnostics.join("; "))
                }));
            }
        }
        self.pending.extend(self.held.drain(..));
        Ok(())
    }

    /// Exit status of the runtime process if it has already finished
    pub fn exit_status(&mut self) -> Option<std::process::ExitStatus> {
        self.child
            .as_mut()
            .and_then(|child| child.try_wait().ok().flatten())
    }
}

impl Drop for LogStream {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                debug!("Failed to kill log subprocess: {}", e);
            }
            let _ = child.wait();
        }
    }
}

#[cfg(unix)]
fn set_nonblocking(fd: std::os::unix::io::RawFd) {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags >= 0 {
            libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
        }
    }
}

/// Split a runtime-added RFC 3339 timestamp from the start of a line
///
/// Returns `None` and the untouched line when the prefix is not a timestamp.
pub fn split_timestamp(line: &str) -> (Option<Timestamp>, &str) {
    if let Some((prefix, rest)) = line.split_once(' ') {
        if let Ok(ts) = DateTime::parse_from_rfc3339(prefix) {
            return (Some(ts.with_timezone(&Utc)), rest);
        }
    } else if let Ok(ts) = DateTime::parse_from_rfc3339(line) {
        return (Some(ts.with_timezone(&Utc)), "");
    }
    (None, line)
}

/// Source of container identities and log streams
pub trait LogSource: Send + Sync {
    /// Resolve a name or id to the container's identity
    fn inspect(&self, reference: &str) -> Result<ContainerInfo, CollectorError>;

    /// Open a tail on a resolved container
    fn open(
        &self,
        container: &ContainerInfo,
        options: &TailOptions,
    ) -> Result<LogStream, CollectorError>;
}

/// Lookup of a container's image reference by name
#[cfg_attr(test, mockall::automock)]
pub trait ContainerMetadata: Send + Sync {
    fn image(&self, container_name: &str) -> Result<String, CollectorError>;
}

/// `docker inspect` output, reduced to the fields we use
#[derive(Debug, Deserialize)]
struct InspectEntry {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Config")]
    config: Option<InspectConfig>,
}

#[derive(Debug, Deserialize)]
struct InspectConfig {
    #[serde(rename = "Image")]
    image: Option<String>,
}

/// Docker access through the `docker` command-line client
///
/// Every call spawns the CLI, so whatever context and credentials the CLI is
/// configured with apply here too.
#[derive(Debug, Clone)]
pub struct DockerCli {
    program: String,
    base_args: Vec<String>,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl DockerCli {
    /// Use the given CLI binary
    pub fn new(binary: impl Into<String>) -> Self {
        Self::with_command(binary, Vec::new())
    }

    /// Use a program plus leading arguments, e.g. a wrapper script run by `sh`
    pub fn with_command(program: impl Into<String>, base_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            base_args,
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.base_args);
        command
    }

    /// Check that the daemon answers, returning its version
    pub fn ping(&self) -> Result<String, CollectorError> {
        let output = self
            .command()
            .args(["version", "--format", "{{.Server.Version}}"])
            .stdin(Stdio::null())
            .output()
            .map_err(|e| CollectorError::SubprocessSpawn(format!("{}: {}", self.program, e)))?;

        if !output.status.success() {
            return Err(CollectorError::SubprocessTerminated(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Arguments for `docker logs`
    fn logs_args(container_id: &str, options: &TailOptions) -> Vec<String> {
        let mut args = vec!["logs".to_string()];
        if options.follow {
            args.push("--follow".to_string());
        }
        if options.timestamps {
            args.push("--timestamps".to_string());
        }
        args.push("--tail".to_string());
        args.push(options.tail.as_arg());
        args.push(container_id.to_string());
        args
    }

    fn parse_inspect(reference: &str, stdout: &[u8]) -> Result<ContainerInfo, CollectorError> {
        let entries: Vec<InspectEntry> = serde_json::from_slice(stdout)
            .map_err(|e| CollectorError::ParseError(format!("docker inspect output: {}", e)))?;

        let entry = entries
            .into_iter()
            .next()
            .ok_or_else(|| CollectorError::ContainerNotFound(reference.to_string()))?;

        Ok(ContainerInfo {
            name: entry.name.trim_start_matches('/').to_string(),
            id: entry.id.chars().take(12).collect(),
            image: entry
                .config
                .and_then(|c| c.image)
                .filter(|image| !image.is_empty())
                .unwrap_or_else(|| "unknown".to_string()),
        })
    }

    fn is_not_found(stderr: &str) -> bool {
        stderr.contains("No such container") || stderr.contains("No such object")
    }
}

impl LogSource for DockerCli {
    fn inspect(&self, reference: &str) -> Result<ContainerInfo, CollectorError> {
        let output = self
            .command()
            .args(["inspect", "--type", "container", reference])
            .stdin(Stdio::null())
            .output()
            .map_err(|e| CollectorError::SubprocessSpawn(format!("{}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if Self::is_not_found(&stderr) {
                return Err(CollectorError::ContainerNotFound(reference.to_string()));
            }
            return Err(CollectorError::SubprocessTerminated(format!(
                "docker inspect {}: {}",
                reference,
                stderr.trim()
            )));
        }

        Self::parse_inspect(reference, &output.stdout)
    }

    fn open(
        &self,
        container: &ContainerInfo,
        options: &TailOptions,
    ) -> Result<LogStream, CollectorError> {
        let args = Self::logs_args(&container.id, options);
        debug!("Spawning {} {}", self.program, args.join(" "));

        let child = self
            .command()
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| CollectorError::SubprocessSpawn(format!("{} logs: {}", self.program, e)))?;

        LogStream::from_child(child)
    }
}

impl ContainerMetadata for DockerCli {
    fn image(&self, container_name: &str) -> Result<String, CollectorError> {
        self.inspect(container_name).map(|info| info.image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn running() -> AtomicBool {
        AtomicBool::new(true)
    }

    fn collect_lines(stream: &mut LogStream) -> Vec<Vec<u8>> {
        let flag = running();
        let mut lines = Vec::new();
        while let Ok(StreamEvent::Line(line)) = stream.next_line(&flag) {
            lines.push(line);
        }
        lines
    }

    #[test]
    fn test_tail_mode_parsing() {
        assert_eq!("latest".parse::<TailMode>().unwrap(), TailMode::Latest);
        assert_eq!("ALL".parse::<TailMode>().unwrap(), TailMode::All);
        assert_eq!("100".parse::<TailMode>().unwrap(), TailMode::Lines(100));
        assert!("soon".parse::<TailMode>().is_err());
        assert!("-5".parse::<TailMode>().is_err());
    }

    #[test]
    fn test_tail_mode_args() {
        assert_eq!(TailMode::Latest.as_arg(), "0");
        assert_eq!(TailMode::All.as_arg(), "all");
        assert_eq!(TailMode::Lines(50).as_arg(), "50");
    }

    #[test]
    fn test_tail_mode_deserialize_string_or_number() {
        #[derive(Deserialize)]
        struct Holder {
            tail: TailMode,
        }

        let text: Holder = toml::from_str("tail = \"latest\"").unwrap();
        assert_eq!(text.tail, TailMode::Latest);

        let quoted: Holder = toml::from_str("tail = \"200\"").unwrap();
        assert_eq!(quoted.tail, TailMode::Lines(200));

        let number: Holder = toml::from_str("tail = 25").unwrap();
        assert_eq!(number.tail, TailMode::Lines(25));

        assert!(toml::from_str::<Holder>("tail = \"yesterday\"").is_err());
    }

    #[test]
    fn test_logs_args() {
        let options = TailOptions {
            tail: TailMode::Lines(10),
            follow: true,
            timestamps: true,
        };
        assert_eq!(
            DockerCli::logs_args("abc123", &options),
            vec!["logs", "--follow", "--timestamps", "--tail", "10", "abc123"]
        );

        let latest = TailOptions {
            tail: TailMode::Latest,
            follow: false,
            timestamps: false,
        };
        assert_eq!(
            DockerCli::logs_args("abc123", &latest),
            vec!["logs", "--tail", "0", "abc123"]
        );
    }

    #[test]
    fn test_parse_inspect() {
        let json = br#"[{"Id":"0123456789abcdef0123","Name":"/web","Config":{"Image":"nginx:1.27"}}]"#;
        let info = DockerCli::parse_inspect("web", json).unwrap();
        assert_eq!(info.name, "web");
        assert_eq!(info.id, "0123456789ab");
        assert_eq!(info.image, "nginx:1.27");
    }

    #[test]
    fn test_parse_inspect_missing_image() {
        let json = br#"[{"Id":"abc","Name":"/db","Config":null}]"#;
        let info = DockerCli::parse_inspect("db", json).unwrap();
        assert_eq!(info.image, "unknown");
        assert_eq!(info.id, "abc");
    }

    #[test]
    fn test_parse_inspect_empty_is_not_found() {
        assert!(matches!(
            DockerCli::parse_inspect("ghost", b"[]"),
            Err(CollectorError::ContainerNotFound(_))
        ));
        assert!(matches!(
            DockerCli::parse_inspect("ghost", b"garbage"),
            Err(CollectorError::ParseError(_))
        ));
    }

    #[test]
    fn test_not_found_detection() {
        assert!(DockerCli::is_not_found(
            "Error response from daemon: No such container: ghost"
        ));
        assert!(DockerCli::is_not_found("Error: No such object: ghost"));
        assert!(!DockerCli::is_not_found("permission denied"));
    }

    #[test]
    fn test_split_timestamp() {
        let (ts, rest) = split_timestamp("2024-12-09T10:30:45.123456789Z ERROR boom");
        assert_eq!(rest, "ERROR boom");
        assert_eq!(
            ts.unwrap().to_rfc3339(),
            "2024-12-09T10:30:45.123456789+00:00"
        );

        let (ts, rest) = split_timestamp("ERROR no timestamp here");
        assert!(ts.is_none());
        assert_eq!(rest, "ERROR no timestamp here");
    }

    #[test]
    fn test_split_timestamp_bare() {
        let (ts, rest) = split_timestamp("2024-12-09T10:30:45Z");
        assert!(ts.is_some());
        assert_eq!(rest, "");
    }

    #[test]
    fn test_stream_splits_lines() {
        let mut stream = LogStream::from_reader(Cursor::new(b"one\ntwo\r\n\nthree".to_vec()));
        let lines = collect_lines(&mut stream);
        assert_eq!(
            lines,
            vec![b"one".to_vec(), b"two".to_vec(), b"".to_vec(), b"three".to_vec()]
        );
    }

    #[test]
    fn test_stream_reports_eof() {
        let flag = running();
        let mut stream = LogStream::from_reader(Cursor::new(b"only\n".to_vec()));
        assert_eq!(
            stream.next_line(&flag).unwrap(),
            StreamEvent::Line(b"only".to_vec())
        );
        assert_eq!(stream.next_line(&flag).unwrap(), StreamEvent::Eof);
    }

    #[test]
    fn test_stream_merges_sources() {
        let mut stream = LogStream::from_readers(vec![
            Box::new(Cursor::new(b"out\n".to_vec())),
            Box::new(Cursor::new(b"err\n".to_vec())),
        ]);
        let mut lines = collect_lines(&mut stream);
        lines.sort();
        assert_eq!(lines, vec![b"err".to_vec(), b"out".to_vec()]);
    }

    #[test]
    fn test_stream_stops_when_flag_cleared() {
        let flag = AtomicBool::new(false);
        let mut stream = LogStream::from_reader(Cursor::new(b"ignored\n".to_vec()));
        assert_eq!(stream.next_line(&flag).unwrap(), StreamEvent::Stopped);
    }

    #[cfg(unix)]
    mod cli {
        use super::*;
        use std::io::Write;
        use tempfile::NamedTempFile;

        const HEALTHY_LOGS: &str = r#"printf '2024-12-09T10:30:45.000000000Z ERROR first\n'
    printf 'warn second\n' >&2"#;

        const DAEMON_FAILURE_LOGS: &str = r#"printf 'ERROR from the app\n'
    echo 'Error response from daemon: configured logging driver does not support reading' >&2
    exit 1"#;

        const UNREADABLE_DRIVER_LOGS: &str = r#"echo 'Error response from daemon: configured logging driver does not support reading' >&2
    exit 1"#;

        /// A shell script standing in for the docker CLI
        fn fake_docker() -> (NamedTempFile, DockerCli) {
            fake_docker_with_logs(HEALTHY_LOGS)
        }

        /// Fake CLI whose `logs` subcommand runs `logs_body`
        fn fake_docker_with_logs(logs_body: &str) -> (NamedTempFile, DockerCli) {
            let mut script = NamedTempFile::new().unwrap();
            writeln!(
                script,
                r#"case "$1" in
  inspect)
    if [ "$4" = "ghost" ]; then echo "Error: No such container: ghost" >&2; exit 1; fi
    echo '[{{"Id":"0123456789abcdef","Name":"/'"$4"'","Config":{{"Image":"nginx:1.27"}}}}]'
    ;;
  logs)
    {}
    ;;
  version)
    echo 24.0.7
    ;;
esac"#,
                logs_body
            )
            .unwrap();
            script.flush().unwrap();

            let cli = DockerCli::with_command(
                "sh",
                vec![script.path().to_string_lossy().into_owned()],
            );
            (script, cli)
        }

        #[test]
        fn test_inspect_via_cli() {
            let (_script, cli) = fake_docker();
            let info = cli.inspect("web").unwrap();
            assert_eq!(info.name, "web");
            assert_eq!(info.id, "0123456789ab");
            assert_eq!(info.image, "nginx:1.27");
            assert_eq!(cli.image("web").unwrap(), "nginx:1.27");
        }

        #[test]
        fn test_inspect_not_found_via_cli() {
            let (_script, cli) = fake_docker();
            assert!(matches!(
                cli.inspect("ghost"),
                Err(CollectorError::ContainerNotFound(_))
            ));
        }

        #[test]
        fn test_ping_via_cli() {
            let (_script, cli) = fake_docker();
            assert_eq!(cli.ping().unwrap(), "24.0.7");
        }

        #[test]
        fn test_missing_binary_is_spawn_error() {
            let cli = DockerCli::new("definitely-not-a-docker-binary");
            assert!(matches!(
                cli.inspect("web"),
                Err(CollectorError::SubprocessSpawn(_))
            ));
        }

        #[test]
        fn test_open_reads_stdout_and_stderr() {
            let (_script, cli) = fake_docker();
            let info = cli.inspect("web").unwrap();
            let mut stream = cli.open(&info, &TailOptions::default()).unwrap();

            let mut lines: Vec<String> = collect_lines(&mut stream)
                .into_iter()
                .map(|l| String::from_utf8(l).unwrap())
                .collect();
            lines.sort();
            assert_eq!(
                lines,
                vec![
                    "2024-12-09T10:30:45.000000000Z ERROR first".to_string(),
                    "warn second".to_string()
                ]
            );
        }

        /// Drain a stream, returning its lines and how it ended
        fn drain(stream: &mut LogStream) -> (Vec<String>, Result<StreamEvent, CollectorError>) {
            let flag = running();
            let mut lines = Vec::new();
            loop {
                match stream.next_line(&flag) {
                    Ok(StreamEvent::Line(line)) => lines.push(String::from_utf8(line).unwrap()),
                    other => return (lines, other),
                }
            }
        }

        #[test]
        fn test_failed_logs_process_is_stream_error() {
            let (_script, cli) = fake_docker_with_logs(DAEMON_FAILURE_LOGS);
            let info = cli.inspect("web").unwrap();
            let mut stream = cli.open(&info, &TailOptions::default()).unwrap();

            let (lines, end) = drain(&mut stream);

            assert_eq!(lines, vec!["ERROR from the app".to_string()]);
            match end {
                Err(CollectorError::SubprocessTerminated(msg)) => {
                    assert!(msg.contains("configured logging driver does not support reading"))
                }
                other => panic!("expected terminated stream, got {:?}", other),
            }
        }

        #[test]
        fn test_daemon_prefixed_line_released_on_clean_exit() {
            let (_script, cli) = fake_docker_with_logs(
                "echo 'Error response from daemon: transient' >&2",
            );
            let info = cli.inspect("web").unwrap();
            let mut stream = cli.open(&info, &TailOptions::default()).unwrap();

            let (lines, end) = drain(&mut stream);

            assert_eq!(
                lines,
                vec!["Error response from daemon: transient".to_string()]
            );
            assert_eq!(end.unwrap(), StreamEvent::Eof);
        }

        #[test]
        fn test_collector_does_not_deliver_daemon_errors() {
            use crate::collectors::log_collector::{
                AdapterExit, ContainerLogCollector, LineSink, ReconnectPolicy,
            };
            use crate::events::LogLine;
            use std::sync::{Arc, Mutex};

            #[derive(Default)]
            struct Lines(Mutex<Vec<String>>);

            impl LineSink for Lines {
                fn deliver(&self, line: LogLine) {
                    self.0.lock().unwrap().push(line.text);
                }
            }

            let (_script, cli) = fake_docker_with_logs(UNREADABLE_DRIVER_LOGS);
            let sink = Arc::new(Lines::default());
            let mut collector = ContainerLogCollector::new(
                "web".to_string(),
                Arc::new(cli),
                sink.clone(),
                Arc::new(AtomicBool::new(true)),
            )
            .with_options(TailOptions {
                tail: TailMode::All,
                follow: false,
                timestamps: false,
            })
            .with_reconnect_policy(ReconnectPolicy {
                max_attempts: 2,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
            });

            collector.start().unwrap();
            let exit = collector.join_with_timeout(Duration::from_secs(10));

            assert_eq!(exit, Some(AdapterExit::GaveUp));
            assert!(sink.0.lock().unwrap().is_empty());
        }
    }
}
