use anyhow::{Context, Result};
use clap::Parser;
use docker_eyes::ai::{
    AnalysisBackend, AzureOpenAIBackend, ErrorAnalyzer, MockBackend, OpenAIBackend,
};
use docker_eyes::alerts::FeishuNotifier;
use docker_eyes::collectors::DockerCli;
use docker_eyes::config::{AnalysisBackendKind, AnalysisConfig, Config};
use docker_eyes::detection::ErrorDetector;
use docker_eyes::monitoring::PipelineMonitor;
use docker_eyes::persistence::{ErrorRecorder, HttpErrorRecorder, NoopRecorder};
use docker_eyes::{AlertOrchestrator, AlertState, PipelineSink, Supervisor};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

/// Command-line arguments for the Docker log monitor
#[derive(Parser)]
#[command(
    name = "docker-eyes",
    about = "Docker log monitor - AI-assisted container error alerting",
    long_about = "Tails the logs of a set of Docker containers, detects error lines, \
                  explains them with an AI backend and sends deduplicated, rate-limited \
                  alerts to a Feishu webhook."
)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        value_name = "FILE",
        default_value = "config/config.toml",
        help = "Configuration file path (TOML format)"
    )]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(
        short,
        long,
        help = "Enable verbose logging output (sets RUST_LOG=debug)"
    )]
    verbose: bool,

    /// Validate the configuration and exit
    #[arg(long)]
    check_config: bool,
}

impl Cli {
    /// Validate the CLI arguments
    ///
    /// # Returns
    ///
    /// `Ok(())` if all arguments are valid, `Err(String)` with error message otherwise
    fn validate(&self) -> Result<(), String> {
        if !self.config.exists() {
            return Err(format!(
                "Configuration file not found: {}",
                self.config.display()
            ));
        }

        if !self.config.is_file() {
            return Err(format!(
                "Configuration path is not a file: {}",
                self.config.display()
            ));
        }

        if let Some(extension) = self.config.extension() {
            if extension != "toml" {
                warn!(
                    "Configuration file does not have .toml extension: {}",
                    self.config.display()
                );
            }
        }

        Ok(())
    }

    /// Convert config path to string safely, handling non-UTF-8 paths
    fn config_path_str(&self) -> Result<&str, String> {
        self.config.to_str().ok_or_else(|| {
            format!(
                "Configuration file path contains invalid UTF-8 characters: {}",
                self.config.display()
            )
        })
    }
}

/// Wires the collectors, the alert pipeline and the runtime together
struct LogMonitor {
    config: Config,
    runtime: Runtime,
    docker: Arc<DockerCli>,
    notifier: Arc<FeishuNotifier>,
    monitor: Arc<PipelineMonitor>,
    supervisor: Supervisor,
    shutdown_sender: Sender<()>,
    shutdown_receiver: Receiver<()>,
}

impl LogMonitor {
    fn new(config: Config) -> Result<Self> {
        info!("Initializing log monitor");

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("docker-eyes-rt")
            .build()
            .context("Failed to create async runtime")?;

        let docker = Arc::new(DockerCli::new(config.docker.binary.clone()));
        let monitor = Arc::new(PipelineMonitor::new());

        let mut analyzer = ErrorAnalyzer::with_backend(build_backend(&config.analysis)?);
        analyzer.set_monitoring(Arc::clone(&monitor));
        info!("Using {} analysis backend", analyzer.backend_name());

        let notifier = Arc::new(
            FeishuNotifier::new(config.feishu.webhook_url.clone())
                .context("Failed to create Feishu notifier")?,
        );

        let recorder: Arc<dyn ErrorRecorder> = match &config.dashboard {
            Some(dashboard) => {
                info!("Recording errors to dashboard at {}", dashboard.record_url);
                Arc::new(
                    HttpErrorRecorder::new(dashboard.record_url.clone(), runtime.handle().clone())
                        .context("Failed to create dashboard recorder")?,
                )
            }
            None => Arc::new(NoopRecorder),
        };

        let state = Arc::new(AlertState::with_limits(
            config.notification.dedup_window,
            config.notification.max_rate_per_minute,
        ));

        let orchestrator = Arc::new(AlertOrchestrator::new(
            ErrorDetector::new(
                config.error_detection.keywords.clone(),
                config.error_detection.case_sensitive,
            ),
            state,
            docker.clone(),
            analyzer,
            notifier.clone(),
            recorder,
            Arc::clone(&monitor),
        ));

        let sink = Arc::new(PipelineSink::new(orchestrator, runtime.handle().clone()));

        let supervisor = Supervisor::new(
            &config.docker.containers,
            docker.clone(),
            sink,
            config.docker.log_settings,
            config.supervisor.reconnect_policy(),
        )
        .with_join_timeout(config.supervisor.join_timeout());

        let (shutdown_sender, shutdown_receiver) = mpsc::channel();

        Ok(Self {
            config,
            runtime,
            docker,
            notifier,
            monitor,
            supervisor,
            shutdown_sender,
            shutdown_receiver,
        })
    }

    /// Check collaborators and start one collector per container
    fn start(&mut self) -> Result<()> {
        match self.docker.ping() {
            Ok(version) => info!("Connected to Docker daemon {}", version),
            Err(e) => warn!("Docker daemon did not answer: {}", e),
        }

        match self.runtime.block_on(self.notifier.test_connection()) {
            Ok(()) => info!("Feishu webhook connection test succeeded"),
            Err(e) => warn!("Feishu webhook connection test failed: {}", e),
        }

        self.supervisor
            .start()
            .context("Failed to start log collectors")?;

        info!(
            "Monitoring containers: {}",
            self.config.docker.containers.join(", ")
        );
        Ok(())
    }

    /// Block until a shutdown signal, logging statistics periodically
    fn wait_for_shutdown(&self) {
        info!("Waiting for shutdown signal...");
        let interval = self.config.supervisor.stats_interval();
        let mut idle_reported = false;

        loop {
            match self.shutdown_receiver.recv_timeout(interval) {
                Ok(()) => {
                    info!("Shutdown signal received");
                    break;
                }
                Err(RecvTimeoutError::Timeout) => {
                    self.monitor.log_summary();

                    if self.supervisor.active_count() == 0 && !idle_reported {
                        warn!("No log collector is running any more");
                        idle_reported = true;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    error!("Shutdown channel disconnected");
                    break;
                }
            }
        }
    }

    fn stop(mut self) {
        let report = self.supervisor.stop();
        info!(
            "{} collector(s) stopped, {} abandoned",
            report.stopped.len(),
            report.abandoned.len()
        );

        self.monitor.log_summary();
        self.runtime.shutdown_timeout(Duration::from_secs(2));
    }
}

/// Build the configured analysis backend
fn build_backend(config: &AnalysisConfig) -> Result<Arc<dyn AnalysisBackend>> {
    let backend: Arc<dyn AnalysisBackend> = match config.backend {
        AnalysisBackendKind::AzureOpenAI => Arc::new(AzureOpenAIBackend::new(
            AnalysisConfig::require(&config.endpoint, "endpoint")?.to_string(),
            AnalysisConfig::require(&config.api_key, "api_key")?.to_string(),
            AnalysisConfig::require(&config.deployment_name, "deployment_name")?.to_string(),
            config.api_version.clone(),
            config.timeout(),
        )?),
        AnalysisBackendKind::OpenAI => {
            let api_key = AnalysisConfig::require(&config.api_key, "api_key")?.to_string();
            let model =
                AnalysisConfig::require(&config.deployment_name, "deployment_name")?.to_string();
            match &config.endpoint {
                Some(base_url) => Arc::new(OpenAIBackend::with_base_url(
                    api_key,
                    model,
                    base_url.clone(),
                    config.timeout(),
                )?),
                None => Arc::new(OpenAIBackend::new(api_key, model, config.timeout())?),
            }
        }
        AnalysisBackendKind::Mock => Arc::new(MockBackend::success()),
    };
    Ok(backend)
}

fn load_config(path: &str) -> Result<Config> {
    info!("Loading configuration from: {}", path);
    Config::from_file(Path::new(path))
        .with_context(|| format!("Invalid configuration in '{}'", path))
}

fn run(cli: Cli) -> Result<()> {
    cli.validate().map_err(anyhow::Error::msg)?;
    let config_path = cli.config_path_str().map_err(anyhow::Error::msg)?;
    let config = load_config(config_path)?;

    if cli.check_config {
        info!("Configuration is valid");
        return Ok(());
    }

    let mut log_monitor = LogMonitor::new(config)?;
    log_monitor.start()?;

    let shutdown_sender = log_monitor.shutdown_sender.clone();
    ctrlc::set_handler(move || {
        info!("Received interrupt signal, shutting down gracefully...");
        if let Err(e) = shutdown_sender.send(()) {
            error!("Failed to send shutdown signal: {}", e);
        }
    })
    .context("Error setting signal handler for graceful shutdown")?;

    info!("Docker log monitor is running. Press Ctrl+C to stop.");
    log_monitor.wait_for_shutdown();
    log_monitor.stop();

    info!("Docker log monitor shutdown complete");
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        std::env::set_var("RUST_LOG", "debug");
    } else if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    info!("Starting Docker log monitor");

    if let Err(e) = run(cli) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn cli_for(path: PathBuf) -> Cli {
        Cli {
            config: path,
            verbose: false,
            check_config: false,
        }
    }

    #[test]
    fn test_cli_validation_with_existing_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(b"[docker]\ncontainers = [\"web\"]\n").unwrap();

        assert!(cli_for(file.path().to_path_buf()).validate().is_ok());
    }

    #[test]
    fn test_cli_validation_with_missing_file() {
        let cli = cli_for(PathBuf::from("/nonexistent/config.toml"));
        assert!(cli.validate().is_err());
    }

    #[test]
    fn test_cli_validation_with_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(cli_for(dir.path().to_path_buf()).validate().is_err());
    }

    #[test]
    fn test_cli_default_config_path() {
        let cli = Cli::parse_from(["docker-eyes"]);
        assert_eq!(cli.config, PathBuf::from("config/config.toml"));
        assert!(!cli.verbose);
        assert!(!cli.check_config);

        let cli = Cli::parse_from(["docker-eyes", "-c", "/etc/eyes.toml", "-v", "--check-config"]);
        assert_eq!(cli.config, PathBuf::from("/etc/eyes.toml"));
        assert!(cli.verbose);
        assert!(cli.check_config);
    }

    #[test]
    fn test_config_path_str_with_valid_path() {
        let cli = cli_for(PathBuf::from("config.toml"));
        assert_eq!(cli.config_path_str().unwrap(), "config.toml");
    }

    #[test]
    fn test_build_mock_backend() {
        let config = AnalysisConfig {
            backend: AnalysisBackendKind::Mock,
            ..AnalysisConfig::default()
        };
        assert_eq!(build_backend(&config).unwrap().name(), "Mock");
    }

    #[test]
    fn test_build_azure_backend_requires_key() {
        let config = AnalysisConfig {
            backend: AnalysisBackendKind::AzureOpenAI,
            endpoint: Some("https://example.openai.azure.com".to_string()),
            deployment_name: Some("gpt-4o".to_string()),
            ..AnalysisConfig::default()
        };
        assert!(build_backend(&config).is_err());

        let config = AnalysisConfig {
            api_key: Some("secret".to_string()),
            ..config
        };
        assert_eq!(build_backend(&config).unwrap().name(), "Azure OpenAI");
    }

    #[test]
    fn test_build_openai_backend_with_base_url() {
        let config = AnalysisConfig {
            backend: AnalysisBackendKind::OpenAI,
            endpoint: Some("http://localhost:8000/v1".to_string()),
            api_key: Some("k".to_string()),
            deployment_name: Some("llama3".to_string()),
            ..AnalysisConfig::default()
        };
        assert_eq!(build_backend(&config).unwrap().name(), "OpenAI");
    }

    #[test]
    fn test_load_config_reports_path() {
        let err = load_config("/nonexistent/config.toml").unwrap_err();
        assert!(format!("{:#}", err).contains("/nonexistent/config.toml"));
    }
}
