use crate::ai::backends::{AnalysisBackend, AnalysisRequest};
use crate::error::AnalysisError;
use crate::monitoring::{AnalysisTimer, PipelineMonitor};
use log::{debug, info, warn};
use std::sync::Arc;

/// Text placed in a notification when no analysis could be obtained
pub const ANALYSIS_UNAVAILABLE: &str = "AI analysis unavailable";

/// Markers that start the remedy part of an analysis
const REMEDY_MARKERS: &[&str] = &["solution", "recommend", "suggest", "建议", "解决"];

/// Analysis split into prose about the cause and prose about the fix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisParts {
    pub cause: String,
    pub remedy: Option<String>,
}

/// Coordinates calls to the configured analysis backend
///
/// Never retries; a failed call is reported to the caller, which decides
/// what placeholder to show.
pub struct ErrorAnalyzer {
    backend: Arc<dyn AnalysisBackend>,
    monitoring: Option<Arc<PipelineMonitor>>,
}

impl ErrorAnalyzer {
    pub fn with_backend(backend: Arc<dyn AnalysisBackend>) -> Self {
        Self {
            backend,
            monitoring: None,
        }
    }

    /// Set the monitor that records analysis latency
    pub fn set_monitoring(&mut self, monitoring: Arc<PipelineMonitor>) {
        self.monitoring = Some(monitoring);
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Ask the backend to explain an error line
    pub async fn analyze(&self, request: &AnalysisRequest) -> Result<String, AnalysisError> {
        debug!(
            "Requesting {} analysis for container {}",
            self.backend.name(),
            request.container_name
        );

        let timer = self
            .monitoring
            .as_ref()
            .map(|m| AnalysisTimer::start(Arc::clone(m)));

        let result = self.backend.analyze(request).await;

        if let Some(timer) = timer {
            timer.finish();
        }

        match &result {
            Ok(text) => info!(
                "Analysis complete for container {} ({} chars)",
                request.container_name,
                text.chars().count()
            ),
            Err(e) => warn!(
                "Analysis failed for container {}: {}",
                request.container_name, e
            ),
        }

        result
    }

    /// Analyze, substituting the unavailable placeholder on failure
    pub async fn analyze_or_placeholder(&self, request: &AnalysisRequest) -> (String, bool) {
        match self.analyze(request).await {
            Ok(text) => (text, true),
            Err(_) => (ANALYSIS_UNAVAILABLE.to_string(), false),
        }
    }
}

/// Split analysis prose into cause and remedy
///
/// The first line mentioning a remedy marker, and every line after it, form
/// the remedy. If nothing precedes that line the whole text is kept as the
/// cause as well.
pub fn split_analysis(text: &str) -> AnalysisParts {
    let lines: Vec<&str> = text.lines().collect();
    let split_at = lines.iter().position(|line| {
        let folded = line.to_lowercase();
        REMEDY_MARKERS.iter().any(|m| folded.contains(m))
    });

    match split_at {
        Some(idx) => {
            let cause = lines[..idx].join("\n").trim().to_string();
            let remedy = lines[idx..].join("\n").trim().to_string();
            AnalysisParts {
                cause: if cause.is_empty() {
                    text.to_string()
                } else {
                    cause
                },
                remedy: if remedy.is_empty() { None } else { Some(remedy) },
            }
        }
        None => AnalysisParts {
            cause: text.trim().to_string(),
            remedy: None,
        },
    }
}
