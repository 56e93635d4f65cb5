//! Error classification for container log lines
//!
//! Pure functions that decide whether a line is an error, how severe it is and
//! what kind of error it reports. None of these hold state.

use crate::events::Severity;
use regex::Regex;
use std::sync::OnceLock;

/// Keywords that escalate a line to `Severity::Critical`
const CRITICAL_MARKERS: &[&str] = &[
    "fatal",
    "critical",
    "panic",
    "segmentation fault",
    "out of memory",
    "oom",
    "core dumped",
];

/// Keywords that mark a line as `Severity::Error`
const ERROR_MARKERS: &[&str] = &["error", "exception", "failed", "failure", "crash"];

/// Label returned when no error type can be extracted
pub const UNKNOWN_ERROR_TYPE: &str = "Unknown Error";

/// Check whether a line contains any of the configured keywords
///
/// Without `case_sensitive` both the line and each keyword are lowercased
/// before the substring test. An empty keyword set never matches.
pub fn is_error(line: &str, keywords: &[String], case_sensitive: bool) -> bool {
    if keywords.is_empty() {
        return false;
    }

    if case_sensitive {
        keywords.iter().any(|keyword| line.contains(keyword.as_str()))
    } else {
        let folded = line.to_lowercase();
        keywords
            .iter()
            .any(|keyword| folded.contains(keyword.to_lowercase().as_str()))
    }
}

/// Determine the severity of an error line
///
/// Critical markers are checked first, so a line mentioning both `panic` and
/// `error` is critical.
pub fn severity(line: &str) -> Severity {
    let folded = line.to_lowercase();

    if CRITICAL_MARKERS.iter().any(|m| folded.contains(m)) {
        Severity::Critical
    } else if ERROR_MARKERS.iter().any(|m| folded.contains(m)) {
        Severity::Error
    } else {
        Severity::Warning
    }
}

fn qualified_type_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(\w+Exception|\w+Error):").expect("static regex is valid")
    })
}

fn bare_type_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(\w+Error|\w+Exception)").expect("static regex is valid"))
}

fn http_status_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)HTTP\s+(\d{3})").expect("static regex is valid"))
}

/// Extract a short error-type label from a line
///
/// Tries, in order: `SomethingException:` / `SomethingError:`, a bare
/// `SomethingError` / `SomethingException` token, `HTTP <code>`, then plain
/// keyword heuristics. Always returns a label.
pub fn extract_error_type(line: &str) -> String {
    if let Some(caps) = qualified_type_pattern().captures(line) {
        return caps[1].to_string();
    }

    if let Some(caps) = bare_type_pattern().captures(line) {
        return caps[1].to_string();
    }

    if let Some(caps) = http_status_pattern().captures(line) {
        return format!("HTTP {}", &caps[1]);
    }

    let folded = line.to_lowercase();
    if folded.contains("timeout") {
        "Timeout".to_string()
    } else if folded.contains("connection")
        && (folded.contains("refused") || folded.contains("failed"))
    {
        "Connection Error".to_string()
    } else if folded.contains("permission denied") {
        "Permission Error".to_string()
    } else if folded.contains("not found") {
        "Not Found".to_string()
    } else {
        UNKNOWN_ERROR_TYPE.to_string()
    }
}

/// Keyword-based error detector built from configuration
///
/// Blank keywords are dropped on construction since they would match every line.
#[derive(Debug, Clone)]
pub struct ErrorDetector {
    keywords: Vec<String>,
    case_sensitive: bool,
}

impl ErrorDetector {
    /// Create a detector for the given keywords
    ///
    /// # Arguments
    ///
    /// * `keywords` - Substrings that mark a line as an error
    /// * `case_sensitive` - Match keywords exactly instead of case-folded
    pub fn new(keywords: Vec<String>, case_sensitive: bool) -> Self {
        let keywords = keywords
            .into_iter()
            .filter(|k| !k.trim().is_empty())
            .map(|k| if case_sensitive { k } else { k.to_lowercase() })
            .collect();

        Self {
            keywords,
            case_sensitive,
        }
    }

    pub fn is_error(&self, line: &str) -> bool {
        is_error(line, &self.keywords, self.case_sensitive)
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub fn case_sensitive(&self) -> bool {
        self.case_sensitive
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keywords(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_is_error_case_insensitive() {
        let kw = keywords(&["error", "Exception"]);
        assert!(is_error("2024 ERROR something broke", &kw, false));
        assert!(is_error("java.lang.NullPointerException", &kw, false));
        assert!(!is_error("all good here", &kw, false));
    }

    #[test]
    fn test_is_error_case_sensitive() {
        let kw = keywords(&["ERROR"]);
        assert!(is_error("ERROR: disk full", &kw, true));
        assert!(!is_error("error: disk full", &kw, true));
    }

    #[test]
    fn test_is_error_empty_keywords_never_matches() {
        assert!(!is_error("fatal error everywhere", &[], false));
        assert!(!is_error("fatal error everywhere", &[], true));
    }

    #[test]
    fn test_severity_tiers() {
        assert_eq!(severity("panic: runtime error"), Severity::Critical);
        assert_eq!(severity("Out Of Memory killer invoked"), Severity::Critical);
        assert_eq!(severity("request failed"), Severity::Error);
        assert_eq!(severity("disk usage at 85%"), Severity::Warning);
    }

    #[test]
    fn test_severity_critical_wins_over_error() {
        assert_eq!(severity("error while handling panic"), Severity::Critical);
    }

    #[test]
    fn test_extract_qualified_exception() {
        assert_eq!(
            extract_error_type("NullPointerException: foo"),
            "NullPointerException"
        );
        assert_eq!(
            extract_error_type("Traceback ... ValueError: invalid literal"),
            "ValueError"
        );
    }

    #[test]
    fn test_extract_bare_exception() {
        assert_eq!(
            extract_error_type("caught IllegalStateException in worker"),
            "IllegalStateException"
        );
    }

    #[test]
    fn test_extract_http_status() {
        assert_eq!(
            extract_error_type("HTTP 503 Service Unavailable"),
            "HTTP 503"
        );
        assert_eq!(extract_error_type("upstream returned http  502"), "HTTP 502");
    }

    #[test]
    fn test_extract_keyword_heuristics() {
        assert_eq!(extract_error_type("read Timeout after 30s"), "Timeout");
        assert_eq!(extract_error_type("Connection refused"), "Connection Error");
        assert_eq!(
            extract_error_type("connection to db failed"),
            "Connection Error"
        );
        assert_eq!(
            extract_error_type("open /data: permission denied"),
            "Permission Error"
        );
        assert_eq!(extract_error_type("file not found"), "Not Found");
    }

    #[test]
    fn test_extract_unknown() {
        assert_eq!(extract_error_type("nothing matches here"), UNKNOWN_ERROR_TYPE);
        assert_eq!(extract_error_type(""), UNKNOWN_ERROR_TYPE);
    }

    #[test]
    fn test_detector_drops_blank_keywords() {
        let detector = ErrorDetector::new(keywords(&["", "  ", "Error"]), false);
        assert_eq!(detector.keywords(), &["error".to_string()]);
        assert!(!detector.is_error("just a line"));
        assert!(detector.is_error("an ERROR line"));
    }

    #[test]
    fn test_detector_keeps_case_when_sensitive() {
        let detector = ErrorDetector::new(keywords(&["Error"]), true);
        assert!(detector.case_sensitive());
        assert!(detector.is_error("Error: boom"));
        assert!(!detector.is_error("error: boom"));
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[quickcheck]
    fn prop_is_error_matches_substring_definition(line: String, keywords: Vec<String>) -> bool {
        let expected = keywords
            .iter()
            .any(|k| line.to_lowercase().contains(k.to_lowercase().as_str()));
        is_error(&line, &keywords, false) == expected
    }

    #[quickcheck]
    fn prop_is_error_case_sensitive_is_plain_contains(line: String, keywords: Vec<String>) -> bool {
        let expected = keywords.iter().any(|k| line.contains(k.as_str()));
        is_error(&line, &keywords, true) == expected
    }

    #[quickcheck]
    fn prop_line_containing_keyword_is_error(prefix: String, suffix: String) -> bool {
        let kw = vec!["boom".to_string()];
        let line = format!("{}boom{}", prefix, suffix);
        is_error(&line, &kw, false) && is_error(&line, &kw, true)
    }

    #[quickcheck]
    fn prop_extract_error_type_is_total(line: String) -> bool {
        !extract_error_type(&line).is_empty()
    }

    #[quickcheck]
    fn prop_panic_is_always_critical(prefix: String, suffix: String) -> bool {
        severity(&format!("{}panic{}", prefix, suffix)) == Severity::Critical
    }
}
