/// Error classification rules for container log lines
pub mod classifier;

pub use classifier::{extract_error_type, is_error, severity, ErrorDetector};
