/// Duplicate suppression keyed by error fingerprint
pub mod dedup_cache;
/// Feishu webhook delivery
pub mod notifier;
pub mod rate_limiter;

pub use dedup_cache::{DedupCache, ErrorFingerprint};
pub use notifier::{Alert, FeishuNotifier, Notifier};
pub use rate_limiter::RateLimiter;
