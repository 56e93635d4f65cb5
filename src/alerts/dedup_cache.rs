use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::fmt;

/// Number of characters of the line text that take part in a fingerprint
pub const FINGERPRINT_TEXT_CHARS: usize = 200;

/// Identity of an error for duplicate suppression
///
/// Built from the container name and the first 200 characters of the line,
/// so a long stack-trace line that only differs in its tail still collapses.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ErrorFingerprint(String);

impl ErrorFingerprint {
    /// Build the fingerprint for a line from a container
    pub fn new(container_name: &str, text: &str) -> Self {
        let prefix: String = text.chars().take(FINGERPRINT_TEXT_CHARS).collect();
        Self(format!("{}:{}", container_name, prefix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ErrorFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Remembers when each error fingerprint was last notified
///
/// Entries are only written after a notification was confirmed delivered, so
/// a failed delivery never suppresses the next occurrence. Entries older than
/// the window are swept lazily, at most once per window length.
#[derive(Debug)]
pub struct DedupCache {
    /// Suppression window
    window: Duration,
    /// Last successful notification per fingerprint
    entries: HashMap<ErrorFingerprint, DateTime<Utc>>,
    /// When expired entries were last pruned
    last_sweep: Option<DateTime<Utc>>,
}

impl DedupCache {
    /// Create a cache with the given suppression window
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: HashMap::new(),
            last_sweep: None,
        }
    }

    /// Create a cache with the window given in seconds
    ///
    /// Windows too large for a `Duration` saturate to the maximum.
    pub fn with_window_secs(seconds: u64) -> Self {
        let window = i64::try_from(seconds)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX);
        Self::new(window)
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Check whether the fingerprint was notified less than one window ago
    pub fn is_duplicate(&self, fingerprint: &ErrorFingerprint, now: DateTime<Utc>) -> bool {
        match self.entries.get(fingerprint) {
            Some(last) => now - *last < self.window,
            None => false,
        }
    }

    /// Record a successful notification for the fingerprint
    ///
    /// An existing entry is never moved backwards in time.
    pub fn commit(&mut self, fingerprint: ErrorFingerprint, now: DateTime<Utc>) {
        self.sweep_expired(now);

        self.entries
            .entry(fingerprint)
            .and_modify(|last| {
                if now > *last {
                    *last = now;
                }
            })
            .or_insert(now);
    }

    /// Last notification time for a fingerprint, if any
    pub fn last_notified(&self, fingerprint: &ErrorFingerprint) -> Option<DateTime<Utc>> {
        self.entries.get(fingerprint).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop entries that can no longer suppress anything
    fn sweep_expired(&mut self, now: DateTime<Utc>) {
        let due = match self.last_sweep {
            Some(last) => now - last >= self.window,
            None => true,
        };
        if !due {
            return;
        }

        let window = self.window;
        self.entries.retain(|_, last| now - *last < window);
        self.last_sweep = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_truncates_to_200_chars() {
        let long = "x".repeat(500);
        let fp = ErrorFingerprint::new("web", &long);
        assert_eq!(fp.as_str().len(), "web:".len() + 200);

        let other = format!("{}{}", "x".repeat(200), "different tail");
        assert_eq!(fp, ErrorFingerprint::new("web", &other));
    }

    #[test]
    fn test_fingerprint_counts_characters_not_bytes() {
        let text = "é".repeat(300);
        let fp = ErrorFingerprint::new("api", &text);
        assert_eq!(fp.as_str().chars().count(), "api:".len() + 200);
    }

    #[test]
    fn test_fingerprint_short_text_not_padded() {
        assert_eq!(ErrorFingerprint::new("db", "oops").as_str(), "db:oops");
    }

    #[test]
    fn test_absent_fingerprint_is_not_duplicate() {
        let cache = DedupCache::with_window_secs(300);
        let fp = ErrorFingerprint::new("web", "boom");
        assert!(!cache.is_duplicate(&fp, Utc::now()));
    }

    #[test]
    fn test_huge_window_saturates() {
        let mut cache = DedupCache::with_window_secs(18_000_000_000_000_000);
        assert_eq!(cache.window(), Duration::MAX);

        let fp = ErrorFingerprint::new("web", "boom");
        let now = Utc::now();
        cache.commit(fp.clone(), now);
        assert!(cache.is_duplicate(&fp, now + Duration::days(3650)));
    }

    #[test]
    fn test_duplicate_within_window() {
        let mut cache = DedupCache::with_window_secs(300);
        let fp = ErrorFingerprint::new("web", "boom");
        let now = Utc::now();

        cache.commit(fp.clone(), now);
        assert!(cache.is_duplicate(&fp, now + Duration::seconds(299)));
        assert!(!cache.is_duplicate(&fp, now + Duration::seconds(300)));
    }

    #[test]
    fn test_commit_never_moves_backwards() {
        let mut cache = DedupCache::with_window_secs(300);
        let fp = ErrorFingerprint::new("web", "boom");
        let now = Utc::now();

        cache.commit(fp.clone(), now);
        cache.commit(fp.clone(), now - Duration::seconds(120));
        assert_eq!(cache.last_notified(&fp), Some(now));
    }

    #[test]
    fn test_sweep_drops_expired_entries() {
        let mut cache = DedupCache::with_window_secs(60);
        let now = Utc::now();

        cache.commit(ErrorFingerprint::new("web", "old"), now);
        cache.commit(
            ErrorFingerprint::new("web", "fresh"),
            now + Duration::seconds(90),
        );

        assert_eq!(cache.len(), 1);
        assert!(cache
            .last_notified(&ErrorFingerprint::new("web", "fresh"))
            .is_some());
    }

    #[test]
    fn test_sweep_keeps_entries_inside_window() {
        let mut cache = DedupCache::with_window_secs(60);
        let now = Utc::now();

        cache.commit(ErrorFingerprint::new("web", "a"), now);
        cache.commit(ErrorFingerprint::new("web", "b"), now + Duration::seconds(10));
        assert_eq!(cache.len(), 2);
    }
}
