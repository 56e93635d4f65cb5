use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

/// Rate limiter for preventing notification spam
///
/// Counts notifications per container inside a fixed one-minute window. The
/// window is shared: once it has elapsed, the counts of every container are
/// cleared together on the next check, regardless of which container asks.
/// A container's count therefore only resets when *some* container produces
/// a qualifying error.
#[derive(Debug)]
pub struct RateLimiter {
    /// Maximum number of notifications per container per window
    max_per_minute: usize,
    /// Notifications counted in the current window, by container name
    counts: HashMap<String, usize>,
    /// Start of the current window
    window_start: DateTime<Utc>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(10) // Default: 10 notifications per container per minute
    }
}

impl RateLimiter {
    /// Create a new rate limiter with the specified maximum notifications per minute
    ///
    /// # Arguments
    ///
    /// * `max_per_minute` - Maximum number of notifications allowed per container per minute
    pub fn new(max_per_minute: usize) -> Self {
        Self::starting_at(max_per_minute, Utc::now())
    }

    /// Create a rate limiter whose first window begins at `window_start`
    pub fn starting_at(max_per_minute: usize, window_start: DateTime<Utc>) -> Self {
        Self {
            max_per_minute,
            counts: HashMap::new(),
            window_start,
        }
    }

    /// Check and consume one notification slot for the container now
    pub fn allow(&mut self, container_name: &str) -> bool {
        self.allow_at(container_name, Utc::now())
    }

    /// Check and consume one notification slot for the container at `now`
    ///
    /// # Returns
    ///
    /// `true` if the notification may be sent (the slot is consumed),
    /// `false` if the container already reached its limit in this window
    pub fn allow_at(&mut self, container_name: &str, now: DateTime<Utc>) -> bool {
        self.roll_window(now);

        let count = self.counts.entry(container_name.to_string()).or_insert(0);
        if *count >= self.max_per_minute {
            return false;
        }

        *count += 1;
        true
    }

    /// Number of notifications counted for a container in the current window
    pub fn current_count(&self, container_name: &str) -> usize {
        self.counts.get(container_name).copied().unwrap_or(0)
    }

    pub fn window_start(&self) -> DateTime<Utc> {
        self.window_start
    }

    pub fn max_per_minute(&self) -> usize {
        self.max_per_minute
    }

    /// Start a new window if the current one is at least a minute old
    fn roll_window(&mut self, now: DateTime<Utc>) {
        if now - self.window_start >= Duration::minutes(1) {
            self.counts.clear();
            self.window_start = now;
        }
    }
}
