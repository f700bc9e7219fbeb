//! Fixed-window counter state.

use serde::Serialize;

use super::rules::RateLimitRule;

/// Identifies one counter: a caller on a route.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowKey {
    /// The resolved caller identifier (session, API key, IP address, ...)
    pub identifier: String,
    /// The logical request path
    pub path: String,
}

impl WindowKey {
    /// Create a new window key.
    pub fn new(identifier: &str, path: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            path: path.to_string(),
        }
    }
}

impl std::fmt::Display for WindowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.identifier, self.path)
    }
}

/// Requests seen for one key in the current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowEntry {
    /// Requests observed in this window, including the current one
    pub count: u32,
    /// Milliseconds since the Unix epoch when the window ends
    pub reset_at: i64,
}

impl WindowEntry {
    /// Open a fresh window at `now` with the current request counted.
    pub fn open(now: i64, rule: &RateLimitRule) -> Self {
        Self {
            count: 1,
            reset_at: now.saturating_add(rule.window_millis()),
        }
    }

    /// Whether the window has ended at `now`.
    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.reset_at
    }

    /// Count one more request in this window.
    pub fn increment(&mut self) {
        self.count = self.count.saturating_add(1);
    }

    /// Whole seconds until the window ends, rounded up; zero once ended.
    pub fn seconds_until_reset(&self, now: i64) -> u64 {
        let millis = self.reset_at.saturating_sub(now).max(0) as u64;
        millis.div_ceil(1000)
    }
}
