//! Route-aware fixed-window rate limiter.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, trace};

use super::rules::RuleTable;
use super::sweep::Sweeper;
use super::window::{WindowEntry, WindowKey};
use crate::clock::{Clock, SystemClock};

/// Verdict of a [`FixedWindowLimiter::check_rate_limit`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitResult {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Requests allowed per window by the governing rule
    pub limit: u32,
    /// Requests left in the current window
    pub remaining: u32,
    /// Seconds until the current window ends
    pub reset: u64,
    /// Seconds to wait before retrying; set when denied
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

/// In-memory fixed-window limiter keyed by `(identifier, path)`.
///
/// This struct is thread-safe and can be shared across request handlers.
/// Each key's increment-and-compare runs under its map shard's write lock, so
/// concurrent requests never under-count. State is per process and is lost on
/// restart.
pub struct FixedWindowLimiter {
    /// Live windows indexed by caller and route
    windows: DashMap<WindowKey, WindowEntry>,
    /// Route rules, fixed for the limiter's lifetime
    rules: RuleTable,
    clock: Arc<dyn Clock>,
    sweeper: Mutex<Option<Sweeper>>,
}

impl FixedWindowLimiter {
    /// Create a limiter with the given rules and the system clock.
    pub fn new(rules: RuleTable) -> Self {
        Self::with_clock(rules, Arc::new(SystemClock))
    }

    /// Create a limiter with an explicit time source.
    pub fn with_clock(rules: RuleTable, clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: DashMap::new(),
            rules,
            clock,
            sweeper: Mutex::new(None),
        }
    }

    /// Count a request from `identifier` on `path` and decide whether it may proceed.
    ///
    /// The first request after a window ends opens a new window. The request
    /// that brings the count to the rule's limit is still allowed; the next
    /// one is the first denial.
    pub fn check_rate_limit(&self, identifier: &str, path: &str) -> RateLimitResult {
        let rule = *self.rules.resolve(path);
        let now = self.clock.now_millis();
        let key = WindowKey::new(identifier, path);

        trace!(key = %key, limit = rule.requests, "Checking rate limit");

        let entry = match self.windows.entry(key) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(WindowEntry::open(now, &rule));
                } else {
                    occupied.get_mut().increment();
                }
                *occupied.get()
            }
            Entry::Vacant(vacant) => *vacant.insert(WindowEntry::open(now, &rule)),
        };

        let allowed = entry.count <= rule.requests;
        let reset = entry.seconds_until_reset(now);

        if !allowed {
            debug!(
                identifier = %identifier,
                path = %path,
                count = entry.count,
                limit = rule.requests,
                "Rate limit exceeded"
            );
        }

        RateLimitResult {
            allowed,
            limit: rule.requests,
            remaining: rule.requests.saturating_sub(entry.count),
            reset,
            retry_after: (!allowed).then_some(reset),
        }
    }

    /// Remove every window that has ended. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now_millis();
        let before = self.windows.len();
        self.windows.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.windows.len())
    }

    /// Start sweeping expired windows every `period` on the current tokio runtime.
    ///
    /// Replaces any sweeper already running.
    pub fn start_sweeper(self: &Arc<Self>, period: Duration) {
        let sweeper = Sweeper::spawn(Arc::downgrade(self), period);
        if self.sweeper.lock().replace(sweeper).is_some() {
            info!("Replaced running window sweeper");
        }
    }

    /// Stop the background sweeper, if one is running, and wait for it to exit.
    pub async fn stop_sweeper(&self) {
        let sweeper = self.sweeper.lock().take();
        if let Some(sweeper) = sweeper {
            sweeper.stop().await;
        }
    }

    /// Whether a background sweeper is running.
    pub fn is_sweeping(&self) -> bool {
        self.sweeper
            .lock()
            .as_ref()
            .is_some_and(|sweeper| !sweeper.is_finished())
    }

    /// The window currently stored for a key, expired or not.
    pub fn get_window(&self, identifier: &str, path: &str) -> Option<WindowEntry> {
        let key = WindowKey::new(identifier, path);
        self.windows.get(&key).map(|entry| *entry)
    }

    /// Get the number of stored windows.
    pub fn entry_count(&self) -> usize {
        self.windows.len()
    }

    /// Clear all windows.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.windows.clear();
    }

    /// The rule table in use.
    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }
}

impl Default for FixedWindowLimiter {
    fn default() -> Self {
        Self::new(RuleTable::default())
    }
}

impl std::fmt::Debug for FixedWindowLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixedWindowLimiter")
            .field("rules", &self.rules)
            .field("entries", &self.windows.len())
            .finish()
    }
}
