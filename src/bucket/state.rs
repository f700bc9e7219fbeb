//! Persisted token bucket state.

use serde::{Deserialize, Serialize};

/// The persisted state of one token bucket.
///
/// Serialized as `{"tokens": <number>, "lastUpdate": <ms>}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketState {
    /// Tokens currently available; fractional.
    pub tokens: f64,
    /// Milliseconds since the Unix epoch of the last granted check or reset.
    pub last_update: i64,
}

impl BucketState {
    /// A full bucket stamped at `now`.
    pub fn full(capacity: f64, now: i64) -> Self {
        Self {
            tokens: capacity,
            last_update: now,
        }
    }

    /// Tokens available at `now` after refilling at `requests_per_minute`.
    ///
    /// Time running backwards refills nothing, and the result is always
    /// within `[0, capacity]` even if the stored value was not.
    pub fn refilled(&self, now: i64, capacity: f64, requests_per_minute: f64) -> f64 {
        let elapsed_ms = (now - self.last_update).max(0) as f64;
        let tokens = self.tokens.clamp(0.0, capacity);
        // Multiply before dividing so whole-token intervals stay exact.
        (tokens + elapsed_ms * requests_per_minute / 60_000.0).min(capacity)
    }
}
