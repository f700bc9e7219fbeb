//! Token bucket limiter.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use super::state::BucketState;
use super::store::StateStore;
use crate::clock::{Clock, SystemClock};
use crate::error::TollgateError;

/// Default sustained rate for the chat endpoint.
pub const DEFAULT_REQUESTS_PER_MINUTE: u32 = 50;
/// Default key the bucket state is stored under.
pub const DEFAULT_STORAGE_KEY: &str = "chat_rate_limit";

/// Configuration for a token bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketConfig {
    /// Sustained refill rate.
    pub requests_per_minute: u32,
    /// Burst size. Equal to `requests_per_minute` unless overridden.
    pub capacity: u32,
    /// Key the state is persisted under.
    pub storage_key: String,
}

impl BucketConfig {
    /// A bucket refilling at `requests_per_minute` with an equal burst capacity.
    ///
    /// A rate of zero is raised to one so refill arithmetic stays finite.
    pub fn new(requests_per_minute: u32) -> Self {
        let rpm = requests_per_minute.max(1);
        Self {
            requests_per_minute: rpm,
            capacity: rpm,
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
        }
    }

    /// Use a different storage key.
    pub fn with_storage_key(mut self, key: impl Into<String>) -> Self {
        self.storage_key = key.into();
        self
    }
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self::new(DEFAULT_REQUESTS_PER_MINUTE)
    }
}

/// Verdict of a [`TokenBucketLimiter::check_and_consume`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketDecision {
    /// Whether the caller may issue its request now.
    pub allowed: bool,
    /// Whole tokens left after this call; set when allowed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_tokens: Option<u32>,
    /// Seconds until one token is available; set when denied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl BucketDecision {
    fn granted(remaining_tokens: u32) -> Self {
        Self {
            allowed: true,
            remaining_tokens: Some(remaining_tokens),
            retry_after: None,
        }
    }

    fn denied(retry_after: u64) -> Self {
        Self {
            allowed: false,
            remaining_tokens: None,
            retry_after: Some(retry_after),
        }
    }
}

/// A persisted token bucket for one logical caller.
///
/// Checks never fail: a store fault falls back to a full in-memory bucket for
/// that call and is logged. Concurrent callers sharing one storage key may
/// lose updates; the bucket is a cooperative throttle, not a hard guarantee.
pub struct TokenBucketLimiter {
    config: BucketConfig,
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
}

impl TokenBucketLimiter {
    /// Create a bucket over `store` using the system clock.
    pub fn new(config: BucketConfig, store: Arc<dyn StateStore>) -> Self {
        Self::with_clock(config, store, Arc::new(SystemClock))
    }

    /// Create a bucket with an explicit time source.
    pub fn with_clock(
        config: BucketConfig,
        store: Arc<dyn StateStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            store,
            clock,
        }
    }

    /// The bucket configuration.
    pub fn config(&self) -> &BucketConfig {
        &self.config
    }

    /// Try to take one token.
    ///
    /// A grant persists the reduced balance stamped with the current time. A
    /// denial leaves the stored state untouched so refill keeps accruing from
    /// the last grant.
    pub fn check_and_consume(&self) -> BucketDecision {
        let now = self.clock.now_millis();
        let rpm = f64::from(self.config.requests_per_minute);
        let tokens = self
            .load_state(now)
            .refilled(now, self.capacity(), rpm);

        if tokens >= 1.0 {
            let remaining = tokens - 1.0;
            self.save_state(&BucketState {
                tokens: remaining,
                last_update: now,
            });

            trace!(
                key = %self.config.storage_key,
                remaining = remaining,
                "Token granted"
            );
            BucketDecision::granted(remaining.floor() as u32)
        } else {
            let retry_after = ((1.0 - tokens) * 60.0 / rpm).ceil() as u64;

            debug!(
                key = %self.config.storage_key,
                tokens = tokens,
                retry_after = retry_after,
                "Token bucket empty"
            );
            BucketDecision::denied(retry_after)
        }
    }

    /// Whole tokens available right now, without consuming any.
    pub fn remaining_capacity(&self) -> u32 {
        let now = self.clock.now_millis();
        let tokens = self.load_state(now).refilled(
            now,
            self.capacity(),
            f64::from(self.config.requests_per_minute),
        );
        tokens.floor() as u32
    }

    /// Refill the bucket to capacity and persist it.
    pub fn reset(&self) {
        let now = self.clock.now_millis();
        self.save_state(&BucketState::full(self.capacity(), now));
        debug!(key = %self.config.storage_key, "Token bucket reset");
    }

    fn capacity(&self) -> f64 {
        f64::from(self.config.capacity)
    }

    fn load_state(&self, now: i64) -> BucketState {
        let key = &self.config.storage_key;
        match self.store.get(key) {
            Ok(Some(raw)) => match serde_json::from_str::<BucketState>(&raw) {
                Ok(state) => state,
                Err(e) => {
                    warn!(key = %key, error = %e, "Discarding unreadable bucket state");
                    BucketState::full(self.capacity(), now)
                }
            },
            Ok(None) => BucketState::full(self.capacity(), now),
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to load bucket state, using a full bucket");
                BucketState::full(self.capacity(), now)
            }
        }
    }

    fn save_state(&self, state: &BucketState) {
        let key = &self.config.storage_key;
        let result = serde_json::to_string(state)
            .map_err(TollgateError::from)
            .and_then(|raw| self.store.set(key, &raw));

        if let Err(e) = result {
            warn!(key = %key, error = %e, "Failed to persist bucket state");
        }
    }
}

impl std::fmt::Debug for TokenBucketLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucketLimiter")
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::MemoryStore;
    use crate::clock::ManualClock;
    use crate::error::Result;

    const START: i64 = 1_700_000_000_000;

    fn create_limiter(rpm: u32) -> (TokenBucketLimiter, Arc<MemoryStore>, Arc<ManualClock>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(START));
        let limiter = TokenBucketLimiter::with_clock(
            BucketConfig::new(rpm),
            store.clone(),
            clock.clone(),
        );
        (limiter, store, clock)
    }

    fn stored_state(store: &MemoryStore) -> BucketState {
        let raw = store.get(DEFAULT_STORAGE_KEY).unwrap().unwrap();
        serde_json::from_str(&raw).unwrap()
    }

    /// A store whose reads and writes always fail.
    struct BrokenStore;

    impl StateStore for BrokenStore {
        fn get(&self, _key: &str) -> Result<Option<String>> {
            Err(TollgateError::Storage("unavailable".to_string()))
        }

        fn set(&self, _key: &str, _value: &str) -> Result<()> {
            Err(TollgateError::Storage("unavailable".to_string()))
        }
    }

    #[test]
    fn test_default_config() {
        let config = BucketConfig::default();
        assert_eq!(config.requests_per_minute, 50);
        assert_eq!(config.capacity, 50);
        assert_eq!(config.storage_key, "chat_rate_limit");
    }

    #[test]
    fn test_zero_rate_is_raised() {
        let config = BucketConfig::new(0);
        assert_eq!(config.requests_per_minute, 1);
        assert_eq!(config.capacity, 1);
    }

    #[test]
    fn test_first_call_starts_full() {
        let (limiter, store, _clock) = create_limiter(50);

        let decision = limiter.check_and_consume();
        assert!(decision.allowed);
        assert_eq!(decision.remaining_tokens, Some(49));
        assert_eq!(decision.retry_after, None);

        let state = stored_state(&store);
        assert_eq!(state.tokens, 49.0);
        assert_eq!(state.last_update, START);
    }

    #[test]
    fn test_burst_cap() {
        let (limiter, _store, _clock) = create_limiter(50);

        for i in 0..50 {
            let decision = limiter.check_and_consume();
            assert!(decision.allowed, "request {} should be allowed", i + 1);
            assert_eq!(decision.remaining_tokens, Some(49 - i));
        }

        let decision = limiter.check_and_consume();
        assert!(!decision.allowed);
        assert_eq!(decision.remaining_tokens, None);
        // One token takes 1.2s at 50 rpm.
        assert_eq!(decision.retry_after, Some(2));
    }

    #[test]
    fn test_nominal_rate_never_starves() {
        let (limiter, _store, clock) = create_limiter(50);

        // Drain the burst first, then keep to exactly one request per 1.2s.
        for _ in 0..50 {
            limiter.check_and_consume();
        }
        for i in 0..200 {
            clock.advance(1_200);
            assert!(
                limiter.check_and_consume().allowed,
                "paced request {} should be allowed",
                i
            );
        }
    }

    #[test]
    fn test_denial_does_not_advance_clock() {
        let (limiter, store, clock) = create_limiter(60);

        for _ in 0..60 {
            limiter.check_and_consume();
        }
        let drained = stored_state(&store);

        clock.advance(400);
        let first = limiter.check_and_consume();
        assert!(!first.allowed);
        assert_eq!(first.retry_after, Some(1));
        assert_eq!(stored_state(&store), drained);

        // Accrual continues from the last grant, not the denial.
        clock.advance(400);
        assert!(!limiter.check_and_consume().allowed);
        clock.advance(200);
        assert!(limiter.check_and_consume().allowed);
    }

    #[test]
    fn test_retry_after_shrinks_as_time_passes() {
        let (limiter, _store, clock) = create_limiter(6);

        for _ in 0..6 {
            limiter.check_and_consume();
        }
        // One token every 10s.
        let first = limiter.check_and_consume().retry_after.unwrap();
        assert_eq!(first, 10);
        let again = limiter.check_and_consume().retry_after.unwrap();
        assert_eq!(again, first);

        clock.advance(4_000);
        assert_eq!(limiter.check_and_consume().retry_after, Some(6));
    }

    #[test]
    fn test_remaining_capacity_is_read_only() {
        let (limiter, store, clock) = create_limiter(50);
        assert_eq!(limiter.remaining_capacity(), 50);
        assert!(store.is_empty());

        for _ in 0..10 {
            limiter.check_and_consume();
        }
        let before = stored_state(&store);
        assert_eq!(limiter.remaining_capacity(), 40);

        clock.advance(2_400);
        assert_eq!(limiter.remaining_capacity(), 42);
        assert_eq!(stored_state(&store), before);
    }

    #[test]
    fn test_reset_refills_and_persists() {
        let (limiter, store, clock) = create_limiter(50);
        for _ in 0..50 {
            limiter.check_and_consume();
        }
        assert!(!limiter.check_and_consume().allowed);

        clock.advance(10);
        limiter.reset();

        let state = stored_state(&store);
        assert_eq!(state.tokens, 50.0);
        assert_eq!(state.last_update, START + 10);
        assert_eq!(limiter.check_and_consume().remaining_tokens, Some(49));
    }

    #[test]
    fn test_backwards_clock_keeps_tokens() {
        let (limiter, _store, clock) = create_limiter(50);
        for _ in 0..5 {
            limiter.check_and_consume();
        }
        clock.advance(-60_000);
        assert_eq!(limiter.remaining_capacity(), 45);
        assert_eq!(limiter.check_and_consume().remaining_tokens, Some(44));
    }

    #[test]
    fn test_broken_store_fails_open() {
        let clock = Arc::new(ManualClock::new(START));
        let limiter =
            TokenBucketLimiter::with_clock(BucketConfig::default(), Arc::new(BrokenStore), clock);

        // Every call sees a fresh full bucket.
        for _ in 0..100 {
            let decision = limiter.check_and_consume();
            assert!(decision.allowed);
            assert_eq!(decision.remaining_tokens, Some(49));
        }
        assert_eq!(limiter.remaining_capacity(), 50);
        limiter.reset();
    }

    #[test]
    fn test_corrupt_state_falls_back_to_full() {
        let (limiter, store, _clock) = create_limiter(50);
        store.set(DEFAULT_STORAGE_KEY, "not json").unwrap();

        let decision = limiter.check_and_consume();
        assert!(decision.allowed);
        assert_eq!(decision.remaining_tokens, Some(49));
        assert_eq!(stored_state(&store).tokens, 49.0);
    }

    #[test]
    fn test_corrupt_state_file_recovers_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{garbage").unwrap();

        let clock = Arc::new(ManualClock::new(START));
        let limiter = TokenBucketLimiter::with_clock(
            BucketConfig::new(50),
            Arc::new(crate::bucket::FileStore::new(&path)),
            clock,
        );
        limiter.reset();

        let allowed = (0..500)
            .filter(|_| limiter.check_and_consume().allowed)
            .count();
        assert_eq!(allowed, 50);
        assert!(std::fs::read_to_string(&path).unwrap().contains(DEFAULT_STORAGE_KEY));
    }

    #[test]
    fn test_separate_storage_keys_are_independent() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(START));
        let a = TokenBucketLimiter::with_clock(
            BucketConfig::new(2).with_storage_key("a"),
            store.clone(),
            clock.clone(),
        );
        let b = TokenBucketLimiter::with_clock(
            BucketConfig::new(2).with_storage_key("b"),
            store.clone(),
            clock,
        );

        assert!(a.check_and_consume().allowed);
        assert!(a.check_and_consume().allowed);
        assert!(!a.check_and_consume().allowed);
        assert_eq!(b.check_and_consume().remaining_tokens, Some(1));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_decision_serialization() {
        let granted = serde_json::to_value(BucketDecision::granted(3)).unwrap();
        assert_eq!(granted, serde_json::json!({"allowed": true, "remainingTokens": 3}));

        let denied = serde_json::to_value(BucketDecision::denied(7)).unwrap();
        assert_eq!(denied, serde_json::json!({"allowed": false, "retryAfter": 7}));
    }
}
