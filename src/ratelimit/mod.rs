//! Server-side fixed-window rate limiting.
//!
//! Requests are counted per `(identifier, path)` in fixed windows whose size
//! and budget come from a [`RuleTable`]. A background sweeper reclaims
//! memory held by windows that have ended.

mod headers;
mod limiter;
mod rules;
mod sweep;
mod window;

pub use headers::{
    rate_limit_headers, HEADER_LIMIT, HEADER_REMAINING, HEADER_RESET, HEADER_RETRY_AFTER,
};
pub use limiter::{FixedWindowLimiter, RateLimitResult};
pub use rules::{PathRule, RateLimitRule, RuleTable, CHAT_PATH, WILDCARD_PATTERN};
pub use sweep::DEFAULT_SWEEP_INTERVAL;
pub use window::{WindowEntry, WindowKey};
