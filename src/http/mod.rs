//! HTTP edge for the server-side limiter.
//!
//! Resolves a caller identifier and path for each request, asks the
//! [`FixedWindowLimiter`](crate::ratelimit::FixedWindowLimiter) for a verdict,
//! and turns denials into `429 Too Many Requests`.

mod middleware;
mod server;

pub use middleware::{
    rate_limit_middleware, resolve_identifier, RateLimitState, UNKNOWN_IDENTIFIER,
};
pub use server::HttpServer;
