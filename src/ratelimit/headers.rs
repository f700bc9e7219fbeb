//! Response header projection of a rate limit verdict.

use std::collections::BTreeMap;

use super::limiter::RateLimitResult;

/// Requests allowed in the window.
pub const HEADER_LIMIT: &str = "X-RateLimit-Limit";
/// Requests left in the window.
pub const HEADER_REMAINING: &str = "X-RateLimit-Remaining";
/// Seconds until the window resets.
pub const HEADER_RESET: &str = "X-RateLimit-Reset";
/// Seconds to wait before retrying; denied requests only.
pub const HEADER_RETRY_AFTER: &str = "Retry-After";

/// Format a verdict as HTTP response headers.
///
/// `Retry-After` is present exactly when the request was denied.
pub fn rate_limit_headers(result: &RateLimitResult) -> BTreeMap<&'static str, String> {
    let mut headers = BTreeMap::new();
    headers.insert(HEADER_LIMIT, result.limit.to_string());
    headers.insert(HEADER_REMAINING, result.remaining.to_string());
    headers.insert(HEADER_RESET, result.reset.to_string());

    if !result.allowed {
        let retry_after = result.retry_after.unwrap_or(result.reset);
        headers.insert(HEADER_RETRY_AFTER, retry_after.to_string());
    }

    headers
}
