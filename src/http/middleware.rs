//! Rate limiting middleware.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::{trace, warn};

use crate::ratelimit::{rate_limit_headers, FixedWindowLimiter, RateLimitResult};

/// Identifier used when no caller address can be determined.
pub const UNKNOWN_IDENTIFIER: &str = "unknown";

/// State shared by every invocation of [`rate_limit_middleware`].
#[derive(Clone)]
pub struct RateLimitState {
    limiter: Arc<FixedWindowLimiter>,
    trust_proxy_headers: bool,
}

impl RateLimitState {
    /// Create middleware state over `limiter`.
    pub fn new(limiter: Arc<FixedWindowLimiter>, trust_proxy_headers: bool) -> Self {
        Self {
            limiter,
            trust_proxy_headers,
        }
    }

    /// The limiter consulted for each request.
    pub fn limiter(&self) -> &Arc<FixedWindowLimiter> {
        &self.limiter
    }
}

/// Admit or reject a request and attach `X-RateLimit-*` headers to the response.
pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Response {
    let identifier = resolve_identifier(&request, state.trust_proxy_headers);
    let path = request.uri().path().to_string();

    let result = state.limiter.check_rate_limit(&identifier, &path);

    let mut response = if result.allowed {
        trace!(
            identifier = %identifier,
            path = %path,
            remaining = result.remaining,
            "Request admitted"
        );
        next.run(request).await
    } else {
        let retry_after = result.retry_after.unwrap_or(result.reset);
        warn!(
            identifier = %identifier,
            path = %path,
            retry_after = retry_after,
            "Request rejected by rate limiter"
        );
        too_many_requests(retry_after)
    };

    apply_headers(response.headers_mut(), &result);
    response
}

/// Determine who is calling.
///
/// With `trust_proxy_headers`, the leftmost `X-Forwarded-For` address or
/// `X-Real-IP` wins; otherwise only the peer address is used.
pub fn resolve_identifier<B>(
    request: &axum::http::Request<B>,
    trust_proxy_headers: bool,
) -> String {
    let forwarded = if trust_proxy_headers {
        forwarded_for(request.headers()).or_else(|| real_ip(request.headers()))
    } else {
        None
    };

    forwarded
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|info| info.0.ip())
        })
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| UNKNOWN_IDENTIFIER.to_string())
}

fn forwarded_for(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        // "client, proxy1, proxy2": the leftmost entry is the original client
        .and_then(|s| s.split(',').next())
        .and_then(|ip| ip.trim().parse().ok())
}

fn real_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse().ok())
}

fn too_many_requests(retry_after: u64) -> Response {
    let body = serde_json::json!({
        "error": {
            "code": "RATE_LIMITED",
            "message": "Too many requests. Please try again later.",
            "retryAfter": retry_after,
        }
    });
    (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response()
}

fn apply_headers(headers: &mut HeaderMap, result: &RateLimitResult) {
    for (name, value) in rate_limit_headers(result) {
        // HeaderName::try_from lowercases the canonical mixed-case names.
        let name = HeaderName::try_from(name);
        let value = HeaderValue::try_from(value);
        if let (Ok(name), Ok(value)) = (name, value) {
            headers.insert(name, value);
        }
    }
}
