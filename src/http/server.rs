//! HTTP server implementation.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use super::middleware::{rate_limit_middleware, RateLimitState};
use crate::error::{Result, TollgateError};
use crate::ratelimit::FixedWindowLimiter;

/// HTTP server that puts a fixed-window limiter in front of an application router.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The rate limiter instance
    rate_limiter: Arc<FixedWindowLimiter>,
    /// Whether proxy headers identify the caller
    trust_proxy_headers: bool,
    /// Period of the expired-window sweep while serving
    sweep_interval: Duration,
}

impl HttpServer {
    /// Create a new server around `rate_limiter`.
    pub fn new(addr: SocketAddr, rate_limiter: Arc<FixedWindowLimiter>) -> Self {
        Self {
            addr,
            rate_limiter,
            trust_proxy_headers: false,
            sweep_interval: crate::ratelimit::DEFAULT_SWEEP_INTERVAL,
        }
    }

    /// Identify callers by `X-Forwarded-For` / `X-Real-IP`.
    pub fn trust_proxy_headers(mut self, trust: bool) -> Self {
        self.trust_proxy_headers = trust;
        self
    }

    /// Set the sweep period used while serving.
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Wrap `app` in the rate limiter and request tracing.
    ///
    /// `GET /health` is added outside the limiter.
    pub fn router(&self, app: Router) -> Router {
        let state = RateLimitState::new(self.rate_limiter.clone(), self.trust_proxy_headers);
        let limited = app.layer(axum::middleware::from_fn_with_state(
            state,
            rate_limit_middleware,
        ));

        Router::new()
            .route("/health", get(|| async { "ok" }))
            .merge(limited)
            .layer(TraceLayer::new_for_http())
    }

    /// Serve `app` until `signal` resolves.
    ///
    /// The limiter's sweeper runs for exactly as long as the server does.
    pub async fn serve_with_shutdown<F>(self, app: Router, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "Failed to bind HTTP listener");
            TollgateError::Io(e)
        })?;
        let local_addr = listener.local_addr()?;
        let router = self.router(app);

        self.rate_limiter.start_sweeper(self.sweep_interval);
        info!(
            addr = %local_addr,
            trust_proxy_headers = self.trust_proxy_headers,
            "Starting HTTP server with graceful shutdown"
        );

        let served = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await;

        self.rate_limiter.stop_sweeper().await;

        served.map_err(|e| {
            error!(error = %e, "HTTP server failed");
            TollgateError::Io(e)
        })
    }
}
