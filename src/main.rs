use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::OriginalUri;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tollgate::bucket::{FileStore, TokenBucketLimiter};
use tollgate::config::TollgateConfig;
use tollgate::http::HttpServer;
use tollgate::ratelimit::FixedWindowLimiter;

#[derive(Debug, Parser)]
#[command(name = "tollgate", version, about = "Dual-layer request throttling")]
struct Cli {
    /// YAML configuration file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the rate-limited HTTP edge
    Serve,
    /// Operate the client-side token bucket
    Bucket {
        #[command(subcommand)]
        action: BucketAction,
    },
}

#[derive(Debug, Subcommand)]
enum BucketAction {
    /// Take one token if available
    Check,
    /// Show whole tokens available without consuming any
    Remaining,
    /// Refill the bucket to capacity
    Reset,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = TollgateConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Serve => serve(config).await,
        Command::Bucket { action } => bucket(config, action),
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn serve(config: TollgateConfig) -> anyhow::Result<()> {
    info!("Starting Tollgate HTTP edge");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let rules = config.rate_limiting.rule_table()?;
    info!(
        exact_rules = rules.len(),
        default_requests = rules.default_rule().requests,
        "Rate limit rules ready"
    );

    let rate_limiter = Arc::new(FixedWindowLimiter::new(rules));
    let server = HttpServer::new(config.server.http_addr, rate_limiter)
        .trust_proxy_headers(config.server.trust_proxy_headers)
        .sweep_interval(config.rate_limiting.sweep_interval());

    server
        .serve_with_shutdown(demo_routes(), shutdown_signal())
        .await?;

    info!("Tollgate HTTP edge stopped");
    Ok(())
}

/// Placeholder application routes; a real deployment supplies its own.
fn demo_routes() -> Router {
    Router::new()
        .route(
            "/api/chat",
            post(|| async {
                (
                    StatusCode::ACCEPTED,
                    Json(serde_json::json!({ "status": "accepted" })),
                )
            }),
        )
        .route(
            "/api/{*rest}",
            get(|OriginalUri(uri): OriginalUri| async move {
                Json(serde_json::json!({ "path": uri.path() }))
            }),
        )
}

fn bucket(config: TollgateConfig, action: BucketAction) -> anyhow::Result<()> {
    let store = Arc::new(FileStore::new(&config.client.state_path));
    let limiter = TokenBucketLimiter::new(config.client.bucket_config(), store);

    let output = match action {
        BucketAction::Check => serde_json::to_value(limiter.check_and_consume())?,
        BucketAction::Remaining => {
            serde_json::json!({ "remaining": limiter.remaining_capacity() })
        }
        BucketAction::Reset => {
            limiter.reset();
            serde_json::json!({ "remaining": limiter.remaining_capacity() })
        }
    };

    println!("{}", output);
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
