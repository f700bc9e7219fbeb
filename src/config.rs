//! Configuration management for Tollgate.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::bucket::BucketConfig;
use crate::error::{Result, TollgateError};
use crate::ratelimit::RuleTable;

/// Prefix for environment variable overrides, e.g. `TOLLGATE_SERVER__HTTP_ADDR`.
const ENV_PREFIX: &str = "TOLLGATE";

/// Main configuration for Tollgate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TollgateConfig {
    /// HTTP edge configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Server-side rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Client-side token bucket configuration
    #[serde(default)]
    pub client: ClientConfig,
}

/// HTTP edge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,

    /// Take the caller address from `X-Forwarded-For` / `X-Real-IP`.
    /// Only enable behind a proxy that overwrites these headers.
    #[serde(default)]
    pub trust_proxy_headers: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            trust_proxy_headers: false,
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Server-side rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Path to a YAML rule file; built-in rules apply when unset
    #[serde(default)]
    pub rules_path: Option<PathBuf>,

    /// Seconds between sweeps of expired windows
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            rules_path: None,
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_sweep_interval() -> u64 {
    60
}

impl RateLimitingConfig {
    /// Load the configured rule table.
    pub fn rule_table(&self) -> Result<RuleTable> {
        match &self.rules_path {
            Some(path) => RuleTable::from_file(path),
            None => Ok(RuleTable::default()),
        }
    }

    /// Period between sweeps.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Client-side token bucket configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Sustained rate; also the burst capacity
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,

    /// Key the bucket state is stored under
    #[serde(default = "default_storage_key")]
    pub storage_key: String,

    /// File holding persisted bucket state
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: default_requests_per_minute(),
            storage_key: default_storage_key(),
            state_path: default_state_path(),
        }
    }
}

fn default_requests_per_minute() -> u32 {
    crate::bucket::DEFAULT_REQUESTS_PER_MINUTE
}

fn default_storage_key() -> String {
    crate::bucket::DEFAULT_STORAGE_KEY.to_string()
}

fn default_state_path() -> PathBuf {
    PathBuf::from(".tollgate-state.json")
}

impl ClientConfig {
    /// The token bucket configuration described by this section.
    pub fn bucket_config(&self) -> BucketConfig {
        BucketConfig::new(self.requests_per_minute).with_storage_key(self.storage_key.clone())
    }
}

impl TollgateConfig {
    /// Load configuration from defaults, an optional YAML file, and
    /// `TOLLGATE_`-prefixed environment variables, in increasing precedence.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                ::config::File::from(path).format(::config::FileFormat::Yaml),
            );
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: TollgateConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| TollgateError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file only.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TollgateConfig = serde_yaml::from_str(yaml)
            .map_err(|e| TollgateError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.rate_limiting.sweep_interval_secs == 0 {
            return Err(TollgateError::Config(
                "rate_limiting.sweep_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.client.requests_per_minute == 0 {
            return Err(TollgateError::Config(
                "client.requests_per_minute must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
