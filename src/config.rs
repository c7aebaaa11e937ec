//! Configuration management for Floodgate.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FloodgateError, Result};
use crate::ratelimit::Policy;

/// Prefix of environment variables overriding file configuration,
/// e.g. `FLOODGATE__STORE__REDIS_URL`.
pub const ENV_PREFIX: &str = "FLOODGATE";

/// Main configuration for the Floodgate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FloodgateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Counter store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Redis URL. Without one counters are kept in process memory.
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Number of Redis connection managers
    #[serde(default = "default_connection_count")]
    pub connection_count: usize,

    /// Deadline for each store call in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            connection_count: default_connection_count(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl StoreConfig {
    /// Per-call store deadline.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_connection_count() -> usize {
    4
}

fn default_timeout_ms() -> u64 {
    50
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Policy of the tenant-scoped gate
    #[serde(default = "default_tenant_policy")]
    pub tenant: Policy,

    /// Policy of the IP-scoped gate
    #[serde(default = "default_ip_policy")]
    pub ip: Policy,

    /// Floor applied to a non-positive `requests_per_minute`
    #[serde(default = "default_min_requests_per_minute")]
    pub min_requests_per_minute: u64,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            tenant: default_tenant_policy(),
            ip: default_ip_policy(),
            min_requests_per_minute: default_min_requests_per_minute(),
        }
    }
}

fn default_tenant_policy() -> Policy {
    Policy::new(600, "floodgate:tenant")
}

fn default_ip_policy() -> Policy {
    Policy::new(60, "floodgate:ip")
}

fn default_min_requests_per_minute() -> u64 {
    1
}

impl RateLimitingConfig {
    /// The tenant policy with unusable values replaced.
    pub fn tenant_policy(&self) -> Policy {
        self.tenant
            .clone()
            .sanitize("tenant", self.min_requests_per_minute)
    }

    /// The IP policy with unusable values replaced.
    pub fn ip_policy(&self) -> Policy {
        self.ip.clone().sanitize("ip", self.min_requests_per_minute)
    }
}

impl FloodgateConfig {
    /// Load configuration from an optional file plus `FLOODGATE__*` environment
    /// overrides.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }
        builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| FloodgateError::Config(e.to_string()))
    }

    /// Load configuration from a file path.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| FloodgateError::Config(e.to_string()))
    }
}
