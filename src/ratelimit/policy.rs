//! Gate policy configuration and validation.

use serde::{Deserialize, Deserializer, Serialize};
use tracing::{info, warn};

use crate::error::{FloodgateError, Result};

/// Key prefix used when none (or an empty one) is configured.
pub const DEFAULT_KEY_PREFIX: &str = "floodgate";

/// Sustained rate used when none is configured.
pub const DEFAULT_REQUESTS_PER_MINUTE: u64 = 60;

/// Rate limit policy for one gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    /// Sustained number of requests allowed per minute
    #[serde(
        default = "default_requests_per_minute",
        deserialize_with = "deserialize_rate"
    )]
    pub requests_per_minute: u64,

    /// Optional ceiling above the sustained rate
    #[serde(default)]
    pub burst_size: Option<u64>,

    /// Namespace for this gate's counters in the shared store
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            requests_per_minute: default_requests_per_minute(),
            burst_size: None,
            key_prefix: default_key_prefix(),
        }
    }
}

fn default_requests_per_minute() -> u64 {
    DEFAULT_REQUESTS_PER_MINUTE
}

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

// Negative rates are read as zero and corrected by `Policy::sanitize`.
fn deserialize_rate<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let rate = i64::deserialize(deserializer)?;
    if rate < 0 {
        warn!(configured = rate, "Negative requests_per_minute");
    }
    Ok(u64::try_from(rate).unwrap_or(0))
}

impl Policy {
    /// Create a policy with no burst allowance.
    pub fn new(requests_per_minute: u64, key_prefix: &str) -> Self {
        Self {
            requests_per_minute,
            burst_size: None,
            key_prefix: key_prefix.to_string(),
        }
    }

    /// Set the burst ceiling.
    pub fn with_burst(mut self, burst_size: u64) -> Self {
        self.burst_size = Some(burst_size);
        self
    }

    /// Load a policy from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| FloodgateError::Config(e.to_string()))
    }

    /// The effective ceiling. Burst only ever raises it.
    pub fn limit(&self) -> u64 {
        self.requests_per_minute
            .max(self.burst_size.unwrap_or(0))
    }

    /// Returns `true` if the policy can be enforced as is.
    pub fn is_usable(&self) -> bool {
        self.requests_per_minute > 0 && !self.key_prefix.trim().is_empty()
    }

    /// Replace unusable values with safe ones.
    ///
    /// A zero sustained rate is raised to `min_requests_per_minute` (itself at
    /// least 1) and an empty prefix falls back to [`DEFAULT_KEY_PREFIX`]. Each
    /// correction is logged once here, at startup.
    pub fn sanitize(mut self, gate: &str, min_requests_per_minute: u64) -> Self {
        let floor = min_requests_per_minute.max(1);

        if self.requests_per_minute == 0 {
            warn!(
                gate = gate,
                configured = self.requests_per_minute,
                applied = floor,
                "Non-positive requests_per_minute, using configured minimum"
            );
            self.requests_per_minute = floor;
        }

        if self.key_prefix.trim().is_empty() {
            warn!(
                gate = gate,
                applied = DEFAULT_KEY_PREFIX,
                "Empty key_prefix, using default"
            );
            self.key_prefix = DEFAULT_KEY_PREFIX.to_string();
        }

        if let Some(burst) = self.burst_size {
            if burst <= self.requests_per_minute {
                info!(
                    gate = gate,
                    burst_size = burst,
                    requests_per_minute = self.requests_per_minute,
                    "burst_size does not exceed requests_per_minute and has no effect"
                );
            }
        }

        self
    }
}
