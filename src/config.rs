//! Health Monitor configuration (spec §4.2, §6).

use crate::error::{RoutingError, RoutingResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tuning knobs for the Health Monitor. Defaults match spec §4.2/§6.
///
/// Derives `Serialize`/`Deserialize` so an embedding application can load
/// these from its own config file or environment the way it already loads
/// everything else. The core itself has no config-file format or CLI
/// surface of its own (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthMonitorConfig {
    /// Period between probe waves.
    pub probe_interval: Duration,

    /// Per-probe request deadline.
    pub probe_timeout: Duration,

    /// Consecutive successful probes required to enter Healthy.
    pub healthy_threshold: u32,

    /// Consecutive failed probes required to enter Unhealthy.
    pub unhealthy_threshold: u32,

    /// URL path appended to a target to form its probe URL, e.g. `/readyz`.
    pub probe_path: String,

    /// URL scheme prefixed to a target, e.g. `https`. Overridable for
    /// deployments that front targets with plain HTTP internally.
    pub probe_scheme: String,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(1),
            probe_timeout: Duration::from_secs(5),
            healthy_threshold: 5,
            unhealthy_threshold: 2,
            probe_path: "/readyz".to_string(),
            probe_scheme: "https".to_string(),
        }
    }
}

impl HealthMonitorConfig {
    /// Validates thresholds, returning `RoutingError::Configuration` on
    /// anything the monitor could not run with (spec §7 ConfigurationError).
    pub fn validate(&self) -> RoutingResult<()> {
        if self.healthy_threshold == 0 {
            return Err(RoutingError::Configuration(
                "healthyThreshold must be >= 1".to_string(),
            ));
        }
        if self.unhealthy_threshold == 0 {
            return Err(RoutingError::Configuration(
                "unhealthyThreshold must be >= 1".to_string(),
            ));
        }
        if self.probe_path.is_empty() {
            return Err(RoutingError::Configuration(
                "probeEndpoint must not be empty".to_string(),
            ));
        }
        if self.probe_scheme.is_empty() {
            return Err(RoutingError::Configuration(
                "probeScheme must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Builds the probe URL for a target, e.g. `https://host:port/readyz`.
    pub fn probe_url(&self, target: &crate::target::Target) -> String {
        format!("{}://{}{}", self.probe_scheme, target.as_str(), self.probe_path)
    }
}
