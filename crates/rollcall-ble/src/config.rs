//! Presence engine configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::permissions::PermissionModel;
use crate::protocol::{BeaconScheme, RECEIVER_NAME_FRAGMENT};

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Longest accepted liveness period
pub const MAX_LIVENESS_INTERVAL_MS: u64 = 3_600_000;

/// Longest accepted scan or connection timeout
pub const MAX_TIMEOUT_SECS: u64 = 3_600;

/// Whether scanning and advertising may drive the radio at the same time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolePolicy {
    /// Starting one role stops the other while it is on air
    #[default]
    Exclusive,
    /// The radio multiplexes central and peripheral roles
    Concurrent,
}

/// Configuration for the presence engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How the platform grants radio capabilities
    pub permission_model: PermissionModel,
    /// Beacon layout on air
    pub beacon_scheme: BeaconScheme,
    /// Liveness tick period while advertising (in milliseconds)
    pub liveness_interval_ms: u64,
    /// Fall back to degraded (log-only) advertising when the host cannot be a peripheral
    pub allow_degraded: bool,
    /// Substring identifying the receiver in advertised names
    pub receiver_name_fragment: String,
    /// Default timeout when scanning for the receiver (in seconds)
    pub receiver_scan_timeout_secs: u64,
    /// Default window for diagnostic scans (in seconds)
    pub scan_all_timeout_secs: u64,
    /// Maximum time to wait for a check-in connection (in seconds)
    pub connection_timeout_secs: u64,
    /// Scan/advertise coexistence
    pub role_policy: RolePolicy,
    /// Buffered events per subscriber before the slowest one lags
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            permission_model: PermissionModel::default(),
            beacon_scheme: BeaconScheme::default(),
            liveness_interval_ms: 3_000,
            allow_degraded: true,
            receiver_name_fragment: RECEIVER_NAME_FRAGMENT.to_string(),
            receiver_scan_timeout_secs: 10,
            scan_all_timeout_secs: 15,
            connection_timeout_secs: 5,
            role_policy: RolePolicy::default(),
            event_capacity: 64,
        }
    }
}

impl EngineConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_permission_model(mut self, model: PermissionModel) -> Self {
        self.permission_model = model;
        self
    }

    pub fn with_beacon_scheme(mut self, scheme: BeaconScheme) -> Self {
        self.beacon_scheme = scheme;
        self
    }

    pub fn with_liveness_interval(mut self, interval: Duration) -> Self {
        self.liveness_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_allow_degraded(mut self, enabled: bool) -> Self {
        self.allow_degraded = enabled;
        self
    }

    pub fn with_receiver_name_fragment(mut self, fragment: impl Into<String>) -> Self {
        self.receiver_name_fragment = fragment.into();
        self
    }

    pub fn with_receiver_scan_timeout(mut self, timeout: Duration) -> Self {
        self.receiver_scan_timeout_secs = timeout.as_secs();
        self
    }

    pub fn with_role_policy(mut self, policy: RolePolicy) -> Self {
        self.role_policy = policy;
        self
    }

    pub fn liveness_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_interval_ms)
    }

    pub fn receiver_scan_timeout(&self) -> Duration {
        Duration::from_secs(self.receiver_scan_timeout_secs)
    }

    pub fn scan_all_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_all_timeout_secs)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.liveness_interval_ms == 0 || self.liveness_interval_ms > MAX_LIVENESS_INTERVAL_MS {
            return Err(EngineError::Config(format!(
                "Liveness interval must be between 1 and {} ms",
                MAX_LIVENESS_INTERVAL_MS
            )));
        }
        let timeouts = [
            self.receiver_scan_timeout_secs,
            self.scan_all_timeout_secs,
            self.connection_timeout_secs,
        ];
        if timeouts.iter().any(|&secs| secs == 0 || secs > MAX_TIMEOUT_SECS) {
            return Err(EngineError::Config(format!(
                "Scan and connection timeouts must be between 1 and {} s",
                MAX_TIMEOUT_SECS
            )));
        }
        if self.receiver_name_fragment.trim().is_empty() {
            return Err(EngineError::Config(
                "Receiver name fragment must not be empty".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(EngineError::Config(
                "Event capacity must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
