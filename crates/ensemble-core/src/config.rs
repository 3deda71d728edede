//! Operator configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tuning knobs for reconciliation and readiness waits.
///
/// The namespace under reconciliation is not configuration: every operator
/// API takes it as an argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorConfig {
    /// Interval between readiness probes, in milliseconds.
    pub poll_interval_ms: u64,
    /// Overall deadline for one readiness wait, in milliseconds. Exceeding
    /// it fails the owning session; the next reconcile pass retries.
    pub operation_timeout_ms: u64,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            operation_timeout_ms: 60_000,
        }
    }
}

impl OperatorConfig {
    /// Load configuration from environment variables.
    ///
    /// Supported environment variables:
    /// - `ENSEMBLE_POLL_INTERVAL_MS`: interval between readiness probes
    /// - `ENSEMBLE_OPERATION_TIMEOUT_MS`: deadline for one readiness wait
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("ENSEMBLE_POLL_INTERVAL_MS") {
            if let Ok(n) = val.parse() {
                config.poll_interval_ms = n;
            }
        }
        if let Ok(val) = std::env::var("ENSEMBLE_OPERATION_TIMEOUT_MS") {
            if let Ok(n) = val.parse() {
                config.operation_timeout_ms = n;
            }
        }

        config
    }

    /// Interval between readiness probes.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Overall deadline for one readiness wait.
    #[must_use]
    pub const fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = OperatorConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.operation_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn serde_round_trip() {
        let config = OperatorConfig {
            poll_interval_ms: 250,
            operation_timeout_ms: 5_000,
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: OperatorConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn deserializes_from_plain_fields() {
        let config: OperatorConfig =
            serde_json::from_str(r#"{"poll_interval_ms":100,"operation_timeout_ms":900}"#)
                .unwrap();
        assert_eq!(config.poll_interval(), Duration::from_millis(100));
        assert_eq!(config.operation_timeout(), Duration::from_millis(900));
    }
}
