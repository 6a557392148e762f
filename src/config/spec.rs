//! Configuration specification types for the hotswap system.
//!
//! This module defines the structs that map to the `halldyll.hotswap.yaml`
//! file. Every section is optional; an empty file yields the defaults.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::hotswap::HotswapMode;

/// The root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HotswapConfig {
    /// How non-hotswappable changes are treated.
    #[serde(default)]
    pub mode: HotswapMode,
    /// Rollout overrides for container services.
    #[serde(default)]
    pub ecs: EcsHotswapProperties,
    /// Poll intervals used while waiting for updates to settle.
    #[serde(default)]
    pub waits: WaitSettings,
}

/// Rollout overrides for container services.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EcsHotswapProperties {
    /// Minimum healthy percent during the rollout; zero when unset.
    #[serde(default)]
    pub minimum_healthy_percent: Option<u32>,
    /// Maximum percent during the rollout; platform default when unset.
    #[serde(default)]
    pub maximum_healthy_percent: Option<u32>,
}

impl EcsHotswapProperties {
    /// Returns true if neither override is set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.minimum_healthy_percent.is_none() && self.maximum_healthy_percent.is_none()
    }
}

/// Poll intervals, in milliseconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct WaitSettings {
    /// Poll interval for function updates.
    #[serde(default = "default_lambda_poll_interval")]
    pub lambda_poll_interval_ms: u64,
    /// Poll interval for functions in a VPC or packaged as images.
    #[serde(default = "default_lambda_slow_poll_interval")]
    pub lambda_slow_poll_interval_ms: u64,
    /// Poll interval for container service rollouts.
    #[serde(default = "default_ecs_poll_interval")]
    pub ecs_poll_interval_ms: u64,
    /// Poll interval for schema creation.
    #[serde(default = "default_appsync_poll_interval")]
    pub appsync_poll_interval_ms: u64,
    /// First backoff delay when a resolver function update collides with
    /// another update; doubled on every retry.
    #[serde(default = "default_appsync_retry_base")]
    pub appsync_retry_base_ms: u64,
}

impl Default for WaitSettings {
    fn default() -> Self {
        Self {
            lambda_poll_interval_ms: default_lambda_poll_interval(),
            lambda_slow_poll_interval_ms: default_lambda_slow_poll_interval(),
            ecs_poll_interval_ms: default_ecs_poll_interval(),
            appsync_poll_interval_ms: default_appsync_poll_interval(),
            appsync_retry_base_ms: default_appsync_retry_base(),
        }
    }
}

impl WaitSettings {
    /// Poll interval for function updates.
    #[must_use]
    pub const fn lambda_poll_interval(&self) -> Duration {
        Duration::from_millis(self.lambda_poll_interval_ms)
    }

    /// Poll interval for slow function updates.
    #[must_use]
    pub const fn lambda_slow_poll_interval(&self) -> Duration {
        Duration::from_millis(self.lambda_slow_poll_interval_ms)
    }

    /// Poll interval for service rollouts.
    #[must_use]
    pub const fn ecs_poll_interval(&self) -> Duration {
        Duration::from_millis(self.ecs_poll_interval_ms)
    }

    /// Poll interval for schema creation.
    #[must_use]
    pub const fn appsync_poll_interval(&self) -> Duration {
        Duration::from_millis(self.appsync_poll_interval_ms)
    }

    /// Backoff delay before the given retry, counted from zero.
    #[must_use]
    pub fn appsync_retry_delay(&self, retry: u32) -> Duration {
        let factor = 1_u64.checked_shl(retry).unwrap_or(u64::MAX);
        Duration::from_millis(self.appsync_retry_base_ms.saturating_mul(factor))
    }
}

const fn default_lambda_poll_interval() -> u64 {
    1_000
}

const fn default_lambda_slow_poll_interval() -> u64 {
    5_000
}

const fn default_ecs_poll_interval() -> u64 {
    15_000
}

const fn default_appsync_poll_interval() -> u64 {
    1_000
}

const fn default_appsync_retry_base() -> u64 {
    1_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: HotswapConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.mode, HotswapMode::FallBack);
        assert!(config.ecs.is_empty());
        assert_eq!(config.waits, WaitSettings::default());
        assert_eq!(config.waits.lambda_poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_partial_sections() {
        let yaml = r"
mode: hotswap-only
ecs:
  minimum_healthy_percent: 50
waits:
  ecs_poll_interval_ms: 500
";
        let config: HotswapConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.mode, HotswapMode::HotswapOnly);
        assert_eq!(config.ecs.minimum_healthy_percent, Some(50));
        assert_eq!(config.ecs.maximum_healthy_percent, None);
        assert_eq!(config.waits.ecs_poll_interval_ms, 500);
        assert_eq!(config.waits.lambda_slow_poll_interval_ms, 5_000);
        assert_eq!(config.waits.appsync_poll_interval_ms, 1_000);
    }

    #[test]
    fn test_appsync_retry_delay_doubles() {
        let waits = WaitSettings::default();
        assert_eq!(waits.appsync_retry_delay(0), Duration::from_secs(1));
        assert_eq!(waits.appsync_retry_delay(3), Duration::from_secs(8));
    }
}
