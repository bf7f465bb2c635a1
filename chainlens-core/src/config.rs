//! Configuration types

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{ChainlensError, ChainlensResult, ConfigError};
use crate::stream::SubscriptionOptions;

/// Configuration shared by the provider registries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Options passed to the change stream when a source subscribes.
    pub subscription: SubscriptionOptions,
    /// How long a polled snapshot is served before it is refetched.
    pub polling_freshness: Duration,
    /// Initial capacity of each provider's keyed cache store.
    pub cache_capacity: usize,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            subscription: SubscriptionOptions::storage_source(),
            polling_freshness: Duration::from_secs(60),
            cache_capacity: 1,
        }
    }
}

impl ProviderConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the subscription options.
    pub fn with_subscription(mut self, options: SubscriptionOptions) -> Self {
        self.subscription = options;
        self
    }

    /// Set the polling freshness window.
    pub fn with_polling_freshness(mut self, window: Duration) -> Self {
        self.polling_freshness = window;
        self
    }

    /// Set the initial cache capacity.
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `CHAINLENS_POLLING_FRESHNESS_SECS`: polling freshness window (default: 60)
    /// - `CHAINLENS_CACHE_CAPACITY`: initial cache capacity (default: 1)
    /// - `CHAINLENS_WAIT_UNTIL_SYNCED`: hold deliveries until synced (default: false)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            subscription: SubscriptionOptions {
                wait_until_synced: std::env::var("CHAINLENS_WAIT_UNTIL_SYNCED")
                    .map(|s| s == "true" || s == "1")
                    .unwrap_or(defaults.subscription.wait_until_synced),
                ..defaults.subscription
            },
            polling_freshness: std::env::var("CHAINLENS_POLLING_FRESHNESS_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.polling_freshness),
            cache_capacity: std::env::var("CHAINLENS_CACHE_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.cache_capacity),
        }
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - polling_freshness is positive
    /// - subscription.initial_size is zero unless always_notify_on_refresh
    ///   is set (a backlog without a refresh notification is never delivered)
    pub fn validate(&self) -> ChainlensResult<()> {
        if self.polling_freshness.is_zero() {
            return Err(ChainlensError::Config(ConfigError::InvalidValue {
                field: "polling_freshness".to_string(),
                value: format!("{:?}", self.polling_freshness),
                reason: "polling_freshness must be positive".to_string(),
            }));
        }

        if self.subscription.initial_size > 0 && !self.subscription.always_notify_on_refresh {
            return Err(ChainlensError::Config(ConfigError::InvalidValue {
                field: "subscription.initial_size".to_string(),
                value: self.subscription.initial_size.to_string(),
                reason: "a backlog requires always_notify_on_refresh".to_string(),
            }));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ProviderConfig::default().validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = ProviderConfig::new()
            .with_polling_freshness(Duration::from_secs(5))
            .with_cache_capacity(16);

        assert_eq!(config.polling_freshness, Duration::from_secs(5));
        assert_eq!(config.cache_capacity, 16);
        assert_eq!(config.subscription, SubscriptionOptions::storage_source());
    }

    #[test]
    fn test_zero_freshness_rejected() {
        let config = ProviderConfig::new().with_polling_freshness(Duration::ZERO);
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ChainlensError::Config(_)));
        assert!(err.to_string().contains("polling_freshness"));
    }

    #[test]
    fn test_backlog_without_refresh_rejected() {
        let config = ProviderConfig::new().with_subscription(SubscriptionOptions {
            initial_size: 4,
            ..SubscriptionOptions::storage_source()
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serde_roundtrip() {
        let config = ProviderConfig::new().with_cache_capacity(3);
        let json = serde_json::to_string(&config).unwrap();
        let back: ProviderConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
