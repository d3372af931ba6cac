//! Embedder configuration for the coordination substrate.

use std::time::Duration;

use crate::consensus::SessionConfig;
use crate::{Error, Result};

/// Configuration for a slate deployment.
///
/// Embedders construct this through [`CoordinationConfig::builder`]; every
/// field has the default the rest of the crate assumes.
#[derive(Debug, Clone)]
pub struct CoordinationConfig {
    /// SQLite connection URL for the shared store.
    pub storage_url: String,
    /// Connection pool size.
    pub pool_size: u32,
    /// Cadence of worker heartbeats.
    pub heartbeat_interval: Duration,
    /// Cadence of the worker claim loop.
    pub claim_interval: Duration,
    /// Maximum tasks fetched per claim-loop pass.
    pub claim_batch_size: usize,
    /// Retry bound for contended claim attempts.
    pub claim_retry_bound: u32,
    /// Heartbeat silence after which an agent is considered inactive.
    pub agent_timeout: Duration,
    /// Upper bound applied to knowledge TTLs.
    pub ttl_cap: Duration,
    /// Default consensus thresholds for sessions opened without explicit
    /// per-session configuration.
    pub consensus_defaults: SessionConfig,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            storage_url: "sqlite::memory:".to_owned(),
            pool_size: 5,
            heartbeat_interval: Duration::from_secs(30),
            claim_interval: Duration::from_secs(5),
            claim_batch_size: 5,
            claim_retry_bound: 3,
            agent_timeout: Duration::from_secs(300),
            ttl_cap: Duration::from_secs(7 * 24 * 3600),
            consensus_defaults: SessionConfig::default(),
        }
    }
}

impl CoordinationConfig {
    /// Create a builder seeded with defaults.
    #[must_use]
    pub fn builder() -> CoordinationConfigBuilder {
        CoordinationConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder with fallible construction.
#[derive(Debug, Clone)]
pub struct CoordinationConfigBuilder {
    config: CoordinationConfig,
}

impl CoordinationConfigBuilder {
    /// Set the storage URL.
    #[must_use]
    pub fn storage_url(mut self, url: impl Into<String>) -> Self {
        self.config.storage_url = url.into();
        self
    }

    /// Set the connection pool size.
    #[must_use]
    pub const fn pool_size(mut self, size: u32) -> Self {
        self.config.pool_size = size;
        self
    }

    /// Set the heartbeat cadence.
    #[must_use]
    pub const fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval = interval;
        self
    }

    /// Set the claim-loop cadence.
    #[must_use]
    pub const fn claim_interval(mut self, interval: Duration) -> Self {
        self.config.claim_interval = interval;
        self
    }

    /// Set the claim batch size.
    #[must_use]
    pub const fn claim_batch_size(mut self, size: usize) -> Self {
        self.config.claim_batch_size = size;
        self
    }

    /// Set the claim retry bound.
    #[must_use]
    pub const fn claim_retry_bound(mut self, bound: u32) -> Self {
        self.config.claim_retry_bound = bound;
        self
    }

    /// Set the agent heartbeat timeout.
    #[must_use]
    pub const fn agent_timeout(mut self, timeout: Duration) -> Self {
        self.config.agent_timeout = timeout;
        self
    }

    /// Set the TTL cap for knowledge items.
    #[must_use]
    pub const fn ttl_cap(mut self, cap: Duration) -> Self {
        self.config.ttl_cap = cap;
        self
    }

    /// Set the default consensus thresholds.
    #[must_use]
    pub fn consensus_defaults(mut self, defaults: SessionConfig) -> Self {
        self.config.consensus_defaults = defaults;
        self
    }

    /// Build the configuration, validating field constraints.
    pub fn build(self) -> Result<CoordinationConfig> {
        if self.config.storage_url.is_empty() {
            return Err(Error::InvalidConfig("storage_url cannot be empty".into()));
        }
        if self.config.pool_size == 0 {
            return Err(Error::InvalidConfig("pool_size must be at least 1".into()));
        }
        if self.config.claim_batch_size == 0 {
            return Err(Error::InvalidConfig(
                "claim_batch_size must be at least 1".into(),
            ));
        }
        if self.config.agent_timeout < self.config.heartbeat_interval {
            return Err(Error::InvalidConfig(
                "agent_timeout must not be shorter than heartbeat_interval".into(),
            ));
        }

        let defaults = &self.config.consensus_defaults;
        for (name, value) in [
            ("weighted_threshold", defaults.weighted_threshold),
            ("min_confidence", defaults.min_confidence),
            ("consensus_threshold", defaults.consensus_threshold),
            ("min_constitutional_score", defaults.min_constitutional_score),
            ("expert_consensus_threshold", defaults.expert_consensus_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::InvalidConfig(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }
        if defaults.override_threshold < 0.0 {
            return Err(Error::InvalidConfig(
                "override_threshold must be non-negative".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_build() -> Result<()> {
        let config = CoordinationConfig::builder().build()?;
        assert_eq!(config.claim_batch_size, 5);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.agent_timeout, Duration::from_secs(300));
        Ok(())
    }

    #[test]
    fn test_empty_storage_url_rejected() {
        let result = CoordinationConfig::builder().storage_url("").build();
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let result = CoordinationConfig::builder().claim_batch_size(0).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_timeout_shorter_than_heartbeat_rejected() {
        let result = CoordinationConfig::builder()
            .heartbeat_interval(Duration::from_secs(60))
            .agent_timeout(Duration::from_secs(30))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_consensus_defaults_are_configurable() -> Result<()> {
        let defaults = SessionConfig {
            weighted_threshold: 0.7,
            ..SessionConfig::default()
        };
        let config = CoordinationConfig::builder().consensus_defaults(defaults).build()?;
        assert!((config.consensus_defaults.weighted_threshold - 0.7).abs() < 1e-9);
        assert!((config.consensus_defaults.min_confidence - 0.6).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn test_out_of_range_consensus_threshold_rejected() {
        let defaults = SessionConfig {
            consensus_threshold: 1.5,
            ..SessionConfig::default()
        };
        let result = CoordinationConfig::builder().consensus_defaults(defaults).build();
        assert!(result.is_err());
    }
}
