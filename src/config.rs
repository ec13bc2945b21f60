use std::ops::Range;

use crate::intents::Intents;

/// Inclusive bounds on the large-guild threshold accepted by the gateway.
pub const LARGE_THRESHOLD_MIN: u16 = 50;
pub const LARGE_THRESHOLD_MAX: u16 = 250;

/// How many shards to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShardCount {
    /// Use the server-recommended count from gateway metadata, starting at 0.
    #[default]
    Auto,
    /// Run exactly this many shards, starting at the configured offset.
    Exact(u16),
}

/// Immutable gateway configuration, validated at construction.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Bot token used for identify, resume, and metadata fetches.
    pub token: String,
    /// Event categories this connection subscribes to.
    pub intents: Intents,
    /// Negotiate transport stream compression.
    pub compress: bool,
    /// Member count at which a guild is considered large. Bound to [50, 250].
    pub large_threshold: u16,
    /// Automatic or explicit shard sizing.
    pub shard_count: ShardCount,
    /// First shard ID for an explicit shard count.
    pub shards_start_from: u16,
    /// Reconnect attempt budget per shard; `None` retries indefinitely.
    pub reconnect_attempts: Option<u32>,
}

impl GatewayConfig {
    /// Create a new builder for configuration.
    pub fn builder(token: impl Into<String>) -> GatewayConfigBuilder {
        GatewayConfigBuilder {
            token: token.into(),
            intents: Intents::empty(),
            compress: false,
            large_threshold: LARGE_THRESHOLD_MIN,
            shard_count: ShardCount::Auto,
            shards_start_from: 0,
            reconnect_attempts: None,
        }
    }

    /// The shard count and ID range for a bring-up pass.
    ///
    /// `recommended` is the server-recommended count from gateway metadata and
    /// only applies to automatic sizing.
    pub(crate) fn shard_ids(&self, recommended: u16) -> (u16, Range<u16>) {
        match self.shard_count {
            ShardCount::Auto => (recommended, 0..recommended),
            ShardCount::Exact(count) => (
                count,
                self.shards_start_from..self.shards_start_from + count,
            ),
        }
    }
}

/// Builder for [`GatewayConfig`].
#[derive(Debug, Clone)]
pub struct GatewayConfigBuilder {
    token: String,
    intents: Intents,
    compress: bool,
    large_threshold: u16,
    shard_count: ShardCount,
    shards_start_from: u16,
    reconnect_attempts: Option<u32>,
}

impl GatewayConfigBuilder {
    /// Set the intents bitfield.
    pub fn intents(mut self, intents: Intents) -> Self {
        self.intents = intents;
        self
    }

    /// Enable or disable transport stream compression.
    pub fn compress(mut self, enabled: bool) -> Self {
        self.compress = enabled;
        self
    }

    /// Set the large-guild threshold.
    pub fn large_threshold(mut self, threshold: u16) -> Self {
        self.large_threshold = threshold;
        self
    }

    /// Set automatic or explicit shard sizing.
    pub fn shard_count(mut self, count: ShardCount) -> Self {
        self.shard_count = count;
        self
    }

    /// Set the first shard ID for an explicit shard count.
    pub fn shards_start_from(mut self, offset: u16) -> Self {
        self.shards_start_from = offset;
        self
    }

    /// Bound the number of reconnect attempts per shard. `None` (the default)
    /// retries indefinitely.
    pub fn reconnect_attempts(mut self, attempts: Option<u32>) -> Self {
        self.reconnect_attempts = attempts;
        self
    }

    /// Build the configuration with validation.
    ///
    /// Configuration errors are raised here, synchronously, never at
    /// bring-up time.
    pub fn build(self) -> Result<GatewayConfig, ConfigError> {
        if !(LARGE_THRESHOLD_MIN..=LARGE_THRESHOLD_MAX).contains(&self.large_threshold) {
            return Err(ConfigError::LargeThresholdOutOfRange(self.large_threshold));
        }

        // Automatic sizing always starts at shard 0; a non-zero offset with
        // auto sizing is ambiguous.
        if self.shard_count == ShardCount::Auto && self.shards_start_from != 0 {
            return Err(ConfigError::StartOffsetWithAutoShards(
                self.shards_start_from,
            ));
        }

        // The whole ID range must fit the 16-bit shard ID space.
        if let ShardCount::Exact(count) = self.shard_count {
            if self.shards_start_from.checked_add(count).is_none() {
                return Err(ConfigError::ShardRangeOverflow {
                    start: self.shards_start_from,
                    count,
                });
            }
        }

        Ok(GatewayConfig {
            token: self.token,
            intents: self.intents,
            compress: self.compress,
            large_threshold: self.large_threshold,
            shard_count: self.shard_count,
            shards_start_from: self.shards_start_from,
            reconnect_attempts: self.reconnect_attempts,
        })
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// Large threshold outside the accepted [50, 250] range
    #[error("large_threshold must be between 50 and 250, got {0}")]
    LargeThresholdOutOfRange(u16),
    /// Automatic shard sizing combined with a non-zero start offset
    #[error("shards_start_from ({0}) requires an explicit shard count")]
    StartOffsetWithAutoShards(u16),
    /// Start offset plus shard count exceeds the shard ID space
    #[error("shards_start_from ({start}) plus shard count ({count}) overflows the shard ID space")]
    ShardRangeOverflow { start: u16, count: u16 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_large_threshold_bounds() {
        for threshold in [49, 251, 0, 1000] {
            let result = GatewayConfig::builder("t").large_threshold(threshold).build();
            assert!(
                matches!(result, Err(ConfigError::LargeThresholdOutOfRange(_))),
                "{threshold} should be rejected"
            );
        }
        for threshold in [50, 150, 250] {
            assert!(
                GatewayConfig::builder("t").large_threshold(threshold).build().is_ok(),
                "{threshold} should be accepted"
            );
        }
    }

    #[test]
    fn test_auto_count_rejects_start_offset() {
        let result = GatewayConfig::builder("t").shards_start_from(4).build();
        assert!(matches!(
            result,
            Err(ConfigError::StartOffsetWithAutoShards(4))
        ));

        // The same offset is fine with an explicit count.
        let config = GatewayConfig::builder("t")
            .shard_count(ShardCount::Exact(2))
            .shards_start_from(4)
            .build()
            .expect("valid config");
        assert_eq!(config.shards_start_from, 4);
    }

    #[test]
    fn test_shard_range_overflow_rejected() {
        let result = GatewayConfig::builder("t")
            .shard_count(ShardCount::Exact(1000))
            .shards_start_from(65000)
            .build();
        assert!(matches!(
            result,
            Err(ConfigError::ShardRangeOverflow {
                start: 65000,
                count: 1000
            })
        ));

        // The range may end exactly at the top of the ID space.
        let config = GatewayConfig::builder("t")
            .shard_count(ShardCount::Exact(535))
            .shards_start_from(65000)
            .build()
            .expect("valid config");
        let (_, ids) = config.shard_ids(0);
        assert_eq!(ids.last(), Some(65534));
    }

    #[test]
    fn test_shard_ids_auto_uses_recommended() {
        let config = GatewayConfig::builder("t").build().expect("valid config");
        let (count, ids) = config.shard_ids(4);
        assert_eq!(count, 4);
        assert_eq!(ids.collect::<Vec<_>>(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_shard_ids_explicit_with_offset() {
        let config = GatewayConfig::builder("t")
            .shard_count(ShardCount::Exact(3))
            .shards_start_from(2)
            .build()
            .expect("valid config");
        // Recommended count is ignored for explicit sizing.
        let (count, ids) = config.shard_ids(99);
        assert_eq!(count, 3);
        assert_eq!(ids.collect::<Vec<_>>(), vec![2, 3, 4]);
    }

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::builder("t").build().expect("valid config");
        assert_eq!(config.large_threshold, 50);
        assert_eq!(config.shard_count, ShardCount::Auto);
        assert!(!config.compress);
        assert_eq!(config.reconnect_attempts, None);
    }
}
