//! Configuration for the sync engine.

use std::time::Duration;
use tallysync_protocol::{ConflictPolicy, EntityType};

/// What the operation log does when an enqueue would exceed its capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Evict the oldest operation to make room.
    #[default]
    DropOldest,
    /// Refuse the new operation with [`SyncError::QueueFull`](crate::SyncError::QueueFull).
    Reject,
}

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Client platform recorded in sync metadata.
    pub platform: String,
    /// Client application version recorded in sync metadata.
    pub app_version: String,
    /// Prefix prepended to every request path.
    pub base_path: String,
    /// Interval between scheduled passes.
    pub sync_interval: Duration,
    /// Per-request timeout handed to the HTTP client.
    pub request_timeout: Duration,
    /// Maximum number of queued operations.
    pub queue_capacity: usize,
    /// Behavior when the queue is full.
    pub overflow: OverflowPolicy,
    /// Storage key prefix of the report cache.
    pub cache_prefix: String,
    /// Lifetime of cached reports.
    pub report_ttl: Duration,
    /// Conflict resolution policy for entity reconciliation.
    pub conflict_policy: ConflictPolicy,
    /// Entity types reconciled by each pass, in order.
    pub entity_types: Vec<EntityType>,
    /// Retry configuration.
    pub retry: RetryConfig,
}

impl SyncConfig {
    /// Creates a configuration for the given platform and app version.
    pub fn new(platform: impl Into<String>, app_version: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            app_version: app_version.into(),
            base_path: String::new(),
            sync_interval: Duration::from_secs(30 * 60),
            request_timeout: Duration::from_secs(30),
            queue_capacity: 10,
            overflow: OverflowPolicy::DropOldest,
            cache_prefix: "report_cache_".to_string(),
            report_ttl: Duration::from_secs(60 * 60),
            conflict_policy: ConflictPolicy::LastWriteWins,
            entity_types: EntityType::ALL.to_vec(),
            retry: RetryConfig::default(),
        }
    }

    /// Sets the request path prefix.
    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = base_path.into();
        self
    }

    /// Sets the interval between scheduled passes.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Sets the overflow policy.
    pub fn with_overflow(mut self, overflow: OverflowPolicy) -> Self {
        self.overflow = overflow;
        self
    }

    /// Sets the report cache key prefix.
    pub fn with_cache_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.cache_prefix = prefix.into();
        self
    }

    /// Sets the lifetime of cached reports.
    pub fn with_report_ttl(mut self, ttl: Duration) -> Self {
        self.report_ttl = ttl;
        self
    }

    /// Sets the conflict policy.
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    /// Sets which entity types are reconciled.
    pub fn with_entity_types(mut self, types: impl Into<Vec<EntityType>>) -> Self {
        self.entity_types = types.into();
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("unknown", env!("CARGO_PKG_VERSION"))
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of failed attempts before an operation is given up.
    pub max_retries: u32,
    /// Delay after the first failure.
    pub base_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5 * 60),
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Sets the base delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Calculates the delay after `retry_count` failed attempts:
    /// `base_delay * 2^retry_count`, capped at `max_delay`.
    pub fn delay_for_attempt(&self, retry_count: u32) -> Duration {
        let factor = 1u32.checked_shl(retry_count).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(Duration::MAX)
            .min(self.max_delay)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new("ios", "2.4.1")
            .with_queue_capacity(25)
            .with_timeout(Duration::from_secs(60))
            .with_entity_types([EntityType::Expenses]);

        assert_eq!(config.platform, "ios");
        assert_eq!(config.app_version, "2.4.1");
        assert_eq!(config.queue_capacity, 25);
        assert_eq!(config.request_timeout, Duration::from_secs(60));
        assert_eq!(config.entity_types, vec![EntityType::Expenses]);
    }

    #[test]
    fn sync_config_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.sync_interval, Duration::from_secs(1800));
        assert_eq!(config.queue_capacity, 10);
        assert_eq!(config.cache_prefix, "report_cache_");
        assert_eq!(config.report_ttl, Duration::from_secs(3600));
        assert_eq!(config.entity_types.len(), 5);
        assert_eq!(config.retry.max_retries, 3);
    }

    #[test]
    fn retry_config_no_retry() {
        let config = RetryConfig::no_retry();
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.delay_for_attempt(4), Duration::ZERO);
    }

    #[test]
    fn retry_delay_doubles() {
        let config = RetryConfig::default();

        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(8));
    }

    #[test]
    fn retry_delay_respects_max() {
        let config = RetryConfig::new(10)
            .with_base_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5));

        assert_eq!(config.delay_for_attempt(5), Duration::from_secs(5));
        assert_eq!(config.delay_for_attempt(200), Duration::from_secs(5));
    }
}
