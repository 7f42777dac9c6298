//! Configuration types for the partition supplier.

use crate::error::{Error, Result};
use crate::types::{CacheId, IoPolicy};
use std::time::Duration;

/// Default maximum size of one supply message in bytes.
pub const DEFAULT_BATCH_SIZE_BYTES: usize = 512 * 1024;

/// Default number of flushed batches per demand before suspending.
pub const DEFAULT_MAX_FLUSHES_PER_CALL: u32 = 3;

/// Configuration for supplying partitions to demanding nodes.
#[derive(Debug, Clone)]
pub struct SupplyConfig {
    /// Cache whose partitions are supplied.
    pub cache_id: CacheId,

    /// Maximum size of a supply message before it is flushed.
    pub batch_size_bytes: usize,

    /// Pause between two flushed batches. Zero disables throttling.
    pub throttle: Duration,

    /// Flushes allowed within one demand before the session is suspended.
    pub max_flushes_per_call: u32,

    /// Whether entries are also kept in an overflow (off-heap/swap) tier.
    pub overflow_enabled: bool,

    /// Whether class deployment metadata travels with overflow entries.
    pub deployment_enabled: bool,

    /// Transport priority of supply messages.
    pub io_policy: IoPolicy,

    /// Number of worker lanes processing demands.
    pub worker_lanes: usize,

    /// Queued demands per lane before `submit` reports backpressure.
    pub lane_capacity: usize,

    /// How often suspended sessions are checked for idleness.
    /// None disables the sweep.
    pub idle_sweep_interval: Option<Duration>,

    /// Suspended sessions untouched for this long are dropped.
    pub idle_context_timeout: Duration,

    /// How long a completed session is remembered. Repeated demands for it
    /// are ignored only within this window; a demand arriving later starts
    /// the session again.
    pub completed_retention: Duration,
}

impl Default for SupplyConfig {
    fn default() -> Self {
        Self {
            cache_id: 0,
            batch_size_bytes: DEFAULT_BATCH_SIZE_BYTES,
            throttle: Duration::ZERO,
            max_flushes_per_call: DEFAULT_MAX_FLUSHES_PER_CALL,
            overflow_enabled: false,
            deployment_enabled: false,
            io_policy: IoPolicy::Data,
            worker_lanes: 4,
            lane_capacity: 1024,
            idle_sweep_interval: Some(Duration::from_secs(30)),
            idle_context_timeout: Duration::from_secs(300), // 5 minutes
            completed_retention: Duration::from_secs(3600), // 1 hour
        }
    }
}

impl SupplyConfig {
    /// Create a new configuration for the given cache.
    pub fn new(cache_id: CacheId) -> Self {
        Self {
            cache_id,
            ..Default::default()
        }
    }

    /// Set the batch size in bytes.
    pub fn with_batch_size_bytes(mut self, bytes: usize) -> Self {
        self.batch_size_bytes = bytes;
        self
    }

    /// Set the throttle delay between batches.
    pub fn with_throttle(mut self, throttle: Duration) -> Self {
        self.throttle = throttle;
        self
    }

    /// Set the number of flushes allowed per demand.
    pub fn with_max_flushes_per_call(mut self, max: u32) -> Self {
        self.max_flushes_per_call = max;
        self
    }

    /// Enable or disable the overflow tier.
    pub fn with_overflow_enabled(mut self, enabled: bool) -> Self {
        self.overflow_enabled = enabled;
        self
    }

    /// Enable or disable class deployment metadata.
    pub fn with_deployment_enabled(mut self, enabled: bool) -> Self {
        self.deployment_enabled = enabled;
        self
    }

    /// Set the transport priority.
    pub fn with_io_policy(mut self, policy: IoPolicy) -> Self {
        self.io_policy = policy;
        self
    }

    /// Set the number of worker lanes.
    pub fn with_worker_lanes(mut self, lanes: usize) -> Self {
        self.worker_lanes = lanes;
        self
    }

    /// Set the per-lane queue capacity.
    pub fn with_lane_capacity(mut self, capacity: usize) -> Self {
        self.lane_capacity = capacity;
        self
    }

    /// Set the idle sweep interval and timeout.
    pub fn with_idle_sweep(mut self, interval: Duration, timeout: Duration) -> Self {
        self.idle_sweep_interval = Some(interval);
        self.idle_context_timeout = timeout;
        self
    }

    /// Set how long completed sessions are remembered.
    pub fn with_completed_retention(mut self, retention: Duration) -> Self {
        self.completed_retention = retention;
        self
    }

    /// Disable the idle sweep.
    pub fn without_idle_sweep(mut self) -> Self {
        self.idle_sweep_interval = None;
        self
    }

    /// Check the configuration for values the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size_bytes == 0 {
            return Err(Error::Config("batch_size_bytes must be positive".into()));
        }
        if self.max_flushes_per_call == 0 {
            return Err(Error::Config("max_flushes_per_call must be positive".into()));
        }
        if self.worker_lanes == 0 {
            return Err(Error::Config("worker_lanes must be positive".into()));
        }
        if self.lane_capacity == 0 {
            return Err(Error::Config("lane_capacity must be positive".into()));
        }
        if matches!(self.idle_sweep_interval, Some(interval) if interval.is_zero()) {
            return Err(Error::Config("idle_sweep_interval must be positive".into()));
        }
        if self.completed_retention < self.idle_context_timeout {
            return Err(Error::Config(
                "completed_retention must not be shorter than idle_context_timeout".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SupplyConfig::default();
        assert_eq!(config.batch_size_bytes, 512 * 1024);
        assert_eq!(config.max_flushes_per_call, 3);
        assert!(config.throttle.is_zero());
        assert!(!config.overflow_enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = SupplyConfig::new(7)
            .with_batch_size_bytes(1_000)
            .with_max_flushes_per_call(5)
            .with_throttle(Duration::from_millis(20))
            .with_overflow_enabled(true)
            .with_idle_sweep(Duration::from_secs(1), Duration::from_secs(10));

        assert_eq!(config.cache_id, 7);
        assert_eq!(config.batch_size_bytes, 1_000);
        assert_eq!(config.max_flushes_per_call, 5);
        assert_eq!(config.throttle, Duration::from_millis(20));
        assert!(config.overflow_enabled);
        assert_eq!(config.idle_sweep_interval, Some(Duration::from_secs(1)));
        assert_eq!(config.idle_context_timeout, Duration::from_secs(10));
        assert_eq!(config.completed_retention, Duration::from_secs(3600));
    }

    #[test]
    fn test_validate_rejects_zero_bounds() {
        assert!(SupplyConfig::default().with_batch_size_bytes(0).validate().is_err());
        assert!(SupplyConfig::default().with_max_flushes_per_call(0).validate().is_err());
        assert!(SupplyConfig::default().with_worker_lanes(0).validate().is_err());
        assert!(SupplyConfig::default()
            .with_idle_sweep(Duration::ZERO, Duration::from_secs(1))
            .validate()
            .is_err());
        assert!(SupplyConfig::default().without_idle_sweep().validate().is_ok());
        assert!(SupplyConfig::default()
            .with_completed_retention(Duration::from_secs(60))
            .validate()
            .is_err());
    }
}
