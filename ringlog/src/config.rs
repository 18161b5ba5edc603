//! Configuration for policy queues.
//!
//! A [`QueueConfig`] picks the capacity and the full-queue policy at runtime,
//! typically deserialized from the host application's logging settings.
//!
//! # Choosing a policy
//!
//! - **Block**: never lose an entry; producers stall while the queue is full.
//! - **Overwrite**: never stall; the oldest unread entry is dropped.
//! - **Reject**: never stall, never drop silently; the push reports
//!   [`QueueError::QueueIsFull`](crate::QueueError::QueueIsFull).

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::mpsc::{DEFAULT_CAPACITY, MAX_CAPACITY};
use crate::policy::OverflowPolicy;

/// Capacity and full-queue policy of a [`PolicyQueue`](crate::PolicyQueue).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Number of slots.
    ///
    /// **Default**: 16
    pub capacity: usize,

    /// What a push does when every slot is taken.
    ///
    /// **Default**: [`OverflowPolicy::Block`]
    pub policy: OverflowPolicy,
}

/// Invalid [`QueueConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Capacity was zero.
    #[error("queue capacity must be greater than 0")]
    ZeroCapacity,
    /// Capacity exceeded [`MAX_CAPACITY`].
    #[error("queue capacity {requested} exceeds the maximum of {max}")]
    CapacityTooLarge {
        /// The configured capacity.
        requested: usize,
        /// The largest supported capacity.
        max: usize,
    },
}

impl QueueConfig {
    /// Blocking producers; nothing is ever dropped.
    #[must_use]
    pub const fn lossless() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            policy: OverflowPolicy::Block,
        }
    }

    /// Overwrite the oldest entry; producers never wait.
    #[must_use]
    pub const fn lossy() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            policy: OverflowPolicy::Overwrite,
        }
    }

    /// Report full queues to the producer.
    #[must_use]
    pub const fn fail_fast() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            policy: OverflowPolicy::Reject,
        }
    }

    /// Builder-style setter for capacity.
    #[must_use]
    pub const fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Builder-style setter for policy.
    #[must_use]
    pub const fn with_policy(mut self, policy: OverflowPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Checks that a queue can be built from this configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the capacity is zero or too large.
    pub const fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.capacity > MAX_CAPACITY {
            return Err(ConfigError::CapacityTooLarge {
                requested: self.capacity,
                max: MAX_CAPACITY,
            });
        }
        Ok(())
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::lossless()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_lossless_with_default_capacity() {
        let config = QueueConfig::default();
        assert_eq!(config.capacity, DEFAULT_CAPACITY);
        assert_eq!(config.policy, OverflowPolicy::Block);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn presets_differ_only_in_policy() {
        let presets = [
            QueueConfig::lossless(),
            QueueConfig::lossy(),
            QueueConfig::fail_fast(),
        ];
        let policies: Vec<_> = presets.iter().map(|c| c.policy).collect();
        assert_eq!(
            policies,
            vec![OverflowPolicy::Block, OverflowPolicy::Overwrite, OverflowPolicy::Reject]
        );
        assert!(presets.iter().all(|c| c.validate().is_ok()));
    }

    #[test]
    fn builder_pattern() {
        let config = QueueConfig::lossy().with_capacity(4096).with_policy(OverflowPolicy::Reject);
        assert_eq!(config.capacity, 4096);
        assert_eq!(config.policy, OverflowPolicy::Reject);
    }

    #[test]
    fn rejects_out_of_range_capacity() {
        assert_eq!(
            QueueConfig::default().with_capacity(0).validate(),
            Err(ConfigError::ZeroCapacity)
        );
        assert_eq!(
            QueueConfig::default().with_capacity(MAX_CAPACITY + 1).validate(),
            Err(ConfigError::CapacityTooLarge {
                requested: MAX_CAPACITY + 1,
                max: MAX_CAPACITY,
            })
        );
        assert!(QueueConfig::default().with_capacity(MAX_CAPACITY).validate().is_ok());
    }

    #[test]
    fn decodes_from_postcard() {
        let config = QueueConfig::fail_fast().with_capacity(512);
        let bytes = postcard::to_allocvec(&config).unwrap();
        let decoded: QueueConfig = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, config);
    }
}
