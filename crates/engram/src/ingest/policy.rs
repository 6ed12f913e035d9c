//! Volume-adaptive ingestion policy
//!
//! Classifies a conversation's recent message arrival into low, medium, or
//! high volume and drives the batching strategy from that tier. Policy
//! values are fixed at orchestrator construction; there is no live
//! reconfiguration.

use std::time::Duration;

use crate::error::{EngramError, Result};

/// Batch size multiplier applied at high volume
pub const HIGH_VOLUME_BATCH_MULTIPLIER: usize = 2;
/// Flush interval multiplier applied at high volume
pub const HIGH_VOLUME_INTERVAL_MULTIPLIER: u32 = 2;

/// Volume tier for a conversation's pending messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeClass {
    /// Few pending messages: flush each append immediately
    Low,
    /// Moderate backlog: accumulate into batches
    Medium,
    /// Heavy backlog: compact into a single transcript before extraction
    High,
}

/// Immutable ingestion policy, validated at construction
#[derive(Debug, Clone)]
pub struct IngestionPolicy {
    /// Pending counts below this are low volume
    pub low_volume_cutoff: usize,
    /// Pending counts at or above this are high volume
    pub high_volume_cutoff: usize,
    /// Batch size that triggers a medium-volume flush
    pub medium_volume_batch_size: usize,
    /// Maximum time between flushes at medium volume
    pub flush_interval: Duration,
    /// Timeout applied to each extraction/persist call
    pub gateway_timeout: Duration,
    /// Bounded retry count for a failed flush
    pub max_flush_retries: u32,
    /// First backoff delay; doubles on each retry
    pub initial_backoff: Duration,
}

impl IngestionPolicy {
    /// Create a policy from the core batching knobs, using default
    /// timeouts and retry bounds for the rest.
    pub fn new(
        low_volume_cutoff: usize,
        high_volume_cutoff: usize,
        medium_volume_batch_size: usize,
        flush_interval: Duration,
    ) -> Result<Self> {
        let policy = Self {
            low_volume_cutoff,
            high_volume_cutoff,
            medium_volume_batch_size,
            flush_interval,
            gateway_timeout: Duration::from_secs(30),
            max_flush_retries: 3,
            initial_backoff: Duration::from_secs(1),
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Reject zero or inconsistent values with a configuration error
    pub fn validate(&self) -> Result<()> {
        if self.low_volume_cutoff == 0 {
            return Err(EngramError::Config(
                "low_volume_cutoff must be positive".into(),
            ));
        }
        if self.high_volume_cutoff == 0 {
            return Err(EngramError::Config(
                "high_volume_cutoff must be positive".into(),
            ));
        }
        if self.low_volume_cutoff > self.high_volume_cutoff {
            return Err(EngramError::Config(format!(
                "low_volume_cutoff ({}) must not exceed high_volume_cutoff ({})",
                self.low_volume_cutoff, self.high_volume_cutoff
            )));
        }
        if self.medium_volume_batch_size == 0 {
            return Err(EngramError::Config(
                "medium_volume_batch_size must be positive".into(),
            ));
        }
        if self.flush_interval.is_zero() {
            return Err(EngramError::Config("flush_interval must be positive".into()));
        }
        if self.gateway_timeout.is_zero() {
            return Err(EngramError::Config("gateway_timeout must be positive".into()));
        }
        if self.max_flush_retries == 0 {
            return Err(EngramError::Config(
                "max_flush_retries must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Classify a pending-message count into a volume tier
    ///
    /// An exact cutoff boundary resolves to the higher tier, favoring
    /// batching over fragmentation.
    pub fn classify(&self, pending_since_flush: usize) -> VolumeClass {
        if pending_since_flush >= self.high_volume_cutoff {
            VolumeClass::High
        } else if pending_since_flush >= self.low_volume_cutoff {
            VolumeClass::Medium
        } else {
            VolumeClass::Low
        }
    }

    /// Batch size that triggers a flush at the given tier
    pub fn batch_threshold(&self, class: VolumeClass) -> usize {
        match class {
            VolumeClass::Low => 1,
            VolumeClass::Medium => self.medium_volume_batch_size,
            VolumeClass::High => self.medium_volume_batch_size * HIGH_VOLUME_BATCH_MULTIPLIER,
        }
    }

    /// Flush interval in effect at the given tier
    pub fn interval_threshold(&self, class: VolumeClass) -> Duration {
        match class {
            VolumeClass::Low | VolumeClass::Medium => self.flush_interval,
            VolumeClass::High => self.flush_interval * HIGH_VOLUME_INTERVAL_MULTIPLIER,
        }
    }
}

impl Default for IngestionPolicy {
    fn default() -> Self {
        Self {
            low_volume_cutoff: 4,
            high_volume_cutoff: 12,
            medium_volume_batch_size: 5,
            flush_interval: Duration::from_secs(15),
            gateway_timeout: Duration::from_secs(30),
            max_flush_retries: 3,
            initial_backoff: Duration::from_secs(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_is_valid() {
        assert!(IngestionPolicy::default().validate().is_ok());
    }

    #[test]
    fn test_zero_cutoffs_rejected() {
        assert!(matches!(
            IngestionPolicy::new(0, 12, 5, Duration::from_secs(15)),
            Err(EngramError::Config(_))
        ));
        assert!(matches!(
            IngestionPolicy::new(4, 0, 5, Duration::from_secs(15)),
            Err(EngramError::Config(_))
        ));
    }

    #[test]
    fn test_inverted_cutoffs_rejected() {
        assert!(matches!(
            IngestionPolicy::new(12, 4, 5, Duration::from_secs(15)),
            Err(EngramError::Config(_))
        ));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        assert!(matches!(
            IngestionPolicy::new(4, 12, 0, Duration::from_secs(15)),
            Err(EngramError::Config(_))
        ));
    }

    #[test]
    fn test_zero_interval_rejected() {
        assert!(matches!(
            IngestionPolicy::new(4, 12, 5, Duration::ZERO),
            Err(EngramError::Config(_))
        ));
    }

    #[test]
    fn test_classification_tiers() {
        let policy = IngestionPolicy::new(4, 12, 5, Duration::from_secs(15)).unwrap();
        assert_eq!(policy.classify(0), VolumeClass::Low);
        assert_eq!(policy.classify(3), VolumeClass::Low);
        assert_eq!(policy.classify(5), VolumeClass::Medium);
        assert_eq!(policy.classify(11), VolumeClass::Medium);
        assert_eq!(policy.classify(13), VolumeClass::High);
    }

    #[test]
    fn test_exact_boundary_resolves_to_higher_tier() {
        let policy = IngestionPolicy::new(4, 12, 5, Duration::from_secs(15)).unwrap();
        assert_eq!(policy.classify(4), VolumeClass::Medium);
        assert_eq!(policy.classify(12), VolumeClass::High);
    }

    #[test]
    fn test_high_volume_thresholds_scale_up() {
        let policy = IngestionPolicy::new(4, 12, 5, Duration::from_secs(15)).unwrap();
        assert_eq!(policy.batch_threshold(VolumeClass::Low), 1);
        assert_eq!(policy.batch_threshold(VolumeClass::Medium), 5);
        assert_eq!(policy.batch_threshold(VolumeClass::High), 10);
        assert_eq!(
            policy.interval_threshold(VolumeClass::High),
            Duration::from_secs(30)
        );
    }
}
