//! Retry policy for failed operations.

use crate::config::RetryConfig;
use crate::error::SyncError;
use std::time::Duration;
use tallysync_protocol::{Operation, OperationStatus};

/// What to do with an operation after a failed dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again once `delay` has elapsed.
    Retry {
        /// Time to wait before the next attempt.
        delay: Duration,
    },
    /// Retries are used up.
    GiveUp,
    /// The request is invalid and must never be retried.
    Reject,
}

/// Decides whether and when failed operations are attempted again.
#[derive(Debug, Clone, Default)]
pub struct RetryScheduler {
    config: RetryConfig,
}

impl RetryScheduler {
    /// Creates a scheduler with the given configuration.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Returns true if the operation has attempts left.
    pub fn should_retry(&self, op: &Operation) -> bool {
        op.retry_count < self.config.max_retries
    }

    /// Returns the wait after the operation's latest failure.
    pub fn backoff_delay(&self, op: &Operation) -> Duration {
        self.config.delay_for_attempt(op.retry_count)
    }

    /// Returns true if the operation may be dispatched at `now`.
    ///
    /// Pending operations are always due. A failed operation is due once its
    /// backoff has elapsed, and never once exhausted.
    pub fn is_due(&self, op: &Operation, now: u64) -> bool {
        if op.status != OperationStatus::Failed {
            return true;
        }
        if !self.should_retry(op) {
            return false;
        }
        match op.last_attempt_at {
            Some(at) => {
                let delay = self.backoff_delay(op).as_millis() as u64;
                at.saturating_add(delay) <= now
            }
            None => true,
        }
    }

    /// Decides the follow-up for an operation whose failure has already been
    /// recorded.
    pub fn decide(&self, op: &Operation, error: &SyncError) -> RetryDecision {
        if error.is_validation() {
            RetryDecision::Reject
        } else if self.should_retry(op) {
            RetryDecision::Retry {
                delay: self.backoff_delay(op),
            }
        } else {
            RetryDecision::GiveUp
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tallysync_protocol::{CalculateTax, OperationKind};

    fn op_with_retries(retry_count: u32) -> Operation {
        let mut op = Operation::new(OperationKind::CalculateTax(CalculateTax::new(1.0)), 0);
        for _ in 0..retry_count {
            op.record_failure(10_000, "network down");
        }
        op
    }

    #[test]
    fn should_retry_until_max() {
        let scheduler = RetryScheduler::default();
        assert!(scheduler.should_retry(&op_with_retries(0)));
        assert!(scheduler.should_retry(&op_with_retries(2)));
        assert!(!scheduler.should_retry(&op_with_retries(3)));
    }

    #[test]
    fn backoff_doubles_from_one_second() {
        let scheduler = RetryScheduler::default();
        assert_eq!(scheduler.backoff_delay(&op_with_retries(0)), Duration::from_secs(1));
        assert_eq!(scheduler.backoff_delay(&op_with_retries(1)), Duration::from_secs(2));
        assert_eq!(scheduler.backoff_delay(&op_with_retries(3)), Duration::from_secs(8));
    }

    #[test]
    fn failed_operation_waits_for_backoff() {
        let scheduler = RetryScheduler::default();
        let op = op_with_retries(1); // last attempt at 10_000, delay 2 s

        assert!(scheduler.is_due(&op_with_retries(0), 0));
        assert!(!scheduler.is_due(&op, 11_999));
        assert!(scheduler.is_due(&op, 12_000));
    }

    #[test]
    fn exhausted_operation_is_never_due() {
        let scheduler = RetryScheduler::default();
        assert!(!scheduler.is_due(&op_with_retries(3), u64::MAX));
    }

    #[test]
    fn decisions() {
        let scheduler = RetryScheduler::default();
        let network = SyncError::transport_retryable("connection reset");

        assert_eq!(
            scheduler.decide(&op_with_retries(1), &network),
            RetryDecision::Retry {
                delay: Duration::from_secs(2)
            }
        );
        assert_eq!(scheduler.decide(&op_with_retries(3), &network), RetryDecision::GiveUp);
        assert_eq!(
            scheduler.decide(&op_with_retries(1), &SyncError::Validation("bad".into())),
            RetryDecision::Reject
        );
    }

    proptest! {
        #[test]
        fn backoff_is_monotonic_and_capped(n in 0u32..64) {
            let scheduler = RetryScheduler::default();
            let cap = scheduler.config().max_delay;
            let this = scheduler.config().delay_for_attempt(n);
            let next = scheduler.config().delay_for_attempt(n + 1);

            prop_assert!(this <= next);
            prop_assert!(next <= cap);
        }
    }
}
