use crate::{Ack, Delivery, Sink};
use common::domain::DeliveryError;
use std::time::Duration;
use tracing::{info, warn};

/// How many times a target retries a failed delivery, and how long it waits
/// between attempts. Only retryable `DeliveryError`s are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// One attempt, no retry.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Doubling backoff starting at `initial_backoff`, capped at 30s.
    pub fn exponential(max_attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            max_backoff: Duration::from_secs(30),
        }
    }

    /// Wait before attempt `attempt + 1`, where `attempt` starts at 1.
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// Result of delivering under a policy: the final outcome plus attempts used.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyOutcome {
    pub result: Result<Ack, DeliveryError>,
    pub attempts: u32,
}

/// Delivers with a per-attempt timeout. An attempt that exceeds `timeout`
/// becomes `DeliveryError::Timeout`.
pub async fn deliver_with_policy(
    sink: &dyn Sink,
    delivery: &Delivery,
    timeout: Duration,
    policy: &RetryPolicy,
) -> PolicyOutcome {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let result = match tokio::time::timeout(timeout, sink.deliver(delivery)).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Timeout(timeout)),
        };

        match result {
            Ok(ack) => {
                if attempt > 1 {
                    info!(attempt, "delivery succeeded after retry");
                }
                return PolicyOutcome {
                    result: Ok(ack),
                    attempts: attempt,
                };
            }
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let backoff = policy.backoff_after(attempt);
                warn!(
                    attempt,
                    max_attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "delivery failed, will retry"
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => {
                return PolicyOutcome {
                    result: Err(e),
                    attempts: attempt,
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MockSink, OutputPayload};
    use async_trait::async_trait;

    fn delivery() -> Delivery {
        Delivery::new(OutputPayload::default())
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::exponential(5, Duration::from_millis(100));
        assert_eq!(policy.backoff_after(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_after(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_after(3), Duration::from_millis(400));
        assert_eq!(policy.backoff_after(40), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_single_attempt_policy_does_not_retry() {
        let mut sink = MockSink::new();
        sink.expect_deliver()
            .times(1)
            .returning(|_| Err(DeliveryError::unavailable("broker down")));

        let outcome =
            deliver_with_policy(&sink, &delivery(), Duration::from_secs(1), &RetryPolicy::none())
                .await;

        assert_eq!(outcome.attempts, 1);
        assert!(matches!(outcome.result, Err(DeliveryError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_retryable_error_is_retried_until_success() {
        let mut sink = MockSink::new();
        let mut seq = mockall::Sequence::new();
        sink.expect_deliver()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_| Err(DeliveryError::unavailable("broker down")));
        sink.expect_deliver()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(Ack::Delivered));

        let policy = RetryPolicy::exponential(3, Duration::from_millis(1));
        let outcome = deliver_with_policy(&sink, &delivery(), Duration::from_secs(1), &policy).await;

        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.result, Ok(Ack::Delivered));
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let mut sink = MockSink::new();
        sink.expect_deliver()
            .times(1)
            .returning(|_| Err(DeliveryError::Rejected("invalid key".into())));

        let policy = RetryPolicy::exponential(3, Duration::from_millis(1));
        let outcome = deliver_with_policy(&sink, &delivery(), Duration::from_secs(1), &policy).await;

        assert_eq!(outcome.attempts, 1);
    }

    struct SlowSink;

    #[async_trait]
    impl Sink for SlowSink {
        async fn deliver(&self, _delivery: &Delivery) -> Result<Ack, DeliveryError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Ack::Delivered)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_sink_times_out() {
        let outcome = deliver_with_policy(
            &SlowSink,
            &delivery(),
            Duration::from_millis(50),
            &RetryPolicy::none(),
        )
        .await;

        assert_eq!(
            outcome.result,
            Err(DeliveryError::Timeout(Duration::from_millis(50)))
        );
    }
}
