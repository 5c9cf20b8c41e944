//! 재시도 컨트롤러 (Retry/Backoff Controller)
//!
//! Bounded retries with exponential backoff and jitter around one fetch.
//! Shared by listing and detail fetches.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::errors::{FetchError, FetchErrorKind};
use crate::infrastructure::config::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after the delay
    Retry(Duration),
    /// Hand the item back to the scheduler after the session is re-acquired
    Requeue,
    /// Record the failure
    GiveUp,
}

/// Result of one controlled operation
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, FetchError>,
    /// Attempts made, including the first
    pub attempts: u32,
    /// Attempts made after a failure
    pub retries: u32,
}

#[derive(Debug, Clone)]
pub struct RetryController {
    policy: RetryPolicy,
}

impl RetryController {
    #[must_use]
    pub const fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// 지연 시간 계산 (Exponential Backoff): `base * multiplier^(attempt-1)`,
    /// capped at `max_delay_ms`, plus up to `jitter_ms` of jitter.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss, clippy::cast_possible_wrap)]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let exponential = self.policy.base_delay_ms as f64 * self.policy.backoff_multiplier.powi(exponent);
        let capped = exponential.min(self.policy.max_delay_ms as f64).max(0.0) as u64;
        let jitter = if self.policy.jitter_ms == 0 {
            0
        } else {
            fastrand::u64(0..=self.policy.jitter_ms)
        };
        Duration::from_millis(capped + jitter)
    }

    /// Decides what happens after `attempt` failed with `error`
    #[must_use]
    pub fn classify(&self, error: &FetchError, attempt: u32) -> RetryDecision {
        if error.kind() == FetchErrorKind::GateReappeared {
            return RetryDecision::Requeue;
        }
        if error.is_retryable() && attempt < self.policy.max_attempts {
            RetryDecision::Retry(self.delay_for(attempt))
        } else {
            RetryDecision::GiveUp
        }
    }

    /// Runs `operation` until it succeeds, asks for a requeue, runs out of
    /// attempts, or the run is cancelled during a backoff.
    pub async fn run<T, F, Fut>(&self, label: &str, cancel: &CancellationToken, mut operation: F) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut attempt = 1;
        loop {
            let result = operation(attempt).await;
            let error = match result {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("✅ {} succeeded on attempt {}", label, attempt);
                    }
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt,
                        retries: attempt - 1,
                    };
                }
                Err(error) => error,
            };

            match self.classify(&error, attempt) {
                RetryDecision::Retry(delay) => {
                    warn!(
                        "🔄 {} failed (attempt {}/{}): {} - retrying in {:?}",
                        label, attempt, self.policy.max_attempts, error, delay
                    );
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        () = cancel.cancelled() => {
                            debug!("🛑 {} retry abandoned: run cancelled", label);
                            return RetryOutcome { result: Err(error), attempts: attempt, retries: attempt - 1 };
                        }
                    }
                    attempt += 1;
                }
                RetryDecision::Requeue | RetryDecision::GiveUp => {
                    return RetryOutcome {
                        result: Err(error),
                        attempts: attempt,
                        retries: attempt - 1,
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::substrate::SubstrateError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn controller(max_attempts: u32) -> RetryController {
        RetryController::new(RetryPolicy {
            max_attempts,
            base_delay_ms: 1,
            backoff_multiplier: 2.0,
            max_delay_ms: 4,
            jitter_ms: 0,
        })
    }

    fn timeout() -> FetchError {
        FetchError::Timeout {
            target: "flower page 1".to_string(),
            waited: Duration::from_millis(10),
        }
    }

    #[test]
    fn delay_grows_exponentially_and_caps() {
        let controller = controller(5);
        assert_eq!(controller.delay_for(1), Duration::from_millis(1));
        assert_eq!(controller.delay_for(2), Duration::from_millis(2));
        assert_eq!(controller.delay_for(3), Duration::from_millis(4));
        assert_eq!(controller.delay_for(10), Duration::from_millis(4));
    }

    #[test]
    fn jitter_stays_in_range() {
        let controller = RetryController::new(RetryPolicy {
            jitter_ms: 50,
            ..RetryPolicy::default()
        });
        for _ in 0..20 {
            let delay = controller.delay_for(1);
            assert!(delay >= Duration::from_millis(1_000) && delay <= Duration::from_millis(1_050));
        }
    }

    #[test]
    fn gate_reappearance_is_requeued_not_retried() {
        let error = FetchError::GateReappeared {
            target: "flower page 2".to_string(),
        };
        assert_eq!(controller(3).classify(&error, 1), RetryDecision::Requeue);
    }

    #[test]
    fn permanent_errors_give_up_immediately() {
        let error = FetchError::Substrate(SubstrateError::Http {
            status: 404,
            url: "https://menu.test".to_string(),
        });
        assert_eq!(controller(3).classify(&error, 1), RetryDecision::GiveUp);
    }

    #[tokio::test]
    async fn succeeds_after_two_timeouts() {
        let calls = &AtomicU32::new(0);
        let outcome = controller(3)
            .run("flower page 1", &CancellationToken::new(), move |_| async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 { Err(timeout()) } else { Ok(7) }
            })
            .await;
        assert_eq!(outcome.result.unwrap(), 7);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.retries, 2);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let outcome: RetryOutcome<()> = controller(3)
            .run("flower page 1", &CancellationToken::new(), |_| async { Err(timeout()) })
            .await;
        assert!(matches!(outcome.result, Err(FetchError::Timeout { .. })));
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.retries, 2);
    }

    #[tokio::test]
    async fn cancellation_stops_backoff() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let slow = RetryController::new(RetryPolicy {
            base_delay_ms: 60_000,
            max_delay_ms: 60_000,
            jitter_ms: 0,
            ..RetryPolicy::default()
        });
        let outcome: RetryOutcome<()> = slow.run("flower page 1", &cancel, |_| async { Err(timeout()) }).await;
        assert_eq!(outcome.attempts, 1);
        assert!(outcome.result.is_err());
    }
}
