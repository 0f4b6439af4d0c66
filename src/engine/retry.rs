use std::time::Duration;

use futures::future::{join_all, BoxFuture};
use tracing::warn;
use ulid::Ulid;

use crate::limits::MAX_PROMOTION_BATCH;
use crate::model::*;

use super::{BookingMode, Engine, EngineError, Transaction};

/// How the retry executor re-runs a unit of work after a concurrency failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, first one included. Values below 1 are treated as 1.
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubles per attempt.
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Retry immediately, with no sleep between attempts.
    pub fn no_backoff(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before attempt `failed + 1`, capped at `max_delay`.
    pub fn delay_after(&self, failed: u32) -> Duration {
        let shift = failed.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << shift)
            .min(self.max_delay)
    }
}

impl Engine {
    /// Run `work` in a fresh transaction and commit it, starting over while
    /// the failure is a retryable concurrency error and attempts remain.
    /// Business rejections are returned at once.
    pub async fn run_with_retry<'e, T, F>(
        &'e self,
        op: &'static str,
        policy: &RetryPolicy,
        mut work: F,
    ) -> Result<T, EngineError>
    where
        F: for<'t> FnMut(&'t mut Transaction<'e>) -> BoxFuture<'t, Result<T, EngineError>>,
    {
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut tx = self.begin();
            let result = work(&mut tx).await;
            let outcome = match result {
                Ok(value) => tx.commit().await.map(|()| value),
                Err(e) => {
                    tx.rollback();
                    Err(e)
                }
            };

            match outcome {
                Ok(value) => {
                    metrics::counter!(crate::observability::TXN_COMMITTED_TOTAL, "op" => op)
                        .increment(1);
                    return Ok(value);
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    warn!(op, attempt, max_attempts, "retrying after {e}");
                    metrics::counter!(
                        crate::observability::TXN_RETRIES_TOTAL,
                        "op" => op,
                        "reason" => e.label()
                    )
                    .increment(1);
                    let delay = policy.delay_after(attempt);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(e) => {
                    metrics::counter!(
                        crate::observability::TXN_ABORTED_TOTAL,
                        "op" => op,
                        "reason" => e.label()
                    )
                    .increment(1);
                    return Err(e);
                }
            }
        }
    }

    // ── Entry points for the enrollment, schedule, exam and leave services ──

    pub async fn allocate(
        &self,
        requester_id: Ulid,
        year_id: Ulid,
        class_id: Ulid,
    ) -> Result<Assignment, EngineError> {
        self.run_with_retry("allocate", &self.retry, |tx| {
            Box::pin(tx.allocate(requester_id, year_id, class_id))
        })
        .await
    }

    pub async fn withdraw(&self, requester_id: Ulid, year_id: Ulid) -> Result<Assignment, EngineError> {
        self.run_with_retry("withdraw", &self.retry, |tx| {
            Box::pin(tx.withdraw(requester_id, year_id))
        })
        .await
    }

    pub async fn set_capacity(&self, class_id: Ulid, capacity: u32) -> Result<(), EngineError> {
        self.run_with_retry("set_capacity", &self.retry, |tx| {
            Box::pin(tx.set_capacity(class_id, capacity))
        })
        .await
    }

    /// Book a new lesson, exam or leave.
    pub async fn schedule(&self, request: BookingRequest) -> Result<Booking, EngineError> {
        self.run_with_retry("schedule", &self.retry, |tx| {
            Box::pin(tx.validate_and_book(request.clone(), BookingMode::Create))
        })
        .await
    }

    /// Replace booking `request.id` with `request`, re-validating it against
    /// every other active booking.
    pub async fn reschedule(&self, request: BookingRequest) -> Result<Booking, EngineError> {
        self.run_with_retry("reschedule", &self.retry, |tx| {
            Box::pin(tx.validate_and_book(request.clone(), BookingMode::Replace))
        })
        .await
    }

    pub async fn cancel_booking(&self, booking_id: Ulid) -> Result<Booking, EngineError> {
        self.run_with_retry("cancel_booking", &self.retry, |tx| {
            Box::pin(tx.cancel_booking(booking_id))
        })
        .await
    }

    /// Year rollover: one independent, individually retried allocation per
    /// `(requester, class)`. Results come back in input order.
    pub async fn promote(
        &self,
        year_id: Ulid,
        moves: &[(Ulid, Ulid)],
    ) -> Result<Vec<(Ulid, Result<Assignment, EngineError>)>, EngineError> {
        if moves.len() > MAX_PROMOTION_BATCH {
            return Err(EngineError::LimitExceeded("promotion batch too large"));
        }
        let results = join_all(
            moves
                .iter()
                .map(|&(requester_id, class_id)| self.allocate(requester_id, year_id, class_id)),
        )
        .await;
        Ok(moves.iter().map(|(r, _)| *r).zip(results).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(35),
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(10));
        assert_eq!(policy.delay_after(2), Duration::from_millis(20));
        assert_eq!(policy.delay_after(3), Duration::from_millis(35));
        assert_eq!(policy.delay_after(40), Duration::from_millis(35));
    }

    #[test]
    fn no_backoff_never_sleeps() {
        let policy = RetryPolicy::no_backoff(3);
        assert!(policy.delay_after(1).is_zero());
        assert!(policy.delay_after(2).is_zero());
    }
}
