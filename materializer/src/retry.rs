use std::future::Future;
use std::time::Duration;

use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::Error;

/// Retries operations failing with transient errors (see
/// [Error::is_transient]), with exponential backoff between attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: usize,
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(100), Duration::from_secs(5))
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// A policy running each operation exactly once.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    fn strategy(&self) -> impl Iterator<Item = Duration> {
        // 2^n * factor, so the first delay is base_delay, doubling from there.
        let factor = (self.base_delay.as_millis() as u64 / 2).max(1);

        ExponentialBackoff::from_millis(2)
            .factor(factor)
            .max_delay(self.max_delay)
            .map(jitter)
            .take(self.max_attempts - 1)
    }

    /// Runs `action` until it succeeds, fails with a permanent error, or
    /// the attempts are exhausted, in which case the last error is returned.
    /// Cancellation interrupts both attempts and the sleeps in between.
    pub async fn run<A, F, T>(&self, cancel: &CancellationToken, action: A) -> Result<T, Error>
    where
        A: FnMut() -> F,
        F: Future<Output = Result<T, Error>>,
    {
        let retry = RetryIf::start(
            self.strategy(),
            action,
            |e: &Error| {
                let transient = e.is_transient();
                if transient {
                    warn!(err=%e, "transient failure, retrying");
                }
                transient
            },
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            res = retry => res,
        }
    }
}
