//! Retry logic with exponential backoff.
//!
//! [`RetryPolicy`] runs an async operation and, on failure, waits and tries
//! again with a doubling delay capped at `max_delay`. Attempts are strictly
//! sequential. Two named profiles cover the common cases:
//!
//! - [`RetryPolicy::network`]: 4 attempts, 2s → 16s, retries connection-class errors only
//! - [`RetryPolicy::critical`]: 5 attempts, 1s → 10s, retries everything

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{EnsembleError, EnsembleResult};

/// Decides whether a failed attempt should be retried.
pub type RetryPredicate = Arc<dyn Fn(&EnsembleError) -> bool + Send + Sync>;

/// Exponential backoff retry executor.
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    should_retry: RetryPredicate,
}

impl RetryPolicy {
    /// Creates a policy that retries every error.
    ///
    /// `max_attempts` counts the first call; values below 1 are treated as 1.
    #[must_use]
    pub fn new(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            max_delay,
            should_retry: Arc::new(|_| true),
        }
    }

    /// Replaces the retry predicate.
    #[must_use]
    pub fn with_predicate<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&EnsembleError) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Arc::new(predicate);
        self
    }

    /// Profile for network calls: retries transport, timeout and not-connected errors.
    #[must_use]
    pub fn network() -> Self {
        Self::new(4, Duration::from_secs(2), Duration::from_secs(16))
            .with_predicate(EnsembleError::is_network)
    }

    /// Profile for operations that must not give up on the first hiccup.
    #[must_use]
    pub fn critical() -> Self {
        Self::new(5, Duration::from_secs(1), Duration::from_secs(10))
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Worst-case total time spent sleeping between attempts.
    #[must_use]
    pub fn max_total_delay(&self) -> Duration {
        let mut total = Duration::ZERO;
        let mut delay = self.initial_delay;
        for _ in 1..self.max_attempts {
            total += delay;
            delay = (delay * 2).min(self.max_delay);
        }
        total
    }

    /// Executes `operation`, retrying per this policy.
    ///
    /// Returns the first success, or the last error once attempts are
    /// exhausted or the predicate declines to retry.
    ///
    /// # Arguments
    /// * `action` - Action name for logging
    /// * `operation` - Closure producing a fresh future per attempt
    pub async fn execute<T, F, Fut>(&self, action: &str, mut operation: F) -> EnsembleResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = EnsembleResult<T>>,
    {
        let mut delay = self.initial_delay;
        let mut attempt = 1;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if attempt >= self.max_attempts || !(self.should_retry)(&e) {
                        if attempt > 1 {
                            log::warn!(
                                "[Retry] {} failed after {} attempt(s): {}",
                                action,
                                attempt,
                                e
                            );
                        }
                        return Err(e);
                    }

                    log::info!(
                        "[Retry] {} failed (attempt {}/{}): {} - retrying in {:?}",
                        action,
                        attempt,
                        self.max_attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;

                    delay = (delay * 2).min(self.max_delay);
                    attempt += 1;
                }
            }
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .finish_non_exhaustive()
    }
}
