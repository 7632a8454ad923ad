//! Bounded exponential backoff with jitter around any fallible async
//! operation.
//!
//! The executor knows nothing about what it wraps: the orchestrator uses the
//! same function for idea enhancement, PRD generation, repository creation
//! and publish, each with its own [`RetryPolicy`].

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

/// Decides whether an error is worth another attempt.
pub type RetryPredicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

pub struct RetryPolicy<E = anyhow::Error> {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound of the uniform random term added to each delay.
    pub jitter: Duration,
    retryable: RetryPredicate<E>,
}

impl<E> RetryPolicy<E> {
    /// Retries every error.
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            jitter: Duration::from_secs(1),
            retryable: Arc::new(|_| true),
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn retry_if(mut self, predicate: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        self.retryable = Arc::new(predicate);
        self
    }

    pub fn is_retryable(&self, err: &E) -> bool {
        (self.retryable)(err)
    }

    /// `min(base * 2^(attempt-1) + U(0, jitter), max)` for a 1-based attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let backoff = self.base_delay.saturating_mul(1u32 << exp);
        let jitter = self.jitter.mul_f64(fastrand::f64());
        backoff.saturating_add(jitter).min(self.max_delay)
    }
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            max_attempts: self.max_attempts,
            base_delay: self.base_delay,
            max_delay: self.max_delay,
            jitter: self.jitter,
            retryable: Arc::clone(&self.retryable),
        }
    }
}

impl<E> fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("jitter", &self.jitter)
            .finish_non_exhaustive()
    }
}

/// Run `op` until it succeeds, a non-retryable error occurs, or
/// `max_attempts` are used up.
///
/// `on_retry(attempt, &err, delay)` fires before each sleep. After the last
/// attempt the original error is returned unchanged.
pub async fn retry_with_backoff<T, E, F, Fut, R>(
    policy: &RetryPolicy<E>,
    mut op: F,
    mut on_retry: R,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: FnMut(u32, &E, Duration),
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !policy.is_retryable(&err) || attempt >= max_attempts {
                    return Err(err);
                }
                let delay = policy.delay_for(attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "Retrying after failure");
                on_retry(attempt, &err, delay);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
