// Bounded retry with exponential backoff for the network calls of a run.
//
// Terminal outcomes (program not found, malformed references, parse failures)
// never reach this module as retryable errors.

use std::future::Future;
use std::time::Duration;

use rand::RngExt;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{Result, TimefreeError};

/// Backoff schedule for one network call: `base_delay`, doubled per attempt,
/// never above `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Randomize each wait within its upper half. Sessions of one batch start
    /// together and would otherwise retry in lockstep against the same host.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        // worst case stays well inside one checkpoint slice
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(4),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let ceiling = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay);
        if !self.jitter {
            return ceiling;
        }

        let half = ceiling / 2;
        let spread = u64::try_from((ceiling - half).as_millis()).unwrap_or(u64::MAX);
        half + Duration::from_millis(rand::rng().random_range(0..=spread))
    }
}

pub enum RetryAction<T> {
    Success(T),
    Retry(TimefreeError),
    /// Not worth another attempt; returned as is.
    Fail(TimefreeError),
}

/// Execute an async operation with retry-and-backoff.
///
/// The `operation` closure receives the current attempt number (0-indexed).
pub async fn retry_with_backoff<F, Fut, T>(
    policy: &RetryPolicy,
    token: &CancellationToken,
    label: &str,
    operation: F,
) -> Result<T>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = RetryAction<T>>,
{
    let mut attempt = 0;
    loop {
        if token.is_cancelled() {
            return Err(TimefreeError::Cancelled);
        }

        let err = match operation(attempt).await {
            RetryAction::Success(value) => return Ok(value),
            RetryAction::Fail(err) => return Err(err),
            RetryAction::Retry(err) => err,
        };
        if attempt >= policy.max_retries {
            return Err(err);
        }

        let delay = policy.delay_for_attempt(attempt);
        warn!(
            operation = label,
            attempt = attempt + 1,
            max = policy.max_retries,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Retrying after transient error"
        );
        tokio::select! {
            _ = token.cancelled() => return Err(TimefreeError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
        attempt += 1;
    }
}

/// [`retry_with_backoff`] for operations returning a plain `Result`, classified
/// with [`TimefreeError::is_retryable`].
pub async fn retry_transient<F, Fut, T>(
    policy: &RetryPolicy,
    token: &CancellationToken,
    label: &str,
    operation: F,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_with_backoff(policy, token, label, |_| {
        let fut = operation();
        async move {
            match fut.await {
                Ok(value) => RetryAction::Success(value),
                Err(err) if err.is_retryable() => RetryAction::Retry(err),
                Err(err) => RetryAction::Fail(err),
            }
        }
    })
    .await
}
