//! Retry with exponential backoff for calls to peer services

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Retry schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    /// Three retries waiting 1s, 2s and 4s
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    /// Wait before retry number `retry` (zero based)
    pub fn backoff(&self, retry: u32) -> Duration {
        self.initial_backoff * self.multiplier.saturating_pow(retry)
    }
}

#[derive(Debug, Error)]
pub enum RetryError<E: std::error::Error + 'static> {
    /// The call failed with an error that retrying cannot fix
    #[error(transparent)]
    Permanent(E),

    #[error("failed after {retries} retries: {last}")]
    Exhausted { retries: u32, last: E },

    #[error("cancelled after {attempts} attempts")]
    Cancelled { attempts: u32, last: Option<E> },
}

impl<E: std::error::Error + 'static> RetryError<E> {
    /// The most recent failure of the wrapped call, if any
    pub fn into_last(self) -> Option<E> {
        match self {
            RetryError::Permanent(e) | RetryError::Exhausted { last: e, .. } => Some(e),
            RetryError::Cancelled { last, .. } => last,
        }
    }
}

/// Run `call` until it succeeds, fails permanently or the policy runs out
///
/// Only failures accepted by `is_retryable` are retried. Each backoff wait
/// races `cancel`; when it resolves first the loop stops with
/// [`RetryError::Cancelled`].
pub async fn with_retry<T, E, F, Fut, C>(
    policy: &RetryPolicy,
    operation: &str,
    is_retryable: impl Fn(&E) -> bool,
    cancel: C,
    mut call: F,
) -> Result<T, RetryError<E>>
where
    E: std::error::Error + 'static,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Future<Output = ()>,
{
    tokio::pin!(cancel);
    let mut retries = 0;

    loop {
        let err = match call().await {
            Ok(value) => {
                if retries > 0 {
                    info!(operation, retries, "call succeeded after retrying");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !is_retryable(&err) {
            return Err(RetryError::Permanent(err));
        }

        if retries >= policy.max_retries {
            warn!(operation, retries, error = %err, "giving up");
            return Err(RetryError::Exhausted { retries, last: err });
        }

        let delay = policy.backoff(retries);
        warn!(operation, attempt = retries + 1, ?delay, error = %err, "transient failure, retrying");

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = &mut cancel => {
                return Err(RetryError::Cancelled {
                    attempts: retries + 1,
                    last: Some(err),
                });
            }
        }

        retries += 1;
    }
}
