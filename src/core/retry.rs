use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const DEFAULT_MAX_RETRIES: u32 = 2;
const BACKOFF_STEP: Duration = Duration::from_millis(1000);

pub type BackoffFn = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

/// `1000ms * attempt`: the wait after attempt 1 is one second, after attempt
/// 2 two seconds, and so on.
pub fn linear_backoff(attempt: u32) -> Duration {
    BACKOFF_STEP * attempt
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// The cancellation token fired before or during an attempt or a wait.
    Cancelled,
    Failed { error: E, attempts: u32 },
}

/// Runs an attempt up to `max_retries + 1` times, retrying only errors the
/// caller marks as retryable.
#[derive(Clone)]
pub struct RetryCoordinator {
    max_retries: u32,
    backoff: BackoffFn,
}

impl fmt::Debug for RetryCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryCoordinator")
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

impl Default for RetryCoordinator {
    fn default() -> Self {
        Self::linear(DEFAULT_MAX_RETRIES)
    }
}

impl RetryCoordinator {
    pub fn new(max_retries: u32, backoff: impl Fn(u32) -> Duration + Send + Sync + 'static) -> Self {
        Self {
            max_retries,
            backoff: Arc::new(backoff),
        }
    }

    pub fn linear(max_retries: u32) -> Self {
        Self::new(max_retries, linear_backoff)
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub async fn execute<T, E, F, Fut, R>(
        &self,
        cancel_token: &CancellationToken,
        mut attempt_fn: F,
        is_retryable: R,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: Fn(&E) -> bool,
        E: fmt::Display,
    {
        let max_attempts = self.max_retries + 1;
        let mut attempt = 0;

        loop {
            attempt += 1;
            if cancel_token.is_cancelled() {
                return Err(RetryError::Cancelled);
            }

            let result = tokio::select! {
                biased;
                _ = cancel_token.cancelled() => return Err(RetryError::Cancelled),
                result = attempt_fn(attempt) => result,
            };

            let error = match result {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "Request succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            if !is_retryable(&error) {
                debug!(attempt, "Request failed with non-retryable error: {error}");
                return Err(RetryError::Failed {
                    error,
                    attempts: attempt,
                });
            }
            if attempt >= max_attempts {
                warn!(attempt, max_attempts, "Retry budget exhausted: {error}");
                return Err(RetryError::Failed {
                    error,
                    attempts: attempt,
                });
            }

            let delay = (self.backoff)(attempt);
            warn!(
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                "Request failed, retrying: {error}"
            );

            tokio::select! {
                biased;
                _ = cancel_token.cancelled() => return Err(RetryError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
