use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::error::Result;

/// Backoff policy for operations whose errors report `is_retryable()`.
#[derive(Debug, Clone)]
pub struct RetryOptions {
    /// Retries after the first attempt. `0` disables retrying.
    pub max_retries: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryOptions {
    pub const fn new(max_retries: usize) -> Self {
        Self {
            max_retries,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
        }
    }

    pub const fn no_retry() -> Self {
        Self::new(0)
    }

    fn backoff(&self, retry: usize) -> Duration {
        let factor = 1u32 << retry.min(16);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self::new(2)
    }
}

/// Runs `f` until it succeeds, returns a non-retryable error, or the retries
/// in `options` are used up.
pub async fn run<T, F, Fut>(f: F, options: &RetryOptions) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut retry = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && retry < options.max_retries => {
                let backoff = options.backoff(retry);
                debug!(
                    "Retryable error (retry {}/{}), backing off {:?}: {err}",
                    retry + 1,
                    options.max_retries,
                    backoff
                );
                tokio::time::sleep(backoff).await;
                retry += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
