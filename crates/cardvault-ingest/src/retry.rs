//! Bounded exponential-backoff retry for remote calls
//!
//! One policy is shared by every remote operation in a run (asset download,
//! asset upload, sink writes). The controller keeps no state between calls, so
//! it can be cloned freely and used concurrently.
//!
//! ```rust,ignore
//! let retry = RetryController::new(RetryPolicy::default());
//! match retry.call("asset download", || source.fetch(url)).await? {
//!     Some(bytes) => { /* found */ }
//!     None => { /* 404: treat as absent */ }
//! }
//! ```

use crate::error::RemoteError;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Default retry budget per call
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default delay before the first retry
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(2);

/// Default ceiling for any single delay
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Backoff parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 = try once)
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
        }
    }

    /// Delay before retry number `attempt` (0-indexed):
    /// `min(initial_delay * 2^attempt, max_delay)`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Applies a [`RetryPolicy`] to individual remote calls
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryController {
    policy: RetryPolicy,
}

impl RetryController {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` until it succeeds, reports not-found, or the budget runs out
    ///
    /// - `Ok(Some(value))` on success
    /// - `Ok(None)` when the remote reports the resource does not exist
    /// - `Err(last_error)` after `max_retries` retries
    pub async fn call<T, F, Fut>(
        &self,
        operation: &str,
        mut op: F,
    ) -> Result<Option<T>, RemoteError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let mut attempt = 0u32;

        loop {
            match op().await {
                Ok(value) => return Ok(Some(value)),
                Err(RemoteError::NotFound) => {
                    debug!(operation, "Remote resource not found");
                    return Ok(None);
                },
                Err(err) if attempt < self.policy.max_retries => {
                    let delay = self.policy.delay_for(attempt);
                    if err == RemoteError::RateLimited {
                        warn!(
                            operation,
                            attempt = attempt + 1,
                            max_retries = self.policy.max_retries,
                            delay_ms = delay.as_millis() as u64,
                            "Rate limited, backing off"
                        );
                    } else {
                        warn!(
                            operation,
                            attempt = attempt + 1,
                            max_retries = self.policy.max_retries,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "Remote call failed, retrying"
                        );
                    }
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                },
                Err(err) => {
                    warn!(
                        operation,
                        retries = attempt,
                        error = %err,
                        "Remote call failed after exhausting retries"
                    );
                    return Err(err);
                },
            }
        }
    }
}
