//! Retry with exponential backoff and credential rotation
//!
//! [`RateLimitedCaller`] wraps one external dependency. Every error is
//! classified through [`RetryClassify`]: rate limits rotate to the next
//! credential and retry at once, transient failures back off on the same
//! credential, and everything else is returned immediately.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::credentials::CredentialPool;

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempt rounds. Immediate rotations to an untried
    /// credential stay within the current round.
    pub max_attempts: u32,

    /// Backoff before the second round
    pub initial_backoff: Duration,

    /// Upper bound for any single backoff
    pub max_backoff: Duration,

    /// Backoff multiplier (typically 2.0 for exponential backoff)
    pub backoff_multiplier: f64,

    /// Random spread applied to each backoff, as a fraction (0.0 - 1.0)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with no retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            backoff_multiplier: 1.0,
            jitter: 0.0,
        }
    }

    /// Create a policy with fast retries (for testing)
    pub fn fast() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            jitter: 0.0,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Backoff before round `round + 1`. Round numbering starts at 1.
    pub fn delay(&self, round: u32) -> Duration {
        if round == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(round - 1).unwrap_or(i32::MAX);
        let seconds = self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped = seconds.min(self.max_backoff.as_secs_f64());

        let jitter = self.jitter.clamp(0.0, 1.0);
        let scaled = if jitter > 0.0 {
            capped * (1.0 + jitter * (fastrand::f64() * 2.0 - 1.0))
        } else {
            capped
        };

        Duration::from_secs_f64(scaled.max(0.0))
    }
}

/// What the caller should do after an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Credential-specific failure: move to the next credential
    Rotate,
    /// Transient failure: wait, then retry with the same credential
    Backoff,
    /// Permanent failure: give up
    Abort,
}

/// Errors that know how they should be retried
pub trait RetryClassify {
    fn retry_class(&self) -> RetryClass;
}

/// Calls an operation with credentials from a shared pool
#[derive(Debug)]
pub struct RateLimitedCaller<C> {
    pool: Arc<CredentialPool<C>>,
    policy: RetryPolicy,
}

impl<C> Clone for RateLimitedCaller<C> {
    fn clone(&self) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
            policy: self.policy.clone(),
        }
    }
}

impl<C: Clone> RateLimitedCaller<C> {
    pub fn new(pool: Arc<CredentialPool<C>>, policy: RetryPolicy) -> Self {
        Self { pool, policy }
    }

    pub fn pool(&self) -> &Arc<CredentialPool<C>> {
        &self.pool
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` until it succeeds, aborts, or the attempt rounds run out.
    ///
    /// Returns the last error when every round failed.
    pub async fn call<T, E, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, E>
    where
        E: RetryClassify + std::fmt::Display,
        F: FnMut(C) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_rounds = self.policy.max_attempts.max(1);
        let mut round = 1;
        let mut tried_this_round = 1;
        let (mut index, mut credential) = self.pool.select();

        loop {
            let error = match op(credential).await {
                Ok(value) => {
                    self.pool.record_success(index);
                    if round > 1 || tried_this_round > 1 {
                        debug!(operation, round, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            let class = error.retry_class();
            match class {
                RetryClass::Abort => {
                    debug!(operation, error = %error, "Non-retryable error");
                    return Err(error);
                }
                RetryClass::Rotate => {
                    self.pool.record_failure(index);
                    if tried_this_round < self.pool.len() {
                        self.pool.rotate_from(index);
                        let (next, next_credential) = self.pool.select();
                        // Every other entry is over its error limit
                        if next != index {
                            warn!(
                                operation,
                                error = %error,
                                next,
                                "Rate limited, rotating credential"
                            );
                            index = next;
                            credential = next_credential;
                            tried_this_round += 1;
                            continue;
                        }
                    }
                }
                RetryClass::Backoff => {}
            }

            if round >= max_rounds {
                warn!(operation, attempts = round, error = %error, "Operation failed after all attempts");
                return Err(error);
            }

            let backoff = self.policy.delay(round);
            warn!(
                operation,
                round,
                max_rounds,
                error = %error,
                backoff_ms = backoff.as_millis() as u64,
                "Operation failed, backing off"
            );
            sleep(backoff).await;

            if class == RetryClass::Rotate {
                self.pool.rotate_from(index);
            }
            (index, credential) = self.pool.select();
            round += 1;
            tried_this_round = 1;
        }
    }
}
