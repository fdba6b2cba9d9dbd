//! Bounded retry with exponential backoff
//!
//! Only transient failures are retried. The decision reads the failure class
//! the error carries (see [`Classify`]), never the shape of the error itself.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::warn;

use crate::ports::{AdapterError, FailureClass};

/// Errors that know whether retrying them can help
pub trait Classify {
    fn failure_class(&self) -> FailureClass;
}

impl Classify for AdapterError {
    fn failure_class(&self) -> FailureClass {
        self.class()
    }
}

/// Retry policy with capped exponential backoff
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total number of attempts, the first one included (values below 1 act as 1)
    pub max_retries: u32,
    /// Delay before the second attempt; doubles after each further failure
    pub base_delay: Duration,
    /// Upper bound for a single delay
    pub max_delay: Duration,
    /// Overall time budget; no new attempt is scheduled past it
    pub deadline: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            deadline: None,
        }
    }
}

impl RetryPolicy {
    /// Number of attempts this policy allows
    pub fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// Delay applied between attempt `n + 1` and `n + 2` (`n` starts at 0)
    pub fn delay_for(&self, n: u32) -> Duration {
        let factor = 2u32.checked_pow(n).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Successful result with the number of attempts it took
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("retries exhausted after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },
    #[error("permanent failure on attempt {attempts}: {error}")]
    Permanent { attempts: u32, error: E },
}

impl<E> RetryError<E> {
    /// Number of attempts made before giving up
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } | RetryError::Permanent { attempts, .. } => {
                *attempts
            }
        }
    }

    /// The last underlying error
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Permanent { error, .. } => error,
        }
    }
}

/// Execute an operation with retry logic
///
/// The operation receives the 1-based attempt number. It must be safe to
/// repeat: a failed attempt may have had partial effects.
pub async fn run_with_retry<F, Fut, T, E>(
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<Attempted<T>, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Classify + fmt::Display,
{
    let max_attempts = policy.attempts();
    let started = Instant::now();
    let mut attempt = 0;

    loop {
        attempt += 1;

        let error = match operation(attempt).await {
            Ok(value) => {
                return Ok(Attempted {
                    value,
                    attempts: attempt,
                })
            }
            Err(error) => error,
        };

        if error.failure_class() == FailureClass::Permanent {
            return Err(RetryError::Permanent {
                attempts: attempt,
                error,
            });
        }

        if attempt >= max_attempts {
            warn!(attempts = attempt, error = %error, "Max retries reached");
            return Err(RetryError::Exhausted {
                attempts: attempt,
                last: error,
            });
        }

        let delay = policy.delay_for(attempt - 1);

        if let Some(deadline) = policy.deadline {
            if started.elapsed() + delay > deadline {
                warn!(
                    attempts = attempt,
                    deadline_ms = deadline.as_millis() as u64,
                    error = %error,
                    "Retry deadline reached"
                );
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: error,
                });
            }
        }

        warn!(
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Transient failure, retrying"
        );

        tokio::time::sleep(delay).await;
    }
}
