//! Bounded retry with backoff and a per-attempt timeout.
//!
//! [`RetryExecutor`] wraps any async fallible operation. Each attempt is capped
//! by [`RetryPolicy::attempt_timeout`]; a timed-out attempt counts as a failed
//! one. Between attempts the executor sleeps for [`Backoff::delay`].

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Backoff strategy between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// Uses a fixed delay between attempts.
    Fixed {
        #[serde(with = "duration_ms")]
        delay: Duration,
    },
    /// Waits `step * attempt`, so the pause grows by `step` after each failure.
    Linear {
        #[serde(with = "duration_ms")]
        step: Duration,
    },
    /// Waits `base * factor^(attempt - 1)`, capped at `max`.
    Exponential {
        #[serde(with = "duration_ms")]
        base: Duration,
        factor: f64,
        #[serde(with = "duration_ms")]
        max: Duration,
        /// Whether to apply random jitter (+/- 50%) to the delay.
        jitter: bool,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Linear {
            step: Duration::from_secs(2),
        }
    }
}

impl Backoff {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay(self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match self {
            Self::Fixed { delay } => delay,
            Self::Linear { step } => step.saturating_mul(attempt),
            Self::Exponential {
                base,
                factor,
                max,
                jitter,
            } => {
                let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
                let seconds = base.as_secs_f64() * factor.powi(exponent);
                let capped_seconds = seconds.min(max.as_secs_f64());
                let mut delay = Duration::from_secs_f64(capped_seconds.max(0.0));

                if jitter {
                    let jitter_ms = (delay.as_millis() as f64 * 0.5) as u64;
                    let random_offset = fastrand::u64(0..=(jitter_ms * 2));
                    let total_ms =
                        delay.as_millis() as i64 + (random_offset as i64 - jitter_ms as i64);
                    delay = Duration::from_millis(total_ms.max(0) as u64);
                }

                delay
            }
        }
    }
}

/// How often and how patiently an operation is retried.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub backoff: Backoff,
    /// Upper bound on a single attempt. `None` leaves attempts unbounded.
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::default(),
            attempt_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl RetryPolicy {
    /// Policy with a fixed delay and no per-attempt timeout.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Fixed { delay },
            attempt_timeout: None,
        }
    }

    /// A single attempt, no retries.
    pub fn no_retry() -> Self {
        Self::fixed(1, Duration::ZERO)
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }
}

/// Terminal failure of a retried operation.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Every attempt failed; `last` is the final attempt's error.
    #[error("{label} failed after {attempts} attempt(s): {last}")]
    Exhausted {
        label: String,
        attempts: u32,
        last: E,
    },
    /// The final attempt hit the per-attempt timeout.
    #[error("{label} timed out after {attempts} attempt(s) ({timeout_ms}ms per attempt)")]
    TimedOut {
        label: String,
        attempts: u32,
        timeout_ms: u64,
    },
    /// The operation failed with an error the caller marked as not retryable.
    #[error("{label} failed on attempt {attempts} with a non-retryable error: {last}")]
    Rejected {
        label: String,
        attempts: u32,
        last: E,
    },
}

impl<E> RetryError<E> {
    /// Number of attempts made before giving up.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. }
            | Self::TimedOut { attempts, .. }
            | Self::Rejected { attempts, .. } => *attempts,
        }
    }

    /// The last operation error, if the last attempt did not time out.
    pub fn last_error(&self) -> Option<&E> {
        match self {
            Self::Exhausted { last, .. } | Self::Rejected { last, .. } => Some(last),
            Self::TimedOut { .. } => None,
        }
    }
}

enum AttemptFailure<E> {
    Failed(E),
    TimedOut(Duration),
}

/// Runs fallible async operations under a [`RetryPolicy`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Retry `op` on every error.
    pub async fn run<T, E, F, Fut>(&self, label: &str, op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.run_if(label, op, |_| true).await
    }

    /// Retry `op` while `retryable` accepts the error; stop immediately otherwise.
    pub async fn run_if<T, E, F, Fut, P>(
        &self,
        label: &str,
        mut op: F,
        retryable: P,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
        P: Fn(&E) -> bool,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let failure = match self.attempt(&mut op).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation = label, attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(failure) => failure,
            };

            let failure = match failure {
                AttemptFailure::Failed(error) if !retryable(&error) => {
                    warn!(operation = label, attempt, error = %error, "non-retryable failure");
                    return Err(RetryError::Rejected {
                        label: label.to_owned(),
                        attempts: attempt,
                        last: error,
                    });
                }
                other => other,
            };

            match &failure {
                AttemptFailure::Failed(error) => {
                    warn!(operation = label, attempt, max_attempts, error = %error, "attempt failed");
                }
                AttemptFailure::TimedOut(limit) => {
                    warn!(
                        operation = label,
                        attempt,
                        max_attempts,
                        timeout_ms = limit.as_millis() as u64,
                        "attempt timed out"
                    );
                }
            }

            if attempt >= max_attempts {
                return Err(match failure {
                    AttemptFailure::Failed(last) => RetryError::Exhausted {
                        label: label.to_owned(),
                        attempts: attempt,
                        last,
                    },
                    AttemptFailure::TimedOut(limit) => RetryError::TimedOut {
                        label: label.to_owned(),
                        attempts: attempt,
                        timeout_ms: limit.as_millis() as u64,
                    },
                });
            }

            let delay = self.policy.backoff.delay(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }

    async fn attempt<T, E, F, Fut>(&self, op: &mut F) -> Result<T, AttemptFailure<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        match self.policy.attempt_timeout {
            Some(limit) => match tokio::time::timeout(limit, op()).await {
                Ok(result) => result.map_err(AttemptFailure::Failed),
                Err(_) => Err(AttemptFailure::TimedOut(limit)),
            },
            None => op().await.map_err(AttemptFailure::Failed),
        }
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
