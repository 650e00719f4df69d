//! Bounded retry with exponential backoff and jitter.
//!
//! [`RetryPolicy`] decides how often and how long to wait; [`retry_call`]
//! drives one component (a search backend, a direct fetch) through that
//! policy, recording every attempt in [`Diagnostics`]. Only
//! [`FailureClass::Retryable`] errors are retried; anything else ends the
//! loop at once so the caller can move on to the next component.

use std::future::Future;
use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::diagnostics::{Attempt, AttemptOutcome, Diagnostics, Stage};
use crate::error::{FailureClass, Result, SearchError};

/// Randomization applied to each backoff delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Jitter {
    /// Use the computed delay as-is.
    None,
    /// Uniform in `0..=delay`.
    #[default]
    Full,
    /// Half fixed, half random.
    Equal,
}

/// Retry bounds for one component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts against the same component, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt, in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound for any single delay, in milliseconds.
    pub max_delay_ms: u64,
    pub jitter: Jitter,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 300,
            max_delay_ms: 5_000,
            jitter: Jitter::Full,
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    #[must_use]
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay_ms = delay.as_millis() as u64;
        self
    }

    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay_ms = delay.as_millis() as u64;
        self
    }

    #[must_use]
    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Backoff before attempt `attempt + 1`, given that `attempt` (1-based)
    /// just failed.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        let delay = self
            .base_delay_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_delay_ms);

        let jittered = match self.jitter {
            Jitter::None => delay,
            Jitter::Full => {
                if delay == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=delay)
                }
            }
            Jitter::Equal => {
                let half = delay / 2;
                if half == 0 {
                    delay
                } else {
                    half + rand::thread_rng().gen_range(0..=half)
                }
            }
        };
        Duration::from_millis(jittered)
    }
}

/// Runs `call` under `policy`, with `timeout` applied to each attempt.
///
/// Every attempt is recorded under `stage`/`name`. `count` reports how many
/// items a successful value carries. Returns the first success, or the error
/// of the last attempt made.
pub async fn retry_call<T, F, Fut>(
    policy: &RetryPolicy,
    stage: Stage,
    name: &str,
    timeout: Duration,
    diagnostics: &mut Diagnostics,
    count: impl Fn(&T) -> usize,
    mut call: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let started = Instant::now();
        let outcome = tokio::time::timeout(timeout, call(attempt)).await;
        let elapsed = started.elapsed();

        let err = match outcome {
            Ok(Ok(value)) => {
                debug!(component = name, attempt, "attempt succeeded");
                diagnostics.record(
                    Attempt::new(stage, name, AttemptOutcome::Success { count: count(&value) })
                        .with_attempt(attempt)
                        .with_elapsed(elapsed),
                );
                return Ok(value);
            }
            Ok(Err(e)) => {
                diagnostics.record(
                    Attempt::new(
                        stage,
                        name,
                        AttemptOutcome::Error {
                            message: e.to_string(),
                            class: e.class(),
                        },
                    )
                    .with_attempt(attempt)
                    .with_elapsed(elapsed),
                );
                e
            }
            Err(_) => {
                diagnostics.record(
                    Attempt::new(
                        stage,
                        name,
                        AttemptOutcome::Timeout {
                            after_ms: timeout.as_millis() as u64,
                        },
                    )
                    .with_attempt(attempt)
                    .with_elapsed(elapsed),
                );
                SearchError::Timeout
            }
        };

        if err.class() != FailureClass::Retryable {
            debug!(component = name, attempt, error = %err, "not retrying");
            return Err(err);
        }
        if attempt >= max_attempts {
            warn!(component = name, attempts = attempt, error = %err, "retries exhausted");
            return Err(err);
        }

        let delay = policy.delay_for(attempt);
        warn!(
            component = name,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "retryable failure, backing off"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
