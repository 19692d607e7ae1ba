// crates/resilience/src/retry.rs
//! Retry execution with exponential backoff

use crate::backoff::BackoffCalculator;
use crate::error::{Classify, ResilienceError};
use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Result of a single attempt, split by how the failure must be handled
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T, E> {
    Success(T),
    TransientFailure(E),
    PermanentFailure(E),
}

impl<T, E: Classify> Outcome<T, E> {
    /// Sorts an attempt result into success, transient or permanent failure
    pub fn from_result(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Outcome::Success(value),
            Err(e) if e.is_transient() => Outcome::TransientFailure(e),
            Err(e) => Outcome::PermanentFailure(e),
        }
    }
}

/// Final failure of a retried operation
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RetryError<E> {
    /// A permanent failure, returned unmodified after the attempt that hit it
    #[error("{0}")]
    Permanent(E),

    /// Every attempt failed transiently
    #[error("All {attempts} retry attempts exhausted: {last_error}")]
    Exhausted { attempts: u32, last_error: E },
}

impl<E> RetryError<E> {
    /// Returns the last error observed
    pub fn last_error(&self) -> &E {
        match self {
            RetryError::Permanent(e) => e,
            RetryError::Exhausted { last_error, .. } => last_error,
        }
    }

    /// Unwraps the last error observed
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Permanent(e) => e,
            RetryError::Exhausted { last_error, .. } => last_error,
        }
    }
}

impl From<RetryError<ResilienceError>> for ResilienceError {
    fn from(err: RetryError<ResilienceError>) -> Self {
        match err {
            RetryError::Permanent(e) => e,
            RetryError::Exhausted {
                attempts,
                last_error,
            } => ResilienceError::RetriesExhausted {
                attempts,
                last_error: Box::new(last_error),
            },
        }
    }
}

/// What a retry loop produced, including how many attempts it took
#[derive(Debug)]
pub struct RetryReport<T, E> {
    pub result: Result<T, RetryError<E>>,
    pub attempts: u32,
    pub elapsed: Duration,
}

impl<T, E> RetryReport<T, E> {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Runs operations, retrying transient failures with backoff
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    backoff: BackoffCalculator,
}

impl RetryExecutor {
    /// Creates an executor using the given backoff calculator
    pub fn new(backoff: BackoffCalculator) -> Self {
        Self { backoff }
    }

    /// Creates an executor with default backoff settings and the given base delay
    pub fn with_base_delay(base_delay: Duration) -> Self {
        Self::new(BackoffCalculator::new(base_delay))
    }

    pub fn backoff(&self) -> &BackoffCalculator {
        &self.backoff
    }

    /// Runs `operation` up to `max_attempts` times.
    ///
    /// The operation receives the 1-based attempt number. Transient failures
    /// are retried after the backoff delay for that attempt; permanent
    /// failures end the loop at once. At least one attempt is always made.
    pub async fn execute_with_retry<T, E, F, Fut>(
        &self,
        max_attempts: u32,
        mut operation: F,
    ) -> RetryReport<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + Display,
    {
        let max_attempts = max_attempts.max(1);
        let start = Instant::now();
        let mut attempt = 0;

        let result = loop {
            attempt += 1;

            match Outcome::from_result(operation(attempt).await) {
                Outcome::Success(value) => break Ok(value),
                Outcome::PermanentFailure(e) => {
                    log::debug!("Attempt {} failed permanently: {}", attempt, e);
                    break Err(RetryError::Permanent(e));
                }
                Outcome::TransientFailure(e) => {
                    if attempt >= max_attempts {
                        log::warn!("Giving up after {} attempts: {}", attempt, e);
                        break Err(RetryError::Exhausted {
                            attempts: attempt,
                            last_error: e,
                        });
                    }

                    let delay = self.backoff.scaled_delay(attempt, e.kind().backoff_factor());
                    log::debug!(
                        "Attempt {}/{} failed: {}. Retrying in {:?}",
                        attempt,
                        max_attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        };

        RetryReport {
            result,
            attempts: attempt,
            elapsed: start.elapsed(),
        }
    }
}

/// Executes an operation with retry logic using default backoff settings
pub async fn with_retry<T, E, F, Fut>(
    max_attempts: u32,
    base_delay: Duration,
    operation: F,
) -> RetryReport<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Classify + Display,
{
    RetryExecutor::with_base_delay(base_delay)
        .execute_with_retry(max_attempts, operation)
        .await
}
