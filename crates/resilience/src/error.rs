// crates/resilience/src/error.rs
//! Error types and failure classification for resilience operations

use std::time::Duration;
use thiserror::Error;

/// Result type for resilience operations
pub type ResilienceResult<T> = Result<T, ResilienceError>;

/// Errors that can occur in resilience operations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResilienceError {
    /// Operation timed out
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Network is known to be offline
    #[error("Network is offline")]
    Offline,

    /// Connection dropped while the operation was running
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Declared cost does not fit the bandwidth budget
    #[error("Bandwidth exceeded (requested {requested} bytes, budget {limit} bytes/s)")]
    BandwidthExceeded { requested: u64, limit: u64 },

    /// Failure that may succeed on retry
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Failure that retrying cannot fix (validation, malformed request)
    #[error("Permanent failure: {0}")]
    Permanent(String),

    /// Circuit breaker is open
    #[error("Circuit breaker is open (failures: {failures}, retry after {retry_after:?})")]
    CircuitOpen { failures: u32, retry_after: Duration },

    /// Operation never ran because resources were exhausted
    #[error("Admission rejected: {0}")]
    AdmissionRejected(String),

    /// Failure injected by a test harness
    #[error("Injected failure: {0}")]
    Injected(String),

    /// All retry attempts exhausted
    #[error("All {attempts} retry attempts exhausted: {last_error}")]
    RetriesExhausted {
        attempts: u32,
        last_error: Box<ResilienceError>,
    },

    /// Operation was cancelled
    #[error("Operation was cancelled")]
    Cancelled,

    /// Internal failure, e.g. a poisoned lock
    #[error("{0}")]
    Internal(String),
}

/// Failure categories used to decide how an error is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Timeout,
    Offline,
    BandwidthExceeded,
    Transient,
    Permanent,
    CircuitOpen,
    AdmissionRejected,
    Injected,
    Cancelled,
    Internal,
}

impl ErrorKind {
    /// Returns true if an operation failing this way may be retried
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout
                | ErrorKind::Offline
                | ErrorKind::BandwidthExceeded
                | ErrorKind::Transient
                | ErrorKind::Injected
        )
    }

    /// Multiplier applied to the computed backoff delay.
    ///
    /// Bandwidth pressure asks the caller to slow down, so those retries
    /// wait twice as long as ordinary transient failures.
    pub fn backoff_factor(self) -> f64 {
        match self {
            ErrorKind::BandwidthExceeded => 2.0,
            _ => 1.0,
        }
    }

    /// Returns true if the operation never started because of load
    pub fn is_admission_failure(self) -> bool {
        matches!(
            self,
            ErrorKind::AdmissionRejected | ErrorKind::BandwidthExceeded
        )
    }
}

/// Classifies an error into an [`ErrorKind`]
///
/// Implement this for a transport error type to run it through
/// [`RetryExecutor`](crate::RetryExecutor).
pub trait Classify {
    /// Returns the failure category of this error
    fn kind(&self) -> ErrorKind;

    /// Returns true if the failure is worth retrying
    fn is_transient(&self) -> bool {
        self.kind().is_retryable()
    }
}

impl Classify for ResilienceError {
    fn kind(&self) -> ErrorKind {
        match self {
            ResilienceError::Timeout(_) => ErrorKind::Timeout,
            ResilienceError::Offline | ResilienceError::ConnectionLost(_) => ErrorKind::Offline,
            ResilienceError::BandwidthExceeded { .. } => ErrorKind::BandwidthExceeded,
            ResilienceError::Transient(_) => ErrorKind::Transient,
            ResilienceError::Permanent(_) => ErrorKind::Permanent,
            ResilienceError::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            ResilienceError::AdmissionRejected(_) => ErrorKind::AdmissionRejected,
            ResilienceError::Injected(_) => ErrorKind::Injected,
            ResilienceError::RetriesExhausted { last_error, .. } => last_error.kind(),
            ResilienceError::Cancelled => ErrorKind::Cancelled,
            ResilienceError::Internal(_) => ErrorKind::Internal,
        }
    }

    fn is_transient(&self) -> bool {
        // An exhausted retry loop is final even if its last error was transient
        !matches!(self, ResilienceError::RetriesExhausted { .. }) && self.kind().is_retryable()
    }
}
