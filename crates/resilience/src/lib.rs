// crates/resilience/src/lib.rs
//! Resilience primitives for calls to unreliable dependencies
//!
//! This crate provides:
//! - Exponential backoff with bounded jitter
//! - Retry execution that separates transient from permanent failures
//! - A three-state circuit breaker with lazy recovery probing
//! - Timeout handling
//!
//! # Example
//!
//! ```rust
//! use breakwater_resilience::{
//!     BackoffCalculator, CircuitBreaker, CircuitBreakerConfig, RetryExecutor,
//! };
//! use std::time::Duration;
//!
//! // Retry with exponential backoff
//! let backoff = BackoffCalculator::new(Duration::from_millis(100))
//!     .with_max_delay(Duration::from_secs(5))
//!     .with_jitter(Duration::from_millis(20));
//! let retry = RetryExecutor::new(backoff);
//!
//! // Circuit breaker
//! let cb_config = CircuitBreakerConfig::new(5, Duration::from_secs(60));
//! let cb = CircuitBreaker::new(cb_config);
//! # let _ = (retry, cb);
//! ```

mod backoff;
mod circuit_breaker;
mod error;
mod retry;
mod timeout;

pub use backoff::BackoffCalculator;
pub use circuit_breaker::{
    CallPermit, CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState,
};
pub use error::{Classify, ErrorKind, ResilienceError, ResilienceResult};
pub use retry::{with_retry, Outcome, RetryError, RetryExecutor, RetryReport};
pub use timeout::{with_timeout, Timeout};
