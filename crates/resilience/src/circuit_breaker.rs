// crates/resilience/src/circuit_breaker.rs
//! Circuit breaker pattern implementation

use crate::error::{ResilienceError, ResilienceResult};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally
    Closed,
    /// Circuit is open, requests are rejected
    Open,
    /// Circuit is half-open, testing if service recovered
    HalfOpen,
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    failure_threshold: u32,
    /// Time to wait after opening before a probe is allowed
    recovery_timeout: Duration,
    /// Concurrent probe calls allowed while half-open
    half_open_max_attempts: u32,
}

impl CircuitBreakerConfig {
    /// Creates a new configuration allowing a single half-open probe
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            recovery_timeout,
            half_open_max_attempts: 1,
        }
    }

    /// Sets how many probes may run at once while half-open
    pub fn with_half_open_max_attempts(mut self, attempts: u32) -> Self {
        self.half_open_max_attempts = attempts.max(1);
        self
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    pub fn recovery_timeout(&self) -> Duration {
        self.recovery_timeout
    }

    pub fn half_open_max_attempts(&self) -> u32 {
        self.half_open_max_attempts
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(60))
    }
}

/// Point-in-time view of a circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub probes_in_flight: u32,
    pub rejected_calls: u64,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probes_in_flight: u32,
    /// Bumped every time a new half-open window starts so stale probes are ignored
    generation: u64,
    rejected_calls: u64,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            probes_in_flight: 0,
            generation: 0,
            rejected_calls: 0,
        }
    }

    fn open(&mut self) {
        self.state = CircuitState::Open;
        self.opened_at = Some(Instant::now());
        log::warn!(
            "Circuit breaker opened after {} consecutive failures",
            self.consecutive_failures
        );
    }

    fn half_open(&mut self) {
        self.state = CircuitState::HalfOpen;
        self.probes_in_flight = 0;
        self.generation += 1;
        log::info!("Circuit breaker half-open, probing for recovery");
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.opened_at = None;
        log::info!("Circuit breaker closed");
    }

    fn reject(&mut self, retry_after: Duration) -> ResilienceError {
        self.rejected_calls += 1;
        ResilienceError::CircuitOpen {
            failures: self.consecutive_failures,
            retry_after,
        }
    }

    fn is_current_probe(&self, probe: Option<u64>) -> bool {
        self.state == CircuitState::HalfOpen && probe == Some(self.generation)
    }

    fn on_success(&mut self, probe: Option<u64>) {
        match self.state {
            CircuitState::Closed => self.consecutive_failures = 0,
            CircuitState::HalfOpen if self.is_current_probe(probe) => self.close(),
            _ => {}
        }
    }

    fn on_failure(&mut self, probe: Option<u64>, threshold: u32) {
        match self.state {
            CircuitState::Closed => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= threshold {
                    self.open();
                }
            }
            CircuitState::HalfOpen if self.is_current_probe(probe) => {
                self.consecutive_failures += 1;
                self.open();
            }
            CircuitState::HalfOpen => {}
            CircuitState::Open => self.consecutive_failures += 1,
        }
    }
}

/// Circuit breaker implementation
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: Arc<Mutex<BreakerState>>,
}

impl CircuitBreaker {
    /// Creates a new circuit breaker
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(BreakerState::new())),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Gets the current state
    pub fn state(&self) -> CircuitState {
        self.state.lock().map(|s| s.state).unwrap_or(CircuitState::Open)
    }

    /// Gets a snapshot of the breaker's counters
    pub fn metrics(&self) -> ResilienceResult<CircuitSnapshot> {
        let state = self
            .state
            .lock()
            .map_err(|_| ResilienceError::Internal("Lock poisoned".to_string()))?;

        Ok(CircuitSnapshot {
            state: state.state,
            consecutive_failures: state.consecutive_failures,
            probes_in_flight: state.probes_in_flight,
            rejected_calls: state.rejected_calls,
        })
    }

    /// Asks the breaker for permission to make one call.
    ///
    /// An open circuit whose recovery timeout has elapsed moves to half-open
    /// here, on the call that observes it. The returned permit must be given
    /// the call's outcome; dropping it unresolved counts as a failure.
    pub fn try_acquire(&self) -> ResilienceResult<CallPermit> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| ResilienceError::Internal("Lock poisoned".to_string()))?;

        if state.state == CircuitState::Open {
            let elapsed = state.opened_at.map(|t| t.elapsed()).unwrap_or_default();
            if elapsed < self.config.recovery_timeout {
                return Err(state.reject(self.config.recovery_timeout - elapsed));
            }
            state.half_open();
        }

        let probe = match state.state {
            CircuitState::Closed => None,
            _ => {
                if state.probes_in_flight >= self.config.half_open_max_attempts {
                    log::debug!("Circuit breaker half-open probe limit reached, rejecting call");
                    return Err(state.reject(Duration::ZERO));
                }
                state.probes_in_flight += 1;
                Some(state.generation)
            }
        };

        Ok(CallPermit {
            state: Arc::clone(&self.state),
            failure_threshold: self.config.failure_threshold,
            probe,
            settled: false,
        })
    }

    /// Executes an operation through the circuit breaker.
    ///
    /// Rejection is reported through the caller's error type, so it is never
    /// confused with a failure of the operation itself.
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<ResilienceError>,
    {
        let permit = self.try_acquire().map_err(E::from)?;

        match operation().await {
            Ok(value) => {
                permit.record_success();
                Ok(value)
            }
            Err(e) => {
                permit.record_failure();
                Err(e)
            }
        }
    }

    /// Resets the circuit breaker to closed state
    pub fn reset(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.close();
            state.probes_in_flight = 0;
            state.generation += 1;
        }
    }
}

/// Permission to make one call through a [`CircuitBreaker`]
///
/// Half-open probe slots are released exactly once, when the permit drops.
#[derive(Debug)]
pub struct CallPermit {
    state: Arc<Mutex<BreakerState>>,
    failure_threshold: u32,
    probe: Option<u64>,
    settled: bool,
}

impl CallPermit {
    /// Returns true if this call is a half-open probe
    pub fn is_probe(&self) -> bool {
        self.probe.is_some()
    }

    /// Records a successful call
    pub fn record_success(mut self) {
        self.settle(true);
    }

    /// Records a failed call
    pub fn record_failure(mut self) {
        self.settle(false);
    }

    fn settle(&mut self, success: bool) {
        self.settled = true;
        if let Ok(mut state) = self.state.lock() {
            if success {
                state.on_success(self.probe);
            } else {
                state.on_failure(self.probe, self.failure_threshold);
            }
        }
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        if !self.settled {
            log::debug!("Circuit breaker call abandoned, counting as failure");
            self.settle(false);
        }

        if let Some(generation) = self.probe {
            if let Ok(mut state) = self.state.lock() {
                if state.generation == generation {
                    state.probes_in_flight = state.probes_in_flight.saturating_sub(1);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fail(cb: &CircuitBreaker) {
        cb.try_acquire().expect("call should be allowed").record_failure();
    }

    fn succeed(cb: &CircuitBreaker) {
        cb.try_acquire().expect("call should be allowed").record_success();
    }

    #[test]
    fn test_circuit_breaker_initial_state() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::default());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_circuit_opens_after_threshold() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::new(3, Duration::from_secs(1)));

        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Closed);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Closed);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_success_resets_failure_count() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::new(2, Duration::from_secs(1)));

        fail(&cb);
        succeed(&cb);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Closed);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_circuit_rejects_when_open() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::new(2, Duration::from_secs(10)));

        fail(&cb);
        fail(&cb);

        let result = cb.try_acquire();
        assert!(matches!(
            result,
            Err(ResilienceError::CircuitOpen { failures: 2, .. })
        ));
        assert_eq!(cb.metrics().map(|m| m.rejected_calls).ok(), Some(1));
    }

    #[test]
    fn test_circuit_half_open_after_timeout() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::new(2, Duration::from_millis(50)));

        fail(&cb);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(60));

        // Transition is lazy: nothing changes until a call arrives
        assert_eq!(cb.state(), CircuitState::Open);
        let permit = cb.try_acquire().expect("probe should be allowed");
        assert!(permit.is_probe());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_trial_success_closes_circuit() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::new(1, Duration::from_millis(20)));

        fail(&cb);
        std::thread::sleep(Duration::from_millis(30));
        succeed(&cb);

        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.metrics().map(|m| m.consecutive_failures).ok(), Some(0));
    }

    #[test]
    fn test_trial_failure_reopens_circuit() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::new(1, Duration::from_millis(20)));

        fail(&cb);
        std::thread::sleep(Duration::from_millis(30));
        fail(&cb);

        assert_eq!(cb.state(), CircuitState::Open);
        // openedAt was reset, so the breaker is not immediately probe-able again
        assert!(cb.try_acquire().is_err());
    }

    #[test]
    fn test_half_open_limits_concurrent_trials() {
        let config = CircuitBreakerConfig::new(1, Duration::from_millis(20))
            .with_half_open_max_attempts(2);
        let cb = CircuitBreaker::new(config);

        fail(&cb);
        std::thread::sleep(Duration::from_millis(30));

        let first = cb.try_acquire().expect("first probe");
        let second = cb.try_acquire().expect("second probe");
        assert!(cb.try_acquire().is_err());
        assert_eq!(cb.metrics().map(|m| m.probes_in_flight).ok(), Some(2));

        // An abandoned probe reopens the circuit; the late success is ignored
        drop(first);
        assert_eq!(cb.state(), CircuitState::Open);
        second.record_success();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_trial_slot_released_once() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::new(1, Duration::from_millis(20)));

        fail(&cb);
        std::thread::sleep(Duration::from_millis(30));

        let probe = cb.try_acquire().expect("probe");
        assert!(cb.try_acquire().is_err());
        probe.record_success();

        let snapshot = cb.metrics().expect("metrics");
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.probes_in_flight, 0);
    }

    #[test]
    fn test_abandoned_call_counts_as_failure() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::new(1, Duration::from_secs(5)));

        let permit = cb.try_acquire().expect("closed circuit");
        drop(permit);

        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_stale_closed_call_does_not_close_half_open() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::new(1, Duration::from_millis(20)));

        let slow_call = cb.try_acquire().expect("closed circuit");
        fail(&cb);
        std::thread::sleep(Duration::from_millis(30));

        let probe = cb.try_acquire().expect("probe");
        slow_call.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        probe.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_circuit_breaker_call_success() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::default());

        let result: Result<i32, ResilienceError> = cb.call(|| async { Ok(42) }).await;
        assert_eq!(result, Ok(42));
    }

    #[tokio::test]
    async fn test_open_circuit_never_invokes_operation() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::new(1, Duration::from_secs(10)));
        let calls = AtomicU32::new(0);

        let first: Result<(), ResilienceError> = cb
            .call(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ResilienceError::Transient("boom".into()))
            })
            .await;
        assert!(first.is_err());

        let second: Result<(), ResilienceError> = cb
            .call(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(matches!(second, Err(ResilienceError::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_circuit_breaker_reset() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::new(2, Duration::from_secs(1)));

        fail(&cb);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.try_acquire().is_ok());
    }
}
