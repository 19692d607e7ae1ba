// crates/network/src/manager.rs
//! Network manager: the single entry point that runs operations through
//! admission, circuit breaking, retry and timeout

use crate::config::NetworkConfig;
use crate::connectivity::{ConnectionMonitor, ConnectionState};
use crate::error::{NetworkError, NetworkResult};
use crate::operation::{NetworkOperation, NetworkOperationResult};
use crate::resource::{ResourceLimits, ResourceManager, ResourceUsageSnapshot};
use breakwater_resilience::{
    with_timeout, BackoffCalculator, CircuitBreaker, CircuitBreakerConfig, CircuitState,
    ResilienceError, RetryExecutor,
};
use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Network manager configuration
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkManagerConfig {
    /// Admitted operations allowed at once, enforced in priority order
    pub max_concurrent_operations: usize,
    pub circuit_breaker: CircuitBreakerConfig,
    pub backoff: BackoffCalculator,
    pub resources: ResourceLimits,
    /// Timeout given to descriptors created by [`NetworkManager::operation`]
    pub default_timeout: Duration,
    /// Retries given to descriptors created by [`NetworkManager::operation`]
    pub default_max_retries: u32,
}

impl Default for NetworkManagerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_operations: 32,
            circuit_breaker: CircuitBreakerConfig::default(),
            backoff: BackoffCalculator::default(),
            resources: ResourceLimits::default(),
            default_timeout: Duration::from_secs(30),
            default_max_retries: 3,
        }
    }
}

/// Combined view of every component the manager owns
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ManagerStats {
    pub connection: ConnectionState,
    pub circuit: CircuitState,
    pub resources: ResourceUsageSnapshot,
    pub in_flight: usize,
}

/// Routes operations through resource admission, the circuit breaker and
/// retry with backoff, all bounded by the operation's timeout
#[derive(Debug, Clone)]
pub struct NetworkManager {
    config: NetworkManagerConfig,
    monitor: ConnectionMonitor,
    breaker: CircuitBreaker,
    retry: RetryExecutor,
    resources: ResourceManager,
    in_flight: Arc<AtomicUsize>,
}

/// Counts an `execute` call from entry until it resolves or is dropped
struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl NetworkManager {
    /// Creates a manager with its own connection monitor, initially connected
    pub fn new(config: NetworkManagerConfig) -> Self {
        Self::with_monitor(config, ConnectionMonitor::new())
    }

    /// Creates a manager that consults an existing connection monitor
    pub fn with_monitor(config: NetworkManagerConfig, monitor: ConnectionMonitor) -> Self {
        Self {
            breaker: CircuitBreaker::new(config.circuit_breaker.clone()),
            retry: RetryExecutor::new(config.backoff.clone()),
            resources: ResourceManager::new(config.resources.clone())
                .with_concurrency_limit(config.max_concurrent_operations),
            in_flight: Arc::new(AtomicUsize::new(0)),
            monitor,
            config,
        }
    }

    /// Creates a manager from a validated configuration
    pub fn from_config(config: &NetworkConfig) -> NetworkResult<Self> {
        config.validate().map_err(NetworkError::InvalidConfig)?;
        Ok(Self::new(config.manager_config()))
    }

    pub fn config(&self) -> &NetworkManagerConfig {
        &self.config
    }

    pub fn monitor(&self) -> &ConnectionMonitor {
        &self.monitor
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn resources(&self) -> &ResourceManager {
        &self.resources
    }

    /// Creates a descriptor carrying this manager's default timeout and retries
    pub fn operation(&self, id: impl Into<String>) -> NetworkOperation {
        NetworkOperation::new(id)
            .with_timeout(self.config.default_timeout)
            .with_max_retries(self.config.default_max_retries)
    }

    pub fn stats(&self) -> ManagerStats {
        ManagerStats {
            connection: self.monitor.state(),
            circuit: self.breaker.state(),
            resources: self.resources.current_resource_usage(),
            in_flight: self.in_flight.load(Ordering::SeqCst),
        }
    }

    /// Runs `work` for `operation` and reports how it went.
    ///
    /// `work` receives the 1-based attempt number. The whole pipeline races
    /// the operation's timeout; once the timeout fires the in-flight attempt
    /// is dropped and the result is final.
    pub async fn execute<T, F, Fut>(
        &self,
        operation: NetworkOperation,
        mut work: F,
    ) -> NetworkOperationResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ResilienceError>>,
    {
        let start = Instant::now();
        let attempts = AtomicU32::new(0);
        let _in_flight = InFlight::enter(&self.in_flight);

        let outcome = if self.monitor.state() == ConnectionState::Disconnected {
            log::debug!("Operation '{}' failed fast: offline", operation.id);
            Err(ResilienceError::Offline)
        } else {
            let pipeline = async {
                let _resources = self
                    .resources
                    .admit(operation.priority, operation.expected_resource_cost)
                    .await?;
                let permit = self.breaker.try_acquire()?;

                let report = self
                    .retry
                    .execute_with_retry(operation.max_attempts(), |attempt| {
                        attempts.store(attempt, Ordering::SeqCst);
                        work(attempt)
                    })
                    .await;

                match report.result {
                    Ok(value) => {
                        permit.record_success();
                        Ok(value)
                    }
                    Err(e) => {
                        permit.record_failure();
                        Err(ResilienceError::from(e))
                    }
                }
            };

            match with_timeout(operation.timeout, pipeline).await {
                Ok(result) => result,
                Err(e) => {
                    log::warn!("Operation '{}' timed out after {:?}", operation.id, operation.timeout);
                    Err(e)
                }
            }
        };

        NetworkOperationResult {
            operation_id: operation.id,
            outcome,
            execution_time: start.elapsed(),
            attempts_made: attempts.load(Ordering::SeqCst),
        }
    }
}

impl Default for NetworkManager {
    fn default() -> Self {
        Self::new(NetworkManagerConfig::default())
    }
}
