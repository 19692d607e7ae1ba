// crates/network/src/resource.rs
//! Admission control for connection and bandwidth budgets

use crate::operation::{NetworkOperation, Priority};
use crate::throttle::TokenBucket;
use breakwater_resilience::{ResilienceError, ResilienceResult};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;

/// What happens to an operation that cannot be admitted right away
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionPolicy {
    /// Wait in line, higher priority first
    #[default]
    Queue,
    /// Fail immediately
    Reject,
}

/// Resource budgets enforced at admission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLimits {
    pub max_active_connections: usize,
    pub max_bandwidth_per_second: u64,
    /// Upper bound on admitted plus waiting operations
    pub connection_pool_size: usize,
    pub policy: AdmissionPolicy,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_active_connections: 4,
            max_bandwidth_per_second: 1024 * 1024,
            connection_pool_size: 16,
            policy: AdmissionPolicy::Queue,
        }
    }
}

/// Consistent view of resource usage
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceUsageSnapshot {
    pub active_connections: usize,
    /// Bytes consumed from the per-second budget and not yet replenished
    pub current_bandwidth_usage: f64,
    pub waiting_operations: usize,
}

type Ticket = (Reverse<Priority>, u64);

#[derive(Debug)]
struct ResourceState {
    active: usize,
    bucket: TokenBucket,
    waiting: BTreeSet<Ticket>,
    next_ticket: u64,
}

impl ResourceState {
    /// Claims a connection slot and bandwidth.
    ///
    /// On failure returns how long until bandwidth frees up, or `None` when
    /// the operation has to wait for a connection to be released.
    fn try_take(&mut self, max_active: usize, cost: u64) -> Result<(), Option<Duration>> {
        if self.active >= max_active {
            return Err(None);
        }
        self.bucket.consume(cost).map_err(Some)?;
        self.active += 1;
        Ok(())
    }
}

fn lock(state: &Mutex<ResourceState>) -> MutexGuard<'_, ResourceState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Caps concurrent heavy operations and aggregate bandwidth
#[derive(Debug, Clone)]
pub struct ResourceManager {
    limits: ResourceLimits,
    /// Extra cap on admitted operations imposed by the owner
    concurrency_limit: usize,
    state: Arc<Mutex<ResourceState>>,
    released: Arc<Notify>,
}

impl ResourceManager {
    pub fn new(limits: ResourceLimits) -> Self {
        let state = ResourceState {
            active: 0,
            bucket: TokenBucket::new(limits.max_bandwidth_per_second),
            waiting: BTreeSet::new(),
            next_ticket: 0,
        };

        Self {
            limits,
            concurrency_limit: usize::MAX,
            state: Arc::new(Mutex::new(state)),
            released: Arc::new(Notify::new()),
        }
    }

    /// Caps admitted operations below `max_active_connections`.
    ///
    /// The cap is enforced by the same priority line as connections.
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit.max(1);
        self
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    /// Most operations that may hold a permit at once
    pub fn admission_cap(&self) -> usize {
        self.limits.max_active_connections.min(self.concurrency_limit)
    }

    /// Returns connection and bandwidth usage read under a single lock
    pub fn current_resource_usage(&self) -> ResourceUsageSnapshot {
        let mut state = lock(&self.state);
        ResourceUsageSnapshot {
            active_connections: state.active,
            current_bandwidth_usage: state.bucket.usage(),
            waiting_operations: state.waiting.len(),
        }
    }

    /// Changes the bandwidth budget; waiting operations are re-evaluated
    pub fn update_bandwidth_limit(&self, bytes_per_second: u64) {
        lock(&self.state).bucket.update_rate(bytes_per_second);
        self.released.notify_waiters();
    }

    /// Admits an operation of the given priority and declared cost.
    ///
    /// The returned permit holds a connection slot until dropped.
    pub async fn admit(&self, priority: Priority, cost: u64) -> ResilienceResult<ResourcePermit> {
        let ticket = {
            let mut state = lock(&self.state);

            let limit = state.bucket.capacity();
            if cost > limit {
                log::warn!("Rejecting operation costing {} bytes, budget is {} bytes/s", cost, limit);
                return Err(ResilienceError::BandwidthExceeded {
                    requested: cost,
                    limit,
                });
            }

            if state.active + state.waiting.len() >= self.limits.connection_pool_size {
                return Err(ResilienceError::AdmissionRejected(format!(
                    "connection pool of {} exhausted",
                    self.limits.connection_pool_size
                )));
            }

            if state.waiting.is_empty()
                && state
                    .try_take(self.admission_cap(), cost)
                    .is_ok()
            {
                return Ok(self.permit());
            }

            if self.limits.policy == AdmissionPolicy::Reject {
                return Err(ResilienceError::AdmissionRejected(format!(
                    "{} active connections, {} waiting",
                    state.active,
                    state.waiting.len()
                )));
            }

            let ticket = (Reverse(priority), state.next_ticket);
            state.next_ticket += 1;
            state.waiting.insert(ticket);
            ticket
        };

        log::debug!("Operation waiting for admission ({:?} priority)", priority);
        let mut waiter = WaitTicket {
            manager: self,
            ticket: Some(ticket),
        };

        loop {
            let notified = self.released.notified();
            tokio::pin!(notified);
            // Register before checking state so a release in between is not missed
            notified.as_mut().enable();

            let wait = {
                let mut state = lock(&self.state);

                // The budget may have shrunk below this operation's cost while it waited
                let limit = state.bucket.capacity();
                if cost > limit {
                    state.waiting.remove(&ticket);
                    waiter.ticket = None;
                    drop(state);
                    self.released.notify_waiters();
                    log::warn!("Dropping waiter costing {} bytes, budget is now {} bytes/s", cost, limit);
                    return Err(ResilienceError::BandwidthExceeded {
                        requested: cost,
                        limit,
                    });
                }

                if state.waiting.first() == Some(&ticket) {
                    match state.try_take(self.admission_cap(), cost) {
                        Ok(()) => {
                            state.waiting.remove(&ticket);
                            waiter.ticket = None;
                            drop(state);
                            // The next in line may be able to go too
                            self.released.notify_waiters();
                            return Ok(self.permit());
                        }
                        Err(wait) => wait,
                    }
                } else {
                    None
                }
            };

            match wait {
                Some(delay) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Runs `work` once the operation is admitted, releasing its slot however
    /// `work` ends.
    ///
    /// Admission failures are returned before `work` is ever called.
    pub async fn execute_with_resource_check<F, Fut, T, E>(
        &self,
        operation: &NetworkOperation,
        work: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<ResilienceError>,
    {
        let _permit = self
            .admit(operation.priority, operation.expected_resource_cost)
            .await
            .map_err(E::from)?;

        work().await
    }

    fn permit(&self) -> ResourcePermit {
        ResourcePermit {
            state: Arc::clone(&self.state),
            released: Arc::clone(&self.released),
        }
    }
}

/// Removes an abandoned waiter from the line
struct WaitTicket<'a> {
    manager: &'a ResourceManager,
    ticket: Option<Ticket>,
}

impl Drop for WaitTicket<'_> {
    fn drop(&mut self) {
        if let Some(ticket) = self.ticket.take() {
            lock(&self.manager.state).waiting.remove(&ticket);
            self.manager.released.notify_waiters();
        }
    }
}

/// A held connection slot, returned when dropped
#[derive(Debug)]
pub struct ResourcePermit {
    state: Arc<Mutex<ResourceState>>,
    released: Arc<Notify>,
}

impl Drop for ResourcePermit {
    fn drop(&mut self) {
        {
            let mut state = lock(&self.state);
            state.active = state.active.saturating_sub(1);
        }
        self.released.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex as AsyncMutex;

    fn limits(max_active: usize, pool: usize, policy: AdmissionPolicy) -> ResourceLimits {
        ResourceLimits {
            max_active_connections: max_active,
            max_bandwidth_per_second: 1_000_000,
            connection_pool_size: pool,
            policy,
        }
    }

    #[tokio::test]
    async fn test_permit_released_on_drop() {
        let manager = ResourceManager::new(ResourceLimits::default());

        let permit = manager.admit(Priority::Normal, 100).await.expect("admitted");
        assert_eq!(manager.current_resource_usage().active_connections, 1);

        drop(permit);
        assert_eq!(manager.current_resource_usage().active_connections, 0);
    }

    #[tokio::test]
    async fn test_reject_policy_fails_fast() {
        let manager = ResourceManager::new(limits(1, 4, AdmissionPolicy::Reject));

        let _held = manager.admit(Priority::Normal, 10).await.expect("admitted");
        let second = manager.admit(Priority::High, 10).await;
        assert!(matches!(second, Err(ResilienceError::AdmissionRejected(_))));
    }

    #[tokio::test]
    async fn test_oversized_operation_rejected() {
        let manager = ResourceManager::new(limits(2, 4, AdmissionPolicy::Queue));

        let result = manager.admit(Priority::Normal, 2_000_000).await;
        assert_eq!(
            result.err(),
            Some(ResilienceError::BandwidthExceeded {
                requested: 2_000_000,
                limit: 1_000_000
            })
        );
        assert_eq!(manager.current_resource_usage().active_connections, 0);
    }

    #[tokio::test]
    async fn test_pool_size_bounds_waiters() {
        let manager = ResourceManager::new(limits(1, 2, AdmissionPolicy::Queue));

        let _held = manager.admit(Priority::Normal, 10).await.expect("admitted");
        let waiting = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.admit(Priority::Normal, 10).await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(manager.current_resource_usage().waiting_operations, 1);

        let overflow = manager.admit(Priority::High, 10).await;
        assert!(matches!(overflow, Err(ResilienceError::AdmissionRejected(_))));

        waiting.abort();
    }

    #[tokio::test]
    async fn test_queued_operation_admitted_after_release() {
        let manager = ResourceManager::new(limits(1, 4, AdmissionPolicy::Queue));

        let held = manager.admit(Priority::Normal, 10).await.expect("admitted");
        let waiter = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.admit(Priority::Normal, 10).await.is_ok() })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(held);
        assert!(waiter.await.expect("task panicked"));
        assert_eq!(manager.current_resource_usage().active_connections, 0);
    }

    #[tokio::test]
    async fn test_higher_priority_admitted_first() {
        let manager = ResourceManager::new(limits(1, 8, AdmissionPolicy::Queue));
        let order = Arc::new(AsyncMutex::new(Vec::new()));

        let held = manager.admit(Priority::Normal, 10).await.expect("admitted");

        let mut handles = Vec::new();
        for (name, priority) in [
            ("low", Priority::Low),
            ("normal", Priority::Normal),
            ("high", Priority::High),
        ] {
            let manager = manager.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let _permit = manager.admit(priority, 10).await.expect("admitted");
                order.lock().await.push(name);
                tokio::time::sleep(Duration::from_millis(5)).await;
            }));
            // Make sure each waiter is in line before the next one arrives
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        drop(held);
        for handle in handles {
            handle.await.expect("task panicked");
        }

        assert_eq!(*order.lock().await, vec!["high", "normal", "low"]);
    }

    #[tokio::test]
    async fn test_abandoned_waiter_leaves_line() {
        let manager = ResourceManager::new(limits(1, 4, AdmissionPolicy::Queue));
        let held = manager.admit(Priority::Normal, 10).await.expect("admitted");

        let result = tokio::time::timeout(
            Duration::from_millis(20),
            manager.admit(Priority::High, 10),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(manager.current_resource_usage().waiting_operations, 0);

        drop(held);
        assert!(manager.admit(Priority::Low, 10).await.is_ok());
    }

    #[tokio::test]
    async fn test_bandwidth_wait_then_admit() {
        let manager = ResourceManager::new(ResourceLimits {
            max_active_connections: 4,
            max_bandwidth_per_second: 10_000,
            connection_pool_size: 8,
            policy: AdmissionPolicy::Queue,
        });

        let first = manager.admit(Priority::Normal, 10_000).await.expect("admitted");
        drop(first);

        let start = std::time::Instant::now();
        let _second = manager.admit(Priority::Normal, 1_000).await.expect("admitted");
        // 1000 bytes at 10000 bytes/s refill
        assert!(start.elapsed() >= Duration::from_millis(80));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_active_connections_never_exceed_cap() {
        let manager = ResourceManager::new(limits(3, 64, AdmissionPolicy::Queue));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..24 {
            let manager = manager.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let op = NetworkOperation::new("load").with_resource_cost(10);
                manager
                    .execute_with_resource_check(&op, || async {
                        let active = manager.current_resource_usage().active_connections;
                        peak.fetch_max(active, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        Ok::<_, ResilienceError>(())
                    })
                    .await
            }));
        }

        for handle in handles {
            assert!(handle.await.expect("task panicked").is_ok());
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(manager.current_resource_usage().active_connections, 0);
    }

    #[tokio::test]
    async fn test_work_error_is_not_admission_error() {
        let manager = ResourceManager::new(ResourceLimits::default());
        let op = NetworkOperation::new("fails");

        let result: Result<(), ResilienceError> = manager
            .execute_with_resource_check(&op, || async {
                Err(ResilienceError::Permanent("bad input".into()))
            })
            .await;

        assert_eq!(result, Err(ResilienceError::Permanent("bad input".into())));
        assert_eq!(manager.current_resource_usage().active_connections, 0);
    }

    #[tokio::test]
    async fn test_shrunk_budget_fails_head_and_frees_line() {
        let manager = ResourceManager::new(ResourceLimits {
            max_active_connections: 4,
            max_bandwidth_per_second: 10_000,
            connection_pool_size: 8,
            policy: AdmissionPolicy::Queue,
        });
        drop(manager.admit(Priority::Normal, 10_000).await.expect("admitted"));

        let large = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.admit(Priority::High, 8_000).await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let small = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.admit(Priority::Low, 10).await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(manager.current_resource_usage().waiting_operations, 2);

        manager.update_bandwidth_limit(1_000);

        let large = tokio::time::timeout(Duration::from_secs(2), large)
            .await
            .expect("large waiter stuck")
            .expect("task panicked");
        assert_eq!(
            large,
            Err(ResilienceError::BandwidthExceeded {
                requested: 8_000,
                limit: 1_000
            })
        );

        let small = tokio::time::timeout(Duration::from_secs(2), small)
            .await
            .expect("small waiter starved")
            .expect("task panicked");
        assert!(small.is_ok());
        assert_eq!(manager.current_resource_usage().waiting_operations, 0);
    }

    #[tokio::test]
    async fn test_concurrency_limit_uses_priority_line() {
        let manager = ResourceManager::new(limits(4, 16, AdmissionPolicy::Queue))
            .with_concurrency_limit(1);
        assert_eq!(manager.admission_cap(), 1);
        let order = Arc::new(AsyncMutex::new(Vec::new()));

        let held = manager.admit(Priority::Normal, 10).await.expect("admitted");

        let mut handles = Vec::new();
        for (name, priority) in [("low", Priority::Low), ("high", Priority::High)] {
            let manager = manager.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let _permit = manager.admit(priority, 10).await.expect("admitted");
                order.lock().await.push(name);
            }));
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(manager.current_resource_usage().active_connections, 1);

        drop(held);
        for handle in handles {
            handle.await.expect("task panicked");
        }

        assert_eq!(*order.lock().await, vec!["high", "low"]);
    }
}
