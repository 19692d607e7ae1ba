// crates/network/src/offline_queue.rs
//! Deferral of work while offline, drained in order on reconnect

use crate::connectivity::{ConnectionMonitor, ConnectionState};
use breakwater_resilience::ResilienceError;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

type QueuedWork<T> = Box<dyn FnOnce() -> BoxFuture<'static, Result<T, ResilienceError>> + Send>;

struct QueuedOperation<T> {
    name: String,
    work: QueuedWork<T>,
    enqueued_at: DateTime<Utc>,
    enqueued: Instant,
}

/// An operation that has finished running
#[derive(Debug)]
pub struct CompletedOperation<T> {
    pub name: String,
    pub result: Result<T, ResilienceError>,
    /// Time between submission and the start of execution
    pub waited: Duration,
}

/// What `queue_operation` did with an operation
#[derive(Debug)]
pub enum QueueDisposition<T> {
    /// Ran immediately because the connection was up
    Executed(CompletedOperation<T>),
    /// Deferred until the connection returns
    Queued { position: usize },
}

/// Name and submission time of a deferred operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOperation {
    pub name: String,
    pub enqueued_at: DateTime<Utc>,
}

struct QueueState<T> {
    pending: VecDeque<QueuedOperation<T>>,
    running: usize,
    completed: usize,
}

/// Buffers operations while offline and replays them in FIFO order
///
/// An operation leaves the queue the moment it starts executing, so it runs
/// exactly once no matter how many drains are requested.
pub struct OfflineOperationQueue<T> {
    monitor: ConnectionMonitor,
    state: Arc<Mutex<QueueState<T>>>,
    drain_lock: Arc<tokio::sync::Mutex<()>>,
}

impl<T> Clone for OfflineOperationQueue<T> {
    fn clone(&self) -> Self {
        Self {
            monitor: self.monitor.clone(),
            state: Arc::clone(&self.state),
            drain_lock: Arc::clone(&self.drain_lock),
        }
    }
}

/// Marks an operation as running, and as completed once it finishes
struct RunningGuard<T> {
    state: Arc<Mutex<QueueState<T>>>,
    finished: bool,
}

impl<T> RunningGuard<T> {
    fn start(state: &Arc<Mutex<QueueState<T>>>, guard: &mut QueueState<T>) -> Self {
        guard.running += 1;
        Self {
            state: Arc::clone(state),
            finished: false,
        }
    }
}

impl<T> Drop for RunningGuard<T> {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        state.running = state.running.saturating_sub(1);
        if self.finished {
            state.completed += 1;
        }
    }
}

fn lock<T>(state: &Mutex<QueueState<T>>) -> MutexGuard<'_, QueueState<T>> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T: Send + 'static> OfflineOperationQueue<T> {
    pub fn new(monitor: ConnectionMonitor) -> Self {
        Self {
            monitor,
            state: Arc::new(Mutex::new(QueueState {
                pending: VecDeque::new(),
                running: 0,
                completed: 0,
            })),
            drain_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn monitor(&self) -> &ConnectionMonitor {
        &self.monitor
    }

    /// Operations waiting for the connection
    pub fn queued_operation_count(&self) -> usize {
        lock(&self.state).pending.len()
    }

    /// Operations that have finished, successfully or not
    pub fn completed_operation_count(&self) -> usize {
        lock(&self.state).completed
    }

    /// Operations currently executing
    pub fn running_operation_count(&self) -> usize {
        lock(&self.state).running
    }

    /// Lists deferred operations in the order they will run
    pub fn pending_operations(&self) -> Vec<PendingOperation> {
        lock(&self.state)
            .pending
            .iter()
            .map(|op| PendingOperation {
                name: op.name.clone(),
                enqueued_at: op.enqueued_at,
            })
            .collect()
    }

    /// Runs `operation` now if connected, otherwise defers it.
    ///
    /// Anything short of `Connected` (including `Connecting`) defers.
    pub async fn queue_operation<F, Fut>(
        &self,
        name: impl Into<String>,
        operation: F,
    ) -> QueueDisposition<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, ResilienceError>> + Send + 'static,
    {
        let name = name.into();
        let work: QueuedWork<T> = Box::new(move || operation().boxed());

        let running = {
            let mut state = lock(&self.state);
            // Read under the queue lock so a concurrent drain cannot miss this push
            if self.monitor.state() != ConnectionState::Connected {
                state.pending.push_back(QueuedOperation {
                    name: name.clone(),
                    work,
                    enqueued_at: Utc::now(),
                    enqueued: Instant::now(),
                });
                let position = state.pending.len();
                log::info!("Queued '{}' while offline (position {})", name, position);
                return QueueDisposition::Queued { position };
            }
            RunningGuard::start(&self.state, &mut state)
        };

        QueueDisposition::Executed(Self::run(running, name, work, Instant::now()).await)
    }

    async fn run(
        mut running: RunningGuard<T>,
        name: String,
        work: QueuedWork<T>,
        enqueued: Instant,
    ) -> CompletedOperation<T> {
        let waited = enqueued.elapsed();
        let result = work().await;
        running.finished = true;
        drop(running);

        if let Err(e) = &result {
            log::warn!("Operation '{}' failed: {}", name, e);
        }

        CompletedOperation {
            name,
            result,
            waited,
        }
    }

    /// Executes queued operations in submission order.
    ///
    /// Stops early if the connection drops; the rest stay queued. A drain
    /// requested while another is running waits for it to finish.
    ///
    /// Each operation runs on its own task, so cancelling the drain never
    /// abandons an operation that already left the queue. It still runs to
    /// completion and is counted; only its result is lost to this caller.
    pub async fn drain(&self) -> Vec<CompletedOperation<T>> {
        let _drain = self.drain_lock.lock().await;
        let mut results = Vec::new();

        loop {
            if !self.monitor.is_connected() {
                log::info!("Connection lost during drain, keeping remaining operations queued");
                break;
            }

            let next = {
                let mut state = lock(&self.state);
                state
                    .pending
                    .pop_front()
                    .map(|op| (op, RunningGuard::start(&self.state, &mut state)))
            };

            let Some((op, running)) = next else {
                break;
            };

            let name = op.name.clone();
            let enqueued = op.enqueued;
            let task = tokio::spawn(Self::run(running, op.name, op.work, enqueued));

            match task.await {
                Ok(completed) => results.push(completed),
                Err(e) => {
                    log::warn!("Operation '{}' did not finish: {}", name, e);
                    results.push(CompletedOperation {
                        name,
                        result: Err(ResilienceError::Internal(e.to_string())),
                        waited: enqueued.elapsed(),
                    });
                }
            }
        }

        if !results.is_empty() {
            log::info!("Drained {} queued operation(s)", results.len());
        }
        results
    }

    /// Updates the connection state and, when it becomes connected, drains
    /// the queue
    pub async fn set_network_state_and_execute_queued(
        &self,
        new_state: ConnectionState,
    ) -> Vec<CompletedOperation<T>> {
        self.monitor.set_state(new_state);

        if new_state == ConnectionState::Connected {
            self.drain().await
        } else {
            Vec::new()
        }
    }

    /// Spawns a task that drains the queue every time the monitor reports
    /// `Connected`. Results are delivered through the returned handle.
    pub fn spawn_auto_drain(&self) -> AutoDrain<T> {
        let (tx, results) = mpsc::unbounded_channel();
        let mut events = self.monitor.subscribe();
        let queue = self.clone();

        let handle = tokio::spawn(async move {
            let mut pending_drain = queue.monitor.is_connected();
            loop {
                if pending_drain {
                    for completed in queue.drain().await {
                        if tx.send(completed).is_err() {
                            return;
                        }
                    }
                }

                pending_drain = match events.recv().await {
                    Ok(event) => event.to == ConnectionState::Connected,
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!("Auto-drain missed {} connection events", skipped);
                        queue.monitor.is_connected()
                    }
                    Err(RecvError::Closed) => break,
                };
            }
        });

        AutoDrain { results, handle }
    }
}

/// Background drainer; stops when dropped
pub struct AutoDrain<T> {
    results: mpsc::UnboundedReceiver<CompletedOperation<T>>,
    handle: JoinHandle<()>,
}

impl<T> AutoDrain<T> {
    /// Waits for the next operation completed by a background drain
    pub async fn next(&mut self) -> Option<CompletedOperation<T>> {
        self.results.recv().await
    }
}

impl<T> Drop for AutoDrain<T> {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
