// crates/network/src/lib.rs
//! Network resilience layer
//!
//! Wraps calls to remote services so they survive flaky links:
//! - [`NetworkManager`] runs each operation through resource admission, a
//!   circuit breaker and retry with backoff, bounded by a timeout
//! - [`ConnectionMonitor`] tracks connectivity and broadcasts transitions
//! - [`OfflineOperationQueue`] defers work while offline and replays it in
//!   order on reconnect
//! - [`ResourceManager`] caps concurrent connections and bandwidth
//!
//! # Example
//!
//! ```rust,no_run
//! use breakwater_network::{NetworkManager, Priority, ResilienceError};
//!
//! # async fn demo() {
//! let manager = NetworkManager::default();
//! let op = manager.operation("fetch-profile").with_priority(Priority::High);
//!
//! let result = manager
//!     .execute(op, |attempt| async move {
//!         if attempt < 2 {
//!             Err(ResilienceError::Transient("503 Service Unavailable".into()))
//!         } else {
//!             Ok("profile")
//!         }
//!     })
//!     .await;
//!
//! assert_eq!(result.value(), Some(&"profile"));
//! # }
//! ```

mod config;
mod connectivity;
mod error;
mod manager;
mod offline_queue;
mod operation;
mod resource;
mod throttle;

pub use config::{
    BackoffSection, CircuitBreakerSection, ManagerSection, NetworkConfig, ResourceSection,
    ValidationError,
};
pub use connectivity::{
    ConnectionEvent, ConnectionMonitor, ConnectionState, ConnectivityProbe, HttpProbe, ManualProbe,
    DEFAULT_EVENT_CAPACITY,
};
pub use error::{NetworkError, NetworkResult};
pub use manager::{ManagerStats, NetworkManager, NetworkManagerConfig};
pub use offline_queue::{
    AutoDrain, CompletedOperation, OfflineOperationQueue, PendingOperation, QueueDisposition,
};
pub use operation::{NetworkOperation, NetworkOperationResult, Priority, DEFAULT_RESOURCE_COST};
pub use resource::{
    AdmissionPolicy, ResourceLimits, ResourceManager, ResourcePermit, ResourceUsageSnapshot,
};

pub use breakwater_resilience::{
    BackoffCalculator, CircuitBreaker, CircuitBreakerConfig, CircuitState, Classify, ErrorKind,
    ResilienceError, ResilienceResult,
};
