// crates/network/src/operation.rs
//! Operation descriptors and results

use breakwater_resilience::{Classify, ErrorKind, ResilienceError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Declared cost of an operation that does not state one, in bytes
pub const DEFAULT_RESOURCE_COST: u64 = 1024;

/// Operation priority levels
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
}

/// Describes how a unit of remote work should be run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkOperation {
    pub id: String,
    pub priority: Priority,
    pub timeout: Duration,
    pub max_retries: u32,
    pub expected_resource_cost: u64,
}

impl NetworkOperation {
    /// Creates a descriptor with normal priority, a 30 second timeout and
    /// three retries
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            priority: Priority::Normal,
            timeout: Duration::from_secs(30),
            max_retries: 3,
            expected_resource_cost: DEFAULT_RESOURCE_COST,
        }
    }

    /// Creates a descriptor with a generated unique id
    pub fn anonymous() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_resource_cost(mut self, bytes: u64) -> Self {
        self.expected_resource_cost = bytes;
        self
    }

    /// Total attempts allowed: the first call plus retries
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Final result of one submission to the network manager
#[derive(Debug)]
pub struct NetworkOperationResult<T> {
    pub operation_id: String,
    pub outcome: Result<T, ResilienceError>,
    pub execution_time: Duration,
    pub attempts_made: u32,
}

impl<T> NetworkOperationResult<T> {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn value(&self) -> Option<&T> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&ResilienceError> {
        self.outcome.as_ref().err()
    }

    /// Failure category, if the operation failed
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error().map(Classify::kind)
    }

    pub fn into_result(self) -> Result<T, ResilienceError> {
        self.outcome
    }
}
