// crates/network/src/config.rs
//! TOML configuration for the network layer
//!
//! Every section is optional in the file; missing keys take their defaults.
//! Durations are written in milliseconds.

use crate::error::{NetworkError, NetworkResult};
use crate::manager::NetworkManagerConfig;
use crate::resource::{AdmissionPolicy, ResourceLimits};
use breakwater_resilience::{BackoffCalculator, CircuitBreakerConfig};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// A single invalid configuration value
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    /// Dotted path of the offending key, e.g. `backoff.multiplier`
    pub field: String,
    pub message: String,
    pub value: Option<String>,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            value: None,
        }
    }

    pub fn with_value(
        field: impl Into<String>,
        message: impl Into<String>,
        value: impl ToString,
    ) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            value: Some(value.to_string()),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)?;
        if let Some(ref value) = self.value {
            write!(f, " (got: {})", value)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

fn at_least<T>(value: T, min: T, field: &str) -> Option<ValidationError>
where
    T: PartialOrd + fmt::Display + Copy,
{
    (value < min).then(|| ValidationError::with_value(field, format!("must be at least {}", min), value))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSection {
    pub failure_threshold: u32,
    pub recovery_timeout_ms: u64,
    pub half_open_max_attempts: u32,
}

impl Default for CircuitBreakerSection {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_ms: 60_000,
            half_open_max_attempts: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffSection {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// Upper bound of the random delay added to each backoff
    pub jitter_ms: u64,
}

impl Default for BackoffSection {
    fn default() -> Self {
        Self {
            base_delay_ms: 100,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter_ms: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceSection {
    pub max_active_connections: usize,
    pub max_bandwidth_per_second: u64,
    pub connection_pool_size: usize,
    pub admission_policy: AdmissionPolicy,
}

impl Default for ResourceSection {
    fn default() -> Self {
        let limits = ResourceLimits::default();
        Self {
            max_active_connections: limits.max_active_connections,
            max_bandwidth_per_second: limits.max_bandwidth_per_second,
            connection_pool_size: limits.connection_pool_size,
            admission_policy: limits.policy,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerSection {
    pub max_concurrent_operations: usize,
    pub default_timeout_ms: u64,
    pub default_max_retries: u32,
}

impl Default for ManagerSection {
    fn default() -> Self {
        Self {
            max_concurrent_operations: 32,
            default_timeout_ms: 30_000,
            default_max_retries: 3,
        }
    }
}

/// Complete network layer configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub circuit_breaker: CircuitBreakerSection,
    pub backoff: BackoffSection,
    pub resources: ResourceSection,
    pub manager: ManagerSection,
}

impl NetworkConfig {
    /// Parses a TOML document. The result is not validated.
    pub fn from_toml_str(contents: &str) -> NetworkResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Reads and validates a config file
    pub fn load(path: impl AsRef<Path>) -> NetworkResult<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let config = Self::from_toml_str(&contents)?;
        config.validate().map_err(NetworkError::InvalidConfig)?;

        log::info!("Loaded network config from {}", path.display());
        Ok(config)
    }

    pub fn to_toml_string(&self) -> NetworkResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Checks every value, returning all problems at once
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let cb = &self.circuit_breaker;
        let backoff = &self.backoff;
        let res = &self.resources;
        let mgr = &self.manager;

        let mut errors: Vec<ValidationError> = [
            at_least(cb.failure_threshold, 1, "circuit_breaker.failure_threshold"),
            at_least(cb.recovery_timeout_ms, 1, "circuit_breaker.recovery_timeout_ms"),
            at_least(cb.half_open_max_attempts, 1, "circuit_breaker.half_open_max_attempts"),
            at_least(backoff.max_delay_ms, backoff.base_delay_ms, "backoff.max_delay_ms"),
            at_least(res.max_active_connections, 1, "resources.max_active_connections"),
            at_least(res.max_bandwidth_per_second, 1, "resources.max_bandwidth_per_second"),
            at_least(
                res.connection_pool_size,
                res.max_active_connections,
                "resources.connection_pool_size",
            ),
            at_least(mgr.max_concurrent_operations, 1, "manager.max_concurrent_operations"),
            at_least(mgr.default_timeout_ms, 1, "manager.default_timeout_ms"),
        ]
        .into_iter()
        .flatten()
        .collect();

        // NaN fails both comparisons, so test for the accepted range
        if !(backoff.multiplier >= 1.0 && backoff.multiplier.is_finite()) {
            errors.push(ValidationError::with_value(
                "backoff.multiplier",
                "must be a finite number of at least 1.0",
                backoff.multiplier,
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        let cb = &self.circuit_breaker;
        CircuitBreakerConfig::new(cb.failure_threshold, Duration::from_millis(cb.recovery_timeout_ms))
            .with_half_open_max_attempts(cb.half_open_max_attempts)
    }

    pub fn backoff(&self) -> BackoffCalculator {
        let b = &self.backoff;
        BackoffCalculator::new(Duration::from_millis(b.base_delay_ms))
            .with_max_delay(Duration::from_millis(b.max_delay_ms))
            .with_multiplier(b.multiplier)
            .with_jitter(Duration::from_millis(b.jitter_ms))
    }

    pub fn resource_limits(&self) -> ResourceLimits {
        let r = &self.resources;
        ResourceLimits {
            max_active_connections: r.max_active_connections,
            max_bandwidth_per_second: r.max_bandwidth_per_second,
            connection_pool_size: r.connection_pool_size,
            policy: r.admission_policy,
        }
    }

    pub fn manager_config(&self) -> NetworkManagerConfig {
        NetworkManagerConfig {
            max_concurrent_operations: self.manager.max_concurrent_operations,
            circuit_breaker: self.circuit_breaker_config(),
            backoff: self.backoff(),
            resources: self.resource_limits(),
            default_timeout: Duration::from_millis(self.manager.default_timeout_ms),
            default_max_retries: self.manager.default_max_retries,
        }
    }
}
