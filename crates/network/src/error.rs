// crates/network/src/error.rs
//! Error types for network operations

use crate::config::ValidationError;
use breakwater_resilience::{Classify, ResilienceError};
use thiserror::Error;

/// Result type for network operations
pub type NetworkResult<T> = Result<T, NetworkError>;

/// Errors that can occur while wiring or probing the network layer
#[derive(Debug, Error)]
pub enum NetworkError {
    /// HTTP request error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file could not be parsed
    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Config could not be serialized
    #[error("Failed to serialize config: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    /// Config contains invalid values
    #[error("Invalid configuration: {}", join_errors(.0))]
    InvalidConfig(Vec<ValidationError>),

    /// Network unavailable
    #[error("Network is unavailable")]
    NetworkUnavailable,

    /// Resilience error
    #[error("Resilience error: {0}")]
    Resilience(#[from] ResilienceError),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl NetworkError {
    /// Returns true if the error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            NetworkError::Http(_) | NetworkError::NetworkUnavailable => true,
            NetworkError::Resilience(e) => e.is_transient(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_network_unavailable() {
        let err = NetworkError::NetworkUnavailable;
        assert!(err.to_string().contains("unavailable"));
    }

    #[test]
    fn test_invalid_config_lists_fields() {
        let err = NetworkError::InvalidConfig(vec![
            ValidationError::new("backoff.multiplier", "must be at least 1.0"),
            ValidationError::new("resources.max_active_connections", "must be positive"),
        ]);
        let message = err.to_string();
        assert!(message.contains("backoff.multiplier"));
        assert!(message.contains("resources.max_active_connections"));
    }

    #[test]
    fn test_retryable_errors() {
        assert!(NetworkError::NetworkUnavailable.is_retryable());
        assert!(NetworkError::Resilience(ResilienceError::Timeout(Duration::from_secs(1))).is_retryable());
        assert!(!NetworkError::Resilience(ResilienceError::Permanent("bad".into())).is_retryable());
        assert!(!NetworkError::InvalidConfig(Vec::new()).is_retryable());
    }
}
