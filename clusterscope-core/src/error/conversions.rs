//! Error conversion implementations for ClusterscopeError
//!
//! This module provides From trait implementations for converting
//! external error types into ClusterscopeError variants.

use super::types::ClusterscopeError;

// HTTP client errors
impl From<reqwest::Error> for ClusterscopeError {
    fn from(err: reqwest::Error) -> Self {
        let address = err
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "unknown".to_string());

        if err.is_timeout() {
            return ClusterscopeError::Timeout {
                operation: format!("request to {}", address),
                duration: std::time::Duration::ZERO,
            };
        }

        if let Some(status) = err.status() {
            let path = err
                .url()
                .map(|u| u.path().to_string())
                .unwrap_or_default();
            return ClusterscopeError::HttpStatus {
                status: status.as_u16(),
                path,
            };
        }

        if err.is_decode() {
            return ClusterscopeError::unexpected_shape(address, format!("decodable body ({})", err));
        }

        ClusterscopeError::ConnectionError {
            address,
            details: err.to_string(),
        }
    }
}

// Serialization errors
impl From<serde_json::Error> for ClusterscopeError {
    fn from(err: serde_json::Error) -> Self {
        ClusterscopeError::JsonError(Box::new(err))
    }
}

impl From<toml::de::Error> for ClusterscopeError {
    fn from(err: toml::de::Error) -> Self {
        ClusterscopeError::configuration("toml", err.to_string())
    }
}

// IO errors
impl From<std::io::Error> for ClusterscopeError {
    fn from(err: std::io::Error) -> Self {
        ClusterscopeError::IoError(Box::new(err))
    }
}

impl From<url::ParseError> for ClusterscopeError {
    fn from(err: url::ParseError) -> Self {
        ClusterscopeError::configuration("url", err.to_string())
    }
}

// Task errors
impl From<tokio::task::JoinError> for ClusterscopeError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_panic() {
            ClusterscopeError::Internal {
                message: format!("Task panicked: {}", err),
            }
        } else {
            ClusterscopeError::Internal {
                message: format!("Task cancelled: {}", err),
            }
        }
    }
}

impl From<tokio::time::error::Elapsed> for ClusterscopeError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        ClusterscopeError::Timeout {
            operation: "async_operation".to_string(),
            duration: std::time::Duration::ZERO,
        }
    }
}
