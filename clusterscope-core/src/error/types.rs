//! Core error types for Clusterscope
//!
//! This module contains the main ClusterscopeError enum with all error variants
//! and associated type aliases for Result types.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Comprehensive error type for Clusterscope operations
#[derive(Error, Debug)]
pub enum ClusterscopeError {
    // Operational Errors
    #[error("Operation timed out: {operation} after {duration:?}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    #[error("Connection error to {address}: {details}")]
    ConnectionError { address: String, details: String },

    #[error("Request to {path} returned HTTP {status}")]
    HttpStatus { status: u16, path: String },

    #[error("Authorization failed for endpoint {endpoint}: {message}")]
    Authorization { endpoint: String, message: String },

    // Structural Errors
    #[error("Unexpected response shape from {path}: expected {expected}")]
    UnexpectedShape { path: String, expected: String },

    #[error("JSON error: {0}")]
    JsonError(#[from] Box<serde_json::Error>),

    // Configuration Errors
    #[error("Configuration error in {component}: {message}")]
    ConfigurationError { component: String, message: String },

    #[error("Endpoint not found: {endpoint_id}")]
    EndpointNotFound { endpoint_id: String },

    // Contract Errors
    #[error("Contract violated for {instance}: {message}")]
    Contract { instance: String, message: String },

    // IO & Internal
    #[error("IO error: {0}")]
    IoError(#[from] Box<std::io::Error>),

    #[error("Internal error: {message}")]
    Internal { message: String },

    // Multiple Errors
    #[error("Multiple errors in {context}: {}", format_errors(.errors))]
    Multiple {
        context: String,
        errors: Vec<ClusterscopeError>,
    },
}

/// Coarse classification used for retry decisions and log severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network failures, timeouts and server-side (5xx) errors
    Transient,
    /// The remote answered, but not with what we expected
    Structural,
    /// 401/403: the operator needs to fix credentials or permissions
    Authorization,
    /// Programming/contract errors; abort a single archive instance
    Contract,
    Configuration,
}

impl ClusterscopeError {
    /// Classify this error into the discovery error taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClusterscopeError::Timeout { .. } | ClusterscopeError::ConnectionError { .. } => {
                ErrorKind::Transient
            }
            ClusterscopeError::HttpStatus { status, .. } => match *status {
                401 | 403 => ErrorKind::Authorization,
                s if s >= 500 => ErrorKind::Transient,
                _ => ErrorKind::Structural,
            },
            ClusterscopeError::Authorization { .. } => ErrorKind::Authorization,
            ClusterscopeError::UnexpectedShape { .. } | ClusterscopeError::JsonError(_) => {
                ErrorKind::Structural
            }
            ClusterscopeError::ConfigurationError { .. } => ErrorKind::Configuration,
            ClusterscopeError::EndpointNotFound { .. } | ClusterscopeError::Contract { .. } => {
                ErrorKind::Contract
            }
            ClusterscopeError::IoError(_) => ErrorKind::Transient,
            ClusterscopeError::Internal { .. } => ErrorKind::Contract,
            ClusterscopeError::Multiple { errors, .. } => errors
                .first()
                .map(|e| e.kind())
                .unwrap_or(ErrorKind::Contract),
        }
    }

    /// True if this error points at a configuration problem the operator must fix
    pub fn is_authorization(&self) -> bool {
        self.kind() == ErrorKind::Authorization
    }
}

// Helper function to format multiple errors
pub fn format_errors(errors: &[ClusterscopeError]) -> String {
    errors
        .iter()
        .enumerate()
        .map(|(i, e)| format!("{}. {}", i + 1, e))
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, ClusterscopeError>;
pub type ClusterscopeResult<T> = Result<T>;
