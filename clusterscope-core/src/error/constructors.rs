//! Constructor methods and convenience functions for ClusterscopeError

use super::types::ClusterscopeError;
use std::time::Duration;

impl ClusterscopeError {
    /// Create a configuration error with component and message
    ///
    /// # Examples
    /// ```rust
    /// use clusterscope_core::error::ClusterscopeError;
    ///
    /// let err = ClusterscopeError::configuration("endpoints.pve", "duplicate endpoint id");
    /// ```
    pub fn configuration(component: impl Into<String>, message: impl Into<String>) -> Self {
        ClusterscopeError::ConfigurationError {
            component: component.into(),
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        ClusterscopeError::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    pub fn connection(address: impl Into<String>, details: impl Into<String>) -> Self {
        ClusterscopeError::ConnectionError {
            address: address.into(),
            details: details.into(),
        }
    }

    /// The response decoded fine but did not have the expected structure
    pub fn unexpected_shape(path: impl Into<String>, expected: impl Into<String>) -> Self {
        ClusterscopeError::UnexpectedShape {
            path: path.into(),
            expected: expected.into(),
        }
    }

    pub fn contract(instance: impl Into<String>, message: impl Into<String>) -> Self {
        ClusterscopeError::Contract {
            instance: instance.into(),
            message: message.into(),
        }
    }

    pub fn endpoint_not_found(endpoint_id: impl Into<String>) -> Self {
        ClusterscopeError::EndpointNotFound {
            endpoint_id: endpoint_id.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ClusterscopeError::Internal {
            message: message.into(),
        }
    }

    /// Collapse a list of errors into one, or `None` when the list is empty
    pub fn from_many(context: impl Into<String>, mut errors: Vec<ClusterscopeError>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(ClusterscopeError::Multiple {
                context: context.into(),
                errors,
            }),
        }
    }
}
