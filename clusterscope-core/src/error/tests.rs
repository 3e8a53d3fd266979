//! Tests for error classification and conversions

use super::{ClusterscopeError, ErrorKind};
use std::time::Duration;

#[tokio::test]
async fn test_join_error_conversion() {
    async fn task_that_panics() -> Result<(), &'static str> {
        panic!("test panic");
    }

    async fn test_function() -> Result<(), ClusterscopeError> {
        let handle = tokio::spawn(task_that_panics());
        let _result = handle.await?;
        Ok(())
    }

    let result = test_function().await;
    match result {
        Err(ClusterscopeError::Internal { message }) => assert!(message.contains("Task panicked")),
        other => panic!("Expected Internal error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_timeout_error_conversion() {
    async fn test_function() -> Result<(), ClusterscopeError> {
        tokio::time::timeout(Duration::from_millis(1), tokio::time::sleep(Duration::from_secs(1))).await?;
        Ok(())
    }

    let result = test_function().await;
    assert!(matches!(result, Err(ClusterscopeError::Timeout { .. })));
}

#[test]
fn test_http_status_classification() {
    let forbidden = ClusterscopeError::HttpStatus {
        status: 403,
        path: "/nodes".to_string(),
    };
    assert_eq!(forbidden.kind(), ErrorKind::Authorization);
    assert!(forbidden.is_authorization());

    let unavailable = ClusterscopeError::HttpStatus {
        status: 503,
        path: "/nodes".to_string(),
    };
    assert_eq!(unavailable.kind(), ErrorKind::Transient);

    let missing = ClusterscopeError::HttpStatus {
        status: 404,
        path: "/nodes/pve1/status".to_string(),
    };
    assert_eq!(missing.kind(), ErrorKind::Structural);
}

#[test]
fn test_from_many() {
    assert!(ClusterscopeError::from_many("cycle", vec![]).is_none());

    let single = ClusterscopeError::from_many("cycle", vec![ClusterscopeError::internal("boom")]);
    assert!(matches!(single, Some(ClusterscopeError::Internal { .. })));

    let many = ClusterscopeError::from_many(
        "cycle",
        vec![
            ClusterscopeError::timeout("a", Duration::from_secs(5)),
            ClusterscopeError::internal("b"),
        ],
    )
    .unwrap();
    assert_eq!(many.kind(), ErrorKind::Transient);
    assert!(many.to_string().contains("1. Operation timed out"));
}
