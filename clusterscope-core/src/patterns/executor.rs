//! Bounded concurrency executor
//!
//! Caps the number of simultaneous outbound requests against a collection of
//! endpoints. Work beyond the cap waits on a fair semaphore, so queued tasks
//! start in FIFO order. Every task reports its own outcome; one failure never
//! cancels its siblings.

use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::error::{ClusterscopeError, ClusterscopeResult};

#[derive(Debug, Clone)]
pub struct BoundedExecutor {
    semaphore: Arc<Semaphore>,
    limit: usize,
}

impl BoundedExecutor {
    /// Create an executor allowing at most `limit` tasks in flight
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Run a single task once a slot is free
    pub async fn run<Fut, T>(&self, task: Fut) -> ClusterscopeResult<T>
    where
        Fut: Future<Output = ClusterscopeResult<T>>,
    {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| ClusterscopeError::internal(format!("Semaphore acquire failed: {}", e)))?;
        task.await
    }

    /// Map every item through `f` with bounded parallelism
    ///
    /// Results come back in input order, each carrying its own success or
    /// failure.
    pub async fn run_all<I, F, Fut, T>(&self, items: I, f: F) -> Vec<ClusterscopeResult<T>>
    where
        I: IntoIterator,
        F: Fn(I::Item) -> Fut,
        Fut: Future<Output = ClusterscopeResult<T>>,
    {
        let tasks = items.into_iter().map(|item| self.run(f(item)));
        join_all(tasks).await
    }
}

/// Split settled results into successes and failures
pub fn partition_results<T>(
    results: Vec<ClusterscopeResult<T>>,
) -> (Vec<T>, Vec<ClusterscopeError>) {
    let mut successes = Vec::new();
    let mut errors = Vec::new();

    for result in results {
        match result {
            Ok(value) => successes.push(value),
            Err(error) => errors.push(error),
        }
    }

    (successes, errors)
}
