//! Retry and backoff for transient API failures
//!
//! Retry behaviour is described by a plain data value, [`RetryPolicy`], so it
//! can be loaded from configuration and handed to any client without passing
//! closures around. Which failures are retried is decided by the error's
//! [`ErrorKind`], not by a caller-supplied predicate.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::defaults::{
    DEFAULT_MAX_RETRY_ATTEMPTS, DEFAULT_RETRY_BASE_DELAY, DEFAULT_RETRY_MAX_DELAY,
};
use crate::error::{ClusterscopeResult, ErrorKind};

/// Backoff strategy for retry operations
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay between every attempt
    Fixed,
    /// base * attempt, capped at max_delay
    Linear,
    /// base * 2^(attempt-1), capped at max_delay
    Exponential,
}

/// Data-driven retry policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt)
    pub max_attempts: u32,

    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,

    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,

    pub backoff: BackoffStrategy,

    /// Error kinds worth another attempt
    pub retry_on: Vec<ErrorKind>,

    /// Scale each delay by a random factor in 0.5..1.5
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RETRY_ATTEMPTS,
            base_delay: DEFAULT_RETRY_BASE_DELAY,
            max_delay: DEFAULT_RETRY_MAX_DELAY,
            backoff: BackoffStrategy::Exponential,
            retry_on: vec![ErrorKind::Transient],
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Fixed delay retry, no jitter
    pub fn fixed(attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: attempts,
            base_delay: delay,
            max_delay: delay,
            backoff: BackoffStrategy::Fixed,
            jitter: false,
            ..Default::default()
        }
    }

    pub fn is_retryable(&self, kind: ErrorKind) -> bool {
        self.retry_on.contains(&kind)
    }

    /// Delay before the attempt following `attempt` (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let delay = match self.backoff {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Linear => self.base_delay.saturating_mul(attempt),
            BackoffStrategy::Exponential => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                self.base_delay.saturating_mul(factor)
            }
        };
        let delay = std::cmp::min(delay, self.max_delay);

        if self.jitter {
            let factor = rand::thread_rng().gen_range(0.5..1.5);
            Duration::from_millis((delay.as_millis() as f64 * factor) as u64)
        } else {
            delay
        }
    }
}

/// Run `operation` under `policy`, sleeping between attempts
pub async fn retry<F, Fut, T>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> ClusterscopeResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ClusterscopeResult<T>>,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!("{} succeeded after {} attempts", operation_name, attempt);
                }
                return Ok(result);
            }
            Err(error) => {
                if attempt >= policy.max_attempts {
                    if policy.max_attempts > 1 {
                        debug!("{}: max retry attempts ({}) reached", operation_name, policy.max_attempts);
                    }
                    return Err(error);
                }

                if !policy.is_retryable(error.kind()) {
                    debug!("{}: error is not retryable: {}", operation_name, error);
                    return Err(error);
                }

                let delay = policy.delay(attempt);
                warn!(
                    "Retry attempt {}/{} for {} after error: {} (waiting {:?})",
                    attempt, policy.max_attempts, operation_name, error, delay
                );

                sleep(delay).await;
            }
        }
    }
}
