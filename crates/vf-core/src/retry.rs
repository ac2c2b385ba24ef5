//! Retry policy for transient queue and connectivity failures.
//!
//! The policy is a plain value handed to the call site; nothing is retried
//! implicitly. Only errors for which [`crate::Error::is_transient`] holds are
//! retried, so encoder failures always surface on the first attempt.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Fixed-backoff retry configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of retries (not counting the initial attempt).
    pub max_retries: u32,
    /// Delay between attempts, in milliseconds.
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_ms: 5_000,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            backoff_ms: 0,
        }
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

/// Run `op` until it succeeds, fails permanently, or the policy is exhausted.
pub async fn retry_transient<T, F, Fut>(policy: &RetryPolicy, op_name: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_retries => {
                attempt += 1;
                tracing::warn!(
                    op = op_name,
                    attempt,
                    max = policy.max_retries,
                    delay_ms = policy.backoff_ms,
                    error = %err,
                    "Retrying after transient error"
                );
                tokio::time::sleep(policy.backoff()).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Blocking counterpart of [`retry_transient`] for synchronous database work.
pub fn retry_transient_blocking<T>(
    policy: &RetryPolicy,
    op_name: &str,
    mut op: impl FnMut() -> Result<T>,
) -> Result<T> {
    let mut attempt = 0u32;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_retries => {
                attempt += 1;
                tracing::warn!(
                    op = op_name,
                    attempt,
                    max = policy.max_retries,
                    error = %err,
                    "Retrying after transient error"
                );
                std::thread::sleep(policy.backoff());
            }
            Err(err) => return Err(err),
        }
    }
}
