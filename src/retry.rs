//! Bounded retry for fallible device operations.
//
// Serial buses drop frames now and then; one lost reply should not cost a whole sample.
// Attempts and pause are fixed. The filter decides which error kinds get another try.

use crate::error::{AppResult, ErrorKind, LoggerError};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Which failures are retried.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorFilter {
    /// Retry every failure
    #[default]
    All,
    /// Retry only these kinds; anything else propagates immediately
    Kinds(Vec<ErrorKind>),
}

impl ErrorFilter {
    /// Retry only transient line faults.
    pub fn communication() -> Self {
        ErrorFilter::Kinds(vec![ErrorKind::Communication])
    }

    /// Whether `err` should be retried.
    pub fn matches(&self, err: &LoggerError) -> bool {
        match self {
            ErrorFilter::All => true,
            ErrorFilter::Kinds(kinds) => kinds.contains(&err.kind()),
        }
    }
}

/// Defines a policy for retrying an operation.
///
/// # Example
///
/// ```rust
/// use sheet_logger::retry::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::default();
/// assert_eq!(policy.max_attempts, 3);
/// assert_eq!(policy.backoff, Duration::from_millis(50));
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero behaves like one.
    pub max_attempts: u32,

    /// Constant pause between attempts.
    pub backoff: Duration,

    /// Which failures are worth another attempt.
    pub filter: ErrorFilter,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(50),
            filter: ErrorFilter::All,
        }
    }
}

impl RetryPolicy {
    /// Policy with the given attempt count and backoff, retrying everything.
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
            filter: ErrorFilter::All,
        }
    }

    /// Restrict retries to `filter`.
    pub fn with_filter(mut self, filter: ErrorFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Run `operation` under this policy.
    ///
    /// Matching failures are retried after `backoff` until only one attempt is left; that last
    /// attempt's outcome is returned as-is. Non-matching failures are returned at once.
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> AppResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let attempts = self.max_attempts.max(1);
        for attempt in 1..attempts {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if self.filter.matches(&err) => {
                    tracing::debug!(attempt, max_attempts = attempts, error = %err, "Retrying after failure");
                    sleep(self.backoff).await;
                }
                Err(err) => return Err(err),
            }
        }
        operation().await
    }
}
