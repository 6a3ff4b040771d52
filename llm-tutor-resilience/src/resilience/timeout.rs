//! Per-operation deadlines.
//!
//! A timed-out future is dropped, which cancels the in-flight call; the
//! unit of work is never left running in the background.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;

/// Timeout configuration
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Default timeout for all operations
    pub default: Duration,
    /// Operation-specific timeouts
    pub operation_specific: HashMap<String, Duration>,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            default: Duration::from_secs(30),
            operation_specific: HashMap::new(),
        }
    }
}

impl TimeoutConfig {
    pub fn new(default: Duration) -> Self {
        Self {
            default,
            operation_specific: HashMap::new(),
        }
    }

    pub fn with_operation(mut self, operation: impl Into<String>, timeout: Duration) -> Self {
        self.operation_specific.insert(operation.into(), timeout);
        self
    }

    pub fn get_timeout(&self, operation: &str) -> Duration {
        self.operation_specific
            .get(operation)
            .copied()
            .unwrap_or(self.default)
    }
}

#[derive(Debug, Error)]
pub enum TimeoutError<E> {
    #[error("Operation timed out after {elapsed:?}")]
    Elapsed { elapsed: Duration },

    #[error("Operation failed: {0}")]
    Inner(E),
}

/// Race `future` against `duration`, dropping it if the timer wins.
pub async fn with_timeout<F, T, E>(duration: Duration, future: F) -> Result<T, TimeoutError<E>>
where
    F: Future<Output = Result<T, E>>,
{
    match timeout(duration, future).await {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(e)) => Err(TimeoutError::Inner(e)),
        Err(_) => Err(TimeoutError::Elapsed { elapsed: duration }),
    }
}
