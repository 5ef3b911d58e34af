//! Time provider abstraction.

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during time operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeError {
    /// The operation timed out.
    #[error("operation timed out")]
    Elapsed,
}

/// Provider trait for time operations.
///
/// Link tasks and the orchestrator put every deadline (connect, disconnect,
/// entrypoint) through this trait instead of calling tokio directly.
#[async_trait]
pub trait TimeProvider: Clone + Send + Sync + 'static {
    /// Run a future with a timeout.
    ///
    /// Returns `Ok(result)` if the future completes within the timeout,
    /// or `Err(TimeError::Elapsed)` if it times out.
    async fn timeout<F, T>(&self, duration: Duration, future: F) -> Result<T, TimeError>
    where
        F: Future<Output = T> + Send,
        T: Send;
}

/// Real time provider using Tokio's time facilities.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTimeProvider;

impl TokioTimeProvider {
    /// Create a new Tokio time provider.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TimeProvider for TokioTimeProvider {
    async fn timeout<F, T>(&self, duration: Duration, future: F) -> Result<T, TimeError>
    where
        F: Future<Output = T> + Send,
        T: Send,
    {
        tokio::time::timeout(duration, future)
            .await
            .map_err(|_| TimeError::Elapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_timeout_elapses() {
        let time = TokioTimeProvider::new();
        let result = time
            .timeout(Duration::from_millis(10), std::future::pending::<()>())
            .await;
        assert_eq!(result, Err(TimeError::Elapsed));
    }

    #[tokio::test]
    async fn test_timeout_passes_value_through() {
        let time = TokioTimeProvider::new();
        let result = time.timeout(Duration::from_secs(1), async { 7 }).await;
        assert_eq!(result, Ok(7));
    }
}
