//! Task spawning abstraction.

use std::future::Future;

/// Provider trait for spawning background tasks.
///
/// One task is spawned per link and one per inbound message; `name` only
/// feeds tracing.
pub trait TaskProvider: Clone + Send + Sync + 'static {
    /// Spawn a named task.
    fn spawn_task<F>(&self, name: &str, future: F) -> tokio::task::JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static;
}

/// Task provider running on the ambient Tokio runtime.
#[derive(Clone, Debug, Default)]
pub struct TokioTaskProvider;

impl TaskProvider for TokioTaskProvider {
    fn spawn_task<F>(&self, name: &str, future: F) -> tokio::task::JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let task_name = name.to_string();
        tokio::spawn(async move {
            tracing::trace!("Task {} starting", task_name);
            future.await;
            tracing::trace!("Task {} completed", task_name);
        })
    }
}
