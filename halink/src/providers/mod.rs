//! Provider bundle for the runtime services a node consumes.
//!
//! Links and the orchestrator never talk to tokio or to a concrete network
//! directly. They go through four providers bundled behind [`Providers`]:
//!
//! ```text
//! Providers
//!   ├── Transport  (open sessions, listen)
//!   ├── Time       (deadlines)
//!   ├── Task       (spawn link / dispatch tasks)
//!   └── Random     (node incarnation id)
//! ```

mod random;
mod task;
mod time;

pub use random::{RandomProvider, SeededRandomProvider, TokioRandomProvider};
pub use task::{TaskProvider, TokioTaskProvider};
pub use time::{TimeError, TimeProvider, TokioTimeProvider};

use crate::transport::Transport;

/// Bundle of all provider types for a runtime environment.
pub trait Providers: Clone + Send + Sync + 'static {
    /// Transport used for entrypoint exchanges and link sessions.
    type Transport: Transport;

    /// Time provider type for deadlines.
    type Time: TimeProvider;

    /// Task provider type for spawning tasks.
    type Task: TaskProvider;

    /// Random provider type.
    type Random: RandomProvider;

    /// Get the transport instance.
    fn transport(&self) -> &Self::Transport;

    /// Get the time provider instance.
    fn time(&self) -> &Self::Time;

    /// Get the task provider instance.
    fn task(&self) -> &Self::Task;

    /// Get the random provider instance.
    fn random(&self) -> &Self::Random;
}

/// Tokio-backed providers over an arbitrary transport.
///
/// ```rust
/// use halink::{LocalNetwork, Providers, TokioProviders};
///
/// let providers = TokioProviders::new(LocalNetwork::new());
/// let _network: &LocalNetwork = providers.transport();
/// ```
#[derive(Clone)]
pub struct TokioProviders<T: Transport> {
    transport: T,
    time: TokioTimeProvider,
    task: TokioTaskProvider,
    random: TokioRandomProvider,
}

impl<T: Transport> TokioProviders<T> {
    /// Create a providers bundle around `transport`.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            time: TokioTimeProvider::new(),
            task: TokioTaskProvider,
            random: TokioRandomProvider,
        }
    }
}

impl<T: Transport> Providers for TokioProviders<T> {
    type Transport = T;
    type Time = TokioTimeProvider;
    type Task = TokioTaskProvider;
    type Random = TokioRandomProvider;

    fn transport(&self) -> &Self::Transport {
        &self.transport
    }

    fn time(&self) -> &Self::Time {
        &self.time
    }

    fn task(&self) -> &Self::Task {
        &self.task
    }

    fn random(&self) -> &Self::Random {
        &self.random
    }
}
