//! Requester side: a small state machine around one exchange at a time.
//!
//! ```text
//!  Init ──► Unavailable ──► Fill ──► Send ──► Wait ──► Available
//!              ▲  │                   │        │ └───► Cancel
//!              │  └──► Fini           │        │          │
//!              └──────────────────────┴────────┴──────────┘
//!                         (failure, cancel, next request)
//! ```
//!
//! Dropping an exchange future part way (a caller-side timeout, say) goes
//! through `Cancel` back to `Unavailable`, so the next request can run.

use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, watch};
use tracing::{debug, warn};

use super::{EntrypointReply, EntrypointRequest, EntrypointStatus};
use crate::error::{HaError, HaResult};
use crate::providers::TimeProvider;
use crate::transport::Session;

/// States of the entrypoint client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientState {
    /// Created, not started.
    Init,
    /// No valid reply held.
    Unavailable,
    /// Building the request.
    Fill,
    /// Handing the request to the transport.
    Send,
    /// Waiting for the reply.
    Wait,
    /// A successful reply is held.
    Available,
    /// The exchange was abandoned.
    Cancel,
    /// Stopped.
    Fini,
}

impl ClientState {
    fn can_move_to(self, next: ClientState) -> bool {
        use ClientState::*;
        matches!(
            (self, next),
            (Init, Unavailable)
                | (Unavailable, Fill)
                | (Unavailable, Fini)
                | (Fill, Send)
                | (Fill, Cancel)
                | (Send, Wait)
                | (Send, Cancel)
                | (Send, Unavailable)
                | (Wait, Available)
                | (Wait, Unavailable)
                | (Wait, Cancel)
                | (Available, Unavailable)
                | (Cancel, Unavailable)
        )
    }
}

/// Entrypoint client.
///
/// Exchanges are serialized: a second [`request`](Self::request) waits for
/// the first one to settle.
#[derive(Debug)]
pub struct EntrypointClient {
    state: watch::Sender<ClientState>,
    exchange: AsyncMutex<()>,
    last_reply: std::sync::Mutex<Option<EntrypointReply>>,
}

impl Default for EntrypointClient {
    fn default() -> Self {
        Self::new()
    }
}

impl EntrypointClient {
    /// Create a client in [`ClientState::Init`].
    pub fn new() -> Self {
        let (state, _) = watch::channel(ClientState::Init);
        Self {
            state,
            exchange: AsyncMutex::new(()),
            last_reply: std::sync::Mutex::new(None),
        }
    }

    /// Current state.
    pub fn state(&self) -> ClientState {
        *self.state.borrow()
    }

    /// Watch state changes.
    pub fn subscribe(&self) -> watch::Receiver<ClientState> {
        self.state.subscribe()
    }

    /// Last successful reply.
    pub fn last_reply(&self) -> Option<EntrypointReply> {
        self.last_reply
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn transition(&self, next: ClientState) -> HaResult<()> {
        let mut result = Ok(());
        self.state.send_if_modified(|current| {
            if current.can_move_to(next) {
                debug!(from = ?*current, to = ?next, "entrypoint client transition");
                *current = next;
                true
            } else {
                result = Err(HaError::InvalidTransition {
                    from: *current,
                    to: next,
                });
                false
            }
        });
        result
    }

    /// Leave `Init`.
    pub fn start(&self) -> HaResult<()> {
        self.transition(ClientState::Unavailable)
    }

    /// Move to `Fini`, dropping any held reply.
    pub async fn stop(&self) -> HaResult<()> {
        let _exchange = self.exchange.lock().await;
        if self.state() == ClientState::Available {
            self.transition(ClientState::Unavailable)?;
        }
        self.transition(ClientState::Fini)
    }

    /// Run one request/reply exchange over `session`.
    pub async fn request<T: TimeProvider>(
        &self,
        session: &dyn Session,
        request: EntrypointRequest,
        time: &T,
        timeout: Duration,
    ) -> HaResult<EntrypointReply> {
        let _exchange = self.exchange.lock().await;
        // Declared after the lock so it runs while the lock is still held.
        let _abandon = AbandonOnDrop { client: self };
        if self.state() == ClientState::Available {
            self.transition(ClientState::Unavailable)?;
        }
        self.transition(ClientState::Fill)?;
        debug!(
            endpoint = %session.endpoint(),
            first_request = request.first_request,
            generation = request.generation,
            "entrypoint request"
        );
        self.transition(ClientState::Send)?;
        self.transition(ClientState::Wait)?;

        let reply = match time.timeout(timeout, session.call_entrypoint(request)).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                warn!(endpoint = %session.endpoint(), error = %e, "entrypoint request failed");
                self.transition(ClientState::Unavailable)?;
                return Err(e.into());
            }
            Err(_) => {
                warn!(endpoint = %session.endpoint(), "entrypoint request timed out");
                self.transition(ClientState::Cancel)?;
                self.transition(ClientState::Unavailable)?;
                return Err(HaError::Timeout);
            }
        };

        let reason = match &reply.status {
            EntrypointStatus::Ok if reply.link_params.is_some() => None,
            EntrypointStatus::Ok => Some("reply without link parameters".to_string()),
            EntrypointStatus::Unavailable => Some("acceptor unavailable".to_string()),
            EntrypointStatus::Rejected(reason) => Some(reason.clone()),
        };
        if let Some(reason) = reason {
            self.transition(ClientState::Unavailable)?;
            return Err(HaError::Rejected(reason));
        }

        *self
            .last_reply
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(reply.clone());
        self.transition(ClientState::Available)?;
        Ok(reply)
    }
}

/// Settles an exchange whose future was dropped before it finished.
struct AbandonOnDrop<'a> {
    client: &'a EntrypointClient,
}

impl Drop for AbandonOnDrop<'_> {
    fn drop(&mut self) {
        let state = self.client.state();
        if matches!(
            state,
            ClientState::Fill | ClientState::Send | ClientState::Wait
        ) {
            warn!(?state, "entrypoint exchange abandoned");
            let _ = self.client.transition(ClientState::Cancel);
            let _ = self.client.transition(ClientState::Unavailable);
        }
    }
}
