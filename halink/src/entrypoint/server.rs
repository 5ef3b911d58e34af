//! Acceptor side: tracks entrypoint requests until they are replied.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;
use tracing::debug;

use super::{EntrypointReply, EntrypointStatus};
use crate::error::{HaError, HaResult};
use crate::types::RequestId;

#[derive(Debug)]
struct ServerState {
    running: bool,
    next_id: RequestId,
    pending: HashMap<RequestId, oneshot::Sender<EntrypointReply>>,
}

/// Registry of in-progress entrypoint requests.
///
/// Each request gets a [`RequestId`] on arrival; the reply is routed back
/// through that id exactly once.
#[derive(Debug)]
pub struct EntrypointServer {
    state: Mutex<ServerState>,
}

impl Default for EntrypointServer {
    fn default() -> Self {
        Self::new()
    }
}

impl EntrypointServer {
    /// Create a stopped server.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ServerState {
                running: false,
                next_id: RequestId::FIRST,
                pending: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ServerState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Start accepting requests.
    pub fn start(&self) {
        self.lock().running = true;
    }

    /// Stop accepting requests. Pending ones are answered `Unavailable`.
    pub fn stop(&self) {
        let pending: Vec<_> = {
            let mut state = self.lock();
            state.running = false;
            state.pending.drain().collect()
        };
        for (id, tx) in pending {
            debug!(request = %id, "cancelling pending entrypoint request");
            let _ = tx.send(EntrypointReply::failed(id, EntrypointStatus::Unavailable));
        }
    }

    /// Whether requests are accepted.
    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    /// Track a new request. The receiver resolves with its reply.
    pub fn register(&self) -> HaResult<(RequestId, oneshot::Receiver<EntrypointReply>)> {
        let mut state = self.lock();
        if !state.running {
            return Err(HaError::NotStarted);
        }
        let id = state.next_id;
        state.next_id = id.next();
        let (tx, rx) = oneshot::channel();
        state.pending.insert(id, tx);
        Ok((id, rx))
    }

    /// Reply to a tracked request. Replying twice is an error.
    pub fn reply(&self, id: RequestId, mut reply: EntrypointReply) -> HaResult<()> {
        let tx = self
            .lock()
            .pending
            .remove(&id)
            .ok_or(HaError::UnknownRequest { id })?;
        reply.request_id = id;
        // The requester may have given up already.
        let _ = tx.send(reply);
        Ok(())
    }

    /// Number of requests waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LinkId, LinkParams};

    #[test]
    fn test_register_requires_running_server() {
        let server = EntrypointServer::new();
        assert_eq!(server.register().unwrap_err(), HaError::NotStarted);
    }

    #[tokio::test]
    async fn test_ids_start_at_first_and_increase() {
        let server = EntrypointServer::new();
        server.start();
        let (a, _rx_a) = server.register().unwrap();
        let (b, _rx_b) = server.register().unwrap();
        assert_eq!(a, RequestId::FIRST);
        assert_eq!(b, RequestId::FIRST.next());
        assert_eq!(server.pending_count(), 2);
    }

    #[tokio::test]
    async fn test_reply_reaches_request_once() {
        let server = EntrypointServer::new();
        server.start();
        let (id, rx) = server.register().unwrap();

        let params = LinkParams::new(LinkId::new(1, 1), LinkId::new(1, 2), LinkId::new(0, 1), false);
        server
            .reply(id, EntrypointReply::ok(RequestId::default(), params))
            .unwrap();

        let reply = rx.await.unwrap();
        assert_eq!(reply.request_id, id);
        assert_eq!(reply.link_params, Some(params));
        assert_eq!(server.pending_count(), 0);

        let again = server.reply(id, EntrypointReply::ok(id, params));
        assert_eq!(again, Err(HaError::UnknownRequest { id }));
    }

    #[tokio::test]
    async fn test_stop_cancels_pending() {
        let server = EntrypointServer::new();
        server.start();
        let (_, rx) = server.register().unwrap();
        server.stop();

        let reply = rx.await.unwrap();
        assert_eq!(reply.status, EntrypointStatus::Unavailable);
        assert!(!server.is_running());
    }
}
