//! In-process transport.
//!
//! Nodes sharing one [`LocalNetwork`] reach each other by address. Every
//! message and entrypoint exchange is encoded with a [`MessageCodec`] and
//! decoded on the far side, and each posted message is handled by its own
//! short-lived task, the way an RPC layer would.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::{trace, warn};

use super::{DeliveryStatus, InboundHandler, PostReceipt, Session, Transport};
use crate::codec::{JsonCodec, MessageCodec};
use crate::entrypoint::{EntrypointReply, EntrypointRequest};
use crate::error::TransportError;
use crate::message::Message;
use crate::providers::{TaskProvider, TokioTaskProvider};

#[derive(Default)]
struct LocalInner {
    listeners: RwLock<HashMap<String, Arc<dyn InboundHandler>>>,
    /// Addresses whose `open` never completes.
    blocked: RwLock<HashSet<String>>,
    posted: AtomicU64,
}

/// In-memory [`Transport`] connecting nodes of one process.
#[derive(Clone, Default)]
pub struct LocalNetwork<C: MessageCodec = JsonCodec> {
    inner: Arc<LocalInner>,
    codec: C,
    task: TokioTaskProvider,
}

impl LocalNetwork {
    /// Create an empty network using [`JsonCodec`].
    pub fn new() -> Self {
        Self::default()
    }
}

impl<C: MessageCodec> LocalNetwork<C> {
    /// Create an empty network with a custom codec.
    pub fn with_codec(codec: C) -> Self {
        Self {
            inner: Arc::new(LocalInner::default()),
            codec,
            task: TokioTaskProvider,
        }
    }

    /// Make `open` towards `address` hang until unblocked.
    pub fn block(&self, address: &str) {
        self.inner
            .blocked
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(address.to_string());
    }

    /// Undo [`block`](Self::block).
    pub fn unblock(&self, address: &str) {
        self.inner
            .blocked
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(address);
    }

    /// Whether something listens on `address`.
    pub fn is_listening(&self, address: &str) -> bool {
        self.handler(address).is_some()
    }

    /// Number of messages posted so far.
    pub fn posted_count(&self) -> u64 {
        self.inner.posted.load(Ordering::Relaxed)
    }

    fn is_blocked(&self, address: &str) -> bool {
        self.inner
            .blocked
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .contains(address)
    }

    fn handler(&self, address: &str) -> Option<Arc<dyn InboundHandler>> {
        self.inner
            .listeners
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(address)
            .cloned()
    }
}

#[async_trait]
impl<C: MessageCodec> Transport for LocalNetwork<C> {
    async fn open(&self, endpoint: &str) -> Result<Box<dyn Session>, TransportError> {
        if self.is_blocked(endpoint) {
            trace!(endpoint, "open blocked");
            std::future::pending::<()>().await;
        }
        if !self.is_listening(endpoint) {
            return Err(TransportError::ConnectionRefused {
                endpoint: endpoint.to_string(),
            });
        }
        Ok(Box::new(LocalSession {
            network: self.clone(),
            endpoint: endpoint.to_string(),
            closed: AtomicBool::new(false),
        }))
    }

    fn listen(
        &self,
        address: &str,
        handler: Arc<dyn InboundHandler>,
    ) -> Result<(), TransportError> {
        let mut listeners = self
            .inner
            .listeners
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if listeners.contains_key(address) {
            return Err(TransportError::AddressInUse {
                address: address.to_string(),
            });
        }
        listeners.insert(address.to_string(), handler);
        Ok(())
    }

    fn unlisten(&self, address: &str) {
        self.inner
            .listeners
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(address);
    }
}

struct LocalSession<C: MessageCodec> {
    network: LocalNetwork<C>,
    endpoint: String,
    closed: AtomicBool,
}

impl<C: MessageCodec> LocalSession<C> {
    fn target(&self) -> Result<Arc<dyn InboundHandler>, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        self.network
            .handler(&self.endpoint)
            .ok_or_else(|| TransportError::ConnectionRefused {
                endpoint: self.endpoint.clone(),
            })
    }
}

#[async_trait]
impl<C: MessageCodec> Session for LocalSession<C> {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn post(&self, msg: &Message) -> Result<PostReceipt, TransportError> {
        let handler = self.target()?;
        let codec = self.network.codec.clone();
        let bytes = codec
            .encode(msg)
            .map_err(|e| TransportError::Codec(e.to_string()))?;
        self.network.inner.posted.fetch_add(1, Ordering::Relaxed);

        let (replied_tx, replied) = oneshot::channel();
        let (released_tx, released) = oneshot::channel();
        self.network.task.spawn_task("incoming_dispatch", async move {
            match codec.decode::<Message>(&bytes) {
                Ok(msg) => {
                    let status: DeliveryStatus = handler.deliver(msg);
                    let _ = replied_tx.send(status);
                }
                Err(e) => warn!(error = %e, "dropping undecodable message"),
            }
            let _ = released_tx.send(());
        });
        Ok(PostReceipt { replied, released })
    }

    async fn call_entrypoint(
        &self,
        request: EntrypointRequest,
    ) -> Result<EntrypointReply, TransportError> {
        let handler = self.target()?;
        let codec = &self.network.codec;
        let codec_err = |e: crate::codec::CodecError| TransportError::Codec(e.to_string());

        let request: EntrypointRequest = codec
            .decode(&codec.encode(&request).map_err(codec_err)?)
            .map_err(codec_err)?;
        let reply = handler.entrypoint(request).await;
        codec
            .decode(&codec.encode(&reply).map_err(codec_err)?)
            .map_err(codec_err)
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(TransportError::Closed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entrypoint::EntrypointStatus;
    use crate::types::RequestId;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<Message>>,
    }

    #[async_trait]
    impl InboundHandler for Recorder {
        fn deliver(&self, msg: Message) -> DeliveryStatus {
            self.seen.lock().unwrap().push(msg);
            DeliveryStatus::Accepted
        }

        async fn entrypoint(&self, _request: EntrypointRequest) -> EntrypointReply {
            EntrypointReply::failed(RequestId::FIRST, EntrypointStatus::Unavailable)
        }
    }

    #[tokio::test]
    async fn test_open_unknown_address_is_refused() {
        let net = LocalNetwork::new();
        let err = net.open("nowhere").await.err();
        assert_eq!(
            err,
            Some(TransportError::ConnectionRefused {
                endpoint: "nowhere".into()
            })
        );
    }

    #[tokio::test]
    async fn test_listen_twice_is_refused() {
        let net = LocalNetwork::new();
        net.listen("a", Arc::new(Recorder::default())).unwrap();
        let err = net.listen("a", Arc::new(Recorder::default())).unwrap_err();
        assert_eq!(err, TransportError::AddressInUse { address: "a".into() });
        net.unlisten("a");
        assert!(!net.is_listening("a"));
    }

    #[tokio::test]
    async fn test_post_reaches_handler_and_replies() {
        let net = LocalNetwork::new();
        let recorder = Arc::new(Recorder::default());
        net.listen("b", recorder.clone()).unwrap();

        let session = net.open("b").await.unwrap();
        let receipt = session.post(&Message::new("hello")).unwrap();
        assert_eq!(receipt.replied.await.unwrap(), DeliveryStatus::Accepted);
        receipt.released.await.unwrap();

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].payload(), b"hello");
        assert_eq!(net.posted_count(), 1);
    }

    #[tokio::test]
    async fn test_closed_session_refuses_posts() {
        let net = LocalNetwork::new();
        net.listen("b", Arc::new(Recorder::default())).unwrap();
        let session = net.open("b").await.unwrap();
        session.close().await.unwrap();

        assert_eq!(
            session.post(&Message::new("x")).unwrap_err(),
            TransportError::Closed
        );
        assert_eq!(session.close().await, Err(TransportError::Closed));
    }

    #[tokio::test]
    async fn test_blocked_open_hangs() {
        let net = LocalNetwork::new();
        net.listen("b", Arc::new(Recorder::default())).unwrap();
        net.block("b");
        let attempt = tokio::time::timeout(std::time::Duration::from_millis(20), net.open("b")).await;
        assert!(attempt.is_err());

        net.unblock("b");
        assert!(net.open("b").await.is_ok());
    }
}
