//! Transport interfaces consumed by links and the orchestrator.
//!
//! The transport owns connection establishment and wire encoding. A link
//! only needs to open a [`Session`] towards its peer, post one message at a
//! time on it and learn, through a [`PostReceipt`], when the peer replied
//! and when the outbound buffer may be reused.
//!
//! ```text
//!   Link task                       Transport                    Peer node
//!   ─────────                       ─────────                    ─────────
//!   open(endpoint) ───────────────► Session
//!   post(&msg) ───────────────────► encode ──────────────────► InboundHandler::deliver
//!        ◄── receipt.replied ◄───── DeliveryStatus ◄──────────────────┘
//!        ◄── receipt.released
//!   close() ──────────────────────►
//! ```

mod local;

pub use local::LocalNetwork;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::entrypoint::{EntrypointReply, EntrypointRequest};
use crate::error::TransportError;
use crate::message::Message;

/// Receiver's verdict on one posted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryStatus {
    /// Enqueued into the destination link's inbound queue.
    Accepted,
    /// No link with the destination id is registered on the receiver.
    NoSuchLink,
    /// The destination link's inbound queue is at capacity.
    QueueFull,
}

/// Completion signals of one posted message.
#[derive(Debug)]
pub struct PostReceipt {
    /// Resolves with the receiver's verdict. A dropped sender means the
    /// reply was lost.
    pub replied: oneshot::Receiver<DeliveryStatus>,
    /// Resolves once the transport no longer needs the outbound buffer.
    pub released: oneshot::Receiver<()>,
}

/// An open session towards one remote endpoint.
#[async_trait]
pub trait Session: Send + Sync {
    /// Remote endpoint of this session.
    fn endpoint(&self) -> &str;

    /// Hand one message to the transport. Must not block: the caller may
    /// hold a link lock.
    fn post(&self, msg: &Message) -> Result<PostReceipt, TransportError>;

    /// Perform an entrypoint request/reply exchange.
    async fn call_entrypoint(
        &self,
        request: EntrypointRequest,
    ) -> Result<EntrypointReply, TransportError>;

    /// Close the session.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Receiving side of a node, registered with [`Transport::listen`].
#[async_trait]
pub trait InboundHandler: Send + Sync {
    /// Route one inbound message to its link.
    fn deliver(&self, msg: Message) -> DeliveryStatus;

    /// Answer an entrypoint request.
    async fn entrypoint(&self, request: EntrypointRequest) -> EntrypointReply;
}

/// Session factory and listener registry.
#[async_trait]
pub trait Transport: Clone + Send + Sync + 'static {
    /// Open a session to `endpoint`.
    async fn open(&self, endpoint: &str) -> Result<Box<dyn Session>, TransportError>;

    /// Start serving `address` with `handler`.
    fn listen(&self, address: &str, handler: Arc<dyn InboundHandler>)
    -> Result<(), TransportError>;

    /// Stop serving `address`. Unknown addresses are ignored.
    fn unlisten(&self, address: &str);
}
