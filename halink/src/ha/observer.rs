//! Callbacks fired by an [`HaNode`](super::HaNode) on link lifecycle events.

use crate::entrypoint::EntrypointRequest;
use crate::link::Link;
use crate::types::{LinkId, RequestId};

/// Which of the node's lists a link belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkDirection {
    /// Created on this node by an entrypoint request from a peer.
    Incoming,
    /// Created on this node by [`HaNode::connect`](super::HaNode::connect).
    Outgoing,
}

/// Observer of node events. Every method defaults to doing nothing.
///
/// Callbacks run inline on the task that triggered them and must not block.
pub trait HaObserver: Send + Sync {
    /// An entrypoint request arrived and was given `id`.
    fn entrypoint_request(&self, _id: RequestId, _request: &EntrypointRequest) {}

    /// A link was created and started.
    fn link_connected(&self, _link: &Link, _direction: LinkDirection) {}

    /// An existing link was matched by a reconnecting peer.
    fn link_reused(&self, _link: &Link) {}

    /// A link is about to be stopped.
    fn link_is_disconnecting(&self, _link: &Link) {}

    /// A link was stopped and released.
    fn link_disconnected(&self, _id: LinkId, _direction: LinkDirection) {}
}

/// Observer that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl HaObserver for NoopObserver {}
