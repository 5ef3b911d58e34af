//! Incoming dispatch: routes one inbound message to its link.
//!
//! The transport runs this once per arriving message, in its own
//! short-lived task, and sends the returned [`DeliveryStatus`] back to the
//! sender as the reply.

use async_trait::async_trait;
use tracing::warn;

use crate::entrypoint::{EntrypointReply, EntrypointRequest, EntrypointStatus};
use crate::message::Message;
use crate::registry::LinkRegistry;
use crate::transport::{DeliveryStatus, InboundHandler};
use crate::types::RequestId;

/// Deposit `msg` into the inbound queue of the link it is addressed to.
///
/// Unknown destinations are answered [`DeliveryStatus::NoSuchLink`] and
/// leave the registry untouched; the sender is expected to reconnect.
pub fn dispatch_incoming(registry: &LinkRegistry, msg: Message) -> DeliveryStatus {
    match registry.find(&msg.link_id) {
        Some(link) => link.deliver_incoming(msg),
        None => {
            warn!(link = %msg.link_id, tag = msg.tag, "message for unknown link");
            DeliveryStatus::NoSuchLink
        }
    }
}

/// [`InboundHandler`] serving links only.
///
/// Entrypoint requests are answered `Unavailable`; use an
/// [`HaNode`](crate::HaNode) to accept links.
#[derive(Debug, Clone)]
pub struct RegistryHandler {
    registry: LinkRegistry,
}

impl RegistryHandler {
    /// Handler routing into `registry`.
    pub fn new(registry: LinkRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl InboundHandler for RegistryHandler {
    fn deliver(&self, msg: Message) -> DeliveryStatus {
        dispatch_incoming(&self.registry, msg)
    }

    async fn entrypoint(&self, _request: EntrypointRequest) -> EntrypointReply {
        EntrypointReply::failed(RequestId::default(), EntrypointStatus::Unavailable)
    }
}
