//! # halink
//!
//! Reliable, ordered, point-to-point message links between cluster nodes,
//! and the orchestrator that sets them up.
//!
//! ## Overview
//!
//! ```text
//! ┌────────────────── HaNode ──────────────────┐
//! │  EntrypointClient      EntrypointServer    │
//! │        │                      │            │
//! │  outgoing links         incoming links     │
//! │        └────── LinkRegistry ──┘            │
//! └───────────────────────┬────────────────────┘
//!                         │ Transport (sessions, listen)
//! ┌───────────────────────┴────────────────────┐
//! │ Link: outbound → in-flight → delivered /   │
//! │       not-delivered; inbound ← dispatch    │
//! └────────────────────────────────────────────┘
//! ```
//!
//! - [`Link`]: four message queues, a tag counter and a task that
//!   transmits one message at a time. Tags on one end are all even or all
//!   odd, so the two ends never collide.
//! - [`dispatch_incoming`]: routes an inbound message to its link by id.
//! - [`HaNode`]: runs the entrypoint handshake that hands out link ids,
//!   keeps incoming and outgoing links, and tears them down.
//! - [`Transport`]: the session layer a link runs on; [`LocalNetwork`] is an
//!   in-process implementation.
//!
//! ## Example
//!
//! ```rust,no_run
//! use halink::{HaConfig, HaNode, LocalNetwork, Message, TokioProviders};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let network = LocalNetwork::new();
//! let a = HaNode::new(HaConfig::new("a"), TokioProviders::new(network.clone()));
//! let b = HaNode::new(HaConfig::new("b"), TokioProviders::new(network));
//! a.start()?;
//! b.start()?;
//!
//! let link = a.connect("b").await?;
//! let tag = link.send(Message::new("ping"))?;
//! link.wait_delivery(tag).await?;
//! assert_eq!(link.delivered_consume(), Some(tag));
//!
//! a.stop().await?;
//! b.stop().await?;
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

pub mod codec;
pub mod config;
pub mod dispatch;
pub mod entrypoint;
pub mod error;
pub mod ha;
pub mod link;
pub mod message;
pub mod providers;
pub mod queue;
pub mod registry;
pub mod transport;
pub mod types;

pub use codec::{CodecError, JsonCodec, MessageCodec};
pub use config::{HaConfig, LinkConfig, LinkConnCfg, QueueConfig};
pub use dispatch::{RegistryHandler, dispatch_incoming};
pub use entrypoint::{
    ClientState, EntrypointClient, EntrypointReply, EntrypointRequest, EntrypointServer,
    EntrypointStatus,
};
pub use error::{HaError, HaResult, LinkError, LinkResult, TransportError};
pub use ha::{HaNode, HaObserver, LinkCtx, LinkDirection, NoopObserver};
pub use link::{Link, LinkPhase, LinkStats};
pub use message::Message;
pub use providers::{
    Providers, RandomProvider, SeededRandomProvider, TaskProvider, TimeError, TimeProvider,
    TokioProviders, TokioRandomProvider, TokioTaskProvider, TokioTimeProvider,
};
pub use queue::{MessageQueue, QueueKind};
pub use registry::LinkRegistry;
pub use transport::{
    DeliveryStatus, InboundHandler, LocalNetwork, PostReceipt, Session, Transport,
};
pub use types::{LinkId, LinkParams, RequestId, TAG_INVALID, Tag};
