//! Error types for links, transports and the connection orchestrator.

use thiserror::Error;

use crate::entrypoint::ClientState;
use crate::queue::QueueKind;
use crate::types::{LinkId, RequestId};

/// Errors that can occur during link operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// A bounded queue reached its capacity.
    #[error("{queue} queue is full (capacity {capacity})")]
    QueueFull {
        /// The queue that refused the message.
        queue: QueueKind,
        /// Its configured capacity.
        capacity: usize,
    },

    /// The link could not reach its peer.
    #[error("link {id} failed: {reason}")]
    Failed {
        /// The failed link.
        id: LinkId,
        /// Transport failure description.
        reason: String,
    },

    /// The link was stopped before the awaited event happened.
    #[error("link {id} stopped")]
    Stopped {
        /// The stopped link.
        id: LinkId,
    },

    /// Another link already uses this id in the registry.
    #[error("link {id} is already registered")]
    AlreadyRegistered {
        /// The duplicate id.
        id: LinkId,
    },

    /// Operation not allowed in the link's current lifecycle state.
    #[error("invalid link state: {0}")]
    InvalidState(String),
}

/// Result type for link operations.
pub type LinkResult<T> = Result<T, LinkError>;

/// Errors reported by a [`Transport`](crate::Transport) implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Nobody listens on the endpoint.
    #[error("connection to {endpoint} refused")]
    ConnectionRefused {
        /// Endpoint that refused.
        endpoint: String,
    },

    /// Address already has a listener.
    #[error("address {address} is already in use")]
    AddressInUse {
        /// Contested address.
        address: String,
    },

    /// The session was closed.
    #[error("session closed")]
    Closed,

    /// Serialization failure on the wire.
    #[error("codec error: {0}")]
    Codec(String),
}

/// Errors that can occur during orchestrator and entrypoint operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HaError {
    /// The node has not been started, or was stopped.
    #[error("node is not started")]
    NotStarted,

    /// The entrypoint exchange did not complete in time.
    #[error("entrypoint request timed out")]
    Timeout,

    /// The acceptor refused the entrypoint request.
    #[error("entrypoint request rejected: {0}")]
    Rejected(String),

    /// Entrypoint client asked for a transition its state machine forbids.
    #[error("invalid entrypoint client transition {from:?} -> {to:?}")]
    InvalidTransition {
        /// Current state.
        from: ClientState,
        /// Requested state.
        to: ClientState,
    },

    /// No pending entrypoint request carries this id.
    #[error("unknown entrypoint request {id}")]
    UnknownRequest {
        /// The id that was not found.
        id: RequestId,
    },

    /// The link is not managed by this node.
    #[error("unknown link {id}")]
    UnknownLink {
        /// The id that was not found.
        id: LinkId,
    },

    /// Transport failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Link failure.
    #[error(transparent)]
    Link(#[from] LinkError),
}

/// Result type for orchestrator operations.
pub type HaResult<T> = Result<T, HaError>;
