//! Entrypoint: the bootstrap exchange that hands out link parameters.
//!
//! A requester asks an acceptor for a link. On a first request the
//! acceptor allocates a fresh id pair; otherwise the request carries the
//! requester's existing parameters and the acceptor reuses, or rebuilds,
//! its side of that link.
//!
//! ```text
//! requester                                   acceptor
//!    │ EntrypointRequest{first_request: true}    │
//!    ├──────────────────────────────────────────►│ allocate ids, start incoming link
//!    │ EntrypointReply{link_params: requester}   │
//!    │◄──────────────────────────────────────────┤
//!    │ start outgoing link                       │
//! ```

mod client;
mod server;

pub use client::{ClientState, EntrypointClient};
pub use server::EntrypointServer;

use serde::{Deserialize, Serialize};

use crate::types::{LinkParams, RequestId};

/// Entrypoint request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntrypointRequest {
    /// Ask for a fresh link id pair.
    pub first_request: bool,
    /// Requester's request generation.
    pub generation: u64,
    /// Requester's current parameters when reusing a link.
    pub link_params: Option<LinkParams>,
    /// Address the acceptor's incoming link should connect back to.
    pub process_endpoint: String,
}

impl EntrypointRequest {
    /// Request for a brand new link.
    pub fn first(generation: u64, process_endpoint: impl Into<String>) -> Self {
        Self {
            first_request: true,
            generation,
            link_params: None,
            process_endpoint: process_endpoint.into(),
        }
    }

    /// Request to keep using the link described by `params`.
    pub fn reuse(
        generation: u64,
        params: LinkParams,
        process_endpoint: impl Into<String>,
    ) -> Self {
        Self {
            first_request: false,
            generation,
            link_params: Some(params),
            process_endpoint: process_endpoint.into(),
        }
    }
}

/// Outcome of an entrypoint request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntrypointStatus {
    /// Parameters are in the reply.
    Ok,
    /// The acceptor is not serving entrypoint requests.
    Unavailable,
    /// The request was malformed or conflicts with existing links.
    Rejected(String),
}

/// Entrypoint reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntrypointReply {
    /// Outcome.
    pub status: EntrypointStatus,
    /// Id the acceptor tracked the request under.
    pub request_id: RequestId,
    /// Requester's parameters, present when `status` is `Ok`.
    pub link_params: Option<LinkParams>,
}

impl EntrypointReply {
    /// Successful reply carrying the requester's parameters.
    pub fn ok(request_id: RequestId, link_params: LinkParams) -> Self {
        Self {
            status: EntrypointStatus::Ok,
            request_id,
            link_params: Some(link_params),
        }
    }

    /// Failed reply.
    pub fn failed(request_id: RequestId, status: EntrypointStatus) -> Self {
        Self {
            status,
            request_id,
            link_params: None,
        }
    }
}
