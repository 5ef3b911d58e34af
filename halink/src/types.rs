//! Identifiers shared by links, messages and the entrypoint protocol.
//!
//! - [`LinkId`]: 128-bit identifier of one end of a link
//! - [`LinkParams`]: the agreed identity and tag parity of a link end
//! - [`RequestId`]: entrypoint request token
//! - [`Tag`]: per-link message sequence number

use serde::{Deserialize, Serialize};

/// Per-link message sequence number.
///
/// Tags start at 1 or 2 depending on the link parity and grow by 2 on
/// every send, so the two ends of a link never issue the same tag.
pub type Tag = u64;

/// Sentinel for "no tag". Issued tags are never zero.
pub const TAG_INVALID: Tag = 0;

/// 128-bit link identifier.
///
/// Identifiers allocated by a node carry the node incarnation id in
/// `first` and a per-node counter in `second`, which keeps them unique
/// across every process that ever ran.
///
/// # Examples
///
/// ```
/// use halink::LinkId;
///
/// let id = LinkId::new(0x1, 0x2);
/// assert!(id.is_valid());
/// assert_eq!(id.to_string(), "00000000000000010000000000000002");
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct LinkId {
    /// High 64 bits.
    pub first: u64,
    /// Low 64 bits.
    pub second: u64,
}

impl LinkId {
    /// Create a link id with explicit values.
    pub const fn new(first: u64, second: u64) -> Self {
        Self { first, second }
    }

    /// Check if the id is valid (non-zero).
    pub const fn is_valid(&self) -> bool {
        self.first != 0 || self.second != 0
    }
}

impl std::fmt::Display for LinkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}{:016x}", self.first, self.second)
    }
}

/// Identity of one end of a link, as agreed during the entrypoint exchange.
///
/// The acceptor builds both ends' parameters: its own and the requester's
/// are mirror images of each other (see [`LinkParams::mirrored`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkParams {
    /// Id of this end. Inbound messages carry it as their destination.
    pub id_local: LinkId,
    /// Id of the peer end. Outbound messages are stamped with it.
    pub id_remote: LinkId,
    /// Requester generation in `first`, acceptor generation in `second`.
    pub id_connection: LinkId,
    /// Whether this end issues even tags.
    pub tag_even: bool,
}

impl LinkParams {
    /// Create link parameters.
    pub const fn new(
        id_local: LinkId,
        id_remote: LinkId,
        id_connection: LinkId,
        tag_even: bool,
    ) -> Self {
        Self {
            id_local,
            id_remote,
            id_connection,
            tag_even,
        }
    }

    /// Parameters of the opposite end: ids swapped, parity flipped.
    pub const fn mirrored(&self) -> Self {
        Self {
            id_local: self.id_remote,
            id_remote: self.id_local,
            id_connection: self.id_connection,
            tag_even: !self.tag_even,
        }
    }

    /// First tag this end issues.
    pub const fn first_tag(&self) -> Tag {
        if self.tag_even { 2 } else { 1 }
    }
}

/// Token matching an entrypoint reply to its request.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct RequestId {
    /// High 64 bits.
    pub hi: u64,
    /// Low 64 bits.
    pub lo: u64,
}

impl RequestId {
    /// First id handed out by an entrypoint server.
    pub const FIRST: RequestId = RequestId { hi: 0, lo: 1 };

    /// The id following this one.
    pub const fn next(&self) -> Self {
        match self.lo.checked_add(1) {
            Some(lo) => Self { hi: self.hi, lo },
            None => Self {
                hi: self.hi.wrapping_add(1),
                lo: 0,
            },
        }
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:x}:{:x}", self.hi, self.lo)
    }
}
