//! The unit carried by a link.

use serde::{Deserialize, Serialize};

use crate::types::{LinkId, TAG_INVALID, Tag};

/// A message travelling over a link.
///
/// The payload is opaque to the link. `tag` and `link_id` are filled in by
/// [`Link::send`](crate::Link::send); a freshly built message carries
/// [`TAG_INVALID`] and the default id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Sequence number assigned by the sending link.
    pub tag: Tag,
    /// Destination link (the sender's `id_remote`).
    pub link_id: LinkId,
    /// Application bytes.
    pub payload: Vec<u8>,
    /// Set on messages deposited into an inbound queue.
    pub incoming: bool,
    /// Sender-local correlation value, carried untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation: Option<u64>,
}

impl Message {
    /// Create an outgoing message with the given payload.
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            tag: TAG_INVALID,
            link_id: LinkId::default(),
            payload: payload.into(),
            incoming: false,
            correlation: None,
        }
    }

    /// Attach a correlation value.
    pub fn with_correlation(mut self, correlation: u64) -> Self {
        self.correlation = Some(correlation);
        self
    }

    /// Payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_message_is_untagged() {
        let msg = Message::new("ping");
        assert_eq!(msg.tag, TAG_INVALID);
        assert!(!msg.link_id.is_valid());
        assert!(!msg.incoming);
        assert_eq!(msg.payload(), b"ping");
    }

    #[test]
    fn test_correlation_is_omitted_from_wire_when_absent() {
        let plain = serde_json::to_string(&Message::new(vec![1u8])).unwrap();
        assert!(!plain.contains("correlation"));

        let tagged = serde_json::to_string(&Message::new(vec![1u8]).with_correlation(9)).unwrap();
        assert!(tagged.contains("\"correlation\":9"));
    }
}
