//! Pluggable serialization for transport payloads.
//!
//! Everything crossing a [`Transport`](crate::Transport) is turned into
//! bytes and back, so the two ends never share memory. [`JsonCodec`] is the
//! default; bring another format by implementing [`MessageCodec`].
//!
//! ```rust
//! use halink::{JsonCodec, Message, MessageCodec};
//!
//! let codec = JsonCodec;
//! let bytes = codec.encode(&Message::new("ping")).unwrap();
//! let msg: Message = codec.decode(&bytes).unwrap();
//! assert_eq!(msg.payload(), b"ping");
//! ```

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Error type for codec operations.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Failed to encode a value to bytes.
    #[error("encode error: {0}")]
    Encode(Box<dyn std::error::Error + Send + Sync>),
    /// Failed to decode bytes to a value.
    #[error("decode error: {0}")]
    Decode(Box<dyn std::error::Error + Send + Sync>),
}

/// Pluggable serialization format.
pub trait MessageCodec: Clone + Send + Sync + 'static {
    /// Encode a value to bytes.
    fn encode<T: Serialize>(&self, msg: &T) -> Result<Vec<u8>, CodecError>;

    /// Decode bytes to a value.
    fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, CodecError>;
}

/// JSON codec using serde_json.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl MessageCodec for JsonCodec {
    fn encode<T: Serialize>(&self, msg: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(msg).map_err(|e| CodecError::Encode(Box::new(e)))
    }

    fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(buf).map_err(|e| CodecError::Decode(Box::new(e)))
    }
}
