//! Serialization codecs for the protocol binding

pub mod json;
pub mod stream;

pub use json::JsonCodec;
pub use stream::{EventStreamCodec, Framing};

use crate::{
    protocol::{error::A2AError, operation::A2AOperation},
    service::response::A2AResponse,
};
use bytes::Bytes;

/// Body encoding of unary calls
///
/// Streaming bodies are framed separately by [`EventStreamCodec`].
pub trait Codec: Send + Sync {
    /// Body of the HTTP request for an operation; empty when the call carries none
    fn encode_request(&self, operation: &A2AOperation) -> Result<Bytes, A2AError>;

    /// Decode a successful response body; the operation selects the expected shape
    fn decode_response(
        &self,
        body: &[u8],
        operation: &A2AOperation,
    ) -> Result<A2AResponse, A2AError>;

    /// Media type sent in `Content-Type` and `Accept`
    fn content_type(&self) -> &str;
}
