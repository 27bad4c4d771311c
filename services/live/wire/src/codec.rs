//! Encoding and decoding between messages and transport frames.

use bytes::Bytes;
use tracing::trace;

use crate::client::ClientMessage;
use crate::error::WireError;
use crate::frame::Frame;
use crate::server::{decode_server_frame, ServerFrame};

/// Converts client messages to frames and frames to server messages
pub trait MessageCodec: Send + Sync {
    /// Encode one outbound message into one frame
    fn encode(&self, message: &ClientMessage) -> Result<Frame, WireError>;

    /// Decode one inbound frame
    fn decode(&self, frame: &Frame) -> Result<ServerFrame, WireError>;
}

/// JSON codec; client messages travel as binary frames holding UTF-8 JSON
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl MessageCodec for JsonCodec {
    fn encode(&self, message: &ClientMessage) -> Result<Frame, WireError> {
        let data = serde_json::to_vec(message).map_err(|e| WireError::Encode(e.to_string()))?;
        trace!(kind = message.kind(), len = data.len(), "Encoded client message");
        Ok(Frame::Binary(Bytes::from(data)))
    }

    fn decode(&self, frame: &Frame) -> Result<ServerFrame, WireError> {
        decode_server_frame(frame.as_bytes())
    }
}
