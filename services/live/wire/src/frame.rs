//! Transport frames.

use bytes::Bytes;
use std::fmt;

/// One discrete unit of data exchanged over the duplex transport
#[derive(Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text frame
    Text(String),
    /// Binary frame
    Binary(Bytes),
}

impl Frame {
    /// Raw payload bytes regardless of frame kind
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Frame::Text(text) => text.as_bytes(),
            Frame::Binary(data) => data,
        }
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether this is a text frame
    pub fn is_text(&self) -> bool {
        matches!(self, Frame::Text(_))
    }
}

impl From<Vec<u8>> for Frame {
    fn from(data: Vec<u8>) -> Self {
        Frame::Binary(Bytes::from(data))
    }
}

impl From<&'static str> for Frame {
    fn from(text: &'static str) -> Self {
        Frame::Text(text.to_string())
    }
}

// Payloads can carry whole audio chunks; keep Debug output short.
impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Text(text) => write!(f, "Text({} bytes)", text.len()),
            Frame::Binary(data) => write!(f, "Binary({} bytes)", data.len()),
        }
    }
}
