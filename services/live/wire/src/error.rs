//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
///
/// Errors carry rendered messages rather than the underlying serde errors so
/// that a single failure can be handed to every party waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// A client message could not be serialized
    #[error("failed to encode client message: {0}")]
    Encode(String),

    /// A server frame is not a message we know how to read
    #[error("failed to decode server message: {0}")]
    Decode(String),

    /// Inline blob data is not valid base64
    #[error("invalid inline data: {0}")]
    InvalidBlob(String),
}

impl WireError {
    pub(crate) fn decode(err: impl std::fmt::Display) -> Self {
        Self::Decode(err.to_string())
    }
}
