//! Error taxonomy for live sessions.
//!
//! All errors are `Clone`: a single failure is handed to every party waiting
//! on the handshake gate, so underlying causes are carried as rendered text.

use live_wire::WireError;
use std::fmt;
use thiserror::Error;

use crate::transport::CloseCode;

/// Failures reported by a transport
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The network connection was lost (reset, aborted, unexpected EOF)
    #[error("network connection lost: {0}")]
    ConnectionLost(String),

    /// Any other I/O failure
    #[error("I/O error: {0}")]
    Io(String),

    /// The peer violated the WebSocket protocol, or the upgrade failed
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The connection request could not be built
    #[error("invalid connection request: {0}")]
    InvalidRequest(String),

    /// Opening the connection took longer than the request timeout
    #[error("timed out after {0:?} while connecting")]
    Timeout(std::time::Duration),

    /// The adapter already owns a connection
    #[error("adapter is already connected")]
    AlreadyConnected,
}

impl TransportError {
    /// Whether this error means the network went away underneath us
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, TransportError::ConnectionLost(_))
    }
}

/// The connection closed; carries the close code, reason and transport cause
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedError {
    /// WebSocket close code
    pub code: CloseCode,
    /// Human readable reason, never empty
    pub reason: String,
    /// Transport failure that caused the closure, if any
    pub cause: Option<TransportError>,
}

/// Reason recorded when the transport gives none
pub const UNKNOWN_REASON: &str = "unknown reason";

impl ClosedError {
    /// Closure described by a close frame
    pub fn new(code: CloseCode, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            code,
            reason: if reason.is_empty() {
                UNKNOWN_REASON.to_string()
            } else {
                reason
            },
            cause: None,
        }
    }

    /// Closure without a close frame, optionally caused by a transport error
    pub fn abnormal(cause: Option<TransportError>) -> Self {
        let reason = cause
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();
        Self {
            cause,
            ..Self::new(CloseCode::ABNORMAL, reason)
        }
    }

    /// Whether the closure was the orderly "going away" initiated by a caller
    pub fn is_going_away(&self) -> bool {
        self.code == CloseCode::GOING_AWAY
    }
}

impl fmt::Display for ClosedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "connection closed with code {} ({})", self.code, self.reason)
    }
}

impl std::error::Error for ClosedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

/// Why a connection attempt never became a usable session
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SetupError {
    /// The transport could not be opened
    #[error("failed to open connection: {0}")]
    Connect(#[source] TransportError),

    /// The SETUP message could not be encoded
    #[error("failed to encode setup message: {0}")]
    Encode(#[source] WireError),

    /// The SETUP message could not be written
    #[error("failed to send setup message: {0}")]
    Send(#[source] ClosedError),

    /// The backend rejected the handshake or the connection failed during it
    #[error("handshake rejected: {0}")]
    Rejected(#[source] Box<LiveSessionError>),

    /// The session was closed, or reconnected, before setup completed
    #[error("session closed before setup completed")]
    Cancelled,
}

/// Errors surfaced to callers of a live session
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LiveSessionError {
    /// The handshake failed; the session was never established
    #[error("live session setup failed: {0}")]
    Setup(#[source] SetupError),

    /// The network connection was lost after the session was established
    #[error("live session lost its connection: {0}")]
    LostConnection(#[source] ClosedError),

    /// The connection closed for any other reason not initiated by the caller
    #[error("live session closed unexpectedly: {0}")]
    UnexpectedClosure(#[source] ClosedError),

    /// The server sent a frame that is not any known message
    #[error("server sent an unsupported message: {0}")]
    UnsupportedMessage(#[source] WireError),
}

impl From<SetupError> for LiveSessionError {
    fn from(err: SetupError) -> Self {
        LiveSessionError::Setup(err)
    }
}

/// Map a closure onto the error surfaced to callers
///
/// Returns `None` for the orderly "going away" closure, which is expected.
pub fn classify_closure(closed: ClosedError) -> Option<LiveSessionError> {
    if closed.is_going_away() {
        return None;
    }

    let lost = closed
        .cause
        .as_ref()
        .is_some_and(TransportError::is_connection_lost);

    Some(if lost {
        LiveSessionError::LostConnection(closed)
    } else {
        LiveSessionError::UnexpectedClosure(closed)
    })
}
