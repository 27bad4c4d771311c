//! Duplex transports for live sessions.
//!
//! A [`Connector`] opens one physical duplex connection and hands back a sink
//! for outbound [`TransportMessage`]s and a stream of inbound ones. The
//! WebSocket implementation is used against the real backend; the in-memory
//! implementation lets tests and embedders play the server side.

use futures::{Sink, Stream};
use live_wire::Frame;
use std::fmt;
use std::pin::Pin;
use std::time::Duration;
use url::Url;

use crate::error::TransportError;

pub mod memory;
pub mod websocket;

pub use memory::{MemoryConnector, MemoryListener, MemoryPeer};
pub use websocket::WebSocketConnector;

/// WebSocket close status code
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CloseCode(pub u16);

impl CloseCode {
    /// Normal closure
    pub const NORMAL: CloseCode = CloseCode(1000);
    /// Endpoint is going away; used for caller-initiated shutdown
    pub const GOING_AWAY: CloseCode = CloseCode(1001);
    /// Close frame carried no status code
    pub const NO_STATUS: CloseCode = CloseCode(1005);
    /// Connection dropped without a close frame
    pub const ABNORMAL: CloseCode = CloseCode(1006);
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            CloseCode::NORMAL => write!(f, "Normal"),
            CloseCode::GOING_AWAY => write!(f, "GoingAway"),
            CloseCode::NO_STATUS => write!(f, "NoStatus"),
            CloseCode::ABNORMAL => write!(f, "Abnormal"),
            CloseCode(code) => write!(f, "CloseCode({})", code),
        }
    }
}

/// Unit exchanged with a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportMessage {
    /// Application frame
    Frame(Frame),
    /// Closing handshake
    Close {
        /// Close status code
        code: CloseCode,
        /// Close reason, possibly empty
        reason: String,
    },
}

/// Everything needed to open a connection
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    /// Endpoint URL
    pub url: Url,
    /// Request headers, in insertion order
    pub headers: Vec<(String, String)>,
    /// Bound on opening the connection
    pub timeout: Duration,
}

impl ConnectRequest {
    /// Create a request without headers
    pub fn new(url: Url, timeout: Duration) -> Self {
        Self {
            url,
            headers: Vec::new(),
            timeout,
        }
    }

    /// Append a header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Look up a header value, case-insensitively
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Outbound half of a connection
pub type FrameSink = Pin<Box<dyn Sink<TransportMessage, Error = TransportError> + Send>>;

/// Inbound half of a connection; ends when the transport is gone
pub type FrameSource = Pin<Box<dyn Stream<Item = Result<TransportMessage, TransportError>> + Send>>;

/// Opens duplex connections
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection described by `request`
    async fn connect(&self, request: ConnectRequest)
        -> Result<(FrameSink, FrameSource), TransportError>;
}
