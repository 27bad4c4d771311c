//! WebSocket transport backed by tokio-tungstenite.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{future, SinkExt, StreamExt};
use live_wire::Frame;
use std::io;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, trace};

use super::{CloseCode, ConnectRequest, Connector, FrameSink, FrameSource, TransportMessage};
use crate::error::TransportError;

/// Opens secure WebSocket connections
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    /// Create a connector
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(
        &self,
        request: ConnectRequest,
    ) -> Result<(FrameSink, FrameSource), TransportError> {
        let mut upgrade = request
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;

        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::InvalidRequest(format!("header {}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::InvalidRequest(format!("header {}: {}", name, e)))?;
            upgrade.headers_mut().insert(name, value);
        }

        // Header values carry credentials; only the URL is logged
        debug!(
            "Opening WebSocket to {}://{}{}",
            request.url.scheme(),
            request.url.host_str().unwrap_or_default(),
            request.url.path()
        );

        let (stream, response) = tokio::time::timeout(request.timeout, connect_async(upgrade))
            .await
            .map_err(|_| TransportError::Timeout(request.timeout))?
            .map_err(map_ws_error)?;

        debug!("WebSocket upgrade completed with status {}", response.status());

        let (sink, source) = stream.split();
        let sink = sink.sink_map_err(map_ws_error).with(|message: TransportMessage| {
            future::ready(Ok::<_, TransportError>(to_ws_message(message)))
        });
        let source = source.filter_map(|item| future::ready(from_ws_item(item)));

        Ok((Box::pin(sink), Box::pin(source)))
    }
}

fn to_ws_message(message: TransportMessage) -> Message {
    match message {
        TransportMessage::Frame(Frame::Text(text)) => Message::Text(text),
        TransportMessage::Frame(Frame::Binary(data)) => Message::Binary(data.to_vec()),
        TransportMessage::Close { code, reason } => Message::Close(Some(CloseFrame {
            code: WsCloseCode::from(code.0),
            reason: reason.into(),
        })),
    }
}

fn from_ws_item(
    item: Result<Message, WsError>,
) -> Option<Result<TransportMessage, TransportError>> {
    let message = match item {
        Ok(message) => message,
        // Reading past a completed closing handshake
        Err(WsError::ConnectionClosed) => return None,
        Err(err) => return Some(Err(map_ws_error(err))),
    };

    match message {
        Message::Text(text) => Some(Ok(TransportMessage::Frame(Frame::Text(text)))),
        Message::Binary(data) => Some(Ok(TransportMessage::Frame(Frame::Binary(Bytes::from(
            data,
        ))))),
        Message::Close(Some(frame)) => Some(Ok(TransportMessage::Close {
            code: CloseCode(u16::from(frame.code)),
            reason: frame.reason.into_owned(),
        })),
        Message::Close(None) => Some(Ok(TransportMessage::Close {
            code: CloseCode::NO_STATUS,
            reason: String::new(),
        })),
        // tungstenite answers pings itself
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {
            trace!("Skipping WebSocket control frame");
            None
        }
    }
}

/// Map a tungstenite error onto the transport taxonomy
pub(crate) fn map_ws_error(err: WsError) -> TransportError {
    match err {
        WsError::Io(err) => map_io_error(err),
        WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
            TransportError::ConnectionLost("connection reset without closing handshake".to_string())
        }
        WsError::ConnectionClosed | WsError::AlreadyClosed => {
            TransportError::Io("connection already closed".to_string())
        }
        WsError::Url(err) => TransportError::InvalidRequest(err.to_string()),
        other => TransportError::Protocol(other.to_string()),
    }
}

fn map_io_error(err: io::Error) -> TransportError {
    match err.kind() {
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof
        | io::ErrorKind::NotConnected => TransportError::ConnectionLost(err.to_string()),
        _ => TransportError::Io(err.to_string()),
    }
}
