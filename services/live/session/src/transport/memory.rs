//! In-memory transport for development and testing
//!
//! [`MemoryConnector`] hands every accepted connection to a
//! [`MemoryListener`], where a [`MemoryPeer`] plays the server side.

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use live_wire::Frame;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use super::{CloseCode, ConnectRequest, Connector, FrameSink, FrameSource, TransportMessage};
use crate::error::TransportError;

type ServerSide = mpsc::UnboundedSender<Result<TransportMessage, TransportError>>;

/// Client side of the in-memory transport
pub struct MemoryConnector {
    accept_tx: mpsc::UnboundedSender<MemoryPeer>,
    /// Error returned by the next connection attempt
    refusal: Mutex<Option<TransportError>>,
}

/// Receives connections opened through a [`MemoryConnector`]
pub struct MemoryListener {
    accept_rx: mpsc::UnboundedReceiver<MemoryPeer>,
}

/// Server side of one in-memory connection
pub struct MemoryPeer {
    request: ConnectRequest,
    inbound: mpsc::UnboundedReceiver<TransportMessage>,
    outbound: ServerSide,
}

impl MemoryConnector {
    /// Create a connector and the listener that accepts its connections
    pub fn new() -> (Self, MemoryListener) {
        let (accept_tx, accept_rx) = mpsc::unbounded();
        (
            Self {
                accept_tx,
                refusal: Mutex::new(None),
            },
            MemoryListener { accept_rx },
        )
    }

    /// Fail the next connection attempt with `err`
    pub fn refuse_next(&self, err: TransportError) {
        *self.refusal.lock() = Some(err);
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(
        &self,
        request: ConnectRequest,
    ) -> Result<(FrameSink, FrameSource), TransportError> {
        let refusal = self.refusal.lock().take();
        if let Some(err) = refusal {
            debug!("Refusing in-memory connection to {}: {}", request.url, err);
            return Err(err);
        }

        let (client_tx, server_rx) = mpsc::unbounded::<TransportMessage>();
        let (server_tx, client_rx) = mpsc::unbounded();

        let peer = MemoryPeer {
            request,
            inbound: server_rx,
            outbound: server_tx,
        };
        self.accept_tx
            .unbounded_send(peer)
            .map_err(|_| TransportError::Io("memory listener dropped".to_string()))?;

        let sink = client_tx.sink_map_err(|_| {
            TransportError::ConnectionLost("memory peer dropped the connection".to_string())
        });
        Ok((Box::pin(sink), Box::pin(client_rx)))
    }
}

impl MemoryListener {
    /// Wait for the next connection; `None` once the connector is dropped
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.next().await
    }
}

impl MemoryPeer {
    /// The request the client connected with
    pub fn request(&self) -> &ConnectRequest {
        &self.request
    }

    /// Next message written by the client; `None` once the client hung up
    pub async fn recv(&mut self) -> Option<TransportMessage> {
        self.inbound.next().await
    }

    /// Next frame written by the client, decoded as JSON
    ///
    /// Returns `None` on a close message, a hang-up, or a frame that is not JSON.
    pub async fn recv_json(&mut self) -> Option<Value> {
        match self.recv().await? {
            TransportMessage::Frame(frame) => serde_json::from_slice(frame.as_bytes()).ok(),
            TransportMessage::Close { .. } => None,
        }
    }

    /// Deliver a frame to the client
    pub fn send_frame(&self, frame: Frame) -> bool {
        self.outbound
            .unbounded_send(Ok(TransportMessage::Frame(frame)))
            .is_ok()
    }

    /// Deliver a JSON value to the client as a binary frame
    pub fn send_json(&self, value: &Value) -> bool {
        self.send_frame(Frame::from(value.to_string().into_bytes()))
    }

    /// Send a close frame and end the client's inbound stream
    pub fn close(&self, code: CloseCode, reason: &str) {
        let _ = self.outbound.unbounded_send(Ok(TransportMessage::Close {
            code,
            reason: reason.to_string(),
        }));
        self.outbound.close_channel();
    }

    /// Fail the client's inbound stream with a transport error
    pub fn fail(&self, err: TransportError) {
        let _ = self.outbound.unbounded_send(Err(err));
        self.outbound.close_channel();
    }

    /// Stop accepting client writes, as a peer that vanished would
    pub fn hang_up(&mut self) {
        self.inbound.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use url::Url;

    fn request() -> ConnectRequest {
        ConnectRequest::new(Url::parse("wss://memory/ws").unwrap(), Duration::from_secs(1))
            .header("x-goog-api-key", "test")
    }

    #[tokio::test]
    async fn test_frames_flow_both_ways() {
        let (connector, mut listener) = MemoryConnector::new();
        let (mut sink, mut source) = connector.connect(request()).await.unwrap();
        let mut peer = listener.accept().await.unwrap();
        assert_eq!(peer.request().header_value("x-goog-api-key"), Some("test"));

        sink.send(TransportMessage::Frame(Frame::from("{\"a\":1}")))
            .await
            .unwrap();
        assert_eq!(peer.recv_json().await, Some(serde_json::json!({"a": 1})));

        assert!(peer.send_frame(Frame::from("hello")));
        assert_eq!(
            source.next().await,
            Some(Ok(TransportMessage::Frame(Frame::from("hello"))))
        );

        peer.close(CloseCode::NORMAL, "done");
        assert!(matches!(
            source.next().await,
            Some(Ok(TransportMessage::Close {
                code: CloseCode::NORMAL,
                ..
            }))
        ));
        assert!(source.next().await.is_none());
    }

    #[tokio::test]
    async fn test_refused_connection() {
        let (connector, _listener) = MemoryConnector::new();
        connector.refuse_next(TransportError::Io("refused".to_string()));

        assert!(matches!(
            connector.connect(request()).await,
            Err(TransportError::Io(_))
        ));
        assert!(connector.connect(request()).await.is_ok());
    }

    #[tokio::test]
    async fn test_hang_up_fails_client_writes() {
        let (connector, mut listener) = MemoryConnector::new();
        let (mut sink, _source) = connector.connect(request()).await.unwrap();
        let mut peer = listener.accept().await.unwrap();

        peer.hang_up();
        let result = sink.send(TransportMessage::Frame(Frame::from("x"))).await;
        assert!(matches!(result, Err(TransportError::ConnectionLost(_))));
    }
}
