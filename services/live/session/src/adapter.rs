//! Duplex socket adapter.
//!
//! Owns one physical connection obtained from a [`Connector`] and presents it
//! as a lazy sequence of inbound frames plus a send operation. Every way the
//! connection can end (remote close, protocol violation, network loss,
//! local disconnect) terminates the inbound sequence exactly once.

use futures::{SinkExt, Stream, StreamExt};
use live_wire::Frame;
use parking_lot::Mutex;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::{ClosedError, TransportError};
use crate::transport::{CloseCode, ConnectRequest, Connector, FrameSink, FrameSource, TransportMessage};

/// Bound on flushing a close frame to a peer that may no longer be reading
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle phase of the adapter's connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// No connection has been opened yet
    Idle,
    /// The connection is being opened
    Connecting,
    /// Frames can flow in both directions
    Open,
    /// A local disconnect is in progress
    Closing,
    /// The connection is gone
    Closed,
}

type InboundItem = Result<Frame, ClosedError>;

/// Single-use termination latch in front of the inbound channel
struct InboundLatch {
    tx: Mutex<Option<mpsc::UnboundedSender<InboundItem>>>,
}

impl InboundLatch {
    fn new(tx: mpsc::UnboundedSender<InboundItem>) -> Self {
        Self {
            tx: Mutex::new(Some(tx)),
        }
    }

    fn publish(&self, frame: Frame) {
        if let Some(tx) = self.tx.lock().as_ref() {
            // The reader may have gone away; frames are then discarded
            let _ = tx.send(Ok(frame));
        }
    }

    /// Terminate the sequence; returns false if it was already terminated
    fn terminate(&self, error: Option<ClosedError>) -> bool {
        let Some(tx) = self.tx.lock().take() else {
            return false;
        };
        if let Some(error) = error {
            let _ = tx.send(Err(error));
        }
        true
    }
}

/// Inbound frames of one connection
///
/// Yields frames in arrival order and ends exactly once: either cleanly
/// after a local disconnect, or with a single [`ClosedError`].
pub struct InboundFrames {
    rx: mpsc::UnboundedReceiver<InboundItem>,
    finished: bool,
}

impl Stream for InboundFrames {
    type Item = InboundItem;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(Err(error))) => {
                self.finished = true;
                Poll::Ready(Some(Err(error)))
            }
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

struct Shared {
    phase: Mutex<ConnectionPhase>,
    last_closure: Mutex<Option<ClosedError>>,
    sink: tokio::sync::Mutex<Option<FrameSink>>,
    inbound: Mutex<Option<Arc<InboundLatch>>>,
    receive_task: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    /// Record the first closure seen and move to `Closed`
    fn mark_closed(&self, closure: ClosedError) {
        self.last_closure.lock().get_or_insert(closure);
        *self.phase.lock() = ConnectionPhase::Closed;
    }

    fn terminate_inbound(&self, error: Option<ClosedError>) -> bool {
        match self.inbound.lock().as_ref() {
            Some(latch) => latch.terminate(error),
            None => false,
        }
    }
}

/// Wraps one duplex connection
///
/// Cloning yields another handle to the same connection.
#[derive(Clone)]
pub struct DuplexSocketAdapter {
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
}

impl DuplexSocketAdapter {
    /// Create an idle adapter that will connect through `connector`
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            shared: Arc::new(Shared {
                phase: Mutex::new(ConnectionPhase::Idle),
                last_closure: Mutex::new(None),
                sink: tokio::sync::Mutex::new(None),
                inbound: Mutex::new(None),
                receive_task: Mutex::new(None),
            }),
        }
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> ConnectionPhase {
        *self.shared.phase.lock()
    }

    /// How the connection ended, once it has
    pub fn last_closure(&self) -> Option<ClosedError> {
        self.shared.last_closure.lock().clone()
    }

    /// Open the connection and start the receive loop
    ///
    /// Each adapter connects at most once.
    pub async fn connect(&self, request: ConnectRequest) -> Result<InboundFrames, TransportError> {
        {
            let mut phase = self.shared.phase.lock();
            if *phase != ConnectionPhase::Idle {
                return Err(TransportError::AlreadyConnected);
            }
            *phase = ConnectionPhase::Connecting;
        }

        let (sink, source) = match self.connector.connect(request).await {
            Ok(halves) => halves,
            Err(err) => {
                debug!("Connection attempt failed: {}", err);
                self.shared.mark_closed(ClosedError::abnormal(Some(err.clone())));
                return Err(err);
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut phase = self.shared.phase.lock();
            if *phase != ConnectionPhase::Connecting {
                // Disconnected while the transport was opening
                return Err(TransportError::Io(
                    "adapter was closed while connecting".to_string(),
                ));
            }
            *self.shared.sink.try_lock().map_err(|_| {
                TransportError::Io("adapter sink is busy while connecting".to_string())
            })? = Some(sink);
            *self.shared.inbound.lock() = Some(Arc::new(InboundLatch::new(tx)));
            *phase = ConnectionPhase::Open;
        }

        let task = tokio::spawn(receive_loop(self.shared.clone(), source));
        *self.shared.receive_task.lock() = Some(task);

        debug!("Connection open");
        Ok(InboundFrames {
            rx,
            finished: false,
        })
    }

    /// Write one frame
    ///
    /// Fails with the recorded closure once the connection is no longer open.
    pub async fn send(&self, frame: Frame) -> Result<(), ClosedError> {
        if self.phase() != ConnectionPhase::Open {
            return Err(self.closure_or_not_connected());
        }

        let mut sink = self.shared.sink.lock().await;
        let Some(sink) = sink.as_mut() else {
            return Err(self.closure_or_not_connected());
        };

        trace!(len = frame.len(), "Sending frame");
        sink.send(TransportMessage::Frame(frame))
            .await
            .map_err(|err| ClosedError::abnormal(Some(err)))
    }

    /// Orderly shutdown with the "going away" code; no-op once closed
    ///
    /// The inbound sequence ends without an error.
    pub async fn disconnect(&self) {
        if !self.begin_close() {
            return;
        }

        debug!("Disconnecting");
        self.shared.terminate_inbound(None);
        if let Some(task) = self.shared.receive_task.lock().take() {
            task.abort();
        }

        let sink = self.shared.sink.lock().await.take();
        if let Some(sink) = sink {
            close_sink(sink).await;
        }
        *self.shared.phase.lock() = ConnectionPhase::Closed;
    }

    /// Synchronous variant of [`disconnect`](Self::disconnect) for drop paths
    ///
    /// The close frame is flushed on a background task when a runtime is
    /// available; otherwise the transport is simply dropped.
    pub fn abort(&self) {
        if !self.begin_close() {
            return;
        }

        debug!("Aborting connection");
        self.shared.terminate_inbound(None);
        if let Some(task) = self.shared.receive_task.lock().take() {
            task.abort();
        }

        let sink = match self.shared.sink.try_lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let (Some(sink), Ok(handle)) = (sink, tokio::runtime::Handle::try_current()) {
            handle.spawn(close_sink(sink));
        }
        *self.shared.phase.lock() = ConnectionPhase::Closed;
    }

    /// Move to `Closing`; returns false when there is nothing to close
    fn begin_close(&self) -> bool {
        let mut phase = self.shared.phase.lock();
        match *phase {
            ConnectionPhase::Closing | ConnectionPhase::Closed => false,
            ConnectionPhase::Idle => {
                *phase = ConnectionPhase::Closed;
                false
            }
            ConnectionPhase::Connecting | ConnectionPhase::Open => {
                *phase = ConnectionPhase::Closing;
                self.shared
                    .last_closure
                    .lock()
                    .get_or_insert_with(|| ClosedError::new(CloseCode::GOING_AWAY, "closed by client"));
                true
            }
        }
    }

    fn closure_or_not_connected(&self) -> ClosedError {
        self.last_closure()
            .unwrap_or_else(|| ClosedError::new(CloseCode::ABNORMAL, "not connected"))
    }
}

async fn close_sink(mut sink: FrameSink) {
    let close = TransportMessage::Close {
        code: CloseCode::GOING_AWAY,
        reason: String::new(),
    };
    let result = tokio::time::timeout(CLOSE_TIMEOUT, async {
        sink.send(close).await?;
        sink.close().await
    })
    .await;

    match result {
        Ok(Ok(())) => trace!("Close frame sent"),
        Ok(Err(err)) => debug!("Failed to send close frame: {}", err),
        Err(_) => warn!("Timed out sending close frame after {:?}", CLOSE_TIMEOUT),
    }
}

async fn receive_loop(shared: Arc<Shared>, mut source: FrameSource) {
    let latch = shared.inbound.lock().clone();
    let Some(latch) = latch else {
        return;
    };

    let closure = loop {
        match source.next().await {
            Some(Ok(TransportMessage::Frame(frame))) => {
                trace!(len = frame.len(), text = frame.is_text(), "Received frame");
                latch.publish(frame);
            }
            Some(Ok(TransportMessage::Close { code, reason })) => {
                break ClosedError::new(code, reason);
            }
            Some(Err(err)) => break ClosedError::abnormal(Some(err)),
            None => break ClosedError::abnormal(None),
        }
    };

    debug!(code = %closure.code, reason = %closure.reason, "Connection closed");
    shared.mark_closed(closure.clone());
    latch.terminate(Some(closure));

    let sink = shared.sink.lock().await.take();
    if let Some(mut sink) = sink {
        if let Err(err) = tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await {
            debug!("Timed out closing transport: {}", err);
        }
    }
}
