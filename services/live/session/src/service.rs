//! Session orchestrator.
//!
//! [`LiveSessionService`] owns at most one [`DuplexSocketAdapter`] at a time.
//! Each connection runs the SETUP handshake and then two tasks:
//!
//! ```text
//!   callers ──send──▶ outbound queue ──▶ sender loop ──▶ adapter ──▶ server
//!                                          ▲ waits on
//!                                     HandshakeGate
//!                                          │ opened by
//!   response stream ◀── receiver loop ◀── adapter ◀── server
//! ```
//!
//! Connection, loop handles and gate are only touched under one mutex. The
//! mutex is not held while dialing; a dial in flight is cancelled through its
//! pending gate.

use futures::StreamExt;
use live_wire::{ClientMessage, LiveServerMessage, MessageCodec, ServerFrame};
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::adapter::{DuplexSocketAdapter, InboundFrames};
use crate::auth::TokenProviders;
use crate::config::LiveSessionConfig;
use crate::endpoint;
use crate::error::{classify_closure, LiveSessionError, SetupError};
use crate::gate::HandshakeGate;
use crate::response::{ResponseSink, ResponseStream};
use crate::transport::Connector;

/// Orchestrator lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Never connected
    Idle,
    /// Opening the transport
    Connecting,
    /// SETUP sent, waiting for the acknowledgement
    AwaitingHandshake,
    /// Application messages flow
    Ready,
    /// `close` is tearing the connection down
    Closing,
    /// No connection
    Closed,
}

/// One live connection and the two loops serving it
///
/// Dropping a connection aborts both loops and the adapter.
struct Connection {
    generation: u64,
    adapter: DuplexSocketAdapter,
    gate: HandshakeGate,
    receiver: JoinHandle<()>,
    sender: JoinHandle<()>,
}

impl Connection {
    /// Cancel the handshake wait, stop both loops and disconnect
    async fn shutdown(mut self) {
        debug!(generation = self.generation, "Tearing down connection");

        self.gate.fail(SetupError::Cancelled);
        self.receiver.abort();
        self.sender.abort();
        // Both loops must be gone before another pair can start
        let _ = (&mut self.receiver).await;
        let _ = (&mut self.sender).await;
        self.adapter.disconnect().await;
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.gate.fail(SetupError::Cancelled);
        self.receiver.abort();
        self.sender.abort();
        self.adapter.abort();
    }
}

/// Aborts a freshly opened adapter unless it is handed to a [`Connection`]
struct AdapterGuard {
    adapter: DuplexSocketAdapter,
    armed: bool,
}

impl AdapterGuard {
    fn new(adapter: DuplexSocketAdapter) -> Self {
        Self {
            adapter,
            armed: true,
        }
    }

    fn disarm(mut self) -> DuplexSocketAdapter {
        self.armed = false;
        self.adapter.clone()
    }
}

impl Deref for AdapterGuard {
    type Target = DuplexSocketAdapter;

    fn deref(&self) -> &Self::Target {
        &self.adapter
    }
}

impl Drop for AdapterGuard {
    fn drop(&mut self) {
        if self.armed {
            debug!("Abandoning connection that never finished opening");
            self.adapter.abort();
        }
    }
}

#[derive(Default)]
struct Inner {
    generation: u64,
    /// Gate of a connection that is still dialing or sending SETUP
    pending: Option<HandshakeGate>,
    connection: Option<Connection>,
    closed: bool,
}

type OutboundQueue = Arc<Mutex<mpsc::UnboundedReceiver<ClientMessage>>>;

/// Drives one logical live session over successive connections
pub struct LiveSessionService {
    config: LiveSessionConfig,
    connector: Arc<dyn Connector>,
    codec: Arc<dyn MessageCodec>,
    tokens: TokenProviders,
    inner: Mutex<Inner>,
    /// Generation allowed to publish state while opening; 0 once closed
    current: AtomicU64,
    state: Arc<watch::Sender<SessionState>>,
    outbound_tx: mpsc::UnboundedSender<ClientMessage>,
    outbound_rx: OutboundQueue,
    responses: Arc<ResponseSink>,
}

impl LiveSessionService {
    /// Create an idle service and the response stream it will feed
    pub fn new(
        config: LiveSessionConfig,
        connector: Arc<dyn Connector>,
        codec: Arc<dyn MessageCodec>,
        tokens: TokenProviders,
    ) -> (Self, ResponseStream) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (responses, stream) = ResponseSink::new();
        let (state, _) = watch::channel(SessionState::Idle);

        let service = Self {
            config,
            connector,
            codec,
            tokens,
            inner: Mutex::new(Inner::default()),
            current: AtomicU64::new(0),
            state: Arc::new(state),
            outbound_tx,
            outbound_rx: Arc::new(Mutex::new(outbound_rx)),
            responses: Arc::new(responses),
        };
        (service, stream)
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Session configuration
    pub fn config(&self) -> &LiveSessionConfig {
        &self.config
    }

    /// Handle for enqueueing messages from other tasks
    pub(crate) fn outbound(&self) -> mpsc::UnboundedSender<ClientMessage> {
        self.outbound_tx.clone()
    }

    /// Enqueue a message; it is written once the handshake has completed
    ///
    /// Never blocks and never fails. Encoding or transport failures are logged
    /// and surface through the response stream if they end the connection.
    pub fn send(&self, message: ClientMessage) {
        enqueue(&self.outbound_tx, message);
    }

    /// Open a new connection and complete the SETUP handshake
    ///
    /// Any previous connection is torn down first, and a `connect` still
    /// dialing or waiting on that connection's handshake fails with
    /// [`SetupError::Cancelled`].
    pub async fn connect(&self) -> Result<(), LiveSessionError> {
        let (generation, gate) = {
            let mut inner = self.inner.lock().await;
            if inner.closed || self.responses.is_finished() {
                return Err(SetupError::Cancelled.into());
            }
            self.teardown(&mut inner).await;

            inner.generation += 1;
            let gate = HandshakeGate::new();
            inner.pending = Some(gate.clone());
            self.current.store(inner.generation, Ordering::SeqCst);
            (inner.generation, gate)
        };

        // The pending gate only resolves early when close or another connect
        // cancels this attempt
        let opened = tokio::select! {
            biased;
            opened = self.open(generation, gate.clone()) => opened,
            cancelled = gate.wait() => Err(cancelled.err().unwrap_or(SetupError::Cancelled)),
        };

        {
            let mut inner = self.inner.lock().await;
            let current = inner.generation == generation && !inner.closed;
            match opened {
                Ok(connection) if current => {
                    inner.pending = None;
                    inner.connection = Some(connection);
                }
                Ok(connection) => {
                    self.settle_cancelled(&inner);
                    drop(inner);
                    connection.shutdown().await;
                    return Err(SetupError::Cancelled.into());
                }
                Err(err) => {
                    if current {
                        inner.pending = None;
                        self.set_state(SessionState::Closed);
                    } else {
                        self.settle_cancelled(&inner);
                    }
                    warn!(generation, "Live session setup failed: {}", err);
                    return Err(err.into());
                }
            }
        }

        let outcome = gate.wait().await;

        let mut inner = self.inner.lock().await;
        let current = inner.generation == generation && !inner.closed;
        match outcome {
            Ok(()) if current => {
                let ready = self.state.send_if_modified(|state| {
                    if *state == SessionState::AwaitingHandshake {
                        *state = SessionState::Ready;
                        true
                    } else {
                        false
                    }
                });
                if ready {
                    info!(generation, "Live session ready");
                }
                Ok(())
            }
            Ok(()) => Err(SetupError::Cancelled.into()),
            Err(err) => {
                if current {
                    self.teardown(&mut inner).await;
                    self.set_state(SessionState::Closed);
                }
                warn!(generation, "Live session setup failed: {}", err);
                Err(err.into())
            }
        }
    }

    /// Shut the session down; further calls are no-ops
    ///
    /// Returns without waiting for a dial in flight. The response stream
    /// completes without an error unless it already terminated.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return;
        }
        inner.closed = true;
        self.current.store(0, Ordering::SeqCst);

        debug!("Closing live session");
        if self.state() != SessionState::Closed {
            self.set_state(SessionState::Closing);
        }
        self.teardown(&mut inner).await;
        self.responses.finish(None);
        self.set_state(SessionState::Closed);
    }

    /// Open the transport, send SETUP first and start both loops
    async fn open(&self, generation: u64, gate: HandshakeGate) -> Result<Connection, SetupError> {
        self.set_state_if_current(generation, SessionState::Connecting);

        let request = endpoint::connect_request(&self.config, &self.tokens)
            .await
            .map_err(SetupError::Connect)?;
        let adapter = AdapterGuard::new(DuplexSocketAdapter::new(self.connector.clone()));
        let inbound = adapter.connect(request).await.map_err(|err| {
            error!(generation, "Failed to open live connection: {}", err);
            SetupError::Connect(err)
        })?;

        self.set_state_if_current(generation, SessionState::AwaitingHandshake);
        let setup = ClientMessage::Setup(self.config.setup());
        let frame = match self.codec.encode(&setup) {
            Ok(frame) => frame,
            Err(err) => {
                adapter.disconnect().await;
                return Err(SetupError::Encode(err));
            }
        };
        if let Err(err) = adapter.send(frame).await {
            adapter.disconnect().await;
            return Err(SetupError::Send(err));
        }
        debug!(generation, model = %self.config.model, "Sent setup");

        let adapter = adapter.disarm();
        let receiver = tokio::spawn(receive_loop(
            ReceiveContext {
                generation,
                adapter: adapter.clone(),
                gate: gate.clone(),
                codec: self.codec.clone(),
                responses: self.responses.clone(),
                state: self.state.clone(),
            },
            inbound,
        ));
        let sender = tokio::spawn(send_loop(
            generation,
            adapter.clone(),
            gate.clone(),
            self.codec.clone(),
            self.outbound_rx.clone(),
        ));

        Ok(Connection {
            generation,
            adapter,
            gate,
            receiver,
            sender,
        })
    }

    /// Cancel any dial in flight and shut the current connection down
    async fn teardown(&self, inner: &mut Inner) {
        if let Some(pending) = inner.pending.take() {
            pending.fail(SetupError::Cancelled);
        }
        if let Some(connection) = inner.connection.take() {
            connection.shutdown().await;
        }
    }

    fn set_state(&self, next: SessionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            trace!("Session state {:?} -> {:?}", previous, next);
        }
    }

    /// Publish `next` unless `generation` was superseded or the session closed
    fn set_state_if_current(&self, generation: u64, next: SessionState) {
        self.state.send_if_modified(|state| {
            if self.current.load(Ordering::SeqCst) != generation || *state == next {
                return false;
            }
            trace!("Session state {:?} -> {:?}", state, next);
            *state = next;
            true
        });
    }

    /// A cancelled attempt leaves `Closed` behind if close caused it
    fn settle_cancelled(&self, inner: &Inner) {
        if inner.closed {
            self.set_state(SessionState::Closed);
        }
    }
}

impl Drop for LiveSessionService {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        inner.closed = true;
        self.current.store(0, Ordering::SeqCst);
        if let Some(pending) = inner.pending.take() {
            pending.fail(SetupError::Cancelled);
        }
        if let Some(connection) = inner.connection.take() {
            debug!(generation = connection.generation, "Live session dropped");
            drop(connection);
        }
        self.responses.finish(None);
        self.state.send_replace(SessionState::Closed);
    }
}

pub(crate) fn enqueue(queue: &mpsc::UnboundedSender<ClientMessage>, message: ClientMessage) {
    let kind = message.kind();
    if queue.send(message).is_err() {
        debug!(kind, "Live session is gone; dropping message");
    } else {
        trace!(kind, "Queued message");
    }
}

struct ReceiveContext {
    generation: u64,
    adapter: DuplexSocketAdapter,
    gate: HandshakeGate,
    codec: Arc<dyn MessageCodec>,
    responses: Arc<ResponseSink>,
    state: Arc<watch::Sender<SessionState>>,
}

async fn receive_loop(ctx: ReceiveContext, mut inbound: InboundFrames) {
    let generation = ctx.generation;

    let failure = loop {
        let frame = match inbound.next().await {
            Some(Ok(frame)) => frame,
            Some(Err(closed)) => {
                debug!(generation, "Connection closed by server: {}", closed);
                break classify_closure(closed);
            }
            None => break None,
        };

        if frame.is_text() {
            error!(generation, "Unexpected text frame from server: {:?}", frame);
            continue;
        }

        match ctx.codec.decode(&frame) {
            Ok(ServerFrame::SetupComplete) => {
                if ctx.gate.open() {
                    debug!(generation, "Setup complete");
                } else {
                    debug!(generation, "Ignoring duplicate setupComplete");
                }
            }
            Ok(ServerFrame::Message(message)) => {
                if let LiveServerMessage::GoingAway(notice) = &message {
                    debug!(
                        generation,
                        time_left = ?notice.time_left(),
                        "Server will close the connection soon"
                    );
                }
                trace!(generation, kind = message.kind(), "Received message");
                ctx.responses.publish(message);
            }
            Ok(ServerFrame::Unrecognized { keys }) => {
                debug!(generation, ?keys, "Ignoring unrecognized server message");
            }
            Err(err) => {
                error!(generation, "Failed to decode server message: {}", err);
                break Some(LiveSessionError::UnsupportedMessage(err));
            }
        }
    };

    match failure {
        Some(err) => {
            warn!(generation, "Live session terminated: {}", err);
            if !ctx.gate.fail(SetupError::Rejected(Box::new(err.clone()))) {
                ctx.responses.finish(Some(err));
            }
        }
        None => {
            if !ctx.gate.fail(SetupError::Cancelled) {
                ctx.responses.finish(None);
            }
        }
    }

    ctx.adapter.disconnect().await;
    ctx.state.send_replace(SessionState::Closed);
}

async fn send_loop(
    generation: u64,
    adapter: DuplexSocketAdapter,
    gate: HandshakeGate,
    codec: Arc<dyn MessageCodec>,
    queue: OutboundQueue,
) {
    let mut queue = queue.lock().await;

    // Once open, the gate stays open for this connection
    if let Err(err) = gate.wait().await {
        debug!(generation, "Sender loop exiting without sending: {}", err);
        return;
    }

    while let Some(message) = queue.recv().await {
        let kind = message.kind();
        let frame = match codec.encode(&message) {
            Ok(frame) => frame,
            Err(err) => {
                error!(generation, kind, "Failed to encode message, dropping it: {}", err);
                continue;
            }
        };
        if let Err(err) = adapter.send(frame).await {
            error!(generation, kind, "Failed to send message: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ClosedError, TransportError};
    use crate::transport::{
        CloseCode, ConnectRequest, FrameSink, FrameSource, MemoryConnector, MemoryListener,
        MemoryPeer, TransportMessage,
    };
    use live_wire::{Frame, JsonCodec, RealtimeInput, WireError};
    use serde_json::{json, Value};
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(2);

    struct Harness {
        service: Arc<LiveSessionService>,
        responses: ResponseStream,
        listener: MemoryListener,
        connector: Arc<MemoryConnector>,
    }

    fn harness_with_codec(codec: Arc<dyn MessageCodec>) -> Harness {
        let (connector, listener) = MemoryConnector::new();
        let connector = Arc::new(connector);
        let config = LiveSessionConfig {
            model: "projects/demo/models/gemini-live".to_string(),
            ..LiveSessionConfig::default()
        };
        let (service, responses) = LiveSessionService::new(
            config,
            connector.clone(),
            codec,
            TokenProviders::default(),
        );
        Harness {
            service: Arc::new(service),
            responses,
            listener,
            connector,
        }
    }

    fn harness() -> Harness {
        harness_with_codec(Arc::new(JsonCodec))
    }

    fn text(text: &str) -> ClientMessage {
        ClientMessage::RealtimeInput(RealtimeInput {
            text: Some(text.to_string()),
            ..Default::default()
        })
    }

    fn content_frame(text: &str) -> Value {
        json!({
            "serverContent": {
                "modelTurn": { "role": "model", "parts": [{ "text": text }] },
                "turnComplete": true
            }
        })
    }

    fn spawn_connect(
        service: &Arc<LiveSessionService>,
    ) -> JoinHandle<Result<(), LiveSessionError>> {
        let service = service.clone();
        tokio::spawn(async move { service.connect().await })
    }

    /// Accept the connection and consume the SETUP frame
    async fn accept(listener: &mut MemoryListener) -> MemoryPeer {
        let mut peer = tokio::time::timeout(WAIT, listener.accept())
            .await
            .unwrap()
            .unwrap();
        let setup = tokio::time::timeout(WAIT, peer.recv_json())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(setup["setup"]["model"], "projects/demo/models/gemini-live");
        peer
    }

    async fn connect(h: &mut Harness) -> MemoryPeer {
        let connecting = spawn_connect(&h.service);
        let peer = accept(&mut h.listener).await;
        assert_eq!(h.service.state(), SessionState::AwaitingHandshake);
        peer.send_json(&json!({ "setupComplete": {} }));
        tokio::time::timeout(WAIT, connecting)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(h.service.state(), SessionState::Ready);
        peer
    }

    async fn next_text(peer: &mut MemoryPeer) -> String {
        let value = tokio::time::timeout(WAIT, peer.recv_json())
            .await
            .unwrap()
            .unwrap();
        value["realtimeInput"]["text"].as_str().unwrap().to_string()
    }

    async fn next_response(
        responses: &mut ResponseStream,
    ) -> Option<Result<LiveServerMessage, LiveSessionError>> {
        tokio::time::timeout(WAIT, responses.next()).await.unwrap()
    }

    #[tokio::test]
    async fn test_send_reply_close() {
        let mut h = harness();
        let mut peer = connect(&mut h).await;

        h.service.send(text("Does five plus five equal ten?"));
        assert_eq!(next_text(&mut peer).await, "Does five plus five equal ten?");

        peer.send_json(&content_frame("Yes"));
        let Some(Ok(LiveServerMessage::Content(content))) = next_response(&mut h.responses).await
        else {
            panic!("expected server content");
        };
        assert_eq!(content.text(), "Yes");

        h.service.close().await;
        assert!(next_response(&mut h.responses).await.is_none());
        assert_eq!(h.service.state(), SessionState::Closed);
        assert!(matches!(
            tokio::time::timeout(WAIT, peer.recv()).await.unwrap(),
            Some(TransportMessage::Close {
                code: CloseCode::GOING_AWAY,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_going_away_after_close_is_silent() {
        let mut h = harness();
        let peer = connect(&mut h).await;

        h.service.close().await;
        peer.close(CloseCode::GOING_AWAY, "");

        assert!(next_response(&mut h.responses).await.is_none());
        assert!(h.responses.next().await.is_none());
    }

    #[tokio::test]
    async fn test_remote_going_away_completes_silently() {
        let mut h = harness();
        let peer = connect(&mut h).await;

        peer.close(CloseCode::GOING_AWAY, "server shutdown");
        assert!(next_response(&mut h.responses).await.is_none());

        let mut state = h.service.subscribe_state();
        tokio::time::timeout(WAIT, state.wait_for(|s| *s == SessionState::Closed))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_network_loss_is_reported_once() {
        let mut h = harness();
        let peer = connect(&mut h).await;

        peer.fail(TransportError::ConnectionLost(
            "The network connection was lost.".to_string(),
        ));

        assert!(matches!(
            next_response(&mut h.responses).await,
            Some(Err(LiveSessionError::LostConnection(_)))
        ));
        assert!(next_response(&mut h.responses).await.is_none());

        // Closing after the failure adds nothing
        h.service.close().await;
        h.service.close().await;
        assert!(h.responses.next().await.is_none());
        assert_eq!(h.service.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_other_closures_are_unexpected() {
        let mut h = harness();
        let peer = connect(&mut h).await;

        peer.close(CloseCode(1011), "internal error");
        let Some(Err(LiveSessionError::UnexpectedClosure(closed))) =
            next_response(&mut h.responses).await
        else {
            panic!("expected unexpected closure");
        };
        assert_eq!(closed.code, CloseCode(1011));
        assert_eq!(closed.reason, "internal error");
        assert!(next_response(&mut h.responses).await.is_none());
    }

    #[tokio::test]
    async fn test_undecodable_frame_before_ack_fails_setup() {
        let mut h = harness();
        let connecting = spawn_connect(&h.service);
        let peer = accept(&mut h.listener).await;

        peer.send_frame(Frame::from(b"\x00garbage".to_vec()));

        let result = tokio::time::timeout(WAIT, connecting).await.unwrap().unwrap();
        let Err(LiveSessionError::Setup(SetupError::Rejected(cause))) = result else {
            panic!("expected a rejected setup");
        };
        assert!(matches!(*cause, LiveSessionError::UnsupportedMessage(_)));
        assert_eq!(h.service.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_undecodable_frame_after_ack_ends_stream() {
        let mut h = harness();
        let mut peer = connect(&mut h).await;

        peer.send_frame(Frame::from(b"[1, 2]".to_vec()));
        assert!(matches!(
            next_response(&mut h.responses).await,
            Some(Err(LiveSessionError::UnsupportedMessage(WireError::Decode(_))))
        ));
        assert!(next_response(&mut h.responses).await.is_none());
        assert!(matches!(
            tokio::time::timeout(WAIT, peer.recv()).await.unwrap(),
            Some(TransportMessage::Close {
                code: CloseCode::GOING_AWAY,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_closure_during_handshake_fails_setup() {
        let mut h = harness();
        let connecting = spawn_connect(&h.service);
        let peer = accept(&mut h.listener).await;

        peer.close(CloseCode(1008), "invalid model");

        let result = tokio::time::timeout(WAIT, connecting).await.unwrap().unwrap();
        let Err(LiveSessionError::Setup(SetupError::Rejected(cause))) = result else {
            panic!("expected a rejected setup");
        };
        let LiveSessionError::UnexpectedClosure(ClosedError { code, reason, .. }) = *cause else {
            panic!("expected unexpected closure");
        };
        assert_eq!(code, CloseCode(1008));
        assert_eq!(reason, "invalid model");
    }

    #[tokio::test]
    async fn test_refused_connection_is_setup_error() {
        let h = harness();
        h.connector
            .refuse_next(TransportError::Timeout(Duration::from_secs(180)));

        let result = h.service.connect().await;
        assert!(matches!(
            result,
            Err(LiveSessionError::Setup(SetupError::Connect(TransportError::Timeout(_))))
        ));
        assert_eq!(h.service.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_sequential_callers_keep_order() {
        let mut h = harness();
        let mut peer = connect(&mut h).await;

        for word in ["first", "second", "third"] {
            let sender = h.service.outbound();
            tokio::spawn(async move { enqueue(&sender, text(word)) })
                .await
                .unwrap();
        }

        assert_eq!(next_text(&mut peer).await, "first");
        assert_eq!(next_text(&mut peer).await, "second");
        assert_eq!(next_text(&mut peer).await, "third");
    }

    #[tokio::test]
    async fn test_nothing_is_sent_before_ack() {
        let mut h = harness();
        let connecting = spawn_connect(&h.service);
        let mut peer = accept(&mut h.listener).await;

        h.service.send(text("early-1"));
        h.service.send(text("early-2"));
        assert!(
            tokio::time::timeout(Duration::from_millis(100), peer.recv())
                .await
                .is_err(),
            "message written before the handshake completed"
        );

        peer.send_json(&json!({ "setupComplete": {} }));
        tokio::time::timeout(WAIT, connecting).await.unwrap().unwrap().unwrap();

        assert_eq!(next_text(&mut peer).await, "early-1");
        assert_eq!(next_text(&mut peer).await, "early-2");
    }

    #[tokio::test]
    async fn test_duplicate_ack_is_tolerated() {
        let mut h = harness();
        let connecting = spawn_connect(&h.service);
        let peer = accept(&mut h.listener).await;

        peer.send_json(&json!({ "setupComplete": {} }));
        peer.send_json(&json!({ "setupComplete": {} }));
        peer.send_json(&json!({ "setupComplete": {} }));
        tokio::time::timeout(WAIT, connecting).await.unwrap().unwrap().unwrap();

        peer.send_json(&content_frame("after"));
        let Some(Ok(LiveServerMessage::Content(content))) = next_response(&mut h.responses).await
        else {
            panic!("expected server content");
        };
        assert_eq!(content.text(), "after");
        assert_eq!(h.service.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn test_text_and_unknown_frames_are_skipped() {
        let mut h = harness();
        let peer = connect(&mut h).await;

        peer.send_frame(Frame::Text(content_frame("text frame").to_string()));
        peer.send_json(&json!({ "sessionResumptionUpdate": { "newHandle": "h" } }));
        peer.send_json(&json!({ "goAway": { "timeLeft": "10s" } }));
        peer.send_json(&content_frame("binary frame"));

        let Some(Ok(LiveServerMessage::GoingAway(notice))) = next_response(&mut h.responses).await
        else {
            panic!("expected go away notice");
        };
        assert_eq!(notice.time_left(), Some(Duration::from_secs(10)));

        let Some(Ok(LiveServerMessage::Content(content))) = next_response(&mut h.responses).await
        else {
            panic!("expected server content");
        };
        assert_eq!(content.text(), "binary frame");
    }

    /// Fails to encode any realtime text equal to "poison"
    struct PoisonCodec;

    impl MessageCodec for PoisonCodec {
        fn encode(&self, message: &ClientMessage) -> Result<Frame, WireError> {
            if let ClientMessage::RealtimeInput(input) = message {
                if input.text.as_deref() == Some("poison") {
                    return Err(WireError::Encode("poisoned".to_string()));
                }
            }
            JsonCodec.encode(message)
        }

        fn decode(&self, frame: &Frame) -> Result<ServerFrame, WireError> {
            JsonCodec.decode(frame)
        }
    }

    #[tokio::test]
    async fn test_encode_failure_drops_only_that_message() {
        let mut h = harness_with_codec(Arc::new(PoisonCodec));
        let mut peer = connect(&mut h).await;

        h.service.send(text("before"));
        h.service.send(text("poison"));
        h.service.send(text("after"));

        assert_eq!(next_text(&mut peer).await, "before");
        assert_eq!(next_text(&mut peer).await, "after");
        assert_eq!(h.service.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn test_close_during_handshake_cancels_connect() {
        let mut h = harness();
        let connecting = spawn_connect(&h.service);
        let _peer = accept(&mut h.listener).await;

        h.service.close().await;

        let result = tokio::time::timeout(WAIT, connecting).await.unwrap().unwrap();
        assert_eq!(result, Err(LiveSessionError::Setup(SetupError::Cancelled)));
        assert!(next_response(&mut h.responses).await.is_none());
        assert_eq!(
            h.service.connect().await,
            Err(LiveSessionError::Setup(SetupError::Cancelled))
        );
    }

    #[tokio::test]
    async fn test_reconnect_replaces_previous_connection() {
        let mut h = harness();
        let first = spawn_connect(&h.service);
        let mut old_peer = accept(&mut h.listener).await;

        // Queued while the first handshake is pending; must survive the reconnect
        h.service.send(text("queued-1"));
        h.service.send(text("queued-2"));

        let second = spawn_connect(&h.service);
        let mut new_peer = accept(&mut h.listener).await;

        let result = tokio::time::timeout(WAIT, first).await.unwrap().unwrap();
        assert_eq!(result, Err(LiveSessionError::Setup(SetupError::Cancelled)));
        assert!(matches!(
            tokio::time::timeout(WAIT, old_peer.recv()).await.unwrap(),
            Some(TransportMessage::Close {
                code: CloseCode::GOING_AWAY,
                ..
            })
        ));

        new_peer.send_json(&json!({ "setupComplete": {} }));
        tokio::time::timeout(WAIT, second).await.unwrap().unwrap().unwrap();
        assert_eq!(h.service.state(), SessionState::Ready);

        assert_eq!(next_text(&mut new_peer).await, "queued-1");
        assert_eq!(next_text(&mut new_peer).await, "queued-2");

        new_peer.send_json(&content_frame("fresh"));
        assert!(matches!(
            next_response(&mut h.responses).await,
            Some(Ok(LiveServerMessage::Content(_)))
        ));
    }

    #[tokio::test]
    async fn test_drop_runs_cleanup() {
        let mut h = harness();
        let mut peer = connect(&mut h).await;

        drop(h.service);
        assert!(next_response(&mut h.responses).await.is_none());
        assert!(matches!(
            tokio::time::timeout(WAIT, peer.recv()).await.unwrap(),
            Some(TransportMessage::Close {
                code: CloseCode::GOING_AWAY,
                ..
            })
        ));
    }

    type InboundTx = futures::channel::mpsc::UnboundedSender<Result<TransportMessage, TransportError>>;

    /// Accepts connections whose outbound side never has room for a frame
    #[derive(Default)]
    struct StalledConnector {
        inbound: parking_lot::Mutex<Option<InboundTx>>,
        outbound: parking_lot::Mutex<Option<futures::channel::mpsc::Receiver<TransportMessage>>>,
    }

    #[async_trait::async_trait]
    impl Connector for StalledConnector {
        async fn connect(
            &self,
            _request: ConnectRequest,
        ) -> Result<(FrameSink, FrameSource), TransportError> {
            use futures::SinkExt;

            let (mut sink_tx, sink_rx) = futures::channel::mpsc::channel(0);
            // Take the only slot so every later send stays pending
            sink_tx
                .try_send(TransportMessage::Frame(Frame::from("filler")))
                .map_err(|e| TransportError::Io(e.to_string()))?;
            let (source_tx, source_rx) = futures::channel::mpsc::unbounded();

            *self.inbound.lock() = Some(source_tx);
            *self.outbound.lock() = Some(sink_rx);

            let sink = sink_tx.sink_map_err(|e| TransportError::Io(e.to_string()));
            Ok((Box::pin(sink), Box::pin(source_rx)))
        }
    }

    /// Never finishes dialing
    struct HangingConnector;

    #[async_trait::async_trait]
    impl Connector for HangingConnector {
        async fn connect(
            &self,
            request: ConnectRequest,
        ) -> Result<(FrameSink, FrameSource), TransportError> {
            futures::future::pending::<()>().await;
            Err(TransportError::Timeout(request.timeout))
        }
    }

    fn service_with(connector: Arc<dyn Connector>) -> (LiveSessionService, ResponseStream) {
        LiveSessionService::new(
            LiveSessionConfig::default(),
            connector,
            Arc::new(JsonCodec),
            TokenProviders::default(),
        )
    }

    #[tokio::test]
    async fn test_abandoned_connect_releases_transport() {
        let connector = Arc::new(StalledConnector::default());
        let (service, _responses) = service_with(connector.clone());

        let attempt = tokio::time::timeout(Duration::from_millis(200), service.connect()).await;
        assert!(attempt.is_err(), "setup send should still be pending");
        drop(service);

        let inbound = connector.inbound.lock().clone().unwrap();
        tokio::time::timeout(WAIT, async {
            while !inbound.is_closed() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("transport still held after the connect was abandoned");
    }

    #[tokio::test]
    async fn test_close_does_not_wait_for_dial() {
        let (service, mut responses) = service_with(Arc::new(HangingConnector));
        let service = Arc::new(service);

        let connecting = spawn_connect(&service);
        let mut state = service.subscribe_state();
        tokio::time::timeout(WAIT, state.wait_for(|s| *s == SessionState::Connecting))
            .await
            .unwrap()
            .unwrap();

        tokio::time::timeout(Duration::from_millis(500), service.close())
            .await
            .expect("close waited on the dial");

        let result = tokio::time::timeout(WAIT, connecting).await.unwrap().unwrap();
        assert_eq!(result, Err(LiveSessionError::Setup(SetupError::Cancelled)));
        assert_eq!(service.state(), SessionState::Closed);
        assert!(next_response(&mut responses).await.is_none());
    }

    #[tokio::test]
    async fn test_second_connect_supersedes_dial() {
        let (service, _responses) = service_with(Arc::new(HangingConnector));
        let service = Arc::new(service);

        let first = spawn_connect(&service);
        let mut state = service.subscribe_state();
        tokio::time::timeout(WAIT, state.wait_for(|s| *s == SessionState::Connecting))
            .await
            .unwrap()
            .unwrap();

        let _second = spawn_connect(&service);
        let result = tokio::time::timeout(WAIT, first).await.unwrap().unwrap();
        assert_eq!(result, Err(LiveSessionError::Setup(SetupError::Cancelled)));
    }
}
