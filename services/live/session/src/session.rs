//! Public session handle.

use live_wire::{
    Blob, ClientContent, ClientMessage, Content, FunctionResponse, Part, RealtimeInput,
    ToolResponse,
};
use tokio::sync::mpsc;

use crate::response::ResponseStream;
use crate::service::{enqueue, LiveSessionService, SessionState};

/// Mime type of realtime audio chunks: 16-bit PCM, 16 kHz, little-endian
pub const AUDIO_PCM_MIME_TYPE: &str = "audio/pcm";

/// Cloneable handle for sending on a session from any task
///
/// Holding a sender does not keep the session alive; once the session is
/// closed or dropped, sends are discarded.
#[derive(Debug, Clone)]
pub struct LiveSender {
    queue: mpsc::UnboundedSender<ClientMessage>,
}

impl LiveSender {
    /// Enqueue a message; delivery order matches call order
    pub fn send(&self, message: ClientMessage) {
        enqueue(&self.queue, message);
    }

    /// Send realtime text input
    pub fn send_text_realtime(&self, text: impl Into<String>) {
        self.send(ClientMessage::RealtimeInput(RealtimeInput {
            text: Some(text.into()),
            ..Default::default()
        }));
    }

    /// Send a chunk of raw PCM audio
    pub fn send_audio_realtime(&self, audio: &[u8]) {
        self.send(ClientMessage::RealtimeInput(RealtimeInput {
            audio: Some(Blob::new(AUDIO_PCM_MIME_TYPE, audio)),
            ..Default::default()
        }));
    }

    /// Signal that the audio stream paused or ended
    pub fn send_audio_stream_end(&self) {
        self.send(ClientMessage::RealtimeInput(RealtimeInput {
            audio_stream_end: Some(true),
            ..Default::default()
        }));
    }

    /// Send one encoded video frame, e.g. "image/jpeg"
    pub fn send_video_realtime(&self, frame: &[u8], mime_type: &str) {
        self.send(ClientMessage::RealtimeInput(RealtimeInput {
            video: Some(Blob::new(mime_type, frame)),
            ..Default::default()
        }));
    }

    /// Append user content to the conversation
    ///
    /// With `turn_complete` the model starts answering after this content.
    pub fn send_content(&self, parts: Vec<Part>, turn_complete: bool) {
        self.send(ClientMessage::ClientContent(ClientContent {
            turns: vec![Content::new("user", parts)],
            turn_complete,
        }));
    }

    /// Answer tool calls
    pub fn send_function_responses(&self, responses: Vec<FunctionResponse>) {
        self.send(ClientMessage::ToolResponse(ToolResponse {
            function_responses: responses,
        }));
    }
}

/// An established live session
///
/// Dropping the session performs the same cleanup as [`close`](Self::close).
pub struct LiveSession {
    service: LiveSessionService,
    sender: LiveSender,
    responses: ResponseStream,
}

impl LiveSession {
    pub(crate) fn new(service: LiveSessionService, responses: ResponseStream) -> Self {
        let sender = LiveSender {
            queue: service.outbound(),
        };
        Self {
            service,
            sender,
            responses,
        }
    }

    /// Enqueue a message
    pub fn send(&self, message: ClientMessage) {
        self.sender.send(message);
    }

    /// Handle for sending from other tasks
    pub fn sender(&self) -> LiveSender {
        self.sender.clone()
    }

    /// Messages from the model
    pub fn responses(&mut self) -> &mut ResponseStream {
        &mut self.responses
    }

    /// Close the session; safe to call any number of times
    pub async fn close(&self) {
        self.service.close().await;
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.service.state()
    }

    /// See [`LiveSender::send_text_realtime`]
    pub fn send_text_realtime(&self, text: impl Into<String>) {
        self.sender.send_text_realtime(text);
    }

    /// See [`LiveSender::send_audio_realtime`]
    pub fn send_audio_realtime(&self, audio: &[u8]) {
        self.sender.send_audio_realtime(audio);
    }

    /// See [`LiveSender::send_audio_stream_end`]
    pub fn send_audio_stream_end(&self) {
        self.sender.send_audio_stream_end();
    }

    /// See [`LiveSender::send_video_realtime`]
    pub fn send_video_realtime(&self, frame: &[u8], mime_type: &str) {
        self.sender.send_video_realtime(frame, mime_type);
    }

    /// See [`LiveSender::send_content`]
    pub fn send_content(&self, parts: Vec<Part>, turn_complete: bool) {
        self.sender.send_content(parts, turn_complete);
    }

    /// See [`LiveSender::send_function_responses`]
    pub fn send_function_responses(&self, responses: Vec<FunctionResponse>) {
        self.sender.send_function_responses(responses);
    }
}

impl std::fmt::Debug for LiveSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveSession")
            .field("model", &self.service.config().model)
            .field("state", &self.state())
            .finish()
    }
}
