//! Frames, message model and JSON codec for live model sessions.
//!
//! This crate describes everything that crosses the wire of a bidirectional
//! generative-model session: the transport [`Frame`], the messages a client
//! sends ([`ClientMessage`]), the messages a server sends ([`ServerFrame`] and
//! [`LiveServerMessage`]) and the [`MessageCodec`] seam that converts between
//! them.
//!
//! ## Wire Format
//!
//! Every message is a single JSON object keyed by its kind:
//!
//! ```text
//! client → server   {"setup": {...}}            first frame on every connection
//! server → client   {"setupComplete": {}}       handshake acknowledgement
//! client → server   {"realtimeInput": {...}}    | {"clientContent": {...}}
//!                                               | {"toolResponse": {...}}
//! server → client   {"serverContent": {...}}    | {"toolCall": {...}}
//!                                               | {"toolCallCancellation": {...}}
//!                                               | {"goAway": {...}}
//! ```
//!
//! Server objects with no key known to this crate decode to
//! [`ServerFrame::Unrecognized`] rather than failing, so new server message
//! kinds do not break existing clients.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod codec;
pub mod content;
pub mod error;
pub mod frame;
pub mod server;

// Re-export main types
pub use client::{
    AudioTranscriptionConfig, ClientContent, ClientMessage, GenerationConfig,
    LiveGenerationConfig, Modality, PrebuiltVoiceConfig, RealtimeInput, Setup, SpeechConfig,
    ToolResponse, VoiceConfig,
};
pub use codec::{JsonCodec, MessageCodec};
pub use content::{Blob, Content, FunctionCall, FunctionResponse, Part};
pub use error::WireError;
pub use frame::Frame;
pub use server::{
    decode_server_frame, parse_proto_duration, GoAway, LiveServerMessage, ServerContent,
    ServerFrame, ToolCall, ToolCallCancellation, Transcription,
};
