//! Messages sent from the model to the client.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

use crate::content::{Content, FunctionCall};
use crate::error::WireError;

/// One decoded server frame
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    /// The backend accepted the SETUP message
    SetupComplete,
    /// A message for the caller
    Message(LiveServerMessage),
    /// Well-formed message of a kind we do not know yet
    Unrecognized {
        /// Top-level keys of the message
        keys: Vec<String>,
    },
}

/// Messages surfaced on a session's response stream
#[derive(Debug, Clone, PartialEq)]
pub enum LiveServerMessage {
    /// Model output or turn bookkeeping
    Content(ServerContent),
    /// The model wants the client to run functions
    ToolCall(ToolCall),
    /// Previously issued tool calls should not be executed
    ToolCallCancellation(ToolCallCancellation),
    /// The backend will close the connection soon
    GoingAway(GoAway),
}

impl LiveServerMessage {
    /// Short name of the message kind for logging
    pub fn kind(&self) -> &'static str {
        match self {
            LiveServerMessage::Content(_) => "serverContent",
            LiveServerMessage::ToolCall(_) => "toolCall",
            LiveServerMessage::ToolCallCancellation(_) => "toolCallCancellation",
            LiveServerMessage::GoingAway(_) => "goAway",
        }
    }
}

/// Incremental model output
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    /// Content generated by the model
    #[serde(default)]
    pub model_turn: Option<Content>,
    /// The model finished its turn
    #[serde(default)]
    pub turn_complete: bool,
    /// The client interrupted the model
    #[serde(default)]
    pub interrupted: bool,
    /// The model finished generating; playback may still be ongoing
    #[serde(default)]
    pub generation_complete: bool,
    /// Transcript of the user's audio
    #[serde(default)]
    pub input_transcription: Option<Transcription>,
    /// Transcript of the model's audio
    #[serde(default)]
    pub output_transcription: Option<Transcription>,
}

impl ServerContent {
    /// Text parts of the model turn, concatenated
    pub fn text(&self) -> String {
        self.model_turn
            .as_ref()
            .map(Content::text)
            .unwrap_or_default()
    }

    /// Output audio transcript, or an empty string
    pub fn output_transcript(&self) -> &str {
        self.output_transcription
            .as_ref()
            .and_then(|t| t.text.as_deref())
            .unwrap_or_default()
    }

    /// Input audio transcript, or an empty string
    pub fn input_transcript(&self) -> &str {
        self.input_transcription
            .as_ref()
            .and_then(|t| t.text.as_deref())
            .unwrap_or_default()
    }
}

/// Audio transcript fragment
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Transcription {
    /// Transcribed text
    #[serde(default)]
    pub text: Option<String>,
}

/// Request to run functions
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    /// Calls to run
    #[serde(default)]
    pub function_calls: Vec<FunctionCall>,
}

/// Cancellation of earlier tool calls
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ToolCallCancellation {
    /// Identifiers of the cancelled calls
    #[serde(default)]
    pub ids: Vec<String>,
}

/// Notice that the server will disconnect
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    /// Remaining time as a protobuf duration string, e.g. "12.5s"
    #[serde(default)]
    pub time_left: Option<String>,
}

impl GoAway {
    /// Remaining time before the connection is terminated
    pub fn time_left(&self) -> Option<Duration> {
        self.time_left.as_deref().and_then(parse_proto_duration)
    }
}

/// Parse a protobuf JSON duration ("3s", "1.5s", "0.000001s")
pub fn parse_proto_duration(s: &str) -> Option<Duration> {
    let seconds: f64 = s.strip_suffix('s')?.parse().ok()?;
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    Some(Duration::from_secs_f64(seconds))
}

/// Decode raw frame bytes into a [`ServerFrame`]
pub fn decode_server_frame(bytes: &[u8]) -> Result<ServerFrame, WireError> {
    let value: Value = serde_json::from_slice(bytes).map_err(WireError::decode)?;
    let Value::Object(mut object) = value else {
        return Err(WireError::Decode("expected a JSON object".to_string()));
    };

    if object.contains_key("setupComplete") {
        return Ok(ServerFrame::SetupComplete);
    }
    if let Some(body) = object.remove("serverContent") {
        return parse_body(body).map(|c| ServerFrame::Message(LiveServerMessage::Content(c)));
    }
    if let Some(body) = object.remove("toolCall") {
        return parse_body(body).map(|c| ServerFrame::Message(LiveServerMessage::ToolCall(c)));
    }
    if let Some(body) = object.remove("toolCallCancellation") {
        return parse_body(body)
            .map(|c| ServerFrame::Message(LiveServerMessage::ToolCallCancellation(c)));
    }
    if let Some(body) = object.remove("goAway") {
        return parse_body(body).map(|c| ServerFrame::Message(LiveServerMessage::GoingAway(c)));
    }

    Ok(ServerFrame::Unrecognized {
        keys: keys_of(&object),
    })
}

fn parse_body<T: serde::de::DeserializeOwned>(body: Value) -> Result<T, WireError> {
    serde_json::from_value(body).map_err(WireError::decode)
}

fn keys_of(object: &Map<String, Value>) -> Vec<String> {
    object.keys().cloned().collect()
}
