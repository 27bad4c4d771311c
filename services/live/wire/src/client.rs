//! Messages sent from the client to the model.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::content::{Blob, Content, FunctionResponse};

/// Every message the client can put on the wire
///
/// Serialized externally tagged, e.g. `{"realtimeInput": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    /// Session configuration; must be the first message on a connection
    Setup(Setup),
    /// Incremental conversation content
    ClientContent(ClientContent),
    /// Realtime audio, video or text input
    RealtimeInput(RealtimeInput),
    /// Answers to tool calls
    ToolResponse(ToolResponse),
}

impl ClientMessage {
    /// Short name of the message kind for logging
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Setup(_) => "setup",
            ClientMessage::ClientContent(_) => "clientContent",
            ClientMessage::RealtimeInput(_) => "realtimeInput",
            ClientMessage::ToolResponse(_) => "toolResponse",
        }
    }
}

/// SETUP message body
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    /// Fully qualified model resource name
    pub model: String,
    /// Generation parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
    /// System instruction for the whole session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    /// Tool declarations, passed through untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Value>>,
    /// Tool configuration, passed through untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_config: Option<Value>,
    /// Enables transcripts of the user's audio
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<AudioTranscriptionConfig>,
    /// Enables transcripts of the model's audio
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<AudioTranscriptionConfig>,
}

impl Setup {
    /// Build a SETUP body from the user-facing configuration
    pub fn new(
        model: impl Into<String>,
        config: Option<&LiveGenerationConfig>,
        system_instruction: Option<Content>,
        tools: Option<Vec<Value>>,
        tool_config: Option<Value>,
    ) -> Self {
        let (generation_config, input_audio_transcription, output_audio_transcription) =
            match config {
                Some(config) => config.setup_parts(),
                None => (None, None, None),
            };

        Self {
            model: model.into(),
            generation_config,
            system_instruction,
            tools,
            tool_config,
            input_audio_transcription,
            output_audio_transcription,
        }
    }
}

/// Output modality the model should answer with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Modality {
    /// Text parts
    Text,
    /// Inline PCM audio
    Audio,
    /// Inline images
    Image,
}

/// Marker enabling audio transcription; carries no options yet
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AudioTranscriptionConfig {}

/// Voice selection for audio output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    /// Voice configuration
    pub voice_config: VoiceConfig,
    /// BCP-47 language code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_code: Option<String>,
}

impl SpeechConfig {
    /// Use one of the prebuilt voices
    pub fn prebuilt(voice_name: impl Into<String>) -> Self {
        Self {
            voice_config: VoiceConfig {
                prebuilt_voice_config: PrebuiltVoiceConfig {
                    voice_name: voice_name.into(),
                },
            },
            language_code: None,
        }
    }
}

/// Voice configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    /// Prebuilt voice
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

/// Prebuilt voice by name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    /// Voice name, e.g. "Kore"
    pub voice_name: String,
}

/// Generation parameters as they appear inside SETUP
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    /// Sampling temperature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Nucleus sampling threshold
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// Top-k sampling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<i32>,
    /// Number of candidates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_count: Option<i32>,
    /// Output token limit per turn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<i32>,
    /// Presence penalty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    /// Frequency penalty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    /// Modalities the model answers with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_modalities: Option<Vec<Modality>>,
    /// Voice selection for audio output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

/// User-facing generation configuration for a live session
///
/// Transcription switches live here for convenience but travel as separate
/// SETUP fields; see [`LiveGenerationConfig::setup_parts`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LiveGenerationConfig {
    /// Sampling temperature
    pub temperature: Option<f32>,
    /// Nucleus sampling threshold
    pub top_p: Option<f32>,
    /// Top-k sampling
    pub top_k: Option<i32>,
    /// Number of candidates
    pub candidate_count: Option<i32>,
    /// Output token limit per turn
    pub max_output_tokens: Option<i32>,
    /// Presence penalty
    pub presence_penalty: Option<f32>,
    /// Frequency penalty
    pub frequency_penalty: Option<f32>,
    /// Modalities the model answers with
    pub response_modalities: Option<Vec<Modality>>,
    /// Voice selection for audio output
    pub speech_config: Option<SpeechConfig>,
    /// Transcribe the user's audio input
    pub input_audio_transcription: Option<AudioTranscriptionConfig>,
    /// Transcribe the model's audio output
    pub output_audio_transcription: Option<AudioTranscriptionConfig>,
}

impl LiveGenerationConfig {
    /// Split into the SETUP generation config and the two transcription fields
    pub fn setup_parts(
        &self,
    ) -> (
        Option<GenerationConfig>,
        Option<AudioTranscriptionConfig>,
        Option<AudioTranscriptionConfig>,
    ) {
        let generation = GenerationConfig {
            temperature: self.temperature,
            top_p: self.top_p,
            top_k: self.top_k,
            candidate_count: self.candidate_count,
            max_output_tokens: self.max_output_tokens,
            presence_penalty: self.presence_penalty,
            frequency_penalty: self.frequency_penalty,
            response_modalities: self.response_modalities.clone(),
            speech_config: self.speech_config.clone(),
        };

        let generation = (generation != GenerationConfig::default()).then_some(generation);
        (
            generation,
            self.input_audio_transcription.clone(),
            self.output_audio_transcription.clone(),
        )
    }
}

/// Incremental conversation content
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContent {
    /// Content appended to the conversation
    #[serde(default)]
    pub turns: Vec<Content>,
    /// Whether the model should start generating after this content
    #[serde(default)]
    pub turn_complete: bool,
}

/// Realtime input; each field is an independent stream
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    /// Audio chunk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<Blob>,
    /// Video frame
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<Blob>,
    /// Text input
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Signals the audio stream was paused or ended
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_stream_end: Option<bool>,
}

/// Answers to one or more tool calls
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    /// Function results
    pub function_responses: Vec<FunctionResponse>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_setup_moves_transcription_out_of_generation_config() {
        let config = LiveGenerationConfig {
            response_modalities: Some(vec![Modality::Audio]),
            output_audio_transcription: Some(AudioTranscriptionConfig::default()),
            ..Default::default()
        };

        let setup = Setup::new("models/gemini-live", Some(&config), None, None, None);
        let value = serde_json::to_value(ClientMessage::Setup(setup)).unwrap();

        assert_eq!(
            value,
            json!({
                "setup": {
                    "model": "models/gemini-live",
                    "generationConfig": { "responseModalities": ["AUDIO"] },
                    "outputAudioTranscription": {}
                }
            })
        );
    }

    #[test]
    fn test_empty_generation_config_is_omitted() {
        let config = LiveGenerationConfig {
            input_audio_transcription: Some(AudioTranscriptionConfig::default()),
            ..Default::default()
        };

        let (generation, input, output) = config.setup_parts();
        assert!(generation.is_none());
        assert!(input.is_some());
        assert!(output.is_none());
    }

    #[test]
    fn test_realtime_input_shape() {
        let message = ClientMessage::RealtimeInput(RealtimeInput {
            text: Some("Does five plus five equal ten?".to_string()),
            ..Default::default()
        });

        assert_eq!(message.kind(), "realtimeInput");
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({ "realtimeInput": { "text": "Does five plus five equal ten?" } })
        );
    }

    #[test]
    fn test_speech_config_shape() {
        let value = serde_json::to_value(SpeechConfig::prebuilt("Kore")).unwrap();
        assert_eq!(
            value,
            json!({ "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": "Kore" } } })
        );
    }
}
