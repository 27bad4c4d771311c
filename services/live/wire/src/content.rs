//! Content model shared by client and server messages.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::WireError;

/// A turn of content from either the user or the model
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    /// Producer of the content ("user", "model", "system")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Ordered parts making up the content
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    /// Create content with the given role
    pub fn new(role: impl Into<String>, parts: Vec<Part>) -> Self {
        Self {
            role: Some(role.into()),
            parts,
        }
    }

    /// Create user content from a single text part
    pub fn user_text(text: impl Into<String>) -> Self {
        Self::new("user", vec![Part::text(text)])
    }

    /// Concatenation of every text part
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| part.text.as_deref())
            .collect()
    }
}

/// One piece of a [`Content`]
///
/// Exactly one of the payload fields is expected to be set; the backend
/// tolerates extra fields, so this is modelled as a struct rather than an enum.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    /// Plain text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Inline binary data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
    /// Function call requested by the model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
    /// Result of a function call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_response: Option<FunctionResponse>,
    /// Whether this part is a model thought
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<bool>,
}

impl Part {
    /// Text part
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    /// Inline data part
    pub fn inline_data(mime_type: impl Into<String>, data: &[u8]) -> Self {
        Self {
            inline_data: Some(Blob::new(mime_type, data)),
            ..Self::default()
        }
    }

    /// Function response part
    pub fn function_response(response: FunctionResponse) -> Self {
        Self {
            function_response: Some(response),
            ..Self::default()
        }
    }
}

/// Inline binary payload, base64 encoded on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    /// IANA media type of the data
    pub mime_type: String,
    /// Base64 encoded data
    pub data: String,
}

impl Blob {
    /// Encode raw bytes into a blob
    pub fn new(mime_type: impl Into<String>, data: &[u8]) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: STANDARD.encode(data),
        }
    }

    /// Decode the blob back into raw bytes
    pub fn decode(&self) -> Result<Vec<u8>, WireError> {
        STANDARD
            .decode(&self.data)
            .map_err(|e| WireError::InvalidBlob(e.to_string()))
    }
}

/// Function call requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionCall {
    /// Call identifier, echoed back in the matching [`FunctionResponse`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Name of the declared function
    pub name: String,
    /// Arguments as a JSON object
    #[serde(default)]
    pub args: Value,
}

/// Result of a function call, sent back to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionResponse {
    /// Identifier of the call being answered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Name of the function that was called
    pub name: String,
    /// Function output as a JSON object
    pub response: Value,
}

impl FunctionResponse {
    /// Create a response for the given call
    pub fn new(name: impl Into<String>, response: Value, id: Option<String>) -> Self {
        Self {
            id,
            name: name.into(),
            response,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_part_serializes_only_set_fields() {
        let value = serde_json::to_value(Part::text("hi")).unwrap();
        assert_eq!(value, json!({ "text": "hi" }));

        let value = serde_json::to_value(Part::inline_data("audio/pcm", &[0, 1, 2])).unwrap();
        assert_eq!(
            value,
            json!({ "inlineData": { "mimeType": "audio/pcm", "data": "AAEC" } })
        );
    }

    #[test]
    fn test_blob_decode() {
        let blob = Blob::new("image/jpeg", b"frame");
        assert_eq!(blob.decode().unwrap(), b"frame");

        let broken = Blob {
            mime_type: "image/jpeg".to_string(),
            data: "not base64!".to_string(),
        };
        assert!(matches!(broken.decode(), Err(WireError::InvalidBlob(_))));
    }

    #[test]
    fn test_content_text_skips_non_text_parts() {
        let content: Content = serde_json::from_value(json!({
            "role": "model",
            "parts": [
                { "text": "Hello" },
                { "inlineData": { "mimeType": "audio/pcm", "data": "" } },
                { "text": ", world", "thought": false }
            ]
        }))
        .unwrap();

        assert_eq!(content.role.as_deref(), Some("model"));
        assert_eq!(content.text(), "Hello, world");
    }
}
