//! Caller-facing event vocabulary.
//!
//! `OutgoingEvent` is the only thing that crosses the boundary towards the
//! caller. Internal frames, phases and tool results are all translated into
//! one of its variants before they leave the core.

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Sample rate the caller's player expects for assistant audio.
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

/// Response medium negotiated for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    #[default]
    Text,
    Audio,
}

impl std::str::FromStr for Modality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" => Ok(Modality::Text),
            "audio" => Ok(Modality::Audio),
            other => Err(format!("'{}' is not a valid modality", other)),
        }
    }
}

/// Events streamed to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutgoingEvent {
    /// The in-progress response was (or was not) cut short.
    Status { interrupted: bool },
    /// A chunk of assistant audio, base64 encoded.
    Audio {
        message: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    /// A fragment of assistant text.
    Text {
        message: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    /// A structured tool invocation surfaced to the caller.
    ToolResponse {
        tool_name: String,
        arguments: Map<String, Value>,
    },
    Error { content: String },
}

impl OutgoingEvent {
    pub fn interrupted() -> Self {
        OutgoingEvent::Status { interrupted: true }
    }

    pub fn text(message: impl Into<String>) -> Self {
        OutgoingEvent::Text {
            message: message.into(),
            mime_type: "text/plain".to_string(),
        }
    }

    /// Wraps raw audio bytes, tagging the codec with the playback rate.
    ///
    /// Any parameters already present on `mime_type` are replaced, so
    /// `audio/pcm;rate=16000` becomes `audio/pcm;rate=24000`.
    pub fn audio(data: &[u8], mime_type: &str) -> Self {
        let codec = mime_type.split(';').next().unwrap_or_default().trim();
        let codec = if codec.is_empty() { "audio/pcm" } else { codec };
        OutgoingEvent::Audio {
            message: base64::engine::general_purpose::STANDARD.encode(data),
            mime_type: format!("{};rate={}", codec, PLAYBACK_SAMPLE_RATE),
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        OutgoingEvent::Error {
            content: content.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, OutgoingEvent::Error { .. })
    }

    pub fn is_interruption(&self) -> bool {
        matches!(self, OutgoingEvent::Status { interrupted: true })
    }
}

/// A message received from the caller.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct InboundMessage {
    pub message: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
}

impl InboundMessage {
    pub fn is_audio(&self) -> bool {
        self.mime_type.trim().to_lowercase().starts_with("audio/")
    }
}
