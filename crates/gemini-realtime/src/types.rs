//! Wire types of the Gemini Live (BidiGenerateContent) protocol, and the
//! decoding of server messages into [`LiveFrame`]s.

use base64::Engine;
use concierge_core::live::{AudioChunk, FunctionCall, LiveFrame};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

// --- Client messages ---

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    ClientContent(ClientContent),
    ToolResponse(ToolResponse),
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<AudioTranscriptionConfig>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<ResponseModality>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResponseModality {
    Text,
    Audio,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Serialize, Debug, Default)]
pub struct AudioTranscriptionConfig {}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Serialize, Debug)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Serialize, Debug)]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub parts: Vec<Part>,
}

#[derive(Serialize, Debug)]
pub struct Part {
    pub text: String,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ClientContent {
    pub turns: Vec<Content>,
    pub turn_complete: bool,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub function_responses: Vec<FunctionResponse>,
}

#[derive(Serialize, Debug)]
pub struct FunctionResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub response: Value,
}

/// The live API expects OpenAPI-style upper-case type names.
pub fn gemini_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| {
                    let value = match (key.as_str(), value) {
                        ("type", Value::String(ty)) => Value::String(ty.to_uppercase()),
                        _ => gemini_schema(value),
                    };
                    (key.clone(), value)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(gemini_schema).collect()),
        other => other.clone(),
    }
}

// --- Server messages ---

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    pub setup_complete: Option<Value>,
    pub server_content: Option<ServerContent>,
    pub tool_call: Option<ServerToolCall>,
    pub go_away: Option<Value>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    pub model_turn: Option<ServerContentTurn>,
    pub interrupted: Option<bool>,
    pub turn_complete: Option<bool>,
    pub output_transcription: Option<Transcription>,
}

#[derive(Deserialize, Debug)]
pub struct ServerContentTurn {
    #[serde(default)]
    pub parts: Vec<ServerPart>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ServerPart {
    pub text: Option<String>,
    pub inline_data: Option<ServerBlob>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ServerBlob {
    #[serde(default)]
    pub mime_type: String,
    pub data: String,
}

#[derive(Deserialize, Debug)]
pub struct Transcription {
    pub text: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ServerToolCall {
    #[serde(default)]
    pub function_calls: Vec<ServerFunctionCall>,
}

#[derive(Deserialize, Debug)]
pub struct ServerFunctionCall {
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

impl ServerMessage {
    /// Decodes one server message into frames, in order.
    ///
    /// An interrupted message produces only [`LiveFrame::Interrupted`]; the
    /// rest of its content belongs to the response that was cut short.
    pub fn into_frames(self) -> Vec<LiveFrame> {
        let mut frames = Vec::new();

        if let Some(content) = self.server_content {
            if content.interrupted == Some(true) {
                return vec![LiveFrame::Interrupted];
            }

            let mut text: Option<String> = None;
            let mut audio = Vec::new();
            for part in content.model_turn.map(|turn| turn.parts).unwrap_or_default() {
                if let Some(fragment) = part.text {
                    text.get_or_insert_with(String::new).push_str(&fragment);
                }
                if let Some(blob) = part.inline_data {
                    match base64::engine::general_purpose::STANDARD.decode(&blob.data) {
                        Ok(data) if !data.is_empty() => audio.push(AudioChunk {
                            mime_type: blob.mime_type,
                            data,
                        }),
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "Skipping undecodable audio chunk"),
                    }
                }
            }
            let transcript = content.output_transcription.and_then(|t| t.text);

            if text.is_some() || transcript.is_some() || !audio.is_empty() {
                frames.push(LiveFrame::Content {
                    text,
                    transcript,
                    audio,
                });
            }
            if content.turn_complete == Some(true) {
                frames.push(LiveFrame::TurnComplete);
            }
        }

        if let Some(tool_call) = self.tool_call {
            let calls: Vec<FunctionCall> = tool_call
                .function_calls
                .into_iter()
                .map(|call| FunctionCall {
                    id: call.id,
                    name: call.name,
                    args: call.args,
                })
                .collect();
            if !calls.is_empty() {
                // A tool call finishes nothing by itself; keep it ahead of any
                // turn-complete marker from the same message.
                let at = frames
                    .iter()
                    .position(|f| *f == LiveFrame::TurnComplete)
                    .unwrap_or(frames.len());
                frames.insert(at, LiveFrame::ToolCall(calls));
            }
        }

        frames
    }
}
