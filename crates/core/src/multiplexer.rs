//! Stream Multiplexer
//!
//! Drives one backend turn and turns its frames into caller-facing events.

use crate::conversation::{ConversationStore, Role};
use crate::events::{Modality, OutgoingEvent};
use crate::live::{FunctionCall, LiveConnection, LiveFrame};
use futures::stream::{self, BoxStream};
use serde_json::{Map, Value};
use std::collections::{HashSet, VecDeque};
use tracing::{debug, info, warn};

/// Sentinel the backend sometimes emits in place of empty content.
const NONE_TOKEN: &str = "None";

const TOOL_CALL_ERROR: &str = "Error processing tool call";

/// The error event for a tool call that could not be formatted or parsed.
pub fn tool_call_error(reason: impl std::fmt::Display) -> OutgoingEvent {
    OutgoingEvent::error(format!("{}: {}", TOOL_CALL_ERROR, reason))
}

/// Whether `event` reports a malformed tool call rather than a transport
/// failure. The turn keeps going after such an error.
pub fn is_tool_call_error(event: &OutgoingEvent) -> bool {
    matches!(event, OutgoingEvent::Error { content } if content.starts_with(TOOL_CALL_ERROR))
}

/// Per-turn decoding state.
#[derive(Debug)]
pub struct TurnDecoder {
    modality: Modality,
    assistant: String,
    seen: HashSet<String>,
}

impl TurnDecoder {
    pub fn new(modality: Modality) -> Self {
        Self {
            modality,
            assistant: String::new(),
            seen: HashSet::new(),
        }
    }

    /// Events produced by one frame, in order.
    pub fn decode(&mut self, frame: LiveFrame) -> Vec<OutgoingEvent> {
        match frame {
            LiveFrame::Interrupted => vec![OutgoingEvent::interrupted()],
            LiveFrame::Content {
                text,
                transcript,
                audio,
            } => match self.modality {
                Modality::Audio => {
                    if let Some(fragment) = transcript {
                        self.accumulate_transcript(fragment);
                    }
                    audio
                        .into_iter()
                        .filter(|chunk| !chunk.data.is_empty())
                        .map(|chunk| OutgoingEvent::audio(&chunk.data, &chunk.mime_type))
                        .collect()
                }
                Modality::Text => match text {
                    Some(text) if !text.is_empty() => {
                        self.assistant.push_str(&text);
                        vec![OutgoingEvent::text(text)]
                    }
                    _ => Vec::new(),
                },
            },
            LiveFrame::ToolCall(calls) => match tool_responses(calls) {
                Ok(events) => events,
                Err(reason) => {
                    warn!(%reason, "Could not format tool call");
                    vec![tool_call_error(reason)]
                }
            },
            LiveFrame::TurnComplete => Vec::new(),
        }
    }

    fn accumulate_transcript(&mut self, fragment: String) {
        if fragment.is_empty() || fragment == NONE_TOKEN || self.seen.contains(&fragment) {
            return;
        }
        debug!(fragment = %fragment, "Assistant transcript");
        self.assistant.push_str(&fragment);
        self.seen.insert(fragment);
    }

    /// The assistant message accumulated so far, without sentinel tokens.
    pub fn finish(&self) -> Option<String> {
        let cleaned = self.assistant.replace(NONE_TOKEN, "");
        let cleaned = cleaned.trim();
        (!cleaned.is_empty()).then(|| cleaned.to_string())
    }
}

/// One `ToolResponse` per call; any malformed call fails the whole message.
fn tool_responses(calls: Vec<FunctionCall>) -> Result<Vec<OutgoingEvent>, String> {
    calls
        .into_iter()
        .map(|call| {
            if call.name.trim().is_empty() {
                return Err("function call without a name".to_string());
            }
            let arguments = match call.args {
                Value::Object(map) => map,
                Value::Null => Map::new(),
                other => {
                    return Err(format!(
                        "arguments of '{}' must be an object, got {}",
                        call.name, other
                    ));
                }
            };
            Ok(OutgoingEvent::ToolResponse {
                tool_name: call.name,
                arguments,
            })
        })
        .collect()
}

struct TurnState<'a> {
    connection: &'a mut dyn LiveConnection,
    prompt: Option<String>,
    decoder: TurnDecoder,
    conversation: ConversationStore,
    pending: VecDeque<OutgoingEvent>,
    done: bool,
}

impl TurnState<'_> {
    /// Pulls frames until there is something to yield or the turn is over.
    async fn fill(&mut self) {
        if let Some(prompt) = self.prompt.take() {
            if let Err(e) = self.connection.send_prompt(&prompt).await {
                warn!(error = %e, "Failed to send prompt to the live backend");
                self.fail(format!("Error during live chat: {}", e));
                return;
            }
        }

        while self.pending.is_empty() && !self.done {
            match self.connection.next_frame().await {
                Some(Ok(LiveFrame::TurnComplete)) => {
                    if let Some(note) = self.decoder.finish() {
                        self.conversation.append(Role::System, note).await;
                    }
                    info!("Backend turn complete");
                    self.done = true;
                }
                Some(Ok(frame)) => {
                    debug!(?frame, "Backend frame");
                    let events = self.decoder.decode(frame);
                    self.pending.extend(events);
                }
                Some(Err(e)) => {
                    warn!(error = %e, "Live backend stream failed");
                    self.fail(e.to_string());
                }
                None => {
                    warn!("Live backend closed the stream mid-turn");
                    self.fail("Error during live chat: the live backend closed the stream");
                }
            }
        }
    }

    fn fail(&mut self, content: impl Into<String>) {
        self.pending.push_back(OutgoingEvent::error(content));
        self.done = true;
    }
}

/// Sends `prompt` and streams the resulting backend turn.
///
/// The stream is finite and ends at the backend's turn-complete signal. An
/// interruption yields `Status { interrupted: true }` and decoding carries on.
/// A transport failure yields exactly one `Error` and ends the stream without
/// touching the conversation. On normal completion the accumulated assistant
/// message, if any, is appended as a `system` entry.
pub fn stream_turn<'a>(
    connection: &'a mut dyn LiveConnection,
    prompt: String,
    modality: Modality,
    conversation: ConversationStore,
) -> BoxStream<'a, OutgoingEvent> {
    let state = TurnState {
        connection,
        prompt: Some(prompt),
        decoder: TurnDecoder::new(modality),
        conversation,
        pending: VecDeque::new(),
        done: false,
    };

    Box::pin(stream::unfold(state, |mut state| async move {
        if state.pending.is_empty() && !state.done {
            state.fill().await;
        }
        let event = state.pending.pop_front()?;
        Some((event, state))
    }))
}
