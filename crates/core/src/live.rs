//! The live backend seam.
//!
//! Transports decode whatever the backend sends into [`LiveFrame`]s exactly
//! once; everything downstream pattern-matches on the frame and never looks
//! at raw messages.

use crate::events::Modality;
use crate::tools::ToolDeclaration;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

/// One chunk of synthesized speech.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// A function call requested by the backend, as received.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub id: Option<String>,
    pub name: String,
    pub args: Value,
}

/// A decoded backend event.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveFrame {
    /// The in-progress response was cut short. Any content that arrived in the
    /// same backend message is discarded by the transport.
    Interrupted,
    /// Model output. Which fields are populated depends on the modality.
    Content {
        text: Option<String>,
        transcript: Option<String>,
        audio: Vec<AudioChunk>,
    },
    ToolCall(Vec<FunctionCall>),
    /// The backend finished its turn; the stream for this turn ends here.
    TurnComplete,
}

impl LiveFrame {
    pub fn text(text: impl Into<String>) -> Self {
        LiveFrame::Content {
            text: Some(text.into()),
            transcript: None,
            audio: Vec::new(),
        }
    }

    pub fn transcript(text: impl Into<String>) -> Self {
        LiveFrame::Content {
            text: None,
            transcript: Some(text.into()),
            audio: Vec::new(),
        }
    }

    pub fn audio(mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        LiveFrame::Content {
            text: None,
            transcript: None,
            audio: vec![AudioChunk {
                mime_type: mime_type.into(),
                data,
            }],
        }
    }

    pub fn tool_call(name: impl Into<String>, args: Value) -> Self {
        LiveFrame::ToolCall(vec![FunctionCall {
            id: None,
            name: name.into(),
            args,
        }])
    }
}

/// Everything a transport needs to open a session.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveSetup {
    pub modality: Modality,
    pub tools: Vec<ToolDeclaration>,
    pub system_instruction: Option<String>,
}

/// One open, bidirectional backend stream.
///
/// Only one prompt may be outstanding at a time: callers send a prompt, then
/// drain frames until `TurnComplete` or the end of the stream.
#[async_trait]
pub trait LiveConnection: Send {
    async fn send_prompt(&mut self, prompt: &str) -> Result<()>;

    /// The next frame of the current turn. `None` means the transport closed.
    async fn next_frame(&mut self) -> Option<Result<LiveFrame>>;

    /// Whether the underlying transport is still usable.
    fn is_open(&self) -> bool;

    async fn close(&mut self) -> Result<()>;
}

/// Opens backend connections.
///
/// A failed `connect` must not leave a half-open transport behind.
#[async_trait]
pub trait LiveConnector: Send + Sync {
    async fn connect(&self, setup: &LiveSetup) -> Result<Box<dyn LiveConnection>>;
}
