//! Defines the WebSocket message protocol between the caller and the API server.
//!
//! Inbound frames are `{"message": ..., "mimeType": ...}` JSON text; outbound
//! frames are serialized [`OutgoingEvent`]s.

use concierge_core::events::{InboundMessage, OutgoingEvent};
use concierge_core::orchestrator::PipelineMode;
use serde::Deserialize;
use tracing::warn;

/// Close code sent when the caller does not identify its store.
pub const CLOSE_MISSING_STORE_ID: u16 = 4001;
/// Close code sent when the store configuration cannot be fetched.
pub const CLOSE_STORE_CONFIG_UNAVAILABLE: u16 = 4002;

pub const STORE_ID_HEADER: &str = "store-id";

/// Query parameters accepted on the upgrade request.
#[derive(Deserialize, Debug, Default)]
pub struct ConnectParams {
    /// Fallback for callers that cannot set the `store-id` header.
    pub store_id: Option<String>,
    pub pipeline: Option<String>,
}

impl ConnectParams {
    pub fn pipeline(&self) -> PipelineMode {
        match self.pipeline.as_deref().map(str::parse::<PipelineMode>) {
            Some(Ok(mode)) => mode,
            Some(Err(e)) => {
                warn!(error = %e, "Unknown pipeline requested, using the routed pipeline");
                PipelineMode::default()
            }
            None => PipelineMode::default(),
        }
    }
}

pub fn parse_inbound(text: &str) -> Result<InboundMessage, serde_json::Error> {
    serde_json::from_str(text)
}

pub fn encode(event: &OutgoingEvent) -> Result<String, serde_json::Error> {
    serde_json::to_string(event)
}

/// The first frame a caller receives once the live session is up.
pub fn greeting() -> OutgoingEvent {
    OutgoingEvent::Status { interrupted: false }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    #[test]
    fn test_parse_inbound() {
        let message = parse_inbound(r#"{"message": "AAH/", "mimeType": "audio/pcm;rate=16000"}"#).unwrap();
        assert!(message.is_audio());
        assert_eq!(message.message, "AAH/");

        assert!(parse_inbound(r#"{"text": "hi"}"#).is_err());
        assert!(parse_inbound("hello").is_err());
    }

    #[test]
    fn test_encode_events() {
        let encoded = |event: OutgoingEvent| -> Value {
            serde_json::from_str(&encode(&event).unwrap()).unwrap()
        };

        assert_eq!(encoded(greeting()), json!({"type": "status", "interrupted": false}));
        assert_eq!(
            encoded(OutgoingEvent::text("Aisle 7.")),
            json!({"type": "text", "message": "Aisle 7.", "mimeType": "text/plain"})
        );
        assert_eq!(
            encoded(OutgoingEvent::error("Empty message")),
            json!({"type": "error", "content": "Empty message"})
        );
    }

    #[test]
    fn test_pipeline_param() {
        let params = |pipeline: Option<&str>| ConnectParams {
            store_id: None,
            pipeline: pipeline.map(String::from),
        };
        assert_eq!(params(None).pipeline(), PipelineMode::Routed);
        assert_eq!(params(Some("search")).pipeline(), PipelineMode::Search);
        assert_eq!(params(Some("carousel")).pipeline(), PipelineMode::Routed);
    }
}
