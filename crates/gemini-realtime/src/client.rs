//! WebSocket transport for the Gemini Live API.

use crate::types::{
    AudioTranscriptionConfig, ClientContent, ClientMessage, Content, FunctionDeclaration,
    FunctionResponse, GenerationConfig, Part, PrebuiltVoiceConfig, ResponseModality,
    ServerMessage, Setup, SpeechConfig, Tool, ToolResponse, VoiceConfig, gemini_schema,
};
use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use concierge_core::events::Modality;
use concierge_core::live::{FunctionCall, LiveConnection, LiveConnector, LiveFrame, LiveSetup};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";
pub const DEFAULT_MODEL: &str = "models/gemini-2.0-flash-exp";
pub const DEFAULT_VOICE: &str = "Aoede";

const SETUP_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: SecretString,
    pub model: String,
    pub voice: String,
    pub endpoint: String,
}

impl GeminiConfig {
    pub fn new(api_key: SecretString) -> Self {
        Self {
            api_key,
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }
}

/// Opens Gemini Live sessions.
pub struct GeminiConnector {
    config: GeminiConfig,
}

impl GeminiConnector {
    pub fn new(config: GeminiConfig) -> Self {
        Self { config }
    }

    fn setup_message(&self, setup: &LiveSetup) -> ClientMessage {
        let audio = setup.modality == Modality::Audio;
        let function_declarations: Vec<FunctionDeclaration> = setup
            .tools
            .iter()
            .map(|tool| FunctionDeclaration {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: gemini_schema(&tool.parameters),
            })
            .collect();

        ClientMessage::Setup(Setup {
            model: self.config.model.clone(),
            generation_config: GenerationConfig {
                response_modalities: vec![if audio {
                    ResponseModality::Audio
                } else {
                    ResponseModality::Text
                }],
                speech_config: audio.then(|| SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: self.config.voice.clone(),
                        },
                    },
                }),
            },
            system_instruction: setup.system_instruction.as_ref().map(|text| Content {
                role: None,
                parts: vec![Part { text: text.clone() }],
            }),
            tools: if function_declarations.is_empty() {
                Vec::new()
            } else {
                vec![Tool {
                    function_declarations,
                }]
            },
            output_audio_transcription: audio.then(AudioTranscriptionConfig::default),
        })
    }
}

async fn send(sink: &mut SplitSink<WsStream, WsMessage>, message: &ClientMessage) -> Result<()> {
    let payload = serde_json::to_string(message)?;
    sink.send(WsMessage::Text(payload.into())).await?;
    Ok(())
}

async fn handshake(
    sink: &mut SplitSink<WsStream, WsMessage>,
    stream: &mut SplitStream<WsStream>,
    setup: &ClientMessage,
) -> Result<()> {
    send(sink, setup).await.context("Failed to send setup")?;
    while let Some(message) = stream.next().await {
        let text = match message? {
            WsMessage::Text(text) => text.to_string(),
            WsMessage::Binary(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            WsMessage::Close(frame) => bail!("Gemini closed the connection during setup: {:?}", frame),
            _ => continue,
        };
        match serde_json::from_str::<ServerMessage>(&text) {
            Ok(reply) if reply.setup_complete.is_some() => return Ok(()),
            Ok(reply) => warn!(?reply, "Unexpected message during Gemini setup"),
            Err(_) => warn!(raw = %text, "Failed to parse Gemini message during setup"),
        }
    }
    Err(anyhow!("Gemini closed the stream before setup completed"))
}

#[async_trait]
impl LiveConnector for GeminiConnector {
    async fn connect(&self, setup: &LiveSetup) -> Result<Box<dyn LiveConnection>> {
        let url = format!(
            "{}?key={}",
            self.config.endpoint,
            self.config.api_key.expose_secret()
        );
        let (ws_stream, _) = connect_async(url)
            .await
            .context("Failed to connect to the Gemini Live endpoint")?;
        let (mut sink, mut stream) = ws_stream.split();

        let setup_message = self.setup_message(setup);
        let outcome = tokio::time::timeout(
            SETUP_TIMEOUT,
            handshake(&mut sink, &mut stream, &setup_message),
        )
        .await
        .unwrap_or_else(|_| Err(anyhow!("Gemini setup timed out")));

        if let Err(e) = outcome {
            // Never leave a half-open socket behind.
            if let Err(close_err) = sink.close().await {
                debug!(error = %close_err, "Error closing socket after failed setup");
            }
            return Err(e);
        }

        info!(model = %self.config.model, modality = ?setup.modality, "Gemini Live session is ready");
        Ok(Box::new(GeminiConnection {
            sink,
            stream,
            pending: VecDeque::new(),
            open: true,
            sink_closed: false,
        }))
    }
}

pub struct GeminiConnection {
    sink: SplitSink<WsStream, WsMessage>,
    stream: SplitStream<WsStream>,
    pending: VecDeque<LiveFrame>,
    open: bool,
    sink_closed: bool,
}

impl GeminiConnection {
    async fn ingest(&mut self, raw: &str) -> Result<()> {
        let message: ServerMessage =
            serde_json::from_str(raw).context("Failed to parse Gemini message")?;
        if message.go_away.is_some() {
            warn!("Gemini announced it will close the session soon");
        }
        let frames = message.into_frames();
        for frame in &frames {
            if let LiveFrame::ToolCall(calls) = frame {
                self.acknowledge(calls).await?;
            }
        }
        self.pending.extend(frames);
        Ok(())
    }

    // The model waits for a response to every function call before it
    // finishes the turn. Results are delivered through later prompts.
    async fn acknowledge(&mut self, calls: &[FunctionCall]) -> Result<()> {
        let response = ClientMessage::ToolResponse(ToolResponse {
            function_responses: calls
                .iter()
                .map(|call| FunctionResponse {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    response: json!({"result": "ok"}),
                })
                .collect(),
        });
        send(&mut self.sink, &response).await
    }
}

#[async_trait]
impl LiveConnection for GeminiConnection {
    async fn send_prompt(&mut self, prompt: &str) -> Result<()> {
        if !self.open {
            bail!("the Gemini connection is closed");
        }
        self.pending.clear();
        let message = ClientMessage::ClientContent(ClientContent {
            turns: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            turn_complete: true,
        });
        if let Err(e) = send(&mut self.sink, &message).await {
            self.open = false;
            return Err(e);
        }
        Ok(())
    }

    async fn next_frame(&mut self) -> Option<Result<LiveFrame>> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Some(Ok(frame));
            }
            if !self.open {
                return None;
            }
            let raw = match self.stream.next().await {
                Some(Ok(WsMessage::Text(text))) => text.to_string(),
                Some(Ok(WsMessage::Binary(bytes))) => String::from_utf8_lossy(&bytes).into_owned(),
                Some(Ok(WsMessage::Close(frame))) => {
                    warn!(?frame, "Gemini WebSocket connection closed by server");
                    self.open = false;
                    return None;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    self.open = false;
                    return Some(Err(anyhow!(e).context("Error reading from Gemini WebSocket")));
                }
                None => {
                    self.open = false;
                    return None;
                }
            };
            debug!(raw = %raw, "Gemini message");
            if let Err(e) = self.ingest(&raw).await {
                // The rest of this turn cannot be told apart from the next
                // one any more, so the connection is done.
                self.open = false;
                self.pending.clear();
                return Some(Err(e));
            }
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }

    async fn close(&mut self) -> Result<()> {
        self.open = false;
        if self.sink_closed {
            return Ok(());
        }
        self.sink_closed = true;
        self.sink
            .close()
            .await
            .context("Failed to close the Gemini WebSocket")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concierge_core::tools::declarations;
    use tokio::net::TcpListener;

    /// Accepts one client, completes setup, and answers the first prompt
    /// with `replies`.
    async fn scripted_server(replies: Vec<&'static str>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            ws.next().await;
            ws.send(WsMessage::Text(r#"{"setupComplete": {}}"#.into()))
                .await
                .unwrap();
            ws.next().await;
            for reply in replies {
                ws.send(WsMessage::Text(reply.into())).await.unwrap();
            }
            while let Some(Ok(_)) = ws.next().await {}
        });
        format!("ws://{}", addr)
    }

    fn connector() -> GeminiConnector {
        GeminiConnector::new(GeminiConfig::new(SecretString::from("test-key")))
    }

    #[test]
    fn test_text_setup_has_tools_and_no_voice() {
        let message = connector().setup_message(&LiveSetup {
            modality: Modality::Text,
            tools: declarations(),
            system_instruction: Some("Be brief.".into()),
        });
        let value = serde_json::to_value(&message).unwrap();

        let setup = &value["setup"];
        assert_eq!(setup["generationConfig"]["responseModalities"], json!(["TEXT"]));
        assert!(setup["generationConfig"].get("speechConfig").is_none());
        assert!(setup.get("outputAudioTranscription").is_none());
        assert_eq!(setup["systemInstruction"]["parts"][0]["text"], "Be brief.");

        let functions = setup["tools"][0]["functionDeclarations"].as_array().unwrap();
        let names: Vec<_> = functions.iter().map(|f| f["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["retrieve_products", "set_agent", "validate_products"]);
        assert_eq!(functions[0]["parameters"]["type"], "OBJECT");
        assert_eq!(functions[0]["parameters"]["properties"]["query"]["type"], "STRING");
    }

    #[test]
    fn test_audio_setup_has_voice_and_transcription() {
        let message = connector().setup_message(&LiveSetup {
            modality: Modality::Audio,
            tools: Vec::new(),
            system_instruction: None,
        });
        let value = serde_json::to_value(&message).unwrap();

        let setup = &value["setup"];
        assert_eq!(setup["generationConfig"]["responseModalities"], json!(["AUDIO"]));
        assert_eq!(
            setup["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
            "Aoede"
        );
        assert_eq!(setup["outputAudioTranscription"], json!({}));
        assert!(setup.get("tools").is_none());
    }

    #[tokio::test]
    async fn test_undecodable_message_ends_the_connection() {
        let mut config = GeminiConfig::new(SecretString::from("test-key"));
        config.endpoint = scripted_server(vec![
            r#"{"serverContent": {"modelTurn": {"parts": [{"text": "Aisle 7."}]}}}"#,
            "not json",
            r#"{"serverContent": {"modelTurn": {"parts": [{"text": "stale"}]}}}"#,
            r#"{"serverContent": {"turnComplete": true}}"#,
        ])
        .await;
        let mut connection = GeminiConnector::new(config)
            .connect(&LiveSetup {
                modality: Modality::Text,
                tools: Vec::new(),
                system_instruction: None,
            })
            .await
            .unwrap();

        connection.send_prompt("where are the blenders").await.unwrap();
        assert_eq!(
            connection.next_frame().await.unwrap().unwrap(),
            LiveFrame::text("Aisle 7.")
        );
        assert!(connection.next_frame().await.unwrap().is_err());
        assert!(!connection.is_open());

        // Nothing from the aborted turn leaks into the next prompt.
        assert!(connection.send_prompt("and the kettles?").await.is_err());
        assert!(connection.next_frame().await.is_none());
        connection.close().await.unwrap();
        connection.close().await.unwrap();
    }
}
