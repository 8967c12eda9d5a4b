//! Turn orchestration.
//!
//! [`ConversationEngine`] owns everything one caller connection needs and runs
//! its turns strictly one after another.

use crate::context::ConversationContext;
use crate::conversation::Role;
use crate::events::{InboundMessage, OutgoingEvent};
use crate::pipeline::{ValidationGate, agent_for, respond};
use crate::product::RetrievalResult;
use crate::router::route;
use crate::search::search_turn;
use crate::session::{DEFAULT_MAX_RETRIES, SessionError, SessionManager};
use crate::speech::{SpeechError, SpeechToText, decode_audio, parse_sample_rate};
use crate::turn::{TurnPhase, TurnTracker};
use async_stream::stream;
use futures::StreamExt;
use futures::stream::BoxStream;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

/// How turns are answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineMode {
    /// Route to one of the agents.
    #[default]
    Routed,
    /// Acknowledge, search, then answer over the results.
    Search,
}

impl FromStr for PipelineMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "routed" | "agent" => Ok(PipelineMode::Routed),
            "search" => Ok(PipelineMode::Search),
            other => Err(format!("'{}' is not a valid pipeline", other)),
        }
    }
}

pub struct ConversationEngine {
    ctx: ConversationContext,
    sessions: SessionManager,
    speech: Option<Arc<dyn SpeechToText>>,
    mode: PipelineMode,
    max_retries: u32,
    turns: u64,
}

impl ConversationEngine {
    pub fn new(ctx: ConversationContext, sessions: SessionManager) -> Self {
        Self {
            ctx,
            sessions,
            speech: None,
            mode: PipelineMode::default(),
            max_retries: DEFAULT_MAX_RETRIES,
            turns: 0,
        }
    }

    pub fn with_speech(mut self, speech: Arc<dyn SpeechToText>) -> Self {
        self.speech = Some(speech);
        self
    }

    pub fn with_mode(mut self, mode: PipelineMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn context(&self) -> &ConversationContext {
        &self.ctx
    }

    /// Opens the backend session.
    pub async fn start(&mut self) -> Result<(), SessionError> {
        self.sessions
            .acquire(self.ctx.modality, self.max_retries)
            .await
            .map(|session| {
                info!(session_id = %session.id(), "Live session ready");
            })
    }

    /// Releases the backend session and forgets the conversation.
    pub async fn shutdown(&mut self) {
        self.sessions.release().await;
        self.ctx.conversation.clear().await;
        info!(conversation_id = %self.ctx.id, turns = self.turns, "Conversation closed");
    }

    async fn transcribe(
        speech: Option<Arc<dyn SpeechToText>>,
        message: &InboundMessage,
    ) -> Result<String, SpeechError> {
        let speech = speech.ok_or_else(|| SpeechError::Service("no speech-to-text service is configured".into()))?;
        let audio = decode_audio(&message.message)?;
        let transcript = speech
            .transcribe(&audio, parse_sample_rate(&message.mime_type))
            .await?;
        info!(%transcript, "Transcribed caller audio");
        Ok(transcript)
    }

    /// Handles one caller message, transcribing audio first.
    pub fn handle_inbound(&mut self, message: InboundMessage) -> BoxStream<'_, OutgoingEvent> {
        Box::pin(stream! {
            let utterance = if message.is_audio() {
                match Self::transcribe(self.speech.clone(), &message).await {
                    Ok(transcript) => Some(transcript),
                    Err(e) => {
                        warn!(error = %e, "Transcription failed");
                        yield OutgoingEvent::error(format!("Transcription Error: {}", e));
                        None
                    }
                }
            } else {
                Some(message.message)
            };

            if let Some(utterance) = utterance {
                let mut turn = self.handle_utterance(utterance);
                while let Some(event) = turn.next().await {
                    yield event;
                }
            }
        })
    }

    /// Runs one turn for a text utterance.
    pub fn handle_utterance(&mut self, utterance: String) -> BoxStream<'_, OutgoingEvent> {
        Box::pin(stream! {
            let utterance = utterance.trim().to_string();
            if utterance.is_empty() {
                yield OutgoingEvent::error("Empty message");
            } else {
                self.turns += 1;
                let mut tracker = TurnTracker::new(self.ctx.id, self.turns);
                let ctx = &self.ctx;
                ctx.conversation.append(Role::User, utterance.as_str()).await;

                let ready = if self.sessions.is_active() {
                    Ok(())
                } else {
                    info!("Re-acquiring the live session");
                    self.sessions
                        .acquire(ctx.modality, self.max_retries)
                        .await
                        .map(|_| ())
                };

                match ready {
                    Err(e) => {
                        tracker.advance(TurnPhase::Errored);
                        yield OutgoingEvent::error(e.to_string());
                    }
                    Ok(()) => match self.mode {
                        PipelineMode::Routed => {
                            tracker.advance(TurnPhase::AwaitingRetrieval);
                            let decision = route(ctx, &mut self.sessions, &utterance).await;
                            tracker.advance(TurnPhase::RetrievalComplete);

                            if let Err(e) = self.sessions.reconcile() {
                                tracker.advance(TurnPhase::Errored);
                                yield OutgoingEvent::error(e.to_string());
                            } else if decision.interrupted {
                                tracker.advance(TurnPhase::Interrupted);
                                yield OutgoingEvent::interrupted();
                            } else {
                                tracker.advance(TurnPhase::AwaitingFinalResponse);
                                match self.sessions.connection_mut() {
                                    Err(e) => {
                                        tracker.advance(TurnPhase::Errored);
                                        yield OutgoingEvent::error(e.to_string());
                                    }
                                    Ok(connection) => {
                                        let agent = agent_for(decision.agent);
                                        let mut events = respond(
                                            agent,
                                            ctx,
                                            connection,
                                            &utterance,
                                            decision.retrieved.as_ref(),
                                        )
                                        .await;
                                        let candidates = decision
                                            .retrieved
                                            .as_ref()
                                            .map(RetrievalResult::products)
                                            .unwrap_or_default();
                                        let mut gate = ValidationGate::new();
                                        let mut outcome = TurnPhase::Completed;
                                        while let Some(event) = events.next().await {
                                            if tracker.phase() < TurnPhase::Streaming {
                                                tracker.advance(TurnPhase::Streaming);
                                            }
                                            let Some(event) = gate.screen(&ctx.bridge, event, candidates).await else {
                                                continue;
                                            };
                                            if event.is_error() {
                                                outcome = TurnPhase::Errored;
                                            } else if event.is_interruption() && outcome == TurnPhase::Completed {
                                                outcome = TurnPhase::Interrupted;
                                            }
                                            yield event;
                                        }
                                        tracker.advance(outcome);
                                    }
                                }
                            }
                        }
                        PipelineMode::Search => match self.sessions.connection_mut() {
                            Err(e) => {
                                tracker.advance(TurnPhase::Errored);
                                yield OutgoingEvent::error(e.to_string());
                            }
                            Ok(connection) => {
                                let mut events = search_turn(ctx, connection, utterance.clone(), tracker);
                                while let Some(event) = events.next().await {
                                    yield event;
                                }
                            }
                        },
                    },
                }

                // A lost transport is picked up by the next turn's acquire.
                if let Err(e) = self.sessions.reconcile() {
                    warn!(error = %e, "Session closed after turn");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Modality;
    use crate::live::{FunctionCall, LiveFrame};
    use crate::product::{MockRetriever, RetrievedProduct};
    use crate::speech::MockSpeechToText;
    use crate::testing::{ScriptedConnector, Step, context, product};
    use serde_json::json;

    fn engine(connector: &ScriptedConnector, retriever: MockRetriever) -> ConversationEngine {
        let ctx = context(retriever, Modality::Text);
        let sessions = SessionManager::new(Arc::new(connector.clone()), crate::tools::declarations());
        ConversationEngine::new(ctx, sessions).with_max_retries(1)
    }

    fn three_blenders() -> Vec<RetrievedProduct> {
        vec![
            product("X200", "X200 Blender", 39.0),
            product("P900", "ProBlend 900", 129.0),
            product("V5", "Vortex 5", 79.0),
        ]
    }

    async fn collect(stream: BoxStream<'_, OutgoingEvent>) -> Vec<OutgoingEvent> {
        stream.collect().await
    }

    #[tokio::test]
    async fn test_cheap_blender_scenario() {
        let connector = ScriptedConnector::new()
            .frames(vec![
                LiveFrame::text("Let me check."),
                LiveFrame::ToolCall(vec![
                    FunctionCall {
                        id: Some("call-1".into()),
                        name: "set_agent".into(),
                        args: json!({"agent_type": "Comparison"}),
                    },
                    FunctionCall {
                        id: Some("call-2".into()),
                        name: "retrieve_products".into(),
                        args: json!({"query": "cheap blender", "k": 3}),
                    },
                ]),
            ])
            .frames(vec![
                LiveFrame::text("Here are your options"),
                LiveFrame::text("The X200 is cheapest"),
            ]);
        let mut retriever = MockRetriever::new();
        retriever
            .expect_retrieve()
            .times(1)
            .returning(|_, _| Ok(three_blenders()));
        let mut engine = engine(&connector, retriever);
        engine.start().await.unwrap();

        let events = collect(engine.handle_utterance("find me a cheap blender".into())).await;

        assert_eq!(
            events,
            vec![
                OutgoingEvent::text("Here are your options"),
                OutgoingEvent::text("The X200 is cheapest"),
            ]
        );
        let entries = engine.context().conversation.entries().await;
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].role, Role::User);
        assert_eq!(entries[0].content, "find me a cheap blender");
        assert_eq!(entries[2].role, Role::System);
        assert_eq!(entries[2].content, "Here are your optionsThe X200 is cheapest");
        assert!(entries.windows(2).all(|w| w[0].seq < w[1].seq));

        let prompts = connector.prompts();
        assert!(prompts[1].contains("\"sku\": \"V5\""));
        assert!(prompts[1].contains("Do not call any tools."));
    }

    #[tokio::test]
    async fn test_malformed_routing_call_keeps_the_selected_agent() {
        let connector = ScriptedConnector::new()
            .frames(vec![
                LiveFrame::tool_call("set_agent", json!({"agent_type": "Navigation"})),
                LiveFrame::tool_call("retrieve_products", json!("blenders")),
            ])
            .frames(vec![LiveFrame::text("Blenders are in aisle 7.")]);
        let mut engine = engine(&connector, MockRetriever::new());
        engine.start().await.unwrap();

        let events = collect(engine.handle_utterance("where are the blenders".into())).await;

        assert_eq!(events, vec![OutgoingEvent::text("Blenders are in aisle 7.")]);
        let prompts = connector.prompts();
        assert!(prompts[1].contains("No locations available."));
        assert!(!prompts[1].contains("The request is unclear or general."));
    }

    #[tokio::test]
    async fn test_agent_validation_is_filtered_and_honoured_once() {
        let connector = ScriptedConnector::new()
            .frames(vec![LiveFrame::ToolCall(vec![
                FunctionCall {
                    id: None,
                    name: "set_agent".into(),
                    args: json!({"agent_type": "Navigation"}),
                },
                FunctionCall {
                    id: None,
                    name: "retrieve_products".into(),
                    args: json!({"query": "blender"}),
                },
            ])])
            .frames(vec![
                LiveFrame::tool_call("validate_products", json!({"products": ["X200", "FAKE"]})),
                LiveFrame::text("ok"),
                LiveFrame::tool_call("validate_products", json!({"products": ["GHOST"]})),
            ]);
        let mut retriever = MockRetriever::new();
        retriever
            .expect_retrieve()
            .times(1)
            .returning(|_, _| Ok(three_blenders()));
        let mut engine = engine(&connector, retriever);
        engine.start().await.unwrap();

        let events = collect(engine.handle_utterance("where is the X200".into())).await;

        assert_eq!(events.len(), 2);
        match &events[0] {
            OutgoingEvent::ToolResponse { tool_name, arguments } => {
                assert_eq!(tool_name, "validate_products");
                let skus: Vec<_> = arguments["products"]
                    .as_array()
                    .unwrap()
                    .iter()
                    .map(|p| p["sku"].as_str().unwrap())
                    .collect();
                assert_eq!(skus, vec!["X200"]);
            }
            other => panic!("expected a tool response, got {:?}", other),
        }
        assert_eq!(events[1], OutgoingEvent::text("ok"));
    }

    #[tokio::test]
    async fn test_lost_connection_during_routing_reconnects() {
        let connector = ScriptedConnector::new()
            .turn(vec![Step::Frame(LiveFrame::Interrupted), Step::Fail("bad frame".into())])
            .frames(vec![LiveFrame::tool_call("set_agent", json!({"agent_type": "Fallback"}))])
            .frames(vec![LiveFrame::text("How can I help?")]);
        let mut engine = engine(&connector, MockRetriever::new());
        engine.start().await.unwrap();

        let events = collect(engine.handle_utterance("uh".into())).await;
        assert_eq!(
            events,
            vec![OutgoingEvent::error(
                "backend transport failed: the live backend connection was lost"
            )]
        );

        let events = collect(engine.handle_utterance("hello".into())).await;
        assert_eq!(events, vec![OutgoingEvent::text("How can I help?")]);
        assert_eq!(connector.attempts().len(), 2);
    }

    #[tokio::test]
    async fn test_router_interruption_ends_the_turn() {
        let connector = ScriptedConnector::new().frames(vec![
            LiveFrame::Interrupted,
            LiveFrame::tool_call("set_agent", json!({"agent_type": "Navigation"})),
        ]);
        let mut engine = engine(&connector, MockRetriever::new());
        engine.start().await.unwrap();

        let events = collect(engine.handle_utterance("where is the milk".into())).await;

        assert_eq!(events, vec![OutgoingEvent::interrupted()]);
        assert_eq!(connector.prompts().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_utterance_is_rejected() {
        let connector = ScriptedConnector::new();
        let mut engine = engine(&connector, MockRetriever::new());

        let events = collect(engine.handle_utterance("   ".into())).await;

        assert_eq!(events, vec![OutgoingEvent::error("Empty message")]);
        assert!(engine.context().conversation.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_backend_is_one_error() {
        let connector = ScriptedConnector::new().failing_first(1);
        let mut engine = engine(&connector, MockRetriever::new());

        let events = collect(engine.handle_utterance("hello".into())).await;

        assert_eq!(
            events,
            vec![OutgoingEvent::error(
                "Our service is currently down. Please try again later."
            )]
        );
    }

    #[tokio::test]
    async fn test_audio_message_is_transcribed() {
        let connector = ScriptedConnector::new()
            .frames(vec![LiveFrame::tool_call("set_agent", json!({"agent_type": "Fallback"}))])
            .frames(vec![LiveFrame::text("Hi there!")]);
        let mut speech = MockSpeechToText::new();
        speech
            .expect_transcribe()
            .withf(|audio, rate| audio.to_vec() == vec![0u8, 1, 255] && *rate == 44_100)
            .times(1)
            .returning(|_, _| Ok("hello".to_string()));
        let mut engine = engine(&connector, MockRetriever::new()).with_speech(Arc::new(speech));
        engine.start().await.unwrap();

        let events = collect(engine.handle_inbound(InboundMessage {
            message: "AAH/".into(),
            mime_type: "audio/pcm;rate=44100".into(),
        }))
        .await;

        assert_eq!(events, vec![OutgoingEvent::text("Hi there!")]);
        assert_eq!(engine.context().conversation.entries().await[0].content, "hello");
    }

    #[tokio::test]
    async fn test_transcription_failure_keeps_the_conversation_going() {
        let connector = ScriptedConnector::new()
            .frames(vec![])
            .frames(vec![LiveFrame::text("Yes?")]);
        let mut speech = MockSpeechToText::new();
        speech
            .expect_transcribe()
            .returning(|_, _| Err(SpeechError::NoTranscript));
        let mut engine = engine(&connector, MockRetriever::new()).with_speech(Arc::new(speech));
        engine.start().await.unwrap();

        let events = collect(engine.handle_inbound(InboundMessage {
            message: "AAH/".into(),
            mime_type: "audio/pcm".into(),
        }))
        .await;
        assert_eq!(
            events,
            vec![OutgoingEvent::error("Transcription Error: No transcription received")]
        );

        let events = collect(engine.handle_inbound(InboundMessage {
            message: "hello?".into(),
            mime_type: "text/plain".into(),
        }))
        .await;
        assert_eq!(events, vec![OutgoingEvent::text("Yes?")]);
    }

    #[tokio::test]
    async fn test_search_mode() {
        let connector = ScriptedConnector::new()
            .frames(vec![
                LiveFrame::text("Looking now."),
                LiveFrame::tool_call("retrieve_products", json!({"query": "blender"})),
            ])
            .frames(vec![
                LiveFrame::tool_call("validate_products", json!({"products": ["X200"]})),
                LiveFrame::text("The X200 fits."),
            ]);
        let mut retriever = MockRetriever::new();
        retriever
            .expect_retrieve()
            .times(1)
            .returning(|_, _| Ok(three_blenders()));
        let mut engine = engine(&connector, retriever).with_mode(PipelineMode::Search);
        engine.start().await.unwrap();

        let events = collect(engine.handle_utterance("blender please".into())).await;

        assert_eq!(events.len(), 3);
        assert_eq!(events[0], OutgoingEvent::text("Looking now."));
        assert!(matches!(&events[1], OutgoingEvent::ToolResponse { tool_name, .. } if tool_name == "validate_products"));
        assert_eq!(events[2], OutgoingEvent::text("The X200 fits."));
    }

    #[tokio::test]
    async fn test_shutdown_releases_and_clears() {
        let connector = ScriptedConnector::new().frames(vec![]).frames(vec![LiveFrame::text("Hi")]);
        let mut engine = engine(&connector, MockRetriever::new());
        engine.start().await.unwrap();
        collect(engine.handle_utterance("hi".into())).await;

        engine.shutdown().await;
        engine.shutdown().await;

        assert!(engine.context().conversation.is_empty().await);
        assert_eq!(connector.closes(), 1);
    }

    #[test]
    fn test_pipeline_mode_from_str() {
        assert_eq!("search".parse::<PipelineMode>(), Ok(PipelineMode::Search));
        assert_eq!("Routed".parse::<PipelineMode>(), Ok(PipelineMode::Routed));
        assert!("graph".parse::<PipelineMode>().is_err());
    }
}
