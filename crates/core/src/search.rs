//! Product search pipeline.
//!
//! A two-phase alternative to routing: a tool-call-only turn acknowledges the
//! caller and produces the search query, the retrieval runs, and a final turn
//! answers over the results. `validate_products` is honoured once per turn.

use crate::context::ConversationContext;
use crate::events::OutgoingEvent;
use crate::live::LiveConnection;
use crate::multiplexer::stream_turn;
use crate::pipeline::ValidationGate;
use crate::prompts;
use crate::tools::{RetrieveProductsArgs, ToolCall, ToolName};
use crate::turn::{TurnPhase, TurnTracker};
use async_stream::stream;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

/// Runs one search turn for `query`.
pub fn search_turn<'a>(
    ctx: &'a ConversationContext,
    connection: &'a mut dyn LiveConnection,
    query: String,
    mut tracker: TurnTracker,
) -> BoxStream<'a, OutgoingEvent> {
    Box::pin(stream! {
        tracker.advance(TurnPhase::AwaitingRetrieval);
        let history = ctx.conversation.render().await;
        let prompt = prompts::fill(
            prompts::SEARCH_INITIAL,
            &[("query", &query), ("history", &history)],
        );

        let mut search_args: Option<Map<String, Value>> = None;
        let mut failed = false;
        {
            let mut events = stream_turn(&mut *connection, prompt, ctx.modality, ctx.conversation.clone());
            while let Some(event) = events.next().await {
                match event {
                    OutgoingEvent::ToolResponse { tool_name, arguments } => {
                        if tool_name == ToolName::RetrieveProducts.as_str() {
                            search_args = Some(arguments);
                        } else {
                            debug!(tool = %tool_name, "Ignoring tool call in the acknowledgement turn");
                        }
                    }
                    OutgoingEvent::Error { .. } => {
                        failed = true;
                        yield event;
                    }
                    other => yield other,
                }
            }
        }

        if failed {
            tracker.advance(TurnPhase::Errored);
        } else {
            let args = match search_args.map(|args| ToolCall::parse(ToolName::RetrieveProducts.as_str(), &args)) {
                Some(Ok(ToolCall::RetrieveProducts(args))) => args,
                other => {
                    if let Some(Err(e)) = other {
                        warn!(error = %e, "Malformed retrieve_products call, searching with the raw query");
                    } else {
                        info!("No retrieve_products call, searching with the raw query");
                    }
                    RetrieveProductsArgs { query: query.clone(), k: None }
                }
            };
            let retrieved = ctx.bridge.retrieve(args).await;
            tracker.advance(TurnPhase::RetrievalComplete);

            let history = ctx.conversation.render().await;
            let prompt = prompts::fill(
                prompts::SEARCH_FINAL,
                &[
                    ("query", &query),
                    ("history", &history),
                    ("products", &retrieved.to_prompt_json()),
                ],
            );
            tracker.advance(TurnPhase::AwaitingFinalResponse);

            let mut outcome = TurnPhase::Completed;
            let mut gate = ValidationGate::new();
            let mut events = stream_turn(connection, prompt, ctx.modality, ctx.conversation.clone());
            while let Some(event) = events.next().await {
                if tracker.phase() < TurnPhase::Streaming {
                    tracker.advance(TurnPhase::Streaming);
                }
                let Some(event) = gate.screen(&ctx.bridge, event, retrieved.products()).await else {
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
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Modality;
    use crate::live::{LiveConnector, LiveFrame, LiveSetup};
    use crate::product::MockRetriever;
    use crate::testing::{ScriptedConnector, Step, context, product};
    use serde_json::json;

    async fn connect(connector: &ScriptedConnector) -> Box<dyn LiveConnection> {
        connector
            .connect(&LiveSetup {
                modality: Modality::Text,
                tools: Vec::new(),
                system_instruction: None,
            })
            .await
            .unwrap()
    }

    fn blenders() -> MockRetriever {
        let mut retriever = MockRetriever::new();
        retriever.expect_retrieve().times(1).returning(|_, _| {
            Ok(vec![
                product("X200", "X200 Blender", 39.0),
                product("P900", "ProBlend 900", 129.0),
                product("M50", "Mini 50", 25.0),
            ])
        });
        retriever
    }

    fn validated_skus(event: &OutgoingEvent) -> Vec<String> {
        match event {
            OutgoingEvent::ToolResponse { tool_name, arguments } => {
                assert_eq!(tool_name, "validate_products");
                arguments["products"]
                    .as_array()
                    .unwrap()
                    .iter()
                    .map(|p| p["sku"].as_str().unwrap().to_string())
                    .collect()
            }
            other => panic!("expected a tool response, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_validate_products_is_honoured_once() {
        let connector = ScriptedConnector::new()
            .frames(vec![
                LiveFrame::text("One moment while I look."),
                LiveFrame::tool_call("retrieve_products", json!({"query": "cheap blender"})),
            ])
            .frames(vec![
                LiveFrame::tool_call("validate_products", json!({"products": ["M50", "X200", "FAKE"]})),
                LiveFrame::text("The Mini 50 is the cheapest."),
                LiveFrame::tool_call("validate_products", json!({"products": ["P900"]})),
            ]);
        let ctx = context(blenders(), Modality::Text);
        let mut connection = connect(&connector).await;

        let events: Vec<_> = search_turn(
            &ctx,
            connection.as_mut(),
            "find me a cheap blender".into(),
            TurnTracker::new(ctx.id, 1),
        )
        .collect()
        .await;

        assert_eq!(events.len(), 3);
        assert_eq!(events[0], OutgoingEvent::text("One moment while I look."));
        assert_eq!(validated_skus(&events[1]), vec!["M50", "X200"]);
        assert_eq!(events[2], OutgoingEvent::text("The Mini 50 is the cheapest."));
        assert!(!events.iter().skip(2).any(|e| matches!(e, OutgoingEvent::ToolResponse { .. })));

        let prompts = connector.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains("\"sku\": \"P900\""));
    }

    #[tokio::test]
    async fn test_malformed_validation_does_not_block_a_later_one() {
        let connector = ScriptedConnector::new()
            .frames(vec![LiveFrame::tool_call("retrieve_products", json!({"query": "blender"}))])
            .frames(vec![
                LiveFrame::tool_call("validate_products", json!({"products": "X200"})),
                LiveFrame::tool_call("validate_products", json!({"products": ["P900"]})),
                LiveFrame::text("The ProBlend is sturdier."),
            ]);
        let ctx = context(blenders(), Modality::Text);
        let mut connection = connect(&connector).await;

        let events: Vec<_> = search_turn(&ctx, connection.as_mut(), "a sturdy blender".into(), TurnTracker::new(ctx.id, 1))
            .collect()
            .await;

        assert_eq!(events.len(), 3);
        assert!(events[0].is_error());
        assert_eq!(validated_skus(&events[1]), vec!["P900"]);
        assert_eq!(events[2], OutgoingEvent::text("The ProBlend is sturdier."));
    }

    #[tokio::test]
    async fn test_missing_search_call_uses_the_raw_query() {
        let connector = ScriptedConnector::new()
            .frames(vec![LiveFrame::text("Sure!")])
            .frames(vec![LiveFrame::text("Here you go.")]);
        let mut retriever = MockRetriever::new();
        retriever
            .expect_retrieve()
            .withf(|query, k| query.to_string() == "kettles" && *k == 4)
            .times(1)
            .returning(|_, _| Ok(Vec::new()));
        let ctx = context(retriever, Modality::Text);
        let mut connection = connect(&connector).await;

        let events: Vec<_> = search_turn(&ctx, connection.as_mut(), "kettles".into(), TurnTracker::new(ctx.id, 1))
            .collect()
            .await;

        assert_eq!(
            events,
            vec![OutgoingEvent::text("Sure!"), OutgoingEvent::text("Here you go.")]
        );
    }

    #[tokio::test]
    async fn test_failed_acknowledgement_skips_retrieval() {
        let connector = ScriptedConnector::new().turn(vec![Step::Fail("socket closed".into())]);
        let ctx = context(MockRetriever::new(), Modality::Text);
        let mut connection = connect(&connector).await;

        let events: Vec<_> = search_turn(&ctx, connection.as_mut(), "kettles".into(), TurnTracker::new(ctx.id, 1))
            .collect()
            .await;

        assert_eq!(events, vec![OutgoingEvent::error("socket closed")]);
        assert_eq!(connector.prompts().len(), 1);
    }
}
