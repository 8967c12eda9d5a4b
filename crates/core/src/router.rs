//! Router
//!
//! Drives one tool-call-only backend turn to pick the agent for an utterance
//! and to prefetch the products that agent will need.

use crate::agent::{AgentType, render_catalogue};
use crate::context::ConversationContext;
use crate::events::OutgoingEvent;
use crate::multiplexer::{is_tool_call_error, stream_turn};
use crate::product::RetrievalResult;
use crate::prompts;
use crate::session::SessionManager;
use crate::tools::{ToolCall, ToolResult};
use anyhow::{Result, anyhow};
use futures::StreamExt;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct RouteDecision {
    pub agent: AgentType,
    pub retrieved: Option<RetrievalResult>,
    pub interrupted: bool,
    pub error: Option<String>,
}

impl RouteDecision {
    fn fallback(error: String) -> Self {
        Self {
            agent: AgentType::Fallback,
            retrieved: None,
            interrupted: false,
            error: Some(error),
        }
    }
}

pub async fn routing_prompt(ctx: &ConversationContext, query: &str) -> String {
    let history = ctx.conversation.render().await;
    prompts::fill(
        prompts::ROUTER,
        &[
            ("agents", &render_catalogue()),
            ("store", &ctx.store.describe()),
            ("history", &history),
            ("query", query),
        ],
    )
}

/// Classifies `query`. Never fails: any problem yields the Fallback agent
/// with the reason in `error`.
#[instrument(skip_all, fields(conversation_id = %ctx.id))]
pub async fn route(
    ctx: &ConversationContext,
    sessions: &mut SessionManager,
    query: &str,
) -> RouteDecision {
    match try_route(ctx, sessions, query).await {
        Ok(decision) => {
            info!(
                agent = %decision.agent,
                retrieved = decision.retrieved.as_ref().map(|r| r.products().len()),
                interrupted = decision.interrupted,
                "Router determined agent"
            );
            decision
        }
        Err(e) => {
            warn!(error = %e, "Routing failed, using the fallback agent");
            RouteDecision::fallback(e.to_string())
        }
    }
}

async fn try_route(
    ctx: &ConversationContext,
    sessions: &mut SessionManager,
    query: &str,
) -> Result<RouteDecision> {
    let prompt = routing_prompt(ctx, query).await;
    let connection = sessions.connection_mut()?;
    let mut events = stream_turn(connection, prompt, ctx.modality, ctx.conversation.clone());

    let mut agent = AgentType::Fallback;
    let mut retrieved = None;
    let mut interrupted = false;
    let mut failure = None;

    // The turn is drained even after a failure so no frames are left behind
    // for the next prompt.
    while let Some(event) = events.next().await {
        match event {
            OutgoingEvent::Status { interrupted: true } => interrupted = true,
            OutgoingEvent::ToolResponse {
                tool_name,
                arguments,
            } => match ToolCall::parse(&tool_name, &arguments) {
                Ok(call) => match ctx.bridge.dispatch(call, &[]).await {
                    ToolResult::AgentSelected(selected) => agent = selected,
                    ToolResult::Retrieved(result) => retrieved = Some(result),
                    ToolResult::Validated(_) => {
                        debug!("Ignoring validate_products during routing")
                    }
                },
                Err(e) => warn!(error = %e, "Ignoring malformed tool call during routing"),
            },
            event if is_tool_call_error(&event) => {
                warn!(?event, "Ignoring malformed tool call during routing");
            }
            OutgoingEvent::Error { content } => {
                failure.get_or_insert(content);
            }
            _ => {}
        }
    }

    if let Some(content) = failure {
        return Err(anyhow!(content));
    }
    Ok(RouteDecision {
        agent,
        retrieved,
        interrupted,
        error: None,
    })
}
