//! Agent Pipeline
//!
//! One strategy per [`AgentType`]. Each builds the prompt for a single
//! answering turn; [`respond`] drives that turn through the multiplexer.

use crate::agent::AgentType;
use crate::context::ConversationContext;
use crate::events::OutgoingEvent;
use crate::live::LiveConnection;
use crate::multiplexer::{stream_turn, tool_call_error};
use crate::product::{RetrievalResult, RetrievedProduct};
use crate::prompts;
use crate::tools::{ToolBridge, ToolCall, ToolName, ToolResult};
use futures::stream::BoxStream;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

const NO_PRODUCTS: &str = "No products were retrieved.";

/// What an agent gets to answer with.
#[derive(Debug, Clone, Copy)]
pub struct AgentRequest<'a> {
    pub query: &'a str,
    pub retrieved: Option<&'a RetrievalResult>,
    pub history: &'a str,
}

impl AgentRequest<'_> {
    fn products_json(&self) -> String {
        self.retrieved
            .map(RetrievalResult::to_prompt_json)
            .unwrap_or_else(|| NO_PRODUCTS.to_string())
    }
}

pub trait ResponseAgent: Send + Sync {
    fn agent_type(&self) -> AgentType;

    fn build_prompt(&self, request: &AgentRequest<'_>) -> String;
}

pub struct ComparisonAgent;

impl ResponseAgent for ComparisonAgent {
    fn agent_type(&self) -> AgentType {
        AgentType::Comparison
    }

    fn build_prompt(&self, request: &AgentRequest<'_>) -> String {
        prompts::fill(
            prompts::COMPARISON,
            &[
                ("query", request.query),
                ("history", request.history),
                ("products", &request.products_json()),
            ],
        )
    }
}

pub struct NavigationAgent;

impl NavigationAgent {
    fn locations(request: &AgentRequest<'_>) -> String {
        let lines: Vec<String> = request
            .retrieved
            .map(RetrievalResult::products)
            .unwrap_or_default()
            .iter()
            .map(|product| product.location_line())
            .collect();
        if lines.is_empty() {
            "No locations available.".to_string()
        } else {
            lines.join("\n")
        }
    }
}

impl ResponseAgent for NavigationAgent {
    fn agent_type(&self) -> AgentType {
        AgentType::Navigation
    }

    fn build_prompt(&self, request: &AgentRequest<'_>) -> String {
        prompts::fill(
            prompts::NAVIGATION,
            &[
                ("query", request.query),
                ("history", request.history),
                ("products", &request.products_json()),
                ("locations", &Self::locations(request)),
            ],
        )
    }
}

pub struct ProductInfoAgent;

impl ResponseAgent for ProductInfoAgent {
    fn agent_type(&self) -> AgentType {
        AgentType::ProductInfo
    }

    fn build_prompt(&self, request: &AgentRequest<'_>) -> String {
        prompts::fill(
            prompts::PRODUCT_INFO,
            &[
                ("query", request.query),
                ("history", request.history),
                ("products", &request.products_json()),
            ],
        )
    }
}

pub struct FallbackAgent;

impl ResponseAgent for FallbackAgent {
    fn agent_type(&self) -> AgentType {
        AgentType::Fallback
    }

    // Retrieved products are deliberately not shown to the fallback agent.
    fn build_prompt(&self, request: &AgentRequest<'_>) -> String {
        prompts::fill(
            prompts::FALLBACK,
            &[("query", request.query), ("history", request.history)],
        )
    }
}

pub fn agent_for(agent: AgentType) -> &'static dyn ResponseAgent {
    match agent {
        AgentType::Comparison => &ComparisonAgent,
        AgentType::Navigation => &NavigationAgent,
        AgentType::ProductInfo => &ProductInfoAgent,
        AgentType::Fallback => &FallbackAgent,
    }
}

/// Drives the answering turn of `agent`.
pub async fn respond<'a>(
    agent: &dyn ResponseAgent,
    ctx: &ConversationContext,
    connection: &'a mut dyn LiveConnection,
    query: &str,
    retrieved: Option<&RetrievalResult>,
) -> BoxStream<'a, OutgoingEvent> {
    let history = ctx.conversation.render().await;
    let prompt = agent.build_prompt(&AgentRequest {
        query,
        retrieved,
        history: &history,
    });
    info!(agent = %agent.agent_type(), "Running agent");
    stream_turn(connection, prompt, ctx.modality, ctx.conversation.clone())
}

/// Screens the tool calls of an answering turn.
///
/// Only the first well-formed `validate_products` call is acted on, and it
/// reaches the caller filtered down to the turn's candidates. Every other
/// tool call is dropped.
#[derive(Debug, Default)]
pub struct ValidationGate {
    honoured: bool,
}

impl ValidationGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// The event to forward in place of `event`, if any.
    pub async fn screen(
        &mut self,
        bridge: &ToolBridge,
        event: OutgoingEvent,
        candidates: &[RetrievedProduct],
    ) -> Option<OutgoingEvent> {
        let (tool_name, arguments) = match event {
            OutgoingEvent::ToolResponse {
                tool_name,
                arguments,
            } => (tool_name, arguments),
            other => return Some(other),
        };
        if tool_name != ToolName::ValidateProducts.as_str() {
            debug!(tool = %tool_name, "Ignoring tool call in the answering turn");
            return None;
        }
        if self.honoured {
            debug!("Dropping repeated validate_products call");
            return None;
        }

        let call = match ToolCall::parse(&tool_name, &arguments) {
            Ok(call) => call,
            Err(e) => {
                warn!(error = %e, "Malformed validate_products call");
                return Some(tool_call_error(e));
            }
        };
        self.honoured = true;
        match bridge.dispatch(call, candidates).await {
            ToolResult::Validated(products) => {
                let products =
                    serde_json::to_value(&products).unwrap_or_else(|_| Value::Array(Vec::new()));
                let mut arguments = Map::new();
                arguments.insert("products".into(), products);
                Some(OutgoingEvent::ToolResponse {
                    tool_name,
                    arguments,
                })
            }
            _ => None,
        }
    }
}
