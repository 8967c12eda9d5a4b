//! Realtime session and turn orchestration for an in-store shopping
//! assistant.
//!
//! Transports and external services plug in through the traits in [`live`],
//! [`product`] and [`speech`]; everything else is the conversation engine.

pub mod agent;
pub mod context;
pub mod conversation;
pub mod events;
pub mod live;
pub mod multiplexer;
pub mod orchestrator;
pub mod pipeline;
pub mod product;
pub mod prompts;
pub mod router;
pub mod search;
pub mod session;
pub mod speech;
pub mod store;
pub mod tools;
pub mod turn;

#[cfg(test)]
pub(crate) mod testing;

pub use context::ConversationContext;
pub use events::{InboundMessage, Modality, OutgoingEvent};
pub use orchestrator::{ConversationEngine, PipelineMode};
pub use session::{SessionError, SessionManager};
