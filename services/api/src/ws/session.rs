//! Manages the caller WebSocket lifecycle for one conversation.

use super::protocol::{
    self, CLOSE_MISSING_STORE_ID, CLOSE_STORE_CONFIG_UNAVAILABLE, ConnectParams, STORE_ID_HEADER,
};
use crate::state::AppState;
use anyhow::Result;
use axum::{
    extract::{
        Query, State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    },
    http::HeaderMap,
    response::Response,
};
use concierge_core::{
    ConversationContext, ConversationEngine, OutgoingEvent, PipelineMode, SessionManager,
    store::StoreContext, tools::{ToolBridge, declarations},
};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use std::sync::Arc;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Axum handler to upgrade an HTTP connection to a WebSocket.
///
/// The store is identified by the `store-id` header, or by the `store_id`
/// query parameter for callers that cannot set headers.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    Query(params): Query<ConnectParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let store_id = headers
        .get(STORE_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or_else(|| params.store_id.clone())
        .filter(|id| !id.trim().is_empty());
    let pipeline = params.pipeline();
    ws.on_upgrade(move |socket| handle_socket(socket, state, store_id, pipeline))
}

/// Entry point for a new caller connection.
///
/// Resolves the store, then runs the conversation inside its own span.
async fn handle_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    store_id: Option<String>,
    pipeline: PipelineMode,
) {
    let (mut socket_tx, socket_rx) = socket.split();

    let Some(store_id) = store_id else {
        warn!("Caller connected without a store id");
        close_with(&mut socket_tx, CLOSE_MISSING_STORE_ID, "Missing store-id header").await;
        return;
    };

    let store = match state.store_configs.fetch(&store_id).await {
        Ok(store) => store,
        Err(e) => {
            error!(%store_id, error = ?e, "Could not retrieve store config");
            close_with(
                &mut socket_tx,
                CLOSE_STORE_CONFIG_UNAVAILABLE,
                "Could not retrieve store config",
            )
            .await;
            return;
        }
    };

    let engine = build_engine(&state, store, pipeline);
    let conversation_id = engine.context().id;
    let span = info_span!("conversation", %conversation_id, %store_id);
    async move {
        info!(?pipeline, "Caller connected");
        if let Err(e) = run_conversation(engine, socket_tx, socket_rx).await {
            error!(error = ?e, "Conversation terminated with error.");
        }
        info!("Conversation finished.");
    }
    .instrument(span)
    .await;
}

fn build_engine(state: &AppState, store: StoreContext, pipeline: PipelineMode) -> ConversationEngine {
    let config = &state.config;
    let bridge = Arc::new(ToolBridge::new(state.retriever.clone()).with_default_k(config.retrieval_top_k));
    let instruction = format!(
        "You are the shopping concierge of this store.\n{}",
        store.describe()
    );
    let ctx = ConversationContext::new(store, bridge, config.response_modality);
    let sessions = SessionManager::new(state.connector.clone(), declarations())
        .with_backoff_base(config.backoff_base_secs)
        .with_system_instruction(instruction);

    ConversationEngine::new(ctx, sessions)
        .with_speech(state.speech.clone())
        .with_mode(pipeline)
        .with_max_retries(config.max_connect_retries)
}

/// The main loop for an accepted caller.
///
/// Turns run one at a time: the next caller message is only read once every
/// event of the current turn has been forwarded.
async fn run_conversation(
    mut engine: ConversationEngine,
    mut socket_tx: SplitSink<WebSocket, Message>,
    mut socket_rx: SplitStream<WebSocket>,
) -> Result<()> {
    if let Err(e) = engine.start().await {
        error!(error = %e, "Could not open the live session");
        send_event(&mut socket_tx, &OutgoingEvent::error(e.to_string())).await?;
        socket_tx.close().await?;
        return Ok(());
    }
    send_event(&mut socket_tx, &protocol::greeting()).await?;

    let outcome = forward_turns(&mut engine, &mut socket_tx, &mut socket_rx).await;
    engine.shutdown().await;
    outcome
}

async fn forward_turns(
    engine: &mut ConversationEngine,
    socket_tx: &mut SplitSink<WebSocket, Message>,
    socket_rx: &mut SplitStream<WebSocket>,
) -> Result<()> {
    while let Some(msg_result) = socket_rx.next().await {
        match msg_result {
            Ok(Message::Text(text)) => match protocol::parse_inbound(&text) {
                Ok(inbound) => {
                    debug!(mime_type = %inbound.mime_type, "Caller message received");
                    let mut events = engine.handle_inbound(inbound);
                    while let Some(event) = events.next().await {
                        send_event(socket_tx, &event).await?;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Ignoring malformed caller message");
                    send_event(socket_tx, &OutgoingEvent::error(format!("Invalid message: {}", e)))
                        .await?;
                }
            },
            Ok(Message::Binary(_)) => warn!("Ignoring binary frame; audio must be sent as base64 JSON."),
            Ok(Message::Close(_)) => {
                info!("Caller sent close frame.");
                break;
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Err(e) => {
                error!("Error receiving from caller WebSocket: {:?}", e);
                break;
            }
        }
    }
    Ok(())
}

async fn close_with(socket_tx: &mut SplitSink<WebSocket, Message>, code: u16, reason: &'static str) {
    let frame = CloseFrame {
        code,
        reason: reason.into(),
    };
    if let Err(e) = socket_tx.send(Message::Close(Some(frame))).await {
        debug!(error = %e, "Caller went away before the close frame");
    }
}

/// Serializes one event and sends it to the caller as a text frame.
pub(crate) async fn send_event(
    socket_tx: &mut SplitSink<WebSocket, Message>,
    event: &OutgoingEvent,
) -> Result<()> {
    let serialized = protocol::encode(event)?;
    socket_tx.send(Message::Text(serialized.into())).await?;
    Ok(())
}
