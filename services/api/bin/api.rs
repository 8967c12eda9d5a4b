//! Main Entrypoint for the Concierge API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Initializing the collaborator clients (retrieval, speech-to-text, store config).
//! 3. Initializing the Gemini Live connector.
//! 4. Constructing the Axum router and applying middleware.
//! 5. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use concierge_api::{
    config::Config, retrieval::HttpRetriever, router::create_router, speech::DeepgramClient,
    state::AppState, store_config::StoreConfigClient,
};
use gemini_realtime::{GeminiConfig, GeminiConnector};
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Initialize Collaborators ---
    let http = reqwest::Client::builder()
        .build()
        .context("Failed to build HTTP client")?;
    if config.retrieval_token.is_none() {
        warn!("RETRIEVAL_TOKEN is not set; every product search will fail.");
    }
    if config.stt_api_key.is_none() {
        warn!("STT_API_KEY is not set; audio messages cannot be transcribed.");
    }
    let retriever = Arc::new(HttpRetriever::new(
        http.clone(),
        config.retrieval_url.clone(),
        config.retrieval_token.clone(),
    ));
    let speech = Arc::new(DeepgramClient::new(
        http.clone(),
        config.stt_url.clone(),
        config.stt_api_key.clone(),
    ));
    let store_configs = Arc::new(StoreConfigClient::new(http, config.store_config_url.clone()));

    let mut gemini = GeminiConfig::new(config.gemini_api_key.clone());
    gemini.model = config.gemini_model.clone();
    gemini.voice = config.gemini_voice.clone();
    let connector = Arc::new(GeminiConnector::new(gemini));

    let app_state = Arc::new(AppState {
        config: Arc::new(config.clone()),
        connector,
        retriever,
        speech,
        store_configs,
    });

    // --- 4. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 5. Start Server ---
    info!(
        model = %config.gemini_model,
        modality = ?config.response_modality,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}
