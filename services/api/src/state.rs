//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds the configuration
//! and the collaborator clients every caller connection shares.

use crate::{config::Config, store_config::StoreConfigClient};
use concierge_core::{live::LiveConnector, product::Retriever, speech::SpeechToText};
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub connector: Arc<dyn LiveConnector>,
    pub retriever: Arc<dyn Retriever>,
    pub speech: Arc<dyn SpeechToText>,
    pub store_configs: Arc<StoreConfigClient>,
}
