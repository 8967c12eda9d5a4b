//! Gemini Live client.
//!
//! Implements the live backend traits of `concierge-core` over the
//! BidiGenerateContent WebSocket. Raw server JSON is decoded into
//! `LiveFrame`s here and nowhere else.

pub mod client;
pub mod types;

pub use client::{GeminiConfig, GeminiConnection, GeminiConnector};
