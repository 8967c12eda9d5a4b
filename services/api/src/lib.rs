//! Concierge API Library Crate
//!
//! This library contains the outer surface of the shopping concierge: the
//! environment configuration, the collaborator clients (product retrieval,
//! speech-to-text, store configuration), the caller WebSocket endpoint and
//! routing. The `api` binary is a thin wrapper around this library.

pub mod config;
pub mod retrieval;
pub mod router;
pub mod speech;
pub mod state;
pub mod store_config;
pub mod ws;
