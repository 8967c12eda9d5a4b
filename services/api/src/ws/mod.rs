//! WebSocket Conversation Handling
//!
//! - `protocol`: the JSON message format and close codes of the caller socket.
//! - `session`: the connection lifecycle, from upgrade to teardown.

pub mod protocol;
pub mod session;

pub use session::ws_handler;
