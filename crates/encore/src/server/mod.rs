//! HTTP / WebSocket Server
//!
//! Exposes the plugin command/query surface to the settings UI and connects
//! the hosted page to the content script bridge.

mod handler;
mod protocol;
mod router;
mod state;

pub use handler::*;
pub use protocol::*;
pub use router::*;
pub use state::*;
