//! WebSocket signaling: relay client and relay server
//!
//! Frames are JSON [`RelayFrame`](crate::signaling::protocol::RelayFrame)s
//! over text messages.

mod client;
mod server;

pub use client::{WebSocketSignaling, DEFAULT_JOIN_TIMEOUT};
pub use server::{RelayServer, RelayServerConfig, RelayServerHandle, RelayState};
