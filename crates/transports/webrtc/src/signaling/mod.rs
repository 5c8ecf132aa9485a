//! Signaling transport
//!
//! A publish/subscribe channel per scan session carrying negotiation
//! metadata and small app events between the phone and the desktop.

pub mod channel;
pub mod memory;
pub mod protocol;
pub mod websocket;

pub use channel::{EventHandler, SignalChannel, SignalingTransport};
pub use memory::{InMemoryRelay, InMemorySignaling};
pub use protocol::{IceCandidate, RelayFrame, SignalEvent, SignalMessage};
pub use websocket::{RelayServer, RelayServerConfig, RelayServerHandle, WebSocketSignaling};
