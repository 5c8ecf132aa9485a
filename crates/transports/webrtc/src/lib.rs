//! WebRTC transport for phone-to-desktop document scanning
//!
//! The desktop shows a link (usually as a QR code); the phone opens it,
//! streams its rear camera to the desktop over a peer connection, and
//! captures a page whenever the view holds still.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐                      ┌──────────────────────┐
//! │  PhoneSession        │                      │  DesktopSession      │
//! │  ├─ StabilityDetector│                      │  ├─ page count       │
//! │  └─ PeerConnection-  │  ── video (RTP) ──▶  │  └─ PeerConnection-  │
//! │     Manager (Sender) │                      │     Manager (Receiver)│
//! └─────────┬────────────┘                      └─────────┬────────────┘
//!           │     SignalChannel "scan:<session id>"       │
//!           └──────────── relay (WebSocket) ──────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use docscan_webrtc::ScanTransportConfig;
//!
//! let config = ScanTransportConfig {
//!     signaling_url: "ws://localhost:8080".to_string(),
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! assert_eq!(config.stability.stable_frame_count, 3);
//! ```
//!
//! ## Async Usage
//!
//! ```no_run
//! use docscan_webrtc::{RtcPeerTransportProvider, ScanTransportConfig, WebSocketSignaling};
//! use docscan_webrtc::{DesktopCollaborators, DesktopSession};
//! use std::sync::Arc;
//!
//! # async fn example(collaborators: DesktopCollaborators) -> docscan_webrtc::Result<()> {
//! let config = ScanTransportConfig::default();
//! let signaling = Arc::new(WebSocketSignaling::new(config.signaling_url.clone()));
//! let provider = Arc::new(RtcPeerTransportProvider::new(config.clone()));
//!
//! let mut desktop = DesktopSession::connect(signaling, provider, collaborators, config).await?;
//! println!("scan with your phone: {}", desktop.scan_url());
//! loop {
//!     desktop.process_next().await?;
//! }
//! # }
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod peer;
pub mod session;
pub mod signaling;

pub use config::{ScanTransportConfig, TurnServerConfig};
pub use error::{Error, Result};
pub use peer::{
    PeerConnectionManager, PeerConnectionState, PeerEvent, PeerRole, PeerTransport,
    PeerTransportProvider, RemoteStream, RtcPeerTransportProvider,
};
pub use session::{
    DesktopCollaborators, DesktopSession, DesktopStep, DesktopView, PhoneCapabilities,
    PhoneCommand, PhoneSession, PhoneStep, PhoneView, SubmitOutcome,
};
pub use signaling::{
    InMemoryRelay, InMemorySignaling, RelayServer, RelayServerConfig, SignalChannel,
    SignalMessage, SignalingTransport, WebSocketSignaling,
};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
