//! Peer connection state

use serde::{Deserialize, Serialize};
use std::fmt;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;

/// Negotiation/connection state of one peer
///
/// `New -> Connecting -> Connected`; `Disconnected` and `Failed` are
/// reachable from any other state and are never left again: recovery is a
/// session restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerConnectionState {
    #[default]
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
}

impl PeerConnectionState {
    /// Disconnected and failed connections are not recovered in place
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PeerConnectionState::Disconnected | PeerConnectionState::Failed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PeerConnectionState::New => "new",
            PeerConnectionState::Connecting => "connecting",
            PeerConnectionState::Connected => "connected",
            PeerConnectionState::Disconnected => "disconnected",
            PeerConnectionState::Failed => "failed",
        }
    }

    /// Map a backend state; `None` for states without a counterpart here
    pub fn from_rtc(state: RTCPeerConnectionState) -> Option<Self> {
        match state {
            RTCPeerConnectionState::New => Some(PeerConnectionState::New),
            RTCPeerConnectionState::Connecting => Some(PeerConnectionState::Connecting),
            RTCPeerConnectionState::Connected => Some(PeerConnectionState::Connected),
            RTCPeerConnectionState::Disconnected | RTCPeerConnectionState::Closed => {
                Some(PeerConnectionState::Disconnected)
            }
            RTCPeerConnectionState::Failed => Some(PeerConnectionState::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for PeerConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
