//! Peer transport seam
//!
//! The negotiation driver talks to the media stack only through
//! [`PeerTransport`]. The production backend is
//! [`RtcPeerTransportProvider`](super::rtc::RtcPeerTransportProvider);
//! tests use the scripted transport in `peer::testing`.

use super::state::PeerConnectionState;
use crate::signaling::protocol::IceCandidate;
use crate::Result;
use async_trait::async_trait;
use docscan_core::{LocalMediaStream, MediaKind};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use webrtc::track::track_remote::TrackRemote;

/// Which half of an offer/answer exchange an SDP is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpKind {
    Offer,
    Answer,
}

/// Incoming media surfaced to the caller
#[derive(Clone)]
pub struct RemoteStream {
    pub stream_id: String,
    pub track_id: String,
    pub kind: MediaKind,
    /// Backend track, when a real connection produced it
    pub track: Option<Arc<TrackRemote>>,
}

impl RemoteStream {
    /// A stream with no backend track behind it
    pub fn detached(stream_id: impl Into<String>, track_id: impl Into<String>, kind: MediaKind) -> Self {
        Self {
            stream_id: stream_id.into(),
            track_id: track_id.into(),
            kind,
            track: None,
        }
    }
}

impl fmt::Debug for RemoteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteStream")
            .field("stream_id", &self.stream_id)
            .field("track_id", &self.track_id)
            .field("kind", &self.kind)
            .field("has_track", &self.track.is_some())
            .finish()
    }
}

/// Asynchronous notifications from a transport
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Locally gathered ICE candidate to publish
    LocalCandidate(IceCandidate),
    /// Aggregate connection state changed
    StateChanged(PeerConnectionState),
    /// Remote track arrived
    RemoteTrack(RemoteStream),
}

/// One peer connection as seen by the negotiation driver
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Receive video only; nothing is sent
    async fn prepare_receive_video(&self) -> Result<()>;

    /// Send every track of `stream`
    async fn add_local_stream(&self, stream: &LocalMediaStream) -> Result<()>;

    /// Create an offer, set it as local description, return its SDP
    async fn create_offer(&self) -> Result<String>;

    /// Create an answer, set it as local description, return its SDP
    async fn create_answer(&self) -> Result<String>;

    async fn set_remote_description(&self, kind: SdpKind, sdp: String) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Creates transports wired to an event queue
#[async_trait]
pub trait PeerTransportProvider: Send + Sync {
    async fn create(
        &self,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Arc<dyn PeerTransport>>;
}
