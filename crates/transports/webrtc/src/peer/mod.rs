//! Peer connection management
//!
//! Offer/answer negotiation, ICE candidate buffering and connection state
//! for one phone-to-desktop video link.

pub mod ice_buffer;
pub mod manager;
pub mod rtc;
pub mod state;
pub mod transport;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use ice_buffer::IceCandidateBuffer;
pub use manager::{PeerConnectionManager, PeerEvent, PeerRole};
pub use rtc::{RtcPeerTransport, RtcPeerTransportProvider};
pub use state::PeerConnectionState;
pub use transport::{PeerTransport, PeerTransportProvider, RemoteStream, SdpKind, TransportEvent};
