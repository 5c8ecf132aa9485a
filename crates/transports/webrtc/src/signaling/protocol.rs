//! Signaling wire format
//!
//! Two layers travel over the relay:
//!
//! - [`SignalMessage`]: what the two peers say to each other,
//!   `{"event": "...", "payload": {...}}`
//! - [`RelayFrame`]: the envelope between a client and the relay
//!   (join / broadcast / leave), tagged by `type`; the relay never looks
//!   inside a broadcast message

use serde::{Deserialize, Serialize};
use std::fmt;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;

/// Browser-style ICE candidate descriptor (`RTCIceCandidate.toJSON()`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
    #[serde(default)]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    /// Candidate line only, without mid/index
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }
}

impl From<RTCIceCandidateInit> for IceCandidate {
    fn from(init: RTCIceCandidateInit) -> Self {
        Self {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
            username_fragment: init.username_fragment,
        }
    }
}

impl From<IceCandidate> for RTCIceCandidateInit {
    fn from(c: IceCandidate) -> Self {
        RTCIceCandidateInit {
            candidate: c.candidate,
            sdp_mid: c.sdp_mid,
            sdp_mline_index: c.sdp_mline_index,
            username_fragment: c.username_fragment,
        }
    }
}

/// Messages exchanged between the phone and the desktop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum SignalMessage {
    /// SDP offer from the phone
    #[serde(rename = "webrtc:offer")]
    Offer { sdp: String },

    /// SDP answer from the desktop
    #[serde(rename = "webrtc:answer")]
    Answer { sdp: String },

    /// Trickled ICE candidate, either direction
    #[serde(rename = "webrtc:ice-candidate")]
    IceCandidate { candidate: IceCandidate },

    /// Phone joined and is about to offer
    #[serde(rename = "scan:phone-connected")]
    PhoneConnected {},

    /// Phone captured a page; carries the new page count
    #[serde(rename = "scan:page-captured")]
    PageCaptured {
        #[serde(default, rename = "pageNumber")]
        page_number: u32,
    },

    /// Phone finished scanning
    #[serde(rename = "scan:done")]
    ScanDone {
        #[serde(default, rename = "totalPages")]
        total_pages: u32,
    },
}

/// Kind of a [`SignalMessage`], used to key handlers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalEvent {
    Offer,
    Answer,
    IceCandidate,
    PhoneConnected,
    PageCaptured,
    ScanDone,
}

impl SignalEvent {
    /// Event name on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalEvent::Offer => "webrtc:offer",
            SignalEvent::Answer => "webrtc:answer",
            SignalEvent::IceCandidate => "webrtc:ice-candidate",
            SignalEvent::PhoneConnected => "scan:phone-connected",
            SignalEvent::PageCaptured => "scan:page-captured",
            SignalEvent::ScanDone => "scan:done",
        }
    }
}

impl fmt::Display for SignalEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl SignalMessage {
    pub fn event(&self) -> SignalEvent {
        match self {
            SignalMessage::Offer { .. } => SignalEvent::Offer,
            SignalMessage::Answer { .. } => SignalEvent::Answer,
            SignalMessage::IceCandidate { .. } => SignalEvent::IceCandidate,
            SignalMessage::PhoneConnected {} => SignalEvent::PhoneConnected,
            SignalMessage::PageCaptured { .. } => SignalEvent::PageCaptured,
            SignalMessage::ScanDone { .. } => SignalEvent::ScanDone,
        }
    }

    pub fn offer(sdp: impl Into<String>) -> Self {
        SignalMessage::Offer { sdp: sdp.into() }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        SignalMessage::Answer { sdp: sdp.into() }
    }

    pub fn ice_candidate(candidate: IceCandidate) -> Self {
        SignalMessage::IceCandidate { candidate }
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> crate::Result<String> {
        serde_json::to_string(self).map_err(|e| {
            crate::Error::SerializationError(format!(
                "Failed to serialize signaling message: {}",
                e
            ))
        })
    }

    /// Parse from JSON string
    pub fn from_json(json: &str) -> crate::Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            crate::Error::SerializationError(format!(
                "Failed to deserialize signaling message: {}",
                e
            ))
        })
    }

    /// Convert to an opaque relay payload
    pub fn to_value(&self) -> crate::Result<serde_json::Value> {
        serde_json::to_value(self).map_err(|e| {
            crate::Error::SerializationError(format!(
                "Failed to serialize signaling message: {}",
                e
            ))
        })
    }

    /// Parse an opaque relay payload
    pub fn from_value(value: serde_json::Value) -> crate::Result<Self> {
        serde_json::from_value(value).map_err(|e| {
            crate::Error::SerializationError(format!(
                "Failed to deserialize signaling message: {}",
                e
            ))
        })
    }
}

/// Client/relay envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayFrame {
    /// client -> relay: subscribe to a session channel
    Join { session: String },

    /// relay -> client: subscription confirmed
    Joined { session: String, members: usize },

    /// either direction: message for the other member(s)
    Broadcast { message: serde_json::Value },

    /// client -> relay: unsubscribe
    Leave,

    /// relay -> client: request refused
    Error { message: String },
}

impl RelayFrame {
    /// Serialize to JSON string
    pub fn to_json(&self) -> crate::Result<String> {
        serde_json::to_string(self).map_err(|e| {
            crate::Error::SerializationError(format!("Failed to serialize relay frame: {}", e))
        })
    }

    /// Parse from JSON string
    pub fn from_json(json: &str) -> crate::Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            crate::Error::SerializationError(format!("Failed to deserialize relay frame: {}", e))
        })
    }
}
