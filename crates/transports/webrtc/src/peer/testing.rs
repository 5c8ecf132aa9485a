//! Scripted [`PeerTransport`] for tests
//!
//! Records every call, answers with canned SDP, and lets the test inject
//! transport events (local candidates, state changes, remote tracks).

use super::state::PeerConnectionState;
use super::transport::{PeerTransport, PeerTransportProvider, RemoteStream, SdpKind, TransportEvent};
use crate::signaling::protocol::IceCandidate;
use crate::{Error, Result};
use async_trait::async_trait;
use docscan_core::LocalMediaStream;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

/// SDP returned by [`MockPeerTransport::create_offer`]
pub const MOCK_OFFER_SDP: &str = "v=0\r\no=mock-offer\r\n";

/// SDP returned by [`MockPeerTransport::create_answer`]
pub const MOCK_ANSWER_SDP: &str = "v=0\r\no=mock-answer\r\n";

/// One recorded call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    PrepareReceiveVideo,
    AddLocalStream { tracks: usize },
    CreateOffer,
    CreateAnswer,
    SetRemoteDescription { kind: SdpKind, sdp: String },
    AddIceCandidate(IceCandidate),
    Close,
}

#[derive(Default)]
struct MockState {
    calls: Vec<TransportCall>,
    remote_description_set: bool,
    fail_remote_description: bool,
}

/// Scripted transport
///
/// `add_ice_candidate` fails when no remote description is set, and for
/// any candidate whose line contains `stale`. Remote descriptions whose SDP
/// does not start with `v=0` are rejected.
pub struct MockPeerTransport {
    state: Mutex<MockState>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl MockPeerTransport {
    pub fn new(events: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            events,
        }
    }

    /// Every call so far, in order
    pub fn calls(&self) -> Vec<TransportCall> {
        self.state.lock().calls.clone()
    }

    /// Candidates successfully applied, in order
    pub fn applied_candidates(&self) -> Vec<IceCandidate> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                TransportCall::AddIceCandidate(c) => Some(c.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().calls.contains(&TransportCall::Close)
    }

    /// Make the next `set_remote_description` calls fail
    pub fn fail_remote_description(&self, fail: bool) {
        self.state.lock().fail_remote_description = fail;
    }

    /// Inject a transport event as if the backend produced it
    pub fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    pub fn emit_state(&self, state: PeerConnectionState) {
        self.emit(TransportEvent::StateChanged(state));
    }

    pub fn emit_local_candidate(&self, candidate: IceCandidate) {
        self.emit(TransportEvent::LocalCandidate(candidate));
    }

    pub fn emit_remote_track(&self, stream: RemoteStream) {
        self.emit(TransportEvent::RemoteTrack(stream));
    }

    fn record(&self, call: TransportCall) {
        self.state.lock().calls.push(call);
    }
}

#[async_trait]
impl PeerTransport for MockPeerTransport {
    async fn prepare_receive_video(&self) -> Result<()> {
        self.record(TransportCall::PrepareReceiveVideo);
        Ok(())
    }

    async fn add_local_stream(&self, stream: &LocalMediaStream) -> Result<()> {
        self.record(TransportCall::AddLocalStream {
            tracks: stream.tracks().len(),
        });
        Ok(())
    }

    async fn create_offer(&self) -> Result<String> {
        self.record(TransportCall::CreateOffer);
        Ok(MOCK_OFFER_SDP.to_string())
    }

    async fn create_answer(&self) -> Result<String> {
        let mut state = self.state.lock();
        if !state.remote_description_set {
            return Err(Error::SdpError("no remote offer to answer".to_string()));
        }
        state.calls.push(TransportCall::CreateAnswer);
        Ok(MOCK_ANSWER_SDP.to_string())
    }

    async fn set_remote_description(&self, kind: SdpKind, sdp: String) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_remote_description || !sdp.starts_with("v=0") {
            return Err(Error::SdpError(format!("rejected {:?}", kind)));
        }
        state.remote_description_set = true;
        state
            .calls
            .push(TransportCall::SetRemoteDescription { kind, sdp });
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let mut state = self.state.lock();
        if !state.remote_description_set {
            return Err(Error::IceCandidateError(
                "remote description not set".to_string(),
            ));
        }
        if candidate.candidate.contains("stale") {
            return Err(Error::IceCandidateError("stale candidate".to_string()));
        }
        state.calls.push(TransportCall::AddIceCandidate(candidate));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.record(TransportCall::Close);
        Ok(())
    }
}

/// Hands out [`MockPeerTransport`]s and keeps the latest one reachable
#[derive(Default)]
pub struct MockPeerTransportProvider {
    created: Mutex<Vec<Arc<MockPeerTransport>>>,
}

impl MockPeerTransportProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recently created transport
    pub fn last(&self) -> Option<Arc<MockPeerTransport>> {
        self.created.lock().last().cloned()
    }

    pub fn created(&self) -> usize {
        self.created.lock().len()
    }
}

#[async_trait]
impl PeerTransportProvider for MockPeerTransportProvider {
    async fn create(
        &self,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Arc<dyn PeerTransport>> {
        let transport = Arc::new(MockPeerTransport::new(events));
        self.created.lock().push(Arc::clone(&transport));
        Ok(transport)
    }
}
