//! `webrtc` crate backend for [`PeerTransport`]

use super::state::PeerConnectionState;
use super::transport::{PeerTransport, PeerTransportProvider, RemoteStream, SdpKind, TransportEvent};
use crate::config::ScanTransportConfig;
use crate::signaling::protocol::IceCandidate;
use crate::{Error, Result};
use async_trait::async_trait;
use docscan_core::{LocalMediaStream, LocalTrack, MediaKind, SampleSource};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

/// ICE server list from the transport config
pub fn ice_servers(config: &ScanTransportConfig) -> Vec<RTCIceServer> {
    config
        .stun_servers
        .iter()
        .map(|url| RTCIceServer {
            urls: vec![url.clone()],
            ..Default::default()
        })
        .chain(config.turn_servers.iter().map(|turn| RTCIceServer {
            urls: turn.urls.clone(),
            username: turn.username.clone(),
            credential: turn.credential.clone(),
            ..Default::default()
        }))
        .collect()
}

/// Builds real peer connections
pub struct RtcPeerTransportProvider {
    config: ScanTransportConfig,
}

impl RtcPeerTransportProvider {
    pub fn new(config: ScanTransportConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl PeerTransportProvider for RtcPeerTransportProvider {
    async fn create(
        &self,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Arc<dyn PeerTransport>> {
        let transport = RtcPeerTransport::new(&self.config, events).await?;
        Ok(Arc::new(transport))
    }
}

/// One `RTCPeerConnection`
pub struct RtcPeerTransport {
    peer_connection: Arc<RTCPeerConnection>,
    local_tracks: Mutex<Vec<Arc<TrackLocalStaticSample>>>,
    /// One task per sending track, copying encoded samples into RTP
    pumps: Mutex<Vec<JoinHandle<()>>>,
}

impl RtcPeerTransport {
    pub async fn new(
        config: &ScanTransportConfig,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::WebRtcError(format!("Failed to register codecs: {}", e)))?;

        let interceptor_registry =
            register_default_interceptors(Registry::new(), &mut media_engine).map_err(|e| {
                Error::WebRtcError(format!("Failed to register interceptors: {}", e))
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: ice_servers(config),
            ..Default::default()
        };

        let peer_connection = Arc::new(api.new_peer_connection(rtc_config).await.map_err(|e| {
            Error::WebRtcError(format!("Failed to create peer connection: {}", e))
        })?);

        let tx = events.clone();
        peer_connection.on_peer_connection_state_change(Box::new(
            move |s: RTCPeerConnectionState| {
                if let Some(state) = PeerConnectionState::from_rtc(s) {
                    let _ = tx.send(TransportEvent::StateChanged(state));
                }
                Box::pin(async {})
            },
        ));

        let tx = events.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            // `None` marks the end of gathering.
            if let Some(candidate) = candidate {
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = tx.send(TransportEvent::LocalCandidate(init.into()));
                    }
                    Err(e) => warn!("Failed to serialize local ICE candidate: {}", e),
                }
            }
            Box::pin(async {})
        }));

        let tx = events;
        peer_connection.on_track(Box::new(move |track, _receiver, _transceiver| {
            let kind = match track.kind() {
                RTPCodecType::Audio => MediaKind::Audio,
                _ => MediaKind::Video,
            };
            info!(
                "Remote {} track {} on stream {}",
                kind.as_str(),
                track.id(),
                track.stream_id()
            );
            let _ = tx.send(TransportEvent::RemoteTrack(RemoteStream {
                stream_id: track.stream_id(),
                track_id: track.id(),
                kind,
                track: Some(Arc::clone(&track)),
            }));
            Box::pin(async {})
        }));

        Ok(Self {
            peer_connection,
            local_tracks: Mutex::new(Vec::new()),
            pumps: Mutex::new(Vec::new()),
        })
    }

    async fn local_sdp(&self, what: &str) -> Result<String> {
        self.peer_connection
            .local_description()
            .await
            .map(|desc| desc.sdp)
            .ok_or_else(|| Error::SdpError(format!("No local description after setting {}", what)))
    }
}

#[async_trait]
impl PeerTransport for RtcPeerTransport {
    async fn prepare_receive_video(&self) -> Result<()> {
        self.peer_connection
            .add_transceiver_from_kind(
                RTPCodecType::Video,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: vec![],
                }),
            )
            .await
            .map_err(|e| Error::MediaTrackError(format!("Failed to add video transceiver: {}", e)))?;
        debug!("Prepared receive-only video transceiver");
        Ok(())
    }

    async fn add_local_stream(&self, stream: &LocalMediaStream) -> Result<()> {
        for local in stream.tracks() {
            let capability = match local.kind() {
                MediaKind::Video => RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_VP8.to_owned(),
                    clock_rate: 90000,
                    channels: 0,
                    sdp_fmtp_line: String::new(),
                    rtcp_feedback: vec![],
                },
                MediaKind::Audio => RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_OPUS.to_owned(),
                    clock_rate: 48000,
                    channels: 2,
                    sdp_fmtp_line: String::new(),
                    rtcp_feedback: vec![],
                },
            };

            let track = Arc::new(TrackLocalStaticSample::new(
                capability,
                local.id().to_string(),
                stream.id().to_string(),
            ));

            self.peer_connection
                .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(|e| {
                    Error::MediaTrackError(format!(
                        "Failed to add {} track: {}",
                        local.kind().as_str(),
                        e
                    ))
                })?;

            match local.source() {
                Some(source) => {
                    let pump = tokio::spawn(pump_samples(local.clone(), source, Arc::clone(&track)));
                    self.pumps.lock().push(pump);
                }
                None => warn!(
                    track = local.id(),
                    "local {} track has no sample source, it will carry no media",
                    local.kind().as_str()
                ),
            }
            self.local_tracks.lock().push(track);
        }

        debug!(
            "Attached {} local track(s) from stream {}",
            stream.tracks().len(),
            stream.id()
        );
        Ok(())
    }

    async fn create_offer(&self) -> Result<String> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create offer: {}", e)))?;
        self.peer_connection
            .set_local_description(offer)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))?;
        self.local_sdp("offer").await
    }

    async fn create_answer(&self) -> Result<String> {
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create answer: {}", e)))?;
        self.peer_connection
            .set_local_description(answer)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))?;
        self.local_sdp("answer").await
    }

    async fn set_remote_description(&self, kind: SdpKind, sdp: String) -> Result<()> {
        let description = match kind {
            SdpKind::Offer => RTCSessionDescription::offer(sdp),
            SdpKind::Answer => RTCSessionDescription::answer(sdp),
        }
        .map_err(|e| Error::SdpError(format!("Failed to parse {:?}: {}", kind, e)))?;

        self.peer_connection
            .set_remote_description(description)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set remote description: {}", e)))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.peer_connection
            .add_ice_candidate(candidate.into())
            .await
            .map_err(|e| Error::IceCandidateError(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn close(&self) -> Result<()> {
        for pump in self.pumps.lock().drain(..) {
            pump.abort();
        }
        self.local_tracks.lock().clear();
        self.peer_connection
            .close()
            .await
            .map_err(|e| Error::PeerConnectionError(format!("Failed to close connection: {}", e)))
    }
}

/// Copy encoded samples from `source` into `track` until the local track is
/// stopped or the source ends
///
/// Samples written before the connection is up are dropped by the track.
async fn pump_samples(
    local: LocalTrack,
    source: Arc<dyn SampleSource>,
    track: Arc<TrackLocalStaticSample>,
) {
    let mut written: u64 = 0;
    while !local.is_stopped() {
        let Some(encoded) = source.next_sample().await else {
            break;
        };
        let sample = Sample {
            data: encoded.data.into(),
            duration: encoded.duration,
            timestamp: SystemTime::now(),
            ..Default::default()
        };
        if let Err(e) = track.write_sample(&sample).await {
            warn!(track = local.id(), "Failed to write RTP sample: {}", e);
            break;
        }
        written += 1;
    }
    debug!(track = local.id(), written, "sample pump finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TurnServerConfig;
    use docscan_core::MediaSample;
    use std::time::Duration;

    /// Emits a fixed VP8 keyframe header at ~30 fps
    struct SyntheticVp8;

    #[async_trait]
    impl SampleSource for SyntheticVp8 {
        async fn next_sample(&self) -> Option<MediaSample> {
            tokio::time::sleep(Duration::from_millis(33)).await;
            Some(MediaSample {
                data: vec![0x10, 0x02, 0x00, 0x9d, 0x01, 0x2a, 0x40, 0x01, 0xf0, 0x00],
                duration: Duration::from_millis(33),
            })
        }
    }

    #[test]
    fn test_ice_servers_from_config() {
        let config = ScanTransportConfig {
            turn_servers: vec![TurnServerConfig {
                urls: vec![
                    "turn:relay.example:3478".to_string(),
                    "turns:relay.example:5349".to_string(),
                ],
                username: "user".to_string(),
                credential: "secret".to_string(),
            }],
            ..Default::default()
        };

        let servers = ice_servers(&config);
        assert_eq!(servers.len(), 3);
        assert_eq!(servers[0].urls, vec!["stun:stun.l.google.com:19302".to_string()]);
        assert_eq!(servers[2].urls.len(), 2);
        assert_eq!(servers[2].username, "user");
    }

    #[tokio::test]
    async fn test_receiver_offer_answer_locally() {
        let config = ScanTransportConfig {
            stun_servers: vec![],
            ..Default::default()
        };

        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        let (tx_b, _rx_b) = mpsc::unbounded_channel();
        let sender = RtcPeerTransport::new(&config, tx_a).await.unwrap();
        let receiver = RtcPeerTransport::new(&config, tx_b).await.unwrap();

        let stream = LocalMediaStream::new(vec![docscan_core::LocalTrack::new(MediaKind::Video)]);
        sender.add_local_stream(&stream).await.unwrap();
        receiver.prepare_receive_video().await.unwrap();

        let offer = sender.create_offer().await.unwrap();
        assert!(offer.starts_with("v=0"));
        receiver
            .set_remote_description(SdpKind::Offer, offer)
            .await
            .unwrap();
        let answer = receiver.create_answer().await.unwrap();
        sender
            .set_remote_description(SdpKind::Answer, answer)
            .await
            .unwrap();

        sender.close().await.unwrap();
        receiver.close().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_sender_media_reaches_receiver_over_loopback() {
        let config = ScanTransportConfig {
            stun_servers: vec![],
            ..Default::default()
        };

        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let sender = RtcPeerTransport::new(&config, tx_a).await.unwrap();
        let receiver = RtcPeerTransport::new(&config, tx_b).await.unwrap();

        let stream = LocalMediaStream::new(vec![LocalTrack::with_source(
            MediaKind::Video,
            Arc::new(SyntheticVp8),
        )]);
        sender.add_local_stream(&stream).await.unwrap();
        receiver.prepare_receive_video().await.unwrap();

        let offer = sender.create_offer().await.unwrap();
        receiver
            .set_remote_description(SdpKind::Offer, offer)
            .await
            .unwrap();
        let answer = receiver.create_answer().await.unwrap();
        sender
            .set_remote_description(SdpKind::Answer, answer)
            .await
            .unwrap();

        // Trickle candidates both ways until the first RTP packet surfaces
        // the track on the receiving side.
        let remote = tokio::time::timeout(Duration::from_secs(20), async {
            loop {
                tokio::select! {
                    Some(event) = rx_a.recv() => {
                        if let TransportEvent::LocalCandidate(candidate) = event {
                            let _ = receiver.add_ice_candidate(candidate).await;
                        }
                    }
                    Some(event) = rx_b.recv() => match event {
                        TransportEvent::LocalCandidate(candidate) => {
                            let _ = sender.add_ice_candidate(candidate).await;
                        }
                        TransportEvent::RemoteTrack(remote) => break remote,
                        TransportEvent::StateChanged(_) => {}
                    },
                }
            }
        })
        .await
        .expect("receiver never saw the sender's video");

        assert_eq!(remote.kind, MediaKind::Video);
        assert_eq!(remote.stream_id, stream.id());
        assert_eq!(remote.track_id, stream.tracks()[0].id());
        assert!(remote.track.is_some());

        stream.stop_all();
        sender.close().await.unwrap();
        receiver.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_offer_is_sdp_error() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let transport = RtcPeerTransport::new(&ScanTransportConfig::default(), tx)
            .await
            .unwrap();
        let err = transport
            .set_remote_description(SdpKind::Offer, "not an sdp".to_string())
            .await
            .unwrap_err();
        assert!(err.is_negotiation_error());
        transport.close().await.unwrap();
    }
}
