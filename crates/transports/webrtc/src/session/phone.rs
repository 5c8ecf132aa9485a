//! Phone scan orchestrator
//!
//! `start -> scanning -> done`
//!
//! The phone joins the channel named by the link it opened, streams its
//! camera to the desktop once the user allows it, captures a page every
//! time the view holds still, and hands the assembled document over when
//! the user is finished.

use crate::config::ScanTransportConfig;
use crate::peer::{PeerConnectionManager, PeerConnectionState, PeerEvent, PeerRole, PeerTransportProvider};
use crate::signaling::{SignalMessage, SignalingTransport};
use crate::{Error, Result};
use docscan_core::{
    CameraConstraints, CapturedPage, CapturedPages, CaptureDevice, DocumentSink, LocalMediaStream,
    SessionId, StabilityDetector, VideoSource, WakeLock,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Phone flow step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhoneStep {
    Start,
    Scanning,
    Done,
}

/// Everything the phone UI renders
#[derive(Debug, Clone)]
pub struct PhoneView {
    pub step: PhoneStep,
    pub session_id: SessionId,
    pub connection: PeerConnectionState,
    /// Similarity of the last two sampled frames, 0 when not sampling
    pub stability_score: f64,
    pub page_count: usize,
    /// Set on the sample that captured a page
    pub just_captured: bool,
    pub camera_error: Option<String>,
}

impl PhoneView {
    /// Retake and done need at least one page
    pub fn can_finish(&self) -> bool {
        self.step == PhoneStep::Scanning && self.page_count > 0
    }
}

/// Device capabilities and the upload target
#[derive(Clone)]
pub struct PhoneCapabilities {
    pub camera: Arc<dyn CaptureDevice>,
    pub wake_lock: Arc<dyn WakeLock>,
    pub documents: Arc<dyn DocumentSink>,
}

/// User actions fed to [`PhoneSession::run`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhoneCommand {
    StartCamera,
    RetakeLast,
    Done,
    Leave,
}

/// Phone side of one scan
pub struct PhoneSession {
    config: ScanTransportConfig,
    capabilities: PhoneCapabilities,
    manager: PeerConnectionManager,
    detector: StabilityDetector,
    pages: CapturedPages,
    stream: Option<LocalMediaStream>,
    wake_lock_held: bool,
    peer_open: bool,
    view_tx: watch::Sender<PhoneView>,
}

impl PhoneSession {
    /// Join the session channel for `session_id`
    pub async fn join(
        session_id: SessionId,
        signaling: &dyn SignalingTransport,
        provider: &dyn PeerTransportProvider,
        capabilities: PhoneCapabilities,
        config: ScanTransportConfig,
    ) -> Result<Self> {
        config.validate()?;
        let detector = StabilityDetector::new(config.stability.clone())?;

        let channel = signaling.join(&session_id).await?;
        let manager = match PeerConnectionManager::new(PeerRole::Sender, channel.clone(), provider).await {
            Ok(manager) => manager,
            Err(e) => {
                channel.leave();
                return Err(e);
            }
        };

        info!(session = %session_id, "phone joined scan session");

        let (view_tx, _) = watch::channel(PhoneView {
            step: PhoneStep::Start,
            session_id,
            connection: PeerConnectionState::New,
            stability_score: 0.0,
            page_count: 0,
            just_captured: false,
            camera_error: None,
        });

        Ok(Self {
            config,
            capabilities,
            manager,
            detector,
            pages: CapturedPages::new(),
            stream: None,
            wake_lock_held: false,
            peer_open: true,
            view_tx,
        })
    }

    /// Join using the session id embedded in a scan link
    pub async fn join_url(
        url: &str,
        signaling: &dyn SignalingTransport,
        provider: &dyn PeerTransportProvider,
        capabilities: PhoneCapabilities,
        config: ScanTransportConfig,
    ) -> Result<Self> {
        let session_id = SessionId::from_scan_url(url)?;
        Self::join(session_id, signaling, provider, capabilities, config).await
    }

    pub fn view(&self) -> watch::Receiver<PhoneView> {
        self.view_tx.subscribe()
    }

    pub fn snapshot(&self) -> PhoneView {
        self.view_tx.borrow().clone()
    }

    pub fn step(&self) -> PhoneStep {
        self.view_tx.borrow().step
    }

    pub fn pages(&self) -> &CapturedPages {
        &self.pages
    }

    pub fn connection_state(&self) -> PeerConnectionState {
        self.manager.state()
    }

    /// Open the rear camera and start streaming it to the desktop
    ///
    /// On refusal nothing is sent and the session stays in `start`.
    pub async fn start_camera(&mut self) -> Result<()> {
        if self.step() != PhoneStep::Start {
            return Err(Error::InvalidState("camera already started".to_string()));
        }

        let stream = match self
            .capabilities
            .camera
            .acquire(&CameraConstraints::document())
            .await
        {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Camera unavailable: {}", e);
                self.view_tx
                    .send_modify(|v| v.camera_error = Some(e.to_string()));
                return Err(Error::CameraUnavailable(e));
            }
        };

        if let Err(e) = self.manager.attach_local_stream(&stream).await {
            stream.stop_all();
            return Err(e);
        }

        self.stream = Some(stream);
        self.view_tx.send_modify(|v| {
            v.camera_error = None;
            v.step = PhoneStep::Scanning;
        });

        match self.capabilities.wake_lock.request().await {
            Ok(()) => self.wake_lock_held = true,
            Err(e) => debug!("Wake lock refused: {}", e),
        }

        info!("camera streaming, scanning");
        Ok(())
    }

    /// Sample the video feed once
    ///
    /// Returns the new page count when this sample captured a page. Outside
    /// of a connected scan the detector is held in reset.
    pub fn sample(&mut self, video: &dyn VideoSource, now: Instant) -> Result<Option<usize>> {
        let enabled = self.step() == PhoneStep::Scanning
            && self.manager.state() == PeerConnectionState::Connected;
        if !enabled {
            self.detector.reset();
            self.view_tx.send_if_modified(|v| {
                let changed = v.stability_score != 0.0 || v.just_captured;
                v.stability_score = 0.0;
                v.just_captured = false;
                changed
            });
            return Ok(None);
        }

        let Some(frame) = video.current_frame() else {
            return Ok(None);
        };

        let outcome = self.detector.sample(&frame, now)?;
        let captured = if outcome.is_capture() {
            let page = CapturedPage::encode(&frame, self.config.stability.jpeg_quality)?;
            let count = self.pages.push(page);
            info!(page = count, "page captured");
            if let Err(e) = self.manager.channel().send(SignalMessage::PageCaptured {
                page_number: count as u32,
            }) {
                warn!("Failed to announce captured page: {}", e);
            }
            Some(count)
        } else {
            None
        };

        let score = self.detector.score();
        let page_count = self.pages.len();
        self.view_tx.send_modify(|v| {
            v.stability_score = score;
            v.page_count = page_count;
            v.just_captured = captured.is_some();
        });

        Ok(captured)
    }

    /// Drop the most recent page; the desktop is not told
    pub fn retake_last(&mut self) -> Option<CapturedPage> {
        if self.step() != PhoneStep::Scanning {
            return None;
        }
        let page = self.pages.retake_last()?;
        let page_count = self.pages.len();
        self.view_tx.send_modify(|v| {
            v.page_count = page_count;
            v.just_captured = false;
        });
        debug!(page_count, "last page discarded");
        Some(page)
    }

    /// Upload the pages, announce the total and stop the camera
    ///
    /// A failed upload keeps the session scanning and announces nothing.
    pub async fn finish(&mut self) -> Result<usize> {
        if self.step() != PhoneStep::Scanning {
            return Err(Error::InvalidState("not scanning".to_string()));
        }
        if self.pages.is_empty() {
            return Err(Error::InvalidState("no pages captured".to_string()));
        }

        let session_id = self.view_tx.borrow().session_id.clone();
        let document = self.pages.to_document(&session_id);
        self.capabilities.documents.submit(&document).await?;

        let total = self.pages.len();
        self.manager.channel().send(SignalMessage::ScanDone {
            total_pages: total as u32,
        })?;

        self.stop_camera();
        self.release_wake_lock().await;
        self.detector.reset();
        self.view_tx.send_modify(|v| {
            v.step = PhoneStep::Done;
            v.stability_score = 0.0;
            v.just_captured = false;
        });

        info!(session = %session_id, total_pages = total, "scan finished");
        Ok(total)
    }

    /// Drive the session from a sampling clock and user commands
    ///
    /// Returns after `Leave` or once `commands` closes; always tears down.
    pub async fn run(
        mut self,
        video: Arc<dyn VideoSource>,
        mut commands: mpsc::Receiver<PhoneCommand>,
    ) -> Result<()> {
        let mut ticker = interval(self.config.stability.sample_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sample(video.as_ref(), Instant::now()) {
                        warn!("Sampling failed: {}", e);
                    }
                }
                event = self.manager.next_event(), if self.peer_open => match event {
                    Some(PeerEvent::StateChanged(state)) => {
                        self.view_tx.send_modify(|v| v.connection = state);
                    }
                    Some(PeerEvent::RemoteStream(_)) => {}
                    None => self.peer_open = false,
                },
                command = commands.recv() => match command {
                    Some(PhoneCommand::StartCamera) => {
                        if let Err(e) = self.start_camera().await {
                            warn!("Failed to start camera: {}", e);
                        }
                    }
                    Some(PhoneCommand::RetakeLast) => {
                        self.retake_last();
                    }
                    Some(PhoneCommand::Done) => {
                        if let Err(e) = self.finish().await {
                            warn!("Failed to finish scan: {}", e);
                        }
                    }
                    Some(PhoneCommand::Leave) | None => break,
                },
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Stop the camera, close the connection, leave the channel
    pub async fn shutdown(&mut self) {
        self.stop_camera();
        self.manager.close().await;
        self.release_wake_lock().await;
    }

    fn stop_camera(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.stop_all();
            debug!(stream = %stream.id(), "camera stopped");
        }
    }

    async fn release_wake_lock(&mut self) {
        if std::mem::take(&mut self.wake_lock_held) {
            self.capabilities.wake_lock.release().await;
        }
    }
}

impl Drop for PhoneSession {
    fn drop(&mut self) {
        self.stop_camera();
        if std::mem::take(&mut self.wake_lock_held) {
            let wake_lock = Arc::clone(&self.capabilities.wake_lock);
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move { wake_lock.release().await });
            }
        }
    }
}
