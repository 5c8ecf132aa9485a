//! Platform capabilities the scan flow depends on
//!
//! Camera acquisition, the live video feed and idle prevention are injected
//! through these traits so the orchestration logic runs without hardware.

use crate::frame::VideoFrame;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Media kind of a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

/// Which camera to open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    /// Front camera
    User,
    /// Rear camera
    Environment,
}

/// Requested camera settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraConstraints {
    pub facing: FacingMode,
    pub ideal_width: u32,
    pub ideal_height: u32,
    pub audio: bool,
}

impl CameraConstraints {
    /// Rear camera at 1080p, no microphone
    pub fn document() -> Self {
        Self {
            facing: FacingMode::Environment,
            ideal_width: 1920,
            ideal_height: 1080,
            audio: false,
        }
    }
}

impl Default for CameraConstraints {
    fn default() -> Self {
        Self::document()
    }
}

/// One encoded media frame ready for packetization
///
/// Video samples are VP8 frames, audio samples Opus packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSample {
    pub data: Vec<u8>,
    /// Playout duration of this sample
    pub duration: Duration,
}

/// Encoded output of a camera or microphone track
#[async_trait]
pub trait SampleSource: Send + Sync {
    /// Wait for the next encoded sample; `None` once the device is gone
    async fn next_sample(&self) -> Option<MediaSample>;
}

/// One local media track
///
/// Clones share the stopped flag, so stopping any clone stops the track.
#[derive(Clone)]
pub struct LocalTrack {
    id: String,
    kind: MediaKind,
    stopped: Arc<AtomicBool>,
    source: Option<Arc<dyn SampleSource>>,
}

impl std::fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("stopped", &self.is_stopped())
            .field("has_source", &self.source.is_some())
            .finish()
    }
}

impl LocalTrack {
    /// Track with no encoded output, for signaling-only use
    pub fn new(kind: MediaKind) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            stopped: Arc::new(AtomicBool::new(false)),
            source: None,
        }
    }

    /// Track whose encoded samples are read from `source`
    pub fn with_source(kind: MediaKind, source: Arc<dyn SampleSource>) -> Self {
        Self {
            source: Some(source),
            ..Self::new(kind)
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn source(&self) -> Option<Arc<dyn SampleSource>> {
        self.source.clone()
    }

    /// Release the underlying device; idempotent
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            tracing::debug!(track = %self.id, kind = self.kind.as_str(), "local track stopped");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// A set of local tracks acquired together
#[derive(Debug, Clone)]
pub struct LocalMediaStream {
    id: String,
    tracks: Vec<LocalTrack>,
}

impl LocalMediaStream {
    pub fn new(tracks: Vec<LocalTrack>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tracks,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[LocalTrack] {
        &self.tracks
    }

    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }

    pub fn all_stopped(&self) -> bool {
        self.tracks.iter().all(LocalTrack::is_stopped)
    }
}

/// Why the camera could not be opened
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CameraError {
    #[error("camera permission denied")]
    PermissionDenied,

    #[error("no camera available")]
    NotFound,

    #[error("camera unavailable: {0}")]
    Unavailable(String),
}

/// Camera acquisition
///
/// Streams meant for a real peer connection carry tracks built with
/// [`LocalTrack::with_source`].
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    /// Prompt for and open the camera
    async fn acquire(
        &self,
        constraints: &CameraConstraints,
    ) -> std::result::Result<LocalMediaStream, CameraError>;
}

/// Live preview of the acquired camera, read at sampling time
pub trait VideoSource: Send + Sync {
    /// Latest full-resolution frame, or `None` while the feed is not ready
    fn current_frame(&self) -> Option<VideoFrame>;
}

/// Screen idle prevention
#[async_trait]
pub trait WakeLock: Send + Sync {
    /// Keep the screen on; refusal is not fatal to scanning
    async fn request(&self) -> std::result::Result<(), String>;

    async fn release(&self);
}

/// Wake lock for platforms without idle control
#[derive(Debug, Default, Clone, Copy)]
pub struct NoWakeLock;

#[async_trait]
impl WakeLock for NoWakeLock {
    async fn request(&self) -> std::result::Result<(), String> {
        Ok(())
    }

    async fn release(&self) {}
}
