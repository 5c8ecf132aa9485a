//! Scan flow test harness
//!
//! Scripted stand-ins for everything the orchestrators receive from
//! outside: camera, wake lock, extraction, record store and upload.
//!
//! Basic usage pattern:
//!
//! 1. Create an `InMemoryRelay` and a `MockPeerTransportProvider` per side
//! 2. Build `DesktopCollaborators` / `PhoneCapabilities` from the fakes here
//! 3. Drive the sessions and inspect the mock transports and fakes

#![allow(dead_code)]

pub mod media;

use async_trait::async_trait;
use docscan_core::{
    CameraConstraints, CameraError, CaptureDevice, CollaboratorError, ConfirmPatientInput,
    CreatePatientError, DocumentSink, ExtractedRecord, ExtractionService, LocalMediaStream,
    LocalTrack, MediaKind, Medication, RecordStore, ScanDocument, ScanReference, WakeLock,
};
use docscan_webrtc::signaling::SignalEvent;
use docscan_webrtc::{
    DesktopCollaborators, PhoneCapabilities, ScanTransportConfig, SignalChannel, SignalMessage,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};

pub use media::{FrameGenerator, ScriptedVideo};

/// Upper bound for anything a test waits on
pub const WAIT: Duration = Duration::from_secs(5);

/// Initialize test logging (safe to call from every test)
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,docscan_webrtc=debug")
        .with_test_writer()
        .try_init();
}

/// Transport config with a fixed join link, small analysis frames and a
/// short cooldown
pub fn test_config() -> ScanTransportConfig {
    let mut config = ScanTransportConfig::default();
    config.public_base_url = Some("https://scan.clinic.test".to_string());
    config.stability.analysis_width = 32;
    config.stability.analysis_height = 24;
    config.stability.cooldown_ms = 1000;
    config.stability.sample_interval_ms = 20;
    config
}

/// Poll `condition` until it holds, panicking after [`WAIT`]
pub async fn wait_until<F>(what: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Forward every message of the given events on `channel` into a queue
pub fn subscribe(
    channel: &SignalChannel,
    events: &[SignalEvent],
) -> mpsc::UnboundedReceiver<SignalMessage> {
    let (tx, rx) = mpsc::unbounded_channel();
    for event in events {
        let tx = tx.clone();
        channel.on_event(*event, move |message| {
            let _ = tx.send(message.clone());
        });
    }
    rx
}

/// Next queued message, panicking after [`WAIT`]
pub async fn next_message(rx: &mut mpsc::UnboundedReceiver<SignalMessage>) -> SignalMessage {
    match tokio::time::timeout(WAIT, rx.recv()).await {
        Ok(Some(message)) => message,
        Ok(None) => panic!("signal queue closed"),
        Err(_) => panic!("no signaling message within {:?}", WAIT),
    }
}

// ============================================================================
// Camera and wake lock
// ============================================================================

/// Camera that grants or refuses every request
pub struct FakeCamera {
    refusal: Option<CameraError>,
    requests: Mutex<Vec<CameraConstraints>>,
    streams: Mutex<Vec<LocalMediaStream>>,
}

impl FakeCamera {
    pub fn granting() -> Arc<Self> {
        Arc::new(Self {
            refusal: None,
            requests: Mutex::new(Vec::new()),
            streams: Mutex::new(Vec::new()),
        })
    }

    pub fn denying() -> Arc<Self> {
        Arc::new(Self {
            refusal: Some(CameraError::PermissionDenied),
            requests: Mutex::new(Vec::new()),
            streams: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<CameraConstraints> {
        self.requests.lock().clone()
    }

    pub fn last_stream(&self) -> Option<LocalMediaStream> {
        self.streams.lock().last().cloned()
    }
}

#[async_trait]
impl CaptureDevice for FakeCamera {
    async fn acquire(
        &self,
        constraints: &CameraConstraints,
    ) -> Result<LocalMediaStream, CameraError> {
        self.requests.lock().push(constraints.clone());
        if let Some(err) = &self.refusal {
            return Err(err.clone());
        }
        let stream = LocalMediaStream::new(vec![LocalTrack::new(MediaKind::Video)]);
        self.streams.lock().push(stream.clone());
        Ok(stream)
    }
}

/// Wake lock that counts requests and releases
#[derive(Default)]
pub struct CountingWakeLock {
    refuse: bool,
    requests: AtomicUsize,
    releases: AtomicUsize,
}

impl CountingWakeLock {
    pub fn granting() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn refusing() -> Arc<Self> {
        Arc::new(Self {
            refuse: true,
            ..Default::default()
        })
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WakeLock for CountingWakeLock {
    async fn request(&self) -> Result<(), String> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.refuse {
            Err("not allowed".to_string())
        } else {
            Ok(())
        }
    }

    async fn release(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Collaborators
// ============================================================================

/// A record extraction would plausibly return
pub fn sample_extraction() -> ExtractedRecord {
    ExtractedRecord {
        patient_name: Some("Jane Doe".to_string()),
        discharge_date: Some("2024-03-01".to_string()),
        ejection_fraction_pct: Some(35.0),
        potassium: Some(4.2),
        medications: Some(vec![Medication {
            name: "Bisoprolol".to_string(),
            dosage: Some("2.5mg".to_string()),
            frequency: Some("once daily".to_string()),
        }]),
        diagnosis: Some("HFrEF".to_string()),
        ..Default::default()
    }
}

/// Extraction that waits for `release` before answering
pub struct GatedExtractor {
    gate: Semaphore,
    outcome: Mutex<Result<ExtractedRecord, CollaboratorError>>,
    calls: Mutex<Vec<ScanReference>>,
}

impl GatedExtractor {
    /// Blocks until released
    pub fn gated(outcome: Result<ExtractedRecord, CollaboratorError>) -> Arc<Self> {
        Arc::new(Self {
            gate: Semaphore::new(0),
            outcome: Mutex::new(outcome),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Answers immediately
    pub fn open(outcome: Result<ExtractedRecord, CollaboratorError>) -> Arc<Self> {
        let extractor = Self::gated(outcome);
        extractor.release();
        extractor
    }

    pub fn release(&self) {
        self.gate.add_permits(1024);
    }

    pub fn set_outcome(&self, outcome: Result<ExtractedRecord, CollaboratorError>) {
        *self.outcome.lock() = outcome;
    }

    pub fn calls(&self) -> Vec<ScanReference> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ExtractionService for GatedExtractor {
    async fn extract(&self, scan: &ScanReference) -> Result<ExtractedRecord, CollaboratorError> {
        self.calls.lock().push(scan.clone());
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| CollaboratorError::Unavailable(e.to_string()))?;
        self.outcome.lock().clone()
    }
}

/// Record store that records submissions
#[derive(Default)]
pub struct RecordingStore {
    rejection: Mutex<Option<CreatePatientError>>,
    created: Mutex<Vec<ConfirmPatientInput>>,
}

impl RecordingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reject_with(&self, err: CreatePatientError) {
        *self.rejection.lock() = Some(err);
    }

    pub fn created(&self) -> Vec<ConfirmPatientInput> {
        self.created.lock().clone()
    }
}

#[async_trait]
impl RecordStore for RecordingStore {
    async fn create_patient(
        &self,
        input: &ConfirmPatientInput,
    ) -> Result<String, CreatePatientError> {
        if let Some(err) = self.rejection.lock().take() {
            return Err(err);
        }
        let mut created = self.created.lock();
        created.push(input.clone());
        Ok(format!("patient-{}", created.len()))
    }
}

/// Upload target that keeps what it receives
#[derive(Default)]
pub struct RecordingSink {
    fail: AtomicBool,
    documents: Mutex<Vec<ScanDocument>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn documents(&self) -> Vec<ScanDocument> {
        self.documents.lock().clone()
    }
}

#[async_trait]
impl DocumentSink for RecordingSink {
    async fn submit(&self, document: &ScanDocument) -> Result<(), CollaboratorError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Unavailable("upload failed".to_string()));
        }
        self.documents.lock().push(document.clone());
        Ok(())
    }
}

// ============================================================================
// Bundles
// ============================================================================

pub fn desktop_collaborators(
    extraction: Arc<GatedExtractor>,
    records: Arc<RecordingStore>,
) -> DesktopCollaborators {
    DesktopCollaborators {
        extraction,
        records,
        default_pathway: Some("heart-failure".to_string()),
    }
}

pub fn phone_capabilities(
    camera: Arc<FakeCamera>,
    wake_lock: Arc<CountingWakeLock>,
    documents: Arc<RecordingSink>,
) -> PhoneCapabilities {
    PhoneCapabilities {
        camera,
        wake_lock,
        documents,
    }
}
