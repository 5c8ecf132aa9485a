//! Phone-to-desktop document scanning core
//!
//! Transport-independent building blocks of the scan flow:
//!
//! - [`frame`]: RGBA frames and the frame similarity metric
//! - [`stability`]: the stable-run detector that triggers automatic capture
//! - [`capture`]: JPEG-encoded pages and the document they form
//! - [`capability`]: injected camera, video feed and wake-lock interfaces
//! - [`record`]: extracted and confirmed clinical records
//! - [`collaborator`]: extraction, record-store and upload contracts
//! - [`session`]: session identifiers and join links

pub mod capability;
pub mod capture;
pub mod collaborator;
pub mod config;
pub mod error;
pub mod frame;
pub mod record;
pub mod session;
pub mod stability;

pub use capability::{
    CameraConstraints, CameraError, CaptureDevice, LocalMediaStream, LocalTrack, MediaKind,
    MediaSample, NoWakeLock, SampleSource, VideoSource, WakeLock,
};
pub use capture::{CapturedPage, CapturedPages, ScanDocument};
pub use collaborator::{
    CollaboratorError, CreatePatientError, DocumentSink, ExtractionService, RecordStore,
};
pub use config::StabilityConfig;
pub use error::{Error, Result};
pub use frame::{similarity, VideoFrame};
pub use record::{
    ConfirmPatientInput, EditableRecord, ExtractedRecord, FieldErrors, Medication, MedicationRow,
    ScanReference,
};
pub use session::SessionId;
pub use stability::{SampleOutcome, StabilityDetector};

/// Crate version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
