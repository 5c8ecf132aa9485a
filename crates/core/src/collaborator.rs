//! External collaborators invoked by the scan flow
//!
//! Extraction, record creation and document upload live outside this
//! workspace. The orchestrators only see these traits.

use crate::capture::ScanDocument;
use crate::record::{ConfirmPatientInput, ExtractedRecord, FieldErrors, ScanReference};
use async_trait::async_trait;

/// Failure reported by an external collaborator
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollaboratorError {
    /// The collaborator could not be reached
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),

    /// The collaborator was reached but rejected the request
    #[error("collaborator rejected request: {0}")]
    Rejected(String),
}

/// Record-store failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CreatePatientError {
    /// Field-keyed validation messages to show next to the form
    #[error("validation failed: {0}")]
    Validation(FieldErrors),

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
}

impl CreatePatientError {
    /// Messages to show on the review form
    pub fn into_field_errors(self) -> FieldErrors {
        match self {
            CreatePatientError::Validation(errors) => errors,
            CreatePatientError::Collaborator(err) => FieldErrors::form(err.to_string()),
        }
    }
}

/// Turns a completed scan into structured clinical values
#[async_trait]
pub trait ExtractionService: Send + Sync {
    async fn extract(&self, scan: &ScanReference) -> Result<ExtractedRecord, CollaboratorError>;
}

/// Creates patients from confirmed records
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Returns the new patient identifier
    async fn create_patient(&self, input: &ConfirmPatientInput) -> Result<String, CreatePatientError>;
}

/// Receives the captured pages once the phone finishes
#[async_trait]
pub trait DocumentSink: Send + Sync {
    async fn submit(&self, document: &ScanDocument) -> Result<(), CollaboratorError>;
}
