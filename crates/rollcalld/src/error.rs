use rollcall_core::{ExtractorError, FrameError, IndexError, MatchError};
use rollcall_store::StoreError;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Why a single-face extraction produced no usable embedding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionFailure {
    NoFace,
    MultiFace,
}

impl fmt::Display for ExtractionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExtractionFailure::NoFace => "no face in image",
            ExtractionFailure::MultiFace => "more than one face in image",
        })
    }
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("employee code already exists: {0}")]
    DuplicateEmployee(String),
    #[error("no active employee with code {0}")]
    EmployeeNotFound(String),
    #[error("face encoding extraction failed: {0}")]
    EncodingExtractionFailed(ExtractionFailure),
    #[error("employee {code} already has the maximum of {max} face photos")]
    QuotaExceeded { code: String, max: usize },
    #[error("no face detected")]
    NoFaceDetected,
    #[error("{0} faces detected; exactly one is required")]
    MultipleFacesDetected(usize),
    #[error("face not recognized (confidence {0:.3})")]
    UnrecognizedFace(f32),
    #[error("{0} has already checked in today")]
    AlreadyCheckedIn(String),
    #[error("{0} has already checked out today")]
    AlreadyCheckedOut(String),
    #[error("{0} has not checked in today")]
    NoCheckInFound(String),
    #[error("no face photo with id {0}")]
    PhotoNotFound(i64),
    #[error("face photo {encoding_id} is the last one of employee {code}")]
    LastPhoto { code: String, encoding_id: i64 },
    #[error("enrollment failed: {0}")]
    EnrollmentFailed(String),
    #[error("image error: {0}")]
    Image(#[from] FrameError),
    #[error("extractor error: {0}")]
    Extractor(#[from] ExtractorError),
    #[error("index error: {0}")]
    Index(#[from] IndexError),
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
    #[error("image archive error: {0}")]
    Archive(#[from] std::io::Error),
    #[error("failed to start engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

impl ServiceError {
    /// Stable snake_case code, used as the prefix of D-Bus error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::Validation(_) => "validation_error",
            ServiceError::DuplicateEmployee(_) => "duplicate_employee",
            ServiceError::EmployeeNotFound(_) => "employee_not_found",
            ServiceError::EncodingExtractionFailed(_) => "encoding_extraction_failed",
            ServiceError::QuotaExceeded { .. } => "quota_exceeded",
            ServiceError::NoFaceDetected => "no_face_detected",
            ServiceError::MultipleFacesDetected(_) => "multiple_faces_detected",
            ServiceError::UnrecognizedFace(_) => "unrecognized_face",
            ServiceError::AlreadyCheckedIn(_) => "already_checked_in",
            ServiceError::AlreadyCheckedOut(_) => "already_checked_out",
            ServiceError::NoCheckInFound(_) => "no_check_in_found",
            ServiceError::PhotoNotFound(_) => "photo_not_found",
            ServiceError::LastPhoto { .. } => "last_photo",
            ServiceError::EnrollmentFailed(_) => "enrollment_failed",
            ServiceError::Image(_) => "invalid_image",
            ServiceError::Extractor(_) => "extractor_error",
            ServiceError::Index(_) => "index_error",
            ServiceError::Store(_) => "store_error",
            ServiceError::Archive(_) => "archive_error",
            ServiceError::Spawn(_) | ServiceError::ChannelClosed => "engine_unavailable",
        }
    }
}

impl From<MatchError> for ServiceError {
    fn from(e: MatchError) -> Self {
        match e {
            MatchError::Index(e) => ServiceError::Index(e),
            MatchError::Extractor(e) => ServiceError::Extractor(e),
            MatchError::InvalidThreshold(v) => {
                ServiceError::Validation(format!("threshold must be within [0, 1], got {v}"))
            }
        }
    }
}
