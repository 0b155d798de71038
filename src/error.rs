//! Error taxonomy
//!
//! Stage failures are recorded, never raised past the pipeline. Only session
//! misuse and configuration problems reach the caller as errors.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::inspection::SessionState;

/// Extraction channel of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    /// Text detection and OCR
    Text,
    /// Barcode decoding
    Barcode,
    /// Generic object detection
    Object,
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Modality::Text => f.write_str("text"),
            Modality::Barcode => f.write_str("barcode"),
            Modality::Object => f.write_str("object"),
        }
    }
}

/// Frame construction errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("buffer holds {actual} bytes but {width}x{height}x{channels} needs {expected}")]
    BufferSize {
        width: u32,
        height: u32,
        channels: u32,
        expected: usize,
        actual: usize,
    },
}

/// Recorded cause of a degraded pipeline stage
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum StageFailure {
    #[error("frame is empty")]
    EmptyFrame,
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    #[error("label region not found: {0}")]
    RegionNotFound(String),
    #[error("rectification skipped: {0}")]
    RectificationSkipped(String),
    #[error("{modality} extraction degraded: {reason}")]
    ExtractionDegraded { modality: Modality, reason: String },
}

impl StageFailure {
    pub(crate) fn degraded(modality: Modality, reason: impl fmt::Display) -> Self {
        StageFailure::ExtractionDegraded {
            modality,
            reason: reason.to_string(),
        }
    }
}

/// Reference catalog errors
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("unknown label '{0}'")]
    UnknownLabel(String),
    #[error("label '{label}' belongs to customer '{expected}', not '{actual}'")]
    CustomerMismatch {
        label: String,
        expected: String,
        actual: String,
    },
    #[error("label '{label}' is invalid: {reason}")]
    InvalidEntry { label: String, reason: String },
    #[error("failed to read catalog: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse catalog: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Errors surfaced by [`crate::inspection::InspectionSession`]
#[derive(Debug, Error)]
pub enum SessionError {
    /// No frame was available; no attempt was consumed
    #[error("no frame available: {0}")]
    Acquisition(String),
    /// The session could not be armed against its reference
    #[error("configuration error: {0}")]
    Configuration(String),
    /// `validate` called before `arm`
    #[error("session is idle; select a label before validating")]
    NotArmed,
    /// `validate` called after the session reached a final state
    #[error("session is {0}; re-arm before validating again")]
    Terminal(SessionState),
}

impl From<CatalogError> for SessionError {
    fn from(err: CatalogError) -> Self {
        SessionError::Configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_failure_display() {
        let failure = StageFailure::degraded(Modality::Barcode, "decoder offline");
        assert_eq!(
            failure.to_string(),
            "barcode extraction degraded: decoder offline"
        );
    }

    #[test]
    fn test_catalog_error_becomes_configuration_error() {
        let err: SessionError = CatalogError::UnknownLabel("L-9".to_string()).into();
        assert!(matches!(err, SessionError::Configuration(ref msg) if msg.contains("L-9")));
    }
}
