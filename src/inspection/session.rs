//! Bounded-retry validation against a selected label
//!
//! ```text
//! Idle --arm--> Armed --validate--> Running --+--> Accepted   (pass)
//!                 ^                           +--> Rejected   (fail, attempts left)
//!                 |                           +--> Exhausted  (fail, budget used)
//!                 +---------- arm / reset from any state
//! ```
//!
//! A session is driven by one caller at a time. `validate` takes `&mut self`
//! and there is no internal locking, so callers sharing a session across
//! threads must serialize frame submission themselves.

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::analysis::fusion::ConfidenceFusion;
use crate::analysis::similarity::text_similarity;
use crate::capture::frame::Frame;
use crate::capture::FrameSource;
use crate::error::SessionError;
use crate::inspection::pipeline::Pipeline;
use crate::inspection::record::InspectionResult;
use crate::storage::catalog::ReferenceCatalog;

/// Length of the text excerpt in operator summaries
const EXCERPT_CHARS: usize = 100;

/// Lifecycle state of an [`InspectionSession`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No label selected
    Idle,
    /// Label selected, waiting for the first frame
    Armed,
    /// A frame is being inspected
    Running,
    /// Last attempt passed; final
    Accepted,
    /// Last attempt failed, more attempts allowed
    Rejected,
    /// Attempt budget used up; final
    Exhausted,
}

impl SessionState {
    /// States that refuse further attempts until re-armed
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Accepted | SessionState::Exhausted)
    }

    fn accepts_attempts(&self) -> bool {
        matches!(self, SessionState::Armed | SessionState::Rejected)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Armed => "armed",
            SessionState::Running => "running",
            SessionState::Accepted => "accepted",
            SessionState::Rejected => "rejected",
            SessionState::Exhausted => "exhausted",
        };
        f.write_str(name)
    }
}

/// One validation attempt within a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationAttempt {
    /// 1-based, strictly increasing within a session
    pub attempt_number: u32,
    pub max_attempts: u32,
    pub result: InspectionResult,
    /// Similarity to the label's reference text, when the catalog has one
    pub similarity: Option<f32>,
    pub timestamp: SystemTime,
    /// Session state this attempt led to
    pub outcome: SessionState,
}

impl ValidationAttempt {
    pub fn remaining_attempts(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempt_number)
    }

    /// Operator-facing explanation of the attempt
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();
        match self.outcome {
            SessionState::Accepted => lines.push("Label validated".to_string()),
            SessionState::Exhausted => {
                lines.push(format!("Label invalid after {} attempts", self.max_attempts))
            }
            _ => lines.push(format!(
                "Label invalid, {} attempts left",
                self.remaining_attempts()
            )),
        }

        if let Some(error) = &self.result.error {
            lines.push(format!("Error: {}", error));
        }
        lines.push(format!("Confidence: {:.1}%", self.result.confidence * 100.0));
        if let Some(similarity) = self.similarity {
            lines.push(format!("Similarity: {:.1}%", similarity * 100.0));
        }

        if !self.result.text.is_empty() {
            let excerpt: String = self.result.text.chars().take(EXCERPT_CHARS).collect();
            let ellipsis = if self.result.text.chars().count() > EXCERPT_CHARS { "..." } else { "" };
            lines.push(format!("Read text: {}{}", excerpt, ellipsis));
        }

        lines.join("\n")
    }
}

/// Reference the session was armed with
#[derive(Debug, Clone)]
struct ArmedReference {
    customer_id: String,
    label_id: String,
    fusion: ConfidenceFusion,
    reference_text: Option<String>,
}

/// Drives repeated pipeline runs against one selected label
pub struct InspectionSession {
    id: Uuid,
    pipeline: Arc<Pipeline>,
    catalog: Arc<dyn ReferenceCatalog>,
    max_attempts: u32,
    state: SessionState,
    reference: Option<ArmedReference>,
    attempts: Vec<ValidationAttempt>,
}

impl InspectionSession {
    /// Create an idle session
    pub fn new(
        pipeline: Arc<Pipeline>,
        catalog: Arc<dyn ReferenceCatalog>,
        max_attempts: u32,
    ) -> Result<Self, SessionError> {
        if max_attempts == 0 {
            return Err(SessionError::Configuration(
                "max_attempts must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            pipeline,
            catalog,
            max_attempts,
            state: SessionState::Idle,
            reference: None,
            attempts: Vec::new(),
        })
    }

    /// Select the label to validate
    ///
    /// Allowed from any state; the attempt log and counter start over. On a
    /// catalog error the session is left idle.
    pub fn arm(&mut self, customer_id: &str, label_id: &str) -> Result<(), SessionError> {
        self.reset();

        let entry = self.catalog.lookup(customer_id, label_id)?;
        let fusion = if entry.keywords.is_empty() {
            self.pipeline.fusion().clone()
        } else {
            self.pipeline.fusion().with_keywords(&entry.keywords)
        };

        self.reference = Some(ArmedReference {
            customer_id: customer_id.to_string(),
            label_id: label_id.to_string(),
            fusion,
            reference_text: entry.reference_text.filter(|t| !t.trim().is_empty()),
        });
        self.id = Uuid::new_v4();
        self.state = SessionState::Armed;

        info!(
            "Session {} armed for label '{}' (customer '{}'), {} attempts",
            self.id, label_id, customer_id, self.max_attempts
        );
        Ok(())
    }

    /// Run one attempt on `frame`
    ///
    /// Precondition: the session is `Armed` or `Rejected`. Calls in any other
    /// state are contract violations and consume no attempt. Frame-processing
    /// problems never make this fail; they show up in the attempt's result.
    pub fn validate(&mut self, frame: &Frame) -> Result<ValidationAttempt, SessionError> {
        self.check_can_attempt()?;
        let reference = self.reference.clone().ok_or(SessionError::NotArmed)?;

        let attempt_number = self.attempts.len() as u32 + 1;
        self.state = SessionState::Running;
        debug!("Session {} attempt {}/{}", self.id, attempt_number, self.max_attempts);

        let inspection = self.pipeline.inspect_with(frame, &reference.fusion, Some(self.id));
        let result = inspection.result;
        let similarity = reference
            .reference_text
            .as_deref()
            .map(|reference_text| text_similarity(&result.text, reference_text));

        let outcome = if result.success {
            SessionState::Accepted
        } else if attempt_number >= self.max_attempts {
            SessionState::Exhausted
        } else {
            SessionState::Rejected
        };

        info!(
            "Session {} attempt {}/{} for '{}': {} (confidence {:.2})",
            self.id, attempt_number, self.max_attempts, reference.label_id, outcome, result.confidence
        );

        let attempt = ValidationAttempt {
            attempt_number,
            max_attempts: self.max_attempts,
            result,
            similarity,
            timestamp: SystemTime::now(),
            outcome,
        };

        self.state = outcome;
        self.attempts.push(attempt.clone());
        Ok(attempt)
    }

    /// Pull a frame from `source` and validate it
    ///
    /// When the source has no frame this returns `Acquisition` without
    /// consuming an attempt.
    pub fn validate_from(&mut self, source: &mut dyn FrameSource) -> Result<ValidationAttempt, SessionError> {
        self.check_can_attempt()?;
        let frame = source
            .get_frame()
            .ok_or_else(|| SessionError::Acquisition("frame source returned no frame".to_string()))?;
        self.validate(&frame)
    }

    /// Forget the label and return to `Idle`
    pub fn reset(&mut self) {
        if self.state != SessionState::Idle {
            debug!("Session {} reset from {}", self.id, self.state);
        }
        self.state = SessionState::Idle;
        self.reference = None;
        self.attempts.clear();
    }

    pub fn current_state(&self) -> SessionState {
        self.state
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Attempts made since the last arm, oldest first
    pub fn attempts(&self) -> &[ValidationAttempt] {
        &self.attempts
    }

    pub fn remaining_attempts(&self) -> u32 {
        match self.state {
            SessionState::Armed | SessionState::Rejected => {
                self.max_attempts.saturating_sub(self.attempts.len() as u32)
            }
            _ => 0,
        }
    }

    /// `(customer_id, label_id)` of the armed label
    pub fn reference(&self) -> Option<(&str, &str)> {
        self.reference
            .as_ref()
            .map(|r| (r.customer_id.as_str(), r.label_id.as_str()))
    }

    fn check_can_attempt(&self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Idle => Err(SessionError::NotArmed),
            state if state.accepts_attempts() => Ok(()),
            state => Err(SessionError::Terminal(state)),
        }
    }
}
