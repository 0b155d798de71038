//! Inspection Layer
//!
//! The per-frame pipeline, its result records and the retry-bounded
//! validation session built on top of it.

pub mod pipeline;
pub mod record;
pub mod session;
pub mod stats;

pub use pipeline::{Inspection, Pipeline, PipelineBuilder};
pub use record::{DetectionRecord, InspectionResult};
pub use session::{InspectionSession, SessionState, ValidationAttempt};
pub use stats::{RunningStatistics, StatisticsSnapshot};
