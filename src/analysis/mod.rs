//! Analysis Layer
//!
//! Scores what the vision layer extracted against the armed reference.

pub mod fusion;
pub mod similarity;

pub use fusion::{ConfidenceFusion, FusionSettings, Verdict};
pub use similarity::text_similarity;
