//! Confidence fusion
//!
//! Turns the recognized text and barcode presence into one verdict. Short
//! text is distrusted and each reference keyword adds a fixed amount. A digit
//! adds a small bonus; a decoded barcode counts as fully reliable.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::inspection::record::DetectionRecord;

/// Fusion weights and thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionSettings {
    /// Minimum fused confidence for a pass
    pub min_confidence: f32,
    /// Texts shorter than this many characters get `short_text_confidence`
    pub short_text_len: usize,
    pub short_text_confidence: f32,
    /// Starting score for text of trustworthy length
    pub base_confidence: f32,
    /// Added per matched keyword
    pub keyword_weight: f32,
    /// Added when the text contains a digit
    pub digit_bonus: f32,
    /// Confidence assigned to a decoded barcode
    pub barcode_confidence: f32,
}

impl Default for FusionSettings {
    fn default() -> Self {
        Self {
            min_confidence: 0.30,
            short_text_len: 10,
            short_text_confidence: 0.2,
            base_confidence: 0.3,
            keyword_weight: 0.2,
            digit_bonus: 0.1,
            barcode_confidence: 1.0,
        }
    }
}

/// Outcome of fusing the modalities of one run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    /// Fused confidence in `[0, 1]`
    pub confidence: f32,
    pub success: bool,
    /// Text-only score before fusion
    pub text_confidence: f32,
}

/// Combines per-modality confidences into a verdict
#[derive(Debug, Clone, Default)]
pub struct ConfidenceFusion {
    settings: FusionSettings,
    keywords: Vec<String>,
}

impl ConfidenceFusion {
    /// Create a fusion engine for a reference keyword set
    ///
    /// Keywords are matched case-insensitively; blank keywords are ignored.
    pub fn new(settings: FusionSettings, keywords: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        let keywords = keywords
            .into_iter()
            .map(|k| k.as_ref().trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        Self { settings, keywords }
    }

    pub fn settings(&self) -> &FusionSettings {
        &self.settings
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    /// Same weights, different reference keywords
    pub fn with_keywords(&self, keywords: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        Self::new(self.settings.clone(), keywords)
    }

    /// Number of configured keywords contained in `text`, each counted once
    pub fn keyword_matches(&self, text: &str) -> usize {
        let haystack = text.to_lowercase();
        self.keywords.iter().filter(|k| haystack.contains(k.as_str())).count()
    }

    /// Score recognized text on its own
    pub fn text_confidence(&self, text: &str) -> f32 {
        let text = text.trim();
        if text.is_empty() {
            return 0.0;
        }

        if text.chars().count() < self.settings.short_text_len {
            return self.settings.short_text_confidence.clamp(0.0, 1.0);
        }

        let matches = self.keyword_matches(text) as f32;
        let mut confidence = (self.settings.base_confidence + matches * self.settings.keyword_weight).min(1.0);

        if text.chars().any(|c| c.is_ascii_digit()) {
            confidence += self.settings.digit_bonus;
        }

        confidence.clamp(0.0, 1.0)
    }

    /// Fuse text and barcode evidence into a verdict
    ///
    /// Object hits are carried for reporting and do not move the score.
    pub fn fuse(&self, text: &str, barcode_present: bool, objects: &[DetectionRecord]) -> Verdict {
        let text_present = !text.trim().is_empty();
        let text_confidence = self.text_confidence(text);
        let barcode_confidence = self.settings.barcode_confidence.clamp(0.0, 1.0);

        let confidence = match (text_present, barcode_present) {
            (true, true) => (text_confidence + barcode_confidence) / 2.0,
            (true, false) => text_confidence,
            (false, true) => barcode_confidence,
            (false, false) => 0.0,
        };

        let success = (text_present || barcode_present) && confidence >= self.settings.min_confidence;

        debug!(
            "Fused confidence {:.2} (text {:.2}, barcode {}, {} objects) -> {}",
            confidence,
            text_confidence,
            barcode_present,
            objects.len(),
            if success { "pass" } else { "fail" }
        );

        Verdict {
            confidence,
            success,
            text_confidence,
        }
    }
}
