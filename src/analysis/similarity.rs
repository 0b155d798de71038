//! Similarity between recognized text and a label's reference text

use strsim::normalized_levenshtein;

/// Lowercase and collapse whitespace
fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Normalized Levenshtein similarity in `[0, 1]`
///
/// Case and whitespace layout are ignored, so line breaks between OCR
/// regions do not count against the read.
pub fn text_similarity(recognized: &str, reference: &str) -> f32 {
    let a = normalize(recognized);
    let b = normalize(reference);

    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    normalized_levenshtein(&a, &b) as f32
}
