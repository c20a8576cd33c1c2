//! Deterministic token estimation
//!
//! Length-based, backend-independent, and stable across runs, so the CLI always
//! has a repeatable number even with no tokenizer available.

/// Characters per token assumed by the estimator
pub const CHARS_PER_TOKEN: usize = 4;

/// Estimate tokens as `ceil(chars / 4)`
///
/// Empty content is 0 tokens; any non-empty content is at least 1. Length is
/// counted in Unicode scalar values, so a character outside the Basic
/// Multilingual Plane (most emoji) counts once, not as a UTF-16 surrogate pair.
pub fn estimate_tokens(content: &str) -> u32 {
    let chars = content.chars().count();
    u32::try_from(chars.div_ceil(CHARS_PER_TOKEN)).unwrap_or(u32::MAX)
}

/// Extension of a filename, lowercased, without the dot
pub fn extension_of(filename: &str) -> Option<String> {
    std::path::Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}

/// Truncate text so its estimate fits within `budget` tokens
///
/// Prefers to cut at the last space or newline inside the allowed prefix.
pub fn truncate_to_budget(text: &str, budget: u32) -> &str {
    if estimate_tokens(text) <= budget {
        return text;
    }

    let max_chars = (budget as usize).saturating_mul(CHARS_PER_TOKEN);
    let end = text
        .char_indices()
        .nth(max_chars)
        .map_or(text.len(), |(idx, _)| idx);
    let prefix = &text[..end];

    match prefix.rfind([' ', '\n']) {
        Some(cut) if cut > 0 => &prefix[..cut],
        _ => prefix,
    }
}
