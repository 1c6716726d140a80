use unicode_segmentation::UnicodeSegmentation;

/// Model-agnostic token count. Used consistently by the chunker's budget math (§4.3) and
/// by parent-context truncation (§4.11) — the invariant that matters is that the *same*
/// counter is used in both places, not which counter it is.
pub fn count_tokens(text: &str) -> usize {
    text.unicode_words().count()
}

/// Splits `text` into its token boundaries, preserving order. Used when a chunk needs to
/// be truncated to a token budget without cutting a word in half.
pub fn tokenize(text: &str) -> Vec<&str> {
    text.unicode_words().collect()
}

/// Truncates `text` to at most `max_tokens` tokens, returning the original text unchanged
/// if it already fits.
pub fn truncate_to_tokens(text: &str, max_tokens: usize) -> String {
    if max_tokens == 0 {
        return text.to_string();
    }
    let word_indices: Vec<(usize, &str)> = text.unicode_word_indices().collect();
    if word_indices.len() <= max_tokens {
        return text.to_string();
    }
    let cut = word_indices[max_tokens].0;
    text[..cut].trim_end().to_string()
}
