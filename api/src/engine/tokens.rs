/// Rough token estimation (actual tokenization varies).
/// Completion providers average ~4 characters per token for English text;
/// the checkpoint budget only needs to be directionally right, so this
/// stays a cheap heuristic rather than a tokenizer dependency.
pub fn estimate_tokens(text: &str) -> usize {
    text.len() / 4
}
