/// Cap on the text returned through the tool boundary, protecting the
/// calling model's context window.
pub const MAX_OUTPUT_CHARS: usize = 20_000;

pub const TRUNCATION_MARKER: &str = "\n...[truncated]...";

/// Head-truncate `text` to [`MAX_OUTPUT_CHARS`] characters, appending the
/// marker. Text at or under the cap passes through unmodified. Counts
/// characters, not bytes, so multibyte output is never split.
pub fn truncate_output(text: &str) -> String {
    match text.char_indices().nth(MAX_OUTPUT_CHARS) {
        Some((byte_end, _)) => {
            let mut out = String::with_capacity(byte_end + TRUNCATION_MARKER.len());
            out.push_str(&text[..byte_end]);
            out.push_str(TRUNCATION_MARKER);
            out
        }
        None => text.to_string(),
    }
}
