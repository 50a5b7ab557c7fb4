use std::sync::LazyLock;

use regex_lite::Regex;

/// Prefix a model reply uses to declare "final answer, stop the loop".
pub const FINAL_SENTINEL: &str = "FINAL:";

/// First well-formed fenced code block: an opening fence with an optional
/// language tag on its own line, then everything up to the closing fence.
#[allow(clippy::expect_used)]
static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[a-zA-Z0-9_+-]*[ \t]*\n(.*?)```").expect("valid regex"));

/// What a free-form model reply amounts to under the step protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedReply {
    /// Exactly one executable instruction was extracted.
    Instruction(String),
    /// The reply ends the loop. `explicit` distinguishes a sentinel-prefixed
    /// answer from the fail-safe path (no block, no sentinel: ambiguous text
    /// is never executed, it is treated as the answer).
    Final { text: String, explicit: bool },
}

/// Applies the instruction-source protocol to a raw reply: sentinel first,
/// then the first fenced block, otherwise an implicit final answer.
pub fn parse_reply(reply: &str) -> ParsedReply {
    let trimmed = reply.trim();
    if let Some(rest) = trimmed.strip_prefix(FINAL_SENTINEL) {
        return ParsedReply::Final {
            text: rest.trim().to_string(),
            explicit: true,
        };
    }
    if let Some(captures) = FENCE_RE.captures(trimmed)
        && let Some(code) = captures.get(1)
    {
        return ParsedReply::Instruction(code.as_str().trim().to_string());
    }
    ParsedReply::Final {
        text: trimmed.to_string(),
        explicit: false,
    }
}
