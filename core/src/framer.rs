use std::sync::LazyLock;

use regex_lite::Regex;

use crate::error::SessionError;

/// ANSI CSI sequences (`ESC [ params intermediates final`), the escape class
/// that color-happy REPLs interleave with their prompts.
#[allow(clippy::expect_used)]
static ANSI_CSI: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-?]*[ -/]*[@-~]").expect("valid regex"));

/// Where the accumulated output stands relative to the configured prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    /// A command finished: the primary prompt starts at `output_end`, and
    /// everything before it is the command's output block.
    Primary { output_end: usize },
    /// The child printed its continuation prompt: it expects more input.
    /// Never treated as command completion.
    Continuation,
}

/// Pure framing logic: strips terminal escape sequences and decides whether
/// accumulated text ends in a prompt. No I/O; unit-testable on strings.
#[derive(Debug)]
pub struct PromptFramer {
    primary: Regex,
    continuation: Option<Regex>,
}

impl PromptFramer {
    pub fn new(primary: &str, continuation: Option<&str>) -> Result<Self, SessionError> {
        Ok(Self {
            primary: compile(primary)?,
            continuation: continuation.map(compile).transpose()?,
        })
    }

    /// Strip CSI sequences and normalize carriage returns so prompt patterns
    /// can be written against plain `\n`-separated text.
    pub fn clean(&self, raw: &str) -> String {
        let stripped = ANSI_CSI.replace_all(raw, "");
        stripped.replace("\r\n", "\n").replace('\r', "\n")
    }

    /// Match the prompt patterns against the *end* of `text`. A prompt-like
    /// substring in the middle of program output never matches. The
    /// continuation prompt wins when both patterns match the tail.
    pub fn find_boundary(&self, text: &str) -> Option<Boundary> {
        if let Some(continuation) = &self.continuation
            && match_at_end(continuation, text).is_some()
        {
            return Some(Boundary::Continuation);
        }
        match_at_end(&self.primary, text).map(|output_end| Boundary::Primary { output_end })
    }
}

fn compile(pattern: &str) -> Result<Regex, SessionError> {
    Regex::new(pattern).map_err(|source| SessionError::BadPromptPattern {
        pattern: pattern.to_string(),
        source,
    })
}

/// Start offset of the match that ends exactly at `text.len()`, if any.
fn match_at_end(re: &Regex, text: &str) -> Option<usize> {
    re.find_iter(text)
        .find(|m| m.end() == text.len())
        .map(|m| m.start())
}
