use thiserror::Error;

/// Session-level failures. These are returned as values across the session
/// boundary so the control loop can decide whether to retry, reset, or give
/// up; only the outermost tool adapter converts them to text.
///
/// A soft timeout is deliberately *not* represented here: it yields an
/// [`crate::OutputBlock`] with `partial = true` instead, because the partial
/// text is still useful to the caller.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The child process could not be started. Fatal to that `start()` call
    /// only; the next attempt retries from scratch.
    #[error("failed to spawn child process: {source}")]
    Spawn {
        #[source]
        source: anyhow::Error,
    },

    /// The child exited (or its output stream closed) while a command was in
    /// flight. Waiting longer will not help; only a reset recovers.
    #[error("child process exited unexpectedly")]
    ProcessDead,

    /// The stdin writer channel is gone. Callers treat this like process
    /// death.
    #[error("failed to write to child stdin")]
    Stdin,

    /// A prompt pattern failed to compile; rejected at session construction.
    #[error("invalid prompt pattern `{pattern}`: {source}")]
    BadPromptPattern {
        pattern: String,
        #[source]
        source: regex_lite::Error,
    },
}

impl SessionError {
    pub(crate) fn spawn(source: anyhow::Error) -> Self {
        Self::Spawn { source }
    }
}
