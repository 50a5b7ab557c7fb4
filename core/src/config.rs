use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

/// Immutable per-session configuration: what to run and how to recognize its
/// prompts. Prompt patterns are data supplied at session creation, never
/// hard-coded per domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Program and arguments, argv style.
    pub command: Vec<String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Regex matched against the *end* of accumulated output; a match means
    /// the child is ready for the next command.
    pub primary_prompt: String,
    /// Regex for the continuation prompt ("more input expected"); a match is
    /// never treated as command completion.
    #[serde(default)]
    pub continuation_prompt: Option<String>,
    /// Line written to request a graceful exit before force-killing.
    #[serde(default)]
    pub quit_command: Option<String>,
    /// How long to wait for the first prompt after spawn (banner drain).
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,
    /// Per-`send` deadline when the caller does not supply one.
    #[serde(default = "default_send_timeout_ms")]
    pub default_timeout_ms: u64,
    /// Upper bound on a single output poll, so liveness is re-checked at
    /// least this often while waiting for a prompt.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Grace period between the quit command and the force kill.
    #[serde(default = "default_terminate_grace_ms")]
    pub terminate_grace_ms: u64,
}

fn default_startup_timeout_ms() -> u64 {
    5_000
}

fn default_send_timeout_ms() -> u64 {
    10_000
}

fn default_poll_interval_ms() -> u64 {
    200
}

fn default_terminate_grace_ms() -> u64 {
    2_000
}

impl SessionConfig {
    pub fn new<S: Into<String>>(command: Vec<S>, primary_prompt: impl Into<String>) -> Self {
        Self {
            command: command.into_iter().map(Into::into).collect(),
            cwd: None,
            env: HashMap::new(),
            primary_prompt: primary_prompt.into(),
            continuation_prompt: None,
            quit_command: None,
            startup_timeout_ms: default_startup_timeout_ms(),
            default_timeout_ms: default_send_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            terminate_grace_ms: default_terminate_grace_ms(),
        }
    }

    pub fn with_continuation_prompt(mut self, pattern: impl Into<String>) -> Self {
        self.continuation_prompt = Some(pattern.into());
        self
    }

    pub fn with_quit_command(mut self, line: impl Into<String>) -> Self {
        self.quit_command = Some(line.into());
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn terminate_grace(&self) -> Duration {
        Duration::from_millis(self.terminate_grace_ms)
    }
}
