use tokio::time::Duration;
use tokio::time::Instant;
use tokio::time::timeout;
use tracing::debug;
use tracing::warn;

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::framer::Boundary;
use crate::framer::PromptFramer;
use crate::pty::PtyProcess;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Stopped,
    Starting,
    Ready,
    Busy,
    Dead,
}

/// Everything the child printed between the previous prompt and the next one,
/// escape sequences stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputBlock {
    pub text: String,
    /// True when the deadline fired before a prompt boundary was seen. The
    /// child is still alive and may be mid-command; the caller can keep the
    /// partial text and `reset()` if it wants a clean slate.
    pub partial: bool,
}

/// One logical REPL: a pty child plus prompt framing, composed into a
/// synchronous-looking `send(command) -> OutputBlock` with timeout and
/// restart-on-failure semantics.
///
/// A session accepts one in-flight command at a time (`&mut self` plus the
/// `Busy` state); within a session, outputs come back in the order commands
/// were sent.
pub struct InteractiveSession {
    config: SessionConfig,
    framer: PromptFramer,
    state: SessionState,
    process: Option<PtyProcess>,
    last_activity: Instant,
}

impl InteractiveSession {
    /// Builds the session without starting the child. Fails only on an
    /// invalid prompt pattern.
    pub fn new(config: SessionConfig) -> Result<Self, SessionError> {
        let framer = PromptFramer::new(
            &config.primary_prompt,
            config.continuation_prompt.as_deref(),
        )?;
        Ok(Self {
            config,
            framer,
            state: SessionState::Stopped,
            process: None,
            last_activity: Instant::now(),
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// For diagnostics only; no TTL eviction is derived from this.
    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    pub fn is_alive(&self) -> bool {
        self.process.as_ref().is_some_and(PtyProcess::is_alive)
    }

    /// Spawn the child and drain its startup banner up to the first prompt.
    /// Any prior handle is terminated first, so a session never owns two
    /// processes. A banner that never shows a prompt is tolerated (bounded by
    /// `startup_timeout_ms`) so prompt-less children can still be driven.
    pub async fn start(&mut self) -> Result<(), SessionError> {
        self.terminate_process().await;
        self.state = SessionState::Starting;
        self.process = Some(match PtyProcess::spawn(&self.config) {
            Ok(process) => process,
            Err(err) => {
                self.state = SessionState::Stopped;
                return Err(err);
            }
        });
        match self.read_until_prompt(self.config.startup_timeout()).await {
            Ok(banner) => {
                debug!(
                    partial = banner.partial,
                    bytes = banner.text.len(),
                    "session started"
                );
                self.state = SessionState::Ready;
                self.last_activity = Instant::now();
                Ok(())
            }
            Err(err) => {
                warn!("child died during startup: {err}");
                self.state = SessionState::Dead;
                Err(err)
            }
        }
    }

    /// No-op when `Ready`; otherwise a full terminate-and-restart. Idempotent.
    pub async fn ensure_running(&mut self) -> Result<(), SessionError> {
        if self.state == SessionState::Ready && self.is_alive() {
            return Ok(());
        }
        self.start().await
    }

    /// Destroy and recreate the child. Calling this twice in a row leaves the
    /// session `Ready` with exactly one live process.
    pub async fn reset(&mut self) -> Result<(), SessionError> {
        self.start().await
    }

    /// Terminate the child and go `Stopped`. Used on eviction.
    pub async fn shutdown(&mut self) {
        self.terminate_process().await;
        self.state = SessionState::Stopped;
    }

    /// Write one command line and collect output until the primary prompt
    /// reappears or `timeout_override` (default: the configured send timeout)
    /// expires.
    ///
    /// Deadline expiry is a *soft* timeout: whatever was captured comes back
    /// with `partial = true` and the child stays alive, because the calling
    /// control loop may still find the partial text informative. Process
    /// death is the hard failure: `Err(ProcessDead)`, recoverable only via
    /// `reset`/`ensure_running` — which the next `send` attempts
    /// transparently, so one dead child does not wedge the session for good.
    pub async fn send(
        &mut self,
        command: &str,
        timeout_override: Option<Duration>,
    ) -> Result<OutputBlock, SessionError> {
        if self.state != SessionState::Ready {
            self.ensure_running().await?;
        }
        self.state = SessionState::Busy;
        self.last_activity = Instant::now();

        let window = timeout_override.unwrap_or_else(|| self.config.default_timeout());
        let result = self.send_inner(command, window).await;
        match &result {
            Ok(block) => {
                debug!(
                    partial = block.partial,
                    bytes = block.text.len(),
                    "command completed"
                );
                self.state = SessionState::Ready;
            }
            Err(err) => {
                warn!("command failed: {err}");
                self.state = SessionState::Dead;
            }
        }
        self.last_activity = Instant::now();
        result
    }

    /// Best-effort Ctrl-C to the child. Does not cancel an in-flight `send`;
    /// the per-call timeout remains the authoritative cancellation path.
    pub async fn send_interrupt(&self) {
        if let Some(process) = &self.process {
            process.send_interrupt().await;
        }
    }

    async fn send_inner(
        &mut self,
        command: &str,
        window: Duration,
    ) -> Result<OutputBlock, SessionError> {
        self.process
            .as_ref()
            .ok_or(SessionError::ProcessDead)?
            .write_line(command)
            .await?;
        let mut block = self.read_until_prompt(window).await?;
        block.text = strip_echo(&block.text, command);
        if !block.partial {
            block.text = block.text.trim_end().to_string();
        }
        Ok(block)
    }

    /// Accumulate pty output until the primary prompt ends the stream
    /// (complete block), the deadline passes (partial block), or the child
    /// dies (error). Single-poll timeouts are absorbed and retried; each poll
    /// is capped at `poll_interval_ms` so liveness is re-checked regularly.
    async fn read_until_prompt(&mut self, window: Duration) -> Result<OutputBlock, SessionError> {
        let framer = &self.framer;
        let poll_slice = self.config.poll_interval();
        let process = self.process.as_mut().ok_or(SessionError::ProcessDead)?;

        let mut raw: Vec<u8> = Vec::with_capacity(4096);
        let deadline = Instant::now() + window;
        loop {
            let now = Instant::now();
            if now >= deadline {
                let text = framer.clean(&String::from_utf8_lossy(&raw));
                return Ok(OutputBlock {
                    text,
                    partial: true,
                });
            }
            let wait = deadline.saturating_duration_since(now).min(poll_slice);
            match timeout(wait, process.recv_output()).await {
                Ok(Some(chunk)) => {
                    raw.extend_from_slice(&chunk);
                    let text = framer.clean(&String::from_utf8_lossy(&raw));
                    if let Some(Boundary::Primary { output_end }) = framer.find_boundary(&text) {
                        return Ok(OutputBlock {
                            text: text[..output_end].to_string(),
                            partial: false,
                        });
                    }
                    // Continuation prompt or no prompt yet: keep reading.
                }
                // Stream closed: the child exited and everything buffered has
                // been delivered.
                Ok(None) => return Err(SessionError::ProcessDead),
                Err(_) => {
                    if !process.is_alive() {
                        return Err(SessionError::ProcessDead);
                    }
                }
            }
        }
    }

    async fn terminate_process(&mut self) {
        if let Some(mut process) = self.process.take() {
            process
                .terminate(
                    self.config.quit_command.as_deref(),
                    self.config.terminate_grace(),
                )
                .await;
        }
    }
}

/// The pty echoes what we type; drop the echoed command line so the caller
/// sees only what the child printed.
fn strip_echo(text: &str, command: &str) -> String {
    let command = command.trim_end_matches('\n');
    if let Some(rest) = text.strip_prefix(command) {
        if rest.is_empty() {
            return String::new();
        }
        if let Some(rest) = rest.strip_prefix('\n') {
            return rest.to_string();
        }
    }
    text.to_string()
}
