use std::sync::Arc;

use async_trait::async_trait;
use replgate_core::OutputBlock;
use replgate_core::SessionError;
use replgate_core::SessionRegistry;
use replgate_core::truncate_output;
use tokio::time::Duration;
use tracing::warn;

use crate::controller::CommandExecutor;

/// The tool-call surface exposed upward to the agent/model layer: two logical
/// operations, `send` and `reset`, addressed by session key.
///
/// The calling model has no channel to observe failures other than the
/// returned string, so this boundary converts every internal error into
/// descriptive text and never returns `Err`. The typed error taxonomy stays
/// inside the core; only this adapter stringifies it.
pub struct SessionTools {
    registry: Arc<SessionRegistry>,
}

impl SessionTools {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    /// Send one command to the keyed session and return the resulting text
    /// block, truncated to the output cap. A session that died mid-command
    /// is restarted and retried once before the failure is reported as text.
    pub async fn send(&self, key: &str, command: &str, timeout: Option<Duration>) -> String {
        let shared = match self.registry.get(key).await {
            Ok(shared) => shared,
            Err(err) => return format!("failed to open session `{key}`: {err}"),
        };
        let mut session = shared.lock().await;
        match session.send(command, timeout).await {
            Ok(block) => render_block(block),
            // A closed stdin writer means the child is gone too; both get the
            // one transparent restart-and-retry.
            Err(SessionError::ProcessDead | SessionError::Stdin) => {
                warn!(key, "session died mid-command; restarting and retrying once");
                match session.send(command, timeout).await {
                    Ok(block) => render_block(block),
                    Err(err) => format!("session `{key}` failed after restart: {err}"),
                }
            }
            Err(err) => format!("session `{key}` error: {err}"),
        }
    }

    /// Destroy and recreate the keyed session's child process.
    pub async fn reset(&self, key: &str) -> String {
        let shared = match self.registry.get(key).await {
            Ok(shared) => shared,
            Err(err) => return format!("failed to open session `{key}`: {err}"),
        };
        match shared.lock().await.reset().await {
            Ok(()) => format!("session `{key}` restarted."),
            Err(err) => format!("failed to restart session `{key}`: {err}"),
        }
    }

    /// Fix the surface to one session key, yielding the executor the step
    /// loop runs extracted instructions through.
    pub fn bind(self: Arc<Self>, key: impl Into<String>) -> BoundSessionTools {
        BoundSessionTools {
            tools: self,
            key: key.into(),
        }
    }
}

/// [`SessionTools`] narrowed to a single session key.
pub struct BoundSessionTools {
    tools: Arc<SessionTools>,
    key: String,
}

#[async_trait]
impl CommandExecutor for BoundSessionTools {
    async fn execute(&self, command: &str) -> String {
        self.tools.send(&self.key, command, None).await
    }
}

fn render_block(block: OutputBlock) -> String {
    let mut text = truncate_output(&block.text);
    if block.partial {
        if text.is_empty() {
            return "(no output before timeout)".to_string();
        }
        text.push_str("\n[timed out waiting for prompt; output may be incomplete]");
    } else if text.is_empty() {
        return "(no output)".to_string();
    }
    text
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use replgate_core::SessionConfig;

    use super::*;

    fn registry(script: &str) -> Arc<SessionRegistry> {
        Arc::new(SessionRegistry::new(SessionConfig::new(
            vec!["/bin/sh", "-c", script],
            r"> $",
        )))
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn send_returns_child_output_as_text() {
        let tools = SessionTools::new(registry(
            r#"printf '> '; while read line; do echo "you sent: $line"; printf '> '; done"#,
        ));
        let out = tools.send("game", "look", None).await;
        assert_eq!(out, "you sent: look");
        tools.registry.remove("game").await;
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failures_come_back_as_text_not_errors() {
        let tools = SessionTools::new(Arc::new(SessionRegistry::new(SessionConfig::new(
            vec!["/nonexistent/replgate-binary"],
            r"> $",
        ))));
        let out = tools.send("game", "look", None).await;
        assert!(out.starts_with("failed to open session `game`"), "got {out}");

        let out = tools.reset("game").await;
        assert!(out.starts_with("failed to open session `game`"), "got {out}");
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn dead_session_is_restarted_and_retried_once() {
        // The child dies on its first command; the marker file makes the
        // restarted child answer normally.
        let marker = std::env::temp_dir().join(format!(
            "replgate-retry-{}-{}",
            std::process::id(),
            line!()
        ));
        let _ = std::fs::remove_file(&marker);
        let script = format!(
            r#"printf '> '; while read line; do if [ ! -e {m} ]; then : > {m}; exit 1; fi; echo revived; printf '> '; done"#,
            m = marker.display()
        );
        let tools = SessionTools::new(registry(&script));

        let out = tools.send("game", "poke", None).await;
        assert_eq!(out, "revived");

        tools.registry.remove("game").await;
        let _ = std::fs::remove_file(&marker);
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn reset_reports_success_as_text() {
        let tools = SessionTools::new(registry(
            r#"printf '> '; while read line; do printf 'ok\n> '; done"#,
        ));
        let out = tools.reset("game").await;
        assert_eq!(out, "session `game` restarted.");
        tools.registry.remove("game").await;
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn bound_executor_routes_instructions_to_its_key() {
        let tools = Arc::new(SessionTools::new(registry(
            r#"printf '> '; while read line; do echo "ran: $line"; printf '> '; done"#,
        )));
        let executor = tools.clone().bind("game");
        let out = executor.execute("inventory").await;
        assert_eq!(out, "ran: inventory");
        tools.registry.remove("game").await;
    }

    #[test]
    fn partial_blocks_are_flagged_for_the_model() {
        let rendered = render_block(OutputBlock {
            text: "half an answ".to_string(),
            partial: true,
        });
        assert!(rendered.contains("half an answ"));
        assert!(rendered.contains("output may be incomplete"));
    }
}
