use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;
use tracing::info;

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::session::InteractiveSession;

/// Sessions are shared behind a per-session mutex: holding it for the length
/// of a `send` is what serializes commands per key without blocking sends on
/// other keys.
pub type SharedSession = Arc<Mutex<InteractiveSession>>;

/// Maps an opaque caller-supplied key to its one live [`InteractiveSession`].
/// Replaces the process-wide singleton REPL with explicit, registry-owned
/// state; the map itself is the only resource shared across sessions.
pub struct SessionRegistry {
    default_config: SessionConfig,
    sessions: Mutex<HashMap<String, SharedSession>>,
}

impl SessionRegistry {
    pub fn new(default_config: SessionConfig) -> Self {
        Self {
            default_config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the session for `key`, creating and starting it with the
    /// default configuration when absent. The map lock is held only long
    /// enough to insert the entry; the spawn and banner drain run under the
    /// per-session lock, so one key's slow startup never stalls `get` on
    /// other keys, while concurrent calls with the same key still share one
    /// process. On startup failure the key is unregistered and the next
    /// `get` retries from scratch.
    pub async fn get(&self, key: &str) -> Result<SharedSession, SessionError> {
        let (shared, created) = {
            let mut sessions = self.sessions.lock().await;
            if let Some(existing) = sessions.get(key) {
                (existing.clone(), false)
            } else {
                debug!(key, "creating session");
                let session = InteractiveSession::new(self.default_config.clone())?;
                let shared = Arc::new(Mutex::new(session));
                sessions.insert(key.to_string(), shared.clone());
                (shared, true)
            }
        };
        if created {
            let mut session = shared.lock().await;
            if let Err(err) = session.start().await {
                drop(session);
                let mut sessions = self.sessions.lock().await;
                // Only evict our own entry; a concurrent remove-then-get may
                // have replaced it already.
                if sessions.get(key).is_some_and(|s| Arc::ptr_eq(s, &shared)) {
                    sessions.remove(key);
                }
                return Err(err);
            }
            info!(key, "session started");
        }
        Ok(shared)
    }

    /// Evicts `key`, terminating its child. Returns false for unknown keys.
    pub async fn remove(&self, key: &str) -> bool {
        let removed = self.sessions.lock().await.remove(key);
        match removed {
            Some(shared) => {
                shared.lock().await.shutdown().await;
                info!(key, "session removed");
                true
            }
            None => false,
        }
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.sessions.lock().await.contains_key(key)
    }

    pub async fn keys(&self) -> Vec<String> {
        self.sessions.lock().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn echo_config() -> SessionConfig {
        SessionConfig::new(
            vec![
                "/bin/sh",
                "-c",
                r#"printf '> '; while read line; do printf 'seen\n> '; done"#,
            ],
            r"> $",
        )
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn get_returns_the_same_session_for_the_same_key() {
        let registry = SessionRegistry::new(echo_config());

        let a = registry.get("alpha").await.expect("get");
        let b = registry.get("alpha").await.expect("get again");
        assert!(Arc::ptr_eq(&a, &b));

        let other = registry.get("beta").await.expect("other key");
        assert!(!Arc::ptr_eq(&a, &other));

        registry.remove("alpha").await;
        registry.remove("beta").await;
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn slow_startup_on_one_key_does_not_block_other_keys() {
        use tokio::time::Duration;
        use tokio::time::Instant;

        // Every child takes ~1s to show its first prompt. Two concurrent
        // gets on different keys must start in parallel, not back to back.
        let registry = SessionRegistry::new(SessionConfig::new(
            vec![
                "/bin/sh",
                "-c",
                r#"sleep 1; printf '> '; while read line; do printf 'ok\n> '; done"#,
            ],
            r"> $",
        ));

        let begin = Instant::now();
        let (a, b) = tokio::join!(registry.get("slow"), registry.get("other"));
        let elapsed = begin.elapsed();
        a.expect("slow key");
        b.expect("other key");
        assert!(
            elapsed < Duration::from_millis(1800),
            "creations ran serially: {elapsed:?}"
        );

        registry.remove("slow").await;
        registry.remove("other").await;
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failed_creation_leaves_key_unregistered() {
        let registry =
            SessionRegistry::new(SessionConfig::new(vec!["/nonexistent/replgate-binary"], r"> $"));

        assert!(registry.get("alpha").await.is_err());
        assert!(!registry.contains("alpha").await);
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn remove_evicts_and_reports_unknown_keys() {
        let registry = SessionRegistry::new(echo_config());

        registry.get("alpha").await.expect("get");
        assert!(registry.contains("alpha").await);
        assert!(registry.remove("alpha").await);
        assert!(!registry.contains("alpha").await);
        assert!(!registry.remove("alpha").await);
    }
}
