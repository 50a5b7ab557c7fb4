use std::io::ErrorKind;
use std::io::Read;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use portable_pty::ChildKiller;
use portable_pty::CommandBuilder;
use portable_pty::PtySize;
use portable_pty::native_pty_system;
use tokio::sync::mpsc;
use tokio::time::Duration;
use tokio::time::Instant;
use tracing::debug;
use tracing::warn;

use crate::config::SessionConfig;
use crate::error::SessionError;

/// ETX; the pty line discipline delivers it to the child as SIGINT.
const INTERRUPT_BYTE: u8 = 0x03;

/// One pty-backed child process. The pty is required because many REPLs
/// change buffering and prompt behavior when not attached to a terminal.
///
/// Owned 1:1 by an [`crate::InteractiveSession`]; nothing else writes to the
/// handle. A blocking reader thread forwards output chunks to a bounded
/// channel, a writer task drains the stdin queue, and a wait thread flips
/// `exited` when the child goes away.
pub(crate) struct PtyProcess {
    writer_tx: mpsc::Sender<Vec<u8>>,
    output_rx: mpsc::Receiver<Vec<u8>>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    exited: Arc<AtomicBool>,
    exit_code: Arc<StdMutex<Option<i32>>>,
    terminated: bool,
}

impl PtyProcess {
    pub(crate) fn spawn(config: &SessionConfig) -> Result<Self, SessionError> {
        let program = config
            .command
            .first()
            .ok_or_else(|| SessionError::spawn(anyhow::anyhow!("empty command line")))?;

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: 24,
                cols: 80,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(SessionError::spawn)?;

        let mut command_builder = CommandBuilder::new(program);
        for arg in &config.command[1..] {
            command_builder.arg(arg);
        }
        if let Some(cwd) = &config.cwd {
            command_builder.cwd(cwd);
        }
        for (key, value) in &config.env {
            command_builder.env(key, value);
        }

        let mut child = pair
            .slave
            .spawn_command(command_builder)
            .map_err(SessionError::spawn)?;
        let killer = child.clone_killer();
        debug!(command = ?config.command, "spawned pty child");

        let (writer_tx, mut writer_rx) = mpsc::channel::<Vec<u8>>(128);
        let (output_tx, output_rx) = mpsc::channel::<Vec<u8>>(256);

        // Reader thread: drain the pty and forward chunks; blocks if the
        // receiver is slow so no output is dropped.
        let mut reader = pair.master.try_clone_reader().map_err(SessionError::spawn)?;
        tokio::task::spawn_blocking(move || {
            let mut buf = [0u8; 8192];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if output_tx.blocking_send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                        std::thread::sleep(Duration::from_millis(5));
                        continue;
                    }
                    Err(_) => break,
                }
            }
        });

        // Writer task: apply queued stdin writes on a blocking thread.
        let writer = pair.master.take_writer().map_err(SessionError::spawn)?;
        let writer = Arc::new(StdMutex::new(writer));
        tokio::spawn({
            let writer = writer.clone();
            async move {
                while let Some(bytes) = writer_rx.recv().await {
                    let writer = writer.clone();
                    let _ = tokio::task::spawn_blocking(move || {
                        if let Ok(mut guard) = writer.lock() {
                            use std::io::Write;
                            let _ = guard.write_all(&bytes);
                            let _ = guard.flush();
                        }
                    })
                    .await;
                }
            }
        });

        // Wait thread: record the exit code and flip the liveness flag.
        let exited = Arc::new(AtomicBool::new(false));
        let exit_code = Arc::new(StdMutex::new(None));
        {
            let exited = exited.clone();
            let exit_code = exit_code.clone();
            tokio::task::spawn_blocking(move || {
                let code = match child.wait() {
                    Ok(status) => status.exit_code() as i32,
                    Err(_) => -1,
                };
                if let Ok(mut slot) = exit_code.lock() {
                    *slot = Some(code);
                }
                exited.store(true, Ordering::SeqCst);
            });
        }

        Ok(Self {
            writer_tx,
            output_rx,
            killer,
            exited,
            exit_code,
            terminated: false,
        })
    }

    /// Queue `line` (newline-terminated) for the child's stdin.
    pub(crate) async fn write_line(&self, line: &str) -> Result<(), SessionError> {
        let mut bytes = line.as_bytes().to_vec();
        if !line.ends_with('\n') {
            bytes.push(b'\n');
        }
        self.writer_tx
            .send(bytes)
            .await
            .map_err(|_| SessionError::Stdin)
    }

    /// Next chunk of pty output. `None` means the stream closed: the child
    /// exited (or closed its side) and all buffered chunks were delivered.
    pub(crate) async fn recv_output(&mut self) -> Option<Vec<u8>> {
        self.output_rx.recv().await
    }

    pub(crate) fn is_alive(&self) -> bool {
        !self.exited.load(Ordering::SeqCst)
    }

    /// Exit code once the child has exited. Diagnostics only.
    pub(crate) fn exit_code(&self) -> Option<i32> {
        self.exit_code.lock().ok().and_then(|slot| *slot)
    }

    /// Best-effort Ctrl-C. No guaranteed effect on the child; the per-call
    /// timeout remains the authoritative cancellation path.
    pub(crate) async fn send_interrupt(&self) {
        let _ = self.writer_tx.send(vec![INTERRUPT_BYTE]).await;
    }

    /// Idempotent shutdown: try the caller-supplied quit line first, give the
    /// child a bounded grace period, then force-kill. Never errors on an
    /// already-dead child.
    pub(crate) async fn terminate(&mut self, quit_command: Option<&str>, grace: Duration) {
        if self.terminated {
            return;
        }
        if let Some(quit) = quit_command
            && self.is_alive()
        {
            if self.write_line(quit).await.is_ok() {
                let deadline = Instant::now() + grace;
                while self.is_alive() && Instant::now() < deadline {
                    tokio::time::sleep(Duration::from_millis(25)).await;
                }
            }
        }
        if self.is_alive() {
            if let Err(err) = self.killer.kill() {
                warn!("failed to kill pty child: {err}");
            }
        }
        self.terminated = true;
    }
}

impl Drop for PtyProcess {
    fn drop(&mut self) {
        // A leaked OS process is a defect; last-resort kill for handles that
        // were dropped without going through `terminate`.
        if !self.terminated && self.is_alive() {
            let _ = self.killer.kill();
        }
    }
}
