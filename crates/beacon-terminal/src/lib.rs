//! Per-session pseudo-terminal multiplexer.
//!
//! Keyed by [`TerminalId`] within a session: `open` allocates a PTY rooted
//! at the session's working path (if known), `write` forwards bytes,
//! `resize` forwards a new size, `close` tears one down. Lifecycle events
//! (`Ready`/`Output`/`Exit`/`Error`) are forwarded through an
//! `mpsc::Sender` supplied at construction — the owning connector turns
//! them into `terminal:*` events on the wire. `close_all` is called by the
//! connector on disconnect.
//!
//! PTYs are allocated with `portable-pty`, which has no native async API;
//! every blocking call (open, read, write, wait) runs on a
//! `tokio::task::spawn_blocking` thread.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use portable_pty::{native_pty_system, CommandBuilder, MasterPty, PtySize};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use beacon_core::TerminalId;

pub use error::TerminalError;

/// A lifecycle event for one terminal, forwarded to the owning connector.
#[derive(Debug, Clone)]
pub enum TerminalEvent {
    /// The PTY was allocated and the child process spawned.
    Ready,
    /// A chunk of output was read from the PTY.
    Output(Vec<u8>),
    /// The child process exited.
    Exit {
        /// Process exit code, if the platform reported one.
        exit_code: Option<i32>,
    },
    /// An unrecoverable I/O error occurred; the terminal is no longer usable.
    Error(String),
}

struct TerminalHandle {
    writer_tx: mpsc::Sender<Vec<u8>>,
    master: Box<dyn MasterPty + Send>,
    killer: Box<dyn portable_pty::ChildKiller + Send + Sync>,
}

/// Scoped per session. Owns every open terminal for that session.
pub struct TerminalRegistry {
    working_path: Option<PathBuf>,
    terminals: Mutex<HashMap<TerminalId, TerminalHandle>>,
    events: mpsc::Sender<(TerminalId, TerminalEvent)>,
}

impl TerminalRegistry {
    /// Construct a registry that forwards lifecycle events for every
    /// terminal it opens through `events`. `working_path` roots new PTYs'
    /// cwd when the session's working directory is known.
    #[must_use]
    pub fn new(
        working_path: Option<PathBuf>,
        events: mpsc::Sender<(TerminalId, TerminalEvent)>,
    ) -> Arc<Self> {
        Arc::new(Self {
            working_path,
            terminals: Mutex::new(HashMap::new()),
            events,
        })
    }

    /// Allocate a pseudo-terminal and spawn the user's shell into it.
    ///
    /// # Errors
    ///
    /// Returns [`TerminalError::AlreadyOpen`] if `id` is already registered,
    /// or [`TerminalError::Pty`]/[`TerminalError::Io`] if allocation or
    /// spawning fails.
    pub async fn open(
        self: &Arc<Self>,
        id: TerminalId,
        cols: u16,
        rows: u16,
    ) -> Result<(), TerminalError> {
        {
            let terminals = self.terminals.lock().await;
            if terminals.contains_key(&id) {
                return Err(TerminalError::AlreadyOpen(id.to_string()));
            }
        }

        let working_path = self.working_path.clone();
        let spawned = tokio::task::spawn_blocking(move || spawn_pty(cols, rows, working_path))
            .await
            .map_err(|e| TerminalError::Pty(anyhow::anyhow!("join error spawning pty: {e}")))??;

        let SpawnedPty {
            master,
            killer,
            reader,
            writer,
            child,
        } = spawned;

        let (writer_tx, writer_rx) = mpsc::channel::<Vec<u8>>(256);
        spawn_writer_task(writer, writer_rx);

        let handle = TerminalHandle {
            writer_tx,
            master,
            killer,
        };
        self.terminals.lock().await.insert(id.clone(), handle);

        let _ = self.events.send((id.clone(), TerminalEvent::Ready)).await;
        spawn_reader_task(Arc::clone(self), id.clone(), reader);
        spawn_wait_task(Arc::clone(self), id, child);

        Ok(())
    }

    /// Forward `data` to the terminal's stdin.
    ///
    /// # Errors
    ///
    /// Returns [`TerminalError::UnknownTerminal`] if `id` is not open.
    pub async fn write(&self, id: &TerminalId, data: Vec<u8>) -> Result<(), TerminalError> {
        let terminals = self.terminals.lock().await;
        let handle = terminals
            .get(id)
            .ok_or_else(|| TerminalError::UnknownTerminal(id.to_string()))?;
        // Best-effort: a full or closed writer channel just drops the bytes
        // rather than applying backpressure to the peer.
        let _ = handle.writer_tx.try_send(data);
        Ok(())
    }

    /// Resize the terminal.
    ///
    /// # Errors
    ///
    /// Returns [`TerminalError::UnknownTerminal`] if `id` is not open, or
    /// [`TerminalError::Pty`] if the resize call fails.
    pub async fn resize(&self, id: &TerminalId, cols: u16, rows: u16) -> Result<(), TerminalError> {
        let terminals = self.terminals.lock().await;
        let handle = terminals
            .get(id)
            .ok_or_else(|| TerminalError::UnknownTerminal(id.to_string()))?;
        handle
            .master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(TerminalError::Pty)
    }

    /// Tear down a terminal: kill the child process and drop its handle.
    /// Idempotent — closing an already-closed or unknown id is a no-op.
    pub async fn close(&self, id: &TerminalId) {
        let handle = self.terminals.lock().await.remove(id);
        if let Some(mut handle) = handle {
            if let Err(err) = handle.killer.kill() {
                debug!(terminal_id = %id, %err, "terminal kill failed (process likely already exited)");
            }
        }
    }

    /// Close every open terminal. Called by the owning connector on
    /// disconnect.
    pub async fn close_all(&self) {
        let handles: Vec<(TerminalId, TerminalHandle)> =
            self.terminals.lock().await.drain().collect();
        for (id, mut handle) in handles {
            if let Err(err) = handle.killer.kill() {
                debug!(terminal_id = %id, %err, "terminal kill failed during close_all");
            }
        }
    }

    /// Number of terminals currently open. Test/diagnostic helper.
    pub async fn len(&self) -> usize {
        self.terminals.lock().await.len()
    }

    /// Whether no terminals are currently open.
    pub async fn is_empty(&self) -> bool {
        self.terminals.lock().await.is_empty()
    }
}

struct SpawnedPty {
    master: Box<dyn MasterPty + Send>,
    killer: Box<dyn portable_pty::ChildKiller + Send + Sync>,
    reader: Box<dyn Read + Send>,
    writer: Box<dyn Write + Send>,
    child: Box<dyn portable_pty::Child + Send + Sync>,
}

fn spawn_pty(
    cols: u16,
    rows: u16,
    working_path: Option<PathBuf>,
) -> Result<SpawnedPty, TerminalError> {
    let pty_system = native_pty_system();
    let pair = pty_system
        .openpty(PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(TerminalError::Pty)?;

    let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string());
    let mut cmd = CommandBuilder::new(shell);
    if let Some(cwd) = working_path {
        cmd.cwd(cwd);
    }

    let child = pair.slave.spawn_command(cmd).map_err(TerminalError::Pty)?;
    let killer = child.clone_killer();
    let reader = pair.master.try_clone_reader().map_err(TerminalError::Pty)?;
    let writer = pair.master.take_writer().map_err(TerminalError::Pty)?;

    Ok(SpawnedPty {
        master: pair.master,
        killer,
        reader,
        writer,
        child,
    })
}

fn spawn_writer_task(mut writer: Box<dyn Write + Send>, mut rx: mpsc::Receiver<Vec<u8>>) {
    tokio::task::spawn_blocking(move || {
        while let Some(bytes) = rx.blocking_recv() {
            if writer.write_all(&bytes).is_err() {
                break;
            }
            let _ = writer.flush();
        }
    });
}

fn spawn_reader_task(registry: Arc<TerminalRegistry>, id: TerminalId, mut reader: Box<dyn Read + Send>) {
    tokio::task::spawn_blocking(move || {
        let mut buf = [0u8; 8192];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    let events = registry.events.clone();
                    let chunk = buf[..n].to_vec();
                    let id = id.clone();
                    if events
                        .blocking_send((id, TerminalEvent::Output(chunk)))
                        .is_err()
                    {
                        break;
                    }
                },
                Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    let _ = registry
                        .events
                        .blocking_send((id.clone(), TerminalEvent::Error(e.to_string())));
                    break;
                },
            }
        }
    });
}

fn spawn_wait_task(
    registry: Arc<TerminalRegistry>,
    id: TerminalId,
    mut child: Box<dyn portable_pty::Child + Send + Sync>,
) {
    tokio::task::spawn_blocking(move || {
        let exit_code = match child.wait() {
            Ok(status) => Some(status.exit_code() as i32),
            Err(err) => {
                warn!(terminal_id = %id, %err, "failed to wait on terminal child process");
                None
            },
        };
        tokio::runtime::Handle::current().block_on(async {
            registry.terminals.lock().await.remove(&id);
            let _ = registry
                .events
                .send((id, TerminalEvent::Exit { exit_code }))
                .await;
        });
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_write_read_and_close_round_trip() {
        let (tx, mut rx) = mpsc::channel(64);
        let registry = TerminalRegistry::new(None, tx);
        let id = TerminalId::new("term-1");

        registry.open(id.clone(), 80, 24).await.unwrap();
        assert_eq!(registry.len().await, 1);

        registry
            .write(&id, b"echo hi\n".to_vec())
            .await
            .unwrap();

        let mut saw_ready = false;
        let mut saw_output = false;
        for _ in 0..50 {
            match tokio::time::timeout(std::time::Duration::from_millis(200), rx.recv()).await {
                Ok(Some((_, TerminalEvent::Ready))) => saw_ready = true,
                Ok(Some((_, TerminalEvent::Output(bytes)))) if !bytes.is_empty() => {
                    saw_output = true;
                    break;
                },
                Ok(Some(_)) | Err(_) => continue,
                Ok(None) => break,
            }
        }
        assert!(saw_ready, "expected a Ready event");
        assert!(saw_output, "expected at least one Output event");

        registry.close(&id).await;
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn write_to_unknown_terminal_is_an_error() {
        let (tx, _rx) = mpsc::channel(8);
        let registry = TerminalRegistry::new(None, tx);
        let err = registry
            .write(&TerminalId::new("missing"), b"x".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, TerminalError::UnknownTerminal(_)));
    }

    #[tokio::test]
    async fn opening_the_same_id_twice_fails() {
        let (tx, _rx) = mpsc::channel(64);
        let registry = TerminalRegistry::new(None, tx);
        let id = TerminalId::new("term-dup");
        registry.open(id.clone(), 80, 24).await.unwrap();
        let err = registry.open(id.clone(), 80, 24).await.unwrap_err();
        assert!(matches!(err, TerminalError::AlreadyOpen(_)));
        registry.close(&id).await;
    }

    #[tokio::test]
    async fn close_all_empties_the_registry() {
        let (tx, _rx) = mpsc::channel(64);
        let registry = TerminalRegistry::new(None, tx);
        registry.open(TerminalId::new("a"), 80, 24).await.unwrap();
        registry.open(TerminalId::new("b"), 80, 24).await.unwrap();
        assert_eq!(registry.len().await, 2);

        registry.close_all().await;
        assert!(registry.is_empty().await);
    }
}
