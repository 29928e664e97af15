//! Portable PTY: spawn an arbitrary shell command and bridge stdin/stdout
//! for the session's clients. The child is wrapped in a `Mutex` so a
//! dedicated thread can poll `try_wait()` and report run state (running vs.
//! exited + exit code) independent of the read loop.
//!
//! Generalizes the teacher's closed `PtyTool` enum (Generic/Claude/Gemini/
//! Codex, each with a hardcoded argv) to an arbitrary tokenized command —
//! this service spawns whatever `-shell`/`-shell-restart` names, not a
//! fixed set of known CLI tools.

use portable_pty::{native_pty_system, CommandBuilder, PtySize};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::{self, Arc, Mutex};
use tokio::sync::mpsc;

use crate::error::{anyhow_free::AnyError, PtyError};

const DEFAULT_COLS: u16 = 80;
const DEFAULT_ROWS: u16 = 24;

fn command_for(argv: &[String], cwd: Option<&std::path::Path>) -> Result<CommandBuilder, PtyError> {
    let (program, args) = argv.split_first().ok_or(PtyError::EmptyCommand)?;
    let mut cmd = CommandBuilder::new(program);
    for arg in args {
        cmd.arg(arg);
    }
    cmd.env("TERM", "xterm-256color");
    cmd.env("COLORTERM", "truecolor");
    if let Some(dir) = cwd {
        cmd.cwd(dir);
    }
    Ok(cmd)
}

/// Run state of the PTY child. An `Exited` transition is broadcast to
/// clients as an `exit` frame.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PtyRunState {
    Running,
    Exited { exit_code: u32 },
}

/// PTY bridge: writer for stdin; reader runs in a dedicated OS thread.
/// Resize is requested via `resize_tx`. The child is kept alive so a
/// separate thread can poll `try_wait()`.
pub struct PtyBridge {
    pub writer: Arc<Mutex<Box<dyn Write + Send>>>,
    child: Arc<Mutex<Box<dyn portable_pty::Child + Send + Sync>>>,
}

/// Sender to request a PTY resize (cols, rows). A dedicated thread drains
/// this and calls `master.resize()`.
pub type ResizeSender = sync::mpsc::Sender<(u16, u16)>;

/// Spawn `argv` inside a fresh PTY, optionally in `cwd`. Returns the write
/// bridge, a receiver for PTY stdout bytes, a resize sender, and a receiver
/// for run-state transitions.
pub fn spawn_pty(
    argv: &[String],
    cwd: Option<PathBuf>,
) -> Result<
    (
        PtyBridge,
        mpsc::Receiver<Vec<u8>>,
        ResizeSender,
        mpsc::Receiver<PtyRunState>,
    ),
    PtyError,
> {
    let pty_system = native_pty_system();
    let pair = pty_system
        .openpty(PtySize {
            rows: DEFAULT_ROWS,
            cols: DEFAULT_COLS,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(|e| PtyError::Open(AnyError::from_err(e)))?;

    let cmd = command_for(argv, cwd.as_deref())?;
    let child = pair
        .slave
        .spawn_command(cmd)
        .map_err(|e| PtyError::Spawn(AnyError::from_err(e)))?;

    let mut reader = pair
        .master
        .try_clone_reader()
        .map_err(|e| PtyError::CloneReader(AnyError::from_err(e)))?;
    let writer = pair
        .master
        .take_writer()
        .map_err(|e| PtyError::TakeWriter(AnyError::from_err(e)))?;
    let master = pair.master;

    let (tx, rx) = mpsc::channel::<Vec<u8>>(256);
    let (resize_tx, resize_rx) = sync::mpsc::channel::<(u16, u16)>();
    let (state_tx, state_rx) = mpsc::channel::<PtyRunState>(10);

    let child = Arc::new(Mutex::new(child));

    std::thread::spawn(move || {
        let mut buf = [0u8; 4096];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.blocking_send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    std::thread::spawn(move || {
        while let Ok((cols, rows)) = resize_rx.recv() {
            let size = PtySize {
                cols,
                rows,
                pixel_width: 0,
                pixel_height: 0,
            };
            let _ = master.resize(size);
        }
    });

    let child_poll = Arc::clone(&child);
    std::thread::spawn(move || {
        let mut sent_running = false;
        loop {
            let exit_status = {
                let mut guard = match child_poll.lock() {
                    Ok(g) => g,
                    Err(_) => break,
                };
                match guard.try_wait() {
                    Ok(None) => None,
                    Ok(Some(s)) => Some(s.exit_code()),
                    Err(_) => break,
                }
            };
            if let Some(code) = exit_status {
                let _ = state_tx.blocking_send(PtyRunState::Exited { exit_code: code });
                break;
            }
            if !sent_running {
                sent_running = true;
                let _ = state_tx.blocking_send(PtyRunState::Running);
            }
            std::thread::sleep(std::time::Duration::from_secs(1));
        }
    });

    let bridge = PtyBridge {
        writer: Arc::new(Mutex::new(writer)),
        child,
    };
    Ok((bridge, rx, resize_tx, state_rx))
}

impl PtyBridge {
    /// Kill the PTY child process. Called on session end to avoid leaving
    /// orphan processes behind.
    pub fn kill(&self) -> std::io::Result<()> {
        let mut guard = self
            .child
            .lock()
            .map_err(|_| std::io::Error::other("child mutex poisoned"))?;
        guard.kill()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_command() {
        let err = command_for(&[], None).unwrap_err();
        assert!(matches!(err, PtyError::EmptyCommand));
    }

    #[test]
    fn spawns_and_reads_output() {
        let argv = vec!["echo".to_string(), "hello-from-pty".to_string()];
        let (bridge, mut rx, _resize_tx, mut state_rx) = spawn_pty(&argv, None).unwrap();
        let mut collected = Vec::new();
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            while let Some(chunk) = rx.recv().await {
                collected.extend_from_slice(&chunk);
            }
            while let Some(state) = state_rx.recv().await {
                if matches!(state, PtyRunState::Exited { .. }) {
                    break;
                }
            }
        });
        let _ = bridge.kill();
        assert!(String::from_utf8_lossy(&collected).contains("hello-from-pty"));
    }
}
