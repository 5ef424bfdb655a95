use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use parking_lot::Mutex;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::mpsc as std_mpsc;
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::{PtyHostError, Result};

const READ_CHUNK_BYTES: usize = 4096;
/// How long the exit watcher waits for the reader to drain after the child exits.
const READER_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Program and arguments a registry launches for each new session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl LaunchCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

#[derive(Debug, Clone)]
pub struct SpawnRequest {
    /// Display form of the owner key, used for errors and logs.
    pub owner: String,
    pub command: LaunchCommand,
    pub cwd: PathBuf,
    pub cols: u16,
    pub rows: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitInfo {
    pub exit_code: Option<u32>,
    pub signal: Option<String>,
}

/// Output of a spawned process, delivered in the order it was produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutput {
    Data(String),
    Exit(ExitInfo),
}

pub trait ProcessHandle: Send + Sync {
    fn pid(&self) -> Option<u32>;
    fn write(&self, data: &[u8]) -> std::io::Result<()>;
    fn resize(&self, cols: u16, rows: u16) -> std::io::Result<()>;
    fn kill(&self) -> std::io::Result<()>;
}

pub struct SpawnedProcess {
    pub handle: Box<dyn ProcessHandle>,
    pub output: mpsc::UnboundedReceiver<ProcessOutput>,
}

/// Starts OS processes for a registry. Spawning is blocking; registries call
/// it from a blocking task.
pub trait ProcessSpawner: Send + Sync {
    fn spawn(&self, request: &SpawnRequest) -> Result<SpawnedProcess>;
}

/// Spawns interactive processes attached to a native pseudo-terminal.
#[derive(Debug, Default, Clone)]
pub struct PortablePtySpawner;

impl PortablePtySpawner {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessSpawner for PortablePtySpawner {
    fn spawn(&self, request: &SpawnRequest) -> Result<SpawnedProcess> {
        let spawn_error = |message: String| PtyHostError::Spawn {
            owner: request.owner.clone(),
            message,
        };

        let pair = native_pty_system()
            .openpty(PtySize {
                rows: request.rows,
                cols: request.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| spawn_error(format!("failed to open pty: {e}")))?;

        let mut cmd = CommandBuilder::new(&request.command.program);
        cmd.args(&request.command.args);
        cmd.cwd(&request.cwd);
        cmd.env("TERM", "xterm-256color");
        for (key, value) in &request.command.env {
            cmd.env(key, value);
        }

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| spawn_error(format!("failed to spawn '{}': {e}", request.command.program)))?;
        drop(pair.slave);

        let pid = child.process_id();
        let killer = child.clone_killer();
        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| spawn_error(format!("failed to clone reader: {e}")))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| spawn_error(format!("failed to take writer: {e}")))?;

        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let (drained_tx, drained_rx) = std_mpsc::channel::<()>();

        let owner = request.owner.clone();
        let reader_tx = output_tx.clone();
        thread::Builder::new()
            .name(format!("pty-reader-{owner}"))
            .spawn(move || {
                pump_output(reader, &reader_tx, &owner);
                let _ = drained_tx.send(());
            })
            .map_err(|e| spawn_error(format!("failed to start reader thread: {e}")))?;

        let owner = request.owner.clone();
        thread::Builder::new()
            .name(format!("pty-exit-{owner}"))
            .spawn(move || {
                let info = match child.wait() {
                    Ok(status) => ExitInfo {
                        exit_code: Some(status.exit_code()),
                        signal: status.signal().map(str::to_string),
                    },
                    Err(err) => {
                        tracing::warn!(owner = %owner, error = %err, "failed to wait for pty child");
                        ExitInfo {
                            exit_code: None,
                            signal: None,
                        }
                    }
                };
                // Let trailing output land before the exit notification.
                let _ = drained_rx.recv_timeout(READER_DRAIN_GRACE);
                let _ = output_tx.send(ProcessOutput::Exit(info));
            })
            .map_err(|e| spawn_error(format!("failed to start exit watcher: {e}")))?;

        tracing::info!(owner = %request.owner, pid = ?pid, cwd = %request.cwd.display(), "spawned pty process");

        Ok(SpawnedProcess {
            handle: Box::new(PtyProcess {
                pid,
                master: Mutex::new(pair.master),
                writer: Mutex::new(writer),
                killer: Mutex::new(killer),
            }),
            output: output_rx,
        })
    }
}

fn pump_output(
    mut reader: Box<dyn Read + Send>,
    tx: &mpsc::UnboundedSender<ProcessOutput>,
    owner: &str,
) {
    let mut buf = [0u8; READ_CHUNK_BYTES];
    let mut pending: Vec<u8> = Vec::new();

    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                pending.extend_from_slice(&buf[..n]);
                let chunk = take_complete_utf8(&mut pending);
                if !chunk.is_empty() && tx.send(ProcessOutput::Data(chunk)).is_err() {
                    break;
                }
            }
            Err(err) => {
                tracing::debug!(owner = %owner, error = %err, "pty read ended");
                break;
            }
        }
    }

    if !pending.is_empty() {
        let _ = tx.send(ProcessOutput::Data(
            String::from_utf8_lossy(&pending).into_owned(),
        ));
    }
}

/// Decodes the longest valid prefix of `pending`, leaving an incomplete
/// trailing sequence (at most 3 bytes) for the next read.
fn take_complete_utf8(pending: &mut Vec<u8>) -> String {
    match std::str::from_utf8(pending) {
        Ok(text) => {
            let out = text.to_string();
            pending.clear();
            out
        }
        Err(err) => {
            let valid = err.valid_up_to();
            let incomplete_tail = err.error_len().is_none() && pending.len() - valid < 4;
            let cut = if incomplete_tail { valid } else { pending.len() };
            let out = String::from_utf8_lossy(&pending[..cut]).into_owned();
            pending.drain(..cut);
            out
        }
    }
}

struct PtyProcess {
    pid: Option<u32>,
    master: Mutex<Box<dyn MasterPty + Send>>,
    writer: Mutex<Box<dyn Write + Send>>,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
}

impl ProcessHandle for PtyProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn write(&self, data: &[u8]) -> std::io::Result<()> {
        let mut writer = self.writer.lock();
        writer.write_all(data)?;
        writer.flush()
    }

    fn resize(&self, cols: u16, rows: u16) -> std::io::Result<()> {
        self.master
            .lock()
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| std::io::Error::other(e.to_string()))
    }

    fn kill(&self) -> std::io::Result<()> {
        self.killer.lock().kill()
    }
}
