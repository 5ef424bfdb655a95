//! Scripted in-memory spawner for exercising registries without a real PTY.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

use crate::error::{PtyHostError, Result};
use crate::process::{
    ExitInfo, ProcessHandle, ProcessOutput, ProcessSpawner, SpawnRequest, SpawnedProcess,
};

const FIRST_FAKE_PID: u32 = 40_000;

#[derive(Default)]
struct SpawnerState {
    processes: Vec<FakeProcess>,
    fail_next: Option<String>,
}

/// Records every spawn request and hands out [`FakeProcess`] handles whose
/// output the test drives by hand.
#[derive(Clone, Default)]
pub struct FakeSpawner {
    state: Arc<Mutex<SpawnerState>>,
}

impl FakeSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_spawn(&self, message: impl Into<String>) {
        self.state.lock().fail_next = Some(message.into());
    }

    pub fn spawn_count(&self) -> usize {
        self.state.lock().processes.len()
    }

    pub fn processes(&self) -> Vec<FakeProcess> {
        self.state.lock().processes.clone()
    }

    pub fn last_process(&self) -> Option<FakeProcess> {
        self.state.lock().processes.last().cloned()
    }
}

impl ProcessSpawner for FakeSpawner {
    fn spawn(&self, request: &SpawnRequest) -> Result<SpawnedProcess> {
        let mut state = self.state.lock();
        if let Some(message) = state.fail_next.take() {
            return Err(PtyHostError::Spawn {
                owner: request.owner.clone(),
                message,
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let process = FakeProcess {
            inner: Arc::new(FakeProcessInner {
                pid: FIRST_FAKE_PID + state.processes.len() as u32,
                request: request.clone(),
                tx,
                written: Mutex::new(Vec::new()),
                size: Mutex::new((request.cols, request.rows)),
                killed: AtomicBool::new(false),
                exited: AtomicBool::new(false),
                fail_kill: AtomicBool::new(false),
            }),
        };
        state.processes.push(process.clone());

        Ok(SpawnedProcess {
            handle: Box::new(process),
            output: rx,
        })
    }
}

struct FakeProcessInner {
    pid: u32,
    request: SpawnRequest,
    tx: mpsc::UnboundedSender<ProcessOutput>,
    written: Mutex<Vec<u8>>,
    size: Mutex<(u16, u16)>,
    killed: AtomicBool,
    exited: AtomicBool,
    fail_kill: AtomicBool,
}

#[derive(Clone)]
pub struct FakeProcess {
    inner: Arc<FakeProcessInner>,
}

impl FakeProcess {
    pub fn request(&self) -> &SpawnRequest {
        &self.inner.request
    }

    pub fn emit(&self, chunk: &str) {
        let _ = self.inner.tx.send(ProcessOutput::Data(chunk.to_string()));
    }

    pub fn exit(&self, exit_code: Option<u32>) {
        self.inner.exited.store(true, Ordering::SeqCst);
        let _ = self.inner.tx.send(ProcessOutput::Exit(ExitInfo {
            exit_code,
            signal: None,
        }));
    }

    pub fn written(&self) -> Vec<u8> {
        self.inner.written.lock().clone()
    }

    pub fn size(&self) -> (u16, u16) {
        *self.inner.size.lock()
    }

    pub fn was_killed(&self) -> bool {
        self.inner.killed.load(Ordering::SeqCst)
    }

    /// Makes `kill` report an error, as for a process that already exited.
    pub fn fail_kill(&self) {
        self.inner.fail_kill.store(true, Ordering::SeqCst);
    }
}

impl ProcessHandle for FakeProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.inner.pid)
    }

    fn write(&self, data: &[u8]) -> std::io::Result<()> {
        self.inner.written.lock().extend_from_slice(data);
        Ok(())
    }

    fn resize(&self, cols: u16, rows: u16) -> std::io::Result<()> {
        *self.inner.size.lock() = (cols, rows);
        Ok(())
    }

    fn kill(&self) -> std::io::Result<()> {
        self.inner.killed.store(true, Ordering::SeqCst);
        if self.inner.fail_kill.load(Ordering::SeqCst) {
            return Err(std::io::Error::other("no such process"));
        }
        if !self.inner.exited.swap(true, Ordering::SeqCst) {
            let _ = self.inner.tx.send(ProcessOutput::Exit(ExitInfo {
                exit_code: None,
                signal: Some("SIGKILL".to_string()),
            }));
        }
        Ok(())
    }
}
