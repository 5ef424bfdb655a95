use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::buffer::OutputBuffer;
use crate::error::{PtyHostError, Result};
use crate::events::{Listener, Subscription, TerminalEvent};
use crate::process::{
    ExitInfo, LaunchCommand, ProcessHandle, ProcessOutput, ProcessSpawner, SpawnRequest,
};
use crate::stream::EventStream;

pub const DEFAULT_COLS: u16 = 120;
pub const DEFAULT_ROWS: u16 = 32;

/// Identifier a session is registered under (cell id, service id, ...).
pub trait OwnerKey: Clone + Eq + Hash + Display + Send + Sync + 'static {}

impl<T> OwnerKey for T where T: Clone + Eq + Hash + Display + Send + Sync + 'static {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Exited,
}

/// Descriptor of one live or recently exited session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalSession {
    pub session_id: String,
    pub owner_key: String,
    pub pid: Option<u32>,
    pub cwd: PathBuf,
    pub cols: u16,
    pub rows: u16,
    pub status: SessionStatus,
    pub exit_code: Option<u32>,
    /// Unix epoch milliseconds.
    pub started_at: u64,
}

impl TerminalSession {
    pub fn is_running(&self) -> bool {
        self.status == SessionStatus::Running
    }
}

/// What happens to an exited session's output when the owner is ensured again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HistoryMode {
    /// Start a fresh session: new id, empty buffer.
    #[default]
    Discard,
    /// Reattach: keep the session id and accumulated buffer.
    Preserve,
}

#[derive(Debug, Clone, Default)]
pub struct EnsureOptions {
    /// Overrides the registry's launch command for this spawn.
    pub command: Option<LaunchCommand>,
    pub cols: Option<u16>,
    pub rows: Option<u16>,
    pub history: HistoryMode,
}

impl EnsureOptions {
    pub fn with_command(command: LaunchCommand) -> Self {
        Self {
            command: Some(command),
            ..Self::default()
        }
    }

    pub fn preserving_history(mut self) -> Self {
        self.history = HistoryMode::Preserve;
        self
    }

    pub fn with_size(mut self, cols: u16, rows: u16) -> Self {
        self.cols = Some(cols);
        self.rows = Some(rows);
        self
    }
}

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Terminal kind, used in logs ("shell", "setup", ...).
    pub label: String,
    pub launch: LaunchCommand,
    pub buffer_capacity: usize,
    pub cols: u16,
    pub rows: u16,
}

impl RegistryConfig {
    pub fn new(label: impl Into<String>, launch: LaunchCommand) -> Self {
        Self {
            label: label.into(),
            launch,
            buffer_capacity: crate::buffer::DEFAULT_OUTPUT_CAPACITY,
            cols: DEFAULT_COLS,
            rows: DEFAULT_ROWS,
        }
    }

    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    pub fn with_size(mut self, cols: u16, rows: u16) -> Self {
        self.cols = cols;
        self.rows = rows;
        self
    }
}

struct SessionState {
    info: TerminalSession,
    buffer: OutputBuffer,
    process: Option<Arc<dyn ProcessHandle>>,
    /// Bumped whenever the underlying process is replaced or closed so that
    /// stale forwarders stop touching this entry.
    generation: u64,
}

type SessionEntry = Arc<Mutex<SessionState>>;

struct Inner<K: OwnerKey> {
    config: RegistryConfig,
    spawner: Arc<dyn ProcessSpawner>,
    sessions: Mutex<HashMap<K, SessionEntry>>,
    subscribers: Mutex<HashMap<K, Vec<(u64, Listener)>>>,
    owner_locks: Mutex<HashMap<K, Arc<tokio::sync::Mutex<()>>>>,
    next_subscriber_id: AtomicU64,
    next_generation: AtomicU64,
}

/// Owns PTY-backed sessions keyed by owner, at most one live session per key.
///
/// Cloning is cheap and yields a handle to the same registry. Calls for the
/// same owner are serialised; calls for different owners run independently.
pub struct SessionRegistry<K: OwnerKey> {
    inner: Arc<Inner<K>>,
}

impl<K: OwnerKey> Clone for SessionRegistry<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: OwnerKey> SessionRegistry<K> {
    pub fn new(config: RegistryConfig, spawner: Arc<dyn ProcessSpawner>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                spawner,
                sessions: Mutex::new(HashMap::new()),
                subscribers: Mutex::new(HashMap::new()),
                owner_locks: Mutex::new(HashMap::new()),
                next_subscriber_id: AtomicU64::new(1),
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    #[cfg(test)]
    fn owner_lock_count(&self) -> usize {
        self.inner.owner_locks.lock().len()
    }

    pub fn label(&self) -> &str {
        &self.inner.config.label
    }

    pub async fn ensure_session(&self, owner: &K, cwd: &Path) -> Result<TerminalSession> {
        self.ensure_session_with(owner, cwd, EnsureOptions::default())
            .await
    }

    /// Returns the running session for `owner` unchanged, or spawns one.
    ///
    /// An exited session is either replaced outright (`HistoryMode::Discard`)
    /// or reattached to a new process under the same id and buffer
    /// (`HistoryMode::Preserve`).
    pub async fn ensure_session_with(
        &self,
        owner: &K,
        cwd: &Path,
        options: EnsureOptions,
    ) -> Result<TerminalSession> {
        let result = {
            let lock = self.owner_lock(owner);
            let _guard = lock.lock().await;

            let existing = self.entry(owner);
            if let Some(entry) = &existing {
                let state = entry.lock();
                if state.info.is_running() {
                    return Ok(state.info.clone());
                }
            }

            match (existing, options.history) {
                (Some(entry), HistoryMode::Preserve) => {
                    self.respawn_into(owner, entry, cwd, options).await
                }
                (stale, _) => {
                    if let Some(entry) = stale {
                        self.discard_entry(owner, &entry);
                    }
                    self.spawn_fresh(owner, cwd, options).await
                }
            }
        };
        if result.is_err() {
            self.release_owner_lock(owner);
        }
        result
    }

    /// Swaps the owner's underlying process while keeping the session id and
    /// accumulated output. A live process is killed first. Creates a fresh
    /// session when the owner has none.
    pub async fn attach_process(
        &self,
        owner: &K,
        cwd: &Path,
        options: EnsureOptions,
    ) -> Result<TerminalSession> {
        let result = {
            let lock = self.owner_lock(owner);
            let _guard = lock.lock().await;

            match self.entry(owner) {
                Some(entry) => self.respawn_into(owner, entry, cwd, options).await,
                None => self.spawn_fresh(owner, cwd, options).await,
            }
        };
        if result.is_err() {
            self.release_owner_lock(owner);
        }
        result
    }

    pub fn get_session(&self, owner: &K) -> Option<TerminalSession> {
        self.entry(owner).map(|entry| entry.lock().info.clone())
    }

    pub fn list_sessions(&self) -> Vec<TerminalSession> {
        let entries: Vec<SessionEntry> = self.inner.sessions.lock().values().cloned().collect();
        entries.iter().map(|entry| entry.lock().info.clone()).collect()
    }

    pub fn read_output(&self, owner: &K) -> String {
        self.entry(owner)
            .map(|entry| entry.lock().buffer.as_str().to_string())
            .unwrap_or_default()
    }

    /// Registers `listener` for every event of `owner`, across session
    /// re-creation, until unsubscribed.
    pub fn subscribe(
        &self,
        owner: &K,
        listener: impl Fn(&TerminalEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.inner.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .lock()
            .entry(owner.clone())
            .or_default()
            .push((id, Arc::new(listener)));

        let inner = Arc::downgrade(&self.inner);
        let owner = owner.clone();
        Subscription::new(move || {
            let Some(inner) = inner.upgrade() else {
                return;
            };
            let mut subscribers = inner.subscribers.lock();
            if let Some(list) = subscribers.get_mut(&owner) {
                list.retain(|(existing, _)| *existing != id);
                if list.is_empty() {
                    subscribers.remove(&owner);
                }
            }
        })
    }

    /// Pull-based view of `owner`'s events that ends when `cancel` fires.
    pub fn event_stream(&self, owner: &K, cancel: CancellationToken) -> EventStream {
        let registry = self.clone();
        let owner = owner.clone();
        EventStream::new(
            move |listener| registry.subscribe(&owner, move |event| listener(event)),
            cancel,
        )
    }

    pub fn write(&self, owner: &K, data: &[u8]) -> Result<()> {
        let process = self.live_process(owner)?;
        process.write(data).map_err(|source| PtyHostError::Io {
            owner: owner.to_string(),
            source,
        })
    }

    pub fn resize(&self, owner: &K, cols: u16, rows: u16) -> Result<()> {
        let entry = self
            .entry(owner)
            .ok_or_else(|| PtyHostError::not_running(owner))?;
        let process = {
            let mut state = entry.lock();
            let process = match (&state.process, state.info.is_running()) {
                (Some(process), true) => Arc::clone(process),
                _ => return Err(PtyHostError::not_running(owner)),
            };
            state.info.cols = cols;
            state.info.rows = rows;
            process
        };
        process.resize(cols, rows).map_err(|source| PtyHostError::Io {
            owner: owner.to_string(),
            source,
        })
    }

    /// Terminates the owner's process, ignoring errors from processes that
    /// already exited, and forgets the session.
    pub async fn close_session(&self, owner: &K) -> bool {
        let closed = {
            let lock = self.owner_lock(owner);
            let _guard = lock.lock().await;

            let removed = self.inner.sessions.lock().remove(owner);
            match removed {
                Some(entry) => {
                    self.retire(owner, &entry);
                    tracing::info!(owner = %owner, kind = %self.label(), "closed terminal session");
                    true
                }
                None => false,
            }
        };
        self.release_owner_lock(owner);
        closed
    }

    pub async fn stop_all(&self) -> usize {
        let owners: Vec<K> = self.inner.sessions.lock().keys().cloned().collect();
        let mut closed = 0;
        for owner in owners {
            if self.close_session(&owner).await {
                closed += 1;
            }
        }
        closed
    }

    /// Synchronous variant of `stop_all` for shutdown paths that cannot await.
    pub fn kill_all(&self) -> usize {
        let drained: Vec<(K, SessionEntry)> = self.inner.sessions.lock().drain().collect();
        let count = drained.len();
        for (owner, entry) in drained {
            self.retire(&owner, &entry);
        }
        self.inner
            .owner_locks
            .lock()
            .retain(|_, lock| Arc::strong_count(lock) > 1);
        count
    }

    fn entry(&self, owner: &K) -> Option<SessionEntry> {
        self.inner.sessions.lock().get(owner).cloned()
    }

    fn owner_lock(&self, owner: &K) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(
            self.inner
                .owner_locks
                .lock()
                .entry(owner.clone())
                .or_default(),
        )
    }

    /// Drops the owner's lock once no session and no caller refers to it.
    /// Callers must not hold their clone of the lock.
    fn release_owner_lock(&self, owner: &K) {
        let mut locks = self.inner.owner_locks.lock();
        let idle = locks
            .get(owner)
            .is_some_and(|lock| Arc::strong_count(lock) == 1);
        if idle && !self.inner.sessions.lock().contains_key(owner) {
            locks.remove(owner);
        }
    }

    fn live_process(&self, owner: &K) -> Result<Arc<dyn ProcessHandle>> {
        let entry = self
            .entry(owner)
            .ok_or_else(|| PtyHostError::not_running(owner))?;
        let state = entry.lock();
        match (&state.process, state.info.is_running()) {
            (Some(process), true) => Ok(Arc::clone(process)),
            _ => Err(PtyHostError::not_running(owner)),
        }
    }

    fn discard_entry(&self, owner: &K, entry: &SessionEntry) {
        let mut sessions = self.inner.sessions.lock();
        if sessions
            .get(owner)
            .is_some_and(|current| Arc::ptr_eq(current, entry))
        {
            sessions.remove(owner);
        }
        drop(sessions);
        self.retire(owner, entry);
    }

    fn retire(&self, owner: &K, entry: &SessionEntry) {
        let process = {
            let mut state = entry.lock();
            state.generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
            state.process.take()
        };
        if let Some(process) = process {
            if let Err(err) = process.kill() {
                tracing::debug!(owner = %owner, error = %err, "kill failed; process likely already exited");
            }
        }
    }

    async fn spawn_process(
        &self,
        owner: &K,
        cwd: &Path,
        options: &EnsureOptions,
    ) -> Result<(crate::process::SpawnedProcess, u16, u16)> {
        let cols = options.cols.unwrap_or(self.inner.config.cols);
        let rows = options.rows.unwrap_or(self.inner.config.rows);
        let request = SpawnRequest {
            owner: owner.to_string(),
            command: options
                .command
                .clone()
                .unwrap_or_else(|| self.inner.config.launch.clone()),
            cwd: cwd.to_path_buf(),
            cols,
            rows,
        };

        let spawner = Arc::clone(&self.inner.spawner);
        let spawned = tokio::task::spawn_blocking(move || spawner.spawn(&request))
            .await
            .map_err(|e| PtyHostError::Spawn {
                owner: owner.to_string(),
                message: format!("spawn task failed: {e}"),
            })??;
        Ok((spawned, cols, rows))
    }

    async fn spawn_fresh(
        &self,
        owner: &K,
        cwd: &Path,
        options: EnsureOptions,
    ) -> Result<TerminalSession> {
        let (spawned, cols, rows) = self.spawn_process(owner, cwd, &options).await?;
        let process: Arc<dyn ProcessHandle> = Arc::from(spawned.handle);
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);

        let info = TerminalSession {
            session_id: Uuid::new_v4().to_string(),
            owner_key: owner.to_string(),
            pid: process.pid(),
            cwd: cwd.to_path_buf(),
            cols,
            rows,
            status: SessionStatus::Running,
            exit_code: None,
            started_at: now_millis(),
        };
        let entry = Arc::new(Mutex::new(SessionState {
            info: info.clone(),
            buffer: OutputBuffer::new(self.inner.config.buffer_capacity),
            process: Some(process),
            generation,
        }));

        self.inner
            .sessions
            .lock()
            .insert(owner.clone(), Arc::clone(&entry));
        self.forward_output(owner.clone(), entry, generation, spawned.output);

        tracing::info!(
            owner = %owner,
            kind = %self.label(),
            session_id = %info.session_id,
            pid = ?info.pid,
            "started terminal session"
        );
        Ok(info)
    }

    async fn respawn_into(
        &self,
        owner: &K,
        entry: SessionEntry,
        cwd: &Path,
        options: EnsureOptions,
    ) -> Result<TerminalSession> {
        self.retire(owner, &entry);
        let (spawned, cols, rows) = match self.spawn_process(owner, cwd, &options).await {
            Ok(spawned) => spawned,
            Err(err) => {
                self.mark_spawn_failed(owner, &entry, &err);
                return Err(err);
            }
        };
        let process: Arc<dyn ProcessHandle> = Arc::from(spawned.handle);
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);

        let info = {
            let mut state = entry.lock();
            state.generation = generation;
            state.info.pid = process.pid();
            state.info.cwd = cwd.to_path_buf();
            state.info.cols = cols;
            state.info.rows = rows;
            state.info.status = SessionStatus::Running;
            state.info.exit_code = None;
            state.info.started_at = now_millis();
            state.process = Some(process);
            state.info.clone()
        };

        // The entry may have been closed while we were spawning.
        self.inner
            .sessions
            .lock()
            .insert(owner.clone(), Arc::clone(&entry));
        self.forward_output(owner.clone(), entry, generation, spawned.output);

        tracing::info!(
            owner = %owner,
            kind = %self.label(),
            session_id = %info.session_id,
            pid = ?info.pid,
            "reattached terminal session"
        );
        Ok(info)
    }

    /// The retired process is gone and nothing replaced it: the session is
    /// exited from here on, so the next ensure spawns again.
    fn mark_spawn_failed(&self, owner: &K, entry: &SessionEntry, err: &PtyHostError) {
        let was_running = {
            let mut state = entry.lock();
            let was_running = state.info.is_running();
            state.info.status = SessionStatus::Exited;
            state.process = None;
            was_running
        };
        tracing::warn!(owner = %owner, kind = %self.label(), error = %err, "respawn failed; session marked exited");
        if was_running {
            dispatch(
                &self.inner,
                owner,
                &TerminalEvent::Exit {
                    exit_code: None,
                    signal: None,
                },
            );
        }
    }

    fn forward_output(
        &self,
        owner: K,
        entry: SessionEntry,
        generation: u64,
        mut output: mpsc::UnboundedReceiver<ProcessOutput>,
    ) {
        let inner = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while let Some(item) = output.recv().await {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                let event = match item {
                    ProcessOutput::Data(chunk) => {
                        let mut state = entry.lock();
                        if state.generation != generation || !state.info.is_running() {
                            continue;
                        }
                        state.buffer.push(&chunk);
                        TerminalEvent::Data { chunk }
                    }
                    ProcessOutput::Exit(info) => match record_exit(&entry, generation, &info) {
                        Some(event) => event,
                        None => continue,
                    },
                };
                // Dispatch before releasing the next item keeps per-owner FIFO.
                dispatch(&inner, &owner, &event);
            }
        });
    }
}

fn record_exit(entry: &SessionEntry, generation: u64, exit: &ExitInfo) -> Option<TerminalEvent> {
    let mut state = entry.lock();
    if state.generation != generation {
        return None;
    }
    if !state.info.is_running() {
        if exit.exit_code.is_some() {
            state.info.exit_code = exit.exit_code;
        }
        return None;
    }
    state.info.status = SessionStatus::Exited;
    state.info.exit_code = exit.exit_code;
    state.process = None;
    tracing::info!(
        owner = %state.info.owner_key,
        session_id = %state.info.session_id,
        exit_code = ?exit.exit_code,
        "terminal process exited"
    );
    Some(TerminalEvent::Exit {
        exit_code: exit.exit_code,
        signal: exit.signal.clone(),
    })
}

fn dispatch<K: OwnerKey>(inner: &Inner<K>, owner: &K, event: &TerminalEvent) {
    let listeners: Vec<Listener> = inner
        .subscribers
        .lock()
        .get(owner)
        .map(|list| list.iter().map(|(_, l)| Arc::clone(l)).collect())
        .unwrap_or_default();
    for listener in listeners {
        listener(event);
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeSpawner;
    use std::sync::atomic::AtomicUsize;

    fn registry(spawner: &FakeSpawner, capacity: usize) -> SessionRegistry<String> {
        SessionRegistry::new(
            RegistryConfig::new("shell", LaunchCommand::new("/bin/sh"))
                .with_buffer_capacity(capacity),
            Arc::new(spawner.clone()),
        )
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn ensure_returns_same_session_while_running() {
        let spawner = FakeSpawner::new();
        let registry = registry(&spawner, 1024);
        let owner = "cell-1".to_string();

        let first = registry.ensure_session(&owner, Path::new("/tmp")).await.unwrap();
        let second = registry.ensure_session(&owner, Path::new("/tmp")).await.unwrap();

        assert_eq!(first.session_id, second.session_id);
        assert_eq!(spawner.spawn_count(), 1);
    }

    #[tokio::test]
    async fn exited_session_is_replaced_with_empty_buffer() {
        let spawner = FakeSpawner::new();
        let registry = registry(&spawner, 1024);
        let owner = "cell-1".to_string();

        let first = registry.ensure_session(&owner, Path::new("/tmp")).await.unwrap();
        let process = spawner.last_process().unwrap();
        process.emit("hello");
        process.exit(Some(0));
        settle().await;

        let exited = registry.get_session(&owner).unwrap();
        assert_eq!(exited.status, SessionStatus::Exited);
        assert_eq!(exited.exit_code, Some(0));
        assert_eq!(registry.read_output(&owner), "hello");

        let second = registry.ensure_session(&owner, Path::new("/tmp")).await.unwrap();
        assert_ne!(first.session_id, second.session_id);
        assert_eq!(registry.read_output(&owner), "");
        assert!(second.is_running());
    }

    #[tokio::test]
    async fn preserve_history_reattaches_under_same_id() {
        let spawner = FakeSpawner::new();
        let registry = registry(&spawner, 1024);
        let owner = "cell-1".to_string();

        let first = registry.ensure_session(&owner, Path::new("/tmp")).await.unwrap();
        let process = spawner.last_process().unwrap();
        process.emit("attempt 1 failed\n");
        process.exit(Some(1));
        settle().await;

        let retried = registry
            .ensure_session_with(&owner, Path::new("/tmp"), EnsureOptions::default().preserving_history())
            .await
            .unwrap();
        assert_eq!(first.session_id, retried.session_id);
        assert!(retried.is_running());
        assert_eq!(retried.exit_code, None);

        spawner.last_process().unwrap().emit("attempt 2\n");
        settle().await;
        assert_eq!(registry.read_output(&owner), "attempt 1 failed\nattempt 2\n");
    }

    #[tokio::test]
    async fn attach_process_kills_live_process_and_keeps_buffer() {
        let spawner = FakeSpawner::new();
        let registry = registry(&spawner, 1024);
        let owner = "svc-1".to_string();

        let first = registry.ensure_session(&owner, Path::new("/tmp")).await.unwrap();
        let old = spawner.last_process().unwrap();
        old.emit("one ");
        settle().await;

        let swapped = registry
            .attach_process(&owner, Path::new("/tmp"), EnsureOptions::default())
            .await
            .unwrap();
        assert_eq!(first.session_id, swapped.session_id);
        assert!(old.was_killed());

        // Late output and exit from the replaced process are ignored.
        old.emit("stale");
        old.exit(Some(137));
        spawner.last_process().unwrap().emit("two");
        settle().await;

        assert_eq!(registry.read_output(&owner), "one two");
        assert!(registry.get_session(&owner).unwrap().is_running());
    }

    #[tokio::test]
    async fn buffer_keeps_latest_window() {
        let spawner = FakeSpawner::new();
        let registry = registry(&spawner, 5);
        let owner = "cell-1".to_string();

        registry.ensure_session(&owner, Path::new("/tmp")).await.unwrap();
        let process = spawner.last_process().unwrap();
        process.emit("abc");
        process.emit("defgh");
        settle().await;

        assert_eq!(registry.read_output(&owner), "defgh");
    }

    #[tokio::test]
    async fn write_after_exit_is_not_running() {
        let spawner = FakeSpawner::new();
        let registry = registry(&spawner, 64);
        let owner = "cell-1".to_string();

        registry.ensure_session(&owner, Path::new("/tmp")).await.unwrap();
        registry.write(&owner, b"ls\n").unwrap();
        assert_eq!(spawner.last_process().unwrap().written(), b"ls\n".to_vec());

        spawner.last_process().unwrap().exit(Some(0));
        settle().await;

        let err = registry.write(&owner, b"pwd\n").unwrap_err();
        assert!(err.is_not_running());
        let err = registry.resize(&owner, 100, 40).unwrap_err();
        assert!(err.is_not_running());
        assert!(registry.write(&"unknown".to_string(), b"x").unwrap_err().is_not_running());
    }

    #[tokio::test]
    async fn resize_updates_geometry() {
        let spawner = FakeSpawner::new();
        let registry = registry(&spawner, 64);
        let owner = "cell-1".to_string();

        registry.ensure_session(&owner, Path::new("/tmp")).await.unwrap();
        registry.resize(&owner, 200, 50).unwrap();

        let session = registry.get_session(&owner).unwrap();
        assert_eq!((session.cols, session.rows), (200, 50));
        assert_eq!(spawner.last_process().unwrap().size(), (200, 50));
    }

    #[tokio::test]
    async fn subscribers_receive_events_in_order_and_exit_once() {
        let spawner = FakeSpawner::new();
        let registry = registry(&spawner, 64);
        let owner = "cell-1".to_string();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let subscription = registry.subscribe(&owner, move |event| sink.lock().push(event.clone()));
        let other_count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&other_count);
        let _other = registry.subscribe(&owner, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        registry.ensure_session(&owner, Path::new("/tmp")).await.unwrap();
        let process = spawner.last_process().unwrap();
        process.emit("a");
        process.emit("b");
        process.exit(Some(3));
        process.exit(Some(4));
        settle().await;

        let events = seen.lock().clone();
        assert_eq!(
            events,
            vec![
                TerminalEvent::Data { chunk: "a".into() },
                TerminalEvent::Data { chunk: "b".into() },
                TerminalEvent::Exit {
                    exit_code: Some(3),
                    signal: None
                },
            ]
        );
        assert_eq!(other_count.load(Ordering::SeqCst), 3);
        // A second exit notification only refreshes the code.
        assert_eq!(registry.get_session(&owner).unwrap().exit_code, Some(4));

        subscription.unsubscribe();
        subscription.unsubscribe();
        registry.ensure_session(&owner, Path::new("/tmp")).await.unwrap();
        spawner.last_process().unwrap().emit("after");
        settle().await;
        assert_eq!(seen.lock().len(), 3);
        assert_eq!(other_count.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn close_session_kills_and_removes() {
        let spawner = FakeSpawner::new();
        let registry = registry(&spawner, 64);
        let owner = "cell-1".to_string();

        registry.ensure_session(&owner, Path::new("/tmp")).await.unwrap();
        let process = spawner.last_process().unwrap();
        process.fail_kill();

        assert!(registry.close_session(&owner).await);
        assert!(process.was_killed());
        assert!(registry.get_session(&owner).is_none());
        assert_eq!(registry.read_output(&owner), "");
        assert!(!registry.close_session(&owner).await);
    }

    #[tokio::test]
    async fn stop_all_closes_every_owner() {
        let spawner = FakeSpawner::new();
        let registry = registry(&spawner, 64);

        for owner in ["a", "b", "c"] {
            registry
                .ensure_session(&owner.to_string(), Path::new("/tmp"))
                .await
                .unwrap();
        }

        assert_eq!(registry.stop_all().await, 3);
        assert!(registry.list_sessions().is_empty());
        assert!(spawner.processes().iter().all(|p| p.was_killed()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_ensure_for_same_owner_spawns_once() {
        let spawner = FakeSpawner::new();
        let registry = registry(&spawner, 64);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry
                    .ensure_session(&"cell-1".to_string(), Path::new("/tmp"))
                    .await
                    .unwrap()
                    .session_id
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(spawner.spawn_count(), 1);
    }

    #[tokio::test]
    async fn failed_reattach_marks_session_exited() {
        let spawner = FakeSpawner::new();
        let registry = registry(&spawner, 64);
        let owner = "cell-1".to_string();

        let first = registry.ensure_session(&owner, Path::new("/tmp")).await.unwrap();
        let old = spawner.last_process().unwrap();
        old.emit("build log\n");
        settle().await;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _subscription = registry.subscribe(&owner, move |event| sink.lock().push(event.clone()));

        spawner.fail_next_spawn("pty exhausted");
        let err = registry
            .attach_process(&owner, Path::new("/tmp"), EnsureOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("pty exhausted"));
        assert!(old.was_killed());

        let session = registry.get_session(&owner).unwrap();
        assert_eq!(session.status, SessionStatus::Exited);
        assert!(registry.write(&owner, b"ls\n").unwrap_err().is_not_running());
        assert_eq!(
            seen.lock().clone(),
            vec![TerminalEvent::Exit {
                exit_code: None,
                signal: None
            }]
        );

        let retried = registry
            .ensure_session_with(&owner, Path::new("/tmp"), EnsureOptions::default().preserving_history())
            .await
            .unwrap();
        assert_eq!(retried.session_id, first.session_id);
        assert!(retried.is_running());
        assert_eq!(spawner.spawn_count(), 2);
        assert_eq!(registry.read_output(&owner), "build log\n");
        registry.write(&owner, b"pwd\n").unwrap();
    }

    #[tokio::test]
    async fn owner_locks_are_released_with_their_sessions() {
        let spawner = FakeSpawner::new();
        let registry = registry(&spawner, 64);

        for round in 0..200 {
            let owner = format!("svc-{round}");
            registry.ensure_session(&owner, Path::new("/tmp")).await.unwrap();
            assert!(registry.close_session(&owner).await);
        }
        assert!(registry.list_sessions().is_empty());
        assert_eq!(registry.owner_lock_count(), 0);

        spawner.fail_next_spawn("no shell");
        assert!(registry
            .ensure_session(&"broken".to_string(), Path::new("/tmp"))
            .await
            .is_err());
        assert_eq!(registry.owner_lock_count(), 0);

        for owner in ["a", "b"] {
            registry
                .ensure_session(&owner.to_string(), Path::new("/tmp"))
                .await
                .unwrap();
        }
        assert_eq!(registry.owner_lock_count(), 2);
        assert_eq!(registry.kill_all(), 2);
        assert_eq!(registry.owner_lock_count(), 0);
    }

    #[tokio::test]
    async fn spawn_failure_leaves_no_entry() {
        let spawner = FakeSpawner::new();
        spawner.fail_next_spawn("no shell");
        let registry = registry(&spawner, 64);
        let owner = "cell-1".to_string();

        let err = registry
            .ensure_session(&owner, Path::new("/tmp"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no shell"));
        assert!(registry.get_session(&owner).is_none());
    }
}
