//! PTY-backed terminal sessions keyed by owner, with bounded output history
//! and push/pull event delivery.

pub mod buffer;
pub mod error;
pub mod events;
pub mod process;
pub mod registry;
pub mod stream;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use buffer::{OutputBuffer, DEFAULT_OUTPUT_CAPACITY};
pub use error::{PtyHostError, Result};
pub use events::{Listener, Subscription, TerminalEvent};
pub use process::{
    ExitInfo, LaunchCommand, PortablePtySpawner, ProcessHandle, ProcessOutput, ProcessSpawner,
    SpawnRequest, SpawnedProcess,
};
pub use registry::{
    EnsureOptions, HistoryMode, OwnerKey, RegistryConfig, SessionRegistry, SessionStatus,
    TerminalSession, DEFAULT_COLS, DEFAULT_ROWS,
};
pub use stream::{event_stream, EventStream};
pub use tokio_util::sync::CancellationToken;
