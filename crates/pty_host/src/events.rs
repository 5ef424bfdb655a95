use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;

/// Output or exit notification for one owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TerminalEvent {
    Data {
        chunk: String,
    },
    #[serde(rename_all = "camelCase")]
    Exit {
        exit_code: Option<u32>,
        signal: Option<String>,
    },
}

impl TerminalEvent {
    pub fn is_exit(&self) -> bool {
        matches!(self, Self::Exit { .. })
    }
}

pub type Listener = Arc<dyn Fn(&TerminalEvent) + Send + Sync>;

type Unsubscribe = Box<dyn FnOnce() + Send>;

/// Handle returned by `subscribe`. Unsubscribing is idempotent and may be
/// triggered from any clone, concurrently with in-flight delivery.
///
/// Dropping the handle does not unsubscribe.
#[derive(Clone)]
pub struct Subscription {
    inner: Arc<Mutex<Option<Unsubscribe>>>,
}

impl Subscription {
    pub fn new(unsubscribe: impl FnOnce() + Send + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(Box::new(unsubscribe)))),
        }
    }

    pub fn unsubscribe(&self) {
        let action = self.inner.lock().take();
        if let Some(action) = action {
            action();
        }
    }

    pub fn is_active(&self) -> bool {
        self.inner.lock().is_some()
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}
