use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::domains::cells::CellStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellEvent {
    CellStatusChanged,
    CellRemoved,
}

impl CellEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            CellEvent::CellStatusChanged => "cellyard:cell-status-changed",
            CellEvent::CellRemoved => "cellyard:cell-removed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellStatusChange {
    pub cell_id: String,
    pub workspace_id: String,
    pub status: CellStatus,
    pub last_setup_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellRemovedPayload {
    pub cell_id: String,
    pub workspace_id: String,
}

/// Named payload handed to observers such as an SSE layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmittedEvent {
    pub name: &'static str,
    pub payload: serde_json::Value,
}

/// Fire-and-forget sink for cell status changes.
pub trait StatusNotifier: Send + Sync {
    fn notify_status(&self, change: CellStatusChange);

    fn cell_removed(&self, _cell_id: &str, _workspace_id: &str) {}
}

/// Fans status changes out to every current subscriber.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<EmittedEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EmittedEvent> {
        self.sender.subscribe()
    }

    fn emit<T: Serialize>(&self, event: CellEvent, payload: &T) {
        let payload = match serde_json::to_value(payload) {
            Ok(value) => value,
            Err(e) => {
                log::warn!("Failed to serialize {} payload: {e}", event.as_str());
                return;
            }
        };
        // No receivers is fine: nobody is watching.
        let _ = self.sender.send(EmittedEvent {
            name: event.as_str(),
            payload,
        });
    }
}

impl StatusNotifier for BroadcastNotifier {
    fn notify_status(&self, change: CellStatusChange) {
        self.emit(CellEvent::CellStatusChanged, &change);
    }

    fn cell_removed(&self, cell_id: &str, workspace_id: &str) {
        self.emit(
            CellEvent::CellRemoved,
            &CellRemovedPayload {
                cell_id: cell_id.to_string(),
                workspace_id: workspace_id.to_string(),
            },
        );
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl StatusNotifier for LogNotifier {
    fn notify_status(&self, change: CellStatusChange) {
        match &change.last_setup_error {
            Some(err) => log::info!(
                "Cell {} is now {} (last setup error: {err})",
                change.cell_id,
                change.status
            ),
            None => log::info!("Cell {} is now {}", change.cell_id, change.status),
        }
    }

    fn cell_removed(&self, cell_id: &str, _workspace_id: &str) {
        log::info!("Cell {cell_id} removed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_delivers_named_payloads() {
        let notifier = BroadcastNotifier::new(8);
        let mut rx = notifier.subscribe();

        notifier.notify_status(CellStatusChange {
            cell_id: "c1".into(),
            workspace_id: "w1".into(),
            status: CellStatus::Deleting,
            last_setup_error: None,
        });
        notifier.cell_removed("c1", "w1");

        let first = rx.recv().await.unwrap();
        assert_eq!(first.name, "cellyard:cell-status-changed");
        assert_eq!(first.payload["status"], "deleting");
        assert_eq!(first.payload["cellId"], "c1");

        let second = rx.recv().await.unwrap();
        assert_eq!(second.name, CellEvent::CellRemoved.as_str());
    }

    #[test]
    fn broadcast_without_receivers_is_silent() {
        let notifier = BroadcastNotifier::new(1);
        notifier.cell_removed("c1", "w1");
    }
}
