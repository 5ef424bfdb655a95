use anyhow::{Result, anyhow};
use futures::StreamExt;
use pty_host::{CancellationToken, TerminalEvent};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use super::timeout::run_with_timeout;
use crate::domains::cells::{Cell, CellStatus, CellStore};
use crate::domains::terminal::{CellId, TerminalHub};
use crate::domains::timing::{TimingRecorder, TimingStatus, TimingStore, TimingWorkflow};
use crate::errors::CellyardError;
use crate::events::{CellStatusChange, StatusNotifier};

pub const RUN_SETUP_SCRIPT: &str = "run_setup_script";
pub const DEFAULT_SETUP_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupOutcome {
    pub run_id: String,
    pub cell_id: String,
    pub session_id: Option<String>,
    pub status: CellStatus,
    pub exit_code: Option<u32>,
    pub error: Option<String>,
}

/// Runs a cell's setup script in its setup terminal and moves the cell to
/// `ready` or `error` depending on how the script exits.
pub struct CellSetupLifecycle {
    cells: Arc<dyn CellStore>,
    timings: Arc<dyn TimingStore>,
    hub: TerminalHub,
    notifier: Arc<dyn StatusNotifier>,
    timeout: Duration,
}

impl CellSetupLifecycle {
    pub fn new(
        cells: Arc<dyn CellStore>,
        timings: Arc<dyn TimingStore>,
        hub: TerminalHub,
        notifier: Arc<dyn StatusNotifier>,
    ) -> Self {
        Self {
            cells,
            timings,
            hub,
            notifier,
            timeout: DEFAULT_SETUP_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// A failing script is reported in the outcome; only store errors are returned.
    pub async fn run_setup(&self, cell_id: &str, script: &str, attempt: u32) -> Result<SetupOutcome> {
        let cell = self
            .cells
            .get_cell(cell_id)
            .await?
            .ok_or_else(|| CellyardError::CellNotFound {
                cell_id: cell_id.to_string(),
            })?;

        self.cells
            .update_cell_status(cell_id, CellStatus::Spawning)
            .await?;
        self.notify(&cell, CellStatus::Spawning, cell.last_setup_error.clone());

        let recorder = TimingRecorder::new(
            self.timings.clone(),
            cell_id,
            Some(cell.workspace_id.clone()),
            TimingWorkflow::Create,
        )
        .with_attempt(attempt);

        let result = recorder
            .time_step(
                RUN_SETUP_SCRIPT,
                run_with_timeout(RUN_SETUP_SCRIPT, self.timeout, self.run_script(&cell, script)),
            )
            .await;

        let (status, exit_code, error) = match result {
            Ok(code) => (CellStatus::Ready, code, None),
            Err(err) => (CellStatus::Error, None, Some(format!("{err:#}"))),
        };

        self.cells.update_cell_status(cell_id, status).await?;
        self.cells
            .record_setup_error(cell_id, error.as_deref())
            .await?;

        let total_status = if error.is_some() {
            TimingStatus::Error
        } else {
            TimingStatus::Ok
        };
        recorder.record_total(total_status, error.as_deref()).await;
        self.notify(&cell, status, error.clone());

        match &error {
            Some(e) => log::warn!("Setup for cell {cell_id} failed on attempt {attempt}: {e}"),
            None => log::info!("Setup for cell {cell_id} finished"),
        }

        Ok(SetupOutcome {
            run_id: recorder.run_id().to_string(),
            cell_id: cell_id.to_string(),
            session_id: self
                .hub
                .setup()
                .get_session(&CellId::new(cell_id))
                .map(|s| s.session_id),
            status,
            exit_code,
            error,
        })
    }

    /// Resolves with the exit code once the script exits successfully.
    async fn run_script(&self, cell: &Cell, script: &str) -> Result<Option<u32>> {
        let owner = CellId::new(cell.id.clone());
        let cancel = CancellationToken::new();
        // Subscribe before spawning so a fast exit is not missed.
        let mut events = self.hub.setup().event_stream(&owner, cancel.clone());
        let _stop = cancel.drop_guard();

        self.hub
            .run_setup(&owner, &cell.workspace_path, script)
            .await?;

        while let Some(event) = events.next().await {
            if let TerminalEvent::Exit { exit_code, signal } = event {
                return match (exit_code, signal) {
                    (Some(0), _) => Ok(Some(0)),
                    (_, Some(signal)) => Err(anyhow!("setup script killed by {signal}")),
                    (Some(code), None) => Err(anyhow!("setup script exited with code {code}")),
                    (None, None) => Err(anyhow!("setup script exited without a status")),
                };
            }
        }
        Err(anyhow!("setup terminal closed before the script exited"))
    }

    fn notify(&self, cell: &Cell, status: CellStatus, last_setup_error: Option<String>) {
        self.notifier.notify_status(CellStatusChange {
            cell_id: cell.id.clone(),
            workspace_id: cell.workspace_id.clone(),
            status,
            last_setup_error,
        });
    }
}
