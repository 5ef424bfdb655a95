use anyhow::Result;
use serde::Serialize;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::steps::{LifecycleStep, StepMetadata, StepOutcome, StepRunner};
use crate::config::DeletionSettings;
use crate::domains::agents::AgentSessionClient;
use crate::domains::cells::{Cell, CellStatus, CellStore};
use crate::domains::services::ServiceSupervisor;
use crate::domains::terminal::CellTerminals;
use crate::domains::timing::{TimingRecorder, TimingStatus, TimingStore, TimingWorkflow};
use crate::domains::workspace::WorktreeManager;
use crate::errors::CellyardError;
use crate::events::{CellStatusChange, StatusNotifier};

pub const CLOSE_AGENT_SESSION: &str = "close_agent_session";
pub const CLOSE_TERMINAL_SESSIONS: &str = "close_terminal_sessions";
pub const STOP_SERVICES: &str = "stop_services";
pub const REMOVE_WORKSPACE: &str = "remove_workspace";
pub const DELETE_CELL_RECORD: &str = "delete_cell_record";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeletionTimeouts {
    pub close_agent_session: Duration,
    pub close_terminal_sessions: Duration,
    pub stop_services: Duration,
    pub remove_workspace: Duration,
    pub delete_cell_record: Duration,
}

impl Default for DeletionTimeouts {
    fn default() -> Self {
        Self::from(&DeletionSettings::default())
    }
}

impl From<&DeletionSettings> for DeletionTimeouts {
    fn from(settings: &DeletionSettings) -> Self {
        Self {
            close_agent_session: Duration::from_millis(settings.close_agent_session_ms),
            close_terminal_sessions: Duration::from_millis(settings.close_terminal_sessions_ms),
            stop_services: Duration::from_millis(settings.stop_services_ms),
            remove_workspace: Duration::from_millis(settings.remove_workspace_ms),
            delete_cell_record: Duration::from_millis(settings.delete_cell_record_ms),
        }
    }
}

/// Result of one successful deletion run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletionReport {
    pub run_id: String,
    pub cell_id: String,
    pub steps: Vec<StepOutcome>,
    pub status: TimingStatus,
    pub total_duration_ms: u64,
}

impl DeletionReport {
    pub fn failed_steps(&self) -> impl Iterator<Item = &StepOutcome> {
        self.steps.iter().filter(|s| s.status == TimingStatus::Error)
    }
}

/// Everything cell teardown talks to.
#[derive(Clone)]
pub struct DeletionCollaborators {
    pub cells: Arc<dyn CellStore>,
    pub timings: Arc<dyn TimingStore>,
    pub agents: Arc<dyn AgentSessionClient>,
    pub terminals: Arc<dyn CellTerminals>,
    pub services: Arc<dyn ServiceSupervisor>,
    pub worktrees: Arc<dyn WorktreeManager>,
    pub notifier: Arc<dyn StatusNotifier>,
}

/// Tears a cell down step by step, recording each step's timing.
///
/// Only removing the record itself is fatal. When it fails the cell's status
/// is rolled back and the error is returned; every other failure is logged,
/// recorded, and skipped.
pub struct CellDeletionLifecycle {
    deps: DeletionCollaborators,
    timeouts: DeletionTimeouts,
}

impl CellDeletionLifecycle {
    pub fn new(deps: DeletionCollaborators) -> Self {
        Self {
            deps,
            timeouts: DeletionTimeouts::default(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: DeletionTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub async fn delete_cell(&self, cell_id: &str) -> Result<DeletionReport> {
        let cell = self
            .deps
            .cells
            .get_cell(cell_id)
            .await?
            .ok_or_else(|| CellyardError::CellNotFound {
                cell_id: cell_id.to_string(),
            })?;

        let prior_status = cell.status;
        if prior_status != CellStatus::Deleting {
            self.deps
                .cells
                .update_cell_status(cell_id, CellStatus::Deleting)
                .await?;
            self.notify(&cell, CellStatus::Deleting);
        }
        log::info!("Deleting cell {cell_id} (was {prior_status})");

        let recorder = TimingRecorder::new(
            self.deps.timings.clone(),
            cell_id,
            Some(cell.workspace_id.clone()),
            TimingWorkflow::Delete,
        );
        let mut runner = StepRunner::new(&recorder, cell_id);
        let outcome = runner.run_all(self.steps(&cell)).await;

        match outcome {
            Ok(()) => {
                let total = recorder.record_total(TimingStatus::Ok, None).await;
                self.deps.notifier.cell_removed(cell_id, &cell.workspace_id);

                let report = DeletionReport {
                    run_id: recorder.run_id().to_string(),
                    cell_id: cell_id.to_string(),
                    steps: runner.into_outcomes(),
                    status: TimingStatus::Ok,
                    total_duration_ms: total.as_millis() as u64,
                };
                let failed = report.failed_steps().count();
                if failed > 0 {
                    log::warn!("Deleted cell {cell_id} with {failed} failed cleanup step(s)");
                } else {
                    log::info!("Deleted cell {cell_id} in {}ms", report.total_duration_ms);
                }
                Ok(report)
            }
            Err(err) => {
                let message = format!("{err:#}");
                recorder
                    .record_total(TimingStatus::Error, Some(&message))
                    .await;
                self.roll_back(&cell, prior_status).await;
                Err(err)
            }
        }
    }

    fn steps<'a>(&'a self, cell: &'a Cell) -> Vec<LifecycleStep<'a>> {
        let cell_id = cell.id.as_str();
        vec![
            LifecycleStep::new(
                CLOSE_AGENT_SESSION,
                self.timeouts.close_agent_session,
                Box::pin(self.close_agent_session(cell_id)),
            ),
            LifecycleStep::new(
                CLOSE_TERMINAL_SESSIONS,
                self.timeouts.close_terminal_sessions,
                Box::pin(self.close_terminal_sessions(cell_id)),
            ),
            LifecycleStep::new(
                STOP_SERVICES,
                self.timeouts.stop_services,
                Box::pin(self.stop_services(cell_id)),
            ),
            LifecycleStep::new(
                REMOVE_WORKSPACE,
                self.timeouts.remove_workspace,
                Box::pin(self.remove_workspace(cell)),
            ),
            LifecycleStep::new(
                DELETE_CELL_RECORD,
                self.timeouts.delete_cell_record,
                Box::pin(self.delete_cell_record(cell_id)),
            )
            .fatal(),
        ]
    }

    async fn close_agent_session(&self, cell_id: &str) -> Result<StepMetadata> {
        self.deps.agents.close_session(cell_id).await?;
        Ok(StepMetadata::new())
    }

    async fn close_terminal_sessions(&self, cell_id: &str) -> Result<StepMetadata> {
        let closed = self.deps.terminals.close_cell_sessions(cell_id).await?;
        Ok(metadata([("sessionsClosed", json!(closed))]))
    }

    async fn stop_services(&self, cell_id: &str) -> Result<StepMetadata> {
        let report = self.deps.services.stop_cell_services(cell_id).await?;
        Ok(metadata([
            ("stopped", json!(report.stopped)),
            ("releasedPorts", json!(report.released_ports)),
        ]))
    }

    /// Worktree removal, falling back to deleting the directory outright.
    /// A failing fallback is logged, never returned.
    async fn remove_workspace(&self, cell: &Cell) -> Result<StepMetadata> {
        let error = match self.deps.worktrees.remove_worktree(cell).await {
            Ok(()) => return Ok(metadata([("fallback", json!(false))])),
            Err(e) => e,
        };
        log::warn!(
            "Worktree removal failed for cell {}, removing directory instead: {error}",
            cell.id
        );

        let path = cell.workspace_path.clone();
        let removed = tokio::task::spawn_blocking(move || remove_dir_if_present(path)).await;
        match removed {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::warn!(
                "Fallback removal of {} failed: {e}",
                cell.workspace_path.display()
            ),
            Err(e) => log::warn!("Fallback removal task failed: {e}"),
        }

        Ok(metadata([
            ("fallback", json!(true)),
            ("worktreeError", json!(error.to_string())),
        ]))
    }

    async fn delete_cell_record(&self, cell_id: &str) -> Result<StepMetadata> {
        self.deps.cells.delete_cell(cell_id).await?;
        Ok(StepMetadata::new())
    }

    async fn roll_back(&self, cell: &Cell, prior_status: CellStatus) {
        // `deleting` is not a resting state; a failed retry parks the cell in `error`.
        let restored = if prior_status == CellStatus::Deleting {
            CellStatus::Error
        } else {
            prior_status
        };

        match self.deps.cells.update_cell_status(&cell.id, restored).await {
            Ok(()) => log::error!(
                "Deletion of cell {} failed; restored status to {restored}",
                cell.id
            ),
            Err(e) => log::error!(
                "Deletion of cell {} failed and restoring status {restored} also failed: {e}",
                cell.id
            ),
        }
        self.notify(cell, restored);
    }

    fn notify(&self, cell: &Cell, status: CellStatus) {
        self.deps.notifier.notify_status(CellStatusChange {
            cell_id: cell.id.clone(),
            workspace_id: cell.workspace_id.clone(),
            status,
            last_setup_error: cell.last_setup_error.clone(),
        });
    }
}

fn metadata<const N: usize>(entries: [(&str, Value); N]) -> StepMetadata {
    entries
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

fn remove_dir_if_present(path: PathBuf) -> std::io::Result<()> {
    match std::fs::remove_dir_all(&path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
