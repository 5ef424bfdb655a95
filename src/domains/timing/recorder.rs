use chrono::Utc;
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::entity::{TOTAL_STEP, TimingStatus, TimingStepRecord, TimingWorkflow};
use super::store::TimingStore;

/// Records the steps of one workflow run under a fresh run id.
///
/// Persisting a record never fails the workflow; insert errors are logged.
#[derive(Clone)]
pub struct TimingRecorder {
    store: Arc<dyn TimingStore>,
    cell_id: String,
    workspace_id: Option<String>,
    workflow: TimingWorkflow,
    run_id: String,
    attempt: Option<u32>,
    started: Instant,
}

impl TimingRecorder {
    pub fn new(
        store: Arc<dyn TimingStore>,
        cell_id: impl Into<String>,
        workspace_id: Option<String>,
        workflow: TimingWorkflow,
    ) -> Self {
        Self {
            store,
            cell_id: cell_id.into(),
            workspace_id,
            workflow,
            run_id: uuid::Uuid::new_v4().to_string(),
            attempt: None,
            started: Instant::now(),
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub async fn record_step(
        &self,
        step: &str,
        status: TimingStatus,
        duration: Duration,
        error: Option<&str>,
        metadata: Map<String, Value>,
    ) {
        let record = TimingStepRecord {
            id: uuid::Uuid::new_v4().to_string(),
            cell_id: self.cell_id.clone(),
            workspace_id: self.workspace_id.clone(),
            workflow: self.workflow,
            run_id: self.run_id.clone(),
            step: step.to_string(),
            status,
            duration_ms: duration.as_millis() as u64,
            attempt: self.attempt,
            error: error.map(str::to_string),
            metadata,
            created_at: Utc::now(),
        };

        if let Err(e) = self.store.insert_timing_event(&record).await {
            log::warn!(
                "Failed to record {} timing for cell {} step {step}: {e}",
                self.workflow.as_str(),
                self.cell_id
            );
        }
    }

    /// Closes the run with the wall-clock time since the recorder was created.
    pub async fn record_total(&self, status: TimingStatus, error: Option<&str>) -> Duration {
        let elapsed = self.elapsed();
        self.record_step(TOTAL_STEP, status, elapsed, error, Map::new())
            .await;
        elapsed
    }

    /// Runs `fut` and records its outcome as `step`.
    pub async fn time_step<T, F>(&self, step: &str, fut: F) -> anyhow::Result<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        let started = Instant::now();
        let result = fut.await;
        let (status, message) = match &result {
            Ok(_) => (TimingStatus::Ok, None),
            Err(e) => (TimingStatus::Error, Some(e.to_string())),
        };
        self.record_step(step, status, started.elapsed(), message.as_deref(), Map::new())
            .await;
        result
    }
}
