use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Name of the synthetic step closing every run.
pub const TOTAL_STEP: &str = "total";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimingWorkflow {
    Create,
    Delete,
}

impl TimingWorkflow {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimingWorkflow::Create => "create",
            TimingWorkflow::Delete => "delete",
        }
    }
}

impl FromStr for TimingWorkflow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(TimingWorkflow::Create),
            "delete" => Ok(TimingWorkflow::Delete),
            other => Err(format!("unknown timing workflow '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimingStatus {
    Ok,
    Error,
}

impl TimingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimingStatus::Ok => "ok",
            TimingStatus::Error => "error",
        }
    }
}

impl FromStr for TimingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ok" => Ok(TimingStatus::Ok),
            "error" => Ok(TimingStatus::Error),
            other => Err(format!("unknown timing status '{other}'")),
        }
    }
}

impl std::fmt::Display for TimingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one workflow step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingStepRecord {
    pub id: String,
    pub cell_id: String,
    pub workspace_id: Option<String>,
    pub workflow: TimingWorkflow,
    pub run_id: String,
    pub step: String,
    pub status: TimingStatus,
    pub duration_ms: u64,
    pub attempt: Option<u32>,
    pub error: Option<String>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl TimingStepRecord {
    pub fn is_total(&self) -> bool {
        self.step == TOTAL_STEP
    }
}

/// Summary of all steps sharing a run id. Derived, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingRunRecord {
    pub run_id: String,
    pub cell_id: String,
    pub workspace_id: Option<String>,
    pub workflow: TimingWorkflow,
    pub status: TimingStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total_duration_ms: u64,
    pub step_count: usize,
    pub attempt: Option<u32>,
}

/// Timing event exactly as persisted, before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct TimingEventRow {
    pub id: String,
    pub cell_id: String,
    pub workspace_id: Option<String>,
    pub workflow: String,
    pub run_id: String,
    pub step: String,
    pub status: String,
    pub duration_ms: i64,
    pub attempt: Option<i64>,
    pub error: Option<String>,
    pub metadata: Option<String>,
    pub created_at: i64,
}

pub const DEFAULT_TIMING_LIMIT: usize = 500;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimingFilter {
    pub cell_id: Option<String>,
    pub workflow: Option<TimingWorkflow>,
    pub run_id: Option<String>,
    /// Maximum number of step rows read; defaults to `DEFAULT_TIMING_LIMIT`.
    pub limit: Option<usize>,
}

impl TimingFilter {
    pub fn for_cell(cell_id: impl Into<String>) -> Self {
        Self {
            cell_id: Some(cell_id.into()),
            ..Self::default()
        }
    }

    pub fn workflow(mut self, workflow: TimingWorkflow) -> Self {
        self.workflow = Some(workflow);
        self
    }

    pub fn run(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_TIMING_LIMIT)
    }
}
