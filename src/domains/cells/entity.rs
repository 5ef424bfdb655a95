use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellStatus {
    Pending,
    Spawning,
    Ready,
    Error,
    Deleting,
}

impl CellStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CellStatus::Pending => "pending",
            CellStatus::Spawning => "spawning",
            CellStatus::Ready => "ready",
            CellStatus::Error => "error",
            CellStatus::Deleting => "deleting",
        }
    }
}

impl FromStr for CellStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CellStatus::Pending),
            "spawning" => Ok(CellStatus::Spawning),
            "ready" => Ok(CellStatus::Ready),
            "error" => Ok(CellStatus::Error),
            "deleting" => Ok(CellStatus::Deleting),
            other => Err(format!("unknown cell status '{other}'")),
        }
    }
}

impl std::fmt::Display for CellStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A git-worktree-backed workspace hosting an agent and its services.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Cell {
    pub id: String,
    pub workspace_id: String,
    pub name: String,
    pub repository_path: PathBuf,
    pub workspace_path: PathBuf,
    pub branch: Option<String>,
    pub status: CellStatus,
    pub last_setup_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Cell {
    pub fn new(
        workspace_id: impl Into<String>,
        name: impl Into<String>,
        repository_path: impl Into<PathBuf>,
        workspace_path: impl Into<PathBuf>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            workspace_id: workspace_id.into(),
            name: name.into(),
            repository_path: repository_path.into(),
            workspace_path: workspace_path.into(),
            branch: None,
            status: CellStatus::Pending,
            last_setup_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}
