pub mod git;

use async_trait::async_trait;

use crate::domains::cells::Cell;
use crate::errors::CellyardError;

pub use git::GitWorktreeManager;

/// Owner of the on-disk git worktrees backing cells.
#[async_trait]
pub trait WorktreeManager: Send + Sync {
    async fn remove_worktree(&self, cell: &Cell) -> Result<(), CellyardError>;
}
