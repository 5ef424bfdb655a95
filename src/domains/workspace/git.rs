use async_trait::async_trait;
use git2::{BranchType, Repository, WorktreePruneOptions};
use std::path::{Path, PathBuf};

use super::WorktreeManager;
use crate::domains::cells::Cell;
use crate::errors::CellyardError;

/// Removes cell worktrees through libgit2.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitWorktreeManager;

impl GitWorktreeManager {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl WorktreeManager for GitWorktreeManager {
    async fn remove_worktree(&self, cell: &Cell) -> Result<(), CellyardError> {
        let repo_path = cell.repository_path.clone();
        let worktree_path = cell.workspace_path.clone();
        let branch = cell.branch.clone();
        let display_path = worktree_path.display().to_string();

        tokio::task::spawn_blocking(move || {
            remove_worktree_sync(&repo_path, &worktree_path)?;
            if let Some(branch) = branch.as_deref() {
                delete_branch_best_effort(&repo_path, branch);
            }
            Ok::<(), CellyardError>(())
        })
        .await
        .map_err(|e| CellyardError::worktree(&display_path, format!("removal task failed: {e}")))?
    }
}

/// Deletes the worktree directory and prunes its git registry entry.
pub fn remove_worktree_sync(repo_path: &Path, worktree_path: &Path) -> Result<(), CellyardError> {
    let fail = |message: String| CellyardError::worktree(worktree_path.display(), message);

    let repo = Repository::open(repo_path)
        .map_err(|e| fail(format!("cannot open repository {}: {e}", repo_path.display())))?;

    let target = canonical(worktree_path);
    let names = repo
        .worktrees()
        .map_err(|e| fail(format!("cannot list worktrees: {e}")))?;

    for name in names.iter().flatten() {
        let Ok(wt) = repo.find_worktree(name) else {
            continue;
        };
        if canonical(wt.path()) != target && wt.path() != worktree_path {
            continue;
        }

        // Removing the directory first makes the worktree prunable.
        if worktree_path.exists() {
            std::fs::remove_dir_all(worktree_path)
                .map_err(|e| fail(format!("failed to remove directory: {e}")))?;
        }
        if let Err(e) = wt.prune(Some(&mut WorktreePruneOptions::new())) {
            log::warn!("Failed to prune worktree {name} from git registry: {e}");
        }
        log::info!("Removed worktree {name} at {}", worktree_path.display());
        return Ok(());
    }

    if worktree_path.exists() {
        std::fs::remove_dir_all(worktree_path)
            .map_err(|e| fail(format!("failed to remove unregistered directory: {e}")))?;
        log::info!(
            "Removed unregistered workspace directory {}",
            worktree_path.display()
        );
        Ok(())
    } else {
        Err(fail("worktree not found".to_string()))
    }
}

fn delete_branch_best_effort(repo_path: &Path, branch_name: &str) {
    let result = Repository::open(repo_path).and_then(|repo| {
        let mut branch = repo.find_branch(branch_name, BranchType::Local)?;
        branch.delete()
    });
    match result {
        Ok(()) => log::info!("Deleted branch {branch_name}"),
        Err(e) => log::warn!("Failed to delete branch {branch_name}: {e}"),
    }
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use tempfile::TempDir;

    fn git(repo: &Path, args: &[&str]) {
        let output = Command::new("git")
            .args(args)
            .current_dir(repo)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {args:?} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
    }

    fn setup_test_repo() -> (TempDir, PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let repo_path = temp_dir.path().join("repo");
        std::fs::create_dir_all(&repo_path).unwrap();

        git(&repo_path, &["init"]);
        git(&repo_path, &["config", "user.email", "test@example.com"]);
        git(&repo_path, &["config", "user.name", "Test User"]);
        std::fs::write(repo_path.join("README.md"), "Initial").unwrap();
        git(&repo_path, &["add", "."]);
        git(&repo_path, &["commit", "-m", "init"]);

        (temp_dir, repo_path)
    }

    fn cell_for(repo: &Path, worktree: &Path, branch: Option<&str>) -> Cell {
        let mut cell = Cell::new("ws-1", "feature", repo, worktree);
        cell.branch = branch.map(str::to_string);
        cell
    }

    #[tokio::test]
    async fn removes_worktree_and_branch() {
        let (temp, repo) = setup_test_repo();
        let worktree = temp.path().join("cells").join("feature");
        git(
            &repo,
            &["worktree", "add", "-b", "cell/feature", &worktree.to_string_lossy()],
        );
        assert!(worktree.exists());

        let cell = cell_for(&repo, &worktree, Some("cell/feature"));
        GitWorktreeManager::new().remove_worktree(&cell).await.unwrap();

        assert!(!worktree.exists());
        let repo = Repository::open(&repo).unwrap();
        assert!(repo.find_branch("cell/feature", BranchType::Local).is_err());
        assert_eq!(repo.worktrees().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn unregistered_directory_is_removed() {
        let (temp, repo) = setup_test_repo();
        let stray = temp.path().join("stray");
        std::fs::create_dir_all(stray.join("node_modules")).unwrap();

        let cell = cell_for(&repo, &stray, None);
        GitWorktreeManager::new().remove_worktree(&cell).await.unwrap();
        assert!(!stray.exists());
    }

    #[tokio::test]
    async fn missing_worktree_is_typed_error() {
        let (temp, repo) = setup_test_repo();
        let cell = cell_for(&repo, &temp.path().join("gone"), None);

        let err = GitWorktreeManager::new().remove_worktree(&cell).await.unwrap_err();
        assert!(matches!(err, CellyardError::WorktreeRemovalFailed { .. }));
    }
}
