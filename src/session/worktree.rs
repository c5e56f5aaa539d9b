//! Worktree operations contract and reference counting.
//!
//! The core treats a worktree as an opaque `(path, branch)` pair with a
//! reference-counted lifetime: sessions register on create/join and
//! unregister on switch/end; cleanup refuses while references remain.

use crate::error::{Result, SessionError};
use crate::session::WorktreeInfo;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Git worktree primitives the core consumes.
#[async_trait]
pub trait WorktreeOps: Send + Sync + 'static {
    /// Create (or reuse) a worktree for `branch` under `repo_root`.
    async fn create(&self, repo_root: &Path, branch: &str) -> Result<WorktreeInfo>;

    /// Existing worktree for `branch`, if one is checked out.
    async fn find(&self, repo_root: &Path, branch: &str) -> Result<Option<WorktreeInfo>>;

    /// All worktrees under `repo_root`.
    async fn list(&self, repo_root: &Path) -> Result<Vec<WorktreeInfo>>;

    /// Remove a worktree directory.
    async fn remove(&self, repo_root: &Path, path: &Path) -> Result<()>;

    /// Age of a worktree in hours, for garbage collection.
    async fn age_hours(&self, path: &Path) -> Result<u64>;
}

/// `git worktree` CLI implementation.
pub struct GitWorktrees;

impl GitWorktrees {
    async fn git(repo_root: &Path, args: &[&str]) -> Result<String> {
        let output = tokio::process::Command::new("git")
            .arg("-C")
            .arg(repo_root)
            .args(args)
            .output()
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SessionError::Other(anyhow::anyhow!(
                "git {} failed: {}",
                args.join(" "),
                stderr.trim()
            ))
            .into());
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn parse_worktree_list(repo_root: &Path, raw: &str) -> Vec<WorktreeInfo> {
        let mut out = Vec::new();
        let mut path: Option<PathBuf> = None;
        let mut branch: Option<String> = None;
        for line in raw.lines().chain(std::iter::once("")) {
            if line.is_empty() {
                if let (Some(path), Some(branch)) = (path.take(), branch.take()) {
                    out.push(WorktreeInfo {
                        repo_root: repo_root.to_path_buf(),
                        path,
                        branch,
                        is_owner: false,
                    });
                }
                continue;
            }
            if let Some(rest) = line.strip_prefix("worktree ") {
                path = Some(PathBuf::from(rest));
            } else if let Some(rest) = line.strip_prefix("branch ") {
                branch = Some(rest.trim_start_matches("refs/heads/").to_string());
            }
        }
        out
    }
}

#[async_trait]
impl WorktreeOps for GitWorktrees {
    async fn create(&self, repo_root: &Path, branch: &str) -> Result<WorktreeInfo> {
        if let Some(existing) = self.find(repo_root, branch).await? {
            return Ok(existing);
        }
        let path = repo_root
            .join(".worktrees")
            .join(branch.replace('/', "-"));
        let path_arg = path.display().to_string();
        // Reuse the branch when it exists, create it otherwise.
        let result = Self::git(repo_root, &["worktree", "add", &path_arg, branch]).await;
        if result.is_err() {
            Self::git(repo_root, &["worktree", "add", "-b", branch, &path_arg]).await?;
        }
        Ok(WorktreeInfo {
            repo_root: repo_root.to_path_buf(),
            path,
            branch: branch.to_string(),
            is_owner: true,
        })
    }

    async fn find(&self, repo_root: &Path, branch: &str) -> Result<Option<WorktreeInfo>> {
        Ok(self
            .list(repo_root)
            .await?
            .into_iter()
            .find(|w| w.branch == branch))
    }

    async fn list(&self, repo_root: &Path) -> Result<Vec<WorktreeInfo>> {
        let raw = Self::git(repo_root, &["worktree", "list", "--porcelain"]).await?;
        let mut all = Self::parse_worktree_list(repo_root, &raw);
        // The first entry is the main checkout, not a worktree.
        if !all.is_empty() {
            all.remove(0);
        }
        Ok(all)
    }

    async fn remove(&self, repo_root: &Path, path: &Path) -> Result<()> {
        let path_arg = path.display().to_string();
        Self::git(repo_root, &["worktree", "remove", "--force", &path_arg]).await?;
        Ok(())
    }

    async fn age_hours(&self, path: &Path) -> Result<u64> {
        let metadata = tokio::fs::metadata(path).await?;
        let modified = metadata.modified()?;
        let age = std::time::SystemTime::now()
            .duration_since(modified)
            .unwrap_or_default();
        Ok(age.as_secs() / 3600)
    }
}

/// Which sessions reference which worktree paths. Mutated only by the
/// session manager.
#[derive(Debug, Default)]
pub struct WorktreeRegistry {
    refs: Mutex<HashMap<PathBuf, HashSet<String>>>,
}

impl WorktreeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, path: &Path, composite_id: &str) {
        self.refs
            .lock()
            .unwrap()
            .entry(path.to_path_buf())
            .or_default()
            .insert(composite_id.to_string());
    }

    pub fn unregister(&self, path: &Path, composite_id: &str) {
        let mut refs = self.refs.lock().unwrap();
        if let Some(sessions) = refs.get_mut(path) {
            sessions.remove(composite_id);
            if sessions.is_empty() {
                refs.remove(path);
            }
        }
    }

    pub fn reference_count(&self, path: &Path) -> usize {
        self.refs
            .lock()
            .unwrap()
            .get(path)
            .map(|s| s.len())
            .unwrap_or(0)
    }

    pub fn is_referenced(&self, path: &Path) -> bool {
        self.reference_count(path) > 0
    }

    /// Refuse removal while other sessions reference the path.
    pub fn check_removable(&self, path: &Path, requesting_session: &str) -> Result<()> {
        let refs = self.refs.lock().unwrap();
        let others: usize = refs
            .get(path)
            .map(|sessions| {
                sessions
                    .iter()
                    .filter(|id| id.as_str() != requesting_session)
                    .count()
            })
            .unwrap_or(0);
        if others > 0 {
            return Err(SessionError::WorktreeInUse {
                path: path.display().to_string(),
                count: others,
            }
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{GitWorktrees, WorktreeRegistry};
    use std::path::{Path, PathBuf};

    #[test]
    fn reference_counting_blocks_removal() {
        let registry = WorktreeRegistry::new();
        let path = PathBuf::from("/repo/.worktrees/feature-x");
        registry.register(&path, "mock:t1");
        registry.register(&path, "mock:t2");

        assert_eq!(registry.reference_count(&path), 2);
        assert!(registry.check_removable(&path, "mock:t1").is_err());

        registry.unregister(&path, "mock:t2");
        assert!(registry.check_removable(&path, "mock:t1").is_ok());

        registry.unregister(&path, "mock:t1");
        assert!(!registry.is_referenced(&path));
    }

    #[test]
    fn porcelain_output_parses() {
        let raw = "worktree /repo\nHEAD abc\nbranch refs/heads/main\n\nworktree /repo/.worktrees/feature-x\nHEAD def\nbranch refs/heads/feature-x\n";
        let parsed = GitWorktrees::parse_worktree_list(Path::new("/repo"), raw);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].branch, "feature-x");
        assert_eq!(
            parsed[1].path,
            PathBuf::from("/repo/.worktrees/feature-x")
        );
    }
}
