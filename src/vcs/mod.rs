//! VCS State Tracker: shells out to `git` to compute changed/deleted
//! file sets and working-tree/branch state.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{Result, ScipIndexError};

const SOURCE_EXTENSION: &str = ".swift";

pub struct VcsStateTracker {
    project_root: PathBuf,
}

impl VcsStateTracker {
    pub fn new(project_root: &Path) -> Self {
        Self {
            project_root: project_root.to_path_buf(),
        }
    }

    /// Presence-check of the repository marker directory.
    pub fn is_repository(&self) -> bool {
        self.project_root.join(".git").exists()
    }

    pub fn current_commit_hash(&self) -> Result<String> {
        let output = self.git(&["rev-parse", "HEAD"])?;
        Ok(output.trim().to_string())
    }

    pub fn current_branch(&self) -> Result<String> {
        let output = self.git(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        Ok(output.trim().to_string())
    }

    /// Diff against `HEAD` since `commit`, restricted to the source
    /// extension, unioned with working-tree changes, deduplicated.
    pub fn changed_files_since(&self, commit: &str) -> Result<HashSet<String>> {
        let mut changed: HashSet<String> = self
            .git(&["diff", "--name-only", commit, "HEAD"])?
            .lines()
            .filter(|path| path.ends_with(SOURCE_EXTENSION))
            .map(str::to_string)
            .collect();

        for change in self.working_tree_changes()? {
            if change.ends_with(SOURCE_EXTENSION) {
                changed.insert(change);
            }
        }

        Ok(changed)
    }

    /// Diff with the delete-filter only.
    pub fn deleted_files_since(&self, commit: &str) -> Result<HashSet<String>> {
        Ok(self
            .git(&["diff", "--name-only", "--diff-filter=D", commit, "HEAD"])?
            .lines()
            .filter(|path| path.ends_with(SOURCE_EXTENSION))
            .map(str::to_string)
            .collect())
    }

    /// Porcelain status; for rename entries (`old -> new`) returns the
    /// new path.
    pub fn working_tree_changes(&self) -> Result<HashSet<String>> {
        let output = self.git(&["status", "--porcelain"])?;
        let mut changes = HashSet::new();

        for line in output.lines() {
            if line.len() < 4 {
                continue;
            }
            let rest = &line[3..];
            let path = match rest.split_once(" -> ") {
                Some((_old, new)) => new,
                None => rest,
            };
            changes.insert(path.trim().to_string());
        }

        Ok(changes)
    }

    /// Compare the branch's cached commit (via the Storage Engine,
    /// read-only) to the current commit: equal ⇒ only working-tree
    /// changes; unequal ⇒ the diff-since-commit set. `None` means no
    /// branch state exists; the caller should fall back to a full
    /// rebuild.
    pub fn changed_files_for_branch(
        &self,
        branch_state_commit: Option<&str>,
    ) -> Result<Option<HashSet<String>>> {
        let Some(cached_commit) = branch_state_commit else {
            return Ok(None);
        };

        let current_commit = self.current_commit_hash()?;
        if cached_commit == current_commit {
            return Ok(Some(self.working_tree_changes()?));
        }

        Ok(Some(self.changed_files_since(cached_commit)?))
    }

    fn git(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.project_root)
            .output()
            .map_err(|_| ScipIndexError::NotAGitRepository(self.project_root.clone()))?;

        if !output.status.success() {
            return Err(ScipIndexError::NotAGitRepository(self.project_root.clone()));
        }

        String::from_utf8(output.stdout)
            .map_err(|_| ScipIndexError::NotAGitRepository(self.project_root.clone()))
    }
}
