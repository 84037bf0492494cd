//! Branch Cache Manager: per-branch on-disk snapshots of the
//! relational store, enabling O(file-copy) branch switches.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScipIndexError};
use crate::storage::StorageEngine;
use crate::vcs::VcsStateTracker;

const STATE_DIR: &str = ".scip-index";
const DATABASE_FILE_NAME: &str = "index.db";
const LEGACY_STATE_FILE_NAME: &str = ".swift-scip-state.json";
const UNSAFE_BRANCH_CHARS: &[char] = &['/', '\\', '?', '%', '*', '|', '"', '<', '>', ':'];

pub struct BranchCacheManager {
    project_root: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchCacheInfo {
    pub branch: String,
    pub commit: String,
    pub path: PathBuf,
    pub mtime: u64,
}

#[derive(Debug, Deserialize, Serialize)]
struct LegacyState {
    #[serde(rename = "lastCommitHash")]
    last_commit_hash: String,
    #[serde(rename = "indexedFiles")]
    indexed_files: HashMap<String, String>,
}

impl BranchCacheManager {
    pub fn new(project_root: &Path) -> Self {
        Self {
            project_root: project_root.to_path_buf(),
        }
    }

    /// The working tree's branch, with filesystem-unsafe characters
    /// replaced by underscores.
    pub fn current_branch(&self, vcs: &VcsStateTracker) -> Result<String> {
        let branch = vcs.current_branch()?;
        Ok(sanitize_branch_name(&branch))
    }

    pub fn branch_cache_dir(&self, branch: &str) -> PathBuf {
        self.project_root.join(STATE_DIR).join("branches").join(branch)
    }

    pub fn branch_database_path(&self, branch: &str) -> PathBuf {
        self.branch_cache_dir(branch).join(DATABASE_FILE_NAME)
    }

    /// Open the branch's database read-only and read its Index State.
    /// Returns `None` if the cache file is missing.
    pub fn get_branch_cache(&self, branch: &str) -> Result<Option<BranchCacheInfo>> {
        let path = self.branch_database_path(branch);
        if !path.exists() {
            return Ok(None);
        }

        let engine = StorageEngine::open_read_only(&path)?;
        let state = engine.load_state()?;
        let mtime = fs::metadata(&path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);

        Ok(state.map(|s| BranchCacheInfo {
            branch: branch.to_string(),
            commit: s.commit,
            path: path.clone(),
            mtime,
        }))
    }

    pub fn create_branch_cache(&self, branch: &str) -> Result<()> {
        fs::create_dir_all(self.branch_cache_dir(branch))?;
        Ok(())
    }

    /// Copy the branch's cached database (and WAL/SHM sidecars) to
    /// `out`; an O(size-of-database) branch-switch operation.
    pub fn fast_switch_to_branch(&self, branch: &str, out: &Path) -> Result<()> {
        let cached = self.branch_database_path(branch);
        if !cached.exists() {
            return Err(ScipIndexError::CacheNotFound(branch.to_string()));
        }

        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent)?;
        }

        remove_database_and_sidecars(out)?;
        copy_database_and_sidecars(&cached, out)?;
        Ok(())
    }

    /// Create the branch directory, then copy `src` (and its sidecars)
    /// into the branch cache, replacing whatever was there.
    pub fn save_to_branch_cache(&self, branch: &str, src: &Path) -> Result<()> {
        self.create_branch_cache(branch)?;
        let dest = self.branch_database_path(branch);
        remove_database_and_sidecars(&dest)?;
        copy_database_and_sidecars(src, &dest)?;
        Ok(())
    }

    /// Sanitized branch names with an `index.db` file present.
    pub fn list_cached_branches(&self) -> Result<Vec<String>> {
        let branches_dir = self.project_root.join(STATE_DIR).join("branches");
        if !branches_dir.exists() {
            return Ok(Vec::new());
        }

        let mut branches = Vec::new();
        for entry in fs::read_dir(&branches_dir)? {
            let entry = entry?;
            if entry.path().is_dir() && entry.path().join(DATABASE_FILE_NAME).exists() {
                if let Some(name) = entry.file_name().to_str() {
                    branches.push(name.to_string());
                }
            }
        }
        branches.sort();
        Ok(branches)
    }

    pub fn clean_branch_cache(&self, branch: &str) -> Result<()> {
        let dir = self.branch_cache_dir(branch);
        if dir.exists() {
            fs::remove_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn clean_all_caches(&self) -> Result<()> {
        let branches_dir = self.project_root.join(STATE_DIR).join("branches");
        if branches_dir.exists() {
            fs::remove_dir_all(branches_dir)?;
        }
        Ok(())
    }

    /// Migrate the legacy single-file JSON state, if present, into a
    /// branch cache database. Returns whether migration ran.
    pub fn migrate_legacy_state(&self, vcs: &VcsStateTracker) -> Result<bool> {
        let legacy_path = self.project_root.join(LEGACY_STATE_FILE_NAME);
        if !legacy_path.exists() {
            return Ok(false);
        }

        let contents = fs::read_to_string(&legacy_path)
            .map_err(|e| ScipIndexError::MigrationFailure(e.to_string()))?;
        let legacy: LegacyState = serde_json::from_str(&contents)
            .map_err(|e| ScipIndexError::MigrationFailure(e.to_string()))?;

        let branch = self
            .current_branch(vcs)
            .unwrap_or_else(|_| "main".to_string());

        self.create_branch_cache(&branch)?;
        let db_path = self.branch_database_path(&branch);
        let mut engine = StorageEngine::open(&db_path)?;
        let files: Vec<String> = legacy.indexed_files.keys().cloned().collect();
        engine.save_state(&legacy.last_commit_hash, &files)?;

        let backup_path = self.project_root.join(format!("{LEGACY_STATE_FILE_NAME}.backup"));
        fs::rename(&legacy_path, &backup_path)
            .map_err(|e| ScipIndexError::MigrationFailure(e.to_string()))?;

        Ok(true)
    }
}

fn sanitize_branch_name(branch: &str) -> String {
    branch
        .chars()
        .map(|c| if UNSAFE_BRANCH_CHARS.contains(&c) { '_' } else { c })
        .collect()
}

fn sidecar_paths(db_path: &Path) -> Vec<PathBuf> {
    vec![
        PathBuf::from(format!("{}-wal", db_path.display())),
        PathBuf::from(format!("{}-shm", db_path.display())),
    ]
}

fn remove_database_and_sidecars(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_file(path)?;
    }
    for sidecar in sidecar_paths(path) {
        if sidecar.exists() {
            fs::remove_file(sidecar)?;
        }
    }
    Ok(())
}

fn copy_database_and_sidecars(src: &Path, dest: &Path) -> Result<()> {
    fs::copy(src, dest)?;
    for (src_sidecar, dest_sidecar) in sidecar_paths(src).into_iter().zip(sidecar_paths(dest)) {
        if src_sidecar.exists() {
            fs::copy(&src_sidecar, &dest_sidecar)?;
        }
    }
    Ok(())
}
