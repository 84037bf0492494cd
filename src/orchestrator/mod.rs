//! The index operation: composes the Index-Store Reader, Storage
//! Engine, VCS State Tracker, and Branch Cache Manager into the
//! fast-switch / incremental / full-rebuild decision tree.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::branch_cache::BranchCacheManager;
use crate::error::Result;
use crate::legacy_json;
use crate::storage::StorageEngine;
use crate::store::IndexStoreReader;
use crate::vcs::VcsStateTracker;

#[derive(Debug, Clone)]
pub struct IndexFlags {
    pub incremental: bool,
    pub force: bool,
    pub include_snippets: bool,
    pub json: bool,
    pub modules: Vec<String>,
    pub verbose: bool,
}

impl Default for IndexFlags {
    fn default() -> Self {
        Self {
            incremental: false,
            force: false,
            include_snippets: true,
            json: false,
            modules: Vec::new(),
            verbose: false,
        }
    }
}

macro_rules! note {
    ($flags:expr, $($arg:tt)*) => {
        if $flags.verbose {
            eprintln!($($arg)*);
        }
    };
}

/// Run one index operation: legacy JSON mode short-circuits first,
/// then branch/commit state decides between a fast cache switch, an
/// incremental update, and a full rebuild.
pub fn run_index(
    derived_data: &Path,
    project_root: &Path,
    output: &Path,
    flags: &IndexFlags,
) -> Result<()> {
    let vcs = VcsStateTracker::new(project_root);

    if flags.json || !vcs.is_repository() {
        note!(flags, "running in legacy JSON mode");
        return run_legacy_mode(derived_data, project_root, output, flags);
    }

    let branch_cache = BranchCacheManager::new(project_root);

    match branch_cache.migrate_legacy_state(&vcs) {
        Ok(true) => note!(flags, "migrated legacy state file to branch cache"),
        Ok(false) => {}
        Err(e) => note!(flags, "warning: legacy state migration failed: {e}"),
    }

    let branch = branch_cache.current_branch(&vcs)?;
    let current_commit = vcs.current_commit_hash()?;
    note!(flags, "branch '{branch}' at commit {current_commit}");

    let output = normalize_output_extension(output);
    let cached = branch_cache.get_branch_cache(&branch)?;

    if !flags.force {
        if let Some(cache) = &cached {
            if cache.commit == current_commit {
                note!(flags, "fast path: cache already at current commit, switching");
                branch_cache.fast_switch_to_branch(&branch, &output)?;
                return Ok(());
            }
        }
    }

    if flags.incremental && !flags.force {
        let changed = vcs.changed_files_for_branch(cached.as_ref().map(|c| c.commit.as_str()))?;
        match changed {
            Some(changed) if changed.is_empty() && cached.is_some() => {
                note!(flags, "no tracked changes; restoring cache and refreshing state");
                branch_cache.fast_switch_to_branch(&branch, &output)?;
                let mut engine = StorageEngine::open(&output)?;
                let paths = engine.get_indexed_file_paths()?;
                engine.save_state(&current_commit, &paths)?;
                branch_cache.save_to_branch_cache(&branch, &output)?;
                return Ok(());
            }
            Some(changed) => {
                let cached_commit = cached.as_ref().map(|c| c.commit.clone());
                return run_incremental_update(
                    derived_data,
                    project_root,
                    &output,
                    &branch,
                    &branch_cache,
                    &vcs,
                    &changed,
                    cached_commit.as_deref(),
                    &current_commit,
                    flags,
                );
            }
            None => note!(flags, "no branch state; falling through to full rebuild"),
        }
    }

    run_full_rebuild(
        derived_data,
        project_root,
        &output,
        &branch,
        &branch_cache,
        &current_commit,
        flags,
    )
}

#[allow(clippy::too_many_arguments)]
fn run_incremental_update(
    derived_data: &Path,
    project_root: &Path,
    output: &Path,
    branch: &str,
    branch_cache: &BranchCacheManager,
    vcs: &VcsStateTracker,
    changed: &HashSet<String>,
    cached_commit: Option<&str>,
    current_commit: &str,
    flags: &IndexFlags,
) -> Result<()> {
    note!(flags, "incremental update: {} changed file(s)", changed.len());

    let reader = IndexStoreReader::open(derived_data, project_root, flags.include_snippets)?
        .with_module_filter(flags.modules.clone());
    let symbols = reader.collect_symbols()?;
    let occurrences = reader.collect_occurrences(Some(changed))?;

    branch_cache.fast_switch_to_branch(branch, output)?;
    let mut engine = StorageEngine::open(output)?;

    if let Some(cached_commit) = cached_commit {
        let deleted = vcs.deleted_files_since(cached_commit)?;
        if !deleted.is_empty() {
            let deleted: Vec<String> = deleted.into_iter().collect();
            engine.delete_documents(&deleted)?;
        }
    }

    let changed_paths: Vec<String> = changed.iter().cloned().collect();
    engine.update_documents(&changed_paths, &symbols, &occurrences)?;

    let paths = engine.get_indexed_file_paths()?;
    engine.save_state(current_commit, &paths)?;
    branch_cache.save_to_branch_cache(branch, output)?;

    Ok(())
}

fn run_full_rebuild(
    derived_data: &Path,
    project_root: &Path,
    output: &Path,
    branch: &str,
    branch_cache: &BranchCacheManager,
    current_commit: &str,
    flags: &IndexFlags,
) -> Result<()> {
    note!(flags, "full rebuild");

    let reader = IndexStoreReader::open(derived_data, project_root, flags.include_snippets)?
        .with_module_filter(flags.modules.clone());
    let symbols = reader.collect_symbols()?;
    let relationships = reader.collect_relationships()?;
    let occurrences = reader.collect_occurrences(None)?;

    branch_cache.create_branch_cache(branch)?;
    let mut engine = StorageEngine::open(output)?;
    let project_root_str = project_root.to_string_lossy().to_string();
    engine.write(&symbols, &occurrences, &relationships, &project_root_str)?;

    let mut paths: Vec<String> = occurrences.iter().map(|o| o.path.clone()).collect();
    paths.sort();
    paths.dedup();
    engine.save_state(current_commit, &paths)?;

    branch_cache.save_to_branch_cache(branch, output)?;

    Ok(())
}

fn run_legacy_mode(
    derived_data: &Path,
    project_root: &Path,
    output: &Path,
    flags: &IndexFlags,
) -> Result<()> {
    let reader = IndexStoreReader::open(derived_data, project_root, flags.include_snippets)?
        .with_module_filter(flags.modules.clone());
    let symbols = reader.collect_symbols()?;
    let relationships = reader.collect_relationships()?;
    let occurrences = reader.collect_occurrences(None)?;

    let project_root_uri = format!("file://{}", project_root.to_string_lossy());
    let index = legacy_json::build_legacy_index(&symbols, &occurrences, &relationships, project_root_uri);
    let json = serde_json::to_string_pretty(&index)?;
    std::fs::write(output, json)?;

    if flags.incremental {
        let vcs = VcsStateTracker::new(project_root);
        if vcs.is_repository() {
            if let Ok(commit) = vcs.current_commit_hash() {
                let branch_cache = BranchCacheManager::new(project_root);
                if let Ok(branch) = branch_cache.current_branch(&vcs) {
                    branch_cache.create_branch_cache(&branch)?;
                    let mut engine = StorageEngine::open(&branch_cache.branch_database_path(&branch))?;
                    let mut paths: Vec<String> = occurrences.iter().map(|o| o.path.clone()).collect();
                    paths.sort();
                    paths.dedup();
                    engine.save_state(&commit, &paths)?;
                }
            }
        }
    }

    Ok(())
}

/// The relational back-end always writes a `.db` file, regardless of
/// what extension the caller asked for.
fn normalize_output_extension(path: &Path) -> PathBuf {
    path.with_extension("db")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_output_extension_forces_db() {
        assert_eq!(
            normalize_output_extension(Path::new("/tmp/out.json")),
            PathBuf::from("/tmp/out.db")
        );
        assert_eq!(
            normalize_output_extension(Path::new("/tmp/out")),
            PathBuf::from("/tmp/out.db")
        );
    }
}
