pub mod args;
pub mod config;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;

use crate::branch_cache::BranchCacheManager;
use crate::orchestrator::{self, IndexFlags};
use crate::storage::format_timestamp_iso8601;
use crate::vcs::VcsStateTracker;

use args::{CacheArgs, CacheCleanArgs, CacheCommand, CacheListArgs, Cli, Commands, IndexArgs, MigrateArgs, StatusArgs};

/// Parse arguments and dispatch to the requested subcommand.
pub fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Index(args) => run_index(args),
        Commands::Status(args) => run_status(args),
        Commands::Cache(args) => run_cache(args),
        Commands::Migrate(args) => run_migrate(args),
    }
}

fn run_index(mut args: IndexArgs) -> Result<()> {
    if let Some(config) = config::load_cli_config()? {
        config::apply_index_config_defaults(&config, &mut args);
    }

    let derived_data = args
        .derived_data
        .context("--derived-data is required (or set index.derived_data in .scip-index/config.toml)")?;
    let project_root = args
        .project_root
        .context("--project-root is required (or set index.project_root in .scip-index/config.toml)")?;
    let output = args
        .output
        .context("--output is required (or set index.output in .scip-index/config.toml)")?;

    let flags = IndexFlags {
        incremental: args.incremental,
        force: args.force,
        include_snippets: !args.no_include_snippets,
        json: args.json,
        modules: args.modules,
        verbose: args.verbose,
    };

    orchestrator::run_index(&derived_data, &project_root, &output, &flags)
        .with_context(|| format!("failed to index project at {}", project_root.display()))?;

    Ok(())
}

fn run_status(args: StatusArgs) -> Result<()> {
    let project_root = args
        .project_root
        .context("--project-root is required")?;

    let vcs = VcsStateTracker::new(&project_root);
    if !vcs.is_repository() {
        println!("project: {}", project_root.display());
        println!("repository: no");
        return Ok(());
    }

    let branch_cache = BranchCacheManager::new(&project_root);
    let branch = branch_cache.current_branch(&vcs)?;
    let commit = vcs.current_commit_hash()?;

    println!("project: {}", project_root.display());
    println!("repository: yes");
    println!("branch: {branch}");
    println!("commit: {commit}");

    match branch_cache.get_branch_cache(&branch)? {
        Some(cache) => {
            let size = std::fs::metadata(&cache.path).map(|m| m.len()).unwrap_or(0);
            let cached_at = format_timestamp_iso8601(cache.mtime)
                .unwrap_or_else(|| cache.mtime.to_string());
            println!("branch cache: {}", cache.path.display());
            println!("cached commit: {}", cache.commit);
            println!("cached at: {cached_at}");
            println!("cache size: {size} bytes");
            if args.verbose {
                println!("up to date: {}", cache.commit == commit);
            }
        }
        None => println!("branch cache: none"),
    }

    Ok(())
}

fn run_cache(args: CacheArgs) -> Result<()> {
    match args.command {
        CacheCommand::Clean(clean_args) => run_cache_clean(clean_args),
        CacheCommand::List(list_args) => run_cache_list(list_args),
    }
}

fn run_cache_clean(args: CacheCleanArgs) -> Result<()> {
    let project_root = args.project_root.context("--project-root is required")?;
    let branch_cache = BranchCacheManager::new(&project_root);

    match (args.all, args.branch) {
        (true, _) => {
            branch_cache.clean_all_caches()?;
            println!("cleaned all branch caches under {}", project_root.display());
        }
        (false, Some(branch)) => {
            branch_cache.clean_branch_cache(&branch)?;
            println!("cleaned branch cache for '{branch}'");
        }
        (false, None) => bail!("specify --branch <name> or --all"),
    }

    Ok(())
}

fn run_cache_list(args: CacheListArgs) -> Result<()> {
    let project_root: PathBuf = args.project_root.context("--project-root is required")?;
    let branch_cache = BranchCacheManager::new(&project_root);
    let branches = branch_cache.list_cached_branches()?;

    if branches.is_empty() {
        println!("no cached branches");
    } else {
        for branch in branches {
            println!("{branch}");
        }
    }

    Ok(())
}

fn run_migrate(args: MigrateArgs) -> Result<()> {
    let project_root = args.project_root.context("--project-root is required")?;
    let vcs = VcsStateTracker::new(&project_root);
    let branch_cache = BranchCacheManager::new(&project_root);

    let migrated = branch_cache.migrate_legacy_state(&vcs)?;
    if migrated {
        println!("migrated legacy state for {}", project_root.display());
    } else if args.verbose {
        println!("nothing to migrate for {}", project_root.display());
    }

    Ok(())
}
