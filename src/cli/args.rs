use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Top-level CLI entrypoint for `scip-index`.
#[derive(Parser, Debug)]
#[command(
    name = "scip-index",
    about = "Builds a SCIP code-intelligence index from a Swift compiler index store",
    author = "scip-index developers"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build or refresh the relational (or legacy JSON) index.
    Index(IndexArgs),
    /// Report VCS and branch-cache state without mutating anything.
    Status(StatusArgs),
    /// Operate on per-branch caches directly.
    Cache(CacheArgs),
    /// Migrate a legacy `.swift-scip-state.json` file into a branch cache.
    Migrate(MigrateArgs),
}

/// Arguments for the `index` subcommand.
#[derive(Args, Debug, Default)]
pub struct IndexArgs {
    /// Root of the build system's derived-data output, hosting the
    /// compiler's index store.
    #[arg(long = "derived-data")]
    pub derived_data: Option<PathBuf>,

    /// Root of the source project being indexed.
    #[arg(long = "project-root")]
    pub project_root: Option<PathBuf>,

    /// Path to write the finished index to.
    #[arg(long = "output")]
    pub output: Option<PathBuf>,

    /// Reuse the branch cache and changed-file diff instead of a full
    /// rebuild when possible.
    #[arg(long = "incremental")]
    pub incremental: bool,

    /// Skip the fast-path and incremental checks; always fully rebuild.
    #[arg(long = "force")]
    pub force: bool,

    /// Restrict collection to these modules (repeatable; default: all).
    #[arg(long = "module")]
    pub modules: Vec<String>,

    /// Disable one-line source snippets on occurrences.
    #[arg(long = "no-include-snippets")]
    pub no_include_snippets: bool,

    /// Emit the legacy single-file JSON format instead of the
    /// relational database.
    #[arg(long = "json")]
    pub json: bool,

    /// Print progress to stderr as the run proceeds.
    #[arg(long = "verbose")]
    pub verbose: bool,
}

/// Arguments for the `status` subcommand.
#[derive(Args, Debug, Default)]
pub struct StatusArgs {
    /// Root of the source project to report on.
    #[arg(long = "project-root")]
    pub project_root: Option<PathBuf>,

    /// Print the resolved paths used to answer the report.
    #[arg(long = "verbose")]
    pub verbose: bool,
}

/// Arguments for the `cache` subcommand.
#[derive(Args, Debug)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommand,
}

#[derive(Subcommand, Debug)]
pub enum CacheCommand {
    /// Remove one or all branch caches.
    Clean(CacheCleanArgs),
    /// List the branches with a cache on disk.
    List(CacheListArgs),
}

#[derive(Args, Debug, Default)]
pub struct CacheCleanArgs {
    /// Root of the source project whose caches should be cleaned.
    #[arg(long = "project-root")]
    pub project_root: Option<PathBuf>,

    /// Clean only this branch's cache.
    #[arg(long = "branch")]
    pub branch: Option<String>,

    /// Clean every cached branch.
    #[arg(long = "all")]
    pub all: bool,
}

#[derive(Args, Debug, Default)]
pub struct CacheListArgs {
    /// Root of the source project to list branch caches for.
    #[arg(long = "project-root")]
    pub project_root: Option<PathBuf>,
}

/// Arguments for the standalone `migrate` subcommand.
#[derive(Args, Debug, Default)]
pub struct MigrateArgs {
    /// Root of the source project to migrate legacy state for.
    #[arg(long = "project-root")]
    pub project_root: Option<PathBuf>,

    #[arg(long = "verbose")]
    pub verbose: bool,
}
