//! Typed error taxonomy for the indexing core.
//!
//! CLI-facing code wraps these in `anyhow::Result`, matching the
//! teacher's CLI layer; everything below the CLI boundary returns
//! `Result<_, ScipIndexError>` so callers can match on error *kind*
//! (e.g. the orchestrator downgrades `NotAGitRepository` to legacy
//! mode instead of propagating it).

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScipIndexError {
    /// Neither `Index.noindex/DataStore` nor `Index/DataStore` exists
    /// under the given derived-data root.
    #[error("index store not found under {derived_data}: searched {searched:?}")]
    IndexStoreNotFound {
        derived_data: PathBuf,
        searched: Vec<PathBuf>,
    },

    /// The native index-reading library could not be located.
    #[error("libIndexStore not found: searched {candidates:?}")]
    LibraryNotFound { candidates: Vec<PathBuf> },

    #[error("failed to create schema: {0}")]
    SchemaCreation(#[source] rusqlite::Error),

    #[error("failed to prepare statement: {0}")]
    StatementPreparation(#[source] rusqlite::Error),

    #[error("failed to execute statement: {0}")]
    StatementExecution(#[source] rusqlite::Error),

    #[error("failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// The VCS command failed because there is no repository.
    #[error("not a git repository: {0}")]
    NotAGitRepository(PathBuf),

    /// A branch cache was expected but not present.
    #[error("no branch cache found for branch '{0}'")]
    CacheNotFound(String),

    /// Non-fatal: the legacy state file could not be read/converted.
    #[error("failed to migrate legacy state: {0}")]
    MigrationFailure(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ScipIndexError>;
