//! Storage Engine: the persistent relational store of documents,
//! symbols, occurrences, and relationships.

pub mod models;
mod schema;

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection, OpenFlags, OptionalExtension};

use crate::error::{Result, ScipIndexError};

pub use models::{
    roles, DocumentRecord, IndexState, Metadata, OccurrenceRecord, RelationshipKind,
    RelationshipRecord, SourceRange, SymbolRecord,
};

#[cfg(test)]
mod timestamp_tests {
    use super::format_timestamp_iso8601;

    #[test]
    fn formats_a_known_instant() {
        let formatted = format_timestamp_iso8601(0).unwrap();
        assert!(formatted.starts_with("1970-01-01"));
    }
}

/// ~80 MiB, expressed in KiB as SQLite's `cache_size` pragma expects
/// when negative.
const CACHE_SIZE_KIB: i64 = -80_000;

pub struct StorageEngine {
    path: PathBuf,
    conn: Connection,
}

impl StorageEngine {
    /// Open (creating if absent) for read-write use.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_flags(path, false)
    }

    /// Open for read-only use; fails if the file does not exist.
    pub fn open_read_only(path: &Path) -> Result<Self> {
        Self::open_with_flags(path, true)
    }

    fn open_with_flags(path: &Path, read_only: bool) -> Result<Self> {
        if read_only && !path.exists() {
            return Err(ScipIndexError::OpenFailed {
                path: path.to_path_buf(),
                source: rusqlite::Error::QueryReturnedNoRows,
            });
        }

        if !read_only {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }

        let flags = if read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
        };

        let conn =
            Connection::open_with_flags(path, flags).map_err(|source| ScipIndexError::OpenFailed {
                path: path.to_path_buf(),
                source,
            })?;

        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(ScipIndexError::StatementExecution)?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(ScipIndexError::StatementExecution)?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(ScipIndexError::StatementExecution)?;
        conn.pragma_update(None, "cache_size", CACHE_SIZE_KIB)
            .map_err(ScipIndexError::StatementExecution)?;

        if !read_only {
            conn.execute_batch(schema::SCHEMA_SQL)
                .map_err(ScipIndexError::SchemaCreation)?;
        }

        Ok(Self {
            path: path.to_path_buf(),
            conn,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Full overwrite: the entire store is rebuilt from `symbols` and
    /// `occurrences` within a single transaction.
    pub fn write(
        &mut self,
        symbols: &[SymbolRecord],
        occurrences: &[OccurrenceRecord],
        relationships: &[RelationshipRecord],
        project_root: &str,
    ) -> Result<()> {
        let tx = self
            .conn
            .transaction()
            .map_err(ScipIndexError::StatementExecution)?;

        tx.execute("DELETE FROM occurrences", [])
            .map_err(ScipIndexError::StatementExecution)?;
        tx.execute("DELETE FROM relationships", [])
            .map_err(ScipIndexError::StatementExecution)?;
        tx.execute("DELETE FROM symbols", [])
            .map_err(ScipIndexError::StatementExecution)?;
        tx.execute("DELETE FROM documents", [])
            .map_err(ScipIndexError::StatementExecution)?;

        write_metadata(&tx, project_root)?;

        let by_file = group_occurrences_by_file(occurrences);

        {
            let mut insert_doc = tx
                .prepare(
                    "INSERT INTO documents (rel_path, language, indexed_at) VALUES (?1, ?2, ?3)",
                )
                .map_err(ScipIndexError::StatementPreparation)?;
            let mut insert_symbol = tx
                .prepare(
                    "INSERT INTO symbols (symbol_id, kind, module, doc_json, file_id)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )
                .map_err(ScipIndexError::StatementPreparation)?;
            let mut insert_occurrence = tx
                .prepare(
                    "INSERT INTO occurrences
                        (symbol_id, file_id, start_line, start_col, end_line, end_col, roles, enclosing, snippet)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                )
                .map_err(ScipIndexError::StatementPreparation)?;

            let now = current_epoch_seconds();

            for (path, file_occurrences) in by_file.iter() {
                insert_doc
                    .execute(params![path, language_for_path(path), now as i64])
                    .map_err(ScipIndexError::StatementExecution)?;
                let file_id = tx.last_insert_rowid();

                let defining_ids = definition_symbol_ids(file_occurrences);
                for symbol in symbols.iter().filter(|s| defining_ids.contains(&s.symbol_id)) {
                    insert_symbol_row(&mut insert_symbol, symbol, file_id)?;
                }

                for occurrence in file_occurrences {
                    insert_occurrence_row(&mut insert_occurrence, occurrence, file_id)?;
                }
            }
        }

        {
            let mut insert_rel = tx
                .prepare(
                    "INSERT INTO relationships (symbol_id, target_symbol_id, kind) VALUES (?1, ?2, ?3)",
                )
                .map_err(ScipIndexError::StatementPreparation)?;
            for relationship in relationships {
                insert_rel
                    .execute(params![
                        relationship.symbol_id,
                        relationship.target_symbol_id,
                        relationship.kind.as_str(),
                    ])
                    .map_err(ScipIndexError::StatementExecution)?;
            }
        }

        tx.commit().map_err(ScipIndexError::StatementExecution)?;
        Ok(())
    }

    /// Surgical per-file replacement. Documents not named in `paths`
    /// are untouched; relationships are never touched here.
    pub fn update_documents(
        &mut self,
        paths: &[String],
        symbols: &[SymbolRecord],
        occurrences: &[OccurrenceRecord],
    ) -> Result<()> {
        let tx = self
            .conn
            .transaction()
            .map_err(ScipIndexError::StatementExecution)?;

        let by_file = group_occurrences_by_file(occurrences);
        let now = current_epoch_seconds();

        {
            let mut insert_doc = tx
                .prepare(
                    "INSERT INTO documents (rel_path, language, indexed_at) VALUES (?1, ?2, ?3)",
                )
                .map_err(ScipIndexError::StatementPreparation)?;
            let mut insert_symbol = tx
                .prepare(
                    "INSERT INTO symbols (symbol_id, kind, module, doc_json, file_id)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )
                .map_err(ScipIndexError::StatementPreparation)?;
            let mut insert_occurrence = tx
                .prepare(
                    "INSERT INTO occurrences
                        (symbol_id, file_id, start_line, start_col, end_line, end_col, roles, enclosing, snippet)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                )
                .map_err(ScipIndexError::StatementPreparation)?;

            for path in paths {
                if let Some(file_id) = lookup_document_id(&tx, path)? {
                    tx.execute("DELETE FROM occurrences WHERE file_id = ?1", params![file_id])
                        .map_err(ScipIndexError::StatementExecution)?;
                    tx.execute("DELETE FROM symbols WHERE file_id = ?1", params![file_id])
                        .map_err(ScipIndexError::StatementExecution)?;
                    tx.execute("DELETE FROM documents WHERE id = ?1", params![file_id])
                        .map_err(ScipIndexError::StatementExecution)?;
                }

                let Some(file_occurrences) = by_file.get(path) else {
                    // No occurrences survived collection for this path (e.g. module
                    // filtering dropped everything, or the file no longer has any).
                    // A full rebuild would never create a document here, so neither
                    // does an incremental update.
                    continue;
                };

                insert_doc
                    .execute(params![path, language_for_path(path), now as i64])
                    .map_err(ScipIndexError::StatementExecution)?;
                let file_id = tx.last_insert_rowid();

                let defining_ids = definition_symbol_ids(file_occurrences);
                for symbol in symbols.iter().filter(|s| defining_ids.contains(&s.symbol_id)) {
                    insert_symbol_row(&mut insert_symbol, symbol, file_id)?;
                }

                for occurrence in file_occurrences {
                    insert_occurrence_row(&mut insert_occurrence, occurrence, file_id)?;
                }
            }
        }

        tx.commit().map_err(ScipIndexError::StatementExecution)?;
        Ok(())
    }

    /// Cascade removal of documents (and, via `ON DELETE CASCADE`,
    /// their symbols and occurrences).
    pub fn delete_documents(&mut self, paths: &[String]) -> Result<()> {
        let tx = self
            .conn
            .transaction()
            .map_err(ScipIndexError::StatementExecution)?;

        {
            let mut delete_doc = tx
                .prepare("DELETE FROM documents WHERE rel_path = ?1")
                .map_err(ScipIndexError::StatementPreparation)?;
            for path in paths {
                delete_doc
                    .execute(params![path])
                    .map_err(ScipIndexError::StatementExecution)?;
            }
        }

        tx.commit().map_err(ScipIndexError::StatementExecution)?;
        Ok(())
    }

    /// Replace the singleton Index State row.
    pub fn save_state(&mut self, commit: &str, files: &[String]) -> Result<()> {
        let tx = self
            .conn
            .transaction()
            .map_err(ScipIndexError::StatementExecution)?;

        tx.execute("DELETE FROM index_state", [])
            .map_err(ScipIndexError::StatementExecution)?;

        let files_json = serde_json::to_string(files)?;
        tx.execute(
            "INSERT INTO index_state (commit_hash, ts, files_json) VALUES (?1, ?2, ?3)",
            params![commit, current_epoch_seconds() as i64, files_json],
        )
        .map_err(ScipIndexError::StatementExecution)?;

        tx.commit().map_err(ScipIndexError::StatementExecution)?;
        Ok(())
    }

    pub fn load_state(&self) -> Result<Option<IndexState>> {
        let mut stmt = self
            .conn
            .prepare("SELECT commit_hash, ts, files_json FROM index_state LIMIT 1")
            .map_err(ScipIndexError::StatementPreparation)?;

        let row = stmt
            .query_row([], |row| {
                let commit: String = row.get(0)?;
                let ts: i64 = row.get(1)?;
                let files_json: String = row.get(2)?;
                Ok((commit, ts, files_json))
            })
            .optional()
            .map_err(ScipIndexError::StatementExecution)?;

        let Some((commit, ts, files_json)) = row else {
            return Ok(None);
        };

        let files: Vec<String> = serde_json::from_str(&files_json)?;

        Ok(Some(IndexState {
            commit,
            indexed_at: ts as u64,
            files,
        }))
    }

    /// Document paths, sorted.
    pub fn get_indexed_file_paths(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT rel_path FROM documents ORDER BY rel_path ASC")
            .map_err(ScipIndexError::StatementPreparation)?;

        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(ScipIndexError::StatementExecution)?;

        let mut paths = Vec::new();
        for row in rows {
            paths.push(row.map_err(ScipIndexError::StatementExecution)?);
        }
        Ok(paths)
    }
}

fn write_metadata(tx: &rusqlite::Transaction<'_>, project_root: &str) -> Result<()> {
    let metadata = Metadata::new(format!("file://{project_root}"));

    tx.execute("DELETE FROM metadata", [])
        .map_err(ScipIndexError::StatementExecution)?;

    let mut stmt = tx
        .prepare("INSERT INTO metadata (key, value) VALUES (?1, ?2)")
        .map_err(ScipIndexError::StatementPreparation)?;

    let rows = [
        ("version", metadata.version.to_string()),
        ("tool_name", metadata.tool_name.clone()),
        ("tool_version", metadata.tool_version.clone()),
        ("project_root_uri", metadata.project_root_uri.clone()),
        ("text_encoding", metadata.text_encoding.clone()),
    ];

    for (key, value) in rows {
        stmt.execute(params![key, value])
            .map_err(ScipIndexError::StatementExecution)?;
    }

    Ok(())
}

fn insert_symbol_row(
    stmt: &mut rusqlite::Statement<'_>,
    symbol: &SymbolRecord,
    file_id: i64,
) -> Result<()> {
    let doc_json = serde_json::to_string(&symbol.documentation)?;
    stmt.execute(params![
        symbol.symbol_id,
        symbol.kind.as_str(),
        symbol.module,
        doc_json,
        file_id,
    ])
    .map_err(ScipIndexError::StatementExecution)?;
    Ok(())
}

fn insert_occurrence_row(
    stmt: &mut rusqlite::Statement<'_>,
    occurrence: &OccurrenceRecord,
    file_id: i64,
) -> Result<()> {
    stmt.execute(params![
        occurrence.symbol_id,
        file_id,
        occurrence.range.start_line,
        occurrence.range.start_col,
        occurrence.range.end_line,
        occurrence.range.end_col,
        occurrence.roles,
        occurrence.enclosing_symbol_id,
        occurrence.snippet,
    ])
    .map_err(ScipIndexError::StatementExecution)?;
    Ok(())
}

fn lookup_document_id(tx: &rusqlite::Transaction<'_>, path: &str) -> Result<Option<i64>> {
    tx.query_row(
        "SELECT id FROM documents WHERE rel_path = ?1",
        params![path],
        |row| row.get(0),
    )
    .optional()
    .map_err(ScipIndexError::StatementExecution)
}

/// Occurrences grouped by containing document, preserving the order
/// documents are first observed in and the order occurrences within a
/// document appear in the input slice.
struct GroupedOccurrences<'a> {
    order: Vec<String>,
    by_path: BTreeMap<String, Vec<&'a OccurrenceRecord>>,
}

impl<'a> GroupedOccurrences<'a> {
    fn iter(&self) -> impl Iterator<Item = (&String, &Vec<&'a OccurrenceRecord>)> {
        self.order.iter().map(move |path| (path, &self.by_path[path]))
    }

    fn get(&self, path: &str) -> Option<&Vec<&'a OccurrenceRecord>> {
        self.by_path.get(path)
    }
}

fn group_occurrences_by_file(occurrences: &[OccurrenceRecord]) -> GroupedOccurrences<'_> {
    let mut order = Vec::new();
    let mut by_path: BTreeMap<String, Vec<&OccurrenceRecord>> = BTreeMap::new();
    for occurrence in occurrences {
        if !by_path.contains_key(&occurrence.path) {
            order.push(occurrence.path.clone());
        }
        by_path.entry(occurrence.path.clone()).or_default().push(occurrence);
    }
    GroupedOccurrences { order, by_path }
}

fn definition_symbol_ids(occurrences: &[&OccurrenceRecord]) -> HashSet<String> {
    occurrences
        .iter()
        .filter(|o| roles::has(o.roles, roles::DEFINITION))
        .map(|o| o.symbol_id.clone())
        .collect()
}

/// Best-effort language tag for a project-relative path. Swift is the
/// only language the Index-Store Reader ever observes directly, but
/// non-Swift paths (e.g. generated Obj-C headers swept in by the
/// store) are tagged generically rather than guessed at.
fn language_for_path(path: &str) -> &'static str {
    if path.ends_with(".swift") {
        "swift"
    } else {
        "unknown"
    }
}

fn current_epoch_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Render a Unix timestamp as RFC3339 for human-facing output (e.g. the
/// `status` subcommand's "cached at" line); falls back to the raw
/// `OffsetDateTime` debug form if formatting fails.
pub fn format_timestamp_iso8601(secs: u64) -> Option<String> {
    use time::{format_description::well_known::Rfc3339, OffsetDateTime};

    let dt = OffsetDateTime::from_unix_timestamp(secs as i64).ok()?;
    Some(dt.format(&Rfc3339).unwrap_or_else(|_| dt.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::SymbolKind;
    use tempfile::tempdir;

    fn sample_symbol(id: &str) -> SymbolRecord {
        SymbolRecord {
            symbol_id: id.to_string(),
            kind: SymbolKind::Class,
            module: Some("MyModule".to_string()),
            documentation: vec![],
        }
    }

    fn sample_occurrence(path: &str, id: &str, def: bool) -> OccurrenceRecord {
        OccurrenceRecord {
            path: path.to_string(),
            symbol_id: id.to_string(),
            range: SourceRange::new(1, 0, 1, 7),
            roles: if def { roles::DEFINITION } else { roles::REFERENCE },
            snippet: None,
            enclosing_symbol_id: None,
        }
    }

    #[test]
    fn write_then_read_back_documents_and_symbols() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("index.db");
        let mut engine = StorageEngine::open(&db_path).unwrap();

        let symbols = vec![sample_symbol("swift MyModule MyClass#")];
        let occurrences = vec![sample_occurrence(
            "Sources/MyClass.swift",
            "swift MyModule MyClass#",
            true,
        )];

        engine.write(&symbols, &occurrences, &[], "/proj").unwrap();

        let paths = engine.get_indexed_file_paths().unwrap();
        assert_eq!(paths, vec!["Sources/MyClass.swift".to_string()]);
    }

    #[test]
    fn symbols_without_a_definition_occurrence_in_file_are_dropped() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("index.db");
        let mut engine = StorageEngine::open(&db_path).unwrap();

        let symbols = vec![sample_symbol("swift MyModule Other#")];
        let occurrences = vec![sample_occurrence(
            "Sources/MyClass.swift",
            "swift MyModule MyClass#",
            false,
        )];

        engine.write(&symbols, &occurrences, &[], "/proj").unwrap();

        let conn_check = Connection::open(&db_path).unwrap();
        let count: i64 = conn_check
            .query_row("SELECT COUNT(*) FROM symbols", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn delete_documents_cascades_to_symbols_and_occurrences() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("index.db");
        let mut engine = StorageEngine::open(&db_path).unwrap();

        let symbols = vec![sample_symbol("swift MyModule MyClass#")];
        let occurrences = vec![sample_occurrence(
            "Sources/MyClass.swift",
            "swift MyModule MyClass#",
            true,
        )];
        engine.write(&symbols, &occurrences, &[], "/proj").unwrap();

        engine
            .delete_documents(&["Sources/MyClass.swift".to_string()])
            .unwrap();

        assert!(engine.get_indexed_file_paths().unwrap().is_empty());

        let count: i64 = engine
            .conn
            .query_row("SELECT COUNT(*) FROM occurrences", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
        let symbol_count: i64 = engine
            .conn
            .query_row("SELECT COUNT(*) FROM symbols", [], |r| r.get(0))
            .unwrap();
        assert_eq!(symbol_count, 0);
    }

    #[test]
    fn state_round_trips() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("index.db");
        let mut engine = StorageEngine::open(&db_path).unwrap();

        engine
            .save_state("abc123", &["a.swift".to_string(), "b.swift".to_string()])
            .unwrap();

        let state = engine.load_state().unwrap().expect("state present");
        assert_eq!(state.commit, "abc123");
        let mut files = state.files;
        files.sort();
        assert_eq!(files, vec!["a.swift".to_string(), "b.swift".to_string()]);
    }

    #[test]
    fn at_most_one_state_row_after_repeated_saves() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("index.db");
        let mut engine = StorageEngine::open(&db_path).unwrap();

        engine.save_state("first", &[]).unwrap();
        engine.save_state("second", &["x.swift".to_string()]).unwrap();

        let count: i64 = engine
            .conn
            .query_row("SELECT COUNT(*) FROM index_state", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);

        let state = engine.load_state().unwrap().unwrap();
        assert_eq!(state.commit, "second");
    }

    #[test]
    fn incremental_update_replaces_only_named_documents() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("index.db");
        let mut engine = StorageEngine::open(&db_path).unwrap();

        let symbols = vec![
            sample_symbol("swift MyModule A#"),
            sample_symbol("swift MyModule B#"),
        ];
        let occurrences = vec![
            sample_occurrence("A.swift", "swift MyModule A#", true),
            sample_occurrence("B.swift", "swift MyModule B#", true),
        ];
        engine.write(&symbols, &occurrences, &[], "/proj").unwrap();

        let updated_symbols = vec![sample_symbol("swift MyModule A2#")];
        let updated_occurrences =
            vec![sample_occurrence("A.swift", "swift MyModule A2#", true)];
        engine
            .update_documents(
                &["A.swift".to_string()],
                &updated_symbols,
                &updated_occurrences,
            )
            .unwrap();

        let mut paths = engine.get_indexed_file_paths().unwrap();
        paths.sort();
        assert_eq!(paths, vec!["A.swift".to_string(), "B.swift".to_string()]);

        let symbol_ids: Vec<String> = engine
            .conn
            .prepare("SELECT symbol_id FROM symbols ORDER BY symbol_id")
            .unwrap()
            .query_map([], |r| r.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(
            symbol_ids,
            vec!["swift MyModule A2#".to_string(), "swift MyModule B#".to_string()]
        );
    }

    #[test]
    fn incremental_update_creates_no_document_for_a_path_with_no_surviving_occurrences() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("index.db");
        let mut engine = StorageEngine::open(&db_path).unwrap();

        let symbols = vec![sample_symbol("swift MyModule A#")];
        let occurrences = vec![sample_occurrence("A.swift", "swift MyModule A#", true)];
        engine.write(&symbols, &occurrences, &[], "/proj").unwrap();

        // A.swift changed but collected zero occurrences this run (e.g. it was
        // reduced to comments, or every symbol in it was module-filtered out).
        engine
            .update_documents(&["A.swift".to_string()], &[], &[])
            .unwrap();

        assert!(engine.get_indexed_file_paths().unwrap().is_empty());
    }
}
