//! Index-Store Reader: streams symbols, occurrences, and
//! relationships out of the compiler's raw index store.

pub mod library;
pub mod records;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::{Result, ScipIndexError};
use crate::snippet::SnippetExtractor;
use crate::storage::models::{OccurrenceRecord, RelationshipKind, RelationshipRecord, SourceRange, SymbolRecord};
use crate::symbol::{build_symbol_id, SymbolInput, SymbolKind};
use library::{DylibIndexStoreLibrary, IndexStoreLibrary};
use records::{map_compiler_kind, relation_roles, RawOccurrence, RawRelation};

const SWIFT_USR_PREFIX: &str = "s:";
const SOURCE_EXTENSION: &str = ".swift";

pub struct IndexStoreReader {
    library: Box<dyn IndexStoreLibrary>,
    project_root: PathBuf,
    include_snippets: bool,
    module_filter: Vec<String>,
    snippets: SnippetExtractor,
}

impl IndexStoreReader {
    /// Locate the data store under `derived_data_root`, preferring the
    /// newer `Index.noindex/DataStore` layout, then load the native
    /// reading library.
    pub fn open(derived_data_root: &Path, project_root: &Path, include_snippets: bool) -> Result<Self> {
        let candidates = [
            derived_data_root.join("Index.noindex").join("DataStore"),
            derived_data_root.join("Index").join("DataStore"),
        ];

        let data_store = candidates
            .iter()
            .find(|p| p.exists())
            .ok_or_else(|| ScipIndexError::IndexStoreNotFound {
                derived_data: derived_data_root.to_path_buf(),
                searched: candidates.to_vec(),
            })?;

        let library = DylibIndexStoreLibrary::load(&library::default_library_candidates(), data_store)?;

        Ok(Self {
            library: Box::new(library),
            project_root: project_root.to_path_buf(),
            include_snippets,
            module_filter: Vec::new(),
            snippets: SnippetExtractor::new(),
        })
    }

    /// Construct directly from an already-resolved library, e.g. the
    /// in-process test fixture (bypasses path discovery and `dlopen`).
    pub fn with_library(
        library: Box<dyn IndexStoreLibrary>,
        project_root: &Path,
        include_snippets: bool,
    ) -> Self {
        Self {
            library,
            project_root: project_root.to_path_buf(),
            include_snippets,
            module_filter: Vec::new(),
            snippets: SnippetExtractor::new(),
        }
    }

    /// Restrict all three producers to symbols whose resolved module
    /// is in `modules` (empty ⇒ no filtering).
    pub fn with_module_filter(mut self, modules: Vec<String>) -> Self {
        self.module_filter = modules;
        self
    }

    fn module_allowed(&self, module: Option<&str>) -> bool {
        if self.module_filter.is_empty() {
            return true;
        }
        match module {
            Some(m) => self.module_filter.iter().any(|allowed| allowed == m),
            None => false,
        }
    }

    /// Walk every canonical occurrence, deduplicate by USR, and build
    /// one `SymbolRecord` per USR.
    pub fn collect_symbols(&self) -> Result<Vec<SymbolRecord>> {
        let raws = self.library.canonical_occurrences()?;
        let mut seen = HashSet::new();
        let mut symbols = Vec::new();

        for raw in raws {
            if !seen.insert(raw.usr.clone()) {
                continue;
            }

            let kind = map_compiler_kind(raw.kind);
            let module = extract_module_from_usr(&raw.usr);
            if !self.module_allowed(module.as_deref()) {
                continue;
            }
            let container = child_of_container(&raw.relations);

            let symbol_id = build_symbol_id(&SymbolInput {
                usr: &raw.usr,
                name: &raw.name,
                kind,
                module: module.as_deref(),
                container: container.as_deref(),
            });

            symbols.push(SymbolRecord {
                symbol_id,
                kind,
                module,
                documentation: Vec::new(),
            });
        }

        Ok(symbols)
    }

    /// Inherits/overrides edges inline on the same canonical-occurrence
    /// walk.
    pub fn collect_relationships(&self) -> Result<Vec<RelationshipRecord>> {
        let raws = self.library.canonical_occurrences()?;
        let mut relationships = Vec::new();

        for raw in &raws {
            let module = extract_module_from_usr(&raw.usr);
            if !self.module_allowed(module.as_deref()) {
                continue;
            }
            let kind = map_compiler_kind(raw.kind);
            let container = child_of_container(&raw.relations);
            let symbol_id = build_symbol_id(&SymbolInput {
                usr: &raw.usr,
                name: &raw.name,
                kind,
                module: module.as_deref(),
                container: container.as_deref(),
            });

            for relation in &raw.relations {
                let relationship_kind = if relation_roles::has(relation.roles, relation_roles::BASE_OF) {
                    Some(RelationshipKind::Inherits)
                } else if relation_roles::has(relation.roles, relation_roles::OVERRIDE_OF) {
                    Some(RelationshipKind::Overrides)
                } else {
                    None
                };

                if let Some(kind) = relationship_kind {
                    let target_module = extract_module_from_usr(&relation.symbol_usr);
                    let target_id = build_symbol_id(&SymbolInput {
                        usr: &relation.symbol_usr,
                        name: &relation.symbol_name,
                        kind: SymbolKind::Unknown,
                        module: target_module.as_deref(),
                        container: None,
                    });
                    relationships.push(RelationshipRecord {
                        symbol_id: symbol_id.clone(),
                        target_symbol_id: target_id,
                        kind,
                    });
                }
            }
        }

        Ok(relationships)
    }

    /// Two-pass occurrence harvest: first the live USR set from
    /// canonical occurrences, then every occurrence at any role for
    /// each USR.
    pub fn collect_occurrences(&self, filter: Option<&HashSet<String>>) -> Result<Vec<OccurrenceRecord>> {
        let canonical = self.library.canonical_occurrences()?;
        let mut usrs: Vec<String> = Vec::new();
        let mut seen = HashSet::new();
        for raw in &canonical {
            if seen.insert(raw.usr.clone()) {
                usrs.push(raw.usr.clone());
            }
        }

        let mut occurrences = Vec::new();

        for usr in &usrs {
            let raws = match self.library.occurrences_for_usr(usr) {
                Ok(raws) => raws,
                // Per-USR failures are skipped, never fatal.
                Err(_) => continue,
            };

            for raw in raws {
                if let Some(record) = self.normalize_occurrence(&raw, filter) {
                    occurrences.push(record);
                }
            }
        }

        Ok(occurrences)
    }

    fn normalize_occurrence(
        &self,
        raw: &RawOccurrence,
        filter: Option<&HashSet<String>>,
    ) -> Option<OccurrenceRecord> {
        let module = extract_module_from_usr(&raw.usr);
        if !self.module_allowed(module.as_deref()) {
            return None;
        }

        let path = self.project_relative_path(&raw.absolute_path);
        if !path.ends_with(SOURCE_EXTENSION) {
            return None;
        }
        if let Some(whitelist) = filter {
            if !whitelist.contains(&path) {
                return None;
            }
        }

        let start_line = raw.line.saturating_sub(1);
        let start_col = raw.utf8_column.saturating_sub(1);
        let end_col = start_col + raw.name.as_bytes().len() as u32;
        let range = SourceRange::new(start_line, start_col, start_line, end_col);

        let kind = map_compiler_kind(raw.kind);
        let container = child_of_container(&raw.relations);
        let symbol_id = build_symbol_id(&SymbolInput {
            usr: &raw.usr,
            name: &raw.name,
            kind,
            module: module.as_deref(),
            container: container.as_deref(),
        });

        let enclosing = raw
            .relations
            .iter()
            .find(|r| relation_roles::has(r.roles, relation_roles::CHILD_OF))
            .map(|r| {
                let enclosing_module = extract_module_from_usr(&r.symbol_usr);
                build_symbol_id(&SymbolInput {
                    usr: &r.symbol_usr,
                    name: &r.symbol_name,
                    kind: SymbolKind::Unknown,
                    module: enclosing_module.as_deref(),
                    container: None,
                })
            });

        let snippet = if self.include_snippets {
            self.snippets.line(Path::new(&raw.absolute_path), raw.line)
        } else {
            None
        };

        Some(OccurrenceRecord {
            path,
            symbol_id,
            range,
            roles: raw.roles,
            snippet,
            enclosing_symbol_id: enclosing,
        })
    }

    /// Strip the project-root prefix; occurrences outside the project
    /// root are kept with their absolute path (callers decide policy).
    fn project_relative_path(&self, absolute_path: &str) -> String {
        let abs = Path::new(absolute_path);
        match abs.strip_prefix(&self.project_root) {
            Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
            Err(_) => absolute_path.to_string(),
        }
    }
}

/// First `child-of` relation's symbol name, used both as the
/// container in a symbol's own descriptor and, separately, as the
/// enclosing symbol on occurrences.
fn child_of_container(relations: &[RawRelation]) -> Option<String> {
    relations
        .iter()
        .find(|r| relation_roles::has(r.roles, relation_roles::CHILD_OF))
        .map(|r| r.symbol_name.clone())
}

/// Extract the module name out of a mangled Swift USR by reading the
/// length-prefixed name following `"s:"`. This is a heuristic, not a
/// demangler, and it's fragile for nested/extension contexts; callers
/// should tolerate an absent or incorrect module for a small tail of
/// symbols.
pub fn extract_module_from_usr(usr: &str) -> Option<String> {
    let rest = usr.strip_prefix(SWIFT_USR_PREFIX)?;
    let digit_end = rest.find(|c: char| !c.is_ascii_digit())?;
    if digit_end == 0 {
        return None;
    }
    let length: usize = rest[..digit_end].parse().ok()?;
    let start = digit_end;
    let end = start.checked_add(length)?;
    rest.get(start..end).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::library::fixture::FixtureIndexStoreLibrary;
    use crate::store::records::CompilerSymbolKind;
    use crate::storage::models::roles;

    fn raw(usr: &str, name: &str, kind: CompilerSymbolKind, path: &str, line: u32, col: u32, roles: u32) -> RawOccurrence {
        RawOccurrence {
            usr: usr.to_string(),
            name: name.to_string(),
            kind,
            absolute_path: path.to_string(),
            line,
            utf8_column: col,
            roles,
            relations: Vec::new(),
        }
    }

    #[test]
    fn module_extraction_reads_length_prefixed_name() {
        assert_eq!(
            extract_module_from_usr("s:8MyModule7MyClassC"),
            Some("MyModule".to_string())
        );
    }

    #[test]
    fn module_extraction_fails_on_non_swift_usr() {
        assert_eq!(extract_module_from_usr("c:objc(cs)NSObject"), None);
    }

    #[test]
    fn collect_symbols_deduplicates_by_usr() {
        let library = FixtureIndexStoreLibrary {
            occurrences: vec![
                raw(
                    "s:8MyModule7MyClassC",
                    "MyClass",
                    CompilerSymbolKind::Class,
                    "/proj/Sources/MyClass.swift",
                    10,
                    7,
                    roles::DEFINITION,
                ),
                raw(
                    "s:8MyModule7MyClassC",
                    "MyClass",
                    CompilerSymbolKind::Class,
                    "/proj/Sources/MyClass.swift",
                    10,
                    7,
                    roles::DEFINITION,
                ),
            ],
        };
        let reader = IndexStoreReader::with_library(Box::new(library), Path::new("/proj"), false);
        let symbols = reader.collect_symbols().unwrap();
        assert_eq!(symbols.len(), 1);
        assert_eq!(symbols[0].symbol_id, "swift MyModule MyClass#");
    }

    #[test]
    fn collect_occurrences_strips_project_root_and_converts_to_zero_indexed() {
        let library = FixtureIndexStoreLibrary {
            occurrences: vec![raw(
                "s:8MyModule7MyClassC",
                "MyClass",
                CompilerSymbolKind::Class,
                "/proj/Sources/MyClass.swift",
                10,
                7,
                roles::DEFINITION,
            )],
        };
        let reader = IndexStoreReader::with_library(Box::new(library), Path::new("/proj"), false);
        let occurrences = reader.collect_occurrences(None).unwrap();
        assert_eq!(occurrences.len(), 1);
        assert_eq!(occurrences[0].path, "Sources/MyClass.swift");
        assert_eq!(occurrences[0].range.start_line, 9);
        assert_eq!(occurrences[0].range.start_col, 6);
        assert_eq!(occurrences[0].range.end_col, 6 + "MyClass".len() as u32);
    }

    #[test]
    fn collect_occurrences_drops_non_source_extensions() {
        let library = FixtureIndexStoreLibrary {
            occurrences: vec![raw(
                "s:8MyModule7MyClassC",
                "MyClass",
                CompilerSymbolKind::Class,
                "/proj/Sources/Generated.h",
                1,
                1,
                roles::DEFINITION,
            )],
        };
        let reader = IndexStoreReader::with_library(Box::new(library), Path::new("/proj"), false);
        assert!(reader.collect_occurrences(None).unwrap().is_empty());
    }

    #[test]
    fn collect_occurrences_honors_whitelist_filter() {
        let library = FixtureIndexStoreLibrary {
            occurrences: vec![
                raw(
                    "s:8MyModule7MyClassC",
                    "MyClass",
                    CompilerSymbolKind::Class,
                    "/proj/Sources/A.swift",
                    1,
                    1,
                    roles::DEFINITION,
                ),
                raw(
                    "s:8MyModule1BC",
                    "B",
                    CompilerSymbolKind::Class,
                    "/proj/Sources/B.swift",
                    1,
                    1,
                    roles::DEFINITION,
                ),
            ],
        };
        let reader = IndexStoreReader::with_library(Box::new(library), Path::new("/proj"), false);
        let mut whitelist = HashSet::new();
        whitelist.insert("Sources/A.swift".to_string());
        let occurrences = reader.collect_occurrences(Some(&whitelist)).unwrap();
        assert_eq!(occurrences.len(), 1);
        assert_eq!(occurrences[0].path, "Sources/A.swift");
    }

    #[test]
    fn collect_relationships_maps_base_of_and_override_of() {
        let mut defining = raw(
            "s:8MyModule9SubClassC",
            "SubClass",
            CompilerSymbolKind::Class,
            "/proj/Sources/SubClass.swift",
            1,
            1,
            roles::DEFINITION,
        );
        defining.relations = vec![RawRelation {
            roles: relation_roles::BASE_OF,
            symbol_usr: "s:8MyModule8BaseCls".to_string(),
            symbol_name: "BaseClass".to_string(),
        }];

        let library = FixtureIndexStoreLibrary {
            occurrences: vec![defining],
        };
        let reader = IndexStoreReader::with_library(Box::new(library), Path::new("/proj"), false);
        let relationships = reader.collect_relationships().unwrap();
        assert_eq!(relationships.len(), 1);
        assert_eq!(relationships[0].kind, RelationshipKind::Inherits);
        assert_eq!(relationships[0].symbol_id, "swift MyModule SubClass#");
    }

    #[test]
    fn module_filter_excludes_other_modules() {
        let library = FixtureIndexStoreLibrary {
            occurrences: vec![raw(
                "s:8MyModule7MyClassC",
                "MyClass",
                CompilerSymbolKind::Class,
                "/proj/Sources/MyClass.swift",
                1,
                1,
                roles::DEFINITION,
            )],
        };
        let reader = IndexStoreReader::with_library(Box::new(library), Path::new("/proj"), false)
            .with_module_filter(vec!["OtherModule".to_string()]);
        assert!(reader.collect_symbols().unwrap().is_empty());
    }
}
