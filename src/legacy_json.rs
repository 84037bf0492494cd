//! Legacy JSON emitter: a trivial second back-end behind the same
//! data model, predating the relational store.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::storage::models::{OccurrenceRecord, RelationshipKind, RelationshipRecord, SymbolRecord};

#[derive(Debug, Serialize)]
pub struct LegacyIndex {
    pub metadata: LegacyMetadata,
    pub documents: Vec<LegacyDocument>,
}

#[derive(Debug, Serialize)]
pub struct LegacyMetadata {
    pub version: u32,
    #[serde(rename = "toolInfo")]
    pub tool_info: LegacyToolInfo,
    #[serde(rename = "projectRoot")]
    pub project_root: String,
    #[serde(rename = "textDocumentEncoding")]
    pub text_document_encoding: String,
}

#[derive(Debug, Serialize)]
pub struct LegacyToolInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct LegacyDocument {
    #[serde(rename = "relativePath")]
    pub relative_path: String,
    pub language: &'static str,
    pub symbols: Vec<LegacySymbol>,
    pub occurrences: Vec<LegacyOccurrence>,
}

#[derive(Debug, Serialize)]
pub struct LegacySymbol {
    pub symbol: String,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documentation: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relationships: Option<Vec<LegacyRelationship>>,
}

#[derive(Debug, Serialize)]
pub struct LegacyRelationship {
    pub symbol: String,
    #[serde(skip_serializing_if = "Option::is_none", rename = "isImplementation")]
    pub is_implementation: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "isTypeDefinition")]
    pub is_type_definition: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct LegacyOccurrence {
    pub symbol: String,
    pub range: Vec<i64>,
    #[serde(rename = "symbolRoles")]
    pub symbol_roles: u32,
    #[serde(skip_serializing_if = "Option::is_none", rename = "enclosingSymbol")]
    pub enclosing_symbol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

/// Assemble a `LegacyIndex`, grouping occurrences by document and
/// sorting documents by relative path for reproducible output.
pub fn build_legacy_index(
    symbols: &[SymbolRecord],
    occurrences: &[OccurrenceRecord],
    relationships: &[RelationshipRecord],
    project_root_uri: String,
) -> LegacyIndex {
    let mut relationships_by_symbol: BTreeMap<&str, Vec<LegacyRelationship>> = BTreeMap::new();
    for relationship in relationships {
        let entry = relationships_by_symbol
            .entry(relationship.symbol_id.as_str())
            .or_default();
        entry.push(legacy_relationship(relationship));
    }

    let mut symbols_by_id: BTreeMap<&str, &SymbolRecord> = BTreeMap::new();
    for symbol in symbols {
        symbols_by_id.insert(symbol.symbol_id.as_str(), symbol);
    }

    let mut occurrences_by_path: BTreeMap<&str, Vec<&OccurrenceRecord>> = BTreeMap::new();
    for occurrence in occurrences {
        occurrences_by_path
            .entry(occurrence.path.as_str())
            .or_default()
            .push(occurrence);
    }

    let mut documents = Vec::new();
    for (path, path_occurrences) in &occurrences_by_path {
        let mut defining_ids: Vec<&str> = path_occurrences
            .iter()
            .filter(|o| crate::storage::models::roles::has(o.roles, crate::storage::models::roles::DEFINITION))
            .map(|o| o.symbol_id.as_str())
            .collect();
        defining_ids.sort_unstable();
        defining_ids.dedup();

        let legacy_symbols = defining_ids
            .iter()
            .filter_map(|id| symbols_by_id.get(id))
            .map(|symbol| legacy_symbol(symbol, relationships_by_symbol.get(symbol.symbol_id.as_str())))
            .collect();

        let legacy_occurrences = path_occurrences.iter().map(|o| legacy_occurrence(o)).collect();

        documents.push(LegacyDocument {
            relative_path: path.to_string(),
            language: "swift",
            symbols: legacy_symbols,
            occurrences: legacy_occurrences,
        });
    }

    LegacyIndex {
        metadata: LegacyMetadata {
            version: 1,
            tool_info: LegacyToolInfo {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            project_root: project_root_uri,
            text_document_encoding: "UTF-8".to_string(),
        },
        documents,
    }
}

fn legacy_relationship(relationship: &RelationshipRecord) -> LegacyRelationship {
    let (is_implementation, is_type_definition) = match relationship.kind {
        RelationshipKind::Conforms | RelationshipKind::Overrides => (Some(true), None),
        RelationshipKind::Inherits => (None, Some(true)),
    };
    LegacyRelationship {
        symbol: relationship.target_symbol_id.clone(),
        is_implementation,
        is_type_definition,
    }
}

fn legacy_symbol(symbol: &SymbolRecord, relationships: Option<&Vec<LegacyRelationship>>) -> LegacySymbol {
    LegacySymbol {
        symbol: symbol.symbol_id.clone(),
        kind: symbol.kind.as_str(),
        documentation: if symbol.documentation.is_empty() {
            None
        } else {
            Some(symbol.documentation.clone())
        },
        relationships: relationships.map(|rs| {
            rs.iter()
                .map(|r| LegacyRelationship {
                    symbol: r.symbol.clone(),
                    is_implementation: r.is_implementation,
                    is_type_definition: r.is_type_definition,
                })
                .collect()
        }),
    }
}

fn legacy_occurrence(occurrence: &OccurrenceRecord) -> LegacyOccurrence {
    LegacyOccurrence {
        symbol: occurrence.symbol_id.clone(),
        range: occurrence.range.scip(),
        symbol_roles: occurrence.roles,
        enclosing_symbol: occurrence.enclosing_symbol_id.clone(),
        snippet: occurrence.snippet.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::models::{roles, SourceRange};
    use crate::symbol::SymbolKind;

    #[test]
    fn documents_are_sorted_by_relative_path() {
        let symbols = vec![];
        let occurrences = vec![
            OccurrenceRecord {
                path: "Z.swift".to_string(),
                symbol_id: "swift M Z#".to_string(),
                range: SourceRange::new(0, 0, 0, 1),
                roles: roles::DEFINITION,
                snippet: None,
                enclosing_symbol_id: None,
            },
            OccurrenceRecord {
                path: "A.swift".to_string(),
                symbol_id: "swift M A#".to_string(),
                range: SourceRange::new(0, 0, 0, 1),
                roles: roles::DEFINITION,
                snippet: None,
                enclosing_symbol_id: None,
            },
        ];
        let index = build_legacy_index(&symbols, &occurrences, &[], "file:///proj".to_string());
        let paths: Vec<&str> = index.documents.iter().map(|d| d.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["A.swift", "Z.swift"]);
    }

    #[test]
    fn inherits_maps_to_type_definition_and_overrides_to_implementation() {
        let symbols = vec![SymbolRecord {
            symbol_id: "swift M Sub#".to_string(),
            kind: SymbolKind::Class,
            module: Some("M".to_string()),
            documentation: vec![],
        }];
        let occurrences = vec![OccurrenceRecord {
            path: "Sub.swift".to_string(),
            symbol_id: "swift M Sub#".to_string(),
            range: SourceRange::new(0, 0, 0, 1),
            roles: roles::DEFINITION,
            snippet: None,
            enclosing_symbol_id: None,
        }];
        let relationships = vec![
            RelationshipRecord {
                symbol_id: "swift M Sub#".to_string(),
                target_symbol_id: "swift M Base#".to_string(),
                kind: RelationshipKind::Inherits,
            },
            RelationshipRecord {
                symbol_id: "swift M Sub#".to_string(),
                target_symbol_id: "swift M Proto#".to_string(),
                kind: RelationshipKind::Conforms,
            },
        ];
        let index = build_legacy_index(&symbols, &occurrences, &relationships, "file:///proj".to_string());
        let symbol = &index.documents[0].symbols[0];
        let relationships = symbol.relationships.as_ref().unwrap();
        assert!(relationships.iter().any(|r| r.is_type_definition == Some(true)));
        assert!(relationships.iter().any(|r| r.is_implementation == Some(true)));
    }
}
