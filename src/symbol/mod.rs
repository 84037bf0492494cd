//! Symbol Builder: derives stable SCIP symbol-ID strings from opaque
//! compiler USRs.
//!
//! The builder is a pure function of its arguments: the same
//! `(usr, name, kind, module, container)` tuple always yields the same
//! symbol-ID string, even across process restarts.

use serde::{Deserialize, Serialize};

/// Swift-USR prefix that gates whether a symbol can be given a stable,
/// exported symbol-ID. Anything else (Objective-C USRs, or a USR with
/// no resolvable module) becomes a `local` symbol.
const SWIFT_USR_PREFIX: &str = "s:";

/// Internal kind enumeration for a definable named entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SymbolKind {
    Class,
    Struct,
    Protocol,
    Enum,
    Function,
    Property,
    EnumCase,
    TypeAlias,
    Local,
    Unknown,
}

impl SymbolKind {
    /// Storage representation used by the `symbols.kind` column.
    pub fn as_str(self) -> &'static str {
        match self {
            SymbolKind::Class => "class",
            SymbolKind::Struct => "struct",
            SymbolKind::Protocol => "protocol",
            SymbolKind::Enum => "enum",
            SymbolKind::Function => "function",
            SymbolKind::Property => "property",
            SymbolKind::EnumCase => "enum-case",
            SymbolKind::TypeAlias => "type-alias",
            SymbolKind::Local => "local",
            SymbolKind::Unknown => "unknown",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "class" => SymbolKind::Class,
            "struct" => SymbolKind::Struct,
            "protocol" => SymbolKind::Protocol,
            "enum" => SymbolKind::Enum,
            "function" => SymbolKind::Function,
            "property" => SymbolKind::Property,
            "enum-case" => SymbolKind::EnumCase,
            "type-alias" => SymbolKind::TypeAlias,
            "local" => SymbolKind::Local,
            "unknown" => SymbolKind::Unknown,
            _ => return None,
        })
    }

    /// Suffix token appended to the descriptor.
    fn suffix(self) -> &'static str {
        match self {
            SymbolKind::Class
            | SymbolKind::Struct
            | SymbolKind::Protocol
            | SymbolKind::Enum
            | SymbolKind::TypeAlias => "#",
            SymbolKind::Function => "().",
            SymbolKind::Property | SymbolKind::EnumCase => ".",
            SymbolKind::Local | SymbolKind::Unknown => "",
        }
    }
}

/// Input to the Symbol Builder.
#[derive(Debug, Clone)]
pub struct SymbolInput<'a> {
    pub usr: &'a str,
    pub name: &'a str,
    pub kind: SymbolKind,
    pub module: Option<&'a str>,
    pub container: Option<&'a str>,
}

/// Build a SCIP symbol-ID string for the given input.
///
/// Pure function: same input always produces the same output.
pub fn build_symbol_id(input: &SymbolInput<'_>) -> String {
    let module = match (input.usr.starts_with(SWIFT_USR_PREFIX), input.module) {
        (true, Some(module)) if !module.is_empty() => module,
        _ => return local_symbol_id(input.usr),
    };

    let suffix = input.kind.suffix();

    let descriptor = match input.container {
        Some(container) if !container.is_empty() => {
            format!("{container}#{name}{suffix}", name = input.name)
        }
        _ => format!("{name}{suffix}", name = input.name),
    };

    format!("swift {module} {descriptor}")
}

/// Synthesize a `local <fingerprint>` symbol-ID for a USR that can't be
/// given a stable exported identifier.
fn local_symbol_id(usr: &str) -> String {
    format!("local {}", fnv1a_fingerprint(usr.as_bytes()))
}

/// Deterministic 64-bit FNV-1a hash, rendered in decimal.
///
/// A runtime-dependent string hash would vary across processes and
/// platforms; FNV-1a gives the same fingerprint for the same USR
/// everywhere.
pub fn fnv1a_fingerprint(bytes: &[u8]) -> u64 {
    const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    let mut hash = FNV_OFFSET_BASIS;
    for &byte in bytes {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_definition() {
        let input = SymbolInput {
            usr: "s:8MyModule7MyClassC",
            name: "MyClass",
            kind: SymbolKind::Class,
            module: Some("MyModule"),
            container: None,
        };
        assert_eq!(build_symbol_id(&input), "swift MyModule MyClass#");
    }

    #[test]
    fn contained_method() {
        let input = SymbolInput {
            usr: "s:8MyModule7MyClassC11doSomethingyyF",
            name: "doSomething",
            kind: SymbolKind::Function,
            module: Some("MyModule"),
            container: Some("MyClass"),
        };
        assert_eq!(
            build_symbol_id(&input),
            "swift MyModule MyClass#doSomething()."
        );
    }

    #[test]
    fn non_swift_usr_is_local() {
        let input = SymbolInput {
            usr: "c:objc(cs)NSObject",
            name: "NSObject",
            kind: SymbolKind::Class,
            module: Some("Foundation"),
            container: None,
        };
        let id = build_symbol_id(&input);
        assert!(id.starts_with("local "));
        let fingerprint = id.strip_prefix("local ").unwrap();
        assert!(fingerprint.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn missing_module_is_local() {
        let input = SymbolInput {
            usr: "s:8MyModule7MyClassC",
            name: "MyClass",
            kind: SymbolKind::Class,
            module: None,
            container: None,
        };
        assert!(build_symbol_id(&input).starts_with("local "));
    }

    #[test]
    fn property_and_enum_case_suffixes() {
        let property = SymbolInput {
            usr: "s:8MyModule7MyClassC4prop",
            name: "prop",
            kind: SymbolKind::Property,
            module: Some("MyModule"),
            container: Some("MyClass"),
        };
        assert_eq!(build_symbol_id(&property), "swift MyModule MyClass#prop.");

        let case = SymbolInput {
            usr: "s:8MyModule5Color",
            name: "red",
            kind: SymbolKind::EnumCase,
            module: Some("MyModule"),
            container: Some("Color"),
        };
        assert_eq!(build_symbol_id(&case), "swift MyModule Color#red.");
    }

    #[test]
    fn symbol_id_is_pure() {
        let input = SymbolInput {
            usr: "s:8MyModule7MyClassC",
            name: "MyClass",
            kind: SymbolKind::Class,
            module: Some("MyModule"),
            container: None,
        };
        let first = build_symbol_id(&input);
        let second = build_symbol_id(&input);
        assert_eq!(first, second);
    }

    #[test]
    fn local_fingerprint_is_deterministic() {
        let a = fnv1a_fingerprint(b"s:8MyModule7MyClassC");
        let b = fnv1a_fingerprint(b"s:8MyModule7MyClassC");
        assert_eq!(a, b);
    }

    #[test]
    fn kind_round_trips_through_storage_string() {
        for kind in [
            SymbolKind::Class,
            SymbolKind::Struct,
            SymbolKind::Protocol,
            SymbolKind::Enum,
            SymbolKind::Function,
            SymbolKind::Property,
            SymbolKind::EnumCase,
            SymbolKind::TypeAlias,
            SymbolKind::Local,
            SymbolKind::Unknown,
        ] {
            assert_eq!(SymbolKind::from_str(kind.as_str()), Some(kind));
        }
    }
}
