//! Core data model shared by the store, graph, lineage, and API layers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Stable ids and hashes
// ---------------------------------------------------------------------------

/// First 16 hex chars of SHA-256 over `input`. Used for project ids,
/// chunk ids, and per-file shard keys.
pub fn short_digest(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// Full SHA-256 hex digest of chunk content.
pub fn content_digest(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// Stable project id from a cleaned absolute path.
pub fn project_id(path: &Path) -> String {
    short_digest(&path.to_string_lossy())
}

/// Stable chunk id from `(file_path, start_line, end_line)`.
pub fn chunk_id(file_path: &str, start_line: usize, end_line: usize) -> String {
    short_digest(&format!("{file_path}:{start_line}-{end_line}"))
}

// ---------------------------------------------------------------------------
// Projects
// ---------------------------------------------------------------------------

/// A registered source tree.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub path: PathBuf,
    pub name: String,
    pub registered_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Symbols
// ---------------------------------------------------------------------------

/// Closed set of symbol kinds. Language tables only ever map into this
/// set; anything else is dropped at parse time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Function,
    Method,
    Type,
    Struct,
    Interface,
    Class,
    Const,
    Var,
    Package,
    Module,
    Field,
    Enum,
}

impl SymbolKind {
    pub fn label(&self) -> &'static str {
        match self {
            SymbolKind::Function => "function",
            SymbolKind::Method => "method",
            SymbolKind::Type => "type",
            SymbolKind::Struct => "struct",
            SymbolKind::Interface => "interface",
            SymbolKind::Class => "class",
            SymbolKind::Const => "const",
            SymbolKind::Var => "var",
            SymbolKind::Package => "package",
            SymbolKind::Module => "module",
            SymbolKind::Field => "field",
            SymbolKind::Enum => "enum",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "function" => Some(SymbolKind::Function),
            "method" => Some(SymbolKind::Method),
            "type" => Some(SymbolKind::Type),
            "struct" => Some(SymbolKind::Struct),
            "interface" => Some(SymbolKind::Interface),
            "class" => Some(SymbolKind::Class),
            "const" => Some(SymbolKind::Const),
            "var" => Some(SymbolKind::Var),
            "package" => Some(SymbolKind::Package),
            "module" => Some(SymbolKind::Module),
            "field" => Some(SymbolKind::Field),
            "enum" => Some(SymbolKind::Enum),
            _ => None,
        }
    }

    /// Structural kinds get their end line from brace matching; the rest
    /// end on their start line.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            SymbolKind::Function
                | SymbolKind::Method
                | SymbolKind::Type
                | SymbolKind::Struct
                | SymbolKind::Interface
                | SymbolKind::Class
                | SymbolKind::Enum
        )
    }
}

/// A named symbol extracted from one file, the light view used for
/// chunk alignment and name lookups.
#[derive(Clone, Debug, Serialize)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub file_path: String,
    /// 1-based start line.
    pub line: usize,
    /// 1-based end line (inclusive).
    pub end_line: usize,
    pub signature: String,
    pub doc: String,
}

// ---------------------------------------------------------------------------
// Chunks
// ---------------------------------------------------------------------------

/// The indexed unit of code: one symbol span plus padding, or a plain
/// line window filling a gap.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub file_path: String,
    pub symbol_name: String,
    pub symbol_kind: Option<SymbolKind>,
    pub content: String,
    pub signature: String,
    pub doc_comment: String,
    pub start_line: usize,
    pub end_line: usize,
    pub content_hash: String,
    pub branch: String,
    pub indexed_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Dependency graph
// ---------------------------------------------------------------------------

/// Relation kinds between graph nodes. `Implements` is accepted on load
/// but the Go parser does not currently infer it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Calls,
    Imports,
    Implements,
    Uses,
    Embeds,
}

impl EdgeKind {
    pub fn label(&self) -> &'static str {
        match self {
            EdgeKind::Calls => "calls",
            EdgeKind::Imports => "imports",
            EdgeKind::Implements => "implements",
            EdgeKind::Uses => "uses",
            EdgeKind::Embeds => "embeds",
        }
    }
}

/// A graph node: one top-level declaration or method.
/// Id is `package.Name`, or `package.Receiver.Name` for methods.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub name: String,
    pub kind: SymbolKind,
    pub file_path: String,
    pub package: String,
    pub start_line: usize,
    pub end_line: usize,
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub doc: String,
}

/// A directed relation. Targets may be unresolved ids for symbols
/// outside the project; the graph tolerates dangling targets.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
    pub kind: EdgeKind,
    pub file_path: String,
    pub line: usize,
}

impl Edge {
    /// Dedup key per the graph contract.
    pub fn dedup_key(&self) -> (String, String, EdgeKind, usize) {
        (self.source.clone(), self.target.clone(), self.kind, self.line)
    }
}

// ---------------------------------------------------------------------------
// Lineage
// ---------------------------------------------------------------------------

/// One immutable per-commit record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LineageEntry {
    pub commit_hash: String,
    pub short_hash: String,
    pub author: String,
    pub date: String,
    pub message: String,
    pub files_changed: Vec<String>,
    pub summary: String,
    pub summary_model: String,
    pub summarized_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Derived per-project stats, refreshed on every write.
#[derive(Clone, Debug, Default, Serialize)]
pub struct IndexStats {
    pub document_count: usize,
    pub file_count: usize,
    pub branch: String,
    pub last_updated: Option<DateTime<Utc>>,
    pub watcher_running: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_digest_is_stable_and_16_hex() {
        let a = short_digest("/home/u/project");
        let b = short_digest("/home/u/project");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, short_digest("/home/u/other"));
    }

    #[test]
    fn test_chunk_id_depends_on_all_three_parts() {
        let base = chunk_id("a.go", 1, 10);
        assert_ne!(base, chunk_id("b.go", 1, 10));
        assert_ne!(base, chunk_id("a.go", 2, 10));
        assert_ne!(base, chunk_id("a.go", 1, 11));
        assert_eq!(base, chunk_id("a.go", 1, 10));
    }

    #[test]
    fn test_symbol_kind_roundtrip() {
        for kind in [
            SymbolKind::Function,
            SymbolKind::Method,
            SymbolKind::Type,
            SymbolKind::Struct,
            SymbolKind::Interface,
            SymbolKind::Class,
            SymbolKind::Const,
            SymbolKind::Var,
            SymbolKind::Package,
            SymbolKind::Module,
            SymbolKind::Field,
            SymbolKind::Enum,
        ] {
            assert_eq!(SymbolKind::parse(kind.label()), Some(kind));
        }
        assert_eq!(SymbolKind::parse("widget"), None);
    }

    #[test]
    fn test_edge_dedup_key() {
        let e1 = Edge {
            source: "pkg.A".into(),
            target: "pkg.B".into(),
            kind: EdgeKind::Calls,
            file_path: "a.go".into(),
            line: 4,
        };
        let mut e2 = e1.clone();
        e2.file_path = "other.go".into();
        // file_path is not part of the dedup tuple
        assert_eq!(e1.dedup_key(), e2.dedup_key());
    }
}
