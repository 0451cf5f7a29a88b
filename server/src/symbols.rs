//! Regex-driven symbol extraction.
//!
//! Each supported language gets a declarative table of
//! `(pattern, name group, kind)` rules. Rules are tried in table order;
//! the first rule to claim a line wins, so specific patterns
//! (`type X struct`) must precede general ones (`type X ...`).
//! Malformed source never fails; unparsable regions produce nothing.

use regex::Regex;
use std::sync::OnceLock;

use crate::types::{Symbol, SymbolKind};

// ---------------------------------------------------------------------------
// Language tables
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Language {
    Go,
    Rust,
    Python,
    JavaScript,
    TypeScript,
    Java,
}

/// Map a file path to its language by extension.
pub fn language_for_path(path: &str) -> Option<Language> {
    let ext = path.rsplit('.').next().unwrap_or("");
    match ext {
        "go" => Some(Language::Go),
        "rs" => Some(Language::Rust),
        "py" | "pyi" => Some(Language::Python),
        "js" | "jsx" | "mjs" | "cjs" => Some(Language::JavaScript),
        "ts" | "tsx" => Some(Language::TypeScript),
        "java" => Some(Language::Java),
        _ => None,
    }
}

struct Rule {
    pattern: Regex,
    kind: SymbolKind,
    name_group: usize,
}

fn rule(pattern: &str, kind: SymbolKind, name_group: usize) -> Rule {
    // Table patterns are compile-time constants; a typo is a programmer
    // error caught by the table tests below.
    Rule { pattern: Regex::new(pattern).expect("invalid symbol table pattern"), kind, name_group }
}

fn go_rules() -> Vec<Rule> {
    vec![
        rule(r"(?m)^func\s+\([^)]*\)\s+(\w+)\s*\(", SymbolKind::Method, 1),
        rule(r"(?m)^func\s+(\w+)\s*\(", SymbolKind::Function, 1),
        rule(r"(?m)^type\s+(\w+)\s+struct\b", SymbolKind::Struct, 1),
        rule(r"(?m)^type\s+(\w+)\s+interface\b", SymbolKind::Interface, 1),
        rule(r"(?m)^type\s+(\w+)\s+\S", SymbolKind::Type, 1),
        rule(r"(?m)^const\s+(\w+)", SymbolKind::Const, 1),
        rule(r"(?m)^var\s+(\w+)", SymbolKind::Var, 1),
        rule(r"(?m)^package\s+(\w+)", SymbolKind::Package, 1),
    ]
}

fn rust_rules() -> Vec<Rule> {
    vec![
        rule(
            r"(?m)^(?:pub(?:\([^)]*\))?\s+)?(?:const\s+)?(?:async\s+)?(?:unsafe\s+)?fn\s+(\w+)",
            SymbolKind::Function,
            1,
        ),
        // [ \t]+ rather than \s+: under (?m), \s would also swallow the
        // newline and misfile a top-level fn as a method.
        rule(
            r"(?m)^[ \t]+(?:pub(?:\([^)]*\))?\s+)?(?:const\s+)?(?:async\s+)?(?:unsafe\s+)?fn\s+(\w+)",
            SymbolKind::Method,
            1,
        ),
        rule(r"(?m)^(?:pub(?:\([^)]*\))?\s+)?struct\s+(\w+)", SymbolKind::Struct, 1),
        rule(r"(?m)^(?:pub(?:\([^)]*\))?\s+)?enum\s+(\w+)", SymbolKind::Enum, 1),
        rule(r"(?m)^(?:pub(?:\([^)]*\))?\s+)?trait\s+(\w+)", SymbolKind::Interface, 1),
        rule(r"(?m)^(?:pub(?:\([^)]*\))?\s+)?type\s+(\w+)", SymbolKind::Type, 1),
        rule(r"(?m)^(?:pub(?:\([^)]*\))?\s+)?(?:const|static)\s+(\w+)", SymbolKind::Const, 1),
        rule(r"(?m)^(?:pub(?:\([^)]*\))?\s+)?mod\s+(\w+)", SymbolKind::Module, 1),
    ]
}

fn python_rules() -> Vec<Rule> {
    vec![
        rule(r"(?m)^def\s+(\w+)", SymbolKind::Function, 1),
        rule(r"(?m)^[ \t]+def\s+(\w+)", SymbolKind::Method, 1),
        rule(r"(?m)^class\s+(\w+)", SymbolKind::Class, 1),
        rule(r"(?m)^([A-Z][A-Z0-9_]+)\s*=", SymbolKind::Const, 1),
    ]
}

fn javascript_rules() -> Vec<Rule> {
    vec![
        rule(r"(?m)^(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s+(\w+)", SymbolKind::Function, 1),
        rule(r"(?m)^(?:export\s+)?(?:default\s+)?class\s+(\w+)", SymbolKind::Class, 1),
        rule(
            r"(?m)^(?:export\s+)?const\s+(\w+)\s*=\s*(?:async\s*)?(?:\(|function\b|\w+\s*=>)",
            SymbolKind::Function,
            1,
        ),
        rule(r"(?m)^(?:export\s+)?(?:const|let|var)\s+(\w+)", SymbolKind::Var, 1),
    ]
}

fn typescript_rules() -> Vec<Rule> {
    let mut rules = vec![
        rule(r"(?m)^(?:export\s+)?interface\s+(\w+)", SymbolKind::Interface, 1),
        rule(r"(?m)^(?:export\s+)?type\s+(\w+)\s*=", SymbolKind::Type, 1),
        rule(r"(?m)^(?:export\s+)?(?:const\s+)?enum\s+(\w+)", SymbolKind::Enum, 1),
    ];
    rules.extend(javascript_rules());
    rules
}

fn java_rules() -> Vec<Rule> {
    vec![
        rule(
            r"(?m)^(?:public\s+|protected\s+|private\s+)?(?:abstract\s+|final\s+)?class\s+(\w+)",
            SymbolKind::Class,
            1,
        ),
        rule(r"(?m)^(?:public\s+)?interface\s+(\w+)", SymbolKind::Interface, 1),
        rule(r"(?m)^(?:public\s+)?enum\s+(\w+)", SymbolKind::Enum, 1),
        rule(
            r"(?m)^[ \t]+(?:public|protected|private)[ \t]+(?:static[ \t]+)?(?:final[ \t]+)?[\w<>\[\], \t]+[ \t]+(\w+)\s*\(",
            SymbolKind::Method,
            1,
        ),
    ]
}

fn rules_for(lang: Language) -> &'static [Rule] {
    static GO: OnceLock<Vec<Rule>> = OnceLock::new();
    static RUST: OnceLock<Vec<Rule>> = OnceLock::new();
    static PYTHON: OnceLock<Vec<Rule>> = OnceLock::new();
    static JS: OnceLock<Vec<Rule>> = OnceLock::new();
    static TS: OnceLock<Vec<Rule>> = OnceLock::new();
    static JAVA: OnceLock<Vec<Rule>> = OnceLock::new();
    match lang {
        Language::Go => GO.get_or_init(go_rules),
        Language::Rust => RUST.get_or_init(rust_rules),
        Language::Python => PYTHON.get_or_init(python_rules),
        Language::JavaScript => JS.get_or_init(javascript_rules),
        Language::TypeScript => TS.get_or_init(typescript_rules),
        Language::Java => JAVA.get_or_init(java_rules),
    }
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Extract symbols from one file. Unknown languages produce no symbols.
pub fn parse_symbols(file_path: &str, source: &str) -> Vec<Symbol> {
    let lang = match language_for_path(file_path) {
        Some(l) => l,
        None => return Vec::new(),
    };

    let lines: Vec<&str> = source.lines().collect();
    let mut symbols: Vec<Symbol> = Vec::new();
    let mut claimed_lines: Vec<usize> = Vec::new();

    for r in rules_for(lang) {
        for caps in r.pattern.captures_iter(source) {
            let mat = match caps.get(0) {
                Some(m) => m,
                None => continue,
            };
            let name = match caps.get(r.name_group) {
                Some(g) => g.as_str().to_string(),
                None => continue,
            };

            let line = source[..mat.start()].matches('\n').count() + 1;
            if claimed_lines.contains(&line) {
                continue;
            }
            claimed_lines.push(line);

            let end_line = if r.kind.is_structural() {
                block_end(&lines, line)
            } else {
                line
            };

            symbols.push(Symbol {
                name,
                kind: r.kind,
                file_path: file_path.to_string(),
                line,
                end_line,
                signature: signature_of(&lines, line),
                doc: doc_comment(&lines, line),
            });
        }
    }

    symbols.sort_by_key(|s| (s.line, s.end_line));
    symbols
}

/// The declaration line, trimmed, with any trailing open brace stripped.
fn signature_of(lines: &[&str], line: usize) -> String {
    lines
        .get(line - 1)
        .map(|l| l.trim().trim_end_matches('{').trim_end().to_string())
        .unwrap_or_default()
}

/// Brace-match from the declaration line to the end of its block.
/// Falls back to the declaration line when no block opens.
fn block_end(lines: &[&str], start_line: usize) -> usize {
    let mut depth: i32 = 0;
    let mut opened = false;

    for (idx, raw) in lines.iter().enumerate().skip(start_line - 1) {
        for c in raw.chars() {
            match c {
                '{' => {
                    depth += 1;
                    opened = true;
                }
                '}' => depth -= 1,
                _ => {}
            }
        }
        if opened && depth <= 0 {
            return idx + 1;
        }
        // Declarations without a block on the first line (e.g. `type A = B`)
        // end where they started.
        if !opened && idx + 1 > start_line {
            return start_line;
        }
    }

    if opened {
        lines.len().max(start_line)
    } else {
        start_line
    }
}

/// Contiguous comment block ending on the line directly above `line`.
/// Supports `//`, `#`, and `/* ... */` styles; markers are stripped.
fn doc_comment(lines: &[&str], line: usize) -> String {
    let mut collected: Vec<String> = Vec::new();
    let mut idx = line as i64 - 2; // 0-based index of the line above

    while idx >= 0 {
        let trimmed = lines[idx as usize].trim();
        let is_comment = trimmed.starts_with("//")
            || trimmed.starts_with('#')
            || trimmed.starts_with("/*")
            || trimmed.starts_with('*')
            || trimmed.ends_with("*/");
        if !is_comment {
            break;
        }

        let cleaned = trimmed
            .trim_start_matches("///")
            .trim_start_matches("//")
            .trim_start_matches("/*")
            .trim_start_matches('*')
            .trim_start_matches('#')
            .trim_end_matches("*/")
            .trim()
            .to_string();
        collected.push(cleaned);

        if trimmed.starts_with("/*") {
            break;
        }
        idx -= 1;
    }

    collected.reverse();
    collected.join("\n").trim().to_string()
}
