//! Path eligibility filter.
//!
//! Decides which files enter the index: ordered include/exclude globs,
//! an optional extension whitelist, a size cap, and a binary sniff.
//! Pattern logic is pure; only `eligible` touches the filesystem.

use regex::Regex;
use std::collections::HashSet;
use std::path::Path;

use crate::config::IndexConfig;

// ---------------------------------------------------------------------------
// Glob compilation
// ---------------------------------------------------------------------------

/// One compiled glob pattern.
///
/// Grammar: `*` matches any run of non-separator characters, `?` matches
/// one non-separator character, and a trailing `/**` matches the
/// directory itself plus all descendants.
struct CompiledGlob {
    regex: Regex,
}

impl CompiledGlob {
    fn compile(pattern: &str) -> Option<Self> {
        let (stem, subtree) = match pattern.strip_suffix("/**") {
            Some(s) => (s, true),
            None => (pattern, false),
        };

        let mut re = String::from("^");
        for c in stem.chars() {
            match c {
                '*' => re.push_str("[^/]*"),
                '?' => re.push_str("[^/]"),
                _ => re.push_str(&regex::escape(&c.to_string())),
            }
        }
        if subtree {
            // The directory itself or anything below it.
            re.push_str("(/.*)?");
        }
        re.push('$');

        Regex::new(&re).ok().map(|regex| CompiledGlob { regex })
    }

    fn matches(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

// ---------------------------------------------------------------------------
// Filter
// ---------------------------------------------------------------------------

/// Stateless path filter built once per project from [`IndexConfig`].
pub struct PathFilter {
    include: Vec<CompiledGlob>,
    exclude: Vec<CompiledGlob>,
    extensions: HashSet<String>,
    max_file_size: u64,
}

impl PathFilter {
    pub fn new(cfg: &IndexConfig) -> Self {
        Self {
            include: cfg.include.iter().filter_map(|p| CompiledGlob::compile(p)).collect(),
            exclude: cfg.exclude.iter().filter_map(|p| CompiledGlob::compile(p)).collect(),
            extensions: cfg.extensions.iter().map(|e| e.to_lowercase()).collect(),
            max_file_size: cfg.max_file_size_bytes,
        }
    }

    /// Pure pattern decision for a root-relative path.
    ///
    /// Patterns are tried against the relative path and the basename;
    /// exclusion takes precedence over inclusion.
    pub fn matches_patterns(&self, rel_path: &str) -> bool {
        let basename = rel_path.rsplit('/').next().unwrap_or(rel_path);

        if self.exclude.iter().any(|g| g.matches(rel_path) || g.matches(basename)) {
            return false;
        }
        if self.include.is_empty() {
            return true;
        }
        self.include.iter().any(|g| g.matches(rel_path) || g.matches(basename))
    }

    /// Extension whitelist check. An empty whitelist admits everything.
    pub fn matches_extension(&self, rel_path: &str) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        let ext = rel_path.rsplit('.').next().unwrap_or("");
        ext != rel_path && self.extensions.contains(&ext.to_lowercase())
    }

    /// Full eligibility check for an on-disk file: patterns, extension,
    /// size cap, and binary sniff.
    pub fn eligible(&self, root: &Path, abs_path: &Path) -> bool {
        let rel = match abs_path.strip_prefix(root) {
            Ok(r) => r.to_string_lossy().replace('\\', "/"),
            Err(_) => return false,
        };

        if !self.matches_patterns(&rel) || !self.matches_extension(&rel) {
            return false;
        }

        match std::fs::metadata(abs_path) {
            Ok(meta) if meta.is_file() => {
                if meta.len() > self.max_file_size {
                    return false;
                }
            }
            _ => return false,
        }

        is_text_file(abs_path)
    }
}

/// Check if a file appears to be text by reading the first 8 KiB and
/// looking for NUL bytes.
fn is_text_file(path: &Path) -> bool {
    let mut file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(_) => return false,
    };
    let mut buf = [0u8; 8192];
    let n = match std::io::Read::read(&mut file, &mut buf) {
        Ok(n) => n,
        Err(_) => return false,
    };
    !buf[..n].contains(&0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexConfig;

    fn filter(include: &[&str], exclude: &[&str], extensions: &[&str]) -> PathFilter {
        PathFilter::new(&IndexConfig {
            include: include.iter().map(|s| s.to_string()).collect(),
            exclude: exclude.iter().map(|s| s.to_string()).collect(),
            extensions: extensions.iter().map(|s| s.to_string()).collect(),
            ..IndexConfig::default()
        })
    }

    #[test]
    fn test_star_does_not_cross_separators() {
        let f = filter(&["src/*.go"], &[], &[]);
        assert!(f.matches_patterns("src/main.go"));
        assert!(!f.matches_patterns("src/sub/main.go"));
    }

    #[test]
    fn test_question_mark_single_char() {
        let f = filter(&["a?.go"], &[], &[]);
        assert!(f.matches_patterns("ab.go"));
        assert!(!f.matches_patterns("abc.go"));
        assert!(!f.matches_patterns("a/.go"));
    }

    #[test]
    fn test_trailing_doublestar_matches_dir_and_descendants() {
        let f = filter(&[], &["vendor/**"], &[]);
        assert!(!f.matches_patterns("vendor"));
        assert!(!f.matches_patterns("vendor/pkg/mod.go"));
        assert!(f.matches_patterns("vendored.go"));
    }

    #[test]
    fn test_basename_matching() {
        let f = filter(&[], &["*.min.js"], &[]);
        assert!(!f.matches_patterns("assets/deep/app.min.js"));
        assert!(f.matches_patterns("assets/deep/app.js"));
    }

    #[test]
    fn test_exclusion_beats_inclusion() {
        let f = filter(&["src/**"], &["src/generated/**"], &[]);
        assert!(f.matches_patterns("src/main.go"));
        assert!(!f.matches_patterns("src/generated/schema.go"));
    }

    #[test]
    fn test_empty_include_admits_all() {
        let f = filter(&[], &[], &[]);
        assert!(f.matches_patterns("anything/at/all.txt"));
    }

    #[test]
    fn test_extension_whitelist() {
        let f = filter(&[], &[], &["go", "rs"]);
        assert!(f.matches_extension("pkg/main.go"));
        assert!(f.matches_extension("lib.RS"));
        assert!(!f.matches_extension("readme.txt"));
        assert!(!f.matches_extension("Makefile"));
    }

    #[test]
    fn test_binary_and_size_rejection() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        let text = root.join("ok.go");
        std::fs::write(&text, "package main\n").unwrap();

        let binary = root.join("blob.go");
        std::fs::write(&binary, b"\x00\x01\x02binary").unwrap();

        let huge = root.join("huge.go");
        std::fs::write(&huge, "x".repeat(4096)).unwrap();

        let mut cfg = IndexConfig::default();
        cfg.include.clear();
        cfg.exclude.clear();
        cfg.max_file_size_bytes = 1024;
        let f = PathFilter::new(&cfg);

        assert!(f.eligible(root, &text));
        assert!(!f.eligible(root, &binary));
        assert!(!f.eligible(root, &huge));
        assert!(!f.eligible(root, &root.join("missing.go")));
    }

    #[test]
    fn test_paths_outside_root_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let stray = other.path().join("a.go");
        std::fs::write(&stray, "package a\n").unwrap();

        let f = filter(&[], &[], &[]);
        assert!(!f.eligible(dir.path(), &stray));
    }
}
