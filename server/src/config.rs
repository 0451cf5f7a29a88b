//! Service configuration: data directory resolution and the optional
//! `codescout.toml` config file.
//!
//! Everything has a default; the daemon starts with no config file at
//! all. Values here are startup input; nothing mutates them afterwards.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Maximum file size (in bytes) that will be read into memory.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 512 * 1024;

/// Chunker plain-window size in lines.
pub const DEFAULT_CHUNK_WINDOW: usize = 100;

/// Chunker overlap in lines.
pub const DEFAULT_CHUNK_OVERLAP: usize = 10;

/// Watcher debounce window in milliseconds.
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;

/// Seconds between HEAD reference polls.
pub const DEFAULT_HEAD_POLL_SECS: u64 = 10;

/// Deadline for one summarizer invocation.
pub const DEFAULT_SUMMARIZER_TIMEOUT_SECS: u64 = 30;

fn default_max_file_size() -> u64 {
    DEFAULT_MAX_FILE_SIZE
}
fn default_chunk_window() -> usize {
    DEFAULT_CHUNK_WINDOW
}
fn default_chunk_overlap() -> usize {
    DEFAULT_CHUNK_OVERLAP
}
fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE_MS
}
fn default_head_poll_secs() -> u64 {
    DEFAULT_HEAD_POLL_SECS
}
fn default_summarizer_timeout_secs() -> u64 {
    DEFAULT_SUMMARIZER_TIMEOUT_SECS
}

fn default_extensions() -> Vec<String> {
    [
        "go", "rs", "py", "js", "jsx", "ts", "tsx", "java", "c", "h", "cpp", "hpp", "cc", "rb",
        "kt", "swift", "cs", "php", "md", "toml", "yaml", "yml", "json",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_exclude() -> Vec<String> {
    [
        ".git/**",
        "node_modules/**",
        "target/**",
        "vendor/**",
        "dist/**",
        "build/**",
        "__pycache__/**",
        ".next/**",
        "*.min.js",
        "*.lock",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

// ---------------------------------------------------------------------------
// Config file schema
// ---------------------------------------------------------------------------

/// Per-project indexing knobs.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Include globs. Empty = include everything not excluded.
    pub include: Vec<String>,
    /// Exclude globs. Exclusion wins over inclusion.
    pub exclude: Vec<String>,
    /// File extensions eligible for indexing. Empty = all text files.
    pub extensions: Vec<String>,
    pub max_file_size_bytes: u64,
    pub chunk_window: usize,
    pub chunk_overlap: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            exclude: default_exclude(),
            extensions: default_extensions(),
            max_file_size_bytes: default_max_file_size(),
            chunk_window: default_chunk_window(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

/// Watcher timing knobs.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub debounce_ms: u64,
    pub head_poll_secs: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self { debounce_ms: default_debounce_ms(), head_poll_secs: default_head_poll_secs() }
    }
}

/// Commit-summary knobs. The summarizer is an external command that
/// receives the commit message and truncated diff on stdin and prints
/// a summary to stdout; credential discovery is its own business.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct SummarizerConfig {
    pub command: Option<String>,
    #[serde(default = "default_summarizer_timeout_secs")]
    pub timeout_secs: u64,
}

/// Top-level service configuration, loaded from `codescout.toml`.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Data directory override. CLI flag wins over this, this wins over
    /// the platform default.
    pub data_dir: Option<PathBuf>,
    /// Shared secret for the HTTP API. None = auth disabled.
    pub api_key: Option<String>,
    pub index: IndexConfig,
    pub watch: WatchConfig,
    pub summarizer: SummarizerConfig,
}

impl ServiceConfig {
    /// Load from a TOML file. A missing file yields defaults; a malformed
    /// file is a hard error (bad config should not be silently ignored).
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw)
            .map_err(|e| Error::InvalidInput(format!("config {}: {e}", path.display())))
    }
}

// ---------------------------------------------------------------------------
// Data directory resolution
// ---------------------------------------------------------------------------

/// Default data directory: `$CODESCOUT_DATA`, else `~/.codescout`.
pub fn default_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("CODESCOUT_DATA") {
        return PathBuf::from(dir);
    }
    std::env::var("HOME")
        .map(|h| PathBuf::from(h).join(".codescout"))
        .unwrap_or_else(|_| PathBuf::from(".codescout"))
}

/// Registry file location below the data directory.
pub fn registry_path(data_dir: &Path) -> PathBuf {
    data_dir.join("registry.json")
}

/// Root of one project's persisted state.
pub fn project_data_dir(data_dir: &Path, project_id: &str) -> PathBuf {
    data_dir.join("projects").join(project_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_file_missing() {
        let cfg = ServiceConfig::load(Path::new("/nonexistent/codescout.toml")).unwrap();
        assert_eq!(cfg.index.chunk_window, DEFAULT_CHUNK_WINDOW);
        assert_eq!(cfg.index.chunk_overlap, DEFAULT_CHUNK_OVERLAP);
        assert_eq!(cfg.watch.debounce_ms, DEFAULT_DEBOUNCE_MS);
        assert!(cfg.api_key.is_none());
        assert!(cfg.summarizer.command.is_none());
        assert!(cfg.index.exclude.iter().any(|p| p.starts_with(".git")));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("codescout.toml");
        std::fs::write(
            &path,
            r#"
api_key = "sekrit"

[watch]
debounce_ms = 250

[summarizer]
command = "summarize-diff"
"#,
        )
        .unwrap();

        let cfg = ServiceConfig::load(&path).unwrap();
        assert_eq!(cfg.api_key.as_deref(), Some("sekrit"));
        assert_eq!(cfg.watch.debounce_ms, 250);
        assert_eq!(cfg.watch.head_poll_secs, DEFAULT_HEAD_POLL_SECS);
        assert_eq!(cfg.summarizer.command.as_deref(), Some("summarize-diff"));
        assert_eq!(cfg.summarizer.timeout_secs, DEFAULT_SUMMARIZER_TIMEOUT_SECS);
        assert_eq!(cfg.index.chunk_window, DEFAULT_CHUNK_WINDOW);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("codescout.toml");
        std::fs::write(&path, "api_key = [not toml").unwrap();
        let err = ServiceConfig::load(&path).unwrap_err();
        assert_eq!(err.tag(), "invalid_input");
    }

    #[test]
    fn test_project_data_layout() {
        let base = PathBuf::from("/data");
        assert_eq!(registry_path(&base), PathBuf::from("/data/registry.json"));
        assert_eq!(
            project_data_dir(&base, "deadbeefdeadbeef"),
            PathBuf::from("/data/projects/deadbeefdeadbeef")
        );
    }
}
