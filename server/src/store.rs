//! Chunk store: content-addressed code chunks with ranked search.
//!
//! In memory, chunks live in an id-keyed map plus a per-file index. On
//! disk the store is a directory of per-file JSON shards (keyed by a
//! digest of the relative path), so replacing one file's chunks is a
//! real physical replace and the whole store survives restart.
//!
//! Ranking combines a saturating lexical term-frequency score over
//! name / signature / doc / body with an optional vector similarity
//! when an [`Embedder`] is configured. Scoring is deterministic for a
//! given corpus and query; ties break on chunk id.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

use crate::error::Result;
use crate::types::{short_digest, Chunk, SymbolKind};

/// Default number of search results.
pub const DEFAULT_SEARCH_LIMIT: usize = 10;

/// Hard cap on search results.
pub const MAX_SEARCH_LIMIT: usize = 1000;

/// Field weights: name, signature, doc comment, body.
const WEIGHT_NAME: f64 = 8.0;
const WEIGHT_SIGNATURE: f64 = 4.0;
const WEIGHT_DOC: f64 = 2.0;
const WEIGHT_BODY: f64 = 1.0;

/// Contribution scale of the vector score relative to lexical.
const WEIGHT_VECTOR: f64 = 10.0;

/// Bonus when the symbol name equals the query exactly.
const EXACT_NAME_BONUS: f64 = 12.0;

// ---------------------------------------------------------------------------
// Pluggable embedding
// ---------------------------------------------------------------------------

/// Embedding function for vector-style ranking. No implementation is
/// bundled; configure one to blend cosine similarity into scores.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Vec<f32>;
}

fn cosine(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut na = 0.0f64;
    let mut nb = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += f64::from(*x) * f64::from(*y);
        na += f64::from(*x) * f64::from(*x);
        nb += f64::from(*y) * f64::from(*y);
    }
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na.sqrt() * nb.sqrt())
    }
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// A search request. Filters are applied before ranking.
#[derive(Clone, Debug, Default)]
pub struct SearchQuery {
    pub query: String,
    pub limit: Option<usize>,
    pub kind: Option<SymbolKind>,
    pub path_prefix: Option<String>,
    pub branch: Option<String>,
}

impl SearchQuery {
    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_SEARCH_LIMIT).clamp(1, MAX_SEARCH_LIMIT)
    }
}

/// One ranked hit.
#[derive(Clone, Debug)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f64,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Default)]
struct StoreInner {
    chunks: HashMap<String, Chunk>,
    /// rel path -> chunk ids for that file.
    by_file: HashMap<String, Vec<String>>,
    /// In-memory only; rebuilt by indexing when an embedder is set.
    embeddings: HashMap<String, Vec<f32>>,
}

/// Persistent chunk collection for one project.
pub struct SymbolStore {
    shard_dir: PathBuf,
    inner: RwLock<StoreInner>,
    embedder: Option<Arc<dyn Embedder>>,
}

impl SymbolStore {
    /// `index_dir` is the project's `index/` directory; shards go in
    /// `index/chunks/`.
    pub fn new(index_dir: PathBuf, embedder: Option<Arc<dyn Embedder>>) -> Self {
        Self {
            shard_dir: index_dir.join("chunks"),
            inner: RwLock::new(StoreInner::default()),
            embedder,
        }
    }

    /// Load every shard from disk. Corrupt shards are logged and skipped.
    pub fn load(&self) -> Result<usize> {
        if !self.shard_dir.exists() {
            return Ok(0);
        }
        let mut loaded = 0usize;
        let mut inner = self.inner.write().unwrap();
        for entry in std::fs::read_dir(&self.shard_dir)? {
            let entry = entry?;
            if entry.path().extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let raw = match std::fs::read_to_string(entry.path()) {
                Ok(r) => r,
                Err(e) => {
                    warn!(shard = %entry.path().display(), error = %e, "unreadable shard, skipping");
                    continue;
                }
            };
            let chunks: Vec<Chunk> = match serde_json::from_str(&raw) {
                Ok(c) => c,
                Err(e) => {
                    warn!(shard = %entry.path().display(), error = %e, "corrupt shard, skipping");
                    continue;
                }
            };
            for chunk in chunks {
                Self::insert(&mut inner, chunk, self.embedder.as_deref());
                loaded += 1;
            }
        }
        debug!(chunks = loaded, "chunk shards loaded");
        Ok(loaded)
    }

    fn insert(inner: &mut StoreInner, chunk: Chunk, embedder: Option<&dyn Embedder>) {
        if let Some(e) = embedder {
            let text = format!("{}\n{}\n{}", chunk.symbol_name, chunk.doc_comment, chunk.content);
            inner.embeddings.insert(chunk.id.clone(), e.embed(&text));
        }
        inner.by_file.entry(chunk.file_path.clone()).or_default().push(chunk.id.clone());
        inner.chunks.insert(chunk.id.clone(), chunk);
    }

    fn shard_path(&self, rel_path: &str) -> PathBuf {
        self.shard_dir.join(format!("{}.json", short_digest(rel_path)))
    }

    /// Replace every chunk for a file, in memory and on disk. Old chunks
    /// for the file disappear from the result set immediately.
    pub fn replace_file(&self, rel_path: &str, chunks: Vec<Chunk>) -> Result<()> {
        std::fs::create_dir_all(&self.shard_dir)?;
        let shard = self.shard_path(rel_path);
        let tmp = shard.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec(&chunks)?)?;
        std::fs::rename(&tmp, &shard)?;

        let mut inner = self.inner.write().unwrap();
        Self::evict_file(&mut inner, rel_path);
        for chunk in chunks {
            Self::insert(&mut inner, chunk, self.embedder.as_deref());
        }
        Ok(())
    }

    /// Remove a file's chunks entirely (the file was deleted or is no
    /// longer eligible).
    pub fn remove_file(&self, rel_path: &str) -> Result<()> {
        let shard = self.shard_path(rel_path);
        if shard.exists() {
            std::fs::remove_file(&shard)?;
        }
        let mut inner = self.inner.write().unwrap();
        Self::evict_file(&mut inner, rel_path);
        Ok(())
    }

    fn evict_file(inner: &mut StoreInner, rel_path: &str) {
        if let Some(ids) = inner.by_file.remove(rel_path) {
            for id in ids {
                inner.chunks.remove(&id);
                inner.embeddings.remove(&id);
            }
        }
    }

    /// Drop everything, memory and disk. Full rebuilds call this first.
    pub fn clear(&self) -> Result<()> {
        if self.shard_dir.exists() {
            std::fs::remove_dir_all(&self.shard_dir)?;
        }
        std::fs::create_dir_all(&self.shard_dir)?;
        let mut inner = self.inner.write().unwrap();
        *inner = StoreInner::default();
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Chunk> {
        self.inner.read().unwrap().chunks.get(id).cloned()
    }

    pub fn document_count(&self) -> usize {
        self.inner.read().unwrap().chunks.len()
    }

    pub fn file_count(&self) -> usize {
        self.inner.read().unwrap().by_file.len()
    }

    pub fn is_empty(&self) -> bool {
        self.document_count() == 0
    }

    /// Chunks currently indexed for one file, in line order.
    pub fn chunks_for_file(&self, rel_path: &str) -> Vec<Chunk> {
        let inner = self.inner.read().unwrap();
        let mut chunks: Vec<Chunk> = inner
            .by_file
            .get(rel_path)
            .map(|ids| ids.iter().filter_map(|id| inner.chunks.get(id).cloned()).collect())
            .unwrap_or_default();
        chunks.sort_by_key(|c| (c.start_line, c.end_line));
        chunks
    }

    // -----------------------------------------------------------------------
    // Search
    // -----------------------------------------------------------------------

    /// Filter, score, rank, truncate.
    pub fn search(&self, query: &SearchQuery) -> Vec<ScoredChunk> {
        let terms: Vec<String> =
            query.query.to_lowercase().split_whitespace().map(|t| t.to_string()).collect();
        if terms.is_empty() {
            return Vec::new();
        }

        let query_vec = self.embedder.as_ref().map(|e| e.embed(&query.query));
        let inner = self.inner.read().unwrap();

        let mut hits: Vec<ScoredChunk> = inner
            .chunks
            .values()
            .filter(|c| Self::passes_filters(c, query))
            .filter_map(|c| {
                let mut score = lexical_score(c, &query.query, &terms);
                if let (Some(qv), Some(cv)) = (&query_vec, inner.embeddings.get(&c.id)) {
                    score += WEIGHT_VECTOR * cosine(qv, cv);
                }
                if score > 0.0 {
                    Some(ScoredChunk { chunk: c.clone(), score })
                } else {
                    None
                }
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk.id.cmp(&b.chunk.id))
        });
        hits.truncate(query.effective_limit());
        hits
    }

    fn passes_filters(chunk: &Chunk, query: &SearchQuery) -> bool {
        if let Some(kind) = query.kind {
            if chunk.symbol_kind != Some(kind) {
                return false;
            }
        }
        if let Some(prefix) = &query.path_prefix {
            if !chunk.file_path.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(branch) = &query.branch {
            if &chunk.branch != branch {
                return false;
            }
        }
        true
    }
}

/// Saturating term frequency: rewards presence much more than volume.
fn tf(count: usize) -> f64 {
    let c = count as f64;
    c / (c + 1.5)
}

fn count_occurrences(haystack_lower: &str, term: &str) -> usize {
    if term.is_empty() {
        return 0;
    }
    haystack_lower.matches(term).count()
}

fn lexical_score(chunk: &Chunk, raw_query: &str, terms: &[String]) -> f64 {
    let name = chunk.symbol_name.to_lowercase();
    let sig = chunk.signature.to_lowercase();
    let doc = chunk.doc_comment.to_lowercase();
    let body = chunk.content.to_lowercase();

    let mut score = 0.0;
    for term in terms {
        score += WEIGHT_NAME * tf(count_occurrences(&name, term));
        score += WEIGHT_SIGNATURE * tf(count_occurrences(&sig, term));
        score += WEIGHT_DOC * tf(count_occurrences(&doc, term));
        score += WEIGHT_BODY * tf(count_occurrences(&body, term));
    }

    if !chunk.symbol_name.is_empty() && chunk.symbol_name.eq_ignore_ascii_case(raw_query.trim()) {
        score += EXACT_NAME_BONUS;
    }
    score
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{chunk_id, content_digest};
    use chrono::Utc;

    fn chunk(file: &str, name: &str, kind: Option<SymbolKind>, body: &str, lines: (usize, usize)) -> Chunk {
        Chunk {
            id: chunk_id(file, lines.0, lines.1),
            file_path: file.into(),
            symbol_name: name.into(),
            symbol_kind: kind,
            content: body.into(),
            signature: if name.is_empty() { String::new() } else { format!("func {name}()") },
            doc_comment: String::new(),
            start_line: lines.0,
            end_line: lines.1,
            content_hash: content_digest(body),
            branch: "main".into(),
            indexed_at: Utc::now(),
        }
    }

    fn store(dir: &std::path::Path) -> SymbolStore {
        SymbolStore::new(dir.join("index"), None)
    }

    #[test]
    fn test_replace_and_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        let c = chunk("a.go", "Alpha", Some(SymbolKind::Function), "func Alpha() {}", (1, 3));
        let id = c.id.clone();
        s.replace_file("a.go", vec![c]).unwrap();

        assert_eq!(s.document_count(), 1);
        assert_eq!(s.file_count(), 1);
        assert_eq!(s.get(&id).unwrap().symbol_name, "Alpha");
    }

    #[test]
    fn test_replace_is_logical_replace() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        s.replace_file(
            "a.go",
            vec![chunk("a.go", "Old", Some(SymbolKind::Function), "func Old() {}", (1, 3))],
        )
        .unwrap();
        s.replace_file(
            "a.go",
            vec![chunk("a.go", "New", Some(SymbolKind::Function), "func New() {}", (1, 4))],
        )
        .unwrap();

        let hits = s.search(&SearchQuery { query: "Old".into(), ..Default::default() });
        assert!(hits.is_empty(), "replaced chunks must disappear from results");
        let hits = s.search(&SearchQuery { query: "New".into(), ..Default::default() });
        assert_eq!(hits.len(), 1);
        assert_eq!(s.document_count(), 1);
    }

    #[test]
    fn test_persistence_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        {
            let s = store(dir.path());
            s.replace_file(
                "a.go",
                vec![chunk("a.go", "Keep", Some(SymbolKind::Function), "func Keep() {}", (1, 2))],
            )
            .unwrap();
            s.replace_file(
                "b.go",
                vec![chunk("b.go", "", None, "plain window text", (1, 5))],
            )
            .unwrap();
        }

        let s2 = store(dir.path());
        assert_eq!(s2.load().unwrap(), 2);
        assert_eq!(s2.document_count(), 2);
        assert_eq!(s2.file_count(), 2);
        let hits = s2.search(&SearchQuery { query: "Keep".into(), ..Default::default() });
        assert_eq!(hits[0].chunk.symbol_name, "Keep");
    }

    #[test]
    fn test_clear_wipes_disk_and_memory() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        s.replace_file(
            "a.go",
            vec![chunk("a.go", "Gone", Some(SymbolKind::Function), "func Gone() {}", (1, 2))],
        )
        .unwrap();
        s.clear().unwrap();
        assert_eq!(s.document_count(), 0);

        let s2 = store(dir.path());
        assert_eq!(s2.load().unwrap(), 0);
    }

    #[test]
    fn test_name_outranks_body() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        s.replace_file(
            "named.go",
            vec![chunk("named.go", "Fetcher", Some(SymbolKind::Struct), "type Fetcher struct {}", (1, 2))],
        )
        .unwrap();
        s.replace_file(
            "other.go",
            vec![chunk("other.go", "Helper", Some(SymbolKind::Function), "uses fetcher here", (1, 2))],
        )
        .unwrap();

        let hits = s.search(&SearchQuery { query: "fetcher".into(), ..Default::default() });
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.symbol_name, "Fetcher");
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn test_filters_before_ranking() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        s.replace_file(
            "src/a.go",
            vec![chunk("src/a.go", "Parse", Some(SymbolKind::Function), "func Parse() {}", (1, 2))],
        )
        .unwrap();
        s.replace_file(
            "lib/b.go",
            vec![chunk("lib/b.go", "Parse", Some(SymbolKind::Method), "func (x) Parse() {}", (1, 2))],
        )
        .unwrap();

        let hits = s.search(&SearchQuery {
            query: "Parse".into(),
            kind: Some(SymbolKind::Function),
            ..Default::default()
        });
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.file_path, "src/a.go");

        let hits = s.search(&SearchQuery {
            query: "Parse".into(),
            path_prefix: Some("lib/".into()),
            ..Default::default()
        });
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.file_path, "lib/b.go");

        let hits = s.search(&SearchQuery {
            query: "Parse".into(),
            branch: Some("release".into()),
            ..Default::default()
        });
        assert!(hits.is_empty());
    }

    #[test]
    fn test_limit_defaults_and_cap() {
        let q = SearchQuery::default();
        assert_eq!(q.effective_limit(), DEFAULT_SEARCH_LIMIT);
        let q = SearchQuery { limit: Some(5000), ..Default::default() };
        assert_eq!(q.effective_limit(), MAX_SEARCH_LIMIT);
        let q = SearchQuery { limit: Some(0), ..Default::default() };
        assert_eq!(q.effective_limit(), 1);
    }

    #[test]
    fn test_deterministic_ordering() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        for i in 0..20 {
            let file = format!("f{i}.go");
            s.replace_file(
                &file,
                vec![chunk(&file, "Twin", Some(SymbolKind::Function), "func Twin() {}", (1, 2))],
            )
            .unwrap();
        }
        let a: Vec<String> = s
            .search(&SearchQuery { query: "Twin".into(), limit: Some(20), ..Default::default() })
            .iter()
            .map(|h| h.chunk.id.clone())
            .collect();
        let b: Vec<String> = s
            .search(&SearchQuery { query: "Twin".into(), limit: Some(20), ..Default::default() })
            .iter()
            .map(|h| h.chunk.id.clone())
            .collect();
        assert_eq!(a, b);
        let mut sorted = a.clone();
        sorted.sort();
        assert_eq!(a, sorted, "equal scores must tie-break on id");
    }

    struct StubEmbedder;
    impl Embedder for StubEmbedder {
        fn embed(&self, text: &str) -> Vec<f32> {
            // Toy 2-dim embedding: [has "alpha", has "beta"]
            let lower = text.to_lowercase();
            vec![
                if lower.contains("alpha") { 1.0 } else { 0.0 },
                if lower.contains("beta") { 1.0 } else { 0.0 },
            ]
        }
    }

    #[test]
    fn test_embedder_blends_into_score() {
        let dir = tempfile::tempdir().unwrap();
        let s = SymbolStore::new(dir.path().join("index"), Some(Arc::new(StubEmbedder)));
        s.replace_file(
            "a.go",
            vec![chunk("a.go", "DoWork", Some(SymbolKind::Function), "alpha related work", (1, 2))],
        )
        .unwrap();
        s.replace_file(
            "b.go",
            vec![chunk("b.go", "DoWork2", Some(SymbolKind::Function), "beta related work", (1, 2))],
        )
        .unwrap();

        let hits = s.search(&SearchQuery { query: "alpha work".into(), ..Default::default() });
        assert_eq!(hits[0].chunk.file_path, "a.go");
    }

    #[test]
    fn test_remove_file() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        s.replace_file(
            "a.go",
            vec![chunk("a.go", "X", Some(SymbolKind::Function), "func X() {}", (1, 2))],
        )
        .unwrap();
        s.remove_file("a.go").unwrap();
        assert_eq!(s.document_count(), 0);

        let s2 = store(dir.path());
        assert_eq!(s2.load().unwrap(), 0);
    }
}
