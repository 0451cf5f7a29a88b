//! Per-project indexing facade.
//!
//! Composes the path filter, symbol parser, chunker, symbol store,
//! dependency graph, and lineage tracker for a single project, and
//! enforces the project state machine:
//! `created → indexing → ready ⇄ updating → stopped`.
//! Reads during a full rebuild fail fast with the transient
//! `rebuilding` error instead of mixing stale and partial state.

use chrono::{DateTime, Utc};
use ignore::WalkBuilder;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::chunker::{build_chunks, ChunkParams};
use crate::config::ServiceConfig;
use crate::dag::{self, FileDag};
use crate::error::{Error, Result};
use crate::filter::PathFilter;
use crate::graph::{DependencyGraph, Impact};
use crate::lineage::{self, CommitSummarizer, LineageTracker};
use crate::store::{Embedder, ScoredChunk, SearchQuery, SymbolStore};
use crate::symbols::parse_symbols;
use crate::types::{Chunk, Edge, IndexStats, Node, Project};

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Cooperative cancellation token handed to long operations that cross
/// an API boundary.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProjectState {
    Created,
    Indexing,
    Ready,
    Updating,
    Stopped,
}

// ---------------------------------------------------------------------------
// Indexer
// ---------------------------------------------------------------------------

/// One project's indexing engine. Owns its store, graph, lineage,
/// and parsers exclusively.
pub struct Indexer {
    project: Project,
    filter: PathFilter,
    chunk_params: ChunkParams,
    store: SymbolStore,
    graph: DependencyGraph,
    lineage: Option<LineageTracker>,
    state: RwLock<ProjectState>,
    /// Serializes index_all and index_file so they never interleave.
    write_lock: Mutex<()>,
    last_updated: RwLock<Option<DateTime<Utc>>>,
    watcher_running: AtomicBool,
}

/// Parse output for one file during a batch.
struct ParsedFile {
    rel_path: String,
    chunks: Vec<Chunk>,
    dag: Option<FileDag>,
}

impl Indexer {
    /// Build an indexer, restoring any persisted store shards and graph
    /// snapshot from the project data directory.
    pub fn new(
        project: Project,
        project_data_dir: &Path,
        config: &ServiceConfig,
        summarizer: Option<Arc<dyn CommitSummarizer>>,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Result<Self> {
        let index_dir = project_data_dir.join("index");
        std::fs::create_dir_all(&index_dir)?;

        let store = SymbolStore::new(index_dir.clone(), embedder);
        let restored_chunks = store.load()?;

        let graph = DependencyGraph::new(index_dir.join("dag.json"));
        let restored_graph = graph.load()?;

        let lineage =
            match LineageTracker::new(project.path.clone(), index_dir.join("lineage"), summarizer) {
                Ok(tracker) => Some(tracker),
                Err(e) => {
                    info!(project = project.name.as_str(), reason = %e, "lineage disabled");
                    None
                }
            };

        debug!(
            project = project.name.as_str(),
            chunks = restored_chunks,
            graph_restored = restored_graph,
            "indexer created"
        );

        Ok(Self {
            filter: PathFilter::new(&config.index),
            chunk_params: ChunkParams::new(config.index.chunk_window, config.index.chunk_overlap),
            store,
            graph,
            lineage,
            project,
            state: RwLock::new(ProjectState::Created),
            write_lock: Mutex::new(()),
            last_updated: RwLock::new(None),
            watcher_running: AtomicBool::new(false),
        })
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn state(&self) -> ProjectState {
        *self.state.read().unwrap()
    }

    pub fn set_watcher_running(&self, running: bool) {
        self.watcher_running.store(running, Ordering::SeqCst);
    }

    /// Transition into `Stopped`. Safe to call twice.
    pub fn stop(&self) {
        *self.state.write().unwrap() = ProjectState::Stopped;
    }

    fn guard_read(&self) -> Result<()> {
        match self.state() {
            ProjectState::Indexing => Err(Error::Rebuilding),
            ProjectState::Stopped => Err(Error::Unavailable("project stopped".into())),
            _ => Ok(()),
        }
    }

    fn touch(&self) {
        *self.last_updated.write().unwrap() = Some(Utc::now());
    }

    fn rel_path_of(&self, abs_path: &Path) -> Result<String> {
        abs_path
            .strip_prefix(&self.project.path)
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .map_err(|_| {
                Error::InvalidInput(format!("{} is outside the project", abs_path.display()))
            })
    }

    // -----------------------------------------------------------------------
    // Parsing
    // -----------------------------------------------------------------------

    fn parse_one(&self, abs_path: &Path, rel_path: &str, branch: &str) -> Result<ParsedFile> {
        let content = std::fs::read_to_string(abs_path)?;
        let symbols = parse_symbols(rel_path, &content);
        let chunks = build_chunks(rel_path, &content, &symbols, branch, self.chunk_params);

        let dag = if dag::is_dag_source(rel_path) {
            match dag::parse_file(rel_path, &content) {
                Ok(d) => Some(d),
                Err(e) => {
                    warn!(file = rel_path, error = %e, "dag parse failed, skipping relations");
                    None
                }
            }
        } else {
            None
        };

        Ok(ParsedFile { rel_path: rel_path.to_string(), chunks, dag })
    }

    fn apply_dag(&self, parsed: &ParsedFile) {
        if let Some(dag) = &parsed.dag {
            for node in &dag.nodes {
                self.graph.add_node(node.clone());
            }
            for edge in &dag.edges {
                self.graph.add_edge(edge.clone());
            }
        }
    }

    // -----------------------------------------------------------------------
    // Indexing operations
    // -----------------------------------------------------------------------

    /// Full rebuild: walk the tree, clear and rewrite the store in a
    /// batch, rebuild the graph from scratch, save the snapshot.
    /// Per-file I/O errors are logged and dropped.
    pub fn index_all(&self, cancel: &CancelToken) -> Result<usize> {
        {
            let mut state = self.state.write().unwrap();
            match *state {
                ProjectState::Stopped => {
                    return Err(Error::Unavailable("project stopped".into()))
                }
                ProjectState::Indexing => return Err(Error::Rebuilding),
                _ => *state = ProjectState::Indexing,
            }
        }
        let result = self.index_all_inner(cancel);
        *self.state.write().unwrap() = ProjectState::Ready;
        result
    }

    fn index_all_inner(&self, cancel: &CancelToken) -> Result<usize> {
        let _write = self.write_lock.lock().unwrap();
        let started = std::time::Instant::now();
        let branch = lineage::current_branch(&self.project.path);

        // Collect eligible files first; the walk itself is cheap.
        let mut files: Vec<(PathBuf, String)> = Vec::new();
        for entry in WalkBuilder::new(&self.project.path)
            .hidden(true)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .build()
        {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => continue,
            };
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }
            let abs = entry.into_path();
            if !self.filter.eligible(&self.project.path, &abs) {
                continue;
            }
            let rel = match self.rel_path_of(&abs) {
                Ok(r) => r,
                Err(_) => continue,
            };
            files.push((abs, rel));
        }
        files.sort_by(|a, b| a.1.cmp(&b.1));
        cancel.check()?;

        // Parse in parallel; a failing file is logged and dropped.
        let parsed: Vec<ParsedFile> = files
            .par_iter()
            .filter_map(|(abs, rel)| match self.parse_one(abs, rel, &branch) {
                Ok(p) => Some(p),
                Err(e) => {
                    warn!(file = rel.as_str(), error = %e, "skipping unreadable file");
                    None
                }
            })
            .collect();
        cancel.check()?;

        // Clear, then batch rewrite.
        self.store.clear()?;
        self.graph.clear();
        let mut documents = 0usize;
        for file in &parsed {
            cancel.check()?;
            if let Err(e) = self.store.replace_file(&file.rel_path, file.chunks.clone()) {
                warn!(file = file.rel_path.as_str(), error = %e, "failed to store chunks");
                continue;
            }
            documents += file.chunks.len();
            self.apply_dag(file);
        }

        if let Err(e) = self.graph.save() {
            warn!(error = %e, "graph snapshot save failed, keeping in-memory graph");
        }
        self.touch();

        info!(
            project = self.project.name.as_str(),
            files = parsed.len(),
            documents,
            nodes = self.graph.node_count(),
            edges = self.graph.edge_count(),
            time_ms = started.elapsed().as_millis() as u64,
            "full index complete"
        );
        Ok(documents)
    }

    /// Incremental single-file update. Returns `Ok(false)` when the
    /// filter rejects the path (a documented no-op).
    pub fn index_file(&self, abs_path: &Path) -> Result<bool> {
        {
            let mut state = self.state.write().unwrap();
            match *state {
                ProjectState::Stopped => {
                    return Err(Error::Unavailable("project stopped".into()))
                }
                ProjectState::Indexing => return Err(Error::Rebuilding),
                _ => *state = ProjectState::Updating,
            }
        }
        let result = self.index_file_inner(abs_path);
        *self.state.write().unwrap() = ProjectState::Ready;
        result
    }

    fn index_file_inner(&self, abs_path: &Path) -> Result<bool> {
        let _write = self.write_lock.lock().unwrap();
        let rel = self.rel_path_of(abs_path)?;

        if !abs_path.exists() {
            // The file vanished: drop whatever we had for it.
            self.store.remove_file(&rel)?;
            self.graph.remove_file(&rel);
            self.touch();
            return Ok(true);
        }

        if !self.filter.eligible(&self.project.path, abs_path) {
            return Ok(false);
        }

        let branch = lineage::current_branch(&self.project.path);
        let parsed = self.parse_one(abs_path, &rel, &branch)?;

        self.store.replace_file(&rel, parsed.chunks.clone())?;
        self.graph.remove_file(&rel);
        self.apply_dag(&parsed);
        self.touch();

        debug!(file = rel.as_str(), chunks = parsed.chunks.len(), "file reindexed");
        Ok(true)
    }

    /// Persist the graph snapshot if dirty. Called by the watcher's HEAD
    /// poll and on shutdown.
    pub fn save_dag(&self) -> Result<()> {
        self.graph.save()
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Cheap derived stats.
    pub fn stats(&self) -> Result<IndexStats> {
        self.guard_read()?;
        Ok(IndexStats {
            document_count: self.store.document_count(),
            file_count: self.store.file_count(),
            branch: lineage::current_branch(&self.project.path),
            last_updated: *self.last_updated.read().unwrap(),
            watcher_running: self.watcher_running.load(Ordering::SeqCst),
        })
    }

    pub fn search(&self, query: &SearchQuery) -> Result<Vec<ScoredChunk>> {
        self.guard_read()?;
        Ok(self.store.search(query))
    }

    pub fn chunks_for_file(&self, rel_path: &str) -> Result<Vec<Chunk>> {
        self.guard_read()?;
        Ok(self.store.chunks_for_file(rel_path))
    }

    /// Resolve a symbol (bare name or full node id) to graph nodes.
    fn resolve_symbol(&self, symbol: &str) -> Result<Vec<Node>> {
        let mut nodes = self.graph.find_by_name(symbol);
        if nodes.is_empty() {
            if let Some(node) = self.graph.node(symbol) {
                nodes.push(node);
            }
        }
        if nodes.is_empty() {
            return Err(Error::NotFound(format!("symbol {symbol}")));
        }
        Ok(nodes)
    }

    /// Outgoing edges per matching node.
    pub fn dependencies(&self, symbol: &str) -> Result<Vec<(Node, Vec<Edge>)>> {
        self.guard_read()?;
        Ok(self
            .resolve_symbol(symbol)?
            .into_iter()
            .map(|n| {
                let edges = self.graph.dependencies(&n.id);
                (n, edges)
            })
            .collect())
    }

    /// Incoming edges per matching node.
    pub fn dependents(&self, symbol: &str) -> Result<Vec<(Node, Vec<Edge>)>> {
        self.guard_read()?;
        Ok(self
            .resolve_symbol(symbol)?
            .into_iter()
            .map(|n| {
                let edges = self.graph.dependents(&n.id);
                (n, edges)
            })
            .collect())
    }

    /// Reverse-reachability impact for a file change.
    pub fn impact(&self, rel_path: &str) -> Result<Impact> {
        self.guard_read()?;
        Ok(self.graph.impact(rel_path))
    }

    /// Recent lineage records. `unavailable` when the project is not a
    /// git repository.
    pub fn history(&self, limit: usize) -> Result<Vec<crate::types::LineageEntry>> {
        self.guard_read()?;
        match &self.lineage {
            Some(tracker) => tracker.recent_history(limit),
            None => Err(Error::Unavailable("lineage disabled for this project".into())),
        }
    }

    pub fn lineage(&self) -> Option<&LineageTracker> {
        self.lineage.as_ref()
    }

    pub fn is_store_empty(&self) -> bool {
        self.store.is_empty()
    }
}
