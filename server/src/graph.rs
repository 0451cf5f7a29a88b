//! In-memory directed multigraph of code relations with persistent
//! snapshots.
//!
//! Nodes are owned once in a map; edges reference node ids as strings,
//! so dangling targets (symbols outside the project) are fine. Adjacency
//! and the file/package secondary indexes hold ids, which keeps the
//! snapshot trivial. One reader-writer lock guards everything.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::RwLock;
use tracing::{debug, warn};

use crate::error::Result;
use crate::types::{Edge, EdgeKind, Node};

/// Maximum reverse-BFS depth for impact analysis.
const MAX_IMPACT_DEPTH: usize = 5;

// ---------------------------------------------------------------------------
// Inner state
// ---------------------------------------------------------------------------

#[derive(Default)]
struct GraphInner {
    nodes: HashMap<String, Node>,
    edges: Vec<Edge>,
    /// node id -> indexes into `edges` where the node is the source.
    outgoing: HashMap<String, Vec<usize>>,
    /// node id -> indexes into `edges` where the node is the target.
    incoming: HashMap<String, Vec<usize>>,
    /// file path -> ids of nodes defined there.
    file_index: HashMap<String, Vec<String>>,
    /// package -> ids of nodes defined there.
    package_index: HashMap<String, Vec<String>>,
    edge_keys: HashSet<(String, String, EdgeKind, usize)>,
    dirty: bool,
}

impl GraphInner {
    fn index_edge(&mut self, idx: usize) {
        let edge = &self.edges[idx];
        self.outgoing.entry(edge.source.clone()).or_default().push(idx);
        self.incoming.entry(edge.target.clone()).or_default().push(idx);
        self.edge_keys.insert(edge.dedup_key());
    }

    fn rebuild_edge_indexes(&mut self) {
        self.outgoing.clear();
        self.incoming.clear();
        self.edge_keys.clear();
        for idx in 0..self.edges.len() {
            self.index_edge(idx);
        }
    }
}

/// Snapshot file layout: nodes sorted by id, edges sorted by
/// (source, target, kind, line), so equal graphs serialize
/// byte-identically.
#[derive(Serialize, Deserialize)]
struct Snapshot {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
}

/// Result of `impact`: direct dependents (one reverse hop) and indirect
/// dependents (hops 2 through 5).
#[derive(Debug, Default)]
pub struct Impact {
    pub direct: Vec<Node>,
    pub indirect: Vec<Node>,
}

// ---------------------------------------------------------------------------
// Public graph
// ---------------------------------------------------------------------------

/// Dependency graph for one project.
pub struct DependencyGraph {
    inner: RwLock<GraphInner>,
    snapshot_path: PathBuf,
}

impl DependencyGraph {
    pub fn new(snapshot_path: PathBuf) -> Self {
        Self { inner: RwLock::new(GraphInner::default()), snapshot_path }
    }

    /// Upsert a node by id and keep the secondary indexes consistent.
    pub fn add_node(&self, node: Node) {
        let mut g = self.inner.write().unwrap();

        if let Some(old) = g.nodes.get(&node.id).cloned() {
            if old.file_path != node.file_path {
                if let Some(ids) = g.file_index.get_mut(&old.file_path) {
                    ids.retain(|id| id != &node.id);
                }
            }
            if old.package != node.package {
                if let Some(ids) = g.package_index.get_mut(&old.package) {
                    ids.retain(|id| id != &node.id);
                }
            }
        }

        let file_ids = g.file_index.entry(node.file_path.clone()).or_default();
        if !file_ids.contains(&node.id) {
            file_ids.push(node.id.clone());
        }
        let pkg_ids = g.package_index.entry(node.package.clone()).or_default();
        if !pkg_ids.contains(&node.id) {
            pkg_ids.push(node.id.clone());
        }

        g.nodes.insert(node.id.clone(), node);
        g.dirty = true;
    }

    /// Append an edge unless the (source, target, kind, line) tuple is
    /// already present.
    pub fn add_edge(&self, edge: Edge) {
        let mut g = self.inner.write().unwrap();
        if g.edge_keys.contains(&edge.dedup_key()) {
            return;
        }
        g.edges.push(edge);
        let idx = g.edges.len() - 1;
        g.index_edge(idx);
        g.dirty = true;
    }

    pub fn node(&self, id: &str) -> Option<Node> {
        self.inner.read().unwrap().nodes.get(id).cloned()
    }

    /// Outgoing edges of a node (what it depends on). No traversal.
    pub fn dependencies(&self, id: &str) -> Vec<Edge> {
        let g = self.inner.read().unwrap();
        g.outgoing
            .get(id)
            .map(|idxs| idxs.iter().map(|&i| g.edges[i].clone()).collect())
            .unwrap_or_default()
    }

    /// Incoming edges of a node (what depends on it). No traversal.
    pub fn dependents(&self, id: &str) -> Vec<Edge> {
        let g = self.inner.read().unwrap();
        g.incoming
            .get(id)
            .map(|idxs| idxs.iter().map(|&i| g.edges[i].clone()).collect())
            .unwrap_or_default()
    }

    /// Exact, case-sensitive name lookup (linear scan).
    pub fn find_by_name(&self, name: &str) -> Vec<Node> {
        let g = self.inner.read().unwrap();
        let mut found: Vec<Node> =
            g.nodes.values().filter(|n| n.name == name).cloned().collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        found
    }

    /// Ids of nodes defined in a file.
    pub fn nodes_in_file(&self, file_path: &str) -> Vec<String> {
        self.inner.read().unwrap().file_index.get(file_path).cloned().unwrap_or_default()
    }

    /// Reverse BFS from every node defined in `file_path`, bounded to
    /// five hops. Level 1 is `direct`, levels 2..5 are `indirect`.
    pub fn impact(&self, file_path: &str) -> Impact {
        let g = self.inner.read().unwrap();

        let seeds: Vec<String> =
            g.file_index.get(file_path).cloned().unwrap_or_default();
        let mut visited: HashSet<String> = seeds.iter().cloned().collect();
        let mut frontier = seeds;
        let mut result = Impact::default();

        for depth in 1..=MAX_IMPACT_DEPTH {
            let mut next = Vec::new();
            for id in &frontier {
                let Some(edge_idxs) = g.incoming.get(id) else { continue };
                for &idx in edge_idxs {
                    let src = &g.edges[idx].source;
                    if visited.contains(src) {
                        continue;
                    }
                    visited.insert(src.clone());
                    next.push(src.clone());
                    // Synthetic sources (per-file import ids) have no node.
                    if let Some(node) = g.nodes.get(src) {
                        if depth == 1 {
                            result.direct.push(node.clone());
                        } else {
                            result.indirect.push(node.clone());
                        }
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }

        result.direct.sort_by(|a, b| a.id.cmp(&b.id));
        result.indirect.sort_by(|a, b| a.id.cmp(&b.id));
        result
    }

    /// Remove all nodes defined in a file, their outgoing edges, and any
    /// edges in other nodes' outgoing lists that reference them.
    pub fn remove_file(&self, file_path: &str) {
        let mut g = self.inner.write().unwrap();

        let removed: HashSet<String> = match g.file_index.remove(file_path) {
            Some(ids) => ids.into_iter().collect(),
            None => return,
        };

        for id in &removed {
            if let Some(node) = g.nodes.remove(id) {
                if let Some(pkg_ids) = g.package_index.get_mut(&node.package) {
                    pkg_ids.retain(|p| p != id);
                }
            }
            g.incoming.remove(id);
        }
        g.package_index.retain(|_, ids| !ids.is_empty());

        // Also drop edges that merely originate in the removed file
        // (synthetic per-file import sources carry no node).
        g.edges.retain(|e| {
            !removed.contains(&e.source)
                && !removed.contains(&e.target)
                && e.file_path != file_path
        });
        g.rebuild_edge_indexes();
        g.dirty = true;
    }

    /// Drop everything. Used by full rebuilds.
    pub fn clear(&self) {
        let mut g = self.inner.write().unwrap();
        *g = GraphInner { dirty: true, ..GraphInner::default() };
    }

    pub fn node_count(&self) -> usize {
        self.inner.read().unwrap().nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.inner.read().unwrap().edges.len()
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Write the snapshot if anything changed since the last save.
    /// I/O failure leaves in-memory state (and the dirty flag) unchanged.
    pub fn save(&self) -> Result<()> {
        // Write lock for the whole save so a concurrent mutation cannot
        // slip between snapshotting and clearing the dirty flag.
        let mut g = self.inner.write().unwrap();
        if !g.dirty {
            return Ok(());
        }

        let snapshot = {
            let mut nodes: Vec<Node> = g.nodes.values().cloned().collect();
            nodes.sort_by(|a, b| a.id.cmp(&b.id));
            let mut edges = g.edges.clone();
            edges.sort_by(|a, b| {
                (&a.source, &a.target, a.kind, a.line).cmp(&(&b.source, &b.target, b.kind, b.line))
            });
            Snapshot { nodes, edges }
        };

        if let Some(parent) = self.snapshot_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.snapshot_path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&snapshot)?)?;
        std::fs::rename(&tmp, &self.snapshot_path)?;

        g.dirty = false;
        debug!(
            path = %self.snapshot_path.display(),
            nodes = snapshot.nodes.len(),
            edges = snapshot.edges.len(),
            "graph snapshot saved"
        );
        Ok(())
    }

    /// Load the snapshot if one exists. Returns whether anything loaded.
    /// A corrupt snapshot is logged and treated as absent.
    pub fn load(&self) -> Result<bool> {
        if !self.snapshot_path.exists() {
            return Ok(false);
        }
        let raw = std::fs::read_to_string(&self.snapshot_path)?;
        let snapshot: Snapshot = match serde_json::from_str(&raw) {
            Ok(s) => s,
            Err(e) => {
                warn!(path = %self.snapshot_path.display(), error = %e, "corrupt graph snapshot, starting empty");
                return Ok(false);
            }
        };

        let mut g = self.inner.write().unwrap();
        *g = GraphInner::default();
        g.edges = snapshot.edges;
        g.rebuild_edge_indexes();
        for node in snapshot.nodes {
            let file_ids = g.file_index.entry(node.file_path.clone()).or_default();
            if !file_ids.contains(&node.id) {
                file_ids.push(node.id.clone());
            }
            let pkg_ids = g.package_index.entry(node.package.clone()).or_default();
            if !pkg_ids.contains(&node.id) {
                pkg_ids.push(node.id.clone());
            }
            g.nodes.insert(node.id.clone(), node);
        }
        g.dirty = false;
        Ok(true)
    }

    /// Consistency probe used by tests: every node id must appear in its
    /// file and package indexes.
    #[cfg(test)]
    fn check_secondary_indexes(&self) -> bool {
        let g = self.inner.read().unwrap();
        g.nodes.values().all(|n| {
            g.file_index.get(&n.file_path).is_some_and(|ids| ids.contains(&n.id))
                && g.package_index.get(&n.package).is_some_and(|ids| ids.contains(&n.id))
        })
    }
}
