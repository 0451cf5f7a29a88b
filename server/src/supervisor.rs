//! Multi-project supervisor: the registry of projects and the owner of
//! each project's indexer and watcher.
//!
//! The registry file is the only piece of state the supervisor persists,
//! always via write-temp-then-rename. Per-project faults are isolated:
//! a project that fails to come up is warned about and skipped, never
//! fatal to the service.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{info, warn};

use crate::config::{registry_path, project_data_dir, ServiceConfig, DEFAULT_SUMMARIZER_TIMEOUT_SECS};
use crate::error::{Error, Result};
use crate::indexer::{CancelToken, Indexer};
use crate::lineage::{CommandSummarizer, CommitSummarizer};
use crate::store::Embedder;
use crate::types::{project_id, Project};
use crate::watch::ProjectWatcher;

/// How long `shutdown` waits for each watcher before abandoning it.
const WATCHER_STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct SupervisorInner {
    projects: HashMap<String, Project>,
    indexers: HashMap<String, Arc<Indexer>>,
    watchers: HashMap<String, ProjectWatcher>,
}

/// Owns the project → indexer/watcher maps behind one reader-writer
/// lock. All mutations hold the write side.
pub struct Supervisor {
    data_dir: PathBuf,
    config: ServiceConfig,
    summarizer: Option<Arc<dyn CommitSummarizer>>,
    embedder: Option<Arc<dyn Embedder>>,
    inner: RwLock<SupervisorInner>,
}

impl Supervisor {
    pub fn new(data_dir: PathBuf, config: ServiceConfig) -> Self {
        let summarizer: Option<Arc<dyn CommitSummarizer>> =
            config.summarizer.command.clone().map(|command| {
                let timeout = Duration::from_secs(if config.summarizer.timeout_secs == 0 {
                    DEFAULT_SUMMARIZER_TIMEOUT_SECS
                } else {
                    config.summarizer.timeout_secs
                });
                Arc::new(CommandSummarizer::new(command, timeout)) as Arc<dyn CommitSummarizer>
            });

        Self { data_dir, config, summarizer, embedder: None, inner: RwLock::new(SupervisorInner::default()) }
    }

    /// Install an embedding function for vector-blended search scoring.
    /// Applies to indexers created afterwards.
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    // -----------------------------------------------------------------------
    // Registry persistence
    // -----------------------------------------------------------------------

    fn load_registry(&self) -> Vec<Project> {
        let path = registry_path(&self.data_dir);
        let raw = match std::fs::read_to_string(&path) {
            Ok(r) => r,
            Err(_) => return Vec::new(),
        };
        match serde_json::from_str::<Vec<Project>>(&raw) {
            Ok(projects) => projects,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable registry, starting empty");
                Vec::new()
            }
        }
    }

    /// Persist the registry atomically. Caller holds the write lock.
    fn persist_registry(&self, inner: &SupervisorInner) -> Result<()> {
        let mut projects: Vec<&Project> = inner.projects.values().collect();
        projects.sort_by(|a, b| a.id.cmp(&b.id));

        std::fs::create_dir_all(&self.data_dir)?;
        let path = registry_path(&self.data_dir);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&projects)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Project lifecycle
    // -----------------------------------------------------------------------

    /// Bring one project online: indexer (restoring persisted state),
    /// auto-build when the store is empty, then the watcher.
    fn spin_up(&self, inner: &mut SupervisorInner, project: Project) -> Result<()> {
        let pdir = project_data_dir(&self.data_dir, &project.id);
        let indexer = Arc::new(Indexer::new(
            project.clone(),
            &pdir,
            &self.config,
            self.summarizer.clone(),
            self.embedder.clone(),
        )?);

        if indexer.is_store_empty() {
            info!(project = project.name.as_str(), "store empty, building index");
            indexer.index_all(&CancelToken::new())?;
        }

        let watcher =
            ProjectWatcher::start(Arc::clone(&indexer), self.data_dir.clone(), &self.config.watch);
        if let Some(w) = watcher {
            inner.watchers.insert(project.id.clone(), w);
        }

        inner.indexers.insert(project.id.clone(), indexer);
        inner.projects.insert(project.id.clone(), project);
        Ok(())
    }

    /// Load the persisted registry and start every project whose path
    /// still exists. Per-project failures are warned and skipped.
    pub fn initialize(&self) -> Result<()> {
        let entries = self.load_registry();
        let mut inner = self.inner.write().unwrap();

        for project in entries {
            if !project.path.exists() {
                warn!(
                    project = project.name.as_str(),
                    path = %project.path.display(),
                    "registered path no longer exists, skipping"
                );
                continue;
            }
            if let Err(e) = self.spin_up(&mut inner, project.clone()) {
                warn!(project = project.name.as_str(), error = %e, "failed to start project, skipping");
            }
        }

        info!(projects = inner.projects.len(), "supervisor initialized");
        Ok(())
    }

    /// Register a new project by path and bring it online.
    pub fn register(&self, path: &Path) -> Result<Project> {
        let canonical = path
            .canonicalize()
            .map_err(|_| Error::InvalidInput(format!("path not found: {}", path.display())))?;
        if !canonical.is_dir() {
            return Err(Error::InvalidInput(format!(
                "not a directory: {}",
                canonical.display()
            )));
        }

        let id = project_id(&canonical);
        let mut inner = self.inner.write().unwrap();
        if inner.projects.contains_key(&id) {
            return Err(Error::AlreadyExists(format!(
                "already registered: {}",
                canonical.display()
            )));
        }

        let name = canonical
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("project")
            .to_string();
        let project =
            Project { id: id.clone(), path: canonical, name, registered_at: chrono::Utc::now() };

        self.spin_up(&mut inner, project.clone())?;
        if let Err(e) = self.persist_registry(&inner) {
            // Roll back so the registry and the maps agree.
            inner.projects.remove(&id);
            inner.indexers.remove(&id);
            if let Some(mut w) = inner.watchers.remove(&id) {
                w.stop(WATCHER_STOP_TIMEOUT);
            }
            return Err(e);
        }

        info!(project = project.name.as_str(), id = id.as_str(), "project registered");
        Ok(project)
    }

    /// Unregister a project. Its on-disk index data is retained.
    pub fn unregister(&self, id: &str) -> Result<Project> {
        let mut inner = self.inner.write().unwrap();
        let project = inner
            .projects
            .remove(id)
            .ok_or_else(|| Error::NotFound(format!("project {id}")))?;

        if let Some(mut watcher) = inner.watchers.remove(id) {
            watcher.stop(WATCHER_STOP_TIMEOUT);
        }
        if let Some(indexer) = inner.indexers.remove(id) {
            if let Err(e) = indexer.save_dag() {
                warn!(project = project.name.as_str(), error = %e, "graph save on unregister failed");
            }
            indexer.stop();
        }

        self.persist_registry(&inner)?;
        info!(project = project.name.as_str(), id = id, "project unregistered");
        Ok(project)
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn get_project(&self, id: &str) -> Result<Project> {
        self.inner
            .read()
            .unwrap()
            .projects
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("project {id}")))
    }

    pub fn get_indexer(&self, id: &str) -> Result<Arc<Indexer>> {
        self.inner
            .read()
            .unwrap()
            .indexers
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("project {id}")))
    }

    /// All registered projects, sorted by registration time then id.
    pub fn list_projects(&self) -> Vec<Project> {
        let inner = self.inner.read().unwrap();
        let mut projects: Vec<Project> = inner.projects.values().cloned().collect();
        projects.sort_by(|a, b| {
            a.registered_at.cmp(&b.registered_at).then_with(|| a.id.cmp(&b.id))
        });
        projects
    }

    pub fn project_count(&self) -> usize {
        self.inner.read().unwrap().projects.len()
    }

    /// Stop all watchers (bounded wait per watcher) and indexers. The
    /// registry has no pending changes, so it is not re-persisted.
    pub fn shutdown(&self) {
        let mut inner = self.inner.write().unwrap();
        for (id, watcher) in inner.watchers.iter_mut() {
            if !watcher.stop(WATCHER_STOP_TIMEOUT) {
                warn!(project = id.as_str(), "watcher abandoned during shutdown");
            }
        }
        inner.watchers.clear();

        for indexer in inner.indexers.values() {
            if let Err(e) = indexer.save_dag() {
                warn!(error = %e, "graph save during shutdown failed");
            }
            indexer.stop();
        }
        info!("supervisor shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SearchQuery;

    fn write_sample_project(root: &Path) {
        std::fs::write(
            root.join("main.go"),
            "package main\n\n// NewAlphaGreeter creates a new greeter with default settings\nfunc NewAlphaGreeter() string {\n\treturn \"hello\"\n}\n",
        )
        .unwrap();
    }

    fn supervisor(data: &Path) -> Supervisor {
        Supervisor::new(data.to_path_buf(), ServiceConfig::default())
    }

    #[test]
    fn test_register_builds_and_searches() {
        let data = tempfile::tempdir().unwrap();
        let repo = tempfile::tempdir().unwrap();
        write_sample_project(repo.path());

        let sup = supervisor(data.path());
        let project = sup.register(repo.path()).unwrap();
        assert_eq!(project.id.len(), 16);

        let indexer = sup.get_indexer(&project.id).unwrap();
        let stats = indexer.stats().unwrap();
        assert!(stats.document_count >= 1);
        assert!(stats.watcher_running);

        let hits = indexer
            .search(&SearchQuery { query: "Alpha".into(), ..Default::default() })
            .unwrap();
        assert_eq!(hits[0].chunk.symbol_name, "NewAlphaGreeter");

        sup.shutdown();
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let data = tempfile::tempdir().unwrap();
        let repo = tempfile::tempdir().unwrap();
        write_sample_project(repo.path());

        let sup = supervisor(data.path());
        sup.register(repo.path()).unwrap();
        let err = sup.register(repo.path()).unwrap_err();
        assert_eq!(err.tag(), "already_exists");
        assert_eq!(sup.project_count(), 1);
        sup.shutdown();
    }

    #[test]
    fn test_register_rejects_bad_paths() {
        let data = tempfile::tempdir().unwrap();
        let sup = supervisor(data.path());

        let err = sup.register(Path::new("/definitely/not/here")).unwrap_err();
        assert_eq!(err.tag(), "invalid_input");

        let repo = tempfile::tempdir().unwrap();
        let file = repo.path().join("plain.txt");
        std::fs::write(&file, "x").unwrap();
        let err = sup.register(&file).unwrap_err();
        assert_eq!(err.tag(), "invalid_input");
    }

    #[test]
    fn test_unregister_retains_data_and_reregister_same_id() {
        let data = tempfile::tempdir().unwrap();
        let repo = tempfile::tempdir().unwrap();
        write_sample_project(repo.path());

        let sup = supervisor(data.path());
        let project = sup.register(repo.path()).unwrap();
        let id = project.id.clone();

        sup.unregister(&id).unwrap();
        assert_eq!(sup.project_count(), 0);
        assert!(sup.get_indexer(&id).is_err());
        // Indexed data stays on disk after unregister.
        assert!(project_data_dir(data.path(), &id).join("index").exists());

        // Same path registers again under the same id.
        let again = sup.register(repo.path()).unwrap();
        assert_eq!(again.id, id);
        sup.shutdown();
    }

    #[test]
    fn test_unregister_unknown_is_not_found() {
        let data = tempfile::tempdir().unwrap();
        let sup = supervisor(data.path());
        assert_eq!(sup.unregister("ffffffffffffffff").unwrap_err().tag(), "not_found");
    }

    #[test]
    fn test_initialize_restores_registry() {
        let data = tempfile::tempdir().unwrap();
        let repo = tempfile::tempdir().unwrap();
        write_sample_project(repo.path());

        let id = {
            let sup = supervisor(data.path());
            let project = sup.register(repo.path()).unwrap();
            sup.shutdown();
            project.id
        };

        let sup = supervisor(data.path());
        sup.initialize().unwrap();
        assert_eq!(sup.project_count(), 1);
        let indexer = sup.get_indexer(&id).unwrap();
        // Restored from disk without a rebuild.
        assert!(indexer.stats().unwrap().document_count >= 1);
        sup.shutdown();
    }

    #[test]
    fn test_initialize_skips_vanished_paths() {
        let data = tempfile::tempdir().unwrap();
        let repo = tempfile::tempdir().unwrap();
        write_sample_project(repo.path());

        {
            let sup = supervisor(data.path());
            sup.register(repo.path()).unwrap();
            sup.shutdown();
        }
        drop(repo); // project directory disappears

        let sup = supervisor(data.path());
        sup.initialize().unwrap();
        assert_eq!(sup.project_count(), 0);
    }

    #[test]
    fn test_corrupt_registry_treated_as_empty() {
        let data = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(data.path()).unwrap();
        std::fs::write(registry_path(data.path()), "not json at all").unwrap();

        let sup = supervisor(data.path());
        sup.initialize().unwrap();
        assert_eq!(sup.project_count(), 0);
    }

    #[test]
    fn test_list_projects_sorted() {
        let data = tempfile::tempdir().unwrap();
        let repo1 = tempfile::tempdir().unwrap();
        let repo2 = tempfile::tempdir().unwrap();
        write_sample_project(repo1.path());
        write_sample_project(repo2.path());

        let sup = supervisor(data.path());
        let p1 = sup.register(repo1.path()).unwrap();
        let p2 = sup.register(repo2.path()).unwrap();

        let listed = sup.list_projects();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, p1.id);
        assert_eq!(listed[1].id, p2.id);
        sup.shutdown();
    }
}
