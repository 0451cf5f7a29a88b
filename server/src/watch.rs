//! File watcher for incremental live re-indexing.
//!
//! Three loops share one stop flag: the event loop feeds a debounce map
//! from filesystem notifications, the debounce loop flushes settled
//! paths into `Indexer::index_file`, and the HEAD poll watches the git
//! HEAD hash to trigger commit summarization and a graph snapshot.
//! Errors inside the loops are logged and never propagated; a failing
//! file must not halt the watcher.

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::WatchConfig;
use crate::indexer::Indexer;
use crate::lineage;

/// Cadence of the debounce sweep.
const DEBOUNCE_TICK: Duration = Duration::from_millis(100);

/// Directory names never watched for changes.
const SKIP_DIRS: &[&str] =
    &[".git", "node_modules", "target", "vendor", "dist", "build", "__pycache__", ".next"];

/// Handle to one project's running watcher.
pub struct ProjectWatcher {
    stop: Arc<AtomicBool>,
    notify: Option<RecommendedWatcher>,
    handles: Vec<JoinHandle<()>>,
    indexer: Arc<Indexer>,
}

impl ProjectWatcher {
    /// Start watching a project tree. `service_data_dir` is excluded so
    /// the service never reacts to its own writes.
    pub fn start(
        indexer: Arc<Indexer>,
        service_data_dir: PathBuf,
        config: &WatchConfig,
    ) -> Option<Self> {
        let root = indexer.project().path.clone();
        let stop = Arc::new(AtomicBool::new(false));
        let pending: Arc<Mutex<HashMap<PathBuf, Instant>>> = Arc::new(Mutex::new(HashMap::new()));

        let (tx, rx) = mpsc::channel::<Event>();
        let mut notify = match RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                if let Ok(event) = res {
                    let _ = tx.send(event);
                }
            },
            notify::Config::default(),
        ) {
            Ok(w) => w,
            Err(e) => {
                warn!(project = indexer.project().name.as_str(), error = %e, "failed to create file watcher");
                return None;
            }
        };

        if let Err(e) = notify.watch(&root, RecursiveMode::Recursive) {
            warn!(root = %root.display(), error = %e, "failed to watch project root");
            return None;
        }

        let mut handles = Vec::new();

        // (a) Event loop: eligible create/write paths land in the
        // pending map with the current timestamp.
        {
            let stop = Arc::clone(&stop);
            let pending = Arc::clone(&pending);
            let root = root.clone();
            let data_dir = service_data_dir.clone();
            handles.push(std::thread::spawn(move || {
                event_loop(&rx, &stop, &pending, &root, &data_dir);
            }));
        }

        // (b) Debounce loop: flush settled paths into the indexer.
        {
            let stop = Arc::clone(&stop);
            let pending = Arc::clone(&pending);
            let indexer = Arc::clone(&indexer);
            let debounce = Duration::from_millis(config.debounce_ms);
            handles.push(std::thread::spawn(move || {
                debounce_loop(&stop, &pending, &indexer, debounce);
            }));
        }

        // (c) HEAD poll: summarize new commits, snapshot the graph.
        {
            let stop = Arc::clone(&stop);
            let indexer = Arc::clone(&indexer);
            let root = root.clone();
            let poll = Duration::from_secs(config.head_poll_secs);
            handles.push(std::thread::spawn(move || {
                head_poll_loop(&stop, &indexer, &root, poll);
            }));
        }

        indexer.set_watcher_running(true);
        info!(root = %root.display(), "watcher started");
        Some(Self { stop, notify: Some(notify), handles, indexer })
    }

    /// Signal the stop flag, drop the notify handle, and wait for every
    /// loop to observe the close. Returns false when a loop had to be
    /// abandoned past the deadline. Safe to call twice.
    pub fn stop(&mut self, timeout: Duration) -> bool {
        self.stop.store(true, Ordering::SeqCst);
        self.notify.take(); // closes the event source; rx disconnects

        let deadline = Instant::now() + timeout;
        let mut clean = true;
        for handle in self.handles.drain(..) {
            while !handle.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(10));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                warn!("watcher loop did not stop within deadline, abandoning");
                clean = false;
            }
        }
        self.indexer.set_watcher_running(false);
        clean
    }
}

impl Drop for ProjectWatcher {
    fn drop(&mut self) {
        self.stop(Duration::from_secs(2));
    }
}

// ---------------------------------------------------------------------------
// Loop bodies
// ---------------------------------------------------------------------------

/// True when the path may be forwarded for indexing at all: inside the
/// tree, not under a skipped directory, not service data.
fn watchable(path: &Path, root: &Path, service_data_dir: &Path) -> bool {
    if path.starts_with(service_data_dir) {
        return false;
    }
    let Ok(rel) = path.strip_prefix(root) else {
        return false;
    };
    !rel.components().any(|c| {
        c.as_os_str().to_str().is_some_and(|name| SKIP_DIRS.contains(&name))
    })
}

fn event_loop(
    rx: &mpsc::Receiver<Event>,
    stop: &AtomicBool,
    pending: &Mutex<HashMap<PathBuf, Instant>>,
    root: &Path,
    service_data_dir: &Path,
) {
    while !stop.load(Ordering::SeqCst) {
        let event = match rx.recv_timeout(DEBOUNCE_TICK) {
            Ok(e) => e,
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        };

        // Only create/write events matter; everything else is ignored.
        if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
            continue;
        }

        let now = Instant::now();
        let mut map = pending.lock().unwrap();
        for path in event.paths {
            if watchable(&path, root, service_data_dir) {
                // A later write during the window simply resets the clock.
                map.insert(path, now);
            }
        }
    }
}

fn debounce_loop(
    stop: &AtomicBool,
    pending: &Mutex<HashMap<PathBuf, Instant>>,
    indexer: &Arc<Indexer>,
    debounce: Duration,
) {
    while !stop.load(Ordering::SeqCst) {
        std::thread::sleep(DEBOUNCE_TICK);

        let due = collect_due(&mut pending.lock().unwrap(), Instant::now(), debounce);
        for path in due {
            if !path.exists() {
                continue;
            }
            match indexer.index_file(&path) {
                Ok(indexed) => {
                    if indexed {
                        debug!(path = %path.display(), "reindexed after change");
                    }
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to reindex changed file");
                }
            }
        }
    }
}

/// Remove and return every pending path whose last event is older than
/// the debounce window.
fn collect_due(
    pending: &mut HashMap<PathBuf, Instant>,
    now: Instant,
    debounce: Duration,
) -> Vec<PathBuf> {
    let due: Vec<PathBuf> = pending
        .iter()
        .filter(|(_, &t)| now.duration_since(t) >= debounce)
        .map(|(p, _)| p.clone())
        .collect();
    for path in &due {
        pending.remove(path);
    }
    due
}

fn head_poll_loop(stop: &AtomicBool, indexer: &Arc<Indexer>, root: &Path, poll: Duration) {
    let mut last_hash = lineage::head_hash(root);
    let mut next_poll = Instant::now() + poll;

    while !stop.load(Ordering::SeqCst) {
        std::thread::sleep(DEBOUNCE_TICK);
        if Instant::now() < next_poll {
            continue;
        }
        next_poll = Instant::now() + poll;

        let current = lineage::head_hash(root);
        if current.is_none() || current == last_hash {
            continue;
        }
        let hash = current.clone().unwrap();
        info!(commit = hash.as_str(), "HEAD moved, updating lineage");

        if let Some(tracker) = indexer.lineage() {
            if let Err(e) = tracker.summarize_commit(&hash) {
                warn!(commit = hash.as_str(), error = %e, "failed to summarize new commit");
            }
            // A pull or rebase can move HEAD by several commits at once;
            // backfill the ones in between.
            match tracker.scan_new_commits(10) {
                Ok(records) if !records.is_empty() => {
                    debug!(new = records.len(), "backfilled lineage records");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "lineage backfill failed"),
            }
        }
        if let Err(e) = indexer.save_dag() {
            warn!(error = %e, "failed to save graph after HEAD change");
        }
        last_hash = current;
    }
}
