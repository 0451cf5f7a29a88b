//! Commit lineage: one immutable JSON record per summarized commit.
//!
//! Commit metadata and diffs come from libgit2. The textual summary is
//! produced by a pluggable [`CommitSummarizer`]; without one, the
//! commit message stands in. Records live under
//! `index/lineage/<short_hash>.json` and survive restart.

use chrono::{DateTime, Utc};
use git2::{DiffFormat, Repository, Sort};
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::types::LineageEntry;

/// Diffs passed to the summarizer are truncated to this many characters.
const MAX_DIFF_CHARS: usize = 5_000;

/// Length of the short hash used as record key and file name.
const SHORT_HASH_LEN: usize = 8;

// ---------------------------------------------------------------------------
// Summarizer plug point
// ---------------------------------------------------------------------------

/// Produces a one-shot textual summary of a commit.
pub trait CommitSummarizer: Send + Sync {
    /// Model identifier recorded in the lineage entry.
    fn model(&self) -> &str;
    fn summarize(&self, message: &str, diff: &str) -> Result<String>;
}

/// Runs a configured external command with the commit message and diff
/// on stdin, expecting the summary on stdout. Enforces a deadline.
pub struct CommandSummarizer {
    command: String,
    timeout: Duration,
}

impl CommandSummarizer {
    pub fn new(command: String, timeout: Duration) -> Self {
        Self { command, timeout }
    }
}

impl CommitSummarizer for CommandSummarizer {
    fn model(&self) -> &str {
        &self.command
    }

    fn summarize(&self, message: &str, diff: &str) -> Result<String> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            let _ = write!(stdin, "Commit message:\n{message}\n\nDiff:\n{diff}\n");
        }

        let deadline = Instant::now() + self.timeout;
        loop {
            match child.try_wait()? {
                Some(status) => {
                    let output = child.wait_with_output()?;
                    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
                    if status.success() && !text.is_empty() {
                        return Ok(text);
                    }
                    return Err(Error::Unavailable(format!(
                        "summarizer exited with {status}"
                    )));
                }
                None => {
                    if Instant::now() >= deadline {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(Error::Unavailable("summarizer timed out".into()));
                    }
                    std::thread::sleep(Duration::from_millis(50));
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Git helpers shared with the watcher and stats
// ---------------------------------------------------------------------------

/// Current HEAD commit hash, or None outside a git repository.
pub fn head_hash(repo_root: &std::path::Path) -> Option<String> {
    let repo = Repository::open(repo_root).ok()?;
    let head = repo.head().ok()?;
    head.peel_to_commit().ok().map(|c| c.id().to_string())
}

/// Current branch name; "detached" when HEAD is not on a branch,
/// empty outside a repository.
pub fn current_branch(repo_root: &std::path::Path) -> String {
    let Ok(repo) = Repository::open(repo_root) else {
        return String::new();
    };
    let result = match repo.head() {
        Ok(head) if head.is_branch() => head.shorthand().unwrap_or("detached").to_string(),
        Ok(_) => "detached".to_string(),
        Err(_) => String::new(),
    };
    result
}

fn format_commit_time(time: git2::Time) -> String {
    DateTime::from_timestamp(time.seconds(), 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default()
}

/// Raw commit details before summarization.
#[derive(Debug)]
pub struct CommitDetails {
    pub hash: String,
    pub short_hash: String,
    pub author: String,
    pub date: String,
    pub message: String,
    pub files_changed: Vec<String>,
    pub diff: String,
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

/// Per-project lineage tracker.
pub struct LineageTracker {
    repo_root: PathBuf,
    record_dir: PathBuf,
    summarizer: Option<Arc<dyn CommitSummarizer>>,
    records: RwLock<HashMap<String, LineageEntry>>,
}

impl std::fmt::Debug for LineageTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineageTracker")
            .field("repo_root", &self.repo_root)
            .field("record_dir", &self.record_dir)
            .field("has_summarizer", &self.summarizer.is_some())
            .field("records", &self.records)
            .finish()
    }
}

impl LineageTracker {
    /// Create a tracker. Fails with `unavailable` when `repo_root` is
    /// not a git repository.
    pub fn new(
        repo_root: PathBuf,
        record_dir: PathBuf,
        summarizer: Option<Arc<dyn CommitSummarizer>>,
    ) -> Result<Self> {
        Repository::open(&repo_root)
            .map_err(|_| Error::Unavailable(format!("{} is not a repository", repo_root.display())))?;

        let tracker = Self { repo_root, record_dir, summarizer, records: RwLock::new(HashMap::new()) };
        tracker.load_records()?;
        Ok(tracker)
    }

    fn load_records(&self) -> Result<()> {
        if !self.record_dir.exists() {
            return Ok(());
        }
        let mut records = self.records.write().unwrap();
        for entry in std::fs::read_dir(&self.record_dir)? {
            let entry = entry?;
            if entry.path().extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match std::fs::read_to_string(entry.path())
                .map_err(Error::from)
                .and_then(|raw| serde_json::from_str::<LineageEntry>(&raw).map_err(Error::from))
            {
                Ok(record) => {
                    records.insert(record.short_hash.clone(), record);
                }
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "skipping corrupt lineage record");
                }
            }
        }
        debug!(records = records.len(), "lineage records loaded");
        Ok(())
    }

    fn short(hash: &str) -> String {
        hash.chars().take(SHORT_HASH_LEN).collect()
    }

    /// Read commit metadata, the changed-file list, and a truncated diff.
    pub fn parse_commit(&self, hash: &str) -> Result<CommitDetails> {
        let repo = Repository::open(&self.repo_root)?;
        let object = repo
            .revparse_single(hash)
            .map_err(|_| Error::NotFound(format!("commit {hash}")))?;
        let commit =
            object.peel_to_commit().map_err(|_| Error::NotFound(format!("commit {hash}")))?;

        let tree = commit.tree()?;
        let parent_tree = commit.parent(0).ok().and_then(|p| p.tree().ok());
        let diff = repo.diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), None)?;

        let mut files_changed = Vec::new();
        diff.foreach(
            &mut |delta, _| {
                if let Some(path) = delta
                    .new_file()
                    .path()
                    .or_else(|| delta.old_file().path())
                    .and_then(|p| p.to_str())
                {
                    files_changed.push(path.to_string());
                }
                true
            },
            None,
            None,
            None,
        )?;

        let mut diff_text = String::new();
        // Stop accumulating once the cap is hit; the print callback has
        // no early-exit, so just skip further lines.
        diff.print(DiffFormat::Patch, |_, _, line| {
            if diff_text.len() < MAX_DIFF_CHARS {
                diff_text.push(line.origin());
                diff_text.push_str(&String::from_utf8_lossy(line.content()));
            }
            true
        })?;
        diff_text.truncate(MAX_DIFF_CHARS);

        let author = commit.author();
        Ok(CommitDetails {
            hash: commit.id().to_string(),
            short_hash: Self::short(&commit.id().to_string()),
            author: author.name().unwrap_or("unknown").to_string(),
            date: format_commit_time(author.when()),
            message: commit.message().unwrap_or("").trim().to_string(),
            files_changed,
            diff: diff_text,
        })
    }

    /// Summarize a commit. Idempotent: an existing record is returned
    /// as-is and the summarizer is not called again.
    pub fn summarize_commit(&self, hash: &str) -> Result<LineageEntry> {
        let short = Self::short(hash);
        if let Some(existing) = self.records.read().unwrap().get(&short) {
            return Ok(existing.clone());
        }

        let details = self.parse_commit(hash)?;

        let (summary, summary_model) = match &self.summarizer {
            Some(s) => match s.summarize(&details.message, &details.diff) {
                Ok(text) => (text, s.model().to_string()),
                Err(e) => {
                    warn!(commit = details.short_hash.as_str(), error = %e, "summarizer failed, falling back to message");
                    (details.message.clone(), "fallback".to_string())
                }
            },
            None => (details.message.clone(), "none".to_string()),
        };

        let record = LineageEntry {
            commit_hash: details.hash,
            short_hash: details.short_hash.clone(),
            author: details.author,
            date: details.date,
            message: details.message,
            files_changed: details.files_changed,
            summary,
            summary_model,
            summarized_at: Utc::now(),
        };

        self.persist(&record)?;
        self.records.write().unwrap().insert(details.short_hash, record.clone());
        Ok(record)
    }

    fn persist(&self, record: &LineageEntry) -> Result<()> {
        std::fs::create_dir_all(&self.record_dir)?;
        let path = self.record_dir.join(format!("{}.json", record.short_hash));
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(record)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn recent_hashes(&self, limit: usize) -> Result<Vec<String>> {
        let repo = Repository::open(&self.repo_root)?;
        let mut revwalk = repo.revwalk()?;
        revwalk.push_head()?;
        revwalk.set_sorting(Sort::TIME)?;

        let mut hashes = Vec::new();
        for oid in revwalk {
            if hashes.len() >= limit {
                break;
            }
            if let Ok(oid) = oid {
                hashes.push(oid.to_string());
            }
        }
        Ok(hashes)
    }

    /// Summarize any of the most recent `limit` commits that are not yet
    /// stored. Returns the new records, most recent first.
    pub fn scan_new_commits(&self, limit: usize) -> Result<Vec<LineageEntry>> {
        let mut new_records = Vec::new();
        for hash in self.recent_hashes(limit)? {
            let short = Self::short(&hash);
            if self.records.read().unwrap().contains_key(&short) {
                continue;
            }
            match self.summarize_commit(&hash) {
                Ok(record) => new_records.push(record),
                Err(e) => warn!(commit = short.as_str(), error = %e, "failed to summarize commit"),
            }
        }
        Ok(new_records)
    }

    /// Records for the last `limit` commits. Commits without a stored
    /// summary get a lightweight `pending` entry.
    pub fn recent_history(&self, limit: usize) -> Result<Vec<LineageEntry>> {
        let mut history = Vec::new();
        for hash in self.recent_hashes(limit)? {
            let short = Self::short(&hash);
            if let Some(record) = self.records.read().unwrap().get(&short) {
                history.push(record.clone());
                continue;
            }
            let details = match self.parse_commit(&hash) {
                Ok(d) => d,
                Err(e) => {
                    warn!(commit = short.as_str(), error = %e, "unreadable commit in history");
                    continue;
                }
            };
            history.push(LineageEntry {
                commit_hash: details.hash,
                short_hash: details.short_hash,
                author: details.author,
                date: details.date,
                message: details.message,
                files_changed: details.files_changed,
                summary: "pending".to_string(),
                summary_model: "pending".to_string(),
                summarized_at: Utc::now(),
            });
        }
        Ok(history)
    }

    pub fn record_count(&self) -> usize {
        self.records.read().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn git(root: &Path, args: &[&str]) {
        let status = Command::new("git")
            .args(args)
            .current_dir(root)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .expect("git invocation failed");
        assert!(status.success(), "git {args:?} failed");
    }

    fn commit_all(root: &Path, message: &str) {
        git(root, &["add", "-A"]);
        git(
            root,
            &[
                "-c",
                "user.email=test@test.com",
                "-c",
                "user.name=Test",
                "commit",
                "--allow-empty",
                "-m",
                message,
            ],
        );
    }

    fn init_repo(root: &Path) {
        git(root, &["init", "-q"]);
        std::fs::write(root.join("main.go"), "package main\n").unwrap();
        commit_all(root, "initial commit");
    }

    struct CountingSummarizer {
        calls: AtomicUsize,
    }

    impl CommitSummarizer for CountingSummarizer {
        fn model(&self) -> &str {
            "counting"
        }
        fn summarize(&self, _message: &str, _diff: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("a tidy summary".to_string())
        }
    }

    struct FailingSummarizer;
    impl CommitSummarizer for FailingSummarizer {
        fn model(&self) -> &str {
            "flaky"
        }
        fn summarize(&self, _message: &str, _diff: &str) -> Result<String> {
            Err(Error::Unavailable("no backend".into()))
        }
    }

    fn tracker_with(
        root: &Path,
        dir: &Path,
        summarizer: Option<Arc<dyn CommitSummarizer>>,
    ) -> LineageTracker {
        LineageTracker::new(root.to_path_buf(), dir.join("lineage"), summarizer).unwrap()
    }

    #[test]
    fn test_not_a_repo_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let err =
            LineageTracker::new(dir.path().to_path_buf(), dir.path().join("lineage"), None)
                .unwrap_err();
        assert_eq!(err.tag(), "unavailable");
    }

    #[test]
    fn test_parse_commit_details() {
        let repo = tempfile::tempdir().unwrap();
        init_repo(repo.path());
        std::fs::write(repo.path().join("feature.go"), "package main\n\nfunc Feature() {}\n")
            .unwrap();
        commit_all(repo.path(), "add feature");

        let data = tempfile::tempdir().unwrap();
        let tracker = tracker_with(repo.path(), data.path(), None);
        let head = head_hash(repo.path()).unwrap();

        let details = tracker.parse_commit(&head).unwrap();
        assert_eq!(details.hash, head);
        assert_eq!(details.short_hash.len(), 8);
        assert_eq!(details.author, "Test");
        assert_eq!(details.message, "add feature");
        assert_eq!(details.files_changed, vec!["feature.go".to_string()]);
        assert!(details.diff.contains("Feature"));
        assert!(details.diff.len() <= 5_000);
    }

    #[test]
    fn test_summarize_without_summarizer_uses_message() {
        let repo = tempfile::tempdir().unwrap();
        init_repo(repo.path());
        let data = tempfile::tempdir().unwrap();
        let tracker = tracker_with(repo.path(), data.path(), None);

        let head = head_hash(repo.path()).unwrap();
        let record = tracker.summarize_commit(&head).unwrap();
        assert_eq!(record.summary, "initial commit");
        assert_eq!(record.summary_model, "none");

        // Record landed on disk under the short hash.
        let path = data.path().join("lineage").join(format!("{}.json", record.short_hash));
        assert!(path.exists());
    }

    #[test]
    fn test_summarize_is_idempotent() {
        let repo = tempfile::tempdir().unwrap();
        init_repo(repo.path());
        let data = tempfile::tempdir().unwrap();

        let counter = Arc::new(CountingSummarizer { calls: AtomicUsize::new(0) });
        let tracker = tracker_with(repo.path(), data.path(), Some(counter.clone()));

        let head = head_hash(repo.path()).unwrap();
        let first = tracker.summarize_commit(&head).unwrap();
        let second = tracker.summarize_commit(&head).unwrap();

        assert_eq!(counter.calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.summary, "a tidy summary");
        assert_eq!(first.summary_model, "counting");
        assert_eq!(first.commit_hash, second.commit_hash);
        assert_eq!(first.summarized_at, second.summarized_at);
    }

    #[test]
    fn test_summarizer_failure_falls_back() {
        let repo = tempfile::tempdir().unwrap();
        init_repo(repo.path());
        let data = tempfile::tempdir().unwrap();
        let tracker = tracker_with(repo.path(), data.path(), Some(Arc::new(FailingSummarizer)));

        let head = head_hash(repo.path()).unwrap();
        let record = tracker.summarize_commit(&head).unwrap();
        assert_eq!(record.summary, "initial commit");
        assert_eq!(record.summary_model, "fallback");
    }

    #[test]
    fn test_scan_new_commits_most_recent_first() {
        let repo = tempfile::tempdir().unwrap();
        init_repo(repo.path());
        commit_all(repo.path(), "second");
        commit_all(repo.path(), "third");

        let data = tempfile::tempdir().unwrap();
        let tracker = tracker_with(repo.path(), data.path(), None);

        let new_records = tracker.scan_new_commits(10).unwrap();
        assert_eq!(new_records.len(), 3);
        assert_eq!(new_records[0].message, "third");
        assert_eq!(new_records[2].message, "initial commit");

        // Second scan finds nothing new.
        assert!(tracker.scan_new_commits(10).unwrap().is_empty());
        assert_eq!(tracker.record_count(), 3);
    }

    #[test]
    fn test_recent_history_synthesizes_pending() {
        let repo = tempfile::tempdir().unwrap();
        init_repo(repo.path());
        commit_all(repo.path(), "second");

        let data = tempfile::tempdir().unwrap();
        let tracker = tracker_with(repo.path(), data.path(), None);

        // Summarize only the older commit; the newer one has no record.
        let hashes = tracker.recent_hashes(2).unwrap();
        tracker.summarize_commit(&hashes[1]).unwrap();

        let history = tracker.recent_history(2).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].summary_model, "pending");
        assert_eq!(history[1].summary_model, "none");
    }

    #[test]
    fn test_records_survive_restart() {
        let repo = tempfile::tempdir().unwrap();
        init_repo(repo.path());
        let data = tempfile::tempdir().unwrap();

        let head = head_hash(repo.path()).unwrap();
        {
            let tracker = tracker_with(repo.path(), data.path(), None);
            tracker.summarize_commit(&head).unwrap();
        }

        let tracker = tracker_with(repo.path(), data.path(), None);
        assert_eq!(tracker.record_count(), 1);
        let record = tracker.summarize_commit(&head).unwrap();
        assert_eq!(record.summary_model, "none");
    }

    #[test]
    fn test_branch_and_head_helpers() {
        let repo = tempfile::tempdir().unwrap();
        init_repo(repo.path());

        let branch = current_branch(repo.path());
        assert!(branch == "main" || branch == "master", "unexpected branch {branch}");
        assert_eq!(head_hash(repo.path()).unwrap().len(), 40);

        let plain = tempfile::tempdir().unwrap();
        assert!(head_hash(plain.path()).is_none());
        assert_eq!(current_branch(plain.path()), "");
    }

    #[test]
    fn test_command_summarizer_runs_and_times_out() {
        let ok = CommandSummarizer::new("head -c 100".into(), Duration::from_secs(5));
        let out = ok.summarize("msg", "diff body").unwrap();
        assert!(out.contains("msg"));

        let slow = CommandSummarizer::new("sleep 5".into(), Duration::from_millis(200));
        let err = slow.summarize("msg", "diff").unwrap_err();
        assert_eq!(err.tag(), "unavailable");
    }
}
