//! Test harness for integration tests.
//!
//! Builds a `Supervisor` over a fixture project copied into a temp dir
//! (with a real git history), registered and fully indexed. Exercises
//! the same code paths as the HTTP and MCP layers, without transport.

pub mod fixtures;

use codescout_server::config::ServiceConfig;
use codescout_server::supervisor::Supervisor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

pub struct TestHarness {
    pub supervisor: Arc<Supervisor>,
    pub project_id: String,
    pub root: PathBuf,
    _data_dir: TempDir,
    _repo_dir: TempDir,
}

impl TestHarness {
    /// Harness over a named fixture with the default config.
    pub fn from_fixture(name: &str) -> Self {
        Self::from_fixture_with(name, |_| {})
    }

    /// Harness over a named fixture, with a config tweak (short poll
    /// intervals and the like).
    pub fn from_fixture_with(name: &str, tweak: impl FnOnce(&mut ServiceConfig)) -> Self {
        let fixture_src =
            Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name);
        assert!(fixture_src.exists(), "Fixture '{name}' not found at {}", fixture_src.display());

        let repo_dir = TempDir::new().expect("Failed to create repo dir");
        let root = repo_dir.path().to_path_buf();
        fixtures::copy_dir_recursive(&fixture_src, &root);

        git(&root, &["init", "-q"]);
        commit_all(&root, "Initial commit");

        let data_dir = TempDir::new().expect("Failed to create data dir");
        let mut config = ServiceConfig::default();
        tweak(&mut config);

        let supervisor = Arc::new(Supervisor::new(data_dir.path().to_path_buf(), config));
        let project = supervisor.register(&root).expect("register fixture project");

        TestHarness {
            supervisor,
            project_id: project.id,
            root,
            _data_dir: data_dir,
            _repo_dir: repo_dir,
        }
    }

    /// Write a file below the project root.
    pub fn write_file(&self, rel: &str, content: &str) {
        let path = self.root.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent dir");
        }
        std::fs::write(path, content).expect("write fixture file");
    }

    /// Stage everything and commit.
    pub fn commit_all(&self, message: &str) {
        commit_all(&self.root, message);
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        self.supervisor.shutdown();
    }
}

pub fn git(root: &Path, args: &[&str]) {
    let status = std::process::Command::new("git")
        .args(args)
        .current_dir(root)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .expect("git invocation failed");
    assert!(status.success(), "git {args:?} failed");
}

pub fn commit_all(root: &Path, message: &str) {
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
