//! End-to-end scenarios exercised through the supervisor, exactly as
//! the HTTP handlers drive it.

mod helpers;

use codescout_server::config::ServiceConfig;
use codescout_server::indexer::CancelToken;
use codescout_server::store::SearchQuery;
use codescout_server::supervisor::Supervisor;
use codescout_server::types::SymbolKind;
use helpers::TestHarness;
use std::sync::Arc;
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// A. Register-and-search
// ---------------------------------------------------------------------------

#[test]
fn test_register_and_search() {
    let h = TestHarness::from_fixture("basic");

    let indexer = h.supervisor.get_indexer(&h.project_id).unwrap();
    let stats = indexer.stats().unwrap();
    assert!(stats.document_count >= 1);

    let hits = indexer
        .search(&SearchQuery { query: "Alpha".into(), ..Default::default() })
        .unwrap();
    assert!(!hits.is_empty());
    let top = &hits[0];
    assert_eq!(top.chunk.symbol_name, "NewAlphaGreeter");
    assert_eq!(top.chunk.symbol_kind, Some(SymbolKind::Function));
    assert!(top
        .chunk
        .doc_comment
        .contains("creates a new greeter with default settings"));
}

// ---------------------------------------------------------------------------
// B. Impact after edit
// ---------------------------------------------------------------------------

#[test]
fn test_impact_of_defining_file() {
    let h = TestHarness::from_fixture("basic");
    let indexer = h.supervisor.get_indexer(&h.project_id).unwrap();

    // caller.go calls NewAlphaGreeter defined in greeter.go.
    let impact = indexer.impact("greeter.go").unwrap();
    assert!(
        impact.direct.iter().any(|n| n.file_path == "caller.go"),
        "caller.go must appear in the direct impact of greeter.go"
    );
}

// ---------------------------------------------------------------------------
// C. Debounced watcher
// ---------------------------------------------------------------------------

#[test]
fn test_watcher_debounces_rapid_writes() {
    let h = TestHarness::from_fixture("basic");
    let indexer = h.supervisor.get_indexer(&h.project_id).unwrap();

    // First write, then a second write inside the debounce window.
    h.write_file("fresh.go", "package greeter\n\nfunc FirstRevision() {\n}\n");
    std::thread::sleep(Duration::from_millis(200));
    h.write_file("fresh.go", "package greeter\n\nfunc SecondRevision() {\n}\n");

    // Still inside the (reset) debounce window: nothing indexed yet.
    std::thread::sleep(Duration::from_millis(250));
    let early = indexer.chunks_for_file("fresh.go").unwrap();
    assert!(early.is_empty(), "debounce window must delay indexing");

    // Wait out the window plus sweep slack; the collapsed flush runs once.
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let chunks = indexer.chunks_for_file("fresh.go").unwrap();
        if !chunks.is_empty() {
            // The first revision never reached the index.
            assert!(chunks.iter().any(|c| c.content.contains("SecondRevision")));
            assert!(chunks.iter().all(|c| !c.content.contains("FirstRevision")));
            break;
        }
        assert!(Instant::now() < deadline, "watcher never indexed the file");
        std::thread::sleep(Duration::from_millis(100));
    }
}

// ---------------------------------------------------------------------------
// D. Duplicate registration
// ---------------------------------------------------------------------------

#[test]
fn test_duplicate_registration() {
    let h = TestHarness::from_fixture("basic");

    let err = h.supervisor.register(&h.root).unwrap_err();
    assert_eq!(err.tag(), "already_exists");
    assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
    assert_eq!(h.supervisor.list_projects().len(), 1);
}

// ---------------------------------------------------------------------------
// E. Commit lineage
// ---------------------------------------------------------------------------

#[test]
fn test_commit_lineage_tracks_new_commits() {
    let h = TestHarness::from_fixture_with("basic", |config| {
        config.watch.head_poll_secs = 1;
    });
    let indexer = h.supervisor.get_indexer(&h.project_id).unwrap();

    h.write_file("feature.go", "package greeter\n\nfunc Feature() {\n}\n");
    h.commit_all("add feature");

    // The HEAD poll should pick the commit up well within 15 seconds.
    let deadline = Instant::now() + Duration::from_secs(15);
    let record = loop {
        let history = indexer.history(1).unwrap();
        if let Some(entry) = history.first() {
            if entry.summary_model != "pending" && entry.message == "add feature" {
                break entry.clone();
            }
        }
        assert!(Instant::now() < deadline, "lineage never recorded the commit");
        std::thread::sleep(Duration::from_millis(200));
    };

    assert_eq!(record.files_changed, vec!["feature.go".to_string()]);
    assert_eq!(record.summary_model, "none");
    assert_eq!(record.summary, "add feature");
    assert_eq!(record.short_hash.len(), 8);
}

// ---------------------------------------------------------------------------
// F. Persistence round-trip across supervisor restart
// ---------------------------------------------------------------------------

#[test]
fn test_graph_and_store_survive_restart() {
    let data_dir = tempfile::tempdir().unwrap();
    let repo_dir = tempfile::tempdir().unwrap();
    let fixture =
        std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/basic");
    helpers::fixtures::copy_dir_recursive(&fixture, repo_dir.path());

    let query = SearchQuery { query: "Greet".into(), limit: Some(50), ..Default::default() };

    let (id, search_before, deps_before) = {
        let supervisor =
            Arc::new(Supervisor::new(data_dir.path().to_path_buf(), ServiceConfig::default()));
        let project = supervisor.register(repo_dir.path()).unwrap();
        let indexer = supervisor.get_indexer(&project.id).unwrap();

        let search: Vec<(String, u64)> = indexer
            .search(&query)
            .unwrap()
            .iter()
            .map(|h| (h.chunk.id.clone(), h.score.to_bits()))
            .collect();
        let deps = indexer.dependencies("Welcome").unwrap();
        supervisor.shutdown();
        (project.id, search, deps)
    };

    // Fresh supervisor over the same data directory; no reindex happens
    // because the persisted store is non-empty.
    let supervisor =
        Arc::new(Supervisor::new(data_dir.path().to_path_buf(), ServiceConfig::default()));
    supervisor.initialize().unwrap();
    let indexer = supervisor.get_indexer(&id).unwrap();

    let search_after: Vec<(String, u64)> = indexer
        .search(&query)
        .unwrap()
        .iter()
        .map(|h| (h.chunk.id.clone(), h.score.to_bits()))
        .collect();
    assert_eq!(search_after, search_before);

    let deps_after = indexer.dependencies("Welcome").unwrap();
    assert_eq!(
        serde_json::to_string(&deps_after).unwrap(),
        serde_json::to_string(&deps_before).unwrap()
    );

    supervisor.shutdown();
}

// ---------------------------------------------------------------------------
// Reindex endpoint semantics
// ---------------------------------------------------------------------------

#[test]
fn test_explicit_reindex_after_manual_edit() {
    let h = TestHarness::from_fixture("basic");
    let indexer = h.supervisor.get_indexer(&h.project_id).unwrap();

    // Bypass the watcher: index_all must pick the file up regardless.
    h.write_file("extra.go", "package greeter\n\nfunc Extra() {\n}\n");
    indexer.index_all(&CancelToken::new()).unwrap();

    let hits = indexer
        .search(&SearchQuery { query: "Extra".into(), ..Default::default() })
        .unwrap();
    assert!(!hits.is_empty());
}
