//! End-to-end lineage scenarios over the public API.

use docline_core::{
    DocumentLineage, HistoryFilter, LineageError, LineageGraph, LineageRecord, LineageRepository,
    LineageStore, MemoryStore, Metadata, MigrationEngine, MigrationStatus, StorageError,
    Transformation, TransformationType,
};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn graph() -> LineageGraph {
    LineageGraph::new(Arc::new(LineageRepository::in_memory()))
}

fn set(ids: &[&str]) -> BTreeSet<String> {
    ids.iter().map(|s| (*s).to_string()).collect()
}

fn extraction() -> Transformation {
    Transformation::new(TransformationType::Extraction, "extract sheet 1")
}

/// A store that fails exactly one `save`, counted from when it is armed.
#[derive(Debug, Default)]
struct FlakyStore {
    inner: MemoryStore,
    armed: std::sync::atomic::AtomicBool,
    saves: AtomicUsize,
    fail_on: AtomicUsize,
}

impl FlakyStore {
    fn fail_nth_save(&self, n: usize) {
        self.saves.store(0, Ordering::SeqCst);
        self.fail_on.store(n, Ordering::SeqCst);
        self.armed.store(true, Ordering::SeqCst);
    }
}

impl LineageStore for FlakyStore {
    fn save(&self, key: &str, record: &LineageRecord) -> Result<(), StorageError> {
        if self.armed.load(Ordering::SeqCst) {
            let n = self.saves.fetch_add(1, Ordering::SeqCst) + 1;
            if n == self.fail_on.load(Ordering::SeqCst) {
                return Err(StorageError::Io(std::io::Error::other("disk full")));
            }
        }
        self.inner.save(key, record)
    }

    fn load(&self, key: &str) -> Result<Option<LineageRecord>, StorageError> {
        self.inner.load(key)
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.inner.delete(key)
    }

    fn load_all(&self) -> Result<Vec<LineageRecord>, StorageError> {
        self.inner.load_all()
    }

    fn backend_name(&self) -> &'static str {
        "flaky"
    }
}

#[test]
fn child_document_links_both_ways() {
    let g = graph();
    g.add_document("A", &[], Metadata::new()).expect("A");
    g.add_document("B", &["A"], Metadata::new()).expect("B");

    let repo = g.repository();
    assert_eq!(repo.get_lineage("A").expect("A").children, set(&["B"]));
    assert_eq!(repo.get_lineage("B").expect("B").parents, set(&["A"]));
}

#[test]
fn closing_a_derivation_cycle_fails() {
    let g = graph();
    g.add_document("A", &[], Metadata::new()).expect("A");
    g.add_document("B", &[], Metadata::new()).expect("B");
    g.add_derivation("A", "B", extraction()).expect("A -> B");

    let err = g.add_derivation("B", "A", extraction()).expect_err("cycle");
    assert!(matches!(err, LineageError::CircularReference { .. }));
    assert!(!err.is_retryable());

    let a = g.repository().get_lineage("A").expect("A");
    assert!(a.parents.is_empty());
    assert!(a.derived_from.is_none());
    assert!(
        g.transformations()
            .history("A", &HistoryFilter::all())
            .expect("history")
            .is_empty()
    );
}

#[test]
fn missing_parent_is_not_found() {
    let g = graph();
    assert!(matches!(
        g.add_document("X", &["missing"], Metadata::new()),
        Err(LineageError::NotFound(id)) if id == "missing"
    ));
    assert!(g.repository().get_all_lineage().expect("all").is_empty());
}

#[test]
fn chain_of_depth_two_is_newest_first() {
    let g = graph();
    for id in ["A", "B", "C"] {
        g.add_document(id, &[], Metadata::new()).expect("add");
    }
    g.add_derivation("A", "B", extraction()).expect("A -> B");
    g.add_derivation("B", "C", extraction()).expect("B -> C");

    let chain: Vec<String> = g
        .get_derivation_chain("C", 2)
        .expect("chain")
        .into_iter()
        .map(|l| l.doc_id)
        .collect();
    assert_eq!(chain, ["C", "B"]);
}

#[test]
fn failed_migration_keeps_version() {
    let repo = Arc::new(LineageRepository::in_memory());
    let g = LineageGraph::new(Arc::clone(&repo));
    let engine = MigrationEngine::new(Arc::clone(&repo));
    g.add_document("D", &[], Metadata::new()).expect("D");

    let result = engine.migrate("D", 2, |_ctx, _metadata| Err("unsupported layout".into()));
    assert!(matches!(result, Err(LineageError::MigrationFailed { .. })));
    assert_eq!(repo.get_lineage("D").expect("D").schema_version, 1);
    assert_eq!(
        engine.status("D").map(|s| s.status),
        Some(MigrationStatus::Failed)
    );
}

#[test]
fn repeated_reads_are_identical() {
    let g = graph();
    let mut metadata = Metadata::new();
    metadata.insert("source".to_string(), json!("upload"));
    g.add_document("A", &[], metadata).expect("A");

    let first = g.repository().get_lineage("A").expect("first");
    let second = g.repository().get_lineage("A").expect("second");
    assert_eq!(first, second);
}

#[test]
fn derivation_is_atomic_when_log_write_fails() {
    let store = Arc::new(FlakyStore::default());
    let repo = Arc::new(LineageRepository::new(store.clone()));
    let g = LineageGraph::new(repo);
    g.add_document("P", &[], Metadata::new()).expect("P");
    g.add_document("C", &[], Metadata::new()).expect("C");
    let before = g.repository().get_all_records().expect("before");

    // Saves: both records, then the derived record again with its log entry.
    store.fail_nth_save(3);
    let err = g.add_derivation("P", "C", extraction()).expect_err("log write fails");
    assert!(err.is_retryable());

    let after = g.repository().get_all_records().expect("after");
    assert_eq!(before, after);

    // The same call succeeds once storage recovers.
    g.add_derivation("P", "C", extraction()).expect("retry");
    let c = g.repository().get_record("C").expect("C");
    assert_eq!(c.lineage.derived_from.as_deref(), Some("P"));
    assert_eq!(c.transformations.len(), 1);
}

#[test]
fn corrupted_store_is_reported_not_fatal() {
    let store = Arc::new(MemoryStore::new());
    let mut orphan = DocumentLineage::new("orphan");
    orphan.parents.insert("gone".to_string());
    store
        .save("orphan", &LineageRecord::new(orphan))
        .expect("seed");
    store
        .save("ok", &LineageRecord::new(DocumentLineage::new("ok")))
        .expect("seed");

    let g = LineageGraph::new(Arc::new(LineageRepository::new(store)));
    let issues = g.audit().expect("audit");
    assert_eq!(issues.len(), 1);
    assert!(issues[0].to_string().contains("gone"));

    // Unrelated writes still go through.
    g.add_document("fresh", &["ok"], Metadata::new()).expect("fresh");
}
