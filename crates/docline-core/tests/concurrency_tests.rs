//! Many threads against one shared repository.

use docline_core::{
    LineageError, LineageGraph, LineageRepository, Metadata, MigrationEngine,
    RelationshipValidator, Transformation, TransformationType,
};
use std::sync::{Arc, Barrier};
use std::thread;

fn split() -> Transformation {
    Transformation::new(TransformationType::Split, "split by sheet")
}

#[test]
fn concurrent_derivations_from_one_parent_keep_every_edge() {
    let graph = Arc::new(LineageGraph::new(Arc::new(LineageRepository::in_memory())));
    graph.add_document("P", &[], Metadata::new()).expect("P");
    let children: Vec<String> = (0..16).map(|i| format!("C{}", i)).collect();
    for child in &children {
        graph.add_document(child, &[], Metadata::new()).expect("child");
    }

    let barrier = Arc::new(Barrier::new(children.len()));
    let handles: Vec<_> = children
        .iter()
        .cloned()
        .map(|child| {
            let graph = Arc::clone(&graph);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                graph.add_derivation("P", &child, split())
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("join").expect("derive");
    }

    let parent = graph.repository().get_lineage("P").expect("P");
    for child in &children {
        assert!(parent.children.contains(child), "lost edge to {}", child);
        assert!(parent.derived_documents.contains(child));
    }
}

#[test]
fn racing_opposite_derivations_never_form_a_cycle() {
    for _ in 0..20 {
        let graph = Arc::new(LineageGraph::new(Arc::new(LineageRepository::in_memory())));
        graph.add_document("A", &[], Metadata::new()).expect("A");
        graph.add_document("B", &[], Metadata::new()).expect("B");

        let barrier = Arc::new(Barrier::new(2));
        let spawn = |from: &'static str, to: &'static str| {
            let graph = Arc::clone(&graph);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                graph.add_derivation(from, to, split())
            })
        };
        let forward = spawn("A", "B");
        let backward = spawn("B", "A");
        let results = [
            forward.join().expect("join"),
            backward.join().expect("join"),
        ];

        let succeeded = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(succeeded, 1);
        assert!(results.iter().any(|r| matches!(
            r,
            Err(LineageError::CircularReference { .. })
        )));

        let lineages = graph.repository().get_all_lineage().expect("all");
        assert!(RelationshipValidator::validate(&lineages).is_empty());
    }
}

#[test]
fn readers_never_see_half_applied_derivations() {
    let graph = Arc::new(LineageGraph::new(Arc::new(LineageRepository::in_memory())));
    graph.add_document("root", &[], Metadata::new()).expect("root");
    for i in 0..50 {
        graph
            .add_document(&format!("n{}", i), &[], Metadata::new())
            .expect("node");
    }

    let writer = {
        let graph = Arc::clone(&graph);
        thread::spawn(move || {
            for i in 0..50 {
                graph
                    .add_derivation("root", &format!("n{}", i), split())
                    .expect("derive");
            }
        })
    };

    let reader = {
        let graph = Arc::clone(&graph);
        thread::spawn(move || {
            for _ in 0..200 {
                let lineages = graph.repository().get_all_lineage().expect("all");
                assert!(RelationshipValidator::validate(&lineages).is_empty());
            }
        })
    };

    writer.join().expect("writer");
    reader.join().expect("reader");
}

#[test]
fn parallel_migrations_of_distinct_documents_all_complete() {
    let repo = Arc::new(LineageRepository::in_memory());
    let graph = LineageGraph::new(Arc::clone(&repo));
    let engine = Arc::new(MigrationEngine::new(Arc::clone(&repo)));
    for i in 0..8 {
        graph
            .add_document(&format!("m{}", i), &[], Metadata::new())
            .expect("add");
    }

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                engine.migrate(&format!("m{}", i), 2, |_ctx, mut metadata| {
                    metadata.insert("migrated".to_string(), serde_json::json!(true));
                    Ok(metadata)
                })
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("join").expect("migrate");
    }

    for lineage in repo.get_all_lineage().expect("all") {
        assert_eq!(lineage.schema_version, 2);
    }
}
