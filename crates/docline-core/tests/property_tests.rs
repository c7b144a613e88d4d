//! # Property-Based Tests
//!
//! Random sequences of graph operations must keep the lineage graph acyclic
//! and bidirectionally consistent, and failed operations must not change it.

use docline_core::{
    LineageError, LineageGraph, LineageRepository, Metadata, RelationshipValidator,
    Transformation, TransformationType,
};
use proptest::collection::vec;
use proptest::prelude::*;
use std::sync::Arc;

const IDS: [&str; 6] = ["d0", "d1", "d2", "d3", "d4", "d5"];

#[derive(Debug, Clone)]
enum Op {
    Add { doc: usize, parents: Vec<usize> },
    Derive { parent: usize, derived: usize },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..IDS.len(), vec(0..IDS.len(), 0..3))
            .prop_map(|(doc, parents)| Op::Add { doc, parents }),
        (0..IDS.len(), 0..IDS.len()).prop_map(|(parent, derived)| Op::Derive { parent, derived }),
    ]
}

fn apply(graph: &LineageGraph, op: &Op) -> Result<(), LineageError> {
    match op {
        Op::Add { doc, parents } => {
            let parent_ids: Vec<&str> = parents.iter().map(|&p| IDS[p]).collect();
            graph.add_document(IDS[*doc], &parent_ids, Metadata::new())
        }
        Op::Derive { parent, derived } => graph.add_derivation(
            IDS[*parent],
            IDS[*derived],
            Transformation::new(TransformationType::Conversion, "convert"),
        ),
    }
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    /// No sequence of operations leaves a cycle or a one-sided edge behind,
    /// and every rejected operation leaves the store untouched.
    #[test]
    fn graph_stays_acyclic_and_consistent(ops in vec(op(), 1..40)) {
        let graph = LineageGraph::new(Arc::new(LineageRepository::in_memory()));

        for op in &ops {
            let before = graph.repository().get_all_records().expect("before");
            if apply(&graph, op).is_err() {
                let after = graph.repository().get_all_records().expect("after");
                prop_assert_eq!(before, after);
            }
        }

        let lineages = graph.repository().get_all_lineage().expect("all");
        prop_assert!(RelationshipValidator::validate(&lineages).is_empty());

        for a in &lineages {
            for b in &lineages {
                prop_assert_eq!(
                    a.children.contains(&b.doc_id),
                    b.parents.contains(&a.doc_id)
                );
            }
            if let Some(origin) = &a.derived_from {
                prop_assert!(a.parents.contains(origin));
            }
        }
    }

    /// Chains follow `derived_from`, newest first, and never exceed the bound.
    #[test]
    fn chain_is_ordered_and_bounded(ops in vec(op(), 1..40), depth in 1usize..8) {
        let graph = LineageGraph::new(Arc::new(LineageRepository::in_memory()));
        for op in &ops {
            let _ = apply(&graph, op);
        }

        for lineage in graph.repository().get_all_lineage().expect("all") {
            let chain = graph
                .get_derivation_chain(&lineage.doc_id, depth)
                .expect("chain");
            prop_assert!(!chain.is_empty() && chain.len() <= depth);
            prop_assert_eq!(&chain[0].doc_id, &lineage.doc_id);
            for pair in chain.windows(2) {
                prop_assert_eq!(pair[0].derived_from.as_deref(), Some(pair[1].doc_id.as_str()));
            }
            let last = &chain[chain.len() - 1];
            if chain.len() < depth {
                prop_assert!(last.derived_from.is_none());
            }
        }
    }

    /// Rejected cycle-closing derivations always report a closed path.
    #[test]
    fn cycle_errors_carry_a_closed_path(ops in vec(op(), 1..40)) {
        let graph = LineageGraph::new(Arc::new(LineageRepository::in_memory()));
        for op in &ops {
            if let Err(LineageError::CircularReference { path }) = apply(&graph, op) {
                prop_assert!(path.len() >= 2);
                prop_assert_eq!(path.first(), path.last());
            }
        }
    }
}
