//! # Relationship Validator
//!
//! Pure checks over an explicit snapshot of lineage records. No hidden state:
//! callers hand in the records (usually the hypothetical post-write graph)
//! and get back every problem found.
//!
//! Checks run in a fixed order:
//! 1. Bidirectional consistency (`parents` vs `children`, `derived_from` in
//!    `parents`, `derived_documents` in `children`)
//! 2. Cycle detection over the union of all edge kinds, so a cycle closed
//!    only through `derived_from` is still caught
//! 3. Dangling references to ids with no record
//!
//! Traversal is over sorted maps, so the same snapshot always yields the same
//! issues in the same order.

use crate::{DocumentLineage, LineageError};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

// =============================================================================
// ISSUES
// =============================================================================

/// Which side of a relationship is missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    /// `from` lists `to` as a child, `to` does not list `from` as a parent.
    Child,
    /// `from` lists `to` as a parent, `to` does not list `from` as a child.
    Parent,
}

/// A single problem found in a lineage snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    /// One half of a parent/child edge is missing.
    MissingReverseEdge {
        /// Record holding the edge.
        from: String,
        /// Record missing the reverse edge.
        to: String,
        /// Kind of edge held by `from`.
        relation: Relation,
    },
    /// `derived_from` names a document that is not a parent.
    DerivedFromNotParent {
        /// Offending record.
        doc_id: String,
        /// Value of its `derived_from`.
        derived_from: String,
    },
    /// `derived_documents` names a document that is not a child.
    DerivedDocumentNotChild {
        /// Offending record.
        doc_id: String,
        /// Entry of its `derived_documents`.
        derived: String,
    },
    /// A path of edges returns to its start.
    Cycle {
        /// First and last entries are the same document.
        path: Vec<String>,
    },
    /// A relationship points at a document with no record.
    DanglingReference {
        /// Record holding the reference.
        doc_id: String,
        /// Field the reference appears in.
        field: &'static str,
        /// The unresolved id.
        missing: String,
    },
}

impl ValidationIssue {
    /// Whether this issue involves any of the given documents.
    #[must_use]
    pub fn involves(&self, ids: &BTreeSet<String>) -> bool {
        match self {
            Self::MissingReverseEdge { from, to, .. } => ids.contains(from) || ids.contains(to),
            Self::DerivedFromNotParent { doc_id, .. }
            | Self::DerivedDocumentNotChild { doc_id, .. } => ids.contains(doc_id),
            Self::Cycle { path } => path.iter().any(|id| ids.contains(id)),
            Self::DanglingReference {
                doc_id, missing, ..
            } => ids.contains(doc_id) || ids.contains(missing),
        }
    }

    /// Convert into the typed error surfaced to callers.
    #[must_use]
    pub fn into_error(self) -> LineageError {
        match self {
            Self::Cycle { path } => LineageError::CircularReference { path },
            Self::DanglingReference { missing, .. } => LineageError::NotFound(missing),
            other => LineageError::InconsistentRelationship(other.to_string()),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingReverseEdge {
                from,
                to,
                relation: Relation::Child,
            } => write!(
                f,
                "'{}' lists '{}' as a child but '{}' does not list '{}' as a parent",
                from, to, to, from
            ),
            Self::MissingReverseEdge {
                from,
                to,
                relation: Relation::Parent,
            } => write!(
                f,
                "'{}' lists '{}' as a parent but '{}' does not list '{}' as a child",
                from, to, to, from
            ),
            Self::DerivedFromNotParent {
                doc_id,
                derived_from,
            } => write!(
                f,
                "'{}' is derived_from '{}' which is not among its parents",
                doc_id, derived_from
            ),
            Self::DerivedDocumentNotChild { doc_id, derived } => write!(
                f,
                "'{}' lists derived document '{}' which is not among its children",
                doc_id, derived
            ),
            Self::Cycle { path } => write!(f, "cycle detected: {}", path.join(" -> ")),
            Self::DanglingReference {
                doc_id,
                field,
                missing,
            } => write!(
                f,
                "'{}' references missing document '{}' in {}",
                doc_id, missing, field
            ),
        }
    }
}

// =============================================================================
// VALIDATOR
// =============================================================================

/// Stateless relationship checks.
pub struct RelationshipValidator;

impl RelationshipValidator {
    /// Run every check and render the issues as messages.
    ///
    /// An empty vector means the snapshot is consistent.
    #[must_use]
    pub fn validate(lineages: &[DocumentLineage]) -> Vec<String> {
        Self::check(lineages)
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    /// Run every check and return typed issues.
    #[must_use]
    pub fn check(lineages: &[DocumentLineage]) -> Vec<ValidationIssue> {
        let index: BTreeMap<&str, &DocumentLineage> = lineages
            .iter()
            .map(|l| (l.doc_id.as_str(), l))
            .collect();

        let mut issues = Self::check_consistency(&index);
        issues.extend(
            Self::find_cycles(&index)
                .into_iter()
                .map(|path| ValidationIssue::Cycle { path }),
        );
        issues.extend(Self::check_dangling(&index));
        issues
    }

    /// First cycle in the snapshot, if any.
    #[must_use]
    pub fn first_cycle(lineages: &[DocumentLineage]) -> Option<Vec<String>> {
        let index: BTreeMap<&str, &DocumentLineage> = lineages
            .iter()
            .map(|l| (l.doc_id.as_str(), l))
            .collect();
        Self::find_cycles(&index).into_iter().next()
    }

    /// Fail on the issues that involve a document in `touched`.
    ///
    /// Other issues are logged and left for an audit. A cycle wins over any
    /// other blocking issue.
    pub(crate) fn reject_touching(
        issues: Vec<ValidationIssue>,
        touched: &BTreeSet<String>,
    ) -> Result<(), LineageError> {
        let (blocking, unrelated): (Vec<_>, Vec<_>) =
            issues.into_iter().partition(|issue| issue.involves(touched));
        for issue in &unrelated {
            tracing::warn!(issue = %issue, "pre-existing lineage inconsistency");
        }

        let Some(first) = blocking.first().cloned() else {
            return Ok(());
        };
        let chosen = blocking
            .into_iter()
            .find(|issue| matches!(issue, ValidationIssue::Cycle { .. }))
            .unwrap_or(first);
        Err(chosen.into_error())
    }

    fn check_consistency(index: &BTreeMap<&str, &DocumentLineage>) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        for (&id, lineage) in index {
            for child in &lineage.children {
                let reverse_missing = index
                    .get(child.as_str())
                    .is_some_and(|other| !other.parents.contains(id));
                if reverse_missing {
                    issues.push(ValidationIssue::MissingReverseEdge {
                        from: id.to_string(),
                        to: child.clone(),
                        relation: Relation::Child,
                    });
                }
            }
            for parent in &lineage.parents {
                let reverse_missing = index
                    .get(parent.as_str())
                    .is_some_and(|other| !other.children.contains(id));
                if reverse_missing {
                    issues.push(ValidationIssue::MissingReverseEdge {
                        from: id.to_string(),
                        to: parent.clone(),
                        relation: Relation::Parent,
                    });
                }
            }
            if let Some(origin) = &lineage.derived_from {
                if !lineage.parents.contains(origin) {
                    issues.push(ValidationIssue::DerivedFromNotParent {
                        doc_id: id.to_string(),
                        derived_from: origin.clone(),
                    });
                }
            }
            for derived in &lineage.derived_documents {
                if !lineage.children.contains(derived) {
                    issues.push(ValidationIssue::DerivedDocumentNotChild {
                        doc_id: id.to_string(),
                        derived: derived.clone(),
                    });
                }
            }
        }
        issues
    }

    /// Colored depth-first search; every back edge yields one cycle path.
    fn find_cycles(index: &BTreeMap<&str, &DocumentLineage>) -> Vec<Vec<String>> {
        // Edges point from origin to derived document.
        let mut adjacency: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for (&id, lineage) in index {
            adjacency.entry(id).or_default();
            for child in &lineage.children {
                adjacency.entry(id).or_default().insert(child.as_str());
                adjacency.entry(child.as_str()).or_default();
            }
            for parent in lineage.parents.iter().chain(lineage.derived_from.iter()) {
                adjacency.entry(parent.as_str()).or_default().insert(id);
            }
        }

        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Visit {
            OnStack,
            Done,
        }

        let mut state: BTreeMap<&str, Visit> = BTreeMap::new();
        let mut cycles = Vec::new();

        for (&root, root_edges) in &adjacency {
            if state.contains_key(root) {
                continue;
            }
            state.insert(root, Visit::OnStack);
            let mut path = vec![root];
            let mut frames = vec![root_edges.iter()];

            while let Some(frame) = frames.last_mut() {
                let step = frame.next().copied();
                match step {
                    Some(next) => match state.get(next) {
                        Some(Visit::OnStack) => {
                            let start = path.iter().position(|&n| n == next).unwrap_or(0);
                            let mut cycle: Vec<String> =
                                path[start..].iter().map(|s| (*s).to_string()).collect();
                            cycle.push(next.to_string());
                            cycles.push(cycle);
                        }
                        Some(Visit::Done) => {}
                        None => {
                            state.insert(next, Visit::OnStack);
                            path.push(next);
                            if let Some(edges) = adjacency.get(next) {
                                frames.push(edges.iter());
                            }
                        }
                    },
                    None => {
                        frames.pop();
                        if let Some(finished) = path.pop() {
                            state.insert(finished, Visit::Done);
                        }
                    }
                }
            }
        }
        cycles
    }

    fn check_dangling(index: &BTreeMap<&str, &DocumentLineage>) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        for (&id, lineage) in index {
            for (field, target) in lineage.references() {
                if !index.contains_key(target) {
                    issues.push(ValidationIssue::DanglingReference {
                        doc_id: id.to_string(),
                        field,
                        missing: target.to_string(),
                    });
                }
            }
        }
        issues
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a consistent set of records from `(parent, child)` edges.
    fn graph(ids: &[&str], edges: &[(&str, &str)]) -> Vec<DocumentLineage> {
        let mut map: BTreeMap<&str, DocumentLineage> =
            ids.iter().map(|&id| (id, DocumentLineage::new(id))).collect();
        for &(parent, child) in edges {
            if let Some(p) = map.get_mut(parent) {
                p.children.insert(child.to_string());
            }
            if let Some(c) = map.get_mut(child) {
                c.parents.insert(parent.to_string());
            }
        }
        map.into_values().collect()
    }

    fn cycles(issues: &[ValidationIssue]) -> Vec<Vec<String>> {
        issues
            .iter()
            .filter_map(|i| match i {
                ValidationIssue::Cycle { path } => Some(path.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn consistent_tree_has_no_issues() {
        let records = graph(&["A", "B", "C"], &[("A", "B"), ("B", "C"), ("A", "C")]);
        assert!(RelationshipValidator::validate(&records).is_empty());
    }

    #[test]
    fn self_loop_detected() {
        let records = graph(&["A"], &[("A", "A")]);
        let found = cycles(&RelationshipValidator::check(&records));
        assert_eq!(found, vec![vec!["A".to_string(), "A".to_string()]]);
    }

    #[test]
    fn two_node_cycle_detected() {
        let records = graph(&["A", "B"], &[("A", "B"), ("B", "A")]);
        let found = cycles(&RelationshipValidator::check(&records));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0], vec!["A", "B", "A"]);
    }

    #[test]
    fn only_issues_on_touched_records_are_rejected() {
        // A dangling reference on X and a cycle through A and B.
        let mut records = graph(&["A", "B", "X"], &[("A", "B"), ("B", "A")]);
        records[2].parents.insert("gone".to_string());
        let issues = RelationshipValidator::check(&records);

        let untouched = BTreeSet::from(["other".to_string()]);
        assert!(RelationshipValidator::reject_touching(issues.clone(), &untouched).is_ok());

        let both = BTreeSet::from(["B".to_string(), "X".to_string()]);
        assert!(matches!(
            RelationshipValidator::reject_touching(issues.clone(), &both),
            Err(LineageError::CircularReference { .. })
        ));

        let x = BTreeSet::from(["X".to_string()]);
        assert!(matches!(
            RelationshipValidator::reject_touching(issues, &x),
            Err(LineageError::NotFound(missing)) if missing == "gone"
        ));
    }

    #[test]
    fn three_node_cycle_detected() {
        let records = graph(&["A", "B", "C"], &[("A", "B"), ("B", "C"), ("C", "A")]);
        let path = RelationshipValidator::first_cycle(&records).expect("cycle");
        assert_eq!(path, vec!["A", "B", "C", "A"]);
    }

    #[test]
    fn cycle_through_derived_from_alone_detected() {
        // Parents/children form a consistent chain A -> B; only the
        // derived_from pointer on A closes the loop back from B.
        let mut records = graph(&["A", "B"], &[("A", "B")]);
        records[0].derived_from = Some("B".to_string());

        let issues = RelationshipValidator::check(&records);
        assert!(!cycles(&issues).is_empty());
        assert!(issues
            .iter()
            .any(|i| matches!(i, ValidationIssue::DerivedFromNotParent { .. })));
    }

    #[test]
    fn missing_reverse_edge_reported_first() {
        let mut a = DocumentLineage::new("A");
        a.children.insert("B".to_string());
        let b = DocumentLineage::new("B");

        let issues = RelationshipValidator::check(&[a, b]);
        assert_eq!(
            issues[0],
            ValidationIssue::MissingReverseEdge {
                from: "A".to_string(),
                to: "B".to_string(),
                relation: Relation::Child,
            }
        );
    }

    #[test]
    fn dangling_reference_names_missing_id() {
        let mut a = DocumentLineage::new("A");
        a.parents.insert("ghost".to_string());

        let issues = RelationshipValidator::check(&[a]);
        assert!(issues.contains(&ValidationIssue::DanglingReference {
            doc_id: "A".to_string(),
            field: "parents",
            missing: "ghost".to_string(),
        }));
        assert!(RelationshipValidator::validate(&[DocumentLineage::new("x")]).is_empty());
    }

    #[test]
    fn issue_involvement_and_error_mapping() {
        let issue = ValidationIssue::Cycle {
            path: vec!["A".to_string(), "B".to_string(), "A".to_string()],
        };
        let touched: BTreeSet<String> = ["B".to_string()].into_iter().collect();
        assert!(issue.involves(&touched));
        assert!(matches!(
            issue.into_error(),
            LineageError::CircularReference { path } if path.len() == 3
        ));
    }
}
