//! # Lineage Graph Manager
//!
//! The write path of the lineage graph. Every mutation here follows the same
//! shape, all inside one repository transaction:
//!
//! 1. Check inputs and load the records involved
//! 2. Apply the change to an in-memory copy of the whole graph
//! 3. Run `RelationshipValidator` over that hypothetical graph
//! 4. Write the touched records, or return the first blocking issue
//!
//! Because the write lock is held from step 1 to step 4, two concurrent
//! derivations can never each pass validation and jointly close a cycle.
//!
//! Reads (`get_derivation_chain`, `ancestors`, `descendants`) walk the graph
//! through a single repository view.

use crate::limits::{MAX_PARENTS, checked_depth, validate_doc_id, validate_metadata};
use crate::metrics::{self, MetricsSink, NoopMetrics, Timer};
use crate::repository::{LineageRepository, RepoTxn};
use crate::transformation_log::{TransformationLog, append_in, validate_transformation};
use crate::validator::{RelationshipValidator, ValidationIssue};
use crate::{ContentProcessor, DocumentLineage, LineageError, LineageRecord, Metadata, Transformation};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

/// Direction of a breadth-first walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Up,
    Down,
}

/// Coordinates documents, derivations and their validation.
#[derive(Debug, Clone)]
pub struct LineageGraph {
    repo: Arc<LineageRepository>,
    log: TransformationLog,
    metrics: Arc<dyn MetricsSink>,
}

impl LineageGraph {
    /// Create a manager over a shared repository.
    #[must_use]
    pub fn new(repo: Arc<LineageRepository>) -> Self {
        Self {
            log: TransformationLog::new(Arc::clone(&repo)),
            repo,
            metrics: Arc::new(NoopMetrics),
        }
    }

    /// Report counters and timings to `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// The underlying repository.
    #[must_use]
    pub fn repository(&self) -> &Arc<LineageRepository> {
        &self.repo
    }

    /// The transformation log sharing this repository.
    #[must_use]
    pub fn transformations(&self) -> &TransformationLog {
        &self.log
    }

    // =========================================================================
    // WRITES
    // =========================================================================

    /// Register a new document under zero or more existing parents.
    ///
    /// Errors:
    /// - `AlreadyExists` if `doc_id` is registered
    /// - `NotFound` naming the first missing parent
    /// - `CircularReference` if linking would create a cycle
    pub fn add_document(
        &self,
        doc_id: &str,
        parent_ids: &[&str],
        metadata: Metadata,
    ) -> Result<(), LineageError> {
        let result = self.add_document_inner(doc_id, parent_ids, metadata);
        metrics::record_outcome(
            self.metrics.as_ref(),
            &result,
            metrics::ADD_DOCUMENT,
            metrics::ADD_DOCUMENT_FAILED,
        );
        if result.is_ok() {
            tracing::debug!(doc_id, parents = parent_ids.len(), "added document");
        }
        result
    }

    fn add_document_inner(
        &self,
        doc_id: &str,
        parent_ids: &[&str],
        metadata: Metadata,
    ) -> Result<(), LineageError> {
        validate_doc_id(doc_id)?;
        validate_metadata(&metadata)?;
        if parent_ids.len() > MAX_PARENTS {
            return Err(LineageError::ValidationFailed(format!(
                "{} parents given (max {})",
                parent_ids.len(),
                MAX_PARENTS
            )));
        }
        for parent in parent_ids {
            validate_doc_id(parent)?;
        }

        self.repo.transaction(|txn| {
            if txn.exists(doc_id)? {
                return Err(LineageError::AlreadyExists(doc_id.to_string()));
            }
            for &parent in parent_ids {
                if parent != doc_id && !txn.exists(parent)? {
                    return Err(LineageError::NotFound(parent.to_string()));
                }
            }

            let mut graph = load_graph(txn)?;
            let mut touched = BTreeSet::from([doc_id.to_string()]);

            let mut lineage = DocumentLineage::new(doc_id).with_metadata(metadata);
            lineage.parents = parent_ids.iter().map(|p| (*p).to_string()).collect();
            graph.insert(doc_id.to_string(), LineageRecord::new(lineage));

            for &parent in parent_ids {
                if let Some(record) = graph.get_mut(parent) {
                    record.lineage.children.insert(doc_id.to_string());
                }
                touched.insert(parent.to_string());
            }

            self.check_graph(&graph, &touched)?;
            write_touched(txn, graph, &touched)
        })
    }

    /// Register a document whose metadata comes from a content processor.
    pub fn add_document_from_content(
        &self,
        doc_id: &str,
        parent_ids: &[&str],
        raw: &[u8],
        processor: &dyn ContentProcessor,
    ) -> Result<(), LineageError> {
        let metadata = processor.process(raw)?;
        self.add_document(doc_id, parent_ids, metadata)
    }

    /// Record that `derived_id` was produced from `parent_id`.
    ///
    /// Both documents must exist. The edge, `derived_from` (if unset) and
    /// the transformation entry on `derived_id` are committed together or
    /// not at all.
    pub fn add_derivation(
        &self,
        parent_id: &str,
        derived_id: &str,
        transformation: Transformation,
    ) -> Result<(), LineageError> {
        let kind = transformation.kind;
        let result = self.add_derivation_inner(parent_id, derived_id, transformation);
        metrics::record_outcome(
            self.metrics.as_ref(),
            &result,
            metrics::ADD_DERIVATION,
            metrics::ADD_DERIVATION_FAILED,
        );
        if result.is_ok() {
            tracing::debug!(parent_id, derived_id, kind = %kind, "added derivation");
        }
        result
    }

    fn add_derivation_inner(
        &self,
        parent_id: &str,
        derived_id: &str,
        transformation: Transformation,
    ) -> Result<(), LineageError> {
        validate_transformation(&transformation)?;

        self.repo.transaction(|txn| {
            txn.require(parent_id)?;
            txn.require(derived_id)?;

            let mut graph = load_graph(txn)?;
            if let Some(derived) = graph.get_mut(derived_id) {
                derived.lineage.parents.insert(parent_id.to_string());
                if derived.lineage.derived_from.is_none() {
                    derived.lineage.derived_from = Some(parent_id.to_string());
                }
            }
            if let Some(parent) = graph.get_mut(parent_id) {
                parent.lineage.children.insert(derived_id.to_string());
                parent.lineage.derived_documents.insert(derived_id.to_string());
            }

            let touched = BTreeSet::from([parent_id.to_string(), derived_id.to_string()]);
            self.check_graph(&graph, &touched)?;
            write_touched(txn, graph, &touched)?;
            append_in(txn, derived_id, transformation)
        })
    }

    /// Delete a document and strip it from every relationship.
    pub fn delete_document(&self, doc_id: &str) -> Result<(), LineageError> {
        let result = self.repo.delete_lineage(doc_id);
        metrics::record_outcome(
            self.metrics.as_ref(),
            &result,
            metrics::DELETE_DOCUMENT,
            metrics::DELETE_DOCUMENT_FAILED,
        );
        result
    }

    /// Validate a hypothetical graph and reject issues involving `touched`.
    fn check_graph(
        &self,
        graph: &BTreeMap<String, LineageRecord>,
        touched: &BTreeSet<String>,
    ) -> Result<(), LineageError> {
        let timer = Timer::start(metrics::VALIDATE_CYCLE_CHECK);
        let lineages: Vec<DocumentLineage> =
            graph.values().map(|r| r.lineage.clone()).collect();
        let issues = RelationshipValidator::check(&lineages);
        timer.finish(self.metrics.as_ref());

        let outcome = RelationshipValidator::reject_touching(issues, touched);
        self.metrics.increment(if outcome.is_ok() {
            metrics::VALIDATE_CYCLE_CHECK
        } else {
            metrics::VALIDATE_CYCLE_CHECK_FAILED
        });
        outcome
    }

    // =========================================================================
    // READS
    // =========================================================================

    /// Follow `derived_from` from `doc_id`, newest first.
    ///
    /// Returns at most `max_depth` documents (the start included) and stops
    /// early at a root. `max_depth == 0` is rejected.
    pub fn get_derivation_chain(
        &self,
        doc_id: &str,
        max_depth: usize,
    ) -> Result<Vec<DocumentLineage>, LineageError> {
        let depth = checked_depth(max_depth)?;

        self.repo.view(|view| {
            let mut chain: Vec<DocumentLineage> = Vec::new();
            let mut seen = BTreeSet::new();
            let mut next = Some(doc_id.to_string());

            while let Some(id) = next.take() {
                if chain.len() >= depth {
                    break;
                }
                if !seen.insert(id.clone()) {
                    let mut path: Vec<String> = chain.iter().map(|l| l.doc_id.clone()).collect();
                    path.push(id);
                    return Err(LineageError::CircularReference { path });
                }
                let lineage = match view.load(&id)? {
                    Some(record) => record.lineage,
                    None if chain.is_empty() => return Err(LineageError::NotFound(id)),
                    None => {
                        return Err(LineageError::InconsistentRelationship(format!(
                            "derivation chain of '{}' points at missing document '{}'",
                            doc_id, id
                        )));
                    }
                };
                next.clone_from(&lineage.derived_from);
                chain.push(lineage);
            }
            Ok(chain)
        })
    }

    /// Every ancestor of `doc_id` within `max_depth` hops, in BFS order.
    pub fn ancestors(&self, doc_id: &str, max_depth: usize) -> Result<Vec<String>, LineageError> {
        self.walk(doc_id, max_depth, Direction::Up)
    }

    /// Every descendant of `doc_id` within `max_depth` hops, in BFS order.
    pub fn descendants(&self, doc_id: &str, max_depth: usize) -> Result<Vec<String>, LineageError> {
        self.walk(doc_id, max_depth, Direction::Down)
    }

    fn walk(
        &self,
        doc_id: &str,
        max_depth: usize,
        direction: Direction,
    ) -> Result<Vec<String>, LineageError> {
        let depth = checked_depth(max_depth)?;

        self.repo.view(|view| {
            view.require(doc_id)?;

            let mut visited = BTreeSet::from([doc_id.to_string()]);
            let mut queue = VecDeque::from([(doc_id.to_string(), 0usize)]);
            let mut found = Vec::new();

            while let Some((current, current_depth)) = queue.pop_front() {
                if current_depth >= depth {
                    continue;
                }
                let Some(record) = view.load(&current)? else {
                    tracing::warn!(doc_id = %current, "walk reached a missing document");
                    continue;
                };
                let neighbours = match direction {
                    Direction::Up => record.lineage.parents,
                    Direction::Down => record.lineage.children,
                };
                for neighbour in neighbours {
                    if visited.insert(neighbour.clone()) {
                        found.push(neighbour.clone());
                        queue.push_back((neighbour, current_depth.saturating_add(1)));
                    }
                }
            }
            Ok(found)
        })
    }

    /// Validate the whole stored graph.
    ///
    /// Returns every issue found; an empty list means the store is
    /// consistent. Nothing is repaired.
    pub fn audit(&self) -> Result<Vec<ValidationIssue>, LineageError> {
        let lineages = self.repo.get_all_lineage()?;
        let issues = RelationshipValidator::check(&lineages);
        if !issues.is_empty() {
            tracing::warn!(count = issues.len(), "audit found lineage issues");
        }
        Ok(issues)
    }
}

/// Every stored record keyed by id.
fn load_graph(txn: &RepoTxn<'_>) -> Result<BTreeMap<String, LineageRecord>, LineageError> {
    Ok(txn
        .load_all()?
        .into_iter()
        .map(|record| (record.doc_id().to_string(), record))
        .collect())
}

fn write_touched(
    txn: &mut RepoTxn<'_>,
    mut graph: BTreeMap<String, LineageRecord>,
    touched: &BTreeSet<String>,
) -> Result<(), LineageError> {
    for id in touched {
        if let Some(record) = graph.remove(id) {
            txn.put(record)?;
        }
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================
