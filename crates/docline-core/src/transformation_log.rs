//! # Transformation Log
//!
//! Append-only, per-document history of the operations that produced or
//! updated a document.
//!
//! Entries live inside the document's own `LineageRecord`, so an append is a
//! single-record write and can join a larger repository transaction (see
//! `LineageGraph::add_derivation`).

use crate::limits::{validate_description, validate_metadata};
use crate::repository::{LineageRepository, RepoTxn};
use crate::{LineageError, Transformation, TransformationType};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Optional constraints for `TransformationLog::history`.
///
/// The time window is half-open: `start <= timestamp < end`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryFilter {
    /// Only entries of this type.
    pub kind: Option<TransformationType>,
    /// Inclusive lower bound.
    pub start: Option<DateTime<Utc>>,
    /// Exclusive upper bound.
    pub end: Option<DateTime<Utc>>,
}

impl HistoryFilter {
    /// Filter matching every entry.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict to one transformation type.
    #[must_use]
    pub fn of_kind(mut self, kind: TransformationType) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Restrict to `[start, end)`; either bound may be open.
    #[must_use]
    pub fn between(mut self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    /// Whether an entry passes the filter.
    #[must_use]
    pub fn matches(&self, entry: &Transformation) -> bool {
        self.kind.is_none_or(|kind| entry.kind == kind)
            && self.start.is_none_or(|start| entry.timestamp >= start)
            && self.end.is_none_or(|end| entry.timestamp < end)
    }
}

/// Append/query access to per-document transformation history.
#[derive(Debug, Clone)]
pub struct TransformationLog {
    repo: Arc<LineageRepository>,
}

impl TransformationLog {
    /// Create a log over a shared repository.
    #[must_use]
    pub fn new(repo: Arc<LineageRepository>) -> Self {
        Self { repo }
    }

    /// Append an entry to a document's history.
    ///
    /// Prior entries are never modified. Fails with `NotFound` if the
    /// document is not registered.
    pub fn append(&self, doc_id: &str, transformation: Transformation) -> Result<(), LineageError> {
        self.repo
            .transaction(|txn| append_in(txn, doc_id, transformation))
    }

    /// Entries matching `filter`, ordered oldest to newest.
    pub fn history(
        &self,
        doc_id: &str,
        filter: &HistoryFilter,
    ) -> Result<Vec<Transformation>, LineageError> {
        let record = self.repo.get_record(doc_id)?;
        let mut entries: Vec<Transformation> = record
            .transformations
            .into_iter()
            .filter(|t| filter.matches(t))
            .collect();
        // Stable: entries with equal timestamps keep append order.
        entries.sort_by_key(|t| t.timestamp);
        Ok(entries)
    }
}

/// Check the bounds of an entry before it is stored.
pub(crate) fn validate_transformation(transformation: &Transformation) -> Result<(), LineageError> {
    validate_description(&transformation.description)?;
    validate_metadata(&transformation.parameters)?;
    validate_metadata(&transformation.metadata)
}

/// Append inside an already running transaction.
pub(crate) fn append_in(
    txn: &mut RepoTxn<'_>,
    doc_id: &str,
    transformation: Transformation,
) -> Result<(), LineageError> {
    validate_transformation(&transformation)?;
    let mut record = txn.require(doc_id)?;
    record.transformations.push(transformation);
    txn.put(record)
}

// =============================================================================
// TESTS
// =============================================================================
