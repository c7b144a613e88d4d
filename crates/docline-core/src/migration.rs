//! # Version Migration Engine
//!
//! Moves a document's metadata to a newer schema version through a
//! caller-supplied transform.
//!
//! ## Attempt State Machine
//!
//! ```text
//! PENDING -> IN_PROGRESS -> COMPLETED
//!                        -> FAILED -> ROLLED_BACK
//! ```
//!
//! No transition leaves `COMPLETED` or `ROLLED_BACK`. The latest attempt per
//! document is kept in memory together with the record as it was before the
//! attempt started. Rolling back never writes the record, since a failed
//! attempt left nothing to undo.
//!
//! ## Copy-on-write
//!
//! The transform runs on a clone of the metadata with no lock held. The
//! result is committed in one repository transaction that also appends an
//! `UPDATE` entry to the transformation log; if the record changed while the
//! transform ran, the attempt fails and nothing is written.
//!
//! Lock order is always repository lock, then the attempts mutex.

use crate::limits::validate_metadata;
use crate::metrics::{self, MetricsSink, NoopMetrics};
use crate::repository::LineageRepository;
use crate::transformation_log::append_in;
use crate::{BoxError, DocumentLineage, LineageError, Metadata, Transformation, TransformationType};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

// =============================================================================
// STATE MACHINE
// =============================================================================

/// Status of one migration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MigrationStatus {
    /// Created, not started.
    Pending,
    /// Transform running or commit in flight.
    InProgress,
    /// New version persisted.
    Completed,
    /// Transform or commit failed; the record is unchanged.
    Failed,
    /// Failed attempt closed; the record is left as it currently is.
    RolledBack,
}

impl MigrationStatus {
    /// Wire name of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::RolledBack => "ROLLED_BACK",
        }
    }

    /// Whether `self -> next` is a permitted transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InProgress)
                | (Self::InProgress, Self::Completed | Self::Failed)
                | (Self::Failed, Self::RolledBack)
        )
    }

    /// True for states with no outgoing transition.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::RolledBack)
    }
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable state of the latest migration attempt of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationState {
    /// Document being migrated.
    pub doc_id: String,
    /// Schema version when the attempt started.
    pub from_version: u32,
    /// Requested schema version.
    pub to_version: u32,
    /// Current step of the attempt.
    pub status: MigrationStatus,
    /// When the attempt was created.
    pub started_at: DateTime<Utc>,
    /// Set when the attempt reaches `COMPLETED`, `FAILED` or `ROLLED_BACK`.
    pub completed_at: Option<DateTime<Utc>>,
    /// Failure message, kept through rollback.
    pub error: Option<String>,
}

impl MigrationState {
    fn pending(doc_id: &str, from_version: u32, to_version: u32) -> Self {
        Self {
            doc_id: doc_id.to_string(),
            from_version,
            to_version,
            status: MigrationStatus::Pending,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
        }
    }

    fn transition(&mut self, next: MigrationStatus) -> Result<(), LineageError> {
        if !self.status.can_transition_to(next) {
            return Err(LineageError::ValidationFailed(format!(
                "migration of '{}' cannot move from {} to {}",
                self.doc_id, self.status, next
            )));
        }
        self.status = next;
        if next != MigrationStatus::InProgress {
            self.completed_at = Some(Utc::now());
        }
        Ok(())
    }
}

/// What a transform is told about the migration it serves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationContext {
    /// Document whose metadata is being transformed.
    pub doc_id: String,
    /// Schema version of the metadata handed to the transform.
    pub from_version: u32,
    /// Schema version the returned metadata must follow.
    pub to_version: u32,
}

#[derive(Debug)]
struct Attempt {
    state: MigrationState,
    snapshot: DocumentLineage,
}

// =============================================================================
// CANCELLATION
// =============================================================================

/// Cooperative cancellation flag shared between a batch and its controller.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Items not yet started are skipped.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Outcome of one document in a batch.
#[derive(Debug)]
pub struct BatchMigrationResult {
    /// Document this entry reports on.
    pub doc_id: String,
    /// Final attempt state, or why the item failed or was skipped.
    pub outcome: Result<MigrationState, LineageError>,
}

// =============================================================================
// ENGINE
// =============================================================================

/// Runs and tracks schema migrations.
#[derive(Debug)]
pub struct MigrationEngine {
    repo: Arc<LineageRepository>,
    attempts: Mutex<BTreeMap<String, Attempt>>,
    metrics: Arc<dyn MetricsSink>,
}

impl MigrationEngine {
    /// Create an engine over a shared repository.
    #[must_use]
    pub fn new(repo: Arc<LineageRepository>) -> Self {
        Self {
            repo,
            attempts: Mutex::new(BTreeMap::new()),
            metrics: Arc::new(NoopMetrics),
        }
    }

    /// Report counters to `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Migrate one document to `to_version`.
    ///
    /// Fails without recording an attempt when the document is missing,
    /// `to_version` is not above the current version, or another attempt on
    /// the same document is in progress. Any later failure marks the attempt
    /// `FAILED` and leaves the record untouched.
    pub fn migrate<F>(
        &self,
        doc_id: &str,
        to_version: u32,
        transform: F,
    ) -> Result<MigrationState, LineageError>
    where
        F: FnOnce(&MigrationContext, Metadata) -> Result<Metadata, BoxError>,
    {
        let result = self.migrate_inner(doc_id, to_version, transform);
        metrics::record_outcome(
            self.metrics.as_ref(),
            &result,
            metrics::MIGRATE,
            metrics::MIGRATE_FAILED,
        );
        match &result {
            Ok(state) => tracing::debug!(
                doc_id,
                from = state.from_version,
                to = state.to_version,
                "migration completed"
            ),
            Err(e) => tracing::debug!(doc_id, error = %e, "migration not applied"),
        }
        result
    }

    fn migrate_inner<F>(
        &self,
        doc_id: &str,
        to_version: u32,
        transform: F,
    ) -> Result<MigrationState, LineageError>
    where
        F: FnOnce(&MigrationContext, Metadata) -> Result<Metadata, BoxError>,
    {
        let original = self.repo.get_lineage(doc_id)?;
        let from_version = original.schema_version;
        if to_version <= from_version {
            return Err(LineageError::ValidationFailed(format!(
                "target version {} of '{}' must be greater than current version {}",
                to_version, doc_id, from_version
            )));
        }
        self.begin(doc_id, &original, to_version)?;

        let context = MigrationContext {
            doc_id: doc_id.to_string(),
            from_version,
            to_version,
        };
        let outcome = transform(&context, original.metadata.clone())
            .map_err(|source| LineageError::MigrationFailed {
                doc_id: doc_id.to_string(),
                source,
            })
            .and_then(|metadata| self.commit(&original, to_version, metadata));

        self.finish(doc_id, outcome)
    }

    /// Register a new attempt and move it to `IN_PROGRESS`.
    fn begin(
        &self,
        doc_id: &str,
        original: &DocumentLineage,
        to_version: u32,
    ) -> Result<(), LineageError> {
        let mut attempts = self.attempts.lock();
        let busy = attempts
            .get(doc_id)
            .is_some_and(|a| a.state.status == MigrationStatus::InProgress);
        if busy {
            return Err(LineageError::ValidationFailed(format!(
                "a migration of '{}' is already in progress",
                doc_id
            )));
        }

        let mut state = MigrationState::pending(doc_id, original.schema_version, to_version);
        state.transition(MigrationStatus::InProgress)?;
        attempts.insert(
            doc_id.to_string(),
            Attempt {
                state,
                snapshot: original.clone(),
            },
        );
        Ok(())
    }

    fn commit(
        &self,
        original: &DocumentLineage,
        to_version: u32,
        metadata: Metadata,
    ) -> Result<(), LineageError> {
        validate_metadata(&metadata)?;
        let doc_id = original.doc_id.as_str();
        let from_version = original.schema_version;

        self.repo.transaction(|txn| {
            let mut record = txn.require(doc_id)?;
            if record.lineage.schema_version != from_version
                || record.lineage.metadata != original.metadata
            {
                return Err(LineageError::ValidationFailed(format!(
                    "'{}' changed while its migration was running",
                    doc_id
                )));
            }
            record.lineage.metadata = metadata;
            record.lineage.schema_version = to_version;
            txn.put(record)?;

            let entry = Transformation::new(
                TransformationType::Update,
                format!("schema migration v{} -> v{}", from_version, to_version),
            )
            .with_parameter("from_version", serde_json::json!(from_version))
            .with_parameter("to_version", serde_json::json!(to_version));
            append_in(txn, doc_id, entry)
        })
    }

    /// Move the attempt to its final state and hand back the outcome.
    fn finish(
        &self,
        doc_id: &str,
        outcome: Result<(), LineageError>,
    ) -> Result<MigrationState, LineageError> {
        let mut attempts = self.attempts.lock();
        let attempt = attempts.get_mut(doc_id).ok_or_else(|| {
            LineageError::ValidationFailed(format!("migration attempt of '{}' vanished", doc_id))
        })?;

        match outcome {
            Ok(()) => {
                attempt.state.transition(MigrationStatus::Completed)?;
                Ok(attempt.state.clone())
            }
            Err(e) => {
                attempt.state.error = Some(e.to_string());
                attempt.state.transition(MigrationStatus::Failed)?;
                Err(e)
            }
        }
    }

    /// Close a `FAILED` attempt as `ROLLED_BACK`.
    ///
    /// A failed attempt never commits, so the record is not written here. It
    /// either still matches the pre-migration snapshot or was changed by a
    /// later writer, and those later changes are kept.
    pub fn rollback(&self, doc_id: &str) -> Result<MigrationState, LineageError> {
        let state = self.repo.view(|view| {
            let mut attempts = self.attempts.lock();
            let attempt = attempts.get_mut(doc_id).ok_or_else(|| {
                LineageError::ValidationFailed(format!(
                    "no migration attempt recorded for '{}'",
                    doc_id
                ))
            })?;
            if !attempt.state.status.can_transition_to(MigrationStatus::RolledBack) {
                return Err(LineageError::ValidationFailed(format!(
                    "migration of '{}' is {}, only FAILED attempts can be rolled back",
                    doc_id, attempt.state.status
                )));
            }

            let current = view.require(doc_id)?.lineage;
            if current.schema_version != attempt.snapshot.schema_version
                || current.metadata != attempt.snapshot.metadata
            {
                tracing::debug!(doc_id, "record changed after the failed attempt, left as is");
            }

            attempt.state.transition(MigrationStatus::RolledBack)?;
            Ok(attempt.state.clone())
        })?;
        tracing::debug!(doc_id, "migration rolled back");
        Ok(state)
    }

    /// State of the latest attempt for a document.
    #[must_use]
    pub fn status(&self, doc_id: &str) -> Option<MigrationState> {
        self.attempts.lock().get(doc_id).map(|a| a.state.clone())
    }

    /// Migrate many documents independently.
    ///
    /// Items run in order; each checks `cancel` before starting and is
    /// reported as `Cancelled` once it is set. A failure never stops the
    /// remaining items.
    pub fn migrate_batch<F>(
        &self,
        doc_ids: &[&str],
        to_version: u32,
        transform: F,
        cancel: &CancellationToken,
    ) -> Vec<BatchMigrationResult>
    where
        F: Fn(&MigrationContext, Metadata) -> Result<Metadata, BoxError>,
    {
        let results: Vec<BatchMigrationResult> = doc_ids
            .iter()
            .map(|&doc_id| {
                let outcome = if cancel.is_cancelled() {
                    Err(LineageError::Cancelled)
                } else {
                    self.migrate(doc_id, to_version, &transform)
                };
                BatchMigrationResult {
                    doc_id: doc_id.to_string(),
                    outcome,
                }
            })
            .collect();

        let failed = results.iter().filter(|r| r.outcome.is_err()).count();
        tracing::info!(
            total = results.len(),
            failed,
            to_version,
            "batch migration finished"
        );
        results
    }
}

// =============================================================================
// TESTS
// =============================================================================
