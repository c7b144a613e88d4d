//! # Lineage Repository
//!
//! Typed CRUD over lineage records on top of a `LineageStore`.
//!
//! The repository owns thread-safety. One `parking_lot::RwLock` guards the
//! whole store:
//! - Reads (`get_lineage`, `get_all_lineage`, ...) share the read lock and
//!   therefore never observe a half-applied write
//! - Every read-validate-write sequence runs inside `transaction`, holding
//!   the write lock from the first read to the last write
//!
//! Both locks are acquired with the configured timeout; a caller that waits
//! longer gets a retryable `StorageFailure(Timeout)` instead of blocking.
//!
//! ## Rollback
//!
//! A transaction remembers the original value of every record it writes or
//! deletes. If the closure fails, the originals are restored in reverse
//! order before the error is handed back, so a failed multi-record update
//! is never visible.

use crate::limits::{DEFAULT_LOCK_TIMEOUT_MS, validate_doc_id};
use crate::storage::{FileStore, LineageStore, MemoryStore, RedbStore};
use crate::validator::{RelationshipValidator, ValidationIssue};
use crate::{DocumentLineage, LineageError, LineageRecord, StorageError};
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Repository tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepositoryConfig {
    /// How long a caller waits for the repository lock.
    pub lock_timeout: Duration,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
        }
    }
}

// =============================================================================
// REPOSITORY
// =============================================================================

/// Thread-safe typed access to lineage records.
#[derive(Debug)]
pub struct LineageRepository {
    store: Arc<dyn LineageStore>,
    lock: RwLock<()>,
    config: RepositoryConfig,
}

impl LineageRepository {
    /// Create a repository over any store.
    #[must_use]
    pub fn new(store: Arc<dyn LineageStore>) -> Self {
        Self::with_config(store, RepositoryConfig::default())
    }

    /// Create a repository with explicit configuration.
    #[must_use]
    pub fn with_config(store: Arc<dyn LineageStore>, config: RepositoryConfig) -> Self {
        Self {
            store,
            lock: RwLock::new(()),
            config,
        }
    }

    /// Create a repository over a fresh `MemoryStore`.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Open a repository over a `FileStore` directory.
    pub fn open_file(dir: impl AsRef<Path>, config: RepositoryConfig) -> Result<Self, LineageError> {
        Ok(Self::with_config(Arc::new(FileStore::open(dir)?), config))
    }

    /// Open a repository over a `RedbStore` database file.
    pub fn open_redb(path: impl AsRef<Path>, config: RepositoryConfig) -> Result<Self, LineageError> {
        Ok(Self::with_config(Arc::new(RedbStore::open(path)?), config))
    }

    /// The repository configuration.
    #[must_use]
    pub fn config(&self) -> RepositoryConfig {
        self.config
    }

    /// Name of the underlying backend.
    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }

    // =========================================================================
    // READS
    // =========================================================================

    /// Get the lineage of one document.
    pub fn get_lineage(&self, doc_id: &str) -> Result<DocumentLineage, LineageError> {
        self.get_record(doc_id).map(|record| record.lineage)
    }

    /// Get the full record (lineage + transformation log) of one document.
    pub fn get_record(&self, doc_id: &str) -> Result<LineageRecord, LineageError> {
        self.view(|view| view.require(doc_id))
    }

    /// Check whether a document is registered.
    pub fn contains(&self, doc_id: &str) -> Result<bool, LineageError> {
        let _guard = self.read_guard()?;
        Ok(self.store.load(doc_id)?.is_some())
    }

    /// Get every lineage record, sorted by document id.
    pub fn get_all_lineage(&self) -> Result<Vec<DocumentLineage>, LineageError> {
        Ok(self
            .get_all_records()?
            .into_iter()
            .map(|record| record.lineage)
            .collect())
    }

    /// Get every full record, sorted by document id.
    pub fn get_all_records(&self) -> Result<Vec<LineageRecord>, LineageError> {
        let _guard = self.read_guard()?;
        Ok(self.store.load_all()?)
    }

    // =========================================================================
    // WRITES
    // =========================================================================

    /// Upsert a lineage record and bump its `last_modified`.
    ///
    /// The existing transformation log of the document is preserved. A record
    /// that would close a cycle through itself is rejected with
    /// `CircularReference`. One-sided edges are accepted, since the reverse
    /// half lives in another record saved by a separate call.
    pub fn save_lineage(&self, lineage: DocumentLineage) -> Result<(), LineageError> {
        validate_doc_id(&lineage.doc_id)?;
        lineage
            .check_local()
            .map_err(|e| LineageError::ValidationFailed(e.to_string()))?;

        self.transaction(|txn| {
            let mut lineages: Vec<DocumentLineage> = txn
                .load_all()?
                .into_iter()
                .filter(|record| record.doc_id() != lineage.doc_id)
                .map(|record| record.lineage)
                .collect();
            lineages.push(lineage.clone());
            let cycles = RelationshipValidator::check(&lineages)
                .into_iter()
                .filter(|issue| matches!(issue, ValidationIssue::Cycle { .. }))
                .collect();
            RelationshipValidator::reject_touching(
                cycles,
                &BTreeSet::from([lineage.doc_id.clone()]),
            )?;

            let transformations = txn
                .load_unchecked(&lineage.doc_id)?
                .map(|existing| existing.transformations)
                .unwrap_or_default();
            txn.put(LineageRecord {
                lineage,
                transformations,
            })
        })
    }

    /// Delete a document and strip it from every other record's relationships.
    pub fn delete_lineage(&self, doc_id: &str) -> Result<(), LineageError> {
        self.transaction(|txn| {
            if txn.load_unchecked(doc_id)?.is_none() {
                return Err(LineageError::NotFound(doc_id.to_string()));
            }
            for mut record in txn.load_all()? {
                if record.doc_id() != doc_id && record.lineage.forget(doc_id) {
                    txn.put(record)?;
                }
            }
            txn.remove(doc_id)
        })?;
        tracing::debug!(doc_id, "deleted lineage");
        Ok(())
    }

    /// Run a read-validate-write sequence under the write lock.
    ///
    /// If `op` returns an error every record it touched is restored.
    pub fn transaction<T, F>(&self, op: F) -> Result<T, LineageError>
    where
        F: FnOnce(&mut RepoTxn<'_>) -> Result<T, LineageError>,
    {
        let _guard = self
            .lock
            .try_write_for(self.config.lock_timeout)
            .ok_or(StorageError::Timeout(self.config.lock_timeout))?;

        let mut txn = RepoTxn::new(self.store.as_ref());
        match op(&mut txn) {
            Ok(value) => Ok(value),
            Err(e) => {
                txn.rollback();
                Err(e)
            }
        }
    }

    /// Run several reads against one consistent state.
    ///
    /// Writers are held off until `op` returns.
    pub fn view<T, F>(&self, op: F) -> Result<T, LineageError>
    where
        F: FnOnce(&RepoView<'_>) -> Result<T, LineageError>,
    {
        let _guard = self.read_guard()?;
        op(&RepoView {
            store: self.store.as_ref(),
        })
    }

    fn read_guard(&self) -> Result<parking_lot::RwLockReadGuard<'_, ()>, LineageError> {
        self.lock
            .try_read_for(self.config.lock_timeout)
            .ok_or_else(|| StorageError::Timeout(self.config.lock_timeout).into())
    }
}

/// Load one record and run the single-record corruption checks.
fn load_checked(
    store: &dyn LineageStore,
    doc_id: &str,
) -> Result<Option<LineageRecord>, LineageError> {
    let Some(record) = store.load(doc_id)? else {
        return Ok(None);
    };
    if record.doc_id() != doc_id {
        return Err(LineageError::InconsistentRelationship(format!(
            "record stored under '{}' claims id '{}'",
            doc_id,
            record.doc_id()
        )));
    }
    record.lineage.check_local()?;
    Ok(Some(record))
}

// =============================================================================
// READ VIEW
// =============================================================================

/// Handle passed to `LineageRepository::view`.
#[derive(Debug)]
pub struct RepoView<'a> {
    store: &'a dyn LineageStore,
}

impl RepoView<'_> {
    /// Load a record if present.
    pub fn load(&self, doc_id: &str) -> Result<Option<LineageRecord>, LineageError> {
        load_checked(self.store, doc_id)
    }

    /// Load a record or fail with `NotFound`.
    pub fn require(&self, doc_id: &str) -> Result<LineageRecord, LineageError> {
        self.load(doc_id)?
            .ok_or_else(|| LineageError::NotFound(doc_id.to_string()))
    }
}

// =============================================================================
// TRANSACTION
// =============================================================================

/// Handle passed to `LineageRepository::transaction`.
///
/// All reads see the writes already made through the same handle.
#[derive(Debug)]
pub struct RepoTxn<'a> {
    store: &'a dyn LineageStore,
    /// Original value of each touched key, in first-touch order.
    undo: Vec<(String, Option<LineageRecord>)>,
    touched: BTreeSet<String>,
}

impl<'a> RepoTxn<'a> {
    fn new(store: &'a dyn LineageStore) -> Self {
        Self {
            store,
            undo: Vec::new(),
            touched: BTreeSet::new(),
        }
    }

    /// Load a record if present.
    pub fn load(&self, doc_id: &str) -> Result<Option<LineageRecord>, LineageError> {
        load_checked(self.store, doc_id)
    }

    /// Load without the corruption checks, so damaged records can be
    /// overwritten or deleted.
    fn load_unchecked(&self, doc_id: &str) -> Result<Option<LineageRecord>, LineageError> {
        Ok(self.store.load(doc_id)?)
    }

    /// Whether a record exists, without inspecting its contents.
    pub fn exists(&self, doc_id: &str) -> Result<bool, LineageError> {
        Ok(self.store.load(doc_id)?.is_some())
    }

    /// Load a record or fail with `NotFound`.
    pub fn require(&self, doc_id: &str) -> Result<LineageRecord, LineageError> {
        self.load(doc_id)?
            .ok_or_else(|| LineageError::NotFound(doc_id.to_string()))
    }

    /// Load every record, sorted by document id.
    pub fn load_all(&self) -> Result<Vec<LineageRecord>, LineageError> {
        Ok(self.store.load_all()?)
    }

    /// Write a record, stamping `last_modified`.
    pub fn put(&mut self, mut record: LineageRecord) -> Result<(), LineageError> {
        self.remember(record.doc_id())?;
        record.lineage.last_modified = Utc::now();
        self.store.save(record.doc_id(), &record)?;
        Ok(())
    }

    /// Write a record as-is, keeping its `last_modified`.
    pub(crate) fn restore(&mut self, record: &LineageRecord) -> Result<(), LineageError> {
        self.remember(record.doc_id())?;
        self.store.save(record.doc_id(), record)?;
        Ok(())
    }

    /// Delete a record.
    pub fn remove(&mut self, doc_id: &str) -> Result<(), LineageError> {
        self.remember(doc_id)?;
        self.store.delete(doc_id)?;
        Ok(())
    }

    /// Ids written or deleted so far.
    #[must_use]
    pub fn touched(&self) -> &BTreeSet<String> {
        &self.touched
    }

    fn remember(&mut self, doc_id: &str) -> Result<(), LineageError> {
        if self.touched.insert(doc_id.to_string()) {
            let original = self.store.load(doc_id)?;
            self.undo.push((doc_id.to_string(), original));
        }
        Ok(())
    }

    fn rollback(self) {
        for (doc_id, original) in self.undo.into_iter().rev() {
            let restored = match &original {
                Some(record) => self.store.save(&doc_id, record),
                None => self.store.delete(&doc_id),
            };
            if let Err(e) = restored {
                tracing::error!(doc_id = %doc_id, error = %e, "rollback could not restore record");
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
