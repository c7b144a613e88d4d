//! # Storage Backends
//!
//! Durable key-value persistence of lineage records.
//!
//! A backend only has to make a single `save` atomic; it never sees more
//! than one logical writer at a time because the repository serializes
//! read-modify-write sequences above it.
//!
//! - `MemoryStore`: volatile, for tests and scratch graphs
//! - `FileStore`: one JSON file per document, temp-file-then-rename writes
//! - `RedbStore`: redb table, one ACID transaction per call

mod file_store;
mod redb_store;

pub use file_store::FileStore;
pub use redb_store::RedbStore;

use crate::{LineageRecord, StorageError};
use parking_lot::RwLock;
use std::collections::BTreeMap;

// =============================================================================
// LINEAGESTORE TRAIT
// =============================================================================

/// The LineageStore trait defines the persistence contract.
///
/// Keys are document ids. `load` on a missing key returns `Ok(None)`,
/// `delete` on a missing key succeeds.
pub trait LineageStore: Send + Sync + std::fmt::Debug {
    /// Write a record, replacing any previous value atomically.
    fn save(&self, key: &str, record: &LineageRecord) -> Result<(), StorageError>;

    /// Read a record.
    fn load(&self, key: &str) -> Result<Option<LineageRecord>, StorageError>;

    /// Remove a record.
    fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Read every record, sorted by document id.
    fn load_all(&self) -> Result<Vec<LineageRecord>, StorageError>;

    /// Short backend name for logs and status output.
    fn backend_name(&self) -> &'static str;
}

// =============================================================================
// IN-MEMORY STORE
// =============================================================================

/// Volatile store backed by a `BTreeMap`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<String, LineageRecord>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// True when nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl LineageStore for MemoryStore {
    fn save(&self, key: &str, record: &LineageRecord) -> Result<(), StorageError> {
        self.records.write().insert(key.to_string(), record.clone());
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<LineageRecord>, StorageError> {
        Ok(self.records.read().get(key).cloned())
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.records.write().remove(key);
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<LineageRecord>, StorageError> {
        Ok(self.records.read().values().cloned().collect())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

// =============================================================================
// TESTS
// =============================================================================
