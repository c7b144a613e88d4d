//! # redb-backed Storage
//!
//! A disk-backed lineage store using the redb embedded database.
//!
//! redb provides:
//! - ACID transactions
//! - Crash safety (copy-on-write B-trees)
//! - MVCC (concurrent readers, single writer)
//!
//! Records are kept in the same JSON layout as the file backend, so a
//! snapshot taken from one backend can be imported into the other.

use super::LineageStore;
use crate::{LineageRecord, StorageError};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::path::Path;

/// Table for records: doc_id -> JSON-encoded `LineageRecord`
const RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("lineage_records");

fn db_err(e: impl Into<redb::Error>) -> StorageError {
    StorageError::Database(e.into())
}

/// A disk-backed lineage store using redb.
pub struct RedbStore {
    db: Database,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore").finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Open or create a lineage database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = Database::create(path.as_ref()).map_err(db_err)?;

        // Create the table up front so read transactions can always open it.
        let write_txn = db.begin_write().map_err(db_err)?;
        {
            let _ = write_txn.open_table(RECORDS).map_err(db_err)?;
        }
        write_txn.commit().map_err(db_err)?;

        Ok(Self { db })
    }

    /// Compact the database file.
    pub fn compact(&mut self) -> Result<(), StorageError> {
        self.db.compact().map_err(db_err)?;
        Ok(())
    }
}

impl LineageStore for RedbStore {
    fn save(&self, key: &str, record: &LineageRecord) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(record)?;

        let write_txn = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = write_txn.open_table(RECORDS).map_err(db_err)?;
            table.insert(key, bytes.as_slice()).map_err(db_err)?;
        }
        write_txn.commit().map_err(db_err)?;
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<LineageRecord>, StorageError> {
        let read_txn = self.db.begin_read().map_err(db_err)?;
        let table = read_txn.open_table(RECORDS).map_err(db_err)?;

        match table.get(key).map_err(db_err)? {
            Some(data) => Ok(Some(serde_json::from_slice(data.value())?)),
            None => Ok(None),
        }
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        let write_txn = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = write_txn.open_table(RECORDS).map_err(db_err)?;
            let _ = table.remove(key).map_err(db_err)?;
        }
        write_txn.commit().map_err(db_err)?;
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<LineageRecord>, StorageError> {
        let read_txn = self.db.begin_read().map_err(db_err)?;
        let table = read_txn.open_table(RECORDS).map_err(db_err)?;

        let mut records = Vec::new();
        for entry in table.iter().map_err(db_err)? {
            let (key, value) = entry.map_err(db_err)?;
            let record: LineageRecord = serde_json::from_slice(value.value())?;
            if record.doc_id() != key.value() {
                return Err(StorageError::Corrupted(format!(
                    "key '{}' holds record '{}'",
                    key.value(),
                    record.doc_id()
                )));
            }
            records.push(record);
        }
        Ok(records)
    }

    fn backend_name(&self) -> &'static str {
        "redb"
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DocumentLineage;
    use tempfile::tempdir;

    #[test]
    fn records_persist_after_reopen() {
        let temp = tempdir().expect("temp dir");
        let db_path = temp.path().join("lineage.redb");

        {
            let store = RedbStore::open(&db_path).expect("open db");
            let mut lineage = DocumentLineage::new("B");
            lineage.parents.insert("A".to_string());
            store
                .save("B", &LineageRecord::new(lineage))
                .expect("save");
            store
                .save("A", &LineageRecord::new(DocumentLineage::new("A")))
                .expect("save");
        }

        {
            let store = RedbStore::open(&db_path).expect("reopen db");
            let b = store.load("B").expect("load").expect("present");
            assert!(b.lineage.parents.contains("A"));

            let ids: Vec<_> = store
                .load_all()
                .expect("all")
                .iter()
                .map(|r| r.doc_id().to_string())
                .collect();
            assert_eq!(ids, vec!["A", "B"]);
        }
    }

    #[test]
    fn delete_missing_key_succeeds() {
        let temp = tempdir().expect("temp dir");
        let store = RedbStore::open(temp.path().join("x.redb")).expect("open");
        store.delete("ghost").expect("delete");
        assert!(store.load("ghost").expect("load").is_none());
    }

    #[test]
    fn compact_keeps_data() {
        let temp = tempdir().expect("temp dir");
        let mut store = RedbStore::open(temp.path().join("c.redb")).expect("open");
        store
            .save("a", &LineageRecord::new(DocumentLineage::new("a")))
            .expect("save");
        store.compact().expect("compact");
        assert!(store.load("a").expect("load").is_some());
    }
}
