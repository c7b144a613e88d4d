//! # File-backed Storage
//!
//! One JSON file per document inside a directory.
//!
//! File names are the hex BLAKE3 digest of the document id, so every id maps
//! to a fixed-length, filesystem-safe name. The id itself lives in the
//! record and `load_all` checks it against the name. A write goes to a fresh temporary file in the same directory,
//! is flushed to disk and then renamed over the target, so a crash leaves
//! either the old record or the new one, never a torn file. Temporary files
//! left behind by a crash are skipped by `load_all`.

use super::LineageStore;
use crate::{LineageRecord, StorageError};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Extension of committed record files.
const RECORD_EXTENSION: &str = "json";

/// Length in bytes of the digest that names a record file.
const DIGEST_LEN: usize = 32;

/// A directory of JSON lineage records.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) a record directory.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// The record directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file holding `key`.
    #[must_use]
    pub fn record_path(&self, key: &str) -> PathBuf {
        self.dir.join(record_file_name(key))
    }

    /// Flush the directory entry so the rename itself survives a crash.
    #[cfg(unix)]
    fn sync_dir(&self) -> Result<(), StorageError> {
        fs::File::open(&self.dir)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_dir(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

fn record_file_name(key: &str) -> String {
    let digest = blake3::hash(key.as_bytes());
    format!("{}.{}", hex::encode(digest.as_bytes()), RECORD_EXTENSION)
}

impl LineageStore for FileStore {
    fn save(&self, key: &str, record: &LineageRecord) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec_pretty(record)?;

        let mut temp = NamedTempFile::new_in(&self.dir)?;
        temp.write_all(&bytes)?;
        temp.as_file().sync_all()?;
        temp.persist(self.record_path(key)).map_err(|e| e.error)?;

        self.sync_dir()
    }

    fn load(&self, key: &str) -> Result<Option<LineageRecord>, StorageError> {
        match fs::read(self.record_path(key)) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.record_path(key)) {
            Ok(()) => self.sync_dir(),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn load_all(&self) -> Result<Vec<LineageRecord>, StorageError> {
        let mut records = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if !hex::decode(stem).is_ok_and(|digest| digest.len() == DIGEST_LEN) {
                continue;
            }

            let record: LineageRecord = serde_json::from_slice(&fs::read(&path)?)?;
            let expected = record_file_name(record.doc_id());
            if path.file_name().and_then(|n| n.to_str()) != Some(expected.as_str()) {
                return Err(StorageError::Corrupted(format!(
                    "file {} contains record '{}'",
                    path.display(),
                    record.doc_id()
                )));
            }
            records.push(record);
        }
        records.sort_by(|a, b| a.doc_id().cmp(b.doc_id()));
        Ok(records)
    }

    fn backend_name(&self) -> &'static str {
        "file"
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

    fn record(id: &str) -> LineageRecord {
        LineageRecord::new(DocumentLineage::new(id))
    }

    #[test]
    fn save_load_delete() {
        let temp = tempdir().expect("temp dir");
        let store = FileStore::open(temp.path()).expect("open");

        store.save("doc/1", &record("doc/1")).expect("save");
        let loaded = store.load("doc/1").expect("load").expect("present");
        assert_eq!(loaded.doc_id(), "doc/1");

        store.delete("doc/1").expect("delete");
        assert!(store.load("doc/1").expect("load").is_none());
        store.delete("doc/1").expect("delete twice");
    }

    #[test]
    fn overwrite_replaces_whole_record() {
        let temp = tempdir().expect("temp dir");
        let store = FileStore::open(temp.path()).expect("open");

        let mut first = record("a");
        first.lineage.schema_version = 1;
        store.save("a", &first).expect("save");

        let mut second = record("a");
        second.lineage.schema_version = 7;
        store.save("a", &second).expect("save");

        let loaded = store.load("a").expect("load").expect("present");
        assert_eq!(loaded.lineage.schema_version, 7);
        assert_eq!(store.load_all().expect("all").len(), 1);
    }

    #[test]
    fn leftover_temp_files_are_ignored() {
        let temp = tempdir().expect("temp dir");
        let store = FileStore::open(temp.path()).expect("open");
        store.save("a", &record("a")).expect("save");

        // A crash between write and rename leaves a partial temp file behind.
        fs::write(temp.path().join(".tmpXYZ123"), b"{\"doc_id\": \"a\", \"par")
            .expect("write partial");

        let all = store.load_all().expect("load_all");
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].doc_id(), "a");
    }

    #[test]
    fn longest_ids_fit_in_a_file_name() {
        let temp = tempdir().expect("temp dir");
        let store = FileStore::open(temp.path()).expect("open");
        let long_id = "d".repeat(crate::limits::MAX_DOC_ID_LENGTH);
        let multibyte_id = "é".repeat(crate::limits::MAX_DOC_ID_LENGTH / 2);

        for id in [&long_id, &multibyte_id] {
            store.save(id, &record(id)).expect("save long id");
            let loaded = store.load(id).expect("load").expect("present");
            assert_eq!(loaded.doc_id(), id.as_str());
        }
        assert_eq!(
            store.record_path(&long_id).file_name().map(|n| n.len()),
            Some(64 + ".json".len())
        );
        assert_eq!(store.load_all().expect("all").len(), 2);
    }

    #[test]
    fn mismatched_key_is_reported_as_corruption() {
        let temp = tempdir().expect("temp dir");
        let store = FileStore::open(temp.path()).expect("open");
        store.save("a", &record("b")).expect("save");

        assert!(matches!(
            store.load_all(),
            Err(StorageError::Corrupted(_))
        ));
    }
}
