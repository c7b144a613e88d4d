//! # Snapshot Export/Import
//!
//! Portable, verifiable copies of a whole lineage store.
//!
//! A snapshot is JSON: a header followed by every record sorted by doc id.
//! The header carries a BLAKE3 checksum of the canonical JSON of the records,
//! so a snapshot taken from the file backend can be checked and loaded into
//! the redb backend (or the other way round).
//!
//! ## Safety Checks on Import
//!
//! 1. Payload size limit, before any parsing
//! 2. Header magic, version and record count
//! 3. Checksum
//! 4. Full relationship validation of the imported set
//! 5. No id may collide with an existing document

use crate::limits::{MAX_SNAPSHOT_BYTES, validate_doc_id};
use crate::repository::LineageRepository;
use crate::validator::{RelationshipValidator, ValidationIssue};
use crate::{DocumentLineage, LineageError, LineageRecord, StorageError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Magic string identifying a Docline snapshot.
pub const SNAPSHOT_MAGIC: &str = "DOCLINE";

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Snapshot header.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotHeader {
    /// Format marker, always `SNAPSHOT_MAGIC`.
    pub magic: String,
    /// Format version the records are laid out in.
    pub version: u32,
    /// Number of records following the header.
    pub record_count: u64,
    /// Hex-encoded BLAKE3 hash of the canonical records.
    pub checksum: String,
}

impl SnapshotHeader {
    /// Create a header for the current format.
    #[must_use]
    pub fn new(record_count: u64, checksum: String) -> Self {
        Self {
            magic: SNAPSHOT_MAGIC.to_string(),
            version: SNAPSHOT_VERSION,
            record_count,
            checksum,
        }
    }

    /// Check magic and version.
    pub fn validate(&self) -> Result<(), LineageError> {
        if self.magic != SNAPSHOT_MAGIC {
            return Err(LineageError::ValidationFailed(
                "not a docline snapshot".to_string(),
            ));
        }
        if self.version != SNAPSHOT_VERSION {
            return Err(LineageError::ValidationFailed(format!(
                "unsupported snapshot version {}",
                self.version
            )));
        }
        Ok(())
    }
}

/// A complete, self-contained copy of a lineage store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LineageSnapshot {
    pub header: SnapshotHeader,
    /// Sorted by doc id.
    pub records: Vec<LineageRecord>,
}

impl LineageSnapshot {
    /// Build a snapshot from records in any order.
    pub fn from_records(mut records: Vec<LineageRecord>) -> Result<Self, LineageError> {
        records.sort_by(|a, b| a.doc_id().cmp(b.doc_id()));
        let checksum = snapshot_checksum(&records)?;
        Ok(Self {
            header: SnapshotHeader::new(records.len() as u64, checksum),
            records,
        })
    }

    /// Check header, record count and checksum.
    pub fn verify(&self) -> Result<(), LineageError> {
        self.header.validate()?;
        if self.header.record_count != self.records.len() as u64 {
            return Err(StorageError::Corrupted(format!(
                "snapshot header announces {} records, found {}",
                self.header.record_count,
                self.records.len()
            ))
            .into());
        }
        if snapshot_checksum(&self.records)? != self.header.checksum {
            return Err(StorageError::Corrupted("snapshot checksum mismatch".to_string()).into());
        }
        Ok(())
    }
}

/// BLAKE3 hash (hex) of the compact JSON encoding of `records`.
pub fn snapshot_checksum(records: &[LineageRecord]) -> Result<String, LineageError> {
    let canonical = serde_json::to_vec(records)?;
    Ok(blake3::hash(&canonical).to_hex().to_string())
}

/// Copy every record of a repository into a snapshot.
pub fn export_snapshot(repo: &LineageRepository) -> Result<LineageSnapshot, LineageError> {
    LineageSnapshot::from_records(repo.get_all_records()?)
}

/// Encode a snapshot as pretty JSON.
pub fn snapshot_to_bytes(snapshot: &LineageSnapshot) -> Result<Vec<u8>, LineageError> {
    Ok(serde_json::to_vec_pretty(snapshot)?)
}

/// Decode and verify a snapshot.
pub fn snapshot_from_bytes(bytes: &[u8]) -> Result<LineageSnapshot, LineageError> {
    if bytes.len() > MAX_SNAPSHOT_BYTES {
        return Err(LineageError::ValidationFailed(format!(
            "snapshot of {} bytes exceeds the {} byte limit",
            bytes.len(),
            MAX_SNAPSHOT_BYTES
        )));
    }
    let snapshot: LineageSnapshot = serde_json::from_slice(bytes)?;
    snapshot.verify()?;
    Ok(snapshot)
}

/// Load a verified snapshot into a repository in one transaction.
///
/// The snapshot must be consistent on its own and must not reuse any
/// existing doc id. Returns the number of imported records.
pub fn import_snapshot(
    repo: &LineageRepository,
    snapshot: &LineageSnapshot,
) -> Result<usize, LineageError> {
    snapshot.verify()?;

    let mut ids = BTreeSet::new();
    for record in &snapshot.records {
        validate_doc_id(record.doc_id())?;
        if !ids.insert(record.doc_id()) {
            return Err(LineageError::ValidationFailed(format!(
                "snapshot contains '{}' more than once",
                record.doc_id()
            )));
        }
        record.lineage.check_local()?;
    }

    let lineages: Vec<DocumentLineage> = snapshot
        .records
        .iter()
        .map(|r| r.lineage.clone())
        .collect();
    let issues = RelationshipValidator::check(&lineages);
    let chosen = issues
        .iter()
        .find(|issue| matches!(issue, ValidationIssue::Cycle { .. }))
        .or_else(|| issues.first());
    match chosen {
        Some(ValidationIssue::Cycle { path }) => {
            return Err(LineageError::CircularReference { path: path.clone() });
        }
        Some(issue) => {
            return Err(LineageError::InconsistentRelationship(issue.to_string()));
        }
        None => {}
    }

    let imported = repo.transaction(|txn| {
        for record in &snapshot.records {
            if txn.exists(record.doc_id())? {
                return Err(LineageError::AlreadyExists(record.doc_id().to_string()));
            }
        }
        for record in &snapshot.records {
            txn.restore(record)?;
        }
        Ok(snapshot.records.len())
    })?;
    tracing::info!(records = imported, "imported snapshot");
    Ok(imported)
}

// =============================================================================
// TESTS
// =============================================================================
