//! # Core Type Definitions
//!
//! This module contains all core types for the Docline lineage engine:
//! - Lineage records (`DocumentLineage`, `LineageRecord`)
//! - Applied operations (`Transformation`, `TransformationType`)
//! - Open metadata maps (`Metadata`)
//! - Error types (`LineageError`, `StorageError`)
//! - The `ContentProcessor` collaborator trait
//!
//! ## Determinism Guarantees
//!
//! Relationship sets and metadata maps use `BTreeSet`/`BTreeMap`, so the
//! persisted JSON and every traversal built on top of them come out in a
//! stable, sorted order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// METADATA
// =============================================================================

/// Free-form, string-keyed metadata attached to documents and transformations.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Boxed error returned by caller-supplied migration transforms.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Initial schema version assigned to newly registered documents.
pub const INITIAL_SCHEMA_VERSION: u32 = 1;

// =============================================================================
// TRANSFORMATIONS
// =============================================================================

/// Kind of processing operation applied to produce a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransformationType {
    /// Format conversion (e.g. xlsx -> csv).
    Conversion,
    /// Content extraction from a source document.
    Extraction,
    /// Several documents merged into one.
    Merge,
    /// One document split into several.
    Split,
    /// In-place update, including schema migrations.
    Update,
}

impl TransformationType {
    /// All transformation types in declaration order.
    pub const ALL: [Self; 5] = [
        Self::Conversion,
        Self::Extraction,
        Self::Merge,
        Self::Split,
        Self::Update,
    ];

    /// Wire name of the type, as persisted.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Conversion => "CONVERSION",
            Self::Extraction => "EXTRACTION",
            Self::Merge => "MERGE",
            Self::Split => "SPLIT",
            Self::Update => "UPDATE",
        }
    }
}

impl fmt::Display for TransformationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransformationType {
    type Err = LineageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                LineageError::ValidationFailed(format!("unknown transformation type '{}'", s))
            })
    }
}

/// A single recorded processing operation.
///
/// Transformations are immutable once appended to the log of the document
/// they produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transformation {
    /// Kind of operation.
    #[serde(rename = "type")]
    pub kind: TransformationType,
    /// Human-readable description.
    pub description: String,
    /// Operation configuration (target format, ranges, ...).
    #[serde(default)]
    pub parameters: Metadata,
    /// Processor information (name, version, ...).
    #[serde(default)]
    pub metadata: Metadata,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
}

impl Transformation {
    /// Create a transformation stamped with the current time.
    #[must_use]
    pub fn new(kind: TransformationType, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
            parameters: Metadata::new(),
            metadata: Metadata::new(),
            timestamp: Utc::now(),
        }
    }

    /// Replace the parameter map.
    #[must_use]
    pub fn with_parameters(mut self, parameters: Metadata) -> Self {
        self.parameters = parameters;
        self
    }

    /// Set a single parameter.
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    /// Replace the metadata map.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Override the timestamp.
    #[must_use]
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

// =============================================================================
// DOCUMENT LINEAGE
// =============================================================================

/// The recorded relationships of one document.
///
/// Edges are stored as id sets on both endpoints and resolved through the
/// repository on demand; no record ever holds a reference to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentLineage {
    /// Caller-supplied, globally unique identifier.
    pub doc_id: String,
    /// Documents this one was derived from.
    #[serde(default)]
    pub parents: BTreeSet<String>,
    /// Documents derived from this one.
    #[serde(default)]
    pub children: BTreeSet<String>,
    /// Direct originating parent; always a member of `parents` when set.
    #[serde(default)]
    pub derived_from: Option<String>,
    /// Documents produced directly from this one by a recorded derivation.
    #[serde(default)]
    pub derived_documents: BTreeSet<String>,
    /// Current structural version of the record.
    pub schema_version: u32,
    /// Free-form document metadata.
    #[serde(default)]
    pub metadata: Metadata,
    /// Updated on every mutation.
    pub last_modified: DateTime<Utc>,
}

impl DocumentLineage {
    /// Create a root lineage record with no relationships.
    #[must_use]
    pub fn new(doc_id: impl Into<String>) -> Self {
        Self {
            doc_id: doc_id.into(),
            parents: BTreeSet::new(),
            children: BTreeSet::new(),
            derived_from: None,
            derived_documents: BTreeSet::new(),
            schema_version: INITIAL_SCHEMA_VERSION,
            metadata: Metadata::new(),
            last_modified: Utc::now(),
        }
    }

    /// Attach metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// True when the document has no parents.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parents.is_empty() && self.derived_from.is_none()
    }

    /// Every id this record refers to, with the field it appears in.
    pub fn references(&self) -> impl Iterator<Item = (&'static str, &str)> + '_ {
        self.parents
            .iter()
            .map(|p| ("parents", p.as_str()))
            .chain(self.children.iter().map(|c| ("children", c.as_str())))
            .chain(self.derived_from.iter().map(|d| ("derived_from", d.as_str())))
            .chain(
                self.derived_documents
                    .iter()
                    .map(|d| ("derived_documents", d.as_str())),
            )
    }

    /// Remove every relationship pointing at `doc_id`.
    ///
    /// Returns `true` if anything changed.
    pub fn forget(&mut self, doc_id: &str) -> bool {
        let mut changed = self.parents.remove(doc_id);
        changed |= self.children.remove(doc_id);
        changed |= self.derived_documents.remove(doc_id);
        if self.derived_from.as_deref() == Some(doc_id) {
            self.derived_from = None;
            changed = true;
        }
        changed
    }

    /// Invariants that can be checked on a single record.
    pub fn check_local(&self) -> Result<(), LineageError> {
        if self.schema_version < INITIAL_SCHEMA_VERSION {
            return Err(LineageError::InconsistentRelationship(format!(
                "document '{}' has schema_version {} (must be >= {})",
                self.doc_id, self.schema_version, INITIAL_SCHEMA_VERSION
            )));
        }
        match &self.derived_from {
            Some(origin) if !self.parents.contains(origin) => {
                Err(LineageError::InconsistentRelationship(format!(
                    "document '{}' is derived_from '{}' which is not among its parents",
                    self.doc_id, origin
                )))
            }
            _ => Ok(()),
        }
    }
}

/// One durable record per document: the lineage plus its transformation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineageRecord {
    /// Relationship and version data.
    #[serde(flatten)]
    pub lineage: DocumentLineage,
    /// Append-only log of operations that produced or updated this document.
    #[serde(default)]
    pub transformations: Vec<Transformation>,
}

impl LineageRecord {
    /// Wrap a lineage with an empty transformation log.
    #[must_use]
    pub fn new(lineage: DocumentLineage) -> Self {
        Self {
            lineage,
            transformations: Vec::new(),
        }
    }

    /// The document id (storage key).
    #[must_use]
    pub fn doc_id(&self) -> &str {
        &self.lineage.doc_id
    }
}

// =============================================================================
// CONTENT PROCESSOR
// =============================================================================

/// The ContentProcessor trait is the boundary to document parsing.
///
/// - `process`: Turns raw document content into normalized metadata
///
/// # Extension Point
///
/// Docline never parses raw file formats itself. Spreadsheet, word-processor
/// or plain-text adapters implement this trait and hand the resulting
/// metadata to `LineageGraph::add_document_from_content`.
pub trait ContentProcessor: Send + Sync {
    /// Normalize raw content into a metadata map.
    fn process(&self, raw: &[u8]) -> Result<Metadata, LineageError>;
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Failures of the persistence layer. Always keeps the original cause.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Embedded database error.
    #[error("database error: {0}")]
    Database(#[from] redb::Error),

    /// Record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The operation did not get the repository lock in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Stored bytes are not a valid record.
    #[error("corrupted record: {0}")]
    Corrupted(String),
}

/// Errors that can occur in the Docline system.
///
/// - Validation errors are returned to the immediate caller, never retried
/// - Storage failures are retryable by the caller (see `is_retryable`)
/// - Library code never panics
#[derive(Debug, Error)]
pub enum LineageError {
    /// Referenced document does not exist.
    #[error("document not found: {0}")]
    NotFound(String),

    /// Document id is already registered.
    #[error("document already exists: {0}")]
    AlreadyExists(String),

    /// The proposed edge would close a cycle.
    #[error("circular reference: {}", path.join(" -> "))]
    CircularReference {
        /// Cycle path; first and last element are the same document.
        path: Vec<String>,
    },

    /// Parent/child bookkeeping disagrees between records.
    #[error("inconsistent relationship: {0}")]
    InconsistentRelationship(String),

    /// Malformed input.
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// Underlying persistence failure.
    #[error("storage failure: {0}")]
    StorageFailure(#[from] StorageError),

    /// A migration transform returned an error; the record was not changed.
    #[error("migration of '{doc_id}' failed: {source}")]
    MigrationFailed {
        /// Document whose migration failed.
        doc_id: String,
        /// Error returned by the transform.
        #[source]
        source: BoxError,
    },

    /// Work was skipped because cancellation was requested.
    #[error("operation cancelled")]
    Cancelled,
}

impl LineageError {
    /// Whether the caller may retry the operation with backoff.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StorageFailure(StorageError::Timeout(_) | StorageError::Io(_))
        )
    }

    /// Short, stable name of the error kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::AlreadyExists(_) => "already_exists",
            Self::CircularReference { .. } => "circular_reference",
            Self::InconsistentRelationship(_) => "inconsistent_relationship",
            Self::ValidationFailed(_) => "validation_failed",
            Self::StorageFailure(_) => "storage_failure",
            Self::MigrationFailed { .. } => "migration_failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl From<serde_json::Error> for LineageError {
    fn from(e: serde_json::Error) -> Self {
        Self::StorageFailure(StorageError::Serialization(e))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn transformation_type_serializes_screaming_case() {
        let encoded = serde_json::to_string(&TransformationType::Conversion).expect("encode");
        assert_eq!(encoded, "\"CONVERSION\"");
    }

    #[test]
    fn transformation_type_parses_case_insensitively() {
        assert_eq!(
            "merge".parse::<TransformationType>().expect("parse"),
            TransformationType::Merge
        );
        assert!(matches!(
            "rewrite".parse::<TransformationType>(),
            Err(LineageError::ValidationFailed(_))
        ));
    }

    #[test]
    fn record_uses_flat_persisted_layout() {
        let mut lineage = DocumentLineage::new("B");
        lineage.parents.insert("A".to_string());
        lineage.derived_from = Some("A".to_string());
        let mut record = LineageRecord::new(lineage);
        record.transformations.push(
            Transformation::new(TransformationType::Conversion, "xlsx to csv")
                .with_parameter("target_format", json!("csv")),
        );

        let value = serde_json::to_value(&record).expect("encode");
        assert_eq!(value["doc_id"], json!("B"));
        assert_eq!(value["parents"], json!(["A"]));
        assert_eq!(value["derived_from"], json!("A"));
        assert_eq!(value["schema_version"], json!(1));
        assert_eq!(value["transformations"][0]["type"], json!("CONVERSION"));
        assert!(value["last_modified"].is_string());
    }

    #[test]
    fn forget_strips_every_relationship() {
        let mut lineage = DocumentLineage::new("B");
        lineage.parents.insert("A".to_string());
        lineage.children.insert("A".to_string());
        lineage.derived_documents.insert("A".to_string());
        lineage.derived_from = Some("A".to_string());

        assert!(lineage.forget("A"));
        assert!(lineage.is_root());
        assert!(lineage.children.is_empty());
        assert!(!lineage.forget("A"));
    }

    #[test]
    fn check_local_rejects_derived_from_outside_parents() {
        let mut lineage = DocumentLineage::new("B");
        lineage.derived_from = Some("A".to_string());
        assert!(matches!(
            lineage.check_local(),
            Err(LineageError::InconsistentRelationship(_))
        ));

        lineage.parents.insert("A".to_string());
        assert!(lineage.check_local().is_ok());
    }

    #[test]
    fn timeouts_and_io_are_retryable() {
        let timeout = LineageError::from(StorageError::Timeout(Duration::from_millis(5)));
        assert!(timeout.is_retryable());
        assert!(!LineageError::NotFound("x".to_string()).is_retryable());
        assert_eq!(timeout.kind(), "storage_failure");
    }

    #[test]
    fn circular_reference_renders_path() {
        let err = LineageError::CircularReference {
            path: vec!["A".to_string(), "B".to_string(), "A".to_string()],
        };
        assert_eq!(err.to_string(), "circular reference: A -> B -> A");
    }
}
