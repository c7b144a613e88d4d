//! # docline-core
//!
//! The document lineage engine for Docline - THE LOGIC.
//!
//! This crate records where documents come from: which documents they were
//! derived from, which transformations produced them, and which schema
//! version their metadata follows. It keeps that graph acyclic and
//! bidirectionally consistent under concurrent writers.
//!
//! ## Layers
//!
//! - `storage`: durable key-value persistence (memory, JSON files, redb)
//! - `repository`: typed, lock-guarded CRUD with transactional rollback
//! - `validator`: pure consistency, cycle and dangling-reference checks
//! - `transformation_log`: append-only per-document history
//! - `graph`: the write path (documents, derivations) and graph walks
//! - `migration`: schema-version migrations with a per-attempt state machine
//! - `snapshot`: verifiable whole-store export/import
//!
//! ## Architectural Constraints
//!
//! - Has NO async, NO network dependencies (pure Rust)
//! - Never parses raw document formats (see `ContentProcessor`)
//! - Never retries: retryable failures are reported to the caller

// =============================================================================
// MODULES
// =============================================================================

pub mod graph;
pub mod limits;
pub mod metrics;
pub mod migration;
pub mod repository;
pub mod snapshot;
pub mod storage;
pub mod transformation_log;
pub mod types;
pub mod validator;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    BoxError, ContentProcessor, DocumentLineage, INITIAL_SCHEMA_VERSION, LineageError,
    LineageRecord, Metadata, StorageError, Transformation, TransformationType,
};

// =============================================================================
// RE-EXPORTS: Lineage Engine
// =============================================================================

pub use graph::LineageGraph;
pub use metrics::{InMemoryMetrics, MetricsSink, NoopMetrics, TracingMetrics};
pub use migration::{
    BatchMigrationResult, CancellationToken, MigrationContext, MigrationEngine, MigrationState,
    MigrationStatus,
};
pub use repository::{LineageRepository, RepoTxn, RepoView, RepositoryConfig};
pub use storage::{FileStore, LineageStore, MemoryStore, RedbStore};
pub use transformation_log::{HistoryFilter, TransformationLog};
pub use validator::{Relation, RelationshipValidator, ValidationIssue};

// =============================================================================
// RE-EXPORTS: Snapshots
// =============================================================================

pub use snapshot::{
    LineageSnapshot, SNAPSHOT_MAGIC, SnapshotHeader, export_snapshot, import_snapshot,
    snapshot_checksum, snapshot_from_bytes, snapshot_to_bytes,
};
