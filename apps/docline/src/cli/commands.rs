//! # CLI Command Implementations

use crate::config::DoclineConfig;
use crate::processor::JsonContentProcessor;
use chrono::{DateTime, Utc};
use docline_core::limits::MAX_SNAPSHOT_BYTES;
use docline_core::{
    CancellationToken, DocumentLineage, HistoryFilter, LineageError, LineageGraph,
    LineageRepository, Metadata, MigrationEngine, StorageError, TracingMetrics, Transformation,
    TransformationType, export_snapshot, import_snapshot, snapshot_from_bytes, snapshot_to_bytes,
};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

// =============================================================================
// FILE SIZE LIMITS
// =============================================================================

/// Maximum size of a `--meta-file` (1 MB).
const MAX_META_FILE_SIZE: u64 = 1024 * 1024;

/// Validate file size before reading.
fn validate_file_size(path: &Path, max_size: u64) -> Result<(), LineageError> {
    let metadata = fs::metadata(path).map_err(StorageError::from)?;
    if metadata.len() > max_size {
        return Err(LineageError::ValidationFailed(format!(
            "file size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }
    Ok(())
}

// =============================================================================
// SHARED HELPERS
// =============================================================================

/// Output switches shared by every command.
#[derive(Debug, Clone, Copy, Default)]
pub struct Output {
    /// Print JSON instead of text.
    pub json: bool,
    /// Skip confirmation lines in text mode.
    pub quiet: bool,
}

impl Output {
    fn confirm(self, message: &str) {
        if !self.quiet {
            println!("{}", message);
        }
    }
}

fn print_json(value: &impl serde::Serialize) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

fn open_repo(config: &DoclineConfig) -> Result<Arc<LineageRepository>, LineageError> {
    config.open_repository().map(Arc::new)
}

fn open_graph(config: &DoclineConfig) -> Result<LineageGraph, LineageError> {
    Ok(LineageGraph::new(open_repo(config)?).with_metrics(Arc::new(TracingMetrics)))
}

/// Parse `key=value`. The value is read as JSON when it parses, otherwise
/// it is kept as a plain string.
pub fn parse_assignment(input: &str) -> Result<(String, serde_json::Value), LineageError> {
    let Some((key, raw)) = input.split_once('=') else {
        return Err(LineageError::ValidationFailed(format!(
            "expected key=value, got '{}'",
            input
        )));
    };
    let key = key.trim();
    if key.is_empty() {
        return Err(LineageError::ValidationFailed(format!(
            "empty key in '{}'",
            input
        )));
    }
    let value = serde_json::from_str(raw)
        .unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

fn parse_assignments(inputs: &[String]) -> Result<Metadata, LineageError> {
    inputs.iter().map(|s| parse_assignment(s)).collect()
}

// =============================================================================
// INIT / STATUS
// =============================================================================

/// Create the store if it does not exist yet.
pub fn cmd_init(config: &DoclineConfig, out: Output) -> Result<(), LineageError> {
    let repo = open_repo(config)?;
    let documents = repo.get_all_lineage()?.len();
    let path = config.data_path();

    if out.json {
        print_json(&serde_json::json!({
            "backend": repo.backend_name(),
            "path": path.to_string_lossy(),
            "documents": documents,
        }));
        return Ok(());
    }
    out.confirm(&format!(
        "Initialized {} store at {} ({} documents)",
        repo.backend_name(),
        path.display(),
        documents
    ));
    Ok(())
}

/// Show store statistics.
pub fn cmd_status(config: &DoclineConfig, out: Output) -> Result<(), LineageError> {
    let repo = open_repo(config)?;
    let records = repo.get_all_records()?;

    let roots = records.iter().filter(|r| r.lineage.is_root()).count();
    let derived = records
        .iter()
        .filter(|r| r.lineage.derived_from.is_some())
        .count();
    let transformations: usize = records.iter().map(|r| r.transformations.len()).sum();
    let mut versions: BTreeMap<u32, usize> = BTreeMap::new();
    for record in &records {
        *versions.entry(record.lineage.schema_version).or_default() += 1;
    }

    if out.json {
        print_json(&serde_json::json!({
            "backend": repo.backend_name(),
            "path": config.data_path().to_string_lossy(),
            "documents": records.len(),
            "roots": roots,
            "derived": derived,
            "transformations": transformations,
            "schema_versions": versions,
        }));
        return Ok(());
    }

    println!("Docline Store Status");
    println!("====================");
    println!("Path:    {}", config.data_path().display());
    println!("Backend: {}", repo.backend_name());
    println!();
    println!("Documents:       {}", records.len());
    println!("Roots:           {}", roots);
    println!("Derived:         {}", derived);
    println!("Transformations: {}", transformations);
    for (version, count) in &versions {
        println!("Schema v{}:       {}", version, count);
    }
    Ok(())
}

// =============================================================================
// WRITE COMMANDS
// =============================================================================

/// Register a document.
pub fn cmd_add(
    config: &DoclineConfig,
    out: Output,
    id: &str,
    parents: &[String],
    meta: Option<&str>,
    meta_file: Option<&Path>,
) -> Result<(), LineageError> {
    let graph = open_graph(config)?;
    let parent_ids: Vec<&str> = parents.iter().map(String::as_str).collect();

    match (meta, meta_file) {
        (Some(inline), _) => graph.add_document_from_content(
            id,
            &parent_ids,
            inline.as_bytes(),
            &JsonContentProcessor,
        )?,
        (None, Some(path)) => {
            validate_file_size(path, MAX_META_FILE_SIZE)?;
            let raw = fs::read(path).map_err(StorageError::from)?;
            graph.add_document_from_content(id, &parent_ids, &raw, &JsonContentProcessor)?;
        }
        (None, None) => graph.add_document(id, &parent_ids, Metadata::new())?,
    }

    if out.json {
        print_json(&graph.repository().get_lineage(id)?);
        return Ok(());
    }
    out.confirm(&format!("Added {}", id));
    Ok(())
}

/// Record a derivation.
pub fn cmd_derive(
    config: &DoclineConfig,
    out: Output,
    parent: &str,
    derived: &str,
    kind: TransformationType,
    description: &str,
    params: &[String],
) -> Result<(), LineageError> {
    let graph = open_graph(config)?;
    let transformation =
        Transformation::new(kind, description).with_parameters(parse_assignments(params)?);
    graph.add_derivation(parent, derived, transformation)?;

    if out.json {
        print_json(&graph.repository().get_lineage(derived)?);
        return Ok(());
    }
    out.confirm(&format!("{} -[{}]-> {}", parent, kind, derived));
    Ok(())
}

/// Delete a document.
pub fn cmd_delete(config: &DoclineConfig, out: Output, id: &str) -> Result<(), LineageError> {
    open_graph(config)?.delete_document(id)?;
    if out.json {
        print_json(&serde_json::json!({ "deleted": id }));
        return Ok(());
    }
    out.confirm(&format!("Deleted {}", id));
    Ok(())
}

// =============================================================================
// READ COMMANDS
// =============================================================================

fn print_lineage(lineage: &DocumentLineage) {
    let join = |ids: &std::collections::BTreeSet<String>| {
        if ids.is_empty() {
            "-".to_string()
        } else {
            ids.iter().cloned().collect::<Vec<_>>().join(", ")
        }
    };
    println!("Document:      {}", lineage.doc_id);
    println!("Schema:        v{}", lineage.schema_version);
    println!("Modified:      {}", lineage.last_modified.to_rfc3339());
    println!(
        "Derived from:  {}",
        lineage.derived_from.as_deref().unwrap_or("-")
    );
    println!("Parents:       {}", join(&lineage.parents));
    println!("Children:      {}", join(&lineage.children));
    println!("Derived docs:  {}", join(&lineage.derived_documents));
    if !lineage.metadata.is_empty() {
        println!("Metadata:");
        for (key, value) in &lineage.metadata {
            println!("  {}: {}", key, value);
        }
    }
}

/// Print one lineage record.
pub fn cmd_show(config: &DoclineConfig, out: Output, id: &str) -> Result<(), LineageError> {
    let record = open_repo(config)?.get_record(id)?;
    if out.json {
        print_json(&record);
        return Ok(());
    }
    print_lineage(&record.lineage);
    println!("Transformations: {}", record.transformations.len());
    Ok(())
}

/// Print the derivation chain of a document.
pub fn cmd_chain(
    config: &DoclineConfig,
    out: Output,
    id: &str,
    depth: usize,
) -> Result<(), LineageError> {
    let chain = open_graph(config)?.get_derivation_chain(id, depth)?;
    if out.json {
        print_json(&chain);
        return Ok(());
    }
    for (i, lineage) in chain.iter().enumerate() {
        println!("{:>3}. {} (v{})", i, lineage.doc_id, lineage.schema_version);
    }
    Ok(())
}

/// Which way `cmd_walk` follows edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkDirection {
    Ancestors,
    Descendants,
}

/// Print every document reachable within `depth` hops.
pub fn cmd_walk(
    config: &DoclineConfig,
    out: Output,
    id: &str,
    depth: usize,
    direction: WalkDirection,
) -> Result<(), LineageError> {
    let graph = open_graph(config)?;
    let ids = match direction {
        WalkDirection::Ancestors => graph.ancestors(id, depth)?,
        WalkDirection::Descendants => graph.descendants(id, depth)?,
    };
    if out.json {
        print_json(&ids);
        return Ok(());
    }
    for doc_id in &ids {
        println!("{}", doc_id);
    }
    Ok(())
}

/// Print a document's transformation history.
pub fn cmd_history(
    config: &DoclineConfig,
    out: Output,
    id: &str,
    kind: Option<TransformationType>,
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
) -> Result<(), LineageError> {
    let mut filter = HistoryFilter::all().between(since, until);
    if let Some(kind) = kind {
        filter = filter.of_kind(kind);
    }
    let entries = open_graph(config)?.transformations().history(id, &filter)?;

    if out.json {
        print_json(&entries);
        return Ok(());
    }
    if entries.is_empty() {
        out.confirm(&format!("No transformations recorded for {}", id));
    }
    for entry in &entries {
        println!(
            "{}  {:<10}  {}",
            entry.timestamp.to_rfc3339(),
            entry.kind.as_str(),
            entry.description
        );
    }
    Ok(())
}

/// Audit the whole store. Fails when any issue is found.
pub fn cmd_validate(config: &DoclineConfig, out: Output) -> Result<(), LineageError> {
    let issues = open_graph(config)?.audit()?;
    let messages: Vec<String> = issues.iter().map(ToString::to_string).collect();

    if out.json {
        print_json(&serde_json::json!({
            "valid": messages.is_empty(),
            "issues": messages,
        }));
    } else if messages.is_empty() {
        out.confirm("Lineage graph is consistent");
    } else {
        for message in &messages {
            println!("{}", message);
        }
    }

    if messages.is_empty() {
        Ok(())
    } else {
        Err(LineageError::ValidationFailed(format!(
            "{} relationship issue(s) found",
            messages.len()
        )))
    }
}

// =============================================================================
// MIGRATE COMMAND
// =============================================================================

/// Migrate documents to `to_version`, setting the given metadata fields.
///
/// Every document is attempted; the first failure is returned afterwards.
pub fn cmd_migrate(
    config: &DoclineConfig,
    out: Output,
    ids: &[String],
    to_version: u32,
    sets: &[String],
) -> Result<(), LineageError> {
    let updates = parse_assignments(sets)?;
    let engine = MigrationEngine::new(open_repo(config)?).with_metrics(Arc::new(TracingMetrics));
    let doc_ids: Vec<&str> = ids.iter().map(String::as_str).collect();

    let results = engine.migrate_batch(
        &doc_ids,
        to_version,
        |_ctx, mut metadata| {
            metadata.extend(updates.clone());
            Ok(metadata)
        },
        &CancellationToken::new(),
    );

    if out.json {
        let report: Vec<serde_json::Value> = results
            .iter()
            .map(|r| match &r.outcome {
                Ok(state) => serde_json::json!({ "doc_id": r.doc_id, "state": state }),
                Err(e) => serde_json::json!({
                    "doc_id": r.doc_id,
                    "error": e.to_string(),
                    "kind": e.kind(),
                }),
            })
            .collect();
        print_json(&report);
    } else {
        for result in &results {
            match &result.outcome {
                Ok(state) => out.confirm(&format!(
                    "{}: v{} -> v{} {}",
                    result.doc_id, state.from_version, state.to_version, state.status
                )),
                Err(e) => println!("{}: {}", result.doc_id, e),
            }
        }
    }

    match results.into_iter().find_map(|r| r.outcome.err()) {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

// =============================================================================
// EXPORT / IMPORT COMMANDS
// =============================================================================

/// Write a snapshot of the whole store.
pub fn cmd_export(config: &DoclineConfig, out: Output, output: &Path) -> Result<(), LineageError> {
    let snapshot = export_snapshot(&*open_repo(config)?)?;
    let bytes = snapshot_to_bytes(&snapshot)?;
    fs::write(output, bytes).map_err(StorageError::from)?;
    tracing::info!(
        records = snapshot.records.len(),
        path = %output.display(),
        "exported snapshot"
    );

    if out.json {
        print_json(&snapshot.header);
        return Ok(());
    }
    out.confirm(&format!(
        "Exported {} records to {} (blake3 {})",
        snapshot.records.len(),
        output.display(),
        snapshot.header.checksum
    ));
    Ok(())
}

/// Load a snapshot into the store.
pub fn cmd_import(config: &DoclineConfig, out: Output, input: &Path) -> Result<(), LineageError> {
    validate_file_size(input, MAX_SNAPSHOT_BYTES as u64)?;
    let bytes = fs::read(input).map_err(StorageError::from)?;
    let snapshot = snapshot_from_bytes(&bytes)?;
    let imported = import_snapshot(&*open_repo(config)?, &snapshot)?;

    if out.json {
        print_json(&serde_json::json!({ "imported": imported }));
        return Ok(());
    }
    out.confirm(&format!("Imported {} records", imported));
    Ok(())
}
