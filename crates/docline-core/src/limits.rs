//! # Input Limits
//!
//! Hardcoded bounds for everything that crosses the library boundary.
//!
//! Metadata stays an open map; only its structure (field count, nesting
//! depth) is checked here, never business-specific fields.

use crate::{LineageError, Metadata};

/// Maximum length of a document id, in bytes.
pub const MAX_DOC_ID_LENGTH: usize = 256;

/// Maximum number of top-level fields in a metadata or parameter map.
pub const MAX_METADATA_FIELDS: usize = 256;

/// Maximum nesting depth of metadata values (objects and arrays).
pub const MAX_METADATA_DEPTH: usize = 16;

/// Maximum length of a transformation description, in bytes.
pub const MAX_DESCRIPTION_LENGTH: usize = 4096;

/// Maximum number of hops any chain or breadth-first walk will take.
///
/// Larger requested depths are clamped to this value.
pub const MAX_CHAIN_DEPTH: usize = 1000;

/// Maximum number of parents accepted in a single `add_document` call.
pub const MAX_PARENTS: usize = 1024;

/// Maximum size of an encoded snapshot, checked before parsing.
pub const MAX_SNAPSHOT_BYTES: usize = 256 * 1024 * 1024;

/// Default time a caller waits for the repository lock.
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5000;

// =============================================================================
// BOUNDARY CHECKS
// =============================================================================

/// Check that a document id is usable as a storage key.
pub fn validate_doc_id(doc_id: &str) -> Result<(), LineageError> {
    if doc_id.trim().is_empty() {
        return Err(LineageError::ValidationFailed(
            "document id must not be empty".to_string(),
        ));
    }
    if doc_id.len() > MAX_DOC_ID_LENGTH {
        return Err(LineageError::ValidationFailed(format!(
            "document id exceeds {} bytes",
            MAX_DOC_ID_LENGTH
        )));
    }
    if doc_id.chars().any(char::is_control) {
        return Err(LineageError::ValidationFailed(format!(
            "document id {:?} contains control characters",
            doc_id
        )));
    }
    Ok(())
}

/// Check the structural bounds of a metadata map.
pub fn validate_metadata(metadata: &Metadata) -> Result<(), LineageError> {
    if metadata.len() > MAX_METADATA_FIELDS {
        return Err(LineageError::ValidationFailed(format!(
            "metadata has {} fields (max {})",
            metadata.len(),
            MAX_METADATA_FIELDS
        )));
    }
    for (key, value) in metadata {
        if key.is_empty() {
            return Err(LineageError::ValidationFailed(
                "metadata keys must not be empty".to_string(),
            ));
        }
        if value_depth(value) > MAX_METADATA_DEPTH {
            return Err(LineageError::ValidationFailed(format!(
                "metadata field '{}' nests deeper than {} levels",
                key, MAX_METADATA_DEPTH
            )));
        }
    }
    Ok(())
}

/// Check a transformation description.
pub fn validate_description(description: &str) -> Result<(), LineageError> {
    if description.len() > MAX_DESCRIPTION_LENGTH {
        return Err(LineageError::ValidationFailed(format!(
            "description exceeds {} bytes",
            MAX_DESCRIPTION_LENGTH
        )));
    }
    Ok(())
}

/// Check a requested traversal depth and clamp it to `MAX_CHAIN_DEPTH`.
pub fn checked_depth(max_depth: usize) -> Result<usize, LineageError> {
    if max_depth == 0 {
        return Err(LineageError::ValidationFailed(
            "max_depth must be positive".to_string(),
        ));
    }
    Ok(max_depth.min(MAX_CHAIN_DEPTH))
}

fn value_depth(value: &serde_json::Value) -> usize {
    // Iterative to stay bounded on hostile input.
    let mut deepest = 0;
    let mut stack = vec![(value, 1usize)];
    while let Some((current, depth)) = stack.pop() {
        deepest = deepest.max(depth);
        if depth > MAX_METADATA_DEPTH {
            break;
        }
        match current {
            serde_json::Value::Array(items) => {
                stack.extend(items.iter().map(|v| (v, depth.saturating_add(1))));
            }
            serde_json::Value::Object(fields) => {
                stack.extend(fields.values().map(|v| (v, depth.saturating_add(1))));
            }
            _ => {}
        }
    }
    deepest
}
